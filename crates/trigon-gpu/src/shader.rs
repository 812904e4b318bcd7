//! Loading compiled shaders.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{GpuError, Result};

/// SPIR-V magic number, first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Read a compiled shader from `path`.
///
/// A relative path that does not exist is also tried next to the running executable.
pub fn load_compiled_shader(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let resolved = resolve_shader_path(path, env::current_exe().ok().as_deref())
        .ok_or_else(|| GpuError::ShaderNotFound(path.to_path_buf()))?;

    tracing::debug!(path = %resolved.display(), "Loading shader");
    fs::read(&resolved).map_err(|source| GpuError::ShaderIo {
        path: resolved,
        source,
    })
}

/// `path` if it exists, else `<exe dir>/path` for a relative `path` that exists there.
fn resolve_shader_path(path: &Path, exe: Option<&Path>) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }
    if path.is_absolute() {
        return None;
    }
    let candidate = exe?.parent()?.join(path);
    candidate.exists().then_some(candidate)
}

/// Convert SPIR-V bytes to aligned words, checking length and magic number.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(GpuError::ShaderCompile(format!(
            "SPIR-V length {} is not a positive multiple of 4",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(GpuError::ShaderCompile(format!(
            "bad SPIR-V magic number {:#010x}",
            words[0]
        )));
    }
    Ok(words)
}
