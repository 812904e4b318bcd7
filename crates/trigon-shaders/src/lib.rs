//! Triangle shaders for trigon.
//!
//! GLSL sources under `shaders/` are compiled to SPIR-V by the build script and embedded
//! here. The bytes may not be 4-byte aligned; convert them before handing them to Vulkan.

/// Vertex shader. Positions and colors of the three vertices are built in, indexed by
/// `gl_VertexIndex`.
pub static TRIANGLE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));

/// Fragment shader passing the interpolated vertex color through.
pub static TRIANGLE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

#[cfg(test)]
mod tests {
    use super::*;

    fn first_word(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[test]
    fn shaders_are_spirv() {
        for shader in [TRIANGLE_VERT, TRIANGLE_FRAG] {
            assert_eq!(first_word(shader), 0x0723_0203, "Invalid SPIR-V magic number");
            assert_eq!(shader.len() % 4, 0);
            assert!(shader.len() > 20, "Shader too small");
        }
    }
}
