//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use trigon_gpu::{load_compiled_shader, spirv_words, Result};

/// Where a shader's SPIR-V comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// Bytes compiled into the binary.
    Embedded(&'static [u8]),
    /// A compiled shader on disk, resolved next to the executable if relative.
    File(PathBuf),
}

impl ShaderSource {
    /// Read the shader and convert it to SPIR-V words.
    pub fn load(&self) -> Result<Vec<u32>> {
        match self {
            Self::Embedded(bytes) => spirv_words(bytes),
            Self::File(path) => spirv_words(&load_compiled_shader(path)?),
        }
    }
}

/// Application configuration.
///
/// Built once at startup and handed to the runner; nothing reads configuration from
/// anywhere else.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title, also used as the Vulkan application name.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Dump the selected device and surface support.
    pub verbose: bool,
    /// Force a physical device by enumeration index.
    pub device_index: Option<usize>,
    /// Frame slots in flight (at least 1).
    pub frames_in_flight: usize,
    /// Bound on fence waits and acquires; `None` waits indefinitely.
    pub fence_timeout: Option<Duration>,
    /// Rebuild the swapchain on resize or when it goes out of date.
    pub recreate_swapchain: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    pub vertex_shader: ShaderSource,
    pub fragment_shader: ShaderSource,
    /// Clear color, RGBA.
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Trigon".to_string(),
            width: 800,
            height: 600,
            verbose: false,
            device_index: None,
            frames_in_flight: 2,
            fence_timeout: None,
            recreate_swapchain: true,
            validation: cfg!(debug_assertions),
            vertex_shader: ShaderSource::Embedded(trigon_shaders::TRIANGLE_VERT),
            fragment_shader: ShaderSource::Embedded(trigon_shaders::TRIANGLE_FRAG),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Force the physical device at `index`.
    #[must_use]
    pub const fn with_device_index(mut self, index: Option<usize>) -> Self {
        self.device_index = index;
        self
    }

    /// Set the number of frames in flight; zero is raised to one.
    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    #[must_use]
    pub const fn with_fence_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fence_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_recreate_swapchain(mut self, recreate: bool) -> Self {
        self.recreate_swapchain = recreate;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub fn with_vertex_shader(mut self, source: ShaderSource) -> Self {
        self.vertex_shader = source;
        self
    }

    #[must_use]
    pub fn with_fragment_shader(mut self, source: ShaderSource) -> Self {
        self.fragment_shader = source;
        self
    }

    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }
}
