//! GPU error types.

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// Errors raised while bringing up or rebuilding GPU resources.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// No physical device offers graphics, presentation and the swapchain extension.
    #[error("No capable GPU found")]
    NoCapableDevice,

    /// The requested device index does not exist.
    #[error("Device index {index} is out of range ({count} devices enumerated)")]
    DeviceIndexOutOfRange { index: usize, count: usize },

    /// The requested device exists but cannot drive this surface.
    #[error("Device {index} is not suitable: {reason}")]
    UnsuitableDevice { index: usize, reason: String },

    /// The surface reports nothing we can present with.
    #[error("Presentation unavailable: {0}")]
    PresentationUnavailable(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(vk::Result),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Shader file not found at the given path nor next to the executable.
    #[error("Shader file {} was not found", .0.display())]
    ShaderNotFound(PathBuf),

    /// Shader file exists but could not be read.
    #[error("Failed to read shader {}", path.display())]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Shader bytecode rejected.
    #[error("Shader compilation failed: {0}")]
    ShaderCompile(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Vulkan loader could not be opened.
    #[error("Failed to load Vulkan: {0}")]
    Loader(String),
}

impl From<vk::Result> for GpuError {
    fn from(result: vk::Result) -> Self {
        Self::Vulkan(result)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Errors raised by a single iteration of the frame loop.
///
/// Only [`FrameError::SurfaceLost`], [`FrameError::DeviceLost`] and [`FrameError::SlotLost`]
/// leave the persistent resources unusable. For the rest the frame is dropped and the loop
/// moves on.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The in-flight fence or the acquire did not complete within the configured timeout.
    #[error("Timed out waiting for the GPU")]
    Timeout,

    /// The swapchain no longer matches the surface.
    #[error("Swapchain is out of date")]
    OutOfDate,

    /// The surface is gone; everything downstream must be torn down.
    #[error("Presentation surface lost")]
    SurfaceLost,

    /// The logical device is gone.
    #[error("Device lost")]
    DeviceLost,

    /// A dropped frame could not hand its fence back, so the slot can never be waited on
    /// again.
    #[error("Frame slot could not be released after a dropped frame")]
    SlotLost,

    /// Any other native failure.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}

impl FrameError {
    /// Whether the loop must stop and tear everything down.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::SurfaceLost | Self::DeviceLost | Self::SlotLost)
    }

    /// Whether the swapchain and its dependents must be rebuilt before the next frame.
    pub const fn needs_rebuild(self) -> bool {
        matches!(self, Self::OutOfDate)
    }
}

impl From<vk::Result> for FrameError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Vulkan(other),
        }
    }
}
