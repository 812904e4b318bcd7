//! Application error types.

use std::fmt;

use raw_window_handle::HandleError;
use thiserror::Error;
use trigon_gpu::{FrameError, GpuError};
use winit::error::{EventLoopError, OsError};

/// Initialization stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InitStage {
    Instance,
    Surface,
    Device,
    Shaders,
    Swapchain,
    Pipeline,
    Framebuffers,
    FrameRing,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Instance => "instance",
            Self::Surface => "surface",
            Self::Device => "device",
            Self::Shaders => "shaders",
            Self::Swapchain => "swapchain",
            Self::Pipeline => "pipeline",
            Self::Framebuffers => "framebuffers",
            Self::FrameRing => "frame ring",
        };
        f.write_str(name)
    }
}

/// Errors that stop the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// A startup stage failed; nothing is left running.
    #[error("Initialization failed at {stage}")]
    Init {
        stage: InitStage,
        #[source]
        source: GpuError,
    },

    /// A frame failed in a way the loop cannot recover from.
    #[error("Frame loop stopped")]
    Frame(#[from] FrameError),

    /// Rebuilding the swapchain and its dependents failed.
    #[error("Swapchain rebuild failed")]
    Rebuild(#[source] GpuError),

    #[error("Event loop error")]
    EventLoop(#[from] EventLoopError),

    #[error("Window creation failed")]
    Window(#[from] OsError),

    #[error("Window handle unavailable")]
    WindowHandle(#[from] HandleError),
}

impl AppError {
    /// Adapter for `map_err` tagging a [`GpuError`] with the stage it came from.
    pub fn init(stage: InitStage) -> impl FnOnce(GpuError) -> Self {
        move |source| Self::Init { stage, source }
    }
}

/// `error` followed by each of its causes, joined with `": "`.
pub fn chain(error: &dyn std::error::Error) -> String {
    let mut line = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        line.push_str(": ");
        line.push_str(&cause.to_string());
        source = cause.source();
    }
    line
}
