//! Windowed application around the trigon renderer.
//!
//! This crate handles:
//! - Window creation and the winit event loop
//! - The ordered GPU init sequence and its teardown
//! - Swapchain recreation on resize
//! - Classifying frame failures into skip, rebuild or stop
//!
//! # Example
//!
//! ```no_run
//! use trigon_app::{run, AppConfig};
//!
//! fn main() -> Result<(), trigon_app::AppError> {
//!     run(AppConfig::new("Triangle").with_size(1024, 768))
//! }
//! ```

mod config;
mod error;
mod renderer;
mod runner;

pub use config::{AppConfig, ShaderSource};
pub use error::{AppError, InitStage};
pub use renderer::{FrameAction, Renderer};
pub use runner::run;
