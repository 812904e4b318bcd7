//! Trigon triangle
//!
//! Opens a window and draws a single hardcoded triangle with Vulkan.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p trigon-triangle -- [OPTIONS]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Dump the selected device and surface support
//! cargo run -p trigon-triangle -- --verbose
//!
//! # Force the second enumerated GPU, single frame in flight
//! cargo run -p trigon-triangle -- -d 1 --frames-in-flight 1
//!
//! # Load shaders compiled elsewhere
//! cargo run -p trigon-triangle -- --vertex-shader shaders/vert.spv --fragment-shader shaders/frag.spv
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use trigon_app::{run, AppConfig, ShaderSource};

#[derive(clap::Parser, Debug)]
#[command(version, about = "Draw a triangle with Vulkan")]
struct CliArgs {
    /// Dump the selected device's properties and surface support
    #[arg(short, long)]
    verbose: bool,

    /// Use the physical device at this enumeration index
    #[arg(short, long, value_name = "INDEX")]
    device: Option<usize>,

    /// Frames recorded ahead of the GPU
    #[arg(long, value_name = "N", default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    frames_in_flight: u32,

    /// Give up on a fence or acquire after this many milliseconds (default: wait forever)
    #[arg(long, value_name = "MS")]
    fence_timeout_ms: Option<u64>,

    /// Stop instead of rebuilding the swapchain when it goes out of date
    #[arg(long)]
    no_recreate: bool,

    /// Compiled vertex shader to use instead of the built-in one
    #[arg(long, value_name = "PATH")]
    vertex_shader: Option<PathBuf>,

    /// Compiled fragment shader to use instead of the built-in one
    #[arg(long, value_name = "PATH")]
    fragment_shader: Option<PathBuf>,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,
}

impl CliArgs {
    fn into_config(self) -> AppConfig {
        let mut config = AppConfig::new("Trigon Triangle")
            .with_size(self.width, self.height)
            .with_verbose(self.verbose)
            .with_device_index(self.device)
            .with_frames_in_flight(self.frames_in_flight as usize)
            .with_fence_timeout(self.fence_timeout_ms.map(Duration::from_millis))
            .with_recreate_swapchain(!self.no_recreate);

        if let Some(path) = self.vertex_shader {
            config = config.with_vertex_shader(ShaderSource::File(path));
        }
        if let Some(path) = self.fragment_shader {
            config = config.with_fragment_shader(ShaderSource::File(path));
        }
        config
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(args.into_config()).context("trigon-triangle failed") {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["trigon-triangle"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap().into_config()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert!(!config.verbose);
        assert_eq!(config.device_index, None);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.fence_timeout, None);
        assert!(config.recreate_swapchain);
        assert_eq!((config.width, config.height), (800, 600));
    }

    #[test]
    fn flags_reach_config() {
        let config = parse(&[
            "-v",
            "-d",
            "1",
            "--frames-in-flight",
            "3",
            "--fence-timeout-ms",
            "250",
            "--no-recreate",
            "--vertex-shader",
            "v.spv",
        ]);
        assert!(config.verbose);
        assert_eq!(config.device_index, Some(1));
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.fence_timeout, Some(Duration::from_millis(250)));
        assert!(!config.recreate_swapchain);
        assert_eq!(config.vertex_shader, ShaderSource::File("v.spv".into()));
        assert!(matches!(config.fragment_shader, ShaderSource::Embedded(_)));
    }

    #[test]
    fn zero_frames_in_flight_rejected() {
        assert!(CliArgs::try_parse_from(["trigon-triangle", "--frames-in-flight", "0"]).is_err());
    }
}
