//! Vulkan device, swap chain and frame-in-flight management for trigon.
//!
//! This crate provides:
//! - Instance, surface and logical device bootstrap
//! - Swap chain negotiation and rebuild
//! - The render pass and pipeline for the triangle
//! - A ring of frames in flight driving acquire, record, submit and present
//! - Swapchain rebuild with its framebuffers and, on a format change, the pipeline
//!
//! Everything above the device goes through [`GpuBackend`].

pub mod backend;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod instance;
pub mod pipeline;
pub mod ring;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod targets;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{GpuBackend, Presentation, QueueFamilies, Submission};
pub use capabilities::{DeviceReport, GpuVendor};
pub use command::CommandPool;
pub use context::{select_device, DeviceCandidate, DeviceContext};
pub use error::{FrameError, GpuError, Result};
pub use frame::{FrameOutcome, FrameRing, FrameSlot, FrameTarget, SlotState};
pub use framebuffer::Framebuffers;
pub use instance::Instance;
pub use pipeline::TrianglePipeline;
pub use ring::Ring;
pub use shader::{load_compiled_shader, spirv_words};
pub use surface::{PresentationSurface, SurfaceCapabilities};
pub use swapchain::{Swapchain, SwapchainPlan};
pub use sync::FrameSync;
pub use targets::RenderTargets;

#[cfg(test)]
mod tests {
    use ash::vk;

    use crate::frame::{FrameRing, FrameTarget};
    use crate::framebuffer::Framebuffers;
    use crate::pipeline::TrianglePipeline;
    use crate::swapchain::Swapchain;
    use crate::testing::{FakeGpu, Kind};
    use crate::GpuBackend;

    const WORDS: [u32; 2] = [0x0723_0203, 0x0001_0000];

    #[test]
    fn shutdown_reverses_creation() {
        let gpu = FakeGpu::new().auto_complete();
        let window = vk::Extent2D {
            width: 800,
            height: 600,
        };

        unsafe {
            let swapchain = Swapchain::build(&gpu, vk::SurfaceKHR::null(), window, None).unwrap();
            let pipeline = TrianglePipeline::build(
                &gpu,
                &WORDS,
                &WORDS,
                swapchain.format.format,
                swapchain.extent,
            )
            .unwrap();
            let mut framebuffers = Framebuffers::build(
                &gpu,
                pipeline.render_pass,
                &swapchain.image_views,
                swapchain.extent,
            )
            .unwrap();
            let mut ring = FrameRing::new(&gpu, 0, 2, None).unwrap();

            for _ in 0..3 {
                let target = FrameTarget {
                    swapchain: swapchain.swapchain,
                    render_pass: pipeline.render_pass,
                    pipeline: pipeline.pipeline,
                    framebuffers: &framebuffers.framebuffers,
                    extent: swapchain.extent,
                    clear_color: [0.0, 0.0, 0.0, 1.0],
                };
                ring.draw_frame(&gpu, &target).unwrap();
            }

            // Shader modules are gone before shutdown starts
            let destroyed_early = gpu.destroyed();
            let created: Vec<_> = gpu
                .created()
                .into_iter()
                .filter(|object| !destroyed_early.contains(object))
                .collect();
            assert!(created.iter().all(|(kind, _)| *kind != Kind::ShaderModule));
            gpu.clear_log();

            gpu.wait_idle().unwrap();
            ring.destroy(&gpu);
            framebuffers.destroy(&gpu);
            pipeline.destroy(&gpu);
            swapchain.destroy(&gpu);

            let mut destroyed = gpu.destroyed();
            destroyed.reverse();
            assert_eq!(destroyed, created);
        }

        assert_eq!(gpu.live_count(), 0);
        assert!(gpu.violations().is_empty());
    }
}
