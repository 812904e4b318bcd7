//! Everything that depends on the swapchain: the chain itself, the pipeline drawing into
//! its format and one framebuffer per image.

use ash::vk;

use crate::backend::GpuBackend;
use crate::error::Result;
use crate::frame::FrameTarget;
use crate::framebuffer::Framebuffers;
use crate::pipeline::TrianglePipeline;
use crate::swapchain::Swapchain;

/// Swapchain, pipeline and framebuffers, rebuilt together.
pub struct RenderTargets {
    pub swapchain: Swapchain,
    pub pipeline: TrianglePipeline,
    pub framebuffers: Framebuffers,
}

impl RenderTargets {
    pub const fn new(
        swapchain: Swapchain,
        pipeline: TrianglePipeline,
        framebuffers: Framebuffers,
    ) -> Self {
        Self {
            swapchain,
            pipeline,
            framebuffers,
        }
    }

    /// Handles for one frame.
    pub fn frame_target(&self, clear_color: [f32; 4]) -> FrameTarget<'_> {
        FrameTarget {
            swapchain: self.swapchain.swapchain,
            render_pass: self.pipeline.render_pass,
            pipeline: self.pipeline.pipeline,
            framebuffers: &self.framebuffers.framebuffers,
            extent: self.swapchain.extent,
            clear_color,
        }
    }

    /// Replace the swapchain after a resize or an out-of-date report.
    ///
    /// Waits for the device to go idle, builds the new chain from the old one, then
    /// releases the old framebuffers and chain. The pipeline is rebuilt from the given
    /// shaders only when the surface format changed. On failure `self` stays destroyable.
    ///
    /// # Safety
    /// The backend and surface must be valid and the shaders must be the ones the current
    /// pipeline was built from.
    pub unsafe fn rebuild<B: GpuBackend>(
        &mut self,
        backend: &B,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        vertex_spirv: &[u32],
        fragment_spirv: &[u32],
    ) -> Result<()> {
        backend.wait_idle()?;

        unsafe {
            let swapchain = Swapchain::build(backend, surface, window_extent, Some(&self.swapchain))?;
            self.framebuffers.destroy(backend);
            self.swapchain.destroy(backend);
            self.swapchain = swapchain;

            let format = self.swapchain.format.format;
            if format != self.pipeline.color_format {
                tracing::info!(
                    old = ?self.pipeline.color_format,
                    new = ?format,
                    "Surface format changed, rebuilding pipeline"
                );
                let pipeline = TrianglePipeline::build(
                    backend,
                    vertex_spirv,
                    fragment_spirv,
                    format,
                    self.swapchain.extent,
                )?;
                self.pipeline.destroy(backend);
                self.pipeline = pipeline;
            }

            self.framebuffers = Framebuffers::build(
                backend,
                self.pipeline.render_pass,
                &self.swapchain.image_views,
                self.swapchain.extent,
            )?;
        }

        Ok(())
    }

    /// Destroy framebuffers, pipeline and swapchain, in that order.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy<B: GpuBackend>(&mut self, backend: &B) {
        unsafe {
            self.framebuffers.destroy(backend);
            self.pipeline.destroy(backend);
            self.swapchain.destroy(backend);
        }
    }
}
