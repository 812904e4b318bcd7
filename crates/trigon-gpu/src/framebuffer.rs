//! One framebuffer per swapchain image.

use ash::vk;

use crate::backend::GpuBackend;
use crate::error::Result;

/// Framebuffers binding each swapchain view to the render pass, indexed like the images.
#[derive(Debug, Default)]
pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
}

impl Framebuffers {
    /// Create one framebuffer per view. Anything created before a failure is destroyed.
    ///
    /// # Safety
    /// The backend, render pass and views must be valid.
    pub unsafe fn build<B: GpuBackend>(
        backend: &B,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut built = Self {
            framebuffers: Vec::with_capacity(views.len()),
            extent,
        };

        for view in views {
            let attachments = [*view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            match unsafe { backend.create_framebuffer(&create_info) } {
                Ok(framebuffer) => built.framebuffers.push(framebuffer),
                Err(e) => {
                    unsafe { built.destroy(backend) };
                    return Err(e.into());
                }
            }
        }

        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Destroy every framebuffer, last first.
    ///
    /// # Safety
    /// No framebuffer may be in use.
    pub unsafe fn destroy<B: GpuBackend>(&mut self, backend: &B) {
        for framebuffer in self.framebuffers.drain(..).rev() {
            unsafe { backend.destroy_framebuffer(framebuffer) };
        }
    }
}
