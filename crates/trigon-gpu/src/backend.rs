//! The device-level native operations the renderer depends on.
//!
//! [`crate::DeviceContext`] is the Vulkan implementation. Everything above it (swapchain,
//! pipeline, framebuffers, frame ring) is written against this trait, so the same code
//! paths run against a recording fake in tests.

use ash::prelude::VkResult;
use ash::vk;

use crate::error::Result;
use crate::surface::SurfaceCapabilities;

/// Queue family indices used by the renderer.
///
/// Both indices may be equal when one family supports graphics and presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Whether graphics and presentation use distinct queue families.
    pub const fn is_split(&self) -> bool {
        self.graphics != self.present
    }
}

/// One batch for the graphics queue.
///
/// `command_buffer` is `None` for the empty batch used to hand a fence back after a
/// dropped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub command_buffer: Option<vk::CommandBuffer>,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: Option<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// One present request for the presentation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presentation {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub wait_semaphore: vk::Semaphore,
}

/// Device-level operations.
///
/// # Safety
/// Every `unsafe` method takes handles that must have been created by the same backend
/// and must not be destroyed or in use by the GPU when the Vulkan rules say so.
pub trait GpuBackend {
    /// Queue families selected for graphics and presentation.
    fn queue_families(&self) -> QueueFamilies;

    /// Query capabilities, formats and present modes of a surface for this device.
    fn surface_capabilities(&self, surface: vk::SurfaceKHR) -> Result<SurfaceCapabilities>;

    /// Wait until every queue of the device is idle.
    fn wait_idle(&self) -> VkResult<()>;

    // Creation

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR>;
    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>)
        -> VkResult<vk::ImageView>;
    unsafe fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass>;
    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout>;
    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline>;
    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer>;
    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool>;
    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;

    // Per-frame work

    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    /// Returns the image index and whether the swapchain is suboptimal.
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
    );
    unsafe fn cmd_bind_graphics_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport);
    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);
    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn submit_graphics(&self, submission: &Submission) -> VkResult<()>;
    /// Returns whether the swapchain is suboptimal.
    unsafe fn present(&self, presentation: &Presentation) -> VkResult<bool>;

    // Destruction

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    unsafe fn destroy_image_view(&self, view: vk::ImageView);
    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule);
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    unsafe fn destroy_fence(&self, fence: vk::Fence);
}
