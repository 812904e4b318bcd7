//! Recording fake GPU for tests.
//!
//! Handles are minted from a counter, every call is appended to a log, and fences only
//! signal when the test says so.

use std::collections::{HashMap, HashSet};
use std::slice;
use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::{Condvar, Mutex};

use crate::backend::{GpuBackend, Presentation, QueueFamilies, Submission};
use crate::error::{GpuError, Result};
use crate::surface::SurfaceCapabilities;

/// Object kinds with an explicit destroy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Swapchain,
    ImageView,
    ShaderModule,
    RenderPass,
    PipelineLayout,
    Pipeline,
    Framebuffer,
    CommandPool,
    Semaphore,
    Fence,
}

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SurfaceQuery,
    CreateSwapchain,
    CreateImageView,
    CreateShaderModule,
    CreateRenderPass,
    CreatePipeline,
    CreateFramebuffer,
    Acquire,
    BeginCommandBuffer,
    Submit,
    Present,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(Kind, u64),
    Destroy(Kind, u64),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Acquire {
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        image_index: u32,
    },
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    BeginRenderPass {
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    },
    BindPipeline(vk::CommandBuffer, vk::Pipeline),
    SetViewport {
        cmd: vk::CommandBuffer,
        width: f32,
        height: f32,
    },
    SetScissor {
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
    },
    Draw {
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
    },
    EndRenderPass(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    Submit(Submission),
    Present(Presentation),
    WaitIdle,
}

/// What the last swapchain create call asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainRecord {
    pub min_image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub old_swapchain: vk::SwapchainKHR,
}

/// What the last render pass create call asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPassRecord {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub dependency_count: u32,
}

/// What the last graphics pipeline create call asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRecord {
    pub stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub has_depth_stencil: bool,
    pub has_vertex_input: bool,
    pub blend_enable: bool,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
}

struct FakeState {
    next_handle: u64,
    log: Vec<Call>,
    live: HashSet<(Kind, u64)>,
    violations: Vec<String>,
    fences: HashMap<vk::Fence, bool>,
    pending: Vec<(vk::Fence, Option<vk::CommandBuffer>)>,
    busy_command_buffers: HashSet<vk::CommandBuffer>,
    swapchain_images: HashMap<vk::SwapchainKHR, (u32, u32)>,
    image_count_override: Option<u32>,
    failures: HashMap<Op, (usize, vk::Result)>,
    surface: SurfaceCapabilities,
    queue_families: QueueFamilies,
    auto_complete: bool,
    last_swapchain: Option<SwapchainRecord>,
    last_render_pass: Option<RenderPassRecord>,
    last_pipeline: Option<PipelineRecord>,
}

impl FakeState {
    fn mint<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn create<H: Handle + Copy>(&mut self, kind: Kind) -> H {
        let handle: H = self.mint();
        self.live.insert((kind, handle.as_raw()));
        self.log.push(Call::Create(kind, handle.as_raw()));
        handle
    }

    fn destroy<H: Handle>(&mut self, kind: Kind, handle: H) {
        let raw = handle.as_raw();
        if !self.live.remove(&(kind, raw)) {
            self.violations
                .push(format!("destroyed {kind:?} {raw} which is not live"));
        }
        self.log.push(Call::Destroy(kind, raw));
    }

    fn take_failure(&mut self, op: Op) -> VkResult<()> {
        let Some(entry) = self.failures.get_mut(&op) else {
            return Ok(());
        };
        if entry.0 > 0 {
            entry.0 -= 1;
            return Ok(());
        }
        let result = entry.1;
        self.failures.remove(&op);
        Err(result)
    }

    fn signal(&mut self, fence: vk::Fence) {
        self.fences.insert(fence, true);
        self.pending.retain(|(f, cmd)| {
            if *f == fence {
                if let Some(cmd) = cmd {
                    self.busy_command_buffers.remove(cmd);
                }
                false
            } else {
                true
            }
        });
    }
}

/// A [`GpuBackend`] that records calls and never touches a device.
pub struct FakeGpu {
    state: Mutex<FakeState>,
    signaled: Condvar,
}

impl Default for FakeGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGpu {
    /// A device whose surface offers BGRA sRGB, FIFO and mailbox, 2..=3 images at 800x600.
    pub fn new() -> Self {
        let surface = SurfaceCapabilities {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };

        Self {
            state: Mutex::new(FakeState {
                next_handle: 0,
                log: Vec::new(),
                live: HashSet::new(),
                violations: Vec::new(),
                fences: HashMap::new(),
                pending: Vec::new(),
                busy_command_buffers: HashSet::new(),
                swapchain_images: HashMap::new(),
                image_count_override: None,
                failures: HashMap::new(),
                surface,
                queue_families: QueueFamilies {
                    graphics: 0,
                    present: 0,
                },
                auto_complete: false,
                last_swapchain: None,
                last_render_pass: None,
                last_pipeline: None,
            }),
            signaled: Condvar::new(),
        }
    }

    /// Signal every fence at submit time instead of waiting for [`Self::complete_all`].
    pub fn auto_complete(self) -> Self {
        self.state.lock().auto_complete = true;
        self
    }

    pub fn with_surface(self, surface: SurfaceCapabilities) -> Self {
        self.state.lock().surface = surface;
        self
    }

    pub fn with_queue_families(self, graphics: u32, present: u32) -> Self {
        self.state.lock().queue_families = QueueFamilies { graphics, present };
        self
    }

    /// Hand out `count` images per swapchain regardless of the requested minimum.
    pub fn with_image_count(self, count: u32) -> Self {
        self.state.lock().image_count_override = Some(count);
        self
    }

    pub fn set_surface(&self, surface: SurfaceCapabilities) {
        self.state.lock().surface = surface;
    }

    /// Make the next `op` fail with `result`.
    pub fn fail_next(&self, op: Op, result: vk::Result) {
        self.fail_after(op, 0, result);
    }

    /// Let `skip` calls of `op` succeed, then fail the next one with `result`.
    pub fn fail_after(&self, op: Op, skip: usize, result: vk::Result) {
        self.state.lock().failures.insert(op, (skip, result));
    }

    /// Retire the submission that signals `fence`.
    pub fn complete(&self, fence: vk::Fence) {
        self.state.lock().signal(fence);
        self.signaled.notify_all();
    }

    /// Retire every pending submission.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        let fences: Vec<_> = state.pending.iter().map(|(f, _)| *f).collect();
        for fence in fences {
            state.signal(fence);
        }
        drop(state);
        self.signaled.notify_all();
    }

    pub fn is_signaled(&self, fence: vk::Fence) -> bool {
        self.state.lock().fences.get(&fence).copied().unwrap_or(false)
    }

    pub fn log(&self) -> Vec<Call> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Creation events in order.
    pub fn created(&self) -> Vec<(Kind, u64)> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|call| match call {
                Call::Create(kind, raw) => Some((*kind, *raw)),
                _ => None,
            })
            .collect()
    }

    /// Destruction events in order.
    pub fn destroyed(&self) -> Vec<(Kind, u64)> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|call| match call {
                Call::Destroy(kind, raw) => Some((*kind, *raw)),
                _ => None,
            })
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Protocol violations seen so far (double destroy, reset of a pending buffer).
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn last_swapchain(&self) -> Option<SwapchainRecord> {
        self.state.lock().last_swapchain.clone()
    }

    pub fn last_render_pass(&self) -> Option<RenderPassRecord> {
        self.state.lock().last_render_pass.clone()
    }

    pub fn last_pipeline(&self) -> Option<PipelineRecord> {
        self.state.lock().last_pipeline.clone()
    }
}

impl GpuBackend for FakeGpu {
    fn queue_families(&self) -> QueueFamilies {
        self.state.lock().queue_families
    }

    fn surface_capabilities(&self, _surface: vk::SurfaceKHR) -> Result<SurfaceCapabilities> {
        let mut state = self.state.lock();
        state.take_failure(Op::SurfaceQuery).map_err(GpuError::from)?;
        Ok(state.surface.clone())
    }

    fn wait_idle(&self) -> VkResult<()> {
        self.state.lock().log.push(Call::WaitIdle);
        Ok(())
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        state.take_failure(Op::CreateSwapchain)?;

        let queue_family_indices = if info.queue_family_index_count == 0 {
            Vec::new()
        } else {
            unsafe {
                slice::from_raw_parts(
                    info.p_queue_family_indices,
                    info.queue_family_index_count as usize,
                )
            }
            .to_vec()
        };
        state.last_swapchain = Some(SwapchainRecord {
            min_image_count: info.min_image_count,
            format: info.image_format,
            color_space: info.image_color_space,
            present_mode: info.present_mode,
            extent: info.image_extent,
            sharing_mode: info.image_sharing_mode,
            queue_family_indices,
            old_swapchain: info.old_swapchain,
        });

        let swapchain = state.create(Kind::Swapchain);
        let count = state.image_count_override.unwrap_or(info.min_image_count);
        state.swapchain_images.insert(swapchain, (count, 0));
        Ok(swapchain)
    }

    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut state = self.state.lock();
        let (count, _) = state
            .swapchain_images
            .get(&swapchain)
            .copied()
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        Ok((0..count).map(|_| state.mint()).collect())
    }

    unsafe fn create_image_view(
        &self,
        _info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        let mut state = self.state.lock();
        state.take_failure(Op::CreateImageView)?;
        Ok(state.create(Kind::ImageView))
    }

    unsafe fn create_shader_module(&self, _code: &[u32]) -> VkResult<vk::ShaderModule> {
        let mut state = self.state.lock();
        state.take_failure(Op::CreateShaderModule)?;
        Ok(state.create(Kind::ShaderModule))
    }

    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        let mut state = self.state.lock();
        state.take_failure(Op::CreateRenderPass)?;

        let attachment = unsafe { &*info.p_attachments };
        state.last_render_pass = Some(RenderPassRecord {
            format: attachment.format,
            load_op: attachment.load_op,
            store_op: attachment.store_op,
            initial_layout: attachment.initial_layout,
            final_layout: attachment.final_layout,
            dependency_count: info.dependency_count,
        });
        Ok(state.create(Kind::RenderPass))
    }

    unsafe fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        Ok(self.state.lock().create(Kind::PipelineLayout))
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let mut state = self.state.lock();
        state.take_failure(Op::CreatePipeline)?;

        let record = unsafe {
            let stages = slice::from_raw_parts(info.p_stages, info.stage_count as usize)
                .iter()
                .map(|stage| (stage.stage, stage.module))
                .collect();
            let input_assembly = &*info.p_input_assembly_state;
            let raster = &*info.p_rasterization_state;
            let blend = &*info.p_color_blend_state;
            let blend_enable = blend.attachment_count > 0 && (*blend.p_attachments).blend_enable != 0;
            let dynamic = &*info.p_dynamic_state;
            let vertex_input = &*info.p_vertex_input_state;
            PipelineRecord {
                stages,
                topology: input_assembly.topology,
                polygon_mode: raster.polygon_mode,
                cull_mode: raster.cull_mode,
                front_face: raster.front_face,
                has_depth_stencil: !info.p_depth_stencil_state.is_null(),
                has_vertex_input: vertex_input.vertex_binding_description_count > 0
                    || vertex_input.vertex_attribute_description_count > 0,
                blend_enable,
                dynamic_states: slice::from_raw_parts(
                    dynamic.p_dynamic_states,
                    dynamic.dynamic_state_count as usize,
                )
                .to_vec(),
                render_pass: info.render_pass,
                layout: info.layout,
            }
        };
        state.last_pipeline = Some(record);
        Ok(state.create(Kind::Pipeline))
    }

    unsafe fn create_framebuffer(
        &self,
        _info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        let mut state = self.state.lock();
        state.take_failure(Op::CreateFramebuffer)?;
        Ok(state.create(Kind::Framebuffer))
    }

    unsafe fn create_command_pool(
        &self,
        _info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        Ok(self.state.lock().create(Kind::CommandPool))
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        Ok((0..info.command_buffer_count).map(|_| state.mint()).collect())
    }

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.state.lock().create(Kind::Semaphore))
    }

    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence = state.create(Kind::Fence);
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        let mut state = self.state.lock();
        state.log.push(Call::WaitFence(fence));

        while !state.fences.get(&fence).copied().unwrap_or(false) {
            if timeout_ns == u64::MAX {
                self.signaled.wait(&mut state);
            } else if self
                .signaled
                .wait_for(&mut state, Duration::from_nanos(timeout_ns))
                .timed_out()
            {
                if state.fences.get(&fence).copied().unwrap_or(false) {
                    break;
                }
                return Err(vk::Result::TIMEOUT);
            }
        }
        Ok(())
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        state.log.push(Call::ResetFence(fence));
        if state.pending.iter().any(|(f, _)| *f == fence) {
            state
                .violations
                .push(format!("reset fence {} while its submission is pending", fence.as_raw()));
        }
        state.fences.insert(fence, false);
        Ok(())
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        state.take_failure(Op::Acquire)?;

        let (count, next) = state
            .swapchain_images
            .get(&swapchain)
            .copied()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        state.swapchain_images.insert(swapchain, (count, (next + 1) % count));
        state.log.push(Call::Acquire {
            swapchain,
            semaphore,
            image_index: next,
        });
        Ok((next, false))
    }

    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        if state.busy_command_buffers.contains(&cmd) {
            state.violations.push(format!(
                "reset command buffer {} while its fence is unsignaled",
                cmd.as_raw()
            ));
        }
        state.log.push(Call::ResetCommandBuffer(cmd));
        Ok(())
    }

    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_failure(Op::BeginCommandBuffer)?;
        state.log.push(Call::BeginCommandBuffer(cmd));
        Ok(())
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
    ) {
        self.state.lock().log.push(Call::BeginRenderPass {
            cmd,
            render_pass: info.render_pass,
            framebuffer: info.framebuffer,
            extent: info.render_area.extent,
        });
    }

    unsafe fn cmd_bind_graphics_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.state.lock().log.push(Call::BindPipeline(cmd, pipeline));
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.state.lock().log.push(Call::SetViewport {
            cmd,
            width: viewport.width,
            height: viewport.height,
        });
    }

    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.state.lock().log.push(Call::SetScissor {
            cmd,
            extent: scissor.extent,
        });
    }

    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.state.lock().log.push(Call::Draw {
            cmd,
            vertex_count,
            instance_count,
        });
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state.lock().log.push(Call::EndRenderPass(cmd));
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.state.lock().log.push(Call::EndCommandBuffer(cmd));
        Ok(())
    }

    unsafe fn submit_graphics(&self, submission: &Submission) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_failure(Op::Submit)?;
        state.log.push(Call::Submit(*submission));

        if let Some(cmd) = submission.command_buffer {
            state.busy_command_buffers.insert(cmd);
        }
        state
            .pending
            .push((submission.fence, submission.command_buffer));
        if state.auto_complete {
            state.signal(submission.fence);
            drop(state);
            self.signaled.notify_all();
        }
        Ok(())
    }

    unsafe fn present(&self, presentation: &Presentation) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.log.push(Call::Present(*presentation));
        state.take_failure(Op::Present)?;
        Ok(false)
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.swapchain_images.remove(&swapchain);
        state.destroy(Kind::Swapchain, swapchain);
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.lock().destroy(Kind::ImageView, view);
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.lock().destroy(Kind::ShaderModule, module);
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.lock().destroy(Kind::RenderPass, render_pass);
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.lock().destroy(Kind::PipelineLayout, layout);
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.lock().destroy(Kind::Pipeline, pipeline);
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state.lock().destroy(Kind::Framebuffer, framebuffer);
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state.lock().destroy(Kind::CommandPool, pool);
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().destroy(Kind::Semaphore, semaphore);
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence);
        state.destroy(Kind::Fence, fence);
    }
}
