//! Frames in flight.
//!
//! A [`FrameRing`] owns a fixed number of slots. Each slot has a command buffer, an
//! image-available semaphore, a render-finished semaphore and an in-flight fence. One
//! call to [`FrameRing::draw_frame`] runs one slot through
//! wait, acquire, record, submit and present, then moves to the next slot whether or
//! not the frame made it to the screen.

use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk;

use crate::backend::{GpuBackend, Presentation, Submission};
use crate::command::CommandPool;
use crate::error::{FrameError, GpuError, Result};
use crate::pipeline::{scissor, viewport};
use crate::ring::Ring;
use crate::sync::FrameSync;

/// Lifecycle of a slot, from the CPU's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No submission of this slot is pending.
    Idle,
    /// The slot's command buffer is being recorded.
    Recording,
    /// A submission signalling the slot's fence is pending.
    Submitted,
}

/// Per-frame resources.
#[derive(Debug)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub sync: FrameSync,
    state: SlotState,
}

impl FrameSlot {
    pub const fn state(&self) -> SlotState {
        self.state
    }
}

/// What a frame draws into. Borrowed from the renderer for one call.
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget<'a> {
    pub swapchain: vk::SwapchainKHR,
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    /// Indexed by swapchain image index
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// A frame that reached the presentation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub slot: usize,
    pub image_index: u32,
    /// The acquire or the present reported a suboptimal swapchain
    pub suboptimal: bool,
}

/// Ring of frame slots.
pub struct FrameRing {
    pool: CommandPool,
    slots: Ring<FrameSlot>,
    timeout_ns: u64,
    frames_presented: u64,
}

impl FrameRing {
    /// Create `frames_in_flight` slots (at least one) with buffers from a pool on
    /// `queue_family`.
    ///
    /// `fence_timeout` bounds the fence wait and the acquire; `None` waits indefinitely.
    ///
    /// # Safety
    /// The backend must be valid.
    pub unsafe fn new<B: GpuBackend>(
        backend: &B,
        queue_family: u32,
        frames_in_flight: usize,
        fence_timeout: Option<Duration>,
    ) -> Result<Self> {
        let count = frames_in_flight.max(1);
        let pool = unsafe { CommandPool::new(backend, queue_family) }?;

        let command_buffers = match unsafe { pool.allocate(backend, count as u32) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { pool.destroy(backend) };
                return Err(e);
            }
        };

        let mut slots = Vec::with_capacity(count);
        for command_buffer in command_buffers {
            match unsafe { FrameSync::new(backend) } {
                Ok(sync) => slots.push(FrameSlot {
                    command_buffer,
                    sync,
                    state: SlotState::Idle,
                }),
                Err(e) => {
                    unsafe {
                        for slot in slots.iter().rev() {
                            slot.sync.destroy(backend);
                        }
                        pool.destroy(backend);
                    }
                    return Err(e);
                }
            }
        }

        let slots = Ring::new(slots).ok_or(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN))?;
        let timeout_ns = fence_timeout.map_or(u64::MAX, |timeout| {
            u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
        });

        tracing::debug!(frames_in_flight = count, timeout_ns, "Frame ring created");

        Ok(Self {
            pool,
            slots,
            timeout_ns,
            frames_presented: 0,
        })
    }

    /// Number of slots.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.capacity()
    }

    /// Index of the slot the next frame will use.
    pub const fn current_slot(&self) -> usize {
        self.slots.index()
    }

    /// The slot at `index`.
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Frames that reached the presentation queue so far.
    pub const fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Run one frame on the current slot, then advance to the next slot.
    ///
    /// A failed frame is dropped; the persistent resources stay usable unless the error
    /// is terminal (see [`FrameError::is_terminal`]).
    ///
    /// # Safety
    /// The backend and every handle in `target` must be valid, and `target.framebuffers`
    /// must match the images of `target.swapchain`.
    pub unsafe fn draw_frame<B: GpuBackend>(
        &mut self,
        backend: &B,
        target: &FrameTarget<'_>,
    ) -> std::result::Result<FrameOutcome, FrameError> {
        let slot = self.slots.index();
        let result = unsafe { self.run_slot(backend, target) };
        self.slots.advance();

        match &result {
            Ok(outcome) => {
                self.frames_presented += 1;
                tracing::trace!(slot, image = outcome.image_index, "Frame presented");
            }
            Err(e) => tracing::trace!(slot, error = %e, "Frame dropped"),
        }
        result
    }

    unsafe fn run_slot<B: GpuBackend>(
        &mut self,
        backend: &B,
        target: &FrameTarget<'_>,
    ) -> std::result::Result<FrameOutcome, FrameError> {
        let timeout_ns = self.timeout_ns;
        let slot_index = self.slots.index();
        let slot = self.slots.current_mut();

        unsafe {
            // Wait for the last submission that used this slot
            backend.wait_for_fence(slot.sync.in_flight, timeout_ns)?;
            slot.state = SlotState::Idle;

            let (image_index, acquire_suboptimal) = backend.acquire_next_image(
                target.swapchain,
                timeout_ns,
                slot.sync.image_available,
            )?;

            // Only reset once an image is ours, so a failed acquire leaves the fence signaled
            backend.reset_fence(slot.sync.in_flight)?;

            let Some(&framebuffer) = target.framebuffers.get(image_index as usize) else {
                return Err(recover(backend, slot, FrameError::OutOfDate));
            };

            slot.state = SlotState::Recording;
            if let Err(e) = record(backend, slot.command_buffer, framebuffer, target) {
                return Err(recover(backend, slot, e.into()));
            }

            let submission = Submission {
                command_buffer: Some(slot.command_buffer),
                wait_semaphore: slot.sync.image_available,
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: Some(slot.sync.render_finished),
                fence: slot.sync.in_flight,
            };
            if let Err(e) = backend.submit_graphics(&submission) {
                return Err(recover(backend, slot, e.into()));
            }
            slot.state = SlotState::Submitted;

            let present_suboptimal = backend.present(&Presentation {
                swapchain: target.swapchain,
                image_index,
                wait_semaphore: slot.sync.render_finished,
            })?;

            Ok(FrameOutcome {
                slot: slot_index,
                image_index,
                suboptimal: acquire_suboptimal || present_suboptimal,
            })
        }
    }

    /// Destroy every slot (last first) and the command pool.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy<B: GpuBackend>(&self, backend: &B) {
        unsafe {
            for slot in self.slots.iter().rev() {
                slot.sync.destroy(backend);
            }
            self.pool.destroy(backend);
        }
    }
}

/// Record the triangle into `cmd`.
unsafe fn record<B: GpuBackend>(
    backend: &B,
    cmd: vk::CommandBuffer,
    framebuffer: vk::Framebuffer,
    target: &FrameTarget<'_>,
) -> VkResult<()> {
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: target.clear_color,
        },
    }];
    let begin_info = vk::RenderPassBeginInfo::default()
        .render_pass(target.render_pass)
        .framebuffer(framebuffer)
        .render_area(scissor(target.extent))
        .clear_values(&clear_values);

    unsafe {
        backend.reset_command_buffer(cmd)?;
        backend.begin_command_buffer(cmd)?;
        backend.cmd_begin_render_pass(cmd, &begin_info);
        backend.cmd_bind_graphics_pipeline(cmd, target.pipeline);
        backend.cmd_set_viewport(cmd, viewport(target.extent));
        backend.cmd_set_scissor(cmd, scissor(target.extent));
        // Vertex data lives in the shader
        backend.cmd_draw(cmd, 3, 1, 0, 0);
        backend.cmd_end_render_pass(cmd);
        backend.end_command_buffer(cmd)
    }
}

/// Hand the slot's fence back after a frame dropped with `cause`.
///
/// The acquire already queued a signal on the image-available semaphore and the fence is
/// reset, so an empty batch consumes the one and signals the other. If that batch is
/// rejected too, nothing will ever signal the fence and the slot is lost.
unsafe fn recover<B: GpuBackend>(
    backend: &B,
    slot: &mut FrameSlot,
    cause: FrameError,
) -> FrameError {
    let submission = Submission {
        command_buffer: None,
        wait_semaphore: slot.sync.image_available,
        wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        signal_semaphore: None,
        fence: slot.sync.in_flight,
    };
    match unsafe { backend.submit_graphics(&submission) } {
        Ok(()) => {
            slot.state = SlotState::Submitted;
            cause
        }
        Err(e) => {
            tracing::error!(error = %e, %cause, "Failed to release frame slot");
            FrameError::SlotLost
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::framebuffer::Framebuffers;
    use crate::swapchain::Swapchain;
    use crate::testing::{Call, FakeGpu, Kind, Op};

    const CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    struct Scene {
        swapchain: Swapchain,
        framebuffers: Framebuffers,
    }

    impl Scene {
        fn new(gpu: &FakeGpu) -> Self {
            let extent = vk::Extent2D {
                width: 800,
                height: 600,
            };
            unsafe {
                let swapchain =
                    Swapchain::build(gpu, vk::SurfaceKHR::null(), extent, None).unwrap();
                let framebuffers = Framebuffers::build(
                    gpu,
                    vk::RenderPass::null(),
                    &swapchain.image_views,
                    swapchain.extent,
                )
                .unwrap();
                Self {
                    swapchain,
                    framebuffers,
                }
            }
        }

        fn target(&self) -> FrameTarget<'_> {
            FrameTarget {
                swapchain: self.swapchain.swapchain,
                render_pass: vk::RenderPass::null(),
                pipeline: vk::Pipeline::null(),
                framebuffers: &self.framebuffers.framebuffers,
                extent: self.swapchain.extent,
                clear_color: CLEAR,
            }
        }
    }

    fn ring(gpu: &FakeGpu, frames: usize, timeout: Option<Duration>) -> FrameRing {
        unsafe { FrameRing::new(gpu, 0, frames, timeout) }.unwrap()
    }

    #[test]
    fn slots_follow_modulo_sequence() {
        for frames in 1..=3 {
            let gpu = FakeGpu::new().auto_complete();
            let scene = Scene::new(&gpu);
            let mut ring = ring(&gpu, frames, None);

            for i in 0..frames * 4 {
                assert_eq!(ring.current_slot(), i % frames);
                let outcome = unsafe { ring.draw_frame(&gpu, &scene.target()) }.unwrap();
                assert_eq!(outcome.slot, i % frames);
            }
            assert_eq!(ring.frames_presented(), (frames * 4) as u64);
            assert!(gpu.violations().is_empty());
        }
    }

    #[test]
    fn image_index_is_independent_of_slot() {
        let gpu = FakeGpu::new().auto_complete().with_image_count(3);
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 2, None);

        let pairs: Vec<(usize, u32)> = (0..6)
            .map(|_| {
                let outcome = unsafe { ring.draw_frame(&gpu, &scene.target()) }.unwrap();
                (outcome.slot, outcome.image_index)
            })
            .collect();
        assert_eq!(pairs, [(0, 0), (1, 1), (0, 2), (1, 0), (0, 1), (1, 2)]);
    }

    #[test]
    fn wait_blocks_until_fence_signals() {
        let gpu = FakeGpu::new();
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 2, None);

        unsafe {
            ring.draw_frame(&gpu, &scene.target()).unwrap();
            ring.draw_frame(&gpu, &scene.target()).unwrap();
        }
        let slot0_fence = ring.slot(0).unwrap().sync.in_flight;
        assert!(!gpu.is_signaled(slot0_fence));
        assert_eq!(ring.slot(0).unwrap().state(), SlotState::Submitted);

        let delay = Duration::from_millis(50);
        thread::scope(|s| {
            let started = Instant::now();
            s.spawn(|| {
                thread::sleep(delay);
                gpu.complete_all();
            });
            let outcome = unsafe { ring.draw_frame(&gpu, &scene.target()) }.unwrap();
            assert!(started.elapsed() >= delay);
            assert_eq!(outcome.slot, 0);
        });

        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn command_buffer_is_only_reset_after_its_fence() {
        let gpu = FakeGpu::new();
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 2, None);

        for _ in 0..10 {
            thread::scope(|s| {
                s.spawn(|| {
                    thread::sleep(Duration::from_millis(2));
                    gpu.complete_all();
                });
                unsafe { ring.draw_frame(&gpu, &scene.target()) }.unwrap();
            });
        }

        assert!(gpu.violations().is_empty());

        // Every reset of a slot's buffer comes after a wait on that slot's fence
        let log = gpu.log();
        for (i, call) in log.iter().enumerate() {
            if let Call::ResetCommandBuffer(cmd) = call {
                let slot = (0..2)
                    .map(|s| ring.slot(s).unwrap())
                    .find(|slot| slot.command_buffer == *cmd)
                    .unwrap();
                assert!(log[..i].contains(&Call::WaitFence(slot.sync.in_flight)));
            }
        }
    }

    #[test]
    fn wait_times_out_without_completion() {
        let gpu = FakeGpu::new();
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 1, Some(Duration::from_millis(20)));

        unsafe { ring.draw_frame(&gpu, &scene.target()) }.unwrap();
        gpu.clear_log();

        let result = unsafe { ring.draw_frame(&gpu, &scene.target()) };
        assert_eq!(result, Err(FrameError::Timeout));
        assert!(!result.unwrap_err().is_terminal());
        assert!(!gpu
            .log()
            .iter()
            .any(|call| matches!(call, Call::Acquire { .. })));

        gpu.complete_all();
        assert!(unsafe { ring.draw_frame(&gpu, &scene.target()) }.is_ok());
    }

    #[test]
    fn present_waits_on_same_slot_render_finished() {
        let gpu = FakeGpu::new().auto_complete();
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 3, None);

        for _ in 0..9 {
            unsafe { ring.draw_frame(&gpu, &scene.target()) }.unwrap();
        }

        let log = gpu.log();
        let acquires: Vec<_> = log
            .iter()
            .filter_map(|call| match call {
                Call::Acquire { semaphore, .. } => Some(*semaphore),
                _ => None,
            })
            .collect();
        let submits: Vec<Submission> = log
            .iter()
            .filter_map(|call| match call {
                Call::Submit(submission) => Some(*submission),
                _ => None,
            })
            .collect();
        let presents: Vec<Presentation> = log
            .iter()
            .filter_map(|call| match call {
                Call::Present(presentation) => Some(*presentation),
                _ => None,
            })
            .collect();

        assert_eq!(submits.len(), 9);
        assert_eq!(presents.len(), 9);
        for (frame, ((acquired, submit), present)) in
            acquires.iter().zip(&submits).zip(&presents).enumerate()
        {
            let slot = ring.slot(frame % 3).unwrap();
            assert_eq!(submit.wait_semaphore, *acquired);
            assert_eq!(submit.wait_semaphore, slot.sync.image_available);
            assert_eq!(
                submit.wait_stage,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            );
            assert_eq!(submit.signal_semaphore, Some(slot.sync.render_finished));
            assert_eq!(submit.fence, slot.sync.in_flight);
            assert_eq!(present.wait_semaphore, slot.sync.render_finished);
        }
    }

    #[test]
    fn records_one_triangle_into_acquired_framebuffer() {
        let gpu = FakeGpu::new().auto_complete().with_image_count(3);
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 2, None);

        unsafe { ring.draw_frame(&gpu, &scene.target()) }.unwrap();
        gpu.clear_log();
        let outcome = unsafe { ring.draw_frame(&gpu, &scene.target()) }.unwrap();

        let cmd = ring.slot(1).unwrap().command_buffer;
        let framebuffer = scene.framebuffers.framebuffers[outcome.image_index as usize];
        let extent = scene.swapchain.extent;
        let recorded: Vec<Call> = gpu
            .log()
            .into_iter()
            .skip_while(|call| !matches!(call, Call::ResetCommandBuffer(_)))
            .take(9)
            .collect();

        assert_eq!(
            recorded,
            [
                Call::ResetCommandBuffer(cmd),
                Call::BeginCommandBuffer(cmd),
                Call::BeginRenderPass {
                    cmd,
                    render_pass: vk::RenderPass::null(),
                    framebuffer,
                    extent,
                },
                Call::BindPipeline(cmd, vk::Pipeline::null()),
                Call::SetViewport {
                    cmd,
                    width: 800.0,
                    height: 600.0,
                },
                Call::SetScissor { cmd, extent },
                Call::Draw {
                    cmd,
                    vertex_count: 3,
                    instance_count: 1,
                },
                Call::EndRenderPass(cmd),
                Call::EndCommandBuffer(cmd),
            ]
        );
    }

    #[test]
    fn failed_acquire_keeps_fence_signaled() {
        let gpu = FakeGpu::new();
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 2, None);

        gpu.fail_next(Op::Acquire, vk::Result::ERROR_OUT_OF_DATE_KHR);
        let result = unsafe { ring.draw_frame(&gpu, &scene.target()) };
        assert_eq!(result, Err(FrameError::OutOfDate));
        assert!(result.unwrap_err().needs_rebuild());
        assert!(!gpu.log().iter().any(|call| matches!(call, Call::ResetFence(_))));
        assert_eq!(ring.current_slot(), 1);

        // Slot 0 comes round again without anyone completing work
        unsafe {
            ring.draw_frame(&gpu, &scene.target()).unwrap();
            ring.draw_frame(&gpu, &scene.target()).unwrap();
        }
    }

    #[test]
    fn failed_submit_releases_slot() {
        let gpu = FakeGpu::new();
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 1, Some(Duration::from_millis(200)));

        gpu.fail_next(Op::Submit, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let result = unsafe { ring.draw_frame(&gpu, &scene.target()) };
        assert_eq!(
            result,
            Err(FrameError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        );

        let slot = ring.slot(0).unwrap();
        let recovery = gpu.log().into_iter().rev().find_map(|call| match call {
            Call::Submit(submission) => Some(submission),
            _ => None,
        });
        assert_eq!(
            recovery,
            Some(Submission {
                command_buffer: None,
                wait_semaphore: slot.sync.image_available,
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: None,
                fence: slot.sync.in_flight,
            })
        );
        assert_eq!(slot.state(), SlotState::Submitted);
        assert!(!gpu
            .log()
            .iter()
            .any(|call| matches!(call, Call::Present(_))));

        gpu.complete_all();
        assert!(unsafe { ring.draw_frame(&gpu, &scene.target()) }.is_ok());
    }

    #[test]
    fn failed_recording_releases_slot() {
        let gpu = FakeGpu::new();
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 1, None);

        gpu.fail_next(Op::BeginCommandBuffer, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let result = unsafe { ring.draw_frame(&gpu, &scene.target()) };
        assert!(matches!(result, Err(FrameError::Vulkan(_))));
        assert_eq!(ring.slot(0).unwrap().state(), SlotState::Submitted);

        gpu.complete_all();
        assert!(unsafe { ring.draw_frame(&gpu, &scene.target()) }.is_ok());
    }

    #[test]
    fn rejected_release_loses_slot() {
        let gpu = FakeGpu::new();
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 1, Some(Duration::from_millis(50)));

        gpu.fail_next(Op::BeginCommandBuffer, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        gpu.fail_next(Op::Submit, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let result = unsafe { ring.draw_frame(&gpu, &scene.target()) };
        assert_eq!(result, Err(FrameError::SlotLost));
        assert!(result.unwrap_err().is_terminal());
        assert_eq!(ring.slot(0).unwrap().state(), SlotState::Recording);

        // Nothing is pending, yet the fence stays unsignaled
        gpu.complete_all();
        assert!(!gpu.is_signaled(ring.slot(0).unwrap().sync.in_flight));
    }

    #[test]
    fn surface_loss_on_present_is_terminal() {
        let gpu = FakeGpu::new().auto_complete();
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 2, None);

        gpu.fail_next(Op::Present, vk::Result::ERROR_SURFACE_LOST_KHR);
        let result = unsafe { ring.draw_frame(&gpu, &scene.target()) };
        assert_eq!(result, Err(FrameError::SurfaceLost));
        assert!(result.unwrap_err().is_terminal());
        assert_eq!(ring.current_slot(), 1);
        assert_eq!(ring.frames_presented(), 0);
    }

    #[test]
    fn stale_image_index_is_out_of_date() {
        let gpu = FakeGpu::new().auto_complete().with_image_count(3);
        let scene = Scene::new(&gpu);
        let mut ring = ring(&gpu, 1, None);

        let short = &scene.framebuffers.framebuffers[..1];
        let target = FrameTarget {
            framebuffers: short,
            ..scene.target()
        };
        unsafe { ring.draw_frame(&gpu, &target) }.unwrap();
        assert_eq!(
            unsafe { ring.draw_frame(&gpu, &target) },
            Err(FrameError::OutOfDate)
        );
        // The slot was handed back, so the next frame does not block
        assert!(unsafe { ring.draw_frame(&gpu, &scene.target()) }.is_ok());
    }

    #[test]
    fn destroy_reverses_creation() {
        let gpu = FakeGpu::new();
        let ring = ring(&gpu, 3, None);

        let created = gpu.created();
        assert_eq!(created[0].0, Kind::CommandPool);
        unsafe { ring.destroy(&gpu) };

        let mut destroyed = gpu.destroyed();
        destroyed.reverse();
        assert_eq!(created, destroyed);
        assert_eq!(gpu.live_count(), 0);
    }
}
