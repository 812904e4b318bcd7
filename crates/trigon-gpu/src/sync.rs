//! Synchronization primitives.

use ash::vk;

use crate::backend::GpuBackend;
use crate::error::Result;

/// Per-slot synchronization resources.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Semaphore signaled when the acquired image is ready to be drawn into
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Fence signaled when the slot's submission retires
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create the slot's semaphores and a fence that starts signaled, so the first wait on
    /// each slot returns immediately.
    ///
    /// Anything created before a failure is destroyed again.
    ///
    /// # Safety
    /// The backend must be valid.
    pub unsafe fn new<B: GpuBackend>(backend: &B) -> Result<Self> {
        let image_available = unsafe { backend.create_semaphore()? };
        let render_finished = match unsafe { backend.create_semaphore() } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { backend.destroy_semaphore(image_available) };
                return Err(e.into());
            }
        };
        let in_flight = match unsafe { backend.create_fence(true) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    backend.destroy_semaphore(render_finished);
                    backend.destroy_semaphore(image_available);
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Destroy synchronization resources in reverse creation order.
    ///
    /// # Safety
    /// The backend must be valid and resources must not be in use.
    pub unsafe fn destroy<B: GpuBackend>(&self, backend: &B) {
        unsafe {
            backend.destroy_fence(self.in_flight);
            backend.destroy_semaphore(self.render_finished);
            backend.destroy_semaphore(self.image_available);
        }
    }
}
