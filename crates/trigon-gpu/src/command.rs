//! Command pool management.

use ash::vk;

use crate::backend::GpuBackend;
use crate::error::Result;

/// Command pool wrapper.
#[derive(Debug)]
pub struct CommandPool {
    pub pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    ///
    /// # Safety
    /// The backend must be valid.
    pub unsafe fn new<B: GpuBackend>(backend: &B, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        let pool = unsafe { backend.create_command_pool(&create_info)? };
        Ok(Self { pool })
    }

    /// Allocate primary command buffers.
    ///
    /// # Safety
    /// The backend must be valid.
    pub unsafe fn allocate<B: GpuBackend>(
        &self,
        backend: &B,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(unsafe { backend.allocate_command_buffers(&alloc_info)? })
    }

    /// Destroy the pool, freeing every buffer allocated from it.
    ///
    /// # Safety
    /// The backend must be valid and no buffer from this pool may be pending.
    pub unsafe fn destroy<B: GpuBackend>(&self, backend: &B) {
        unsafe { backend.destroy_command_pool(self.pool) };
    }
}
