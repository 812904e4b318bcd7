//! Device selection and the logical device.

use std::collections::HashSet;
use std::slice;

use ash::prelude::VkResult;
use ash::vk;

use crate::backend::{GpuBackend, Presentation, QueueFamilies, Submission};
use crate::capabilities::DeviceReport;
use crate::error::{GpuError, Result};
use crate::instance::Instance;
use crate::surface::{query_capabilities, PresentationSurface, SurfaceCapabilities};

/// What a physical device offers for a given surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Position in enumeration order
    pub index: usize,
    pub name: String,
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
    pub has_swapchain_extension: bool,
    pub format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    /// Why this device cannot drive the surface, or `None` if it can.
    pub const fn unsuitable_reason(&self) -> Option<&'static str> {
        if self.graphics_family.is_none() {
            Some("no graphics queue family")
        } else if self.present_family.is_none() {
            Some("no queue family can present to the surface")
        } else if !self.has_swapchain_extension {
            Some("VK_KHR_swapchain is not supported")
        } else if self.format_count == 0 {
            Some("surface reports no formats")
        } else if self.present_mode_count == 0 {
            Some("surface reports no present modes")
        } else {
            None
        }
    }

    pub const fn is_suitable(&self) -> bool {
        self.unsuitable_reason().is_none()
    }

    /// Graphics and present families, when both exist.
    pub const fn queue_families(&self) -> Option<QueueFamilies> {
        match (self.graphics_family, self.present_family) {
            (Some(graphics), Some(present)) => Some(QueueFamilies { graphics, present }),
            _ => None,
        }
    }
}

/// Pick a device: the requested index if it exists and is suitable, otherwise the first
/// suitable one.
pub fn select_device(candidates: &[DeviceCandidate], requested: Option<usize>) -> Result<usize> {
    if let Some(index) = requested {
        let candidate = candidates
            .get(index)
            .ok_or(GpuError::DeviceIndexOutOfRange {
                index,
                count: candidates.len(),
            })?;
        return match candidate.unsuitable_reason() {
            None => Ok(index),
            Some(reason) => Err(GpuError::UnsuitableDevice {
                index,
                reason: reason.to_string(),
            }),
        };
    }

    candidates
        .iter()
        .position(DeviceCandidate::is_suitable)
        .ok_or(GpuError::NoCapableDevice)
}

/// Find graphics and present families, preferring a single family that does both.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> (Option<u32>, Option<u32>) {
    let mut graphics = None;
    let mut present = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let has_graphics =
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let can_present = supports_present(i);

        if has_graphics && can_present {
            return (Some(i), Some(i));
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(i);
        }
        if can_present && present.is_none() {
            present = Some(i);
        }
    }

    (graphics, present)
}

/// The logical device plus the queues used for drawing and presenting.
///
/// Read-only once created. Destroyed after everything built from it and before the
/// surface and instance.
pub struct DeviceContext {
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    queue_families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    report: DeviceReport,
}

impl DeviceContext {
    /// Select a physical device able to present to `surface` and open it.
    ///
    /// `requested` forces an enumeration index; it fails if that device is missing or
    /// unsuitable instead of falling back.
    ///
    /// # Safety
    /// The instance and surface must be valid and must outlive the context.
    pub unsafe fn new(
        instance: &Instance,
        surface: &PresentationSurface,
        requested: Option<usize>,
    ) -> Result<Self> {
        let physical_devices = unsafe { instance.handle().enumerate_physical_devices()? };
        let candidates: Vec<DeviceCandidate> = physical_devices
            .iter()
            .enumerate()
            .map(|(index, &pd)| unsafe { inspect_candidate(instance, surface, index, pd) })
            .collect();

        for candidate in &candidates {
            tracing::debug!(
                index = candidate.index,
                name = %candidate.name,
                status = candidate.unsuitable_reason().unwrap_or("suitable"),
                "Physical device"
            );
        }

        let index = select_device(&candidates, requested)?;
        let physical_device = physical_devices[index];
        let queue_families = candidates[index]
            .queue_families()
            .ok_or(GpuError::NoCapableDevice)?;

        let properties = unsafe {
            instance
                .handle()
                .get_physical_device_properties(physical_device)
        };
        let report = DeviceReport::from_properties(&properties);
        tracing::info!("Selected GPU {index}: {}", report.summary());

        let device = unsafe { create_device(instance.handle(), physical_device, queue_families)? };
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        Ok(Self {
            physical_device,
            device,
            surface_loader: surface.loader().clone(),
            swapchain_loader,
            queue_families,
            graphics_queue,
            present_queue,
            report,
        })
    }

    /// Get the Vulkan device handle.
    pub const fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub const fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub const fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Properties of the selected device.
    pub const fn report(&self) -> &DeviceReport {
        &self.report
    }

    /// Destroy the logical device.
    ///
    /// # Safety
    /// Every object created from the device must already be destroyed.
    pub unsafe fn destroy(&mut self) {
        unsafe { self.device.destroy_device(None) };
    }
}

/// Gather what `physical_device` offers for `surface`.
unsafe fn inspect_candidate(
    instance: &Instance,
    surface: &PresentationSurface,
    index: usize,
    physical_device: vk::PhysicalDevice,
) -> DeviceCandidate {
    let instance = instance.handle();
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let (graphics_family, present_family) = find_queue_families(&families, |family| unsafe {
        surface
            .supports_present(physical_device, family)
            .unwrap_or(false)
    });

    let has_swapchain_extension =
        unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .map(|extensions| {
                extensions.iter().any(|ext| {
                    ext.extension_name_as_c_str()
                        .is_ok_and(|name| name == ash::khr::swapchain::NAME)
                })
            })
            .unwrap_or(false);

    let (format_count, present_mode_count) = if present_family.is_some() {
        unsafe { surface.capabilities(physical_device) }
            .map(|caps| (caps.formats.len(), caps.present_modes.len()))
            .unwrap_or((0, 0))
    } else {
        (0, 0)
    };

    DeviceCandidate {
        index,
        name,
        graphics_family,
        present_family,
        has_swapchain_extension,
        format_count,
        present_mode_count,
    }
}

/// Create the logical device with one queue per distinct family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilies,
) -> Result<ash::Device> {
    let unique_families: HashSet<u32> = [queue_families.graphics, queue_families.present]
        .into_iter()
        .collect();

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names = [
        ash::khr::swapchain::NAME.as_ptr(),
        // Required for MoltenVK on macOS
        #[cfg(target_os = "macos")]
        ash::khr::portability_subset::NAME.as_ptr(),
    ];

    let features = vk::PhysicalDeviceFeatures::default();
    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };
    Ok(device)
}

impl GpuBackend for DeviceContext {
    fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    fn surface_capabilities(&self, surface: vk::SurfaceKHR) -> Result<SurfaceCapabilities> {
        unsafe { query_capabilities(&self.surface_loader, self.physical_device, surface) }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader.create_swapchain(info, None) }
    }

    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    unsafe fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }
    }

    unsafe fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&info, None) }
    }

    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
    }

    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                slice::from_ref(info),
                None,
            )
        }
        .map_err(|(_pipelines, e)| e)?;
        pipelines
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
    }

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        unsafe { self.device.create_command_pool(info, None) }
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        unsafe { self.device.allocate_command_buffers(info) }
    }

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&info, None) }
    }

    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        unsafe { self.device.create_fence(&info, None) }
    }

    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    unsafe fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
    }

    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &info) }
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
    ) {
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, info, vk::SubpassContents::INLINE);
        }
    }

    unsafe fn cmd_bind_graphics_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) };
    }

    unsafe fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[scissor]) };
    }

    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) };
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    unsafe fn submit_graphics(&self, submission: &Submission) -> VkResult<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(submission.command_buffer.as_slice())
            .signal_semaphores(submission.signal_semaphore.as_slice());

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[info], submission.fence)
        }
    }

    unsafe fn present(&self, presentation: &Presentation) -> VkResult<bool> {
        let wait_semaphores = [presentation.wait_semaphore];
        let swapchains = [presentation.swapchain];
        let image_indices = [presentation.image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &info)
        }
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }
}
