//! Presentation surface for windowed rendering.
//!
//! Wraps the platform surface created through `ash-window` and answers the capability
//! queries the swap chain negotiates against.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{GpuError, Result};
use crate::instance::Instance;

/// Surface support for one physical device.
///
/// A snapshot; query again after a resize rather than caching it.
#[derive(Debug, Clone, Default)]
pub struct SurfaceCapabilities {
    /// Image count and extent bounds, current extent and transforms
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilities {
    /// Whether a swap chain can be built: at least one format and one present mode.
    pub fn is_presentable(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// The platform surface of the window.
pub struct PresentationSurface {
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl PresentationSurface {
    /// Create a surface for `window`.
    ///
    /// # Safety
    /// The instance must be valid and must outlive the surface. The window must outlive
    /// the surface.
    pub unsafe fn from_window<W>(instance: &Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        Ok(Self { surface, loader })
    }

    /// The raw surface handle.
    pub const fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// The surface extension loader.
    pub const fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }

    /// Query capabilities, formats and present modes for `physical_device`.
    ///
    /// # Safety
    /// The physical device must come from the instance this surface was created with.
    pub unsafe fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<SurfaceCapabilities> {
        unsafe { query_capabilities(&self.loader, physical_device, self.surface) }
    }

    /// Whether `queue_family` of `physical_device` can present to this surface.
    ///
    /// # Safety
    /// The physical device must come from the instance this surface was created with.
    pub unsafe fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        let supported = unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.surface,
            )?
        };
        Ok(supported)
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swap chain may still reference the surface.
    pub unsafe fn destroy(&self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Query surface support through `loader`.
///
/// # Safety
/// All handles must be valid and belong to the same instance.
pub(crate) unsafe fn query_capabilities(
    loader: &ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<SurfaceCapabilities> {
    unsafe {
        let capabilities =
            loader.get_physical_device_surface_capabilities(physical_device, surface)?;
        let formats = loader.get_physical_device_surface_formats(physical_device, surface)?;
        let present_modes =
            loader.get_physical_device_surface_present_modes(physical_device, surface)?;

        Ok(SurfaceCapabilities {
            capabilities,
            formats,
            present_modes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentable_needs_format_and_mode() {
        let mut caps = SurfaceCapabilities::default();
        assert!(!caps.is_presentable());

        caps.formats.push(vk::SurfaceFormatKHR::default());
        assert!(!caps.is_presentable());

        caps.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(caps.is_presentable());
    }
}
