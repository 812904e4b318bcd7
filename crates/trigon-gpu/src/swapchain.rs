//! Swapchain management.
//!
//! [`SwapchainPlan::negotiate`] turns a surface capability snapshot into concrete
//! creation parameters without touching the device; [`Swapchain::build`] creates the
//! chain and one view per image.

use ash::vk;

use crate::backend::{GpuBackend, QueueFamilies};
use crate::error::{GpuError, Result};
use crate::surface::SurfaceCapabilities;

/// Parameters negotiated from the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainPlan {
    /// Pick format, present mode, extent and image count for `caps`.
    ///
    /// `window_extent` is only used when the surface leaves the extent to the application.
    pub fn negotiate(caps: &SurfaceCapabilities, window_extent: vk::Extent2D) -> Result<Self> {
        let surface_format = select_surface_format(&caps.formats).ok_or_else(|| {
            GpuError::PresentationUnavailable("surface reports no formats".to_string())
        })?;
        if caps.present_modes.is_empty() {
            return Err(GpuError::PresentationUnavailable(
                "surface reports no present modes".to_string(),
            ));
        }

        let extent = calculate_extent(&caps.capabilities, window_extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::PresentationUnavailable(format!(
                "surface extent is {}x{}",
                extent.width, extent.height
            )));
        }

        Ok(Self {
            surface_format,
            present_mode: select_present_mode(&caps.present_modes),
            extent,
            image_count: select_image_count(&caps.capabilities),
            pre_transform: caps.capabilities.current_transform,
            composite_alpha: select_composite_alpha(
                caps.capabilities.supported_composite_alpha,
            ),
        })
    }
}

/// Swapchain wrapper.
#[derive(Debug)]
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Query the surface, negotiate and create the chain plus its views.
    ///
    /// When `old` is given its handle is passed as the retired chain; the caller still owns
    /// `old` and destroys it once the new chain exists.
    ///
    /// # Safety
    /// The backend and surface must be valid; `old` must belong to the same surface.
    pub unsafe fn build<B: GpuBackend>(
        backend: &B,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        old: Option<&Self>,
    ) -> Result<Self> {
        let caps = backend.surface_capabilities(surface)?;
        let plan = SwapchainPlan::negotiate(&caps, window_extent)?;
        let families = backend.queue_families();
        let (sharing_mode, family_indices) = select_sharing(families);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(plan.pre_transform)
            .composite_alpha(plan.composite_alpha)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));

        let swapchain = unsafe { backend.create_swapchain(&create_info) }
            .map_err(GpuError::SwapchainCreation)?;

        let images = match unsafe { backend.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { backend.destroy_swapchain(swapchain) };
                return Err(GpuError::SwapchainCreation(e));
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match unsafe { create_view(backend, image, plan.surface_format.format) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for &view in image_views.iter().rev() {
                            backend.destroy_image_view(view);
                        }
                        backend.destroy_swapchain(swapchain);
                    }
                    return Err(GpuError::SwapchainCreation(e));
                }
            }
        }

        tracing::info!(
            format = ?plan.surface_format.format,
            present_mode = ?plan.present_mode,
            width = plan.extent.width,
            height = plan.extent.height,
            images = images.len(),
            "Swapchain built"
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: plan.surface_format,
            present_mode: plan.present_mode,
            extent: plan.extent,
        })
    }

    /// Number of images the presentation engine actually handed out.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroy the views, then the swapchain.
    ///
    /// # Safety
    /// No framebuffer may still reference the views and no image may be in use.
    pub unsafe fn destroy<B: GpuBackend>(&self, backend: &B) {
        unsafe {
            for &view in self.image_views.iter().rev() {
                backend.destroy_image_view(view);
            }
            backend.destroy_swapchain(self.swapchain);
        }
    }
}

unsafe fn create_view<B: GpuBackend>(
    backend: &B,
    image: vk::Image,
    format: vk::Format,
) -> ash::prelude::VkResult<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    unsafe { backend.create_image_view(&view_info) }
}

/// Select the surface format: BGRA8 sRGB with sRGB-nonlinear color space, else the first
/// one reported. `None` when the list is empty.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the present mode: mailbox when offered, else FIFO (always supported).
pub fn select_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, capped by the maximum when the surface has one.
pub const fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// Concurrent sharing across both families when they differ, else exclusive.
pub fn select_sharing(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_split() {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

fn select_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGpu, Kind, Op};

    const BGRA_SRGB: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn caps(min: u32, max: u32) -> SurfaceCapabilities {
        SurfaceCapabilities {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: min,
                max_image_count: max,
                current_extent: extent(800, 600),
                min_image_extent: extent(1, 1),
                max_image_extent: extent(4096, 4096),
                ..Default::default()
            },
            formats: vec![format(vk::Format::R8G8B8A8_UNORM)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn preferred_format_wins_anywhere_in_list() {
        let unorm = format(vk::Format::R8G8B8A8_UNORM);
        let bgra_unorm = format(vk::Format::B8G8R8A8_UNORM);
        for list in [
            vec![BGRA_SRGB, unorm, bgra_unorm],
            vec![unorm, BGRA_SRGB, bgra_unorm],
            vec![unorm, bgra_unorm, BGRA_SRGB],
        ] {
            assert_eq!(select_surface_format(&list), Some(BGRA_SRGB));
        }
    }

    #[test]
    fn format_falls_back_to_first() {
        let wrong_space = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
        };
        let list = [format(vk::Format::R16G16B16A16_SFLOAT), wrong_space];
        assert_eq!(select_surface_format(&list), Some(list[0]));
        assert_eq!(select_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_extent_is_used_verbatim() {
        let caps = caps(2, 0).capabilities;
        assert_eq!(calculate_extent(&caps, extent(1920, 1080)), extent(800, 600));
    }

    #[test]
    fn sentinel_extent_clamps_window_size() {
        let mut caps = caps(2, 0).capabilities;
        caps.current_extent = extent(u32::MAX, u32::MAX);
        caps.min_image_extent = extent(100, 100);
        caps.max_image_extent = extent(1000, 700);

        assert_eq!(calculate_extent(&caps, extent(640, 480)), extent(640, 480));
        assert_eq!(calculate_extent(&caps, extent(5000, 20)), extent(1000, 100));
        assert_eq!(calculate_extent(&caps, extent(50, 900)), extent(100, 700));
    }

    #[test]
    fn image_count_is_within_bounds() {
        for (min, max) in [(1, 0), (2, 0), (2, 2), (2, 3), (3, 8), (1, 1)] {
            let caps = caps(min, max);
            let plan = SwapchainPlan::negotiate(&caps, extent(800, 600)).unwrap();
            if max == 0 {
                assert_eq!(plan.image_count, min + 1);
            } else {
                assert!(plan.image_count >= min && plan.image_count <= max);
                assert_eq!(plan.image_count, (min + 1).min(max));
            }
        }
    }

    #[test]
    fn negotiate_rejects_empty_lists() {
        let mut no_formats = caps(2, 0);
        no_formats.formats.clear();
        assert!(matches!(
            SwapchainPlan::negotiate(&no_formats, extent(800, 600)),
            Err(GpuError::PresentationUnavailable(_))
        ));

        let mut no_modes = caps(2, 0);
        no_modes.present_modes.clear();
        assert!(matches!(
            SwapchainPlan::negotiate(&no_modes, extent(800, 600)),
            Err(GpuError::PresentationUnavailable(_))
        ));
    }

    #[test]
    fn sharing_follows_queue_families() {
        let (mode, indices) = select_sharing(QueueFamilies {
            graphics: 0,
            present: 0,
        });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());

        let (mode, indices) = select_sharing(QueueFamilies {
            graphics: 0,
            present: 2,
        });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, [0, 2]);
    }

    #[test]
    fn single_rgba_fifo_surface_builds_two_images() {
        let gpu = FakeGpu::new().with_surface(caps(1, 0));
        let swapchain =
            unsafe { Swapchain::build(&gpu, vk::SurfaceKHR::null(), extent(1024, 768), None) }
                .unwrap();

        assert_eq!(swapchain.format.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(swapchain.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(swapchain.extent, extent(800, 600));
        assert_eq!(swapchain.image_count(), 2);
        assert_eq!(swapchain.image_views.len(), 2);

        let record = gpu.last_swapchain().unwrap();
        assert_eq!(record.min_image_count, 2);
        assert_eq!(record.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert!(record.old_swapchain == vk::SwapchainKHR::null());
    }

    #[test]
    fn split_families_build_concurrent_chain() {
        let gpu = FakeGpu::new().with_queue_families(1, 3);
        unsafe { Swapchain::build(&gpu, vk::SurfaceKHR::null(), extent(800, 600), None) }.unwrap();

        let record = gpu.last_swapchain().unwrap();
        assert_eq!(record.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(record.queue_family_indices, [1, 3]);
    }

    #[test]
    fn rebuild_passes_old_chain() {
        let gpu = FakeGpu::new();
        let first =
            unsafe { Swapchain::build(&gpu, vk::SurfaceKHR::null(), extent(800, 600), None) }
                .unwrap();
        let second = unsafe {
            Swapchain::build(&gpu, vk::SurfaceKHR::null(), extent(800, 600), Some(&first))
        }
        .unwrap();

        assert_eq!(gpu.last_swapchain().unwrap().old_swapchain, first.swapchain);
        assert_ne!(first.swapchain, second.swapchain);

        unsafe {
            first.destroy(&gpu);
            second.destroy(&gpu);
        }
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn actual_image_count_comes_from_the_chain() {
        let gpu = FakeGpu::new().with_image_count(5);
        let swapchain =
            unsafe { Swapchain::build(&gpu, vk::SurfaceKHR::null(), extent(800, 600), None) }
                .unwrap();
        assert_eq!(swapchain.image_count(), 5);
        assert_eq!(swapchain.image_views.len(), 5);
    }

    #[test]
    fn creation_failure_is_swapchain_error() {
        let gpu = FakeGpu::new();
        gpu.fail_next(Op::CreateSwapchain, vk::Result::ERROR_INITIALIZATION_FAILED);
        let result =
            unsafe { Swapchain::build(&gpu, vk::SurfaceKHR::null(), extent(800, 600), None) };
        assert!(matches!(
            result,
            Err(GpuError::SwapchainCreation(
                vk::Result::ERROR_INITIALIZATION_FAILED
            ))
        ));
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn view_failure_releases_partial_chain() {
        let gpu = FakeGpu::new().with_image_count(3);
        gpu.fail_next(Op::CreateImageView, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let result =
            unsafe { Swapchain::build(&gpu, vk::SurfaceKHR::null(), extent(800, 600), None) };
        assert!(matches!(result, Err(GpuError::SwapchainCreation(_))));
        assert_eq!(gpu.live_count(), 0);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn destroy_releases_views_before_chain() {
        let gpu = FakeGpu::new();
        let swapchain =
            unsafe { Swapchain::build(&gpu, vk::SurfaceKHR::null(), extent(800, 600), None) }
                .unwrap();
        gpu.clear_log();
        unsafe { swapchain.destroy(&gpu) };

        let kinds: Vec<Kind> = gpu.destroyed().into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds.last(), Some(&Kind::Swapchain));
        assert!(kinds[..kinds.len() - 1]
            .iter()
            .all(|kind| *kind == Kind::ImageView));
    }
}
