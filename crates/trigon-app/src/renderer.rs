//! Bring-up, per-frame driving and teardown of the GPU side.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, warn};
use trigon_gpu::{
    DeviceContext, FrameError, FrameOutcome, FrameRing, Framebuffers, GpuBackend, Instance,
    PresentationSurface, RenderTargets, Swapchain, TrianglePipeline,
};

use crate::config::AppConfig;
use crate::error::{AppError, InitStage};

/// What the loop does after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Presented; carry on.
    Continue,
    /// Rebuild the swapchain before the next frame.
    Rebuild,
    /// Dropped; the resources are fine, carry on.
    Skip(FrameError),
    /// Tear everything down.
    Stop(FrameError),
}

impl FrameAction {
    /// Decide from a frame result. Without swapchain recreation an out-of-date chain is as
    /// fatal as a lost surface.
    pub fn classify(result: &Result<FrameOutcome, FrameError>, recreate: bool) -> Self {
        match result {
            Ok(outcome) if outcome.suboptimal && recreate => Self::Rebuild,
            Ok(_) => Self::Continue,
            Err(e) if e.is_terminal() => Self::Stop(*e),
            Err(e) if e.needs_rebuild() => {
                if recreate {
                    Self::Rebuild
                } else {
                    Self::Stop(*e)
                }
            }
            Err(e) => Self::Skip(*e),
        }
    }
}

/// SPIR-V the pipeline is built from, kept for rebuilds after a format change.
struct Shaders {
    vertex: Vec<u32>,
    fragment: Vec<u32>,
}

/// A logical device handed over by the device stage.
trait OpenedDevice {
    type Backend: GpuBackend;

    fn backend(&self) -> &Self::Backend;

    /// Destroy the device. Everything created from it must already be gone.
    unsafe fn release(&mut self);
}

impl OpenedDevice for DeviceContext {
    type Backend = Self;

    fn backend(&self) -> &Self {
        self
    }

    unsafe fn release(&mut self) {
        unsafe { self.destroy() };
    }
}

/// Everything the stages after the surface produce.
struct DeviceStages<D> {
    device: D,
    shaders: Shaders,
    targets: RenderTargets,
    frames: FrameRing,
}

/// Run the stages from device selection to the frame ring, in order.
///
/// `open` is the device stage. When a later stage fails, what the earlier ones made is
/// released before returning, the device included.
unsafe fn init_device_stages<D, F>(
    open: F,
    surface: vk::SurfaceKHR,
    window_extent: vk::Extent2D,
    config: &AppConfig,
) -> Result<DeviceStages<D>, AppError>
where
    D: OpenedDevice,
    F: FnOnce() -> trigon_gpu::Result<D>,
{
    debug!("Selecting device");
    let mut device = open().map_err(AppError::init(InitStage::Device))?;

    match unsafe { build_on_device(device.backend(), surface, window_extent, config) } {
        Ok((shaders, targets, frames)) => Ok(DeviceStages {
            device,
            shaders,
            targets,
            frames,
        }),
        Err(e) => {
            unsafe { device.release() };
            Err(e)
        }
    }
}

/// Shaders, render targets and frame ring for an open device.
unsafe fn build_on_device<B: GpuBackend>(
    backend: &B,
    surface: vk::SurfaceKHR,
    window_extent: vk::Extent2D,
    config: &AppConfig,
) -> Result<(Shaders, RenderTargets, FrameRing), AppError> {
    debug!("Loading shaders");
    let shaders = load_shaders(config)?;

    let mut targets = unsafe { build_targets(backend, surface, window_extent, &shaders)? };

    debug!("Creating frame ring");
    let frames = match unsafe {
        FrameRing::new(
            backend,
            backend.queue_families().graphics,
            config.frames_in_flight,
            config.fence_timeout,
        )
    } {
        Ok(frames) => frames,
        Err(e) => {
            unsafe { targets.destroy(backend) };
            return Err(AppError::init(InitStage::FrameRing)(e));
        }
    };

    Ok((shaders, targets, frames))
}

/// Select and open the device, dumping what it supports when asked to.
unsafe fn open_device(
    instance: &Instance,
    surface: &PresentationSurface,
    config: &AppConfig,
) -> trigon_gpu::Result<DeviceContext> {
    let device = unsafe { DeviceContext::new(instance, surface, config.device_index)? };
    if config.verbose {
        dump(&device, surface.handle());
    }
    Ok(device)
}

/// Log the selected device and what its surface supports.
fn dump(device: &DeviceContext, surface: vk::SurfaceKHR) {
    info!("{}", device.report());
    match device.surface_capabilities(surface) {
        Ok(caps) => {
            info!("Surface support:");
            info!(
                "  - Image count: {}..{}",
                caps.capabilities.min_image_count,
                caps.capabilities.max_image_count
            );
            info!(
                "  - Current extent: {}x{}",
                caps.capabilities.current_extent.width,
                caps.capabilities.current_extent.height
            );
            for format in &caps.formats {
                info!("  - Format: {:?} {:?}", format.format, format.color_space);
            }
            for mode in &caps.present_modes {
                info!("  - Present mode: {mode:?}");
            }
        }
        Err(e) => warn!("Failed to query surface support: {e}"),
    }
}

/// Build the swapchain, pipeline and framebuffers, tagging failures with their stage.
unsafe fn build_targets<B: GpuBackend>(
    backend: &B,
    surface: vk::SurfaceKHR,
    window_extent: vk::Extent2D,
    shaders: &Shaders,
) -> Result<RenderTargets, AppError> {
    debug!("Creating swapchain");
    let swapchain = unsafe { Swapchain::build(backend, surface, window_extent, None) }
        .map_err(AppError::init(InitStage::Swapchain))?;

    debug!("Creating pipeline");
    let pipeline = match unsafe {
        TrianglePipeline::build(
            backend,
            &shaders.vertex,
            &shaders.fragment,
            swapchain.format.format,
            swapchain.extent,
        )
    } {
        Ok(pipeline) => pipeline,
        Err(e) => {
            unsafe { swapchain.destroy(backend) };
            return Err(AppError::init(InitStage::Pipeline)(e));
        }
    };

    debug!("Creating framebuffers");
    let framebuffers = match unsafe {
        Framebuffers::build(
            backend,
            pipeline.render_pass,
            &swapchain.image_views,
            swapchain.extent,
        )
    } {
        Ok(framebuffers) => framebuffers,
        Err(e) => {
            unsafe {
                pipeline.destroy(backend);
                swapchain.destroy(backend);
            }
            return Err(AppError::init(InitStage::Framebuffers)(e));
        }
    };

    Ok(RenderTargets::new(swapchain, pipeline, framebuffers))
}

/// Owns every GPU object; dropping it tears them down in reverse creation order.
pub struct Renderer {
    frames: FrameRing,
    targets: RenderTargets,
    device: DeviceContext,
    surface: PresentationSurface,
    instance: Instance,
    shaders: Shaders,
    clear_color: [f32; 4],
    recreate_swapchain: bool,
    resize_requested: bool,
}

impl Renderer {
    /// Run every init stage in order. A failing stage releases what the earlier ones made.
    ///
    /// # Safety
    /// `window` must outlive the renderer.
    pub unsafe fn new<W>(
        window: &W,
        window_extent: vk::Extent2D,
        config: &AppConfig,
    ) -> Result<Self, AppError>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window.display_handle()?.as_raw();

        debug!("Creating instance");
        let mut instance = Instance::new(&config.title, config.validation, display)
            .map_err(AppError::init(InitStage::Instance))?;

        debug!("Creating surface");
        // SAFETY: the window outlives the renderer
        let surface = match unsafe { PresentationSurface::from_window(&instance, window) } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy() };
                return Err(AppError::init(InitStage::Surface)(e));
            }
        };

        // SAFETY: instance and surface outlive every stage built on them
        let stages = unsafe {
            init_device_stages(
                || open_device(&instance, &surface, config),
                surface.handle(),
                window_extent,
                config,
            )
        };
        let DeviceStages {
            device,
            shaders,
            targets,
            frames,
        } = match stages {
            Ok(stages) => stages,
            Err(e) => {
                unsafe {
                    surface.destroy();
                    instance.destroy();
                }
                return Err(e);
            }
        };

        info!(
            frames_in_flight = frames.frames_in_flight(),
            images = targets.swapchain.image_count(),
            "Renderer ready"
        );

        Ok(Self {
            frames,
            targets,
            device,
            surface,
            instance,
            shaders,
            clear_color: config.clear_color,
            recreate_swapchain: config.recreate_swapchain,
            resize_requested: false,
        })
    }

    /// Note that the window changed size; the swapchain is rebuilt before the next frame.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Frames presented so far.
    pub const fn frames_presented(&self) -> u64 {
        self.frames.frames_presented()
    }

    /// Draw one frame at `window_extent`.
    ///
    /// Dropped frames are logged and swallowed. Errors are terminal.
    pub fn draw(&mut self, window_extent: vk::Extent2D) -> Result<(), AppError> {
        // Minimised
        if window_extent.width == 0 || window_extent.height == 0 {
            return Ok(());
        }

        if self.resize_requested && self.recreate_swapchain {
            self.rebuild(window_extent)?;
        }

        let target = self.targets.frame_target(self.clear_color);
        // SAFETY: targets and ring were built from this device and are rebuilt together
        let result = unsafe { self.frames.draw_frame(&self.device, &target) };

        match FrameAction::classify(&result, self.recreate_swapchain) {
            FrameAction::Continue => {}
            FrameAction::Rebuild => self.rebuild(window_extent)?,
            FrameAction::Skip(e) => warn!("Frame dropped: {e}"),
            FrameAction::Stop(e) => {
                error!("Frame loop stopped: {e}");
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn rebuild(&mut self, window_extent: vk::Extent2D) -> Result<(), AppError> {
        // SAFETY: rebuild waits for the device to go idle before touching anything
        unsafe {
            self.targets.rebuild(
                &self.device,
                self.surface.handle(),
                window_extent,
                &self.shaders.vertex,
                &self.shaders.fragment,
            )
        }
        .map_err(AppError::Rebuild)?;
        self.resize_requested = false;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        info!("Shutting down after {} frames", self.frames.frames_presented());
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // SAFETY: the device is idle and each object is destroyed once
        unsafe {
            self.frames.destroy(&self.device);
            self.targets.destroy(&self.device);
            self.device.destroy();
            self.surface.destroy();
            self.instance.destroy();
        }
        info!("Shutdown complete");
    }
}

fn load_shaders(config: &AppConfig) -> Result<Shaders, AppError> {
    let vertex = config
        .vertex_shader
        .load()
        .map_err(AppError::init(InitStage::Shaders))?;
    let fragment = config
        .fragment_shader
        .load()
        .map_err(AppError::init(InitStage::Shaders))?;
    Ok(Shaders { vertex, fragment })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::PathBuf;

    use trigon_gpu::testing::{Call, FakeGpu, Kind, Op};
    use trigon_gpu::{select_device, DeviceCandidate, GpuError};

    use super::*;
    use crate::config::ShaderSource;

    const WINDOW: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    /// Lends the fake to the init stages and notes whether it was released.
    struct FakeDevice<'a> {
        gpu: &'a FakeGpu,
        released: &'a Cell<bool>,
    }

    impl OpenedDevice for FakeDevice<'_> {
        type Backend = FakeGpu;

        fn backend(&self) -> &FakeGpu {
            self.gpu
        }

        unsafe fn release(&mut self) {
            self.released.set(true);
        }
    }

    fn init<'a>(
        gpu: &'a FakeGpu,
        released: &'a Cell<bool>,
        candidates: &[DeviceCandidate],
        config: &AppConfig,
    ) -> Result<DeviceStages<FakeDevice<'a>>, AppError> {
        unsafe {
            init_device_stages(
                || select_device(candidates, None).map(|_| FakeDevice { gpu, released }),
                vk::SurfaceKHR::null(),
                WINDOW,
                config,
            )
        }
    }

    fn candidate(present: bool) -> DeviceCandidate {
        DeviceCandidate {
            index: 0,
            name: "Test GPU".to_string(),
            graphics_family: Some(0),
            present_family: present.then_some(0),
            has_swapchain_extension: true,
            format_count: 1,
            present_mode_count: 1,
        }
    }

    fn first_created(gpu: &FakeGpu, kind: Kind) -> usize {
        gpu.created()
            .iter()
            .position(|(k, _)| *k == kind)
            .unwrap()
    }

    #[test]
    fn no_presentable_device_fails_at_device_stage() {
        let gpu = FakeGpu::new();
        let released = Cell::new(false);

        let Err(AppError::Init { stage, source }) =
            init(&gpu, &released, &[candidate(false)], &AppConfig::default())
        else {
            panic!("expected an init error");
        };

        assert_eq!(stage, InitStage::Device);
        assert!(matches!(source, GpuError::NoCapableDevice));
        assert!(gpu.created().is_empty());
        assert!(!gpu
            .log()
            .iter()
            .any(|call| matches!(call, Call::Create(Kind::Swapchain, _))));
        assert!(!released.get());
    }

    #[test]
    fn stages_run_in_order() {
        let gpu = FakeGpu::new().auto_complete();
        let released = Cell::new(false);

        let Ok(mut stages) = init(&gpu, &released, &[candidate(true)], &AppConfig::default())
        else {
            panic!("expected init to succeed");
        };

        let swapchain = first_created(&gpu, Kind::Swapchain);
        let render_pass = first_created(&gpu, Kind::RenderPass);
        let framebuffer = first_created(&gpu, Kind::Framebuffer);
        let command_pool = first_created(&gpu, Kind::CommandPool);
        assert!(swapchain < render_pass);
        assert!(render_pass < framebuffer);
        assert!(framebuffer < command_pool);
        assert_eq!(stages.frames.frames_in_flight(), 2);

        unsafe {
            stages.frames.destroy(&gpu);
            stages.targets.destroy(&gpu);
            stages.device.release();
        }
        assert!(released.get());
        assert_eq!(gpu.live_count(), 0);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn framebuffer_failure_releases_earlier_stages() {
        let gpu = FakeGpu::new();
        gpu.fail_next(Op::CreateFramebuffer, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let released = Cell::new(false);

        let Err(AppError::Init { stage, .. }) =
            init(&gpu, &released, &[candidate(true)], &AppConfig::default())
        else {
            panic!("expected an init error");
        };

        assert_eq!(stage, InitStage::Framebuffers);
        assert!(released.get());
        assert_eq!(gpu.live_count(), 0);
        assert!(gpu.violations().is_empty());
        assert!(!gpu
            .created()
            .iter()
            .any(|(kind, _)| *kind == Kind::CommandPool));
    }

    #[test]
    fn missing_shader_releases_device() {
        let gpu = FakeGpu::new();
        let released = Cell::new(false);
        let config = AppConfig::default()
            .with_fragment_shader(ShaderSource::File(PathBuf::from("missing/tri.frag.spv")));

        let Err(AppError::Init { stage, .. }) =
            init(&gpu, &released, &[candidate(true)], &config)
        else {
            panic!("expected an init error");
        };

        assert_eq!(stage, InitStage::Shaders);
        assert!(released.get());
        assert!(gpu.created().is_empty());
    }

    fn presented(suboptimal: bool) -> Result<FrameOutcome, FrameError> {
        Ok(FrameOutcome {
            slot: 0,
            image_index: 1,
            suboptimal,
        })
    }

    #[test]
    fn presented_frame_continues() {
        assert_eq!(
            FrameAction::classify(&presented(false), true),
            FrameAction::Continue
        );
    }

    #[test]
    fn suboptimal_rebuilds_only_with_recreation() {
        assert_eq!(
            FrameAction::classify(&presented(true), true),
            FrameAction::Rebuild
        );
        assert_eq!(
            FrameAction::classify(&presented(true), false),
            FrameAction::Continue
        );
    }

    #[test]
    fn out_of_date_is_terminal_without_recreation() {
        let result = Err(FrameError::OutOfDate);
        assert_eq!(FrameAction::classify(&result, true), FrameAction::Rebuild);
        assert_eq!(
            FrameAction::classify(&result, false),
            FrameAction::Stop(FrameError::OutOfDate)
        );
    }

    #[test]
    fn lost_surface_and_device_stop() {
        for error in [
            FrameError::SurfaceLost,
            FrameError::DeviceLost,
            FrameError::SlotLost,
        ] {
            assert_eq!(
                FrameAction::classify(&Err(error), true),
                FrameAction::Stop(error)
            );
        }
    }

    #[test]
    fn ordinary_failures_are_skipped() {
        for error in [
            FrameError::Timeout,
            FrameError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
        ] {
            assert_eq!(
                FrameAction::classify(&Err(error), true),
                FrameAction::Skip(error)
            );
        }
    }

    #[test]
    fn missing_shader_fails_shader_stage() {
        let config = AppConfig::default()
            .with_vertex_shader(ShaderSource::File(PathBuf::from("missing/tri.vert.spv")));
        let Err(AppError::Init { stage, source }) = load_shaders(&config) else {
            panic!("expected an init error");
        };
        assert_eq!(stage, InitStage::Shaders);
        assert!(matches!(source, GpuError::ShaderNotFound(_)));
    }

    #[test]
    fn embedded_shaders_load() {
        let shaders = load_shaders(&AppConfig::default()).unwrap();
        assert!(!shaders.vertex.is_empty());
        assert!(!shaders.fragment.is_empty());
    }
}
