//! Window and event loop.

use ash::vk;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::config::AppConfig;
use crate::error::{chain, AppError};
use crate::renderer::Renderer;

/// Open the window and draw until it is closed.
///
/// Returns the error that stopped the loop, if any. Logging must already be set up.
pub fn run(config: AppConfig) -> Result<(), AppError> {
    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = Runner {
        config,
        state: None,
        error: None,
    };
    event_loop.run_app(&mut runner)?;

    runner.error.map_or(Ok(()), Err)
}

struct Runner {
    config: AppConfig,
    state: Option<State>,
    error: Option<AppError>,
}

/// Renderer first so it drops before the window it draws into.
struct State {
    renderer: Renderer,
    window: Window,
}

fn extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

impl ApplicationHandler for Runner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.state = None;
                event_loop.exit();
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                state.renderer.request_resize();
            }
            WindowEvent::RedrawRequested => {
                let size = extent(state.window.inner_size());
                if let Err(e) = state.renderer.draw(size) {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

impl Runner {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> Result<State, AppError> {
        let attributes = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = event_loop.create_window(attributes)?;

        // SAFETY: `State` drops the renderer before the window
        let renderer =
            unsafe { Renderer::new(&window, extent(window.inner_size()), &self.config)? };

        Ok(State { renderer, window })
    }

    /// Record `error`, tear everything down and leave the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: AppError) {
        error!("{}", chain(&error));
        self.state = None;
        self.error = Some(error);
        event_loop.exit();
    }
}
