use super::renderer::Renderer;
use color_eyre::{Report, Result};
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::renderer::config::RenderConfig;

const WINDOW_TITLE: &str = "Vulkan triangle";
const WINDOW_WIDTH: u32 = 800;
const WINDOW_HEIGHT: u32 = 600;

pub struct App {
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    config: RenderConfig,

    // State
    close_requested: bool,
    error: Option<Report>,
}

impl App {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            window: None,
            renderer: None,
            config,

            close_requested: false,
            error: None,
        }
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;

        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_none() {
            let attributes = Window::default_attributes()
                .with_title(WINDOW_TITLE)
                .with_inner_size(LogicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT));
            self.window = Some(Arc::new(event_loop.create_window(attributes)?));
        }

        if self.renderer.is_none() {
            if let Some(window) = self.window.clone() {
                self.renderer = Some(Renderer::new(window, self.config.clone())?);
            }
        }

        Ok(())
    }

    /// Stops the event loop, keeping the first error for `run` to report
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Report) {
        log::error!("{error}");
        self.error.get_or_insert(error);
        self.close_requested = true;
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        // The renderer goes first, its surface borrows the window
        if let Some(renderer) = self.renderer.take() {
            let frames = renderer.frame_counter();
            match renderer.destroy() {
                Ok(_) => log::info!("Rendered {frames} frames"),
                Err(e) => log::error!("Renderer did not shut down cleanly: {e}"),
            }
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        if self.window.as_ref().map(|w| w.id()) != Some(window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(new_size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize(new_size);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = self.renderer.as_mut() {
                    if let Err(e) = renderer.draw() {
                        self.fail(event_loop, e.into());
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
        } else if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
