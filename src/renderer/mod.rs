pub mod config;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod resources;
pub mod shader_data;

use std::sync::Arc;
use ash::vk;
use winit::dpi::PhysicalSize;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::context::RenderContext;
use crate::renderer::core::surface::WindowSurface;
use crate::renderer::diagnostics::LogSink;
use crate::renderer::error::Result;
use crate::renderer::frame::{FrameScheduler, FrameStatus};
use crate::renderer::resources::shader::ShaderCode;

const TRIANGLE_SHADERS: ShaderCode<'static> = ShaderCode {
    vertex: include_bytes!(concat!(env!("OUT_DIR"), "/shaders/triangle.vert.spv")),
    fragment: include_bytes!(concat!(env!("OUT_DIR"), "/shaders/triangle.frag.spv")),
};

/// Draws the triangle into one window
pub struct Renderer {
    frames: FrameScheduler<RenderContext>,

    // The surface must not outlive the window
    window: Arc<Window>,
}

impl Renderer {
    pub fn new(
        window: Arc<Window>,
        config: RenderConfig,
    ) -> Result<Self> {
        let surface = WindowSurface::new(window.as_ref())?;
        let drawable = to_extent(window.inner_size());

        let context = RenderContext::new(
            config,
            surface.display_handle(),
            surface,
            drawable,
            TRIANGLE_SHADERS,
            Box::new(LogSink),
        )?;

        Ok(Self {
            frames: FrameScheduler::new(context, drawable),
            window,
        })
    }

    pub fn request_resize(&mut self, size: PhysicalSize<u32>) {
        log::debug!("Window resized to {}x{}", size.width, size.height);
        self.frames.notify_resized(to_extent(size));
    }

    pub fn draw(&mut self) -> Result<FrameStatus> {
        let status = self.frames.render_frame()?;
        if status != FrameStatus::Presented {
            log::trace!(
                "Frame {} not presented ({status:?}), swapchain {}x{}",
                self.frames.frame_counter(),
                self.frames.backend().swapchain().swapchain_image_extent.width,
                self.frames.backend().swapchain().swapchain_image_extent.height,
            );
        }
        Ok(status)
    }

    pub fn frame_counter(&self) -> u64 {
        self.frames.frame_counter()
    }

    /// Waits for the GPU, then releases every Vulkan object before the window
    pub fn destroy(mut self) -> Result<Arc<Window>> {
        let result = self.frames.wait_idle();
        let Self { frames, window } = self;
        drop(frames);
        result.map(|_| window)
    }
}

fn to_extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}
