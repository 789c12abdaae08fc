use ash::vk;
use raw_window_handle::RawDisplayHandle;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::framebuffers::Framebuffers;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::pipeline::GraphicsPipeline;
use crate::renderer::core::render_pass::RenderPass;
use crate::renderer::core::surface::{Surface, SurfaceFactory};
use crate::renderer::core::swapchain::{is_zero_extent, Swapchain};
use crate::renderer::diagnostics::DiagnosticSink;
use crate::renderer::error::{InitStage, RenderError, Result, VkResultExt};
use crate::renderer::frame::slot::FrameSlots;
use crate::renderer::frame::{AcquireOutcome, FrameBackend, PresentOutcome, RebuildOutcome};
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::shader::ShaderCode;
use crate::renderer::shader_data::{PerVertexData, TRIANGLE_VERTICES};

/// Contains every Vulkan object needed to draw into one window.
///
/// Fields are dropped in declaration order, which is the reverse of creation order.
pub struct RenderContext {
    frames: FrameSlots,
    vertex_buffer: Buffer,
    framebuffers: Framebuffers,
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    swapchain: Swapchain,
    device: RenderDevice,
    surface: Surface,
    instance: RenderInstance,

    config: RenderConfig,
}

impl RenderContext {
    pub fn new(
        config: RenderConfig,
        display_handle: RawDisplayHandle,
        surface_factory: impl SurfaceFactory,
        drawable: vk::Extent2D,
        shaders: ShaderCode<'_>,
        sink: Box<dyn DiagnosticSink>,
    ) -> Result<Self> {
        config.validate()?;

        let instance = RenderInstance::new(&config, display_handle, sink)?;
        let surface = Surface::new(&instance, surface_factory)?;
        let device = RenderDevice::new(&instance, &surface, &config)?;
        let swapchain = Swapchain::new(&surface, drawable, &config, &instance, &device)?;

        let render_pass = RenderPass::new(swapchain.surface_format.format, device.logical.clone())?;
        let pipeline = GraphicsPipeline::new(shaders, &render_pass, device.logical.clone())?;
        let framebuffers = Framebuffers::new(&swapchain, &render_pass, device.logical.clone())
            .init_stage(InitStage::Framebuffers)?;

        let vertex_buffer = Buffer::new_vertex_buffer::<PerVertexData>(
            &TRIANGLE_VERTICES,
            "triangle vertices",
            device.memory_allocator(),
            device.logical.clone(),
        )?;

        let frames = FrameSlots::new(
            config.frames_in_flight,
            device.graphics_queue.family,
            device.logical.clone(),
        )?;

        log::info!("Render context ready with {} frames in flight", frames.len());

        Ok(Self {
            frames,
            vertex_buffer,
            framebuffers,
            pipeline,
            render_pass,
            swapchain,
            device,
            surface,
            instance,

            config,
        })
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }
}

impl FrameBackend for RenderContext {
    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fences = [self.frames.get(slot).in_flight];
        unsafe {
            self.device.logical.wait_for_fences(&fences, true, u64::MAX)
        }.during("wait for frame fence")
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let image_available = self.frames.get(slot).image_available;
        let result = unsafe {
            self.swapchain.swapchain_loader.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(_) => result
                .map(|_| AcquireOutcome::Stale)
                .during("acquire swapchain image"),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let frame = self.frames.get(slot);
        unsafe {
            self.device.logical.reset_fences(&[frame.in_flight]).during("reset frame fence")?;
            self.device.logical
                .reset_command_buffer(frame.command_buffer, vk::CommandBufferResetFlags::empty())
                .during("reset command buffer")
        }
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
        debug_assert_eq!(self.framebuffers.generation, self.swapchain.generation);

        let device = &self.device.logical;
        let cmd = self.frames.get(slot).command_buffer;
        let extent = self.swapchain.swapchain_image_extent;
        let framebuffer = self.framebuffers.get(image_index).ok_or(RenderError::Command {
            op: "record commands",
            result: vk::Result::ERROR_OUT_OF_DATE_KHR,
        })?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.clear_color,
            },
        }];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass.handle)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];

        unsafe {
            device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .during("begin command buffer")?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &viewports);
            device.cmd_set_scissor(cmd, 0, &scissors);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_draw(cmd, TRIANGLE_VERTICES.len() as u32, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd).during("end command buffer")
        }
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.frames.get(slot);
        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.logical.queue_submit(
                self.device.graphics_queue.handle,
                &[submit_info],
                frame.in_flight,
            )
        }.during("queue submit")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let wait_semaphores = [self.frames.get(slot).render_finished];
        let swapchains = [self.swapchain.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain.swapchain_loader.queue_present(
                self.device.present_queue.handle,
                &present_info,
            )
        };
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(_) => result
                .map(|_| PresentOutcome::Stale)
                .during("queue present"),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn rebuild_swapchain(&mut self, drawable: vk::Extent2D) -> Result<RebuildOutcome> {
        let physical_device = self.device.physical;
        let extent = self.swapchain.next_extent(&self.surface, physical_device, drawable)?;
        if is_zero_extent(extent) {
            return Ok(RebuildOutcome::Deferred);
        }

        // Framebuffers reference the image views about to be destroyed
        self.framebuffers.destroy();
        self.swapchain.recreate(&self.surface, physical_device, drawable)?;
        self.framebuffers = Framebuffers::new(&self.swapchain, &self.render_pass, self.device.logical.clone())
            .creating("framebuffers")?;

        Ok(RebuildOutcome::Rebuilt)
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for the device before teardown: {e}");
        }
        log::debug!("Destroying render context of instance {:?}", self.instance.instance.handle());
    }
}
