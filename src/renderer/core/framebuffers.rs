use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use crate::renderer::core::render_pass::RenderPass;
use crate::renderer::core::swapchain::Swapchain;

/// One framebuffer per swapchain image view, tagged with the swapchain generation it was built for
pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    pub generation: u64,
    device: Arc<ash::Device>,
}

impl Framebuffers {
    pub fn new(
        swapchain: &Swapchain,
        render_pass: &RenderPass,
        device: Arc<ash::Device>,
    ) -> VkResult<Self> {
        let mut framebuffers = Self {
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            generation: swapchain.generation,
            device,
        };

        for view in &swapchain.swapchain_image_views {
            let attachments = [*view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle)
                .attachments(&attachments)
                .width(swapchain.swapchain_image_extent.width)
                .height(swapchain.swapchain_image_extent.height)
                .layers(1);
            // Already created framebuffers are released by `Drop` on early return
            let framebuffer = unsafe {
                framebuffers.device.create_framebuffer(&framebuffer_info, None)?
            };
            framebuffers.framebuffers.push(framebuffer);
        }

        Ok(framebuffers)
    }

    pub fn get(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub fn destroy(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        self.destroy();
    }
}
