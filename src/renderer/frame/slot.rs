use std::sync::Arc;
use ash::vk;
use crate::renderer::error::{InitStage, Result, VkResultExt};

/// Recording and synchronization objects owned by one in-flight frame
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,

    // Signals when the acquired swapchain image can be written.
    pub image_available: vk::Semaphore,

    // Signals when rendering commands have finished, gates presentation.
    pub render_finished: vk::Semaphore,

    // Signals the CPU when all of this slot's commands have finished execution.
    pub in_flight: vk::Fence,
}

/// Round-robin set of frame slots sharing one command pool
pub struct FrameSlots {
    pub command_pool: vk::CommandPool,
    pub slots: Vec<FrameSlot>,
    device: Arc<ash::Device>,
}

impl FrameSlots {
    pub fn new(
        count: usize,
        graphics_queue_family: u32,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe {
            device.create_command_pool(&pool_info, None)
        }.init_stage(InitStage::CommandPool)?;

        // From here on `Drop` cleans up whatever was created
        let mut frame_slots = Self {
            command_pool,
            slots: Vec::with_capacity(count),
            device,
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(count as u32)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffers = unsafe {
            frame_slots.device.allocate_command_buffers(&command_buffer_info)
        }.init_stage(InitStage::CommandBuffers)?;

        for command_buffer in command_buffers {
            let slot = frame_slots.create_slot(command_buffer)?;
            frame_slots.slots.push(slot);
        }

        Ok(frame_slots)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> &FrameSlot {
        &self.slots[index % self.slots.len()]
    }

    fn create_slot(&self, command_buffer: vk::CommandBuffer) -> Result<FrameSlot> {
        let device = &self.device;
        let stage = InitStage::SyncObjects;
        unsafe {
            let image_available = device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .init_stage(stage)?;
            let render_finished = device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .inspect_err(|_| device.destroy_semaphore(image_available, None))
                .init_stage(stage)?;
            // Created signaled so the first wait on a fresh slot returns immediately
            let in_flight = device
                .create_fence(
                    &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                    None,
                )
                .inspect_err(|_| {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                })
                .init_stage(stage)?;

            Ok(FrameSlot {
                command_buffer,
                image_available,
                render_finished,
                in_flight,
            })
        }
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        unsafe {
            for slot in self.slots.drain(..) {
                self.device.destroy_semaphore(slot.image_available, None);
                self.device.destroy_semaphore(slot.render_finished, None);
                self.device.destroy_fence(slot.in_flight, None);
            }
            // Frees the command buffers too
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
