use std::sync::{Arc, Mutex};
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::renderer::error::{InitFailure, InitStage, RenderError, Result, VkResultExt};

/// Host-visible buffer written once at creation
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new_vertex_buffer<T>(
        data: &[T],
        name: &str,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self>
    where
        T: Copy,
    {
        let stage = InitStage::VertexBuffer;
        let size = std::mem::size_of_val(data) as u64;

        let buffer = {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            unsafe { device.create_buffer(&buffer_info, None) }.init_stage(stage)?
        };

        let requirements = unsafe {
            device.get_buffer_memory_requirements(buffer)
        };
        let allocation = mem_allocator
            .lock()
            .map_err(|_| RenderError::init(stage, InitFailure::Config("memory allocator lock poisoned".to_owned())))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(RenderError::init(stage, e));
            }
        };

        let mut buf = Self {
            buffer,
            size,

            allocation: Some(allocation),
            memory_allocator: mem_allocator,
            device,
        };

        unsafe {
            let allocation = buf.allocation_ref()?;
            buf.device.bind_buffer_memory(
                buf.buffer,
                allocation.memory(),
                allocation.offset(),
            )
        }.init_stage(stage)?;

        buf.write(data, 0)?;

        Ok(buf)
    }

    pub fn write<T>(
        &mut self,
        data: &[T],
        start_offset: usize,
    ) -> Result<presser::CopyRecord>
    where
        T: Copy,
    {
        let allocation = self.allocation
            .as_mut()
            .ok_or_else(|| RenderError::init(InitStage::VertexBuffer, InitFailure::Config("buffer has no allocation".to_owned())))?;
        presser::copy_from_slice_to_offset(data, allocation, start_offset)
            .map_err(|e| RenderError::init(InitStage::VertexBuffer, InitFailure::Config(e.to_string())))
    }

    fn allocation_ref(&self) -> Result<&Allocation> {
        self.allocation
            .as_ref()
            .ok_or_else(|| RenderError::init(InitStage::VertexBuffer, InitFailure::Config("buffer has no allocation".to_owned())))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free buffer allocation: {}", e);
                    }
                }
                Err(_) => log::error!("Memory allocator lock poisoned, leaking buffer allocation"),
            }
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}
