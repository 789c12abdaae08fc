use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use crate::renderer::config::RenderConfig;
use crate::renderer::core::instance::{missing, RenderInstance};
use crate::renderer::core::queue::{Queue, QueueFamilies};
use crate::renderer::core::surface::Surface;
use crate::renderer::error::{InitFailure, InitStage, RenderError, Result, VkResultExt};

/// Physical and logical device with the queues used for drawing and presenting
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,

    pub graphics_queue: Queue,
    pub present_queue: Queue,

    // Must be released before the logical device is destroyed
    memory_allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
}

impl RenderDevice {
    pub fn new(
        instance: &RenderInstance,
        surface: &Surface,
        config: &RenderConfig,
    ) -> Result<Self> {
        let (
            physical_device,
            queue_families,
        ) = Self::select_physical_device(
            &instance.instance,
            surface,
            &config.device_extensions,
        )?;

        let logical_device = Self::create_logical_device(
            &instance.instance,
            physical_device,
            queue_families,
            config,
        )?;

        let graphics_queue = unsafe {
            let queue = logical_device.get_device_queue(queue_families.graphics, 0);
            Queue::new(queue_families.graphics, queue)
        };
        let present_queue = unsafe {
            let queue = logical_device.get_device_queue(queue_families.present, 0);
            Queue::new(queue_families.present, queue)
        };

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical_device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: false,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let memory_allocator = match memory_allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { logical_device.destroy_device(None) };
                return Err(RenderError::init(InitStage::LogicalDevice, e));
            }
        };

        Ok(Self {
            logical: Arc::new(logical_device),
            physical: physical_device,
            queue_families,

            graphics_queue,
            present_queue,

            memory_allocator: ManuallyDrop::new(Arc::new(Mutex::new(memory_allocator))),
        })
    }

    pub fn memory_allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.memory_allocator)
    }

    /// Blocks until every queue of the device is idle
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()
        }.during("device wait idle")
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: &Surface,
        req_device_exts: &[&CStr],
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let stage = InitStage::PhysicalDevice;
        let devices = unsafe {
            instance.enumerate_physical_devices()
        }.init_stage(stage)?;

        if devices.is_empty() {
            return Err(RenderError::init(
                stage,
                InitFailure::MissingCapability("no GPU with Vulkan support".to_owned()),
            ));
        }

        let (physical_device, queue_families) = devices
            .into_iter()
            // Filter out devices that do not contain the required device extensions
            .filter(|device| {
                let supported_extensions = unsafe {
                    instance.enumerate_device_extension_properties(*device)
                }.unwrap_or_default();
                let supported_extensions = supported_extensions
                    .iter()
                    .filter_map(|ext| ext.extension_name_as_c_str().ok())
                    .collect::<Vec<_>>();

                match missing(req_device_exts, &supported_extensions) {
                    Some(ext) => {
                        log::warn!("Device extension not supported: {:?}", ext);
                        false
                    }
                    None => true,
                }
            })
            // Filter out devices that cannot present to this surface
            .filter(|device| {
                let formats = surface.formats(*device).unwrap_or_default();
                let present_modes = surface.present_modes(*device).unwrap_or_default();
                !formats.is_empty() && !present_modes.is_empty()
            })
            // Filter out devices that do not contain the required queues
            .filter_map(|device| {
                let props = unsafe {
                    instance.get_physical_device_queue_family_properties(device)
                };
                QueueFamilies::find(&props, |i| surface.supports_present(device, i))
                    .map(|families| (device, families))
            })
            .min_by_key(|(device, _)| {
                let props = unsafe { instance.get_physical_device_properties(*device) };
                device_type_rank(props.device_type)
            })
            .ok_or_else(|| RenderError::init(
                stage,
                InitFailure::MissingCapability("no suitable physical device found".to_owned()),
            ))?;

        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!("Vulkan device information:");
        log::info!(" - Name: {:?}", props.device_name_as_c_str().unwrap_or(c"<unknown>"));
        log::info!(" - Device ID: {}", props.device_id);
        log::info!(" - Vendor ID: {}", props.vendor_id);
        log::info!(
            " - API version: {}.{}.{}",
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            vk::api_version_patch(props.api_version),
        );
        log::info!(" - Driver version: {}", props.driver_version);
        log::debug!("Queue families: {:?}", queue_families);

        Ok((physical_device, queue_families))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
        config: &RenderConfig,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let enabled_extension_names = config.device_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_features = vk::PhysicalDeviceFeatures::default();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .enabled_features(&enabled_features);

        let device = unsafe {
            instance.create_device(physical_device, &device_create_info, None)
        }.init_stage(InitStage::LogicalDevice)?;

        Ok(device)
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.memory_allocator);
            self.logical.destroy_device(None);
        }
    }
}

fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u8 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        vk::PhysicalDeviceType::OTHER => 4,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_gpus_rank_first() {
        let mut types = [
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::VIRTUAL_GPU,
        ];
        types.sort_by_key(|t| device_type_rank(*t));
        assert_eq!(types[0], vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(types[3], vk::PhysicalDeviceType::CPU);
    }
}
