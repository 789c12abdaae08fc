use std::ffi::{c_char, CStr};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use crate::renderer::config::RenderConfig;
use crate::renderer::diagnostics::{debug_utils_messenger_create_info, DiagnosticSink};
use crate::renderer::error::{InitFailure, InitStage, RenderError, Result, VkResultExt};

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,

    // Double boxed so the callback's user data pointer stays valid while `Self` moves
    _sink: Box<Box<dyn DiagnosticSink>>,
}

impl RenderInstance {
    pub fn new(
        config: &RenderConfig,
        display_handle: RawDisplayHandle,
        sink: Box<dyn DiagnosticSink>,
    ) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| RenderError::init(InitStage::Loader, e))?;
        let sink = Box::new(sink);

        let instance = Self::create_instance(&entry, config, display_handle, &sink)?;

        let debug_utils = if config.enable_validation {
            match Self::create_debug_utils_messenger(&entry, &instance, &sink) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            _sink: sink,
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        config: &RenderConfig,
        display_handle: RawDisplayHandle,
        sink: &Box<dyn DiagnosticSink>,
    ) -> Result<ash::Instance> {
        let stage = InitStage::Instance;

        if config.enable_validation {
            Self::check_validation_layers_supported(entry, &config.validation_layers)?;
        }

        let required_extensions = Self::get_required_instance_extensions(config, display_handle)?;
        Self::check_instance_extensions_supported(entry, &required_extensions)?;

        let application_info = vk::ApplicationInfo::default()
            .application_name(&config.application_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);
        let enabled_layer_names = config
            .enabled_layers()
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_extension_names = required_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);

        // Also report messages emitted by vkCreateInstance/vkDestroyInstance themselves
        let mut debug_info = debug_utils_messenger_create_info(sink);
        let instance_info = if config.enable_validation {
            instance_info.push_next(&mut debug_info)
        } else {
            instance_info
        };

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        let instance = unsafe {
            entry.create_instance(&instance_info, None)
        }.init_stage(stage)?;
        log::info!("Vulkan instance initialized");

        Ok(instance)
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
        sink: &Box<dyn DiagnosticSink>,
    ) -> Result<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)> {
        let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let debug_utils_info = debug_utils_messenger_create_info(sink);
        let debug_utils_messenger = unsafe {
            debug_utils_loader.create_debug_utils_messenger(&debug_utils_info, None)
        }.init_stage(InitStage::DebugMessenger)?;
        Ok((debug_utils_messenger, debug_utils_loader))
    }

    fn get_required_instance_extensions(
        config: &RenderConfig,
        display_handle: RawDisplayHandle,
    ) -> Result<Vec<&'static CStr>> {
        let mut exts = ash_window::enumerate_required_extensions(display_handle)
            .init_stage(InitStage::Instance)?
            .iter()
            .map(|ext| unsafe {
                CStr::from_ptr(*ext)
            })
            .collect::<Vec<_>>();

        if config.enable_validation {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        Ok(exts)
    }

    fn check_instance_extensions_supported(
        entry: &ash::Entry,
        required: &[&CStr],
    ) -> Result<()> {
        let available = unsafe {
            entry.enumerate_instance_extension_properties(None)
        }.init_stage(InitStage::Instance)?;

        log::debug!("{} vulkan instance extensions available", available.len());
        let available = available
            .iter()
            .filter_map(|props| props.extension_name_as_c_str().ok())
            .inspect(|name| log::debug!(" - {:?}", name))
            .collect::<Vec<_>>();

        match missing(required, &available) {
            Some(ext) => Err(RenderError::init(
                InitStage::Instance,
                InitFailure::UnsupportedExtension(ext.to_string_lossy().into_owned()),
            )),
            None => Ok(()),
        }
    }

    fn check_validation_layers_supported(
        entry: &ash::Entry,
        required: &[std::ffi::CString],
    ) -> Result<()> {
        let supported_layers = unsafe {
            entry.enumerate_instance_layer_properties()
        }.init_stage(InitStage::Instance)?;
        let supported_layers = supported_layers
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok())
            .collect::<Vec<_>>();

        let required = required.iter().map(|layer| layer.as_c_str()).collect::<Vec<_>>();
        match missing(&required, &supported_layers) {
            Some(layer) => Err(RenderError::init(
                InitStage::Instance,
                InitFailure::ValidationLayerMissing(layer.to_string_lossy().into_owned()),
            )),
            None => Ok(()),
        }
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((messenger, loader)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// First entry of `required` not present in `available`
pub fn missing<'a>(required: &[&'a CStr], available: &[&CStr]) -> Option<&'a CStr> {
    required
        .iter()
        .find(|req| !available.contains(req))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reports_first_absent_name() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xcb_surface"];
        assert_eq!(missing(&[c"VK_KHR_surface"], &available), None);
        assert_eq!(
            missing(&[c"VK_KHR_surface", c"VK_EXT_debug_utils", c"VK_KHR_wayland_surface"], &available),
            Some(c"VK_EXT_debug_utils"),
        );
    }

    #[test]
    fn nothing_is_missing_from_an_empty_request() {
        assert_eq!(missing(&[], &[]), None);
    }
}
