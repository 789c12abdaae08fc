use std::ffi::{CStr, CString};
use ash::vk;
use crate::renderer::error::{InitFailure, InitStage, RenderError, Result};

/// Contains configuration options for the renderer, passed once at initialization
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub application_name: CString,
    pub enable_validation: bool,
    pub validation_layers: Vec<CString>,
    pub device_extensions: Vec<&'static CStr>,

    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],

    pub preferred_surface_format: vk::SurfaceFormatKHR,
    pub preferred_present_mode: vk::PresentModeKHR,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            application_name: c"vktri".to_owned(),
            enable_validation: cfg!(debug_assertions),
            validation_layers: vec![c"VK_LAYER_KHRONOS_validation".to_owned()],
            device_extensions: vec![
                ash::khr::swapchain::NAME,

                #[cfg(target_os = "macos")]
                ash::khr::portability_subset::NAME,
            ],
            frames_in_flight: 2,
            clear_color: [0.2, 0.2, 0.2, 1.0],
            preferred_surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(RenderError::init(
                InitStage::Instance,
                InitFailure::Config("frames_in_flight must be at least 1".to_owned()),
            ));
        }
        if !self.device_extensions.contains(&ash::khr::swapchain::NAME) {
            return Err(RenderError::init(
                InitStage::Instance,
                InitFailure::Config("device extensions must include VK_KHR_swapchain".to_owned()),
            ));
        }
        Ok(())
    }

    /// Layers actually enabled on the instance and device
    pub fn enabled_layers(&self) -> &[CString] {
        if self.enable_validation {
            &self.validation_layers
        } else {
            &[]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.preferred_present_mode, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let config = RenderConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RenderError::Initialization { reason: InitFailure::Config(_), .. })
        ));
    }

    #[test]
    fn layers_are_dropped_when_validation_is_off() {
        let config = RenderConfig {
            enable_validation: false,
            ..Default::default()
        };
        assert!(config.enabled_layers().is_empty());
    }
}
