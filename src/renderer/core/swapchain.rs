use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::surface::Surface;
use crate::renderer::error::{InitFailure, InitStage, RenderError, Result, VkResultExt};

/// Display queue: the ring of presentable images and one view per image.
///
/// Every rebuild bumps `generation`; per-image objects created against an
/// older generation must not be used again.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,
    pub swapchain_image_extent: vk::Extent2D,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub generation: u64,

    preferred_present_mode: vk::PresentModeKHR,
    queue_family_indices: Vec<u32>,
    device: Arc<ash::Device>,
}

impl Swapchain {
    pub fn new(
        surface: &Surface,
        drawable: vk::Extent2D,
        config: &RenderConfig,
        ins: &RenderInstance,
        dev: &RenderDevice,
    ) -> Result<Self> {
        let stage = InitStage::Swapchain;
        let surface_capabilities = surface.capabilities(dev.physical).init_stage(stage)?;
        let surface_formats = surface.formats(dev.physical).init_stage(stage)?;
        let surface_present_modes = surface.present_modes(dev.physical).init_stage(stage)?;

        let surface_format = choose_surface_format(&surface_formats, config.preferred_surface_format)
            .ok_or_else(|| RenderError::init(
                stage,
                InitFailure::MissingCapability("surface reports no formats".to_owned()),
            ))?;
        let present_mode = choose_present_mode(&surface_present_modes, config.preferred_present_mode);
        let image_extent = choose_extent(&surface_capabilities, drawable);
        if is_zero_extent(image_extent) {
            return Err(RenderError::init(
                stage,
                InitFailure::MissingCapability("drawable area has zero extent".to_owned()),
            ));
        }

        let queue_family_indices = dev.queue_families.unique();
        let swapchain_loader = ash::khr::swapchain::Device::new(
            &ins.instance,
            &dev.logical,
        );

        let (swapchain, swapchain_images) = create_swapchain(
            &swapchain_loader,
            surface,
            &surface_capabilities,
            surface_format,
            present_mode,
            image_extent,
            &queue_family_indices,
        ).init_stage(stage)?;

        let swapchain_image_views = create_image_views(&swapchain_images, surface_format.format, &dev.logical)
            .inspect_err(|_| unsafe { swapchain_loader.destroy_swapchain(swapchain, None) })
            .init_stage(InitStage::ImageViews)?;

        log::info!(
            "Swapchain created: {} images, {}x{}, {:?}, {:?}",
            swapchain_images.len(),
            image_extent.width,
            image_extent.height,
            surface_format.format,
            present_mode,
        );

        Ok(Self {
            swapchain,
            swapchain_loader,
            swapchain_images,
            swapchain_image_views,
            swapchain_image_extent: image_extent,
            surface_format,
            present_mode,
            generation: 0,

            preferred_present_mode: config.preferred_present_mode,
            queue_family_indices,
            device: dev.logical.clone(),
        })
    }

    /// Extent a rebuild would use right now, zero while the window is minimized
    pub fn next_extent(
        &self,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
        drawable: vk::Extent2D,
    ) -> Result<vk::Extent2D> {
        let surface_capabilities = surface.capabilities(physical_device).creating("swapchain")?;
        Ok(choose_extent(&surface_capabilities, drawable))
    }

    /// Destroys the images views and the swapchain, then builds a new generation.
    ///
    /// The caller must have waited for the device to go idle and released every
    /// framebuffer referencing the old views.
    pub fn recreate(
        &mut self,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
        drawable: vk::Extent2D,
    ) -> Result<()> {
        let surface_capabilities = surface.capabilities(physical_device).creating("swapchain")?;
        let surface_formats = surface.formats(physical_device).creating("swapchain")?;
        let surface_present_modes = surface.present_modes(physical_device).creating("swapchain")?;

        // The render pass was built for this format, so it has to survive the rebuild
        if !surface_formats.contains(&self.surface_format) {
            return Err(RenderError::ResourceCreation {
                resource: "swapchain",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            });
        }
        let present_mode = choose_present_mode(&surface_present_modes, self.preferred_present_mode);
        let image_extent = choose_extent(&surface_capabilities, drawable);
        if is_zero_extent(image_extent) {
            return Err(RenderError::ResourceCreation {
                resource: "swapchain",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            });
        }

        self.destroy();

        let (swapchain, swapchain_images) = create_swapchain(
            &self.swapchain_loader,
            surface,
            &surface_capabilities,
            self.surface_format,
            present_mode,
            image_extent,
            &self.queue_family_indices,
        ).creating("swapchain")?;
        self.swapchain = swapchain;
        self.swapchain_images = swapchain_images;
        self.swapchain_image_views = create_image_views(
            &self.swapchain_images,
            self.surface_format.format,
            &self.device,
        ).creating("swapchain image views")?;
        self.swapchain_image_extent = image_extent;
        self.present_mode = present_mode;
        self.generation += 1;

        log::debug!(
            "Swapchain rebuilt (generation {}): {}x{}, {:?}",
            self.generation,
            image_extent.width,
            image_extent.height,
            present_mode,
        );

        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.swapchain_images.len()
    }

    fn destroy(&mut self) {
        unsafe {
            for view in self.swapchain_image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.swapchain_images.clear();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Preferred format and color space if supported, else the first one reported
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == preferred.format
                && format.color_space == preferred.color_space
        })
        .or_else(|| formats.first())
        .copied()
}

/// Preferred mode if supported, else FIFO which every implementation provides
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|mode| *mode == preferred)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent when defined, otherwise the drawable size
/// clamped per axis into the supported range
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: drawable.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: drawable.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    // Recommended to request at least one more image than the minimum
    // to prevent having to wait on driver to complete internal operations
    // before another image can be acquired
    if max > 0 && min + 1 > max {
        max
    } else {
        min + 1
    }
}

pub fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

fn create_swapchain(
    swapchain_loader: &ash::khr::swapchain::Device,
    surface: &Surface,
    surface_capabilities: &vk::SurfaceCapabilitiesKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    image_extent: vk::Extent2D,
    queue_family_indices: &[u32],
) -> VkResult<(vk::SwapchainKHR, Vec<vk::Image>)> {
    let swapchain_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface.handle)
        .min_image_count(choose_image_count(surface_capabilities))
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(image_extent)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .pre_transform(surface_capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .image_array_layers(1);

    // Images are shared across queue families when drawing and presenting differ
    let swapchain_info = if queue_family_indices.len() > 1 {
        swapchain_info
            .image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(queue_family_indices)
    } else {
        swapchain_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
    };

    let swapchain = unsafe {
        swapchain_loader.create_swapchain(&swapchain_info, None)?
    };
    let swapchain_images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(e);
        }
    };

    Ok((swapchain, swapchain_images))
}

fn create_image_views(
    swapchain_images: &[vk::Image],
    swapchain_image_format: vk::Format,
    device: &ash::Device,
) -> VkResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(swapchain_images.len());
    for image in swapchain_images {
        let view_info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(swapchain_image_format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image(*image);
        match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.destroy_image_view(view, None) };
                }
                return Err(e);
            }
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFERRED: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn capabilities(current: vk::Extent2D, min: vk::Extent2D, max: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: current,
            min_image_extent: min,
            max_image_extent: max,
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn preferred_format_wins_when_present() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats, PREFERRED), Some(PREFERRED));
        assert_eq!(choose_surface_format(&formats, PREFERRED), choose_surface_format(&formats, PREFERRED));
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // Right format, wrong color space
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats, PREFERRED), Some(formats[0]));
        assert_eq!(choose_surface_format(&[], PREFERRED), None);
    }

    #[test]
    fn mailbox_is_used_when_available() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_is_the_fallback_mode() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[], vk::PresentModeKHR::MAILBOX), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn defined_current_extent_is_used_as_is() {
        let caps = capabilities(extent(1024, 768), extent(1, 1), extent(4096, 4096));
        assert_eq!(choose_extent(&caps, extent(800, 600)), extent(1024, 768));
    }

    #[test]
    fn undefined_current_extent_clamps_each_axis_independently() {
        let caps = capabilities(extent(u32::MAX, u32::MAX), extent(100, 200), extent(1000, 500));
        // Width above max and height below min
        assert_eq!(choose_extent(&caps, extent(5000, 10)), extent(1000, 200));
        // Non-square bounds catch a swapped-axis clamp
        assert_eq!(choose_extent(&caps, extent(300, 400)), extent(300, 400));
        assert_eq!(choose_extent(&caps, extent(50, 900)), extent(100, 500));
    }

    #[test]
    fn image_count_is_one_above_minimum_within_maximum() {
        let mut caps = capabilities(extent(1, 1), extent(1, 1), extent(1, 1));
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn zero_extent_detection() {
        assert!(is_zero_extent(extent(0, 600)));
        assert!(is_zero_extent(extent(800, 0)));
        assert!(!is_zero_extent(extent(800, 600)));
    }
}
