use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::error::{InitStage, RenderError, Result, VkResultExt};

/// Produces a surface bound to a native window for a freshly created instance
pub trait SurfaceFactory {
    fn create_surface(self, entry: &ash::Entry, instance: &ash::Instance) -> VkResult<vk::SurfaceKHR>;
}

impl<F> SurfaceFactory for F
where
    F: FnOnce(&ash::Entry, &ash::Instance) -> VkResult<vk::SurfaceKHR>,
{
    fn create_surface(self, entry: &ash::Entry, instance: &ash::Instance) -> VkResult<vk::SurfaceKHR> {
        self(entry, instance)
    }
}

/// Surface factory for anything exposing raw window handles, e.g. a winit window
pub struct WindowSurface {
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
}

impl WindowSurface {
    pub fn new<W>(window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display_handle = window.display_handle()
            .map_err(|e| RenderError::init(InitStage::Surface, e))?
            .as_raw();
        let window_handle = window.window_handle()
            .map_err(|e| RenderError::init(InitStage::Surface, e))?
            .as_raw();
        Ok(Self {
            display_handle,
            window_handle,
        })
    }

    pub fn display_handle(&self) -> RawDisplayHandle {
        self.display_handle
    }
}

impl SurfaceFactory for WindowSurface {
    fn create_surface(self, entry: &ash::Entry, instance: &ash::Instance) -> VkResult<vk::SurfaceKHR> {
        // The window must outlive the surface; the context is dropped before the window
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.display_handle,
                self.window_handle,
                None,
            )
        }
    }
}

/// Presentation surface, destroyed before the instance it was created from
pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
}

impl Surface {
    pub fn new(
        instance: &RenderInstance,
        factory: impl SurfaceFactory,
    ) -> Result<Self> {
        let handle = factory
            .create_surface(&instance.entry, &instance.instance)
            .init_stage(InitStage::Surface)?;
        let loader = ash::khr::surface::Instance::new(&instance.entry, &instance.instance);
        Ok(Self { handle, loader })
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader.get_physical_device_surface_capabilities(physical_device, self.handle)
        }
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader.get_physical_device_surface_formats(physical_device, self.handle)
        }
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader.get_physical_device_surface_present_modes(physical_device, self.handle)
        }
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family: u32) -> bool {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.handle,
            ).unwrap_or(false)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
