/// "Core" refers to the Vulkan objects owned by the render context, created in dependency order
/// and destroyed in the reverse order.

pub mod context;
pub mod device;
pub mod framebuffers;
pub mod instance;
pub mod pipeline;
pub mod queue;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
