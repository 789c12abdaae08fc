//! Error types of the render context.
//!
//! Setup failures are reported as [`RenderError::Initialization`] tagged with
//! the [`InitStage`] that failed. Presentation staleness is never an error: it
//! is absorbed by the frame loop and only shows up as a skipped frame.

use ash::vk;
use thiserror::Error;

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

/// Steps of the one-time setup chain, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Loader,
    Instance,
    DebugMessenger,
    Surface,
    PhysicalDevice,
    LogicalDevice,
    Swapchain,
    ImageViews,
    RenderPass,
    Pipeline,
    Framebuffers,
    VertexBuffer,
    CommandPool,
    CommandBuffers,
    SyncObjects,
}

impl std::fmt::Display for InitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InitStage::Loader => "vulkan loader",
            InitStage::Instance => "instance",
            InitStage::DebugMessenger => "debug messenger",
            InitStage::Surface => "surface",
            InitStage::PhysicalDevice => "physical device",
            InitStage::LogicalDevice => "logical device",
            InitStage::Swapchain => "swapchain",
            InitStage::ImageViews => "swapchain image views",
            InitStage::RenderPass => "render pass",
            InitStage::Pipeline => "graphics pipeline",
            InitStage::Framebuffers => "framebuffers",
            InitStage::VertexBuffer => "vertex buffer",
            InitStage::CommandPool => "command pool",
            InitStage::CommandBuffers => "command buffers",
            InitStage::SyncObjects => "sync objects",
        };
        f.write_str(name)
    }
}

/// Why a setup step failed.
#[derive(Error, Debug)]
pub enum InitFailure {
    #[error("no suitable capability found: {0}")]
    MissingCapability(String),

    #[error("extension not supported: {0}")]
    UnsupportedExtension(String),

    #[error("validation layer not available: {0}")]
    ValidationLayerMissing(String),

    #[error("vulkan call failed: {0}")]
    Vulkan(vk::Result),

    #[error("memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("invalid shader byte code: {0}")]
    InvalidShader(#[source] std::io::Error),

    #[error("window handle unavailable: {0}")]
    Window(#[from] raw_window_handle::HandleError),

    #[error("failed to load the vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to initialize {stage}: {reason}")]
    Initialization {
        stage: InitStage,
        #[source]
        reason: InitFailure,
    },

    #[error("the GPU device was lost")]
    DeviceLost,

    #[error("the presentation surface was lost")]
    SurfaceLost,

    #[error("failed to create {resource}: {result}")]
    ResourceCreation {
        resource: &'static str,
        result: vk::Result,
    },

    #[error("{op} failed: {result}")]
    Command {
        op: &'static str,
        result: vk::Result,
    },
}

impl RenderError {
    pub fn init(stage: InitStage, reason: impl Into<InitFailure>) -> Self {
        RenderError::Initialization {
            stage,
            reason: reason.into(),
        }
    }

    /// Device loss and surface loss end the render loop; everything else is
    /// fatal only for the operation that produced it.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, RenderError::DeviceLost)
    }

    fn from_vk(result: vk::Result, otherwise: impl FnOnce(vk::Result) -> Self) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,
            other => otherwise(other),
        }
    }
}

impl From<vk::Result> for InitFailure {
    fn from(result: vk::Result) -> Self {
        InitFailure::Vulkan(result)
    }
}

/// Attaches [`RenderError`] context to raw Vulkan results.
pub trait VkResultExt<T> {
    /// Failure during the setup chain.
    fn init_stage(self, stage: InitStage) -> Result<T>;
    /// Failure creating a resource after setup, e.g. during a swapchain rebuild.
    fn creating(self, resource: &'static str) -> Result<T>;
    /// Failure of a per-frame command.
    fn during(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn init_stage(self, stage: InitStage) -> Result<T> {
        self.map_err(|result| RenderError::from_vk(result, |r| RenderError::init(stage, r)))
    }

    fn creating(self, resource: &'static str) -> Result<T> {
        self.map_err(|result| {
            RenderError::from_vk(result, |r| RenderError::ResourceCreation { resource, result: r })
        })
    }

    fn during(self, op: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::from_vk(result, |r| RenderError::Command { op, result: r }))
    }
}
