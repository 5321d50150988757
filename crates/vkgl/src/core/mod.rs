//! Vulkan-shaped API surface
//!
//! Instances, devices and every object they create live here. The object
//! model is backend independent; anything that touches the legacy driver is
//! delegated to [`crate::backends::gl`] with the device's context lock held.

pub mod debug;
pub mod descriptor;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod handles;
pub mod info;
pub mod instance;
pub mod memory;
pub mod recording;
pub mod resource;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::Device;
pub use error::{VulkanError, VulkanResult};
pub use instance::Instance;
