//! # vkgl
//!
//! A Vulkan-compatible API implemented on top of core-profile OpenGL
//! contexts.
//!
//! ## Architecture
//!
//! - **core**: instance, device and object lifetimes with Vulkan semantics
//! - **backends::gl**: the translation engine (command replay, state stack,
//!   vertex array cache, render pass emulation)
//! - **backends::noop**: a software backend that logs driver calls, used by
//!   the tests and for headless runs
//!
//! Command buffers record typed commands. Nothing reaches the driver until
//! `queue_submit`, which takes the device's context lock and replays.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vkgl::prelude::*;
//!
//! fn main() -> Result<(), VulkanError> {
//!     let instance = Instance::new(&InstanceCreateInfo {
//!         application_name: "demo",
//!         config: Some(EmulatorConfig::noop()),
//!         ..InstanceCreateInfo::default()
//!     })?;
//!     let physical = instance.enumerate_physical_devices()[0];
//!     let device = instance.create_device(
//!         physical,
//!         &DeviceCreateInfo {
//!             queue_create_infos: &[DeviceQueueCreateInfo {
//!                 queue_family_index: 0,
//!                 queue_priorities: &[1.0],
//!             }],
//!             ..DeviceCreateInfo::default()
//!         },
//!     )?;
//!     device.device_wait_idle()
//! }
//! ```

pub mod backends;
pub mod config;
pub mod core;
pub mod logging;

pub use ash::vk;

/// Common imports for emulator users
pub mod prelude {
    pub use crate::{
        backends::{BackendKind, Platform},
        config::{Config, EmulatorConfig},
        core::{
            info::{
                DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo, SubmitInfo,
            },
            Device, Instance, VulkanError, VulkanResult,
        },
        vk,
    };
}
