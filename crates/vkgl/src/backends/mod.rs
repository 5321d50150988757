//! Execution backends
//!
//! The backend is chosen once, at instance creation, from a closed set of
//! variants. Everything after that goes through trait objects: a
//! [`Platform`] hands out [`ContextProvider`]s, a provider loads a
//! [`gl::driver::GlDriver`], and the translation engine only ever talks to
//! those.

pub mod gl;
pub mod noop;

use std::fmt;
use std::str::FromStr;

use ash::vk;
use bitflags::bitflags;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backends::gl::driver::{DriverInfo, GlDriver};

/// Closed set of execution backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Forward to the system Vulkan driver
    Native,
    /// Core-profile GL 3.3 feature level
    LegacyCore33,
    /// Core-profile GL 4.5 feature level
    #[default]
    LegacyCore45,
    /// Software backend that records driver calls without rendering
    Noop,
}

impl BackendKind {
    /// Minimum driver version the backend accepts
    pub const fn required_version(self) -> Option<(u32, u32)> {
        match self {
            Self::LegacyCore33 => Some((3, 3)),
            Self::LegacyCore45 => Some((4, 5)),
            Self::Native | Self::Noop => None,
        }
    }

    /// Whether the backend runs the translation engine
    pub const fn is_translated(self) -> bool {
        !matches!(self, Self::Native)
    }

    /// Default `#version` of generated shaders
    pub const fn glsl_version(self) -> u32 {
        match self {
            Self::LegacyCore33 => 330,
            Self::LegacyCore45 | Self::Noop | Self::Native => 450,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Native => "native",
            Self::LegacyCore33 => "gl33",
            Self::LegacyCore45 => "gl45",
            Self::Noop => "noop",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "vulkan" => Ok(Self::Native),
            "gl33" | "legacycore33" => Ok(Self::LegacyCore33),
            "gl45" | "legacycore45" | "gl" => Ok(Self::LegacyCore45),
            "noop" | "null" => Ok(Self::Noop),
            other => Err(format!(
                "unknown backend '{other}' (expected native, gl33, gl45 or noop)"
            )),
        }
    }
}

/// Errors raised by window-system glue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// No context could be created for the requested surface
    #[error("context creation failed: {0}")]
    ContextCreation(String),
    /// `make_current` / `release_current` failed
    #[error("make-current failed: {0}")]
    MakeCurrent(String),
    /// The window handle is not usable with this platform
    #[error("unsupported window handle: {0}")]
    UnsupportedWindow(String),
    /// The surface's window is gone
    #[error("surface lost")]
    SurfaceLost,
    /// Driver entry points could not be loaded
    #[error("driver load failed: {0}")]
    DriverLoad(String),
    /// Buffer swap failed
    #[error("present failed: {0}")]
    Present(String),
}

impl PlatformError {
    /// Nearest result code of the emulated API
    pub fn result(&self) -> vk::Result {
        match self {
            Self::ContextCreation(_) | Self::DriverLoad(_) => {
                vk::Result::ERROR_INITIALIZATION_FAILED
            }
            Self::MakeCurrent(_) => vk::Result::ERROR_DEVICE_LOST,
            Self::UnsupportedWindow(_) => vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR,
            Self::SurfaceLost | Self::Present(_) => vk::Result::ERROR_SURFACE_LOST_KHR,
        }
    }
}

/// Opaque window-system surface created by a [`Platform`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeSurface {
    /// Platform-defined token identifying the drawable
    pub token: u64,
}

/// Window-system glue supplying contexts and surfaces
pub trait Platform: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Wrap a native window. The raw handles are only read during the call.
    fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<NativeSurface, PlatformError>;

    /// Release a surface
    fn destroy_surface(&self, surface: NativeSurface);

    /// Current drawable size of a surface
    fn surface_extent(&self, surface: NativeSurface) -> Result<vk::Extent2D, PlatformError>;

    /// Create a context able to render to any surface of this platform
    fn create_context(&self) -> Result<Box<dyn ContextProvider>, PlatformError>;
}

/// One legacy execution context.
///
/// Only [`gl::context::ContextHandle`] calls these, with its lock held.
pub trait ContextProvider: Send {
    /// Make the context current on the calling thread
    fn make_current(&mut self) -> Result<(), PlatformError>;

    /// Detach the context from the calling thread
    fn release_current(&mut self) -> Result<(), PlatformError>;

    /// Load the driver entry points; the context is current
    fn load_driver(&mut self) -> Result<Box<dyn GlDriver>, PlatformError>;

    /// Select the drawable used by the default framebuffer, `None` for headless
    fn set_drawable(&mut self, surface: Option<NativeSurface>) -> Result<(), PlatformError>;

    /// Present the default framebuffer of the current drawable
    fn swap_buffers(&mut self) -> Result<(), PlatformError>;
}

bitflags! {
    /// Optional driver features the translation engine can use
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Indexed viewports and scissors
        const VIEWPORT_ARRAY = 1 << 0;
        /// `baseInstance` on draws
        const BASE_INSTANCE = 1 << 1;
        /// Compute shaders
        const COMPUTE = 1 << 2;
        /// Tessellation stages
        const TESSELLATION = 1 << 3;
        /// Upper-left origin and [0, 1] depth
        const CLIP_CONTROL = 1 << 4;
        /// Texture views
        const TEXTURE_VIEW = 1 << 5;
        /// Buffer clears without a staging upload
        const CLEAR_BUFFER = 1 << 6;
        /// Framebuffer invalidation
        const INVALIDATE_FRAMEBUFFER = 1 << 7;
        /// Indirect draws
        const DRAW_INDIRECT = 1 << 8;
        /// Per-sample shading
        const SAMPLE_SHADING = 1 << 9;
        /// Direct image copies
        const COPY_IMAGE = 1 << 10;
        /// `KHR_debug` output
        const DEBUG_OUTPUT = 1 << 11;
        /// Shader storage buffers and image load/store
        const STORAGE = 1 << 12;
        /// Per-draw-buffer blend state
        const INDEXED_BLEND = 1 << 13;
    }
}

impl Capabilities {
    /// Features available from a driver at a backend's feature level.
    ///
    /// A 3.3 backend only uses what 3.3 guarantees plus the extensions the
    /// driver advertises, even when the driver itself is newer.
    pub fn detect(info: &DriverInfo, kind: BackendKind) -> Self {
        let version = match kind {
            BackendKind::LegacyCore33 => info.version.min((3, 3)),
            _ => info.version,
        };
        let core = |major: u32, minor: u32| version >= (major, minor);
        let table: [(Self, (u32, u32), &str); 14] = [
            (Self::VIEWPORT_ARRAY, (4, 1), "GL_ARB_viewport_array"),
            (Self::BASE_INSTANCE, (4, 2), "GL_ARB_base_instance"),
            (Self::COMPUTE, (4, 3), "GL_ARB_compute_shader"),
            (Self::TESSELLATION, (4, 0), "GL_ARB_tessellation_shader"),
            (Self::CLIP_CONTROL, (4, 5), "GL_ARB_clip_control"),
            (Self::TEXTURE_VIEW, (4, 3), "GL_ARB_texture_view"),
            (Self::CLEAR_BUFFER, (4, 3), "GL_ARB_clear_buffer_object"),
            (Self::INVALIDATE_FRAMEBUFFER, (4, 3), "GL_ARB_invalidate_subdata"),
            (Self::DRAW_INDIRECT, (4, 0), "GL_ARB_draw_indirect"),
            (Self::SAMPLE_SHADING, (4, 0), "GL_ARB_sample_shading"),
            (Self::COPY_IMAGE, (4, 3), "GL_ARB_copy_image"),
            (Self::DEBUG_OUTPUT, (4, 3), "GL_KHR_debug"),
            (Self::STORAGE, (4, 3), "GL_ARB_shader_storage_buffer_object"),
            (Self::INDEXED_BLEND, (4, 0), "GL_ARB_draw_buffers_blend"),
        ];
        table
            .iter()
            .filter(|(_, (major, minor), ext)| core(*major, *minor) || info.has_extension(ext))
            .fold(Self::empty(), |caps, (flag, _, _)| caps | *flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(version: (u32, u32), extensions: &[&str]) -> DriverInfo {
        DriverInfo {
            vendor: "test".into(),
            renderer: "test".into(),
            version,
            extensions: extensions.iter().map(|e| (*e).to_string()).collect(),
        }
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("gl33".parse::<BackendKind>(), Ok(BackendKind::LegacyCore33));
        assert_eq!(" NOOP ".parse::<BackendKind>(), Ok(BackendKind::Noop));
        assert_eq!("native".parse::<BackendKind>(), Ok(BackendKind::Native));
        assert!("d3d12".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::LegacyCore45.to_string(), "gl45");
    }

    #[test]
    fn test_capabilities_follow_feature_level() {
        let modern = info((4, 6), &[]);
        assert_eq!(Capabilities::detect(&modern, BackendKind::LegacyCore45), Capabilities::all());

        let clamped = Capabilities::detect(&modern, BackendKind::LegacyCore33);
        assert!(!clamped.contains(Capabilities::CLIP_CONTROL));
        assert!(!clamped.contains(Capabilities::TESSELLATION));
    }

    #[test]
    fn test_capabilities_from_extensions() {
        let old = info((3, 3), &["GL_ARB_clip_control", "GL_KHR_debug"]);
        let caps = Capabilities::detect(&old, BackendKind::LegacyCore33);
        assert_eq!(caps, Capabilities::CLIP_CONTROL | Capabilities::DEBUG_OUTPUT);
    }

    #[test]
    fn test_platform_error_codes() {
        assert_eq!(PlatformError::SurfaceLost.result(), vk::Result::ERROR_SURFACE_LOST_KHR);
        assert_eq!(
            PlatformError::DriverLoad("x".into()).result(),
            vk::Result::ERROR_INITIALIZATION_FAILED
        );
    }
}
