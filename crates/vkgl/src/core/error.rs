//! Error taxonomy for the emulated API
//!
//! Every failure surfaced to callers is a [`VulkanError`]. Each variant maps to
//! the nearest `vk::Result` so callers written against the real API can keep
//! matching on result codes.

use ash::vk;
use thiserror::Error;

use crate::backends::gl::driver::GlError;
use crate::backends::PlatformError;
use crate::config::ConfigError;
use crate::core::shader::ShaderError;

/// Errors produced by the emulated Vulkan API
#[derive(Error, Debug)]
pub enum VulkanError {
    /// Result code reported verbatim by a lower layer
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// The caller broke a usage rule of the API (wrong state, bad counts, ...)
    #[error("Contract violation ({code:?}): {reason}")]
    ContractViolation {
        /// Nearest result code of the emulated API
        code: vk::Result,
        /// Free-text diagnosis
        reason: String,
    },

    /// A handle did not resolve to a live object
    #[error("Resource not found: {kind} {id:#x}")]
    ResourceNotFound {
        /// Object type name
        kind: &'static str,
        /// Raw handle value
        id: u64,
    },

    /// Backend memory allocation failed
    #[error("Out of device memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// The legacy context was lost
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// A requested device feature is not available on this backend
    #[error("Feature not present: {0}")]
    FeatureNotPresent(String),

    /// A requested extension is not available on this backend
    #[error("Extension not present: {0}")]
    ExtensionNotPresent(String),

    /// The driver does not reach the feature level the backend needs
    #[error("Incompatible driver: {0}")]
    IncompatibleDriver(String),

    /// Instance, device or context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Host mapping of device memory failed
    #[error("Memory map failed: {0}")]
    MemoryMapFailed(String),

    /// Shader translation or linking failed
    #[error("Shader error: {0}")]
    Shader(#[from] ShaderError),

    /// Error raised by the legacy driver
    #[error("Backend error: {0}")]
    Backend(#[from] GlError),

    /// Error raised by the platform glue
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Configuration could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl VulkanError {
    /// Build a contract violation with the generic validation code
    pub fn contract(reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            code: vk::Result::ERROR_VALIDATION_FAILED_EXT,
            reason: reason.into(),
        }
    }

    /// Build a contract violation carrying a specific result code
    pub fn contract_with(code: vk::Result, reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            code,
            reason: reason.into(),
        }
    }

    /// Whether the error is a caller contract violation
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ContractViolation { .. } | Self::ResourceNotFound { .. }
        )
    }

    /// Nearest result code of the emulated API
    pub fn result(&self) -> vk::Result {
        match self {
            Self::Api(code) | Self::ContractViolation { code, .. } => *code,
            Self::ResourceNotFound { .. } => vk::Result::ERROR_VALIDATION_FAILED_EXT,
            Self::OutOfMemory { .. } => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            Self::DeviceLost(_) => vk::Result::ERROR_DEVICE_LOST,
            Self::FeatureNotPresent(_) => vk::Result::ERROR_FEATURE_NOT_PRESENT,
            Self::ExtensionNotPresent(_) => vk::Result::ERROR_EXTENSION_NOT_PRESENT,
            Self::IncompatibleDriver(_) => vk::Result::ERROR_INCOMPATIBLE_DRIVER,
            Self::InitializationFailed(_) | Self::Config(_) => {
                vk::Result::ERROR_INITIALIZATION_FAILED
            }
            Self::MemoryMapFailed(_) => vk::Result::ERROR_MEMORY_MAP_FAILED,
            Self::Shader(_) => vk::Result::ERROR_INVALID_SHADER_NV,
            Self::Backend(err) => err.result(),
            Self::Platform(err) => err.result(),
        }
    }
}

/// Result type for emulated API operations
pub type VulkanResult<T> = Result<T, VulkanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert_eq!(
            VulkanError::contract("bad").result(),
            vk::Result::ERROR_VALIDATION_FAILED_EXT
        );
        assert_eq!(
            VulkanError::FeatureNotPresent("tessellation".into()).result(),
            vk::Result::ERROR_FEATURE_NOT_PRESENT
        );
        assert_eq!(
            VulkanError::Backend(GlError::OutOfMemory).result(),
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        );
        assert_eq!(
            VulkanError::Backend(GlError::ContextLost).result(),
            vk::Result::ERROR_DEVICE_LOST
        );
    }

    #[test]
    fn test_contract_classification() {
        assert!(VulkanError::contract("x").is_contract_violation());
        assert!(VulkanError::ResourceNotFound { kind: "VkBuffer", id: 7 }.is_contract_violation());
        assert!(!VulkanError::DeviceLost("gone".into()).is_contract_violation());
    }
}
