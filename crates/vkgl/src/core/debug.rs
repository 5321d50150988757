//! Debug reporting
//!
//! Both registration styles are supported side by side: `VK_EXT_debug_report`
//! callbacks filtered by report flags, and `VK_EXT_debug_utils` messengers
//! filtered by severity and type. Every event is delivered to all matching
//! registrations in registration order, whatever their style.

use std::sync::Arc;

use ash::vk;
use parking_lot::RwLock;

use crate::backends::gl::driver::{DriverMessage, MessageSeverity};
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::handles::{Arena, DebugMessengerKey, DebugReportKey};
use crate::core::info::{DebugReportCallbackCreateInfo, DebugUtilsMessengerCreateInfo};

/// Layer prefix attached to every report
pub const LAYER_PREFIX: &str = "vkgl";

/// `VK_EXT_debug_report` callback; the return value is ignored
pub type DebugReportCallback = Arc<dyn Fn(&DebugReport<'_>) -> bool + Send + Sync>;

/// `VK_EXT_debug_utils` callback; the return value is ignored
pub type DebugUtilsCallback = Arc<dyn Fn(&DebugUtilsMessage<'_>) -> bool + Send + Sync>;

/// Arguments of a report-style callback invocation
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct DebugReport<'a> {
    pub flags: vk::DebugReportFlagsEXT,
    pub object_type: vk::DebugReportObjectTypeEXT,
    pub object: u64,
    pub message_code: i32,
    pub layer_prefix: &'a str,
    pub message: &'a str,
}

/// Arguments of a messenger-style callback invocation
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct DebugUtilsMessage<'a> {
    pub severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    pub types: vk::DebugUtilsMessageTypeFlagsEXT,
    pub message_id_name: &'a str,
    pub object_type: vk::ObjectType,
    pub object: u64,
    pub message: &'a str,
}

/// Event severity, independent of registration style
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Diagnostic chatter
    Verbose,
    /// Informational
    Info,
    /// Suspicious usage
    Warning,
    /// Caller error or backend failure
    Error,
}

/// Event category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Not tied to API usage
    General,
    /// Contract violation
    Validation,
    /// Performance issue
    Performance,
}

/// One event to deliver
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct DebugEvent {
    pub severity: Severity,
    pub category: Category,
    pub object_type: vk::ObjectType,
    pub object: u64,
    pub message: String,
}

impl DebugEvent {
    /// Event for a rejected call
    pub fn contract_violation(error: &VulkanError) -> Self {
        let (object_type, object) = match error {
            VulkanError::ResourceNotFound { id, .. } => (vk::ObjectType::UNKNOWN, *id),
            _ => (vk::ObjectType::UNKNOWN, 0),
        };
        Self {
            severity: Severity::Error,
            category: Category::Validation,
            object_type,
            object,
            message: error.to_string(),
        }
    }

    /// Event for a message drained from the legacy driver
    pub fn from_driver(message: &DriverMessage) -> Self {
        let severity = match message.severity {
            MessageSeverity::High => Severity::Error,
            MessageSeverity::Medium => Severity::Warning,
            MessageSeverity::Low => Severity::Info,
            MessageSeverity::Notification => Severity::Verbose,
        };
        Self {
            severity,
            category: if message.performance {
                Category::Performance
            } else {
                Category::General
            },
            object_type: vk::ObjectType::UNKNOWN,
            object: 0,
            message: message.text.clone(),
        }
    }

    fn report_flags(&self) -> vk::DebugReportFlagsEXT {
        match (self.severity, self.category) {
            (Severity::Error, _) => vk::DebugReportFlagsEXT::ERROR,
            (_, Category::Performance) => vk::DebugReportFlagsEXT::PERFORMANCE_WARNING,
            (Severity::Warning, _) => vk::DebugReportFlagsEXT::WARNING,
            (Severity::Info, _) => vk::DebugReportFlagsEXT::INFORMATION,
            (Severity::Verbose, _) => vk::DebugReportFlagsEXT::DEBUG,
        }
    }

    fn utils_severity(&self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        match self.severity {
            Severity::Error => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            Severity::Warning => vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            Severity::Info => vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            Severity::Verbose => vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        }
    }

    fn utils_type(&self) -> vk::DebugUtilsMessageTypeFlagsEXT {
        match self.category {
            Category::General => vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
            Category::Validation => vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            Category::Performance => vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        }
    }
}

#[derive(Clone)]
enum Listener {
    Report {
        handle: vk::DebugReportCallbackEXT,
        flags: vk::DebugReportFlagsEXT,
        callback: DebugReportCallback,
    },
    Messenger {
        handle: vk::DebugUtilsMessengerEXT,
        severity: vk::DebugUtilsMessageSeverityFlagsEXT,
        types: vk::DebugUtilsMessageTypeFlagsEXT,
        callback: DebugUtilsCallback,
    },
}

/// Registered debug callbacks of one instance
#[derive(Default)]
pub struct DebugChannel {
    reports: Arena<DebugReportKey, ()>,
    messengers: Arena<DebugMessengerKey, ()>,
    listeners: RwLock<Vec<Listener>>,
}

impl DebugChannel {
    /// Create a channel with no registrations
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a report-style callback
    pub fn register_report(
        &self,
        info: &DebugReportCallbackCreateInfo,
    ) -> vk::DebugReportCallbackEXT {
        let handle = self.reports.insert(());
        self.listeners.write().push(Listener::Report {
            handle,
            flags: info.flags,
            callback: Arc::clone(&info.callback),
        });
        handle
    }

    /// Register a messenger-style callback
    pub fn register_messenger(
        &self,
        info: &DebugUtilsMessengerCreateInfo,
    ) -> vk::DebugUtilsMessengerEXT {
        let handle = self.messengers.insert(());
        self.listeners.write().push(Listener::Messenger {
            handle,
            severity: info.message_severity,
            types: info.message_type,
            callback: Arc::clone(&info.callback),
        });
        handle
    }

    /// Remove a report-style callback
    pub fn unregister_report(&self, handle: vk::DebugReportCallbackEXT) -> VulkanResult<()> {
        self.reports.remove(handle)?;
        self.listeners
            .write()
            .retain(|listener| !matches!(listener, Listener::Report { handle: h, .. } if *h == handle));
        Ok(())
    }

    /// Remove a messenger-style callback
    pub fn unregister_messenger(&self, handle: vk::DebugUtilsMessengerEXT) -> VulkanResult<()> {
        self.messengers.remove(handle)?;
        self.listeners.write().retain(
            |listener| !matches!(listener, Listener::Messenger { handle: h, .. } if *h == handle),
        );
        Ok(())
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver an event to every matching registration, in registration order
    pub fn emit(&self, event: &DebugEvent) {
        // Callbacks may register or unregister, so run them outside the lock
        let listeners = self.listeners.read().clone();
        let report_flags = event.report_flags();
        let severity = event.utils_severity();
        let types = event.utils_type();

        for listener in &listeners {
            match listener {
                Listener::Report { flags, callback, .. } if flags.intersects(report_flags) => {
                    callback(&DebugReport {
                        flags: report_flags,
                        object_type: vk::DebugReportObjectTypeEXT::from_raw(
                            event.object_type.as_raw(),
                        ),
                        object: event.object,
                        message_code: 0,
                        layer_prefix: LAYER_PREFIX,
                        message: &event.message,
                    });
                }
                Listener::Messenger {
                    severity: mask,
                    types: type_mask,
                    callback,
                    ..
                } if mask.intersects(severity) && type_mask.intersects(types) => {
                    callback(&DebugUtilsMessage {
                        severity,
                        types,
                        message_id_name: LAYER_PREFIX,
                        object_type: event.object_type,
                        object: event.object,
                        message: &event.message,
                    });
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn event(severity: Severity, category: Category) -> DebugEvent {
        DebugEvent {
            severity,
            category,
            object_type: vk::ObjectType::BUFFER,
            object: 42,
            message: "message".into(),
        }
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let channel = DebugChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        channel.register_messenger(&DebugUtilsMessengerCreateInfo {
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            callback: Arc::new(move |_| {
                log.lock().push("messenger");
                false
            }),
        });
        let log = Arc::clone(&seen);
        channel.register_report(&DebugReportCallbackCreateInfo {
            flags: vk::DebugReportFlagsEXT::ERROR,
            callback: Arc::new(move |report| {
                assert_eq!(report.object_type, vk::DebugReportObjectTypeEXT::BUFFER);
                log.lock().push("report");
                false
            }),
        });

        channel.emit(&event(Severity::Error, Category::Validation));
        assert_eq!(*seen.lock(), vec!["messenger", "report"]);
    }

    #[test]
    fn test_masks_filter_events() {
        let channel = DebugChannel::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        channel.register_report(&DebugReportCallbackCreateInfo {
            flags: vk::DebugReportFlagsEXT::PERFORMANCE_WARNING,
            callback: Arc::new(move |_| {
                *counter.lock() += 1;
                false
            }),
        });

        channel.emit(&event(Severity::Info, Category::General));
        channel.emit(&event(Severity::Warning, Category::Performance));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_unregister() {
        let channel = DebugChannel::new();
        let handle = channel.register_report(&DebugReportCallbackCreateInfo {
            flags: vk::DebugReportFlagsEXT::ERROR,
            callback: Arc::new(|_| false),
        });
        assert_eq!(channel.len(), 1);
        channel.unregister_report(handle).unwrap();
        assert!(channel.is_empty());
        assert!(channel.unregister_report(handle).is_err());
    }
}
