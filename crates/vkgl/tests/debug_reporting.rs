//! Rejected calls and driver debug output reach the application's messengers

use std::sync::Arc;

use parking_lot::Mutex;
use vkgl::backends::gl::driver::{DriverMessage, MessageSeverity};
use vkgl::backends::noop::NoopPlatform;
use vkgl::backends::Platform;
use vkgl::config::EmulatorConfig;
use vkgl::core::dispatch::EXT_DEBUG_UTILS;
use vkgl::core::info::{
    DebugUtilsMessengerCreateInfo, DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo,
};
use vkgl::core::{Device, Instance};
use vkgl::vk;

type Seen = Arc<Mutex<Vec<(vk::DebugUtilsMessageSeverityFlagsEXT, String)>>>;

fn setup(config: EmulatorConfig) -> (Instance, Device, Arc<NoopPlatform>, Seen) {
    let platform = Arc::new(NoopPlatform::new());
    let instance = Instance::new(&InstanceCreateInfo {
        application_name: "debug-reporting",
        enabled_extensions: &[EXT_DEBUG_UTILS],
        config: Some(config),
        platform: Some(Arc::clone(&platform) as Arc<dyn Platform>),
        ..InstanceCreateInfo::default()
    })
    .unwrap();

    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    instance
        .create_debug_utils_messenger(&DebugUtilsMessengerCreateInfo {
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            callback: Arc::new(move |message| {
                sink.lock().push((message.severity, message.message.to_string()));
                false
            }),
        })
        .unwrap();

    let physical = instance.enumerate_physical_devices()[0];
    let device = instance
        .create_device(
            physical,
            &DeviceCreateInfo {
                queue_create_infos: &[DeviceQueueCreateInfo {
                    queue_family_index: 0,
                    queue_priorities: &[1.0],
                }],
                ..DeviceCreateInfo::default()
            },
        )
        .unwrap();
    (instance, device, platform, seen)
}

#[test]
fn test_contract_violation_is_reported_as_error() {
    let (_instance, device, _platform, seen) = setup(EmulatorConfig::noop());
    assert!(device.get_device_queue(3, 0).is_err());

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
    assert!(seen[0].1.contains("family 3"));
}

#[test]
fn test_silenced_contract_violations_still_fail() {
    let config = EmulatorConfig {
        report_contract_violations: false,
        ..EmulatorConfig::noop()
    };
    let (_instance, device, _platform, seen) = setup(config);
    assert!(device
        .get_device_queue(3, 0)
        .unwrap_err()
        .is_contract_violation());
    assert!(seen.lock().is_empty());
}

#[test]
fn test_driver_output_is_forwarded_after_submit() {
    let config = EmulatorConfig {
        enable_debug_output: true,
        ..EmulatorConfig::noop()
    };
    let (_instance, device, platform, seen) = setup(config);
    platform.probe().push_debug_message(DriverMessage {
        severity: MessageSeverity::Medium,
        performance: true,
        text: "buffer object will use video memory".to_string(),
    });

    let queue = device.get_device_queue(0, 0).unwrap();
    device.queue_submit(queue, &[], vk::Fence::null()).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, vk::DebugUtilsMessageSeverityFlagsEXT::WARNING);
    assert_eq!(seen[0].1, "buffer object will use video memory");
}
