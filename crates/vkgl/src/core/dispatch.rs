//! Entry-point dispatch tables
//!
//! The emulated API is reached through typed methods, but callers that
//! resolve entry points by name still get the loader's answers: which names
//! exist at which tier, and which are hidden behind a disabled extension.

use std::collections::HashMap;

/// `VK_KHR_surface`
pub const KHR_SURFACE: &str = "VK_KHR_surface";
/// `VK_KHR_swapchain`
pub const KHR_SWAPCHAIN: &str = "VK_KHR_swapchain";
/// `VK_KHR_maintenance1`
pub const KHR_MAINTENANCE1: &str = "VK_KHR_maintenance1";
/// `VK_EXT_debug_report`
pub const EXT_DEBUG_REPORT: &str = "VK_EXT_debug_report";
/// `VK_EXT_debug_utils`
pub const EXT_DEBUG_UTILS: &str = "VK_EXT_debug_utils";
/// Platform surface extensions; all of them route to [`crate::backends::Platform`]
pub const PLATFORM_SURFACE_EXTENSIONS: &[&str] = &[
    "VK_KHR_xlib_surface",
    "VK_KHR_xcb_surface",
    "VK_KHR_wayland_surface",
    "VK_KHR_win32_surface",
    "VK_EXT_metal_surface",
];

/// Instance extensions the emulator implements
pub fn supported_instance_extensions() -> Vec<&'static str> {
    let mut extensions = vec![KHR_SURFACE, EXT_DEBUG_REPORT, EXT_DEBUG_UTILS];
    extensions.extend_from_slice(PLATFORM_SURFACE_EXTENSIONS);
    extensions
}

/// Device extensions the emulator implements
pub const SUPPORTED_DEVICE_EXTENSIONS: &[&str] = &[KHR_SWAPCHAIN, KHR_MAINTENANCE1];

/// Level an entry point is dispatched at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// Resolvable without an instance
    Global,
    /// Dispatched on an instance or physical device
    Instance,
    /// Dispatched on a device, queue or command buffer
    Device,
}

/// One named entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    /// `vk*` name
    pub name: &'static str,
    /// Dispatch level
    pub tier: Tier,
    /// Extension that must be enabled, `None` for core
    pub extension: Option<&'static str>,
}

macro_rules! entry_points {
    ($($tier:ident, $ext:expr => [$($name:literal),* $(,)?];)*) => {
        &[
            $($(
                EntryPoint {
                    name: $name,
                    tier: Tier::$tier,
                    extension: $ext,
                },
            )*)*
        ]
    };
}

/// Every entry point the emulator resolves
pub static ENTRY_POINTS: &[EntryPoint] = entry_points! {
    Global, None => [
        "vkCreateInstance",
        "vkEnumerateInstanceExtensionProperties",
        "vkEnumerateInstanceLayerProperties",
        "vkEnumerateInstanceVersion",
        "vkGetInstanceProcAddr",
    ];
    Instance, None => [
        "vkDestroyInstance",
        "vkEnumeratePhysicalDevices",
        "vkGetPhysicalDeviceProperties",
        "vkGetPhysicalDeviceFeatures",
        "vkGetPhysicalDeviceMemoryProperties",
        "vkGetPhysicalDeviceQueueFamilyProperties",
        "vkGetPhysicalDeviceFormatProperties",
        "vkEnumerateDeviceExtensionProperties",
        "vkCreateDevice",
        "vkGetDeviceProcAddr",
    ];
    Instance, Some(KHR_SURFACE) => [
        "vkDestroySurfaceKHR",
        "vkGetPhysicalDeviceSurfaceSupportKHR",
        "vkGetPhysicalDeviceSurfaceCapabilitiesKHR",
        "vkGetPhysicalDeviceSurfaceFormatsKHR",
        "vkGetPhysicalDeviceSurfacePresentModesKHR",
    ];
    Instance, Some("VK_KHR_xlib_surface") => ["vkCreateXlibSurfaceKHR"];
    Instance, Some("VK_KHR_xcb_surface") => ["vkCreateXcbSurfaceKHR"];
    Instance, Some("VK_KHR_wayland_surface") => ["vkCreateWaylandSurfaceKHR"];
    Instance, Some("VK_KHR_win32_surface") => ["vkCreateWin32SurfaceKHR"];
    Instance, Some("VK_EXT_metal_surface") => ["vkCreateMetalSurfaceEXT"];
    Instance, Some(EXT_DEBUG_REPORT) => [
        "vkCreateDebugReportCallbackEXT",
        "vkDestroyDebugReportCallbackEXT",
        "vkDebugReportMessageEXT",
    ];
    Instance, Some(EXT_DEBUG_UTILS) => [
        "vkCreateDebugUtilsMessengerEXT",
        "vkDestroyDebugUtilsMessengerEXT",
        "vkSubmitDebugUtilsMessageEXT",
    ];
    Device, None => [
        "vkDestroyDevice",
        "vkGetDeviceQueue",
        "vkQueueSubmit",
        "vkQueueWaitIdle",
        "vkDeviceWaitIdle",
        "vkAllocateMemory",
        "vkFreeMemory",
        "vkMapMemory",
        "vkUnmapMemory",
        "vkFlushMappedMemoryRanges",
        "vkInvalidateMappedMemoryRanges",
        "vkBindBufferMemory",
        "vkBindImageMemory",
        "vkGetBufferMemoryRequirements",
        "vkGetImageMemoryRequirements",
        "vkCreateFence",
        "vkDestroyFence",
        "vkResetFences",
        "vkGetFenceStatus",
        "vkWaitForFences",
        "vkCreateSemaphore",
        "vkDestroySemaphore",
        "vkCreateEvent",
        "vkDestroyEvent",
        "vkGetEventStatus",
        "vkSetEvent",
        "vkResetEvent",
        "vkCreateBuffer",
        "vkDestroyBuffer",
        "vkCreateImage",
        "vkDestroyImage",
        "vkCreateImageView",
        "vkDestroyImageView",
        "vkCreateShaderModule",
        "vkDestroyShaderModule",
        "vkCreateGraphicsPipelines",
        "vkCreateComputePipelines",
        "vkDestroyPipeline",
        "vkCreatePipelineLayout",
        "vkDestroyPipelineLayout",
        "vkCreateSampler",
        "vkDestroySampler",
        "vkCreateDescriptorSetLayout",
        "vkDestroyDescriptorSetLayout",
        "vkCreateDescriptorPool",
        "vkDestroyDescriptorPool",
        "vkResetDescriptorPool",
        "vkAllocateDescriptorSets",
        "vkFreeDescriptorSets",
        "vkUpdateDescriptorSets",
        "vkCreateFramebuffer",
        "vkDestroyFramebuffer",
        "vkCreateRenderPass",
        "vkDestroyRenderPass",
        "vkCreateCommandPool",
        "vkDestroyCommandPool",
        "vkResetCommandPool",
        "vkAllocateCommandBuffers",
        "vkFreeCommandBuffers",
        "vkBeginCommandBuffer",
        "vkEndCommandBuffer",
        "vkResetCommandBuffer",
        "vkCmdBindPipeline",
        "vkCmdSetViewport",
        "vkCmdSetScissor",
        "vkCmdSetLineWidth",
        "vkCmdSetDepthBias",
        "vkCmdSetBlendConstants",
        "vkCmdSetDepthBounds",
        "vkCmdSetStencilCompareMask",
        "vkCmdSetStencilWriteMask",
        "vkCmdSetStencilReference",
        "vkCmdBindDescriptorSets",
        "vkCmdBindIndexBuffer",
        "vkCmdBindVertexBuffers",
        "vkCmdDraw",
        "vkCmdDrawIndexed",
        "vkCmdDrawIndirect",
        "vkCmdDrawIndexedIndirect",
        "vkCmdDispatch",
        "vkCmdDispatchIndirect",
        "vkCmdCopyBuffer",
        "vkCmdCopyImage",
        "vkCmdBlitImage",
        "vkCmdCopyBufferToImage",
        "vkCmdCopyImageToBuffer",
        "vkCmdUpdateBuffer",
        "vkCmdFillBuffer",
        "vkCmdClearColorImage",
        "vkCmdClearDepthStencilImage",
        "vkCmdClearAttachments",
        "vkCmdSetEvent",
        "vkCmdResetEvent",
        "vkCmdWaitEvents",
        "vkCmdPipelineBarrier",
        "vkCmdPushConstants",
        "vkCmdBeginRenderPass",
        "vkCmdNextSubpass",
        "vkCmdEndRenderPass",
        "vkCmdExecuteCommands",
    ];
    Device, Some(KHR_SWAPCHAIN) => [
        "vkCreateSwapchainKHR",
        "vkDestroySwapchainKHR",
        "vkGetSwapchainImagesKHR",
        "vkAcquireNextImageKHR",
        "vkQueuePresentKHR",
    ];
    Device, Some(KHR_MAINTENANCE1) => ["vkTrimCommandPool"];
};

/// Entry points resolved for one instance or device
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<&'static str, &'static EntryPoint>,
}

impl DispatchTable {
    /// Resolve every entry point at one of `tiers` whose extension is enabled
    pub fn resolve(tiers: &[Tier], enabled_extensions: &[String]) -> Self {
        let entries = ENTRY_POINTS
            .iter()
            .filter(|entry| tiers.contains(&entry.tier))
            .filter(|entry| {
                entry
                    .extension
                    .map_or(true, |ext| enabled_extensions.iter().any(|e| e == ext))
            })
            .map(|entry| (entry.name, entry))
            .collect();
        Self { entries }
    }

    /// Table for `vkGetInstanceProcAddr(VK_NULL_HANDLE, ...)`
    pub fn global() -> Self {
        Self::resolve(&[Tier::Global], &[])
    }

    /// Look up an entry point by name
    pub fn get(&self, name: &str) -> Option<&'static EntryPoint> {
        self.entries.get(name).copied()
    }

    /// Number of resolvable entry points
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing resolves
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = ENTRY_POINTS.iter().map(|e| e.name).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_global_table() {
        let table = DispatchTable::global();
        assert!(table.get("vkCreateInstance").is_some());
        assert!(table.get("vkCreateDevice").is_none());
    }

    #[test]
    fn test_extension_gating() {
        let without = DispatchTable::resolve(&[Tier::Device], &[]);
        assert!(without.get("vkCmdDraw").is_some());
        assert!(without.get("vkQueuePresentKHR").is_none());
        assert!(without.get("vkCreateInstance").is_none());

        let with = DispatchTable::resolve(&[Tier::Device], &[KHR_SWAPCHAIN.to_string()]);
        let present = with.get("vkQueuePresentKHR").unwrap();
        assert_eq!(present.extension, Some(KHR_SWAPCHAIN));
        assert_eq!(present.tier, Tier::Device);
    }
}
