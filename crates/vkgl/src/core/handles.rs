//! Generation-checked object tables
//!
//! Every dispatchable and non-dispatchable object lives in an [`Arena`] keyed
//! by a `slotmap` key. The key's FFI encoding is used verbatim as the raw
//! `ash::vk` handle value, so a destroyed and recycled slot never resolves
//! through an old handle.

use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::RwLock;
use slotmap::{new_key_type, Key, KeyData, SlotMap};

use crate::core::error::{VulkanError, VulkanResult};

new_key_type! {
    /// `VkPhysicalDevice` slot
    pub struct PhysicalDeviceKey;
    /// `VkDeviceMemory` slot
    pub struct MemoryKey;
    /// `VkBuffer` slot
    pub struct BufferKey;
    /// `VkImage` slot
    pub struct ImageKey;
    /// `VkImageView` slot
    pub struct ImageViewKey;
    /// `VkSampler` slot
    pub struct SamplerKey;
    /// `VkShaderModule` slot
    pub struct ShaderModuleKey;
    /// `VkPipelineLayout` slot
    pub struct PipelineLayoutKey;
    /// `VkPipeline` slot
    pub struct PipelineKey;
    /// `VkDescriptorSetLayout` slot
    pub struct DescriptorSetLayoutKey;
    /// `VkDescriptorPool` slot
    pub struct DescriptorPoolKey;
    /// `VkDescriptorSet` slot
    pub struct DescriptorSetKey;
    /// `VkRenderPass` slot
    pub struct RenderPassKey;
    /// `VkFramebuffer` slot
    pub struct FramebufferKey;
    /// `VkCommandPool` slot
    pub struct CommandPoolKey;
    /// `VkCommandBuffer` slot
    pub struct CommandBufferKey;
    /// `VkFence` slot
    pub struct FenceKey;
    /// `VkSemaphore` slot
    pub struct SemaphoreKey;
    /// `VkEvent` slot
    pub struct EventKey;
    /// `VkSurfaceKHR` slot
    pub struct SurfaceKey;
    /// `VkSwapchainKHR` slot
    pub struct SwapchainKey;
    /// `VkDebugReportCallbackEXT` slot
    pub struct DebugReportKey;
    /// `VkDebugUtilsMessengerEXT` slot
    pub struct DebugMessengerKey;
}

/// Link between a slot key and the `ash::vk` handle type it encodes
pub trait HandleKey: Key {
    /// Handle type handed out to callers
    type Handle: Handle + Copy;
    /// Object type name used in diagnostics
    const KIND: &'static str;

    /// Encode the key as a handle
    fn to_handle(self) -> Self::Handle {
        Self::Handle::from_raw(self.data().as_ffi())
    }

    /// Decode a handle; `VK_NULL_HANDLE` decodes to `None`
    fn from_handle(handle: Self::Handle) -> Option<Self> {
        match handle.as_raw() {
            0 => None,
            raw => Some(KeyData::from_ffi(raw).into()),
        }
    }
}

macro_rules! handle_key {
    ($($key:ty => $handle:ty, $kind:literal;)*) => {
        $(
            impl HandleKey for $key {
                type Handle = $handle;
                const KIND: &'static str = $kind;
            }
        )*
    };
}

handle_key! {
    PhysicalDeviceKey => vk::PhysicalDevice, "VkPhysicalDevice";
    MemoryKey => vk::DeviceMemory, "VkDeviceMemory";
    BufferKey => vk::Buffer, "VkBuffer";
    ImageKey => vk::Image, "VkImage";
    ImageViewKey => vk::ImageView, "VkImageView";
    SamplerKey => vk::Sampler, "VkSampler";
    ShaderModuleKey => vk::ShaderModule, "VkShaderModule";
    PipelineLayoutKey => vk::PipelineLayout, "VkPipelineLayout";
    PipelineKey => vk::Pipeline, "VkPipeline";
    DescriptorSetLayoutKey => vk::DescriptorSetLayout, "VkDescriptorSetLayout";
    DescriptorPoolKey => vk::DescriptorPool, "VkDescriptorPool";
    DescriptorSetKey => vk::DescriptorSet, "VkDescriptorSet";
    RenderPassKey => vk::RenderPass, "VkRenderPass";
    FramebufferKey => vk::Framebuffer, "VkFramebuffer";
    CommandPoolKey => vk::CommandPool, "VkCommandPool";
    CommandBufferKey => vk::CommandBuffer, "VkCommandBuffer";
    FenceKey => vk::Fence, "VkFence";
    SemaphoreKey => vk::Semaphore, "VkSemaphore";
    EventKey => vk::Event, "VkEvent";
    SurfaceKey => vk::SurfaceKHR, "VkSurfaceKHR";
    SwapchainKey => vk::SwapchainKHR, "VkSwapchainKHR";
    DebugReportKey => vk::DebugReportCallbackEXT, "VkDebugReportCallbackEXT";
    DebugMessengerKey => vk::DebugUtilsMessengerEXT, "VkDebugUtilsMessengerEXT";
}

/// Error for a handle that does not name a live object of type `K`
pub fn not_found<K: HandleKey>(handle: K::Handle) -> VulkanError {
    VulkanError::ResourceNotFound {
        kind: K::KIND,
        id: handle.as_raw(),
    }
}

/// Shared object table for one handle type.
///
/// Objects are stored behind `Arc` so lookups release the table lock
/// immediately and recorded commands can keep what they reference alive.
pub struct Arena<K: HandleKey, V> {
    slots: RwLock<SlotMap<K, Arc<V>>>,
}

impl<K: HandleKey, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(SlotMap::with_key()),
        }
    }
}

impl<K: HandleKey, V> Arena<K, V> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object and return its handle
    pub fn insert(&self, value: V) -> K::Handle {
        self.slots.write().insert(Arc::new(value)).to_handle()
    }

    /// Store an object built from its own key
    pub fn insert_with_key(&self, build: impl FnOnce(K) -> V) -> K::Handle {
        self.slots
            .write()
            .insert_with_key(|key| Arc::new(build(key)))
            .to_handle()
    }

    /// Resolve a handle to its object
    pub fn get(&self, handle: K::Handle) -> VulkanResult<Arc<V>> {
        K::from_handle(handle)
            .and_then(|key| self.slots.read().get(key).cloned())
            .ok_or_else(|| not_found::<K>(handle))
    }

    /// Resolve a key to its object
    pub fn get_key(&self, key: K) -> Option<Arc<V>> {
        self.slots.read().get(key).cloned()
    }

    /// Remove an object; the slot's generation is bumped
    pub fn remove(&self, handle: K::Handle) -> VulkanResult<Arc<V>> {
        K::from_handle(handle)
            .and_then(|key| self.slots.write().remove(key))
            .ok_or_else(|| not_found::<K>(handle))
    }

    /// Whether the handle names a live object
    pub fn contains(&self, handle: K::Handle) -> bool {
        K::from_handle(handle).is_some_and(|key| self.slots.read().contains_key(key))
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Remove every object, returning them in slot order
    pub fn drain(&self) -> Vec<Arc<V>> {
        self.slots.write().drain().map(|(_, value)| value).collect()
    }

    /// Snapshot of every live object with its handle
    pub fn entries(&self) -> Vec<(K::Handle, Arc<V>)> {
        self.slots
            .read()
            .iter()
            .map(|(key, value)| (key.to_handle(), Arc::clone(value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_encoding_round_trips() {
        let arena: Arena<BufferKey, u32> = Arena::new();
        let handle = arena.insert(7);
        assert_ne!(handle, vk::Buffer::null());
        assert_eq!(*arena.get(handle).unwrap(), 7);
    }

    #[test]
    fn test_null_handle_is_not_found() {
        let arena: Arena<ImageKey, u32> = Arena::new();
        let err = arena.get(vk::Image::null()).unwrap_err();
        assert!(matches!(err, VulkanError::ResourceNotFound { kind: "VkImage", id: 0 }));
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let arena: Arena<FenceKey, &str> = Arena::new();
        let first = arena.insert("first");
        arena.remove(first).unwrap();
        let second = arena.insert("second");

        assert_ne!(first, second);
        assert!(arena.get(first).is_err());
        assert_eq!(*arena.get(second).unwrap(), "second");
        assert!(!arena.contains(first));
        assert_eq!(arena.len(), 1);
    }
}
