//! Device memory and exclusive scoped mapping
//!
//! Every allocation is backed by one legacy buffer object. Host-visible
//! allocations also keep a shadow copy in host memory that mappings hand out
//! directly; the mapped range is uploaded to the buffer object when the
//! [`MappedMemory`] guard drops. Memory the device writes is marked stale
//! after the submission completes and re-read on the next map.

use std::ops::{Deref, DerefMut, Range};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

use crate::backends::gl::context::ContextHandle;
use crate::backends::gl::driver::{BufferName, GlError};
use crate::backends::gl::geometry::DestroyNotifier;
use crate::backends::gl::GlState;
use crate::core::error::{VulkanError, VulkanResult};

/// Memory types exposed by every backend, indexed by memory type index
pub const MEMORY_TYPES: [vk::MemoryPropertyFlags; 3] = [
    vk::MemoryPropertyFlags::DEVICE_LOCAL,
    vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    ),
    vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw()
            | vk::MemoryPropertyFlags::HOST_CACHED.as_raw(),
    ),
];

/// Size of the single memory heap
pub const HEAP_SIZE: u64 = 1 << 31;

/// Memory type bits accepted by every resource
pub const ALL_MEMORY_TYPES: u32 = (1 << MEMORY_TYPES.len()) - 1;

/// Memory properties reported to callers
pub fn memory_properties() -> vk::PhysicalDeviceMemoryProperties {
    let mut properties = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: MEMORY_TYPES.len() as u32,
        memory_heap_count: 1,
        ..Default::default()
    };
    for (slot, flags) in properties.memory_types.iter_mut().zip(MEMORY_TYPES) {
        *slot = vk::MemoryType {
            property_flags: flags,
            heap_index: 0,
        };
    }
    properties.memory_heaps[0] = vk::MemoryHeap {
        size: HEAP_SIZE,
        flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
    };
    properties
}

/// One `VkDeviceMemory` allocation
pub struct MemoryObject {
    size: u64,
    type_index: u32,
    properties: vk::MemoryPropertyFlags,
    gl_buffer: BufferName,
    shadow: Option<Arc<Mutex<Vec<u8>>>>,
    dirty: Mutex<Vec<Range<u64>>>,
    stale: AtomicBool,
    /// Listeners run when the allocation is freed
    pub notifier: DestroyNotifier,
}

impl MemoryObject {
    /// Allocate the backing buffer object
    pub fn allocate(state: &mut GlState, size: u64, type_index: u32) -> VulkanResult<Self> {
        let properties = *MEMORY_TYPES.get(type_index as usize).ok_or_else(|| {
            VulkanError::contract(format!("memory type index {type_index} does not exist"))
        })?;
        if size == 0 {
            return Err(VulkanError::contract("allocation size must be non-zero"));
        }
        if size > HEAP_SIZE {
            return Err(VulkanError::OutOfMemory { requested: size });
        }

        let shadow = if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let len = usize::try_from(size).map_err(|_| VulkanError::OutOfMemory { requested: size })?;
            Some(Arc::new(Mutex::new(vec![0; len])))
        } else {
            None
        };
        let gl_buffer = state.driver.create_buffer(size).map_err(|err| match err {
            GlError::OutOfMemory => VulkanError::OutOfMemory { requested: size },
            other => other.into(),
        })?;
        log::debug!("Allocated {size} bytes of memory type {type_index} as {gl_buffer:?}");

        Ok(Self {
            size,
            type_index,
            properties,
            gl_buffer,
            shadow,
            dirty: Mutex::new(Vec::new()),
            stale: AtomicBool::new(false),
            notifier: DestroyNotifier::new(),
        })
    }

    /// Allocation size in bytes
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Memory type index
    pub const fn type_index(&self) -> u32 {
        self.type_index
    }

    /// Property flags of the memory type
    pub const fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    /// Backing buffer object
    pub const fn gl_buffer(&self) -> BufferName {
        self.gl_buffer
    }

    /// Whether the host may map the allocation
    pub fn is_host_visible(&self) -> bool {
        self.shadow.is_some()
    }

    /// Whether a mapping guard is live
    pub fn is_mapped(&self) -> bool {
        self.shadow.as_ref().is_some_and(|shadow| shadow.is_locked())
    }

    /// Record that the device wrote the allocation
    pub fn mark_stale(&self) {
        if self.shadow.is_some() {
            self.stale.store(true, Ordering::Release);
        }
    }

    /// Whether the shadow copy must be re-read before the host sees it
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Upload ranges written while the context was busy.
    ///
    /// Skipped while mapped; the guard uploads on drop instead.
    pub fn upload_dirty(&self, state: &mut GlState) {
        let Some(shadow) = &self.shadow else {
            return;
        };
        let Some(data) = shadow.try_lock() else {
            return;
        };
        let ranges = std::mem::take(&mut *self.dirty.lock());
        for range in ranges {
            upload(state, self.gl_buffer, &data, range);
        }
    }

    /// Delete the backing buffer object
    pub fn release(&self, state: &mut GlState) {
        state.driver.delete_buffer(self.gl_buffer);
    }
}

impl std::fmt::Debug for MemoryObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObject")
            .field("size", &self.size)
            .field("type_index", &self.type_index)
            .field("gl_buffer", &self.gl_buffer)
            .field("mapped", &self.is_mapped())
            .finish_non_exhaustive()
    }
}

fn upload(state: &mut GlState, buffer: BufferName, data: &[u8], range: Range<u64>) {
    let (Ok(start), Ok(end)) = (usize::try_from(range.start), usize::try_from(range.end)) else {
        return;
    };
    if let Some(bytes) = data.get(start..end) {
        state.driver.buffer_sub_data(buffer, range.start, bytes);
    }
}

/// Exclusive host view of a range of device memory.
///
/// Dropping the guard unmaps the memory and uploads the range.
pub struct MappedMemory<'a> {
    context: &'a ContextHandle,
    memory: Arc<MemoryObject>,
    data: ArcMutexGuard<RawMutex, Vec<u8>>,
    range: Range<usize>,
}

impl<'a> MappedMemory<'a> {
    /// Map `size` bytes at `offset`; `vk::WHOLE_SIZE` maps to the end
    pub fn map(
        context: &'a ContextHandle,
        memory: Arc<MemoryObject>,
        offset: u64,
        size: u64,
    ) -> VulkanResult<Self> {
        let shadow = memory.shadow.clone().ok_or_else(|| {
            VulkanError::MemoryMapFailed(format!(
                "memory type {} is not host visible",
                memory.type_index
            ))
        })?;
        let size = if size == vk::WHOLE_SIZE {
            memory.size.saturating_sub(offset)
        } else {
            size
        };
        if size == 0 || offset.checked_add(size).map_or(true, |end| end > memory.size) {
            return Err(VulkanError::contract(format!(
                "mapping {size} bytes at {offset} exceeds the {}-byte allocation",
                memory.size
            )));
        }
        let mut data = shadow
            .try_lock_arc()
            .ok_or_else(|| VulkanError::MemoryMapFailed("memory is already mapped".to_string()))?;

        if memory.stale.swap(false, Ordering::AcqRel) {
            let lock = context.lock()?;
            let mut state = lock.state()?;
            state.driver.get_buffer_sub_data(memory.gl_buffer, 0, &mut data);
            log::debug!("Refreshed {} stale bytes from {:?}", data.len(), memory.gl_buffer);
        }

        // Bounds were checked against the allocation, which the shadow matches
        let start = offset as usize;
        let end = start + size as usize;
        Ok(Self {
            context,
            memory,
            data,
            range: start..end,
        })
    }

    /// Offset of the mapping inside the allocation
    pub fn offset(&self) -> u64 {
        self.range.start as u64
    }

    /// Copy a plain-data value into the mapping at `offset`
    pub fn write<T: bytemuck::Pod>(&mut self, offset: usize, value: &T) -> VulkanResult<()> {
        self.write_slice(offset, std::slice::from_ref(value))
    }

    /// Copy plain-data values into the mapping at `offset`
    pub fn write_slice<T: bytemuck::Pod>(&mut self, offset: usize, values: &[T]) -> VulkanResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let target = offset
            .checked_add(bytes.len())
            .and_then(|end| self.get_mut(offset..end))
            .ok_or_else(|| {
                VulkanError::contract(format!(
                    "write of {} bytes at {offset} overruns the mapping",
                    bytes.len()
                ))
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Read plain-data values from the mapping at `offset`
    pub fn read_slice<T: bytemuck::Pod>(&self, offset: usize, count: usize) -> VulkanResult<Vec<T>> {
        let len = count * std::mem::size_of::<T>();
        let bytes = offset
            .checked_add(len)
            .and_then(|end| self.get(offset..end))
            .ok_or_else(|| {
                VulkanError::contract(format!("read of {len} bytes at {offset} overruns the mapping"))
            })?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>().max(1))
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Upload the mapped range now instead of at unmap
    pub fn flush(&self) -> VulkanResult<()> {
        let lock = self.context.lock()?;
        let mut state = lock.state()?;
        upload(&mut state, self.memory.gl_buffer, &self.data, self.byte_range());
        Ok(())
    }

    /// Re-read the mapped range from the device
    pub fn invalidate(&mut self) -> VulkanResult<()> {
        let lock = self.context.lock()?;
        let mut state = lock.state()?;
        let range = self.range.clone();
        state
            .driver
            .get_buffer_sub_data(self.memory.gl_buffer, range.start as u64, &mut self.data[range]);
        self.memory.stale.store(false, Ordering::Release);
        Ok(())
    }

    fn byte_range(&self) -> Range<u64> {
        self.range.start as u64..self.range.end as u64
    }
}

impl Deref for MappedMemory<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[self.range.clone()]
    }
}

impl DerefMut for MappedMemory<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let range = self.range.clone();
        &mut self.data[range]
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        let range = self.byte_range();
        let uploaded = self.context.lock().and_then(|lock| {
            let mut state = lock.state()?;
            upload(&mut state, self.memory.gl_buffer, &self.data, range.clone());
            Ok(())
        });
        if let Err(err) = uploaded {
            // Uploaded by the next submission instead
            log::debug!("Deferring upload of {range:?}: {err}");
            self.memory.dirty.lock().push(range);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::noop::{GlCall, NoopPlatform};
    use crate::backends::{BackendKind, Platform};

    fn context(platform: &NoopPlatform) -> ContextHandle {
        ContextHandle::new(platform.create_context().unwrap(), BackendKind::Noop, None).unwrap()
    }

    fn allocate(context: &ContextHandle, size: u64, type_index: u32) -> Arc<MemoryObject> {
        let lock = context.lock().unwrap();
        let mut state = lock.state().unwrap();
        Arc::new(MemoryObject::allocate(&mut state, size, type_index).unwrap())
    }

    #[test]
    fn test_second_map_fails() {
        let platform = NoopPlatform::new();
        let context = context(&platform);
        let memory = allocate(&context, 64, 1);

        let first = MappedMemory::map(&context, Arc::clone(&memory), 0, vk::WHOLE_SIZE).unwrap();
        assert!(memory.is_mapped());
        let second = MappedMemory::map(&context, Arc::clone(&memory), 0, 16);
        assert!(matches!(second, Err(VulkanError::MemoryMapFailed(_))));

        drop(first);
        assert!(!memory.is_mapped());
        assert!(MappedMemory::map(&context, memory, 0, 16).is_ok());
    }

    #[test]
    fn test_device_local_memory_is_not_mappable() {
        let platform = NoopPlatform::new();
        let context = context(&platform);
        let memory = allocate(&context, 64, 0);
        assert!(matches!(
            MappedMemory::map(&context, memory, 0, 16),
            Err(VulkanError::MemoryMapFailed(_))
        ));
    }

    #[test]
    fn test_unmap_uploads_range() {
        let platform = NoopPlatform::new();
        let calls = platform.probe().calls();
        let context = context(&platform);
        let memory = allocate(&context, 64, 1);
        calls.clear();

        {
            let mut mapped = MappedMemory::map(&context, Arc::clone(&memory), 16, 8).unwrap();
            mapped.write_slice(0, &[1u32, 2]).unwrap();
            assert!(mapped.write(8, &3u32).is_err());
        }

        assert_eq!(
            calls.calls(),
            vec![GlCall::BufferSubData {
                buffer: memory.gl_buffer(),
                offset: 16,
                len: 8
            }]
        );
    }

    #[test]
    fn test_stale_memory_is_refreshed_on_map() {
        let platform = NoopPlatform::new();
        let calls = platform.probe().calls();
        let context = context(&platform);
        let memory = allocate(&context, 16, 2);

        {
            let lock = context.lock().unwrap();
            let mut state = lock.state().unwrap();
            state.driver.buffer_sub_data(memory.gl_buffer(), 4, &[9, 9, 9, 9]);
        }
        memory.mark_stale();
        calls.clear();

        let mapped = MappedMemory::map(&context, Arc::clone(&memory), 0, vk::WHOLE_SIZE).unwrap();
        assert_eq!(mapped.read_slice::<u8>(4, 4).unwrap(), vec![9, 9, 9, 9]);
        assert!(!memory.is_stale());
        assert!(matches!(calls.calls()[0], GlCall::GetBufferSubData { .. }));
    }

    #[test]
    fn test_busy_context_defers_upload() {
        let platform = NoopPlatform::new();
        let calls = platform.probe().calls();
        let context = context(&platform);
        let memory = allocate(&context, 16, 1);
        let mapped = MappedMemory::map(&context, Arc::clone(&memory), 0, 4).unwrap();

        let lock = context.lock().unwrap();
        let mut state = lock.state().unwrap();
        calls.clear();
        drop(mapped);
        assert!(calls.is_empty());

        memory.upload_dirty(&mut state);
        assert_eq!(calls.count(|call| matches!(call, GlCall::BufferSubData { .. })), 1);
    }

    #[test]
    fn test_memory_properties_match_types() {
        let properties = memory_properties();
        assert_eq!(properties.memory_type_count, 3);
        assert!(properties.memory_types[1]
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT));
        assert_eq!(properties.memory_heaps[0].size, HEAP_SIZE);
    }
}
