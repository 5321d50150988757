//! Descriptor set layouts, pipeline layouts, pools and sets
//!
//! The legacy API has one flat binding namespace per resource class instead
//! of numbered sets. A pipeline layout fixes the flattening: bindings are
//! walked set by set in binding order and each resource class hands out
//! consecutive slots. Shaders are compiled against that remap and descriptor
//! sets are bound through it at replay.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, RwLock};

use crate::core::error::{VulkanError, VulkanResult};
use crate::core::info::{
    CopyDescriptorSet, DescriptorPoolCreateInfo, DescriptorSetLayoutCreateInfo, WriteDescriptorSet,
};
use crate::core::shader::{BindingRemap, ResourceKind};

/// Resource class a descriptor type is bound through
pub fn resource_kind(descriptor_type: vk::DescriptorType) -> VulkanResult<ResourceKind> {
    match descriptor_type {
        vk::DescriptorType::SAMPLER
        | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        | vk::DescriptorType::SAMPLED_IMAGE
        | vk::DescriptorType::INPUT_ATTACHMENT
        | vk::DescriptorType::UNIFORM_TEXEL_BUFFER => Ok(ResourceKind::SampledImage),
        vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
            Ok(ResourceKind::UniformBuffer)
        }
        vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => {
            Ok(ResourceKind::StorageBuffer)
        }
        vk::DescriptorType::STORAGE_IMAGE | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
            Ok(ResourceKind::StorageImage)
        }
        other => Err(VulkanError::FeatureNotPresent(format!(
            "descriptor type {other:?}"
        ))),
    }
}

/// Whether the descriptor type takes a dynamic offset at bind time
pub fn is_dynamic(descriptor_type: vk::DescriptorType) -> bool {
    matches!(
        descriptor_type,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

fn is_buffer(descriptor_type: vk::DescriptorType) -> bool {
    matches!(
        descriptor_type,
        vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

/// One binding of a set layout
#[derive(Debug, Clone)]
pub struct LayoutBinding {
    /// Binding number
    pub binding: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Array size
    pub count: u32,
    /// Stages that read the binding
    pub stages: vk::ShaderStageFlags,
    /// Samplers baked into the layout
    pub immutable_samplers: Vec<vk::Sampler>,
}

/// One `VkDescriptorSetLayout`
#[derive(Debug)]
pub struct DescriptorSetLayoutObject {
    bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayoutObject {
    /// Validate and sort the bindings
    pub fn new(info: &DescriptorSetLayoutCreateInfo) -> VulkanResult<Self> {
        let mut bindings = Vec::with_capacity(info.bindings.len());
        for binding in info.bindings {
            resource_kind(binding.descriptor_type)?;
            if !binding.immutable_samplers.is_empty()
                && binding.immutable_samplers.len() != binding.descriptor_count as usize
            {
                return Err(VulkanError::contract(format!(
                    "binding {} has {} immutable samplers for {} descriptors",
                    binding.binding,
                    binding.immutable_samplers.len(),
                    binding.descriptor_count
                )));
            }
            bindings.push(LayoutBinding {
                binding: binding.binding,
                descriptor_type: binding.descriptor_type,
                count: binding.descriptor_count,
                stages: binding.stage_flags,
                immutable_samplers: binding.immutable_samplers.to_vec(),
            });
        }
        bindings.sort_by_key(|binding| binding.binding);
        if let Some(pair) = bindings.windows(2).find(|pair| pair[0].binding == pair[1].binding) {
            return Err(VulkanError::contract(format!(
                "binding {} declared twice",
                pair[0].binding
            )));
        }
        Ok(Self { bindings })
    }

    /// Bindings in ascending order
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// Look up one binding
    pub fn binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings
            .binary_search_by_key(&binding, |b| b.binding)
            .ok()
            .map(|index| &self.bindings[index])
    }

    /// Number of dynamic descriptors, which is the number of dynamic offsets a bind consumes
    pub fn dynamic_count(&self) -> u32 {
        self.bindings
            .iter()
            .filter(|binding| is_dynamic(binding.descriptor_type))
            .map(|binding| binding.count)
            .sum()
    }
}

/// One `VkPipelineLayout`
#[derive(Debug)]
pub struct PipelineLayoutObject {
    /// Set layouts by set index
    pub set_layouts: Vec<Arc<DescriptorSetLayoutObject>>,
    /// Bytes covered by the push constant ranges
    pub push_constant_size: u32,
    /// Stages reading push constants
    pub push_constant_stages: vk::ShaderStageFlags,
    /// Flattened binding slots
    pub remaps: Vec<BindingRemap>,
    /// Uniform block slot holding the push constants
    pub push_constant_binding: Option<u32>,
}

impl PipelineLayoutObject {
    /// Flatten the set layouts into legacy binding slots
    pub fn new(
        set_layouts: Vec<Arc<DescriptorSetLayoutObject>>,
        push_constant_ranges: &[vk::PushConstantRange],
        max_push_constant_size: u32,
    ) -> VulkanResult<Self> {
        let mut next: HashMap<ResourceKind, u32> = HashMap::new();
        let mut remaps = Vec::new();
        for (set, layout) in (0u32..).zip(&set_layouts) {
            for binding in layout.bindings() {
                let kind = resource_kind(binding.descriptor_type)?;
                let slot = next.entry(kind).or_insert(0);
                remaps.push(BindingRemap {
                    set,
                    binding: binding.binding,
                    kind,
                    slot: *slot,
                });
                *slot += binding.count.max(1);
            }
        }

        let mut push_constant_size = 0;
        let mut push_constant_stages = vk::ShaderStageFlags::empty();
        for range in push_constant_ranges {
            if range.offset % 4 != 0 || range.size % 4 != 0 || range.size == 0 {
                return Err(VulkanError::contract(
                    "push constant ranges must be non-empty multiples of 4 bytes",
                ));
            }
            push_constant_size = push_constant_size.max(range.offset + range.size);
            push_constant_stages |= range.stage_flags;
        }
        if push_constant_size > max_push_constant_size {
            return Err(VulkanError::contract(format!(
                "push constants span {push_constant_size} bytes, the limit is {max_push_constant_size}"
            )));
        }
        let push_constant_binding = (push_constant_size > 0)
            .then(|| next.get(&ResourceKind::UniformBuffer).copied().unwrap_or(0));

        Ok(Self {
            set_layouts,
            push_constant_size,
            push_constant_stages,
            remaps,
            push_constant_binding,
        })
    }

    /// Slot assignment of one binding
    pub fn remap(&self, set: u32, binding: u32) -> Option<&BindingRemap> {
        self.remaps
            .iter()
            .find(|remap| remap.set == set && remap.binding == binding)
    }
}

/// Contents of one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// Uniform or storage buffer range
    Buffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Start of the range
        offset: u64,
        /// Range size, possibly `vk::WHOLE_SIZE`
        range: u64,
    },
    /// Image and/or sampler; either handle may be null
    Image {
        /// Viewed image
        view: vk::ImageView,
        /// Sampler
        sampler: vk::Sampler,
        /// Layout the image is in when accessed
        layout: vk::ImageLayout,
    },
}

/// A written descriptor as seen by a bind
#[derive(Debug, Clone, Copy)]
pub struct BoundDescriptor {
    /// Binding number
    pub binding: u32,
    /// Array element
    pub element: u32,
    /// Descriptor type of the binding
    pub descriptor_type: vk::DescriptorType,
    /// Contents
    pub descriptor: Descriptor,
}

/// One `VkDescriptorSet`
#[derive(Debug)]
pub struct DescriptorSetObject {
    /// Layout the set was allocated with
    pub layout: Arc<DescriptorSetLayoutObject>,
    /// Pool the set came from
    pub pool: vk::DescriptorPool,
    slots: RwLock<HashMap<u32, Vec<Option<Descriptor>>>>,
}

impl DescriptorSetObject {
    /// Set with every descriptor unwritten; immutable samplers are prefilled
    pub fn new(layout: Arc<DescriptorSetLayoutObject>, pool: vk::DescriptorPool) -> Self {
        let slots = layout
            .bindings()
            .iter()
            .map(|binding| {
                let mut descriptors = vec![None; binding.count as usize];
                for (slot, sampler) in descriptors.iter_mut().zip(&binding.immutable_samplers) {
                    *slot = Some(Descriptor::Image {
                        view: vk::ImageView::null(),
                        sampler: *sampler,
                        layout: vk::ImageLayout::UNDEFINED,
                    });
                }
                (binding.binding, descriptors)
            })
            .collect();
        Self {
            layout,
            pool,
            slots: RwLock::new(slots),
        }
    }

    /// Apply one descriptor write
    pub fn write(&self, write: &WriteDescriptorSet) -> VulkanResult<()> {
        let binding = self.layout.binding(write.dst_binding).ok_or_else(|| {
            VulkanError::contract(format!("set layout has no binding {}", write.dst_binding))
        })?;
        if binding.descriptor_type != write.descriptor_type {
            return Err(VulkanError::contract(format!(
                "binding {} is {:?}, written as {:?}",
                binding.binding, binding.descriptor_type, write.descriptor_type
            )));
        }

        let descriptors: Vec<Descriptor> = if is_buffer(write.descriptor_type) {
            write
                .buffer_info
                .iter()
                .map(|info| Descriptor::Buffer {
                    buffer: info.buffer,
                    offset: info.offset,
                    range: info.range,
                })
                .collect()
        } else {
            write
                .image_info
                .iter()
                .enumerate()
                .map(|(i, info)| {
                    let element = write.dst_array_element as usize + i;
                    let sampler = binding
                        .immutable_samplers
                        .get(element)
                        .copied()
                        .unwrap_or(info.sampler);
                    Descriptor::Image {
                        view: info.image_view,
                        sampler,
                        layout: info.image_layout,
                    }
                })
                .collect()
        };
        if descriptors.is_empty() {
            return Err(VulkanError::contract(format!(
                "write to binding {} carries no descriptors of its type",
                binding.binding
            )));
        }

        let end = write.dst_array_element as usize + descriptors.len();
        let mut slots = self.slots.write();
        let array = slots
            .get_mut(&binding.binding)
            .filter(|array| end <= array.len())
            .ok_or_else(|| {
                VulkanError::contract(format!(
                    "write of {} descriptors at element {} overflows binding {}",
                    descriptors.len(),
                    write.dst_array_element,
                    binding.binding
                ))
            })?;
        for (slot, descriptor) in array[write.dst_array_element as usize..end]
            .iter_mut()
            .zip(descriptors)
        {
            *slot = Some(descriptor);
        }
        Ok(())
    }

    /// Copy descriptors from another set, possibly this one
    pub fn copy_from(&self, source: &Self, copy: &CopyDescriptorSet) -> VulkanResult<()> {
        let src_type = source
            .layout
            .binding(copy.src_binding)
            .map(|binding| binding.descriptor_type);
        let dst_type = self
            .layout
            .binding(copy.dst_binding)
            .map(|binding| binding.descriptor_type);
        if src_type.is_none() || src_type != dst_type {
            return Err(VulkanError::contract(
                "descriptor copy between missing or mismatched bindings",
            ));
        }

        let count = copy.descriptor_count as usize;
        let src_start = copy.src_array_element as usize;
        let copied: Vec<Option<Descriptor>> = source
            .slots
            .read()
            .get(&copy.src_binding)
            .and_then(|array| array.get(src_start..src_start + count))
            .map(<[_]>::to_vec)
            .ok_or_else(|| VulkanError::contract("descriptor copy reads past the source binding"))?;

        let dst_start = copy.dst_array_element as usize;
        let mut slots = self.slots.write();
        let target = slots
            .get_mut(&copy.dst_binding)
            .and_then(|array| array.get_mut(dst_start..dst_start + count))
            .ok_or_else(|| VulkanError::contract("descriptor copy writes past the destination binding"))?;
        target.copy_from_slice(&copied);
        Ok(())
    }

    /// Written descriptors in binding and element order
    pub fn bound(&self) -> Vec<BoundDescriptor> {
        let slots = self.slots.read();
        self.layout
            .bindings()
            .iter()
            .flat_map(|binding| {
                slots
                    .get(&binding.binding)
                    .into_iter()
                    .flatten()
                    .zip(0u32..)
                    .filter_map(move |(descriptor, element)| {
                        descriptor.map(|descriptor| BoundDescriptor {
                            binding: binding.binding,
                            element,
                            descriptor_type: binding.descriptor_type,
                            descriptor,
                        })
                    })
            })
            .collect()
    }
}

/// One `VkDescriptorPool`
#[derive(Debug)]
pub struct DescriptorPoolObject {
    /// Creation flags
    pub flags: vk::DescriptorPoolCreateFlags,
    /// Maximum live sets
    pub max_sets: u32,
    sets: Mutex<Vec<vk::DescriptorSet>>,
}

impl DescriptorPoolObject {
    /// Create an empty pool
    pub fn new(info: &DescriptorPoolCreateInfo) -> VulkanResult<Self> {
        if info.max_sets == 0 {
            return Err(VulkanError::contract("descriptor pool must allow at least one set"));
        }
        Ok(Self {
            flags: info.flags,
            max_sets: info.max_sets,
            sets: Mutex::new(Vec::new()),
        })
    }

    /// Fail when `count` more sets do not fit
    pub fn reserve(&self, count: usize) -> VulkanResult<()> {
        if self.sets.lock().len() + count > self.max_sets as usize {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        Ok(())
    }

    /// Record a set allocated from the pool
    pub fn track(&self, set: vk::DescriptorSet) {
        self.sets.lock().push(set);
    }

    /// Return sets to the pool; needs `FREE_DESCRIPTOR_SET`
    pub fn free(&self, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        if !self
            .flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            return Err(VulkanError::contract(
                "pool was not created with FREE_DESCRIPTOR_SET",
            ));
        }
        let mut owned = self.sets.lock();
        if let Some(foreign) = sets.iter().find(|set| !owned.contains(set)) {
            return Err(VulkanError::contract(format!(
                "descriptor set {foreign:?} does not belong to this pool"
            )));
        }
        owned.retain(|set| !sets.contains(set));
        Ok(())
    }

    /// Forget every set, returning their handles
    pub fn reset(&self) -> Vec<vk::DescriptorSet> {
        std::mem::take(&mut *self.sets.lock())
    }

    /// Number of live sets
    pub fn len(&self) -> usize {
        self.sets.lock().len()
    }

    /// Whether no set is live
    pub fn is_empty(&self) -> bool {
        self.sets.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::info::DescriptorSetLayoutBinding;
    use ash::vk::Handle;

    fn binding(binding: u32, descriptor_type: vk::DescriptorType, count: u32) -> DescriptorSetLayoutBinding<'static> {
        DescriptorSetLayoutBinding {
            binding,
            descriptor_type,
            descriptor_count: count,
            stage_flags: vk::ShaderStageFlags::ALL_GRAPHICS,
            immutable_samplers: &[],
        }
    }

    fn layout(bindings: &[DescriptorSetLayoutBinding<'_>]) -> Arc<DescriptorSetLayoutObject> {
        Arc::new(DescriptorSetLayoutObject::new(&DescriptorSetLayoutCreateInfo { bindings }).unwrap())
    }

    #[test]
    fn test_slots_flatten_per_resource_class() {
        let set0 = layout(&[
            binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2),
            binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1),
        ]);
        let set1 = layout(&[
            binding(0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
            binding(3, vk::DescriptorType::SAMPLED_IMAGE, 1),
        ]);
        let ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: 64,
        }];
        let pipeline_layout = PipelineLayoutObject::new(vec![set0, set1], &ranges, 128).unwrap();

        let slot = |set, binding| pipeline_layout.remap(set, binding).unwrap().slot;
        assert_eq!(slot(0, 0), 0);
        assert_eq!(slot(0, 1), 0);
        assert_eq!(slot(1, 0), 1);
        assert_eq!(slot(1, 3), 2);
        assert_eq!(pipeline_layout.push_constant_binding, Some(2));
        assert_eq!(pipeline_layout.push_constant_size, 64);
    }

    #[test]
    fn test_push_constant_limit() {
        let ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 64,
            size: 128,
        }];
        let err = PipelineLayoutObject::new(Vec::new(), &ranges, 128).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let bindings = [
            binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1),
            binding(0, vk::DescriptorType::STORAGE_BUFFER, 1),
        ];
        assert!(DescriptorSetLayoutObject::new(&DescriptorSetLayoutCreateInfo { bindings: &bindings }).is_err());
    }

    #[test]
    fn test_write_and_copy() {
        let layout = layout(&[binding(0, vk::DescriptorType::UNIFORM_BUFFER, 2)]);
        let a = DescriptorSetObject::new(Arc::clone(&layout), vk::DescriptorPool::null());
        let b = DescriptorSetObject::new(layout, vk::DescriptorPool::null());
        let info = [vk::DescriptorBufferInfo {
            buffer: vk::Buffer::from_raw(7),
            offset: 16,
            range: 32,
        }];
        let mut write = WriteDescriptorSet {
            dst_set: vk::DescriptorSet::null(),
            dst_binding: 0,
            dst_array_element: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            image_info: &[],
            buffer_info: &info,
        };
        a.write(&write).unwrap();

        write.dst_array_element = 2;
        assert!(a.write(&write).is_err());
        write.descriptor_type = vk::DescriptorType::STORAGE_BUFFER;
        write.dst_array_element = 0;
        assert!(a.write(&write).is_err());

        b.copy_from(
            &a,
            &CopyDescriptorSet {
                src_set: vk::DescriptorSet::null(),
                src_binding: 0,
                src_array_element: 1,
                dst_set: vk::DescriptorSet::null(),
                dst_binding: 0,
                dst_array_element: 0,
                descriptor_count: 1,
            },
        )
        .unwrap();
        let bound = b.bound();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].element, 0);
        assert!(matches!(bound[0].descriptor, Descriptor::Buffer { offset: 16, .. }));
    }

    #[test]
    fn test_pool_capacity_and_free() {
        let pool = DescriptorPoolObject::new(&DescriptorPoolCreateInfo {
            flags: vk::DescriptorPoolCreateFlags::empty(),
            max_sets: 1,
            pool_sizes: &[],
        })
        .unwrap();
        pool.reserve(1).unwrap();
        pool.track(vk::DescriptorSet::from_raw(1));
        assert_eq!(
            pool.reserve(1).unwrap_err().result(),
            vk::Result::ERROR_OUT_OF_POOL_MEMORY
        );
        assert!(pool.free(&[vk::DescriptorSet::from_raw(1)]).is_err());
        assert_eq!(pool.reset().len(), 1);
        assert!(pool.is_empty());
    }
}
