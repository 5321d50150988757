//! Buffers, images, image views and samplers
//!
//! Buffers are views into a memory allocation's backing buffer object and
//! own no driver object of their own. Images own an immutable texture created
//! up front; binding memory to them is bookkeeping only. Swapchain images
//! have no texture at all and stand for the window's back buffer.

use std::ops::Range;
use std::sync::Arc;

use ash::vk;
use parking_lot::RwLock;

use crate::backends::gl::conversions::IntoGl;
use crate::backends::gl::driver::{
    BufferName, CompareFunc, GlDriver, SamplerDesc, SamplerName, TextureDesc, TextureName,
    TextureTarget, TextureViewDesc,
};
use crate::backends::gl::format::{gl_format, FormatClass, GlFormat};
use crate::backends::gl::geometry::DestroyNotifier;
use crate::backends::gl::GlState;
use crate::backends::Capabilities;
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::info::{
    BufferCreateInfo, ImageCreateInfo, ImageViewCreateInfo, SamplerCreateInfo,
};
use crate::core::memory::{MemoryObject, ALL_MEMORY_TYPES};

/// Placement of a buffer inside its memory
#[derive(Debug, Clone)]
pub struct BufferBinding {
    /// Backing allocation
    pub memory: Arc<MemoryObject>,
    /// Byte offset of the buffer inside the allocation
    pub offset: u64,
}

/// One `VkBuffer`
#[derive(Debug)]
pub struct BufferObject {
    /// Size in bytes
    pub size: u64,
    /// Declared usage
    pub usage: vk::BufferUsageFlags,
    binding: RwLock<Option<BufferBinding>>,
    /// Listeners run when the buffer is destroyed
    pub notifier: DestroyNotifier,
}

impl BufferObject {
    /// Validate creation parameters
    pub fn new(info: &BufferCreateInfo) -> VulkanResult<Self> {
        if info.size == 0 {
            return Err(VulkanError::contract("buffer size must be non-zero"));
        }
        if info.flags.contains(vk::BufferCreateFlags::SPARSE_BINDING) {
            return Err(VulkanError::FeatureNotPresent("sparse buffers".to_string()));
        }
        Ok(Self {
            size: info.size,
            usage: info.usage,
            binding: RwLock::new(None),
            notifier: DestroyNotifier::new(),
        })
    }

    /// Size and alignment the memory must satisfy
    pub fn memory_requirements(&self) -> vk::MemoryRequirements {
        let alignment = if self
            .usage
            .intersects(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER)
        {
            256
        } else {
            16
        };
        vk::MemoryRequirements {
            size: self.size.next_multiple_of(alignment),
            alignment,
            memory_type_bits: ALL_MEMORY_TYPES,
        }
    }

    /// Attach the buffer to memory; a buffer is bound at most once
    pub fn bind(&self, memory: Arc<MemoryObject>, offset: u64) -> VulkanResult<()> {
        let mut binding = self.binding.write();
        if binding.is_some() {
            return Err(VulkanError::contract("buffer is already bound to memory"));
        }
        if offset % self.memory_requirements().alignment != 0 {
            return Err(VulkanError::contract(format!(
                "memory offset {offset} is not aligned for this buffer"
            )));
        }
        if offset.checked_add(self.size).map_or(true, |end| end > memory.size()) {
            return Err(VulkanError::contract(format!(
                "buffer of {} bytes at offset {offset} exceeds a {}-byte allocation",
                self.size,
                memory.size()
            )));
        }
        *binding = Some(BufferBinding { memory, offset });
        Ok(())
    }

    /// Memory placement, if bound
    pub fn binding(&self) -> Option<BufferBinding> {
        self.binding.read().clone()
    }

    /// Backing buffer object and absolute offset of `offset` within it
    pub fn locate(&self, offset: u64) -> VulkanResult<(BufferName, u64)> {
        let binding = self
            .binding()
            .ok_or_else(|| VulkanError::contract("buffer is used before memory was bound"))?;
        Ok((binding.memory.gl_buffer(), binding.offset + offset))
    }

    /// Resolve `vk::WHOLE_SIZE` against the buffer's size
    pub fn range(&self, offset: u64, size: u64) -> VulkanResult<u64> {
        let size = if size == vk::WHOLE_SIZE {
            self.size.saturating_sub(offset)
        } else {
            size
        };
        if offset.checked_add(size).map_or(true, |end| end > self.size) {
            return Err(VulkanError::contract(format!(
                "range of {size} bytes at {offset} exceeds a {}-byte buffer",
                self.size
            )));
        }
        Ok(size)
    }
}

/// Texture target for an image
fn image_target(info: &ImageCreateInfo) -> TextureTarget {
    let multisampled = info.samples != vk::SampleCountFlags::TYPE_1;
    let layered = info.array_layers > 1;
    match info.image_type {
        vk::ImageType::TYPE_1D if layered => TextureTarget::Texture1DArray,
        vk::ImageType::TYPE_1D => TextureTarget::Texture1D,
        vk::ImageType::TYPE_3D => TextureTarget::Texture3D,
        _ if info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) => {
            if info.array_layers > 6 {
                TextureTarget::CubeMapArray
            } else {
                TextureTarget::CubeMap
            }
        }
        _ if multisampled && layered => TextureTarget::Texture2DMultisampleArray,
        _ if multisampled => TextureTarget::Texture2DMultisample,
        _ if layered => TextureTarget::Texture2DArray,
        _ => TextureTarget::Texture2D,
    }
}

fn sample_count(samples: vk::SampleCountFlags) -> u32 {
    samples.as_raw().max(1)
}

/// One `VkImage`
#[derive(Debug)]
pub struct ImageObject {
    /// Creation parameters
    pub info: ImageCreateInfo,
    /// Legacy storage format
    pub format: GlFormat,
    /// Texture target of the storage
    pub target: TextureTarget,
    /// Storage texture, `None` for swapchain images
    pub texture: Option<TextureName>,
    bound: RwLock<Option<Arc<MemoryObject>>>,
}

impl ImageObject {
    /// Create the image's storage texture
    pub fn new(state: &mut GlState, info: &ImageCreateInfo) -> VulkanResult<Self> {
        let format = gl_format(info.format).ok_or_else(|| {
            VulkanError::FeatureNotPresent(format!("format {:?} has no legacy equivalent", info.format))
        })?;
        if info.extent.width == 0 || info.extent.height == 0 || info.extent.depth == 0 {
            return Err(VulkanError::contract("image extent must be non-zero"));
        }
        if info.mip_levels == 0 || info.array_layers == 0 {
            return Err(VulkanError::contract("image needs at least one level and layer"));
        }
        let target = image_target(info);
        let texture = state.driver.create_texture(&TextureDesc {
            target,
            format,
            width: info.extent.width,
            height: info.extent.height,
            depth: info.extent.depth,
            layers: info.array_layers,
            levels: info.mip_levels,
            samples: sample_count(info.samples),
        })?;
        log::debug!(
            "Created {:?} image {}x{}x{} as {texture:?}",
            info.format,
            info.extent.width,
            info.extent.height,
            info.extent.depth
        );
        Ok(Self {
            info: *info,
            format,
            target,
            texture: Some(texture),
            bound: RwLock::new(None),
        })
    }

    /// Image standing for a window's back buffer
    pub fn backbuffer(format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags) -> VulkanResult<Self> {
        let gl = gl_format(format).ok_or_else(|| {
            VulkanError::FeatureNotPresent(format!("format {format:?} has no legacy equivalent"))
        })?;
        Ok(Self {
            info: ImageCreateInfo {
                format,
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
                usage,
                ..ImageCreateInfo::default()
            },
            format: gl,
            target: TextureTarget::Texture2D,
            texture: None,
            bound: RwLock::new(None),
        })
    }

    /// Whether this is a swapchain image
    pub const fn is_backbuffer(&self) -> bool {
        self.texture.is_none()
    }

    /// Aspect class of the format
    pub const fn class(&self) -> FormatClass {
        self.format.class
    }

    /// Extent of one mip level
    pub fn level_extent(&self, level: u32) -> vk::Extent3D {
        let shrink = |v: u32| v.checked_shr(level).unwrap_or(0).max(1);
        vk::Extent3D {
            width: shrink(self.info.extent.width),
            height: shrink(self.info.extent.height),
            depth: shrink(self.info.extent.depth),
        }
    }

    /// Levels and layers covered by `range`, with the `REMAINING_*` counts
    /// resolved. Empty ranges and ranges past the image are rejected.
    pub fn resolve_range(
        &self,
        range: &vk::ImageSubresourceRange,
    ) -> VulkanResult<(Range<u32>, Range<u32>)> {
        let levels = span("mip level", range.base_mip_level, range.level_count, self.info.mip_levels)?;
        let layers = span(
            "array layer",
            range.base_array_layer,
            range.layer_count,
            self.info.array_layers,
        )?;
        Ok((levels, layers))
    }

    /// Check that a copy or blit subresource exists in this image
    pub fn check_layers(&self, layers: &vk::ImageSubresourceLayers) -> VulkanResult<()> {
        span("mip level", layers.mip_level, 1, self.info.mip_levels)?;
        span(
            "array layer",
            layers.base_array_layer,
            layers.layer_count,
            self.info.array_layers,
        )?;
        Ok(())
    }

    /// Storage texture, failing for swapchain images
    pub fn require_texture(&self) -> VulkanResult<TextureName> {
        self.texture
            .ok_or_else(|| VulkanError::contract("swapchain images cannot be used as textures"))
    }

    /// Size the image would occupy in linear memory
    pub fn memory_requirements(&self) -> vk::MemoryRequirements {
        let texels: u64 = (0..self.info.mip_levels)
            .map(|level| {
                let e = self.level_extent(level);
                u64::from(e.width) * u64::from(e.height) * u64::from(e.depth)
            })
            .sum();
        let size = texels
            * u64::from(self.info.array_layers)
            * u64::from(self.format.texel_size)
            * u64::from(sample_count(self.info.samples));
        vk::MemoryRequirements {
            size: size.next_multiple_of(256),
            alignment: 256,
            memory_type_bits: ALL_MEMORY_TYPES,
        }
    }

    /// Record the memory the image is bound to
    pub fn bind(&self, memory: Arc<MemoryObject>, offset: u64) -> VulkanResult<()> {
        if self.is_backbuffer() {
            return Err(VulkanError::contract("swapchain images are bound by the swapchain"));
        }
        let mut bound = self.bound.write();
        if bound.is_some() {
            return Err(VulkanError::contract("image is already bound to memory"));
        }
        let needed = self.memory_requirements().size;
        if offset.checked_add(needed).map_or(true, |end| end > memory.size()) {
            return Err(VulkanError::contract(format!(
                "image needs {needed} bytes at offset {offset} of a {}-byte allocation",
                memory.size()
            )));
        }
        *bound = Some(memory);
        Ok(())
    }

    /// Delete the storage texture
    pub fn release(&self, driver: &mut dyn GlDriver) {
        if let Some(texture) = self.texture {
            driver.delete_texture(texture);
        }
    }
}

fn view_target(view_type: vk::ImageViewType, image: &ImageObject) -> TextureTarget {
    let multisampled = matches!(
        image.target,
        TextureTarget::Texture2DMultisample | TextureTarget::Texture2DMultisampleArray
    );
    match view_type {
        vk::ImageViewType::TYPE_1D => TextureTarget::Texture1D,
        vk::ImageViewType::TYPE_1D_ARRAY => TextureTarget::Texture1DArray,
        vk::ImageViewType::TYPE_2D_ARRAY if multisampled => TextureTarget::Texture2DMultisampleArray,
        vk::ImageViewType::TYPE_2D_ARRAY => TextureTarget::Texture2DArray,
        vk::ImageViewType::TYPE_3D => TextureTarget::Texture3D,
        vk::ImageViewType::CUBE => TextureTarget::CubeMap,
        vk::ImageViewType::CUBE_ARRAY => TextureTarget::CubeMapArray,
        _ if multisampled => TextureTarget::Texture2DMultisample,
        _ => TextureTarget::Texture2D,
    }
}

/// One `VkImageView`
#[derive(Debug)]
pub struct ImageViewObject {
    /// Viewed image
    pub image: Arc<ImageObject>,
    /// Texture target of the view
    pub target: TextureTarget,
    /// View format
    pub format: GlFormat,
    /// Texture sampled through the view, `None` for swapchain images
    pub texture: Option<TextureName>,
    /// Whether `texture` is a view object owned by this view
    owns_texture: bool,
    /// First mip level
    pub base_level: u32,
    /// First array layer
    pub base_layer: u32,
    /// Number of array layers
    pub layers: u32,
}

impl ImageViewObject {
    /// Create a view, using a texture view object when the range or format
    /// differs from the image and the context supports it
    pub fn new(
        state: &mut GlState,
        image: Arc<ImageObject>,
        info: &ImageViewCreateInfo,
    ) -> VulkanResult<Self> {
        let format = gl_format(info.format).ok_or_else(|| {
            VulkanError::FeatureNotPresent(format!("format {:?} has no legacy equivalent", info.format))
        })?;
        let range = info.subresource_range;
        let (levels, layers) = image.resolve_range(&range)?;
        let (levels, layers) = (levels.len() as u32, layers.len() as u32);

        let target = view_target(info.view_type, &image);
        let whole = range.base_mip_level == 0
            && levels == image.info.mip_levels
            && range.base_array_layer == 0
            && layers == image.info.array_layers
            && format == image.format
            && target == image.target;

        let (texture, owns_texture) = match image.texture {
            None => (None, false),
            Some(texture) if whole => (Some(texture), false),
            Some(texture) if state.caps.contains(Capabilities::TEXTURE_VIEW) => {
                let view = state.driver.create_texture_view(
                    texture,
                    &TextureViewDesc {
                        target,
                        format,
                        base_level: range.base_mip_level,
                        levels,
                        base_layer: range.base_array_layer,
                        layers,
                    },
                )?;
                (Some(view), true)
            }
            Some(texture) => {
                if format != image.format {
                    return Err(VulkanError::FeatureNotPresent(
                        "reinterpreting image formats needs texture views".to_string(),
                    ));
                }
                log::debug!("Texture views unavailable; view of {texture:?} covers the whole image");
                (Some(texture), false)
            }
        };

        Ok(Self {
            image,
            target,
            format,
            texture,
            owns_texture,
            base_level: range.base_mip_level,
            base_layer: range.base_array_layer,
            layers,
        })
    }

    /// Whether the view shows a swapchain image
    pub fn is_backbuffer(&self) -> bool {
        self.image.is_backbuffer()
    }

    /// Extent of the view's first level
    pub fn extent(&self) -> vk::Extent3D {
        self.image.level_extent(self.base_level)
    }

    /// Delete the view object, if one was created
    pub fn release(&self, driver: &mut dyn GlDriver) {
        if let (true, Some(texture)) = (self.owns_texture, self.texture) {
            driver.delete_texture(texture);
        }
    }
}

fn border_color(color: vk::BorderColor) -> [f32; 4] {
    match color {
        vk::BorderColor::FLOAT_OPAQUE_BLACK | vk::BorderColor::INT_OPAQUE_BLACK => {
            [0.0, 0.0, 0.0, 1.0]
        }
        vk::BorderColor::FLOAT_OPAQUE_WHITE | vk::BorderColor::INT_OPAQUE_WHITE => [1.0; 4],
        _ => [0.0; 4],
    }
}

/// One `VkSampler`
#[derive(Debug)]
pub struct SamplerObject {
    /// Driver sampler object
    pub sampler: SamplerName,
}

impl SamplerObject {
    /// Create the driver sampler
    pub fn new(state: &mut GlState, info: &SamplerCreateInfo) -> VulkanResult<Self> {
        let desc = SamplerDesc {
            mag_filter: info.mag_filter.into_gl(),
            min_filter: info.min_filter.into_gl(),
            mipmap_filter: Some(info.mipmap_mode.into_gl()),
            wrap: [
                info.address_mode_u.into_gl(),
                info.address_mode_v.into_gl(),
                info.address_mode_w.into_gl(),
            ],
            lod_bias: info.mip_lod_bias,
            min_lod: info.min_lod,
            max_lod: info.max_lod,
            max_anisotropy: if info.anisotropy_enable {
                info.max_anisotropy.max(1.0)
            } else {
                1.0
            },
            compare: info
                .compare_enable
                .then(|| IntoGl::<CompareFunc>::into_gl(info.compare_op)),
            border_color: border_color(info.border_color),
        };
        Ok(Self {
            sampler: state.driver.create_sampler(&desc)?,
        })
    }
}

/// `base..base + count` within `total`, resolving the `REMAINING_*` sentinel
fn span(what: &str, base: u32, count: u32, total: u32) -> VulkanResult<Range<u32>> {
    let count = if count == vk::REMAINING_MIP_LEVELS {
        total.saturating_sub(base)
    } else {
        count
    };
    match base.checked_add(count) {
        Some(end) if count > 0 && end <= total => Ok(base..end),
        _ => Err(VulkanError::contract(format!(
            "{what}s {base}..{base}+{count} exceed the image's {total}"
        ))),
    }
}
