//! Surfaces and swapchains
//!
//! A legacy context has exactly one back buffer per drawable, so swapchain
//! images are placeholders: every image stands for the window's default
//! framebuffer and presenting swaps the context's buffers. Acquiring an image
//! makes the surface the context's drawable.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::backends::NativeSurface;
use crate::core::device::Device;
use crate::core::dispatch::{KHR_SURFACE, KHR_SWAPCHAIN};
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::info::{PresentInfo, SurfaceCreateInfo, SwapchainCreateInfo};
use crate::core::instance::Instance;
use crate::core::resource::ImageObject;

/// Fewest images a swapchain is created with
pub const MIN_IMAGE_COUNT: u32 = 2;
/// Most images a swapchain is created with
pub const MAX_IMAGE_COUNT: u32 = 3;

const SURFACE_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::B8G8R8A8_SRGB];
const PRESENT_MODES: [vk::PresentModeKHR; 2] = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

/// One `VkSurfaceKHR`
#[derive(Debug)]
pub struct SurfaceObject {
    /// Platform drawable
    pub native: NativeSurface,
}

/// One `VkSwapchainKHR`
#[derive(Debug)]
pub struct SwapchainObject {
    /// Drawable presented to
    pub surface: NativeSurface,
    /// Placeholder images, in index order
    pub images: Vec<vk::Image>,
    /// Image format
    pub format: vk::Format,
    /// Extent the swapchain was created for
    pub extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    inner: Mutex<SwapchainState>,
}

#[derive(Debug)]
struct SwapchainState {
    next: usize,
    acquired: Vec<bool>,
    retired: bool,
}

impl SwapchainObject {
    /// Whether a newer swapchain replaced this one
    pub fn is_retired(&self) -> bool {
        self.inner.lock().retired
    }

    /// Requested presentation mode
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    fn retire(&self) {
        self.inner.lock().retired = true;
    }

    /// Next image not held by the application, round robin
    fn acquire(&self) -> VulkanResult<u32> {
        let mut inner = self.inner.lock();
        if inner.retired {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        let count = inner.acquired.len();
        let index = (0..count)
            .map(|step| (inner.next + step) % count)
            .find(|index| !inner.acquired[*index])
            .ok_or_else(|| VulkanError::contract("every swapchain image is already acquired"))?;
        inner.acquired[index] = true;
        inner.next = (index + 1) % count;
        Ok(index as u32)
    }

    fn release(&self, index: u32) -> VulkanResult<()> {
        let mut inner = self.inner.lock();
        match inner.acquired.get_mut(index as usize) {
            Some(held) if *held => {
                *held = false;
                Ok(())
            }
            Some(_) => Err(VulkanError::contract(format!(
                "presenting image {index}, which was not acquired"
            ))),
            None => Err(VulkanError::contract(format!(
                "swapchain has no image {index}"
            ))),
        }
    }
}

impl Instance {
    fn surface(&self, surface: vk::SurfaceKHR) -> VulkanResult<Arc<SurfaceObject>> {
        self.shared.surfaces.get(surface)
    }

    /// Platform `vkCreate*SurfaceKHR`
    pub fn create_surface(&self, info: &SurfaceCreateInfo) -> VulkanResult<vk::SurfaceKHR> {
        self.require_extension(KHR_SURFACE)?;
        let native = self.shared.platform.create_surface(info.display, info.window)?;
        log::debug!("Created surface {}", native.token);
        Ok(self.shared.surfaces.insert(SurfaceObject { native }))
    }

    /// `vkDestroySurfaceKHR`
    pub fn destroy_surface(&self, surface: vk::SurfaceKHR) -> VulkanResult<()> {
        if surface == vk::SurfaceKHR::null() {
            return Ok(());
        }
        let surface = self.shared.surfaces.remove(surface)?;
        self.shared.platform.destroy_surface(surface.native);
        Ok(())
    }

    /// `vkGetPhysicalDeviceSurfaceSupportKHR`; the single queue family presents
    pub fn get_physical_device_surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<bool> {
        self.physical_device(physical_device)?;
        self.surface(surface)?;
        Ok(queue_family_index == 0)
    }

    /// `vkGetPhysicalDeviceSurfaceCapabilitiesKHR`
    pub fn get_physical_device_surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        self.physical_device(physical_device)?;
        let surface = self.surface(surface)?;
        let extent = self.shared.platform.surface_extent(surface.native)?;
        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: MIN_IMAGE_COUNT,
            max_image_count: MAX_IMAGE_COUNT,
            current_extent: extent,
            min_image_extent: extent,
            max_image_extent: extent,
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
        })
    }

    /// `vkGetPhysicalDeviceSurfaceFormatsKHR`
    pub fn get_physical_device_surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        self.physical_device(physical_device)?;
        self.surface(surface)?;
        Ok(SURFACE_FORMATS
            .iter()
            .map(|format| vk::SurfaceFormatKHR {
                format: *format,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            })
            .collect())
    }

    /// `vkGetPhysicalDeviceSurfacePresentModesKHR`
    pub fn get_physical_device_surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        self.physical_device(physical_device)?;
        self.surface(surface)?;
        Ok(PRESENT_MODES.to_vec())
    }
}

impl Device {
    fn require_swapchain(&self) -> VulkanResult<()> {
        if self.is_extension_enabled(KHR_SWAPCHAIN) {
            Ok(())
        } else {
            Err(VulkanError::ExtensionNotPresent(format!(
                "{KHR_SWAPCHAIN} is not enabled"
            )))
        }
    }

    /// `vkCreateSwapchainKHR`. A non-null `old_swapchain` is retired; its
    /// images stay valid until it is destroyed.
    pub fn create_swapchain(&self, info: &SwapchainCreateInfo) -> VulkanResult<vk::SwapchainKHR> {
        self.guard(|| {
            self.require_swapchain()?;
            let instance = self.instance();
            let surface = instance.shared.surfaces.get(info.surface)?;
            if !SURFACE_FORMATS.contains(&info.image_format)
                || info.image_color_space != vk::ColorSpaceKHR::SRGB_NONLINEAR
            {
                return Err(VulkanError::contract(format!(
                    "surface does not support {:?} in {:?}",
                    info.image_format, info.image_color_space
                )));
            }
            if !PRESENT_MODES.contains(&info.present_mode) {
                return Err(VulkanError::contract(format!(
                    "present mode {:?} is not supported",
                    info.present_mode
                )));
            }
            if info.image_array_layers != 1 {
                return Err(VulkanError::contract("swapchain images have exactly one layer"));
            }
            if info.min_image_count > MAX_IMAGE_COUNT {
                return Err(VulkanError::contract(format!(
                    "{} images requested, at most {MAX_IMAGE_COUNT} supported",
                    info.min_image_count
                )));
            }
            let current = instance.shared.platform.surface_extent(surface.native)?;
            if info.image_extent != current {
                return Err(VulkanError::contract(format!(
                    "swapchain extent {}x{} does not match the surface's {}x{}",
                    info.image_extent.width, info.image_extent.height, current.width, current.height
                )));
            }

            if info.old_swapchain != vk::SwapchainKHR::null() {
                self.shared.objects.swapchains.get(info.old_swapchain)?.retire();
            }

            let count = info.min_image_count.max(MIN_IMAGE_COUNT);
            let images = (0..count)
                .map(|_| {
                    ImageObject::backbuffer(info.image_format, info.image_extent, info.image_usage)
                        .map(|image| self.shared.objects.images.insert(image))
                })
                .collect::<VulkanResult<Vec<_>>>()?;
            log::info!(
                "Created swapchain: {} images, {}x{}, {:?}",
                count,
                info.image_extent.width,
                info.image_extent.height,
                info.present_mode
            );
            Ok(self.shared.objects.swapchains.insert(SwapchainObject {
                surface: surface.native,
                images,
                format: info.image_format,
                extent: info.image_extent,
                present_mode: info.present_mode,
                inner: Mutex::new(SwapchainState {
                    next: 0,
                    acquired: vec![false; count as usize],
                    retired: false,
                }),
            }))
        })
    }

    /// `vkDestroySwapchainKHR`; the placeholder images go with it
    pub fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<()> {
        if swapchain == vk::SwapchainKHR::null() {
            return Ok(());
        }
        self.guard(|| {
            let swapchain = self.shared.objects.swapchains.remove(swapchain)?;
            for image in &swapchain.images {
                self.shared.objects.images.remove(*image)?;
            }
            Ok(())
        })
    }

    /// `vkGetSwapchainImagesKHR`
    pub fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        self.guard(|| Ok(self.shared.objects.swapchains.get(swapchain)?.images.clone()))
    }

    /// `vkAcquireNextImageKHR`. Returns the image index and whether the
    /// swapchain is suboptimal; an image is always available at once, so
    /// `timeout` only matters when every image is held.
    pub fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VulkanResult<(u32, bool)> {
        self.guard(|| {
            let objects = &self.shared.objects;
            let swapchain = objects.swapchains.get(swapchain)?;
            let semaphore = (semaphore != vk::Semaphore::null())
                .then(|| objects.semaphores.get(semaphore))
                .transpose()?;
            let fence = (fence != vk::Fence::null())
                .then(|| objects.fences.get(fence))
                .transpose()?;
            if semaphore.is_none() && fence.is_none() {
                return Err(VulkanError::contract(
                    "vkAcquireNextImageKHR needs a semaphore or a fence",
                ));
            }
            if fence.as_ref().is_some_and(|fence| fence.is_signaled()) {
                return Err(VulkanError::contract("acquire fence is already signaled"));
            }

            let extent = self
                .instance()
                .shared
                .platform
                .surface_extent(swapchain.surface)?;
            if extent != swapchain.extent {
                log::debug!(
                    "Surface resized to {}x{}, swapchain is out of date",
                    extent.width,
                    extent.height
                );
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR));
            }

            let index = swapchain.acquire()?;
            let lock = self.shared.context.lock()?;
            lock.with_provider(|provider| provider.set_drawable(Some(swapchain.surface)))?;
            drop(lock);

            if let Some(semaphore) = semaphore {
                semaphore.signal();
            }
            if let Some(fence) = fence {
                fence.signal();
            }
            log::trace!("Acquired swapchain image {index}");
            Ok((index, false))
        })
    }

    /// `vkQueuePresentKHR`. Returns `SUBOPTIMAL_KHR` when a surface changed
    /// size since its swapchain was created.
    pub fn queue_present(&self, queue: vk::Queue, info: &PresentInfo<'_>) -> VulkanResult<vk::Result> {
        self.guard(|| {
            Self::check_queue(queue)?;
            if info.swapchains.len() != info.image_indices.len() {
                return Err(VulkanError::contract(format!(
                    "{} swapchains with {} image indices",
                    info.swapchains.len(),
                    info.image_indices.len()
                )));
            }
            let objects = &self.shared.objects;
            let waits = info
                .wait_semaphores
                .iter()
                .map(|semaphore| objects.semaphores.get(*semaphore))
                .collect::<VulkanResult<Vec<_>>>()?;
            if waits.iter().any(|semaphore| !semaphore.is_signaled()) {
                return Err(VulkanError::contract(
                    "present waits on a semaphore with no pending signal",
                ));
            }
            let swapchains = info
                .swapchains
                .iter()
                .map(|swapchain| objects.swapchains.get(*swapchain))
                .collect::<VulkanResult<Vec<_>>>()?;
            for semaphore in &waits {
                semaphore.consume()?;
            }

            let platform = &self.instance().shared.platform;
            let mut status = vk::Result::SUCCESS;
            let lock = self.shared.context.lock()?;
            for (swapchain, index) in swapchains.iter().zip(info.image_indices) {
                swapchain.release(*index)?;
                if swapchain.is_retired() {
                    return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR));
                }
                lock.with_provider(|provider| {
                    provider.set_drawable(Some(swapchain.surface))?;
                    provider.swap_buffers()
                })?;
                if platform.surface_extent(swapchain.surface)? != swapchain.extent {
                    status = vk::Result::SUBOPTIMAL_KHR;
                }
            }
            drop(lock);
            Ok(status)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::noop::NoopPlatform;
    use crate::backends::Platform;
    use crate::config::EmulatorConfig;
    use crate::core::info::{DeviceCreateInfo, DeviceQueueCreateInfo, FenceCreateInfo, InstanceCreateInfo};
    use raw_window_handle::{RawDisplayHandle, RawWindowHandle, XlibDisplayHandle, XlibWindowHandle};

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 640,
        height: 480,
    };

    fn setup() -> (Instance, Device, vk::SurfaceKHR, Arc<NoopPlatform>) {
        let platform = Arc::new(NoopPlatform::new());
        let instance = Instance::new(&InstanceCreateInfo {
            application_name: "swapchain-test",
            enabled_extensions: &[KHR_SURFACE],
            config: Some(EmulatorConfig::noop()),
            platform: Some(Arc::clone(&platform) as Arc<dyn Platform>),
            ..InstanceCreateInfo::default()
        })
        .unwrap();
        let surface = instance
            .create_surface(&SurfaceCreateInfo {
                display: RawDisplayHandle::Xlib(XlibDisplayHandle::empty()),
                window: RawWindowHandle::Xlib(XlibWindowHandle::empty()),
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
                    enabled_extensions: &[KHR_SWAPCHAIN],
                    ..DeviceCreateInfo::default()
                },
            )
            .unwrap();
        (instance, device, surface, platform)
    }

    fn swapchain_info(surface: vk::SurfaceKHR, old: vk::SwapchainKHR) -> SwapchainCreateInfo {
        SwapchainCreateInfo {
            surface,
            min_image_count: 2,
            image_format: vk::Format::B8G8R8A8_UNORM,
            image_color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            image_extent: EXTENT,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            present_mode: vk::PresentModeKHR::FIFO,
            old_swapchain: old,
        }
    }

    #[test]
    fn test_surface_queries() {
        let (instance, _device, surface, _) = setup();
        let physical = instance.enumerate_physical_devices()[0];
        let caps = instance
            .get_physical_device_surface_capabilities(physical, surface)
            .unwrap();
        assert_eq!(caps.current_extent, EXTENT);
        assert!(instance
            .get_physical_device_surface_support(physical, 0, surface)
            .unwrap());
        assert!(instance
            .get_physical_device_surface_present_modes(physical, surface)
            .unwrap()
            .contains(&vk::PresentModeKHR::FIFO));
    }

    #[test]
    fn test_acquire_and_present_swaps_buffers() {
        let (_instance, device, surface, platform) = setup();
        let swapchain = device
            .create_swapchain(&swapchain_info(surface, vk::SwapchainKHR::null()))
            .unwrap();
        assert_eq!(device.get_swapchain_images(swapchain).unwrap().len(), 2);

        let semaphore = device.create_semaphore().unwrap();
        let (index, suboptimal) = device
            .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
            .unwrap();
        assert_eq!(index, 0);
        assert!(!suboptimal);

        let queue = device.get_device_queue(0, 0).unwrap();
        let status = device
            .queue_present(
                queue,
                &PresentInfo {
                    wait_semaphores: &[semaphore],
                    swapchains: &[swapchain],
                    image_indices: &[index],
                },
            )
            .unwrap();
        assert_eq!(status, vk::Result::SUCCESS);
        assert_eq!(platform.probe().context_counters().swap_buffers, 1);

        // Presenting the same image again without acquiring it is rejected
        let err = device
            .queue_present(
                queue,
                &PresentInfo {
                    swapchains: &[swapchain],
                    image_indices: &[index],
                    ..PresentInfo::default()
                },
            )
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_acquire_round_robins_until_exhausted() {
        let (_instance, device, surface, _) = setup();
        let swapchain = device
            .create_swapchain(&swapchain_info(surface, vk::SwapchainKHR::null()))
            .unwrap();
        let fence = device.create_fence(&FenceCreateInfo::default()).unwrap();
        let first = device
            .acquire_next_image(swapchain, 0, vk::Semaphore::null(), fence)
            .unwrap();
        device.reset_fences(&[fence]).unwrap();
        let second = device
            .acquire_next_image(swapchain, 0, vk::Semaphore::null(), fence)
            .unwrap();
        assert_eq!((first.0, second.0), (0, 1));
        device.reset_fences(&[fence]).unwrap();
        assert!(device
            .acquire_next_image(swapchain, 0, vk::Semaphore::null(), fence)
            .unwrap_err()
            .is_contract_violation());
    }

    #[test]
    fn test_resize_makes_swapchain_out_of_date() {
        let (_instance, device, surface, platform) = setup();
        let old = device
            .create_swapchain(&swapchain_info(surface, vk::SwapchainKHR::null()))
            .unwrap();
        platform.probe().set_surface_extent(vk::Extent2D {
            width: 800,
            height: 600,
        });
        let semaphore = device.create_semaphore().unwrap();
        let err = device
            .acquire_next_image(old, u64::MAX, semaphore, vk::Fence::null())
            .unwrap_err();
        assert_eq!(err.result(), vk::Result::ERROR_OUT_OF_DATE_KHR);

        let mut info = swapchain_info(surface, old);
        info.image_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let new = device.create_swapchain(&info).unwrap();
        assert!(device.shared.objects.swapchains.get(old).unwrap().is_retired());
        device.destroy_swapchain(old).unwrap();
        assert_eq!(device.shared.objects.images.len(), 2);
        assert!(device
            .acquire_next_image(new, u64::MAX, semaphore, vk::Fence::null())
            .is_ok());
    }

    #[test]
    fn test_swapchain_requires_extension() {
        let platform = Arc::new(NoopPlatform::new());
        let instance = Instance::new(&InstanceCreateInfo {
            config: Some(EmulatorConfig::noop()),
            platform: Some(Arc::clone(&platform) as Arc<dyn Platform>),
            ..InstanceCreateInfo::default()
        })
        .unwrap();
        let surface_info = SurfaceCreateInfo {
            display: RawDisplayHandle::Xlib(XlibDisplayHandle::empty()),
            window: RawWindowHandle::Xlib(XlibWindowHandle::empty()),
        };
        assert!(matches!(
            instance.create_surface(&surface_info),
            Err(VulkanError::ExtensionNotPresent(_))
        ));
    }
}
