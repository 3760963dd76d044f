use std::sync::Arc;

use ash::{extensions::khr, vk};
use thiserror::Error;

use crate::conv;
use crate::device::Device;
use crate::instance::InstanceShared;
use crate::resource::Texture;
use crate::DeviceError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SurfaceError {
    /// The swapchain no longer matches the surface; recreate it and any
    /// dependent framebuffers.
    #[error("surface is outdated, needs to be re-created")]
    Outdated,
    #[error("surface was lost")]
    Lost,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A presentable window surface; created through
/// [`crate::Instance::create_surface`].
pub struct Surface {
    raw: vk::SurfaceKHR,
    functor: khr::Surface,
    _instance: Arc<InstanceShared>,
}

impl Surface {
    pub(crate) fn from_raw(
        raw: vk::SurfaceKHR,
        functor: khr::Surface,
        instance: Arc<InstanceShared>,
    ) -> Self {
        Self {
            raw,
            functor,
            _instance: instance,
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.functor.destroy_surface(self.raw, None) };
    }
}

#[derive(Clone, Debug)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub image_count: u32,
    pub vsync: bool,
}

/// One acquired frame: the image to render into and the semaphores the
/// frame submission must wait on / signal.
pub struct SwapchainFrame {
    pub image_index: u32,
    pub texture: Arc<Texture>,
    /// Wait on this before the first write to the image.
    pub image_available: vk::Semaphore,
    /// Signal this from the last submission touching the image; present
    /// waits on it.
    pub render_finished: vk::Semaphore,
}

/// Owns the presentable images and the per-frame semaphore pairs.
pub struct Swapchain {
    device: Device,
    loader: khr::Swapchain,
    raw: vk::SwapchainKHR,
    format: fe::Format,
    extent: vk::Extent2D,
    textures: Vec<Arc<Texture>>,
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    frame_index: usize,
    desc: SwapchainDesc,
}

impl Swapchain {
    pub fn new(
        device: &Device,
        surface: &Surface,
        desc: &SwapchainDesc,
    ) -> Result<Self, fe::ErrorKind> {
        profiling::scope!("Swapchain::new");

        let shared = device.shared();
        let physical_device = shared.physical_device;

        let graphics_family = shared.queue_family_index(fe::QueueKind::Graphics);
        let supported = unsafe {
            surface
                .functor
                .get_physical_device_surface_support(physical_device, graphics_family, surface.raw)
        }
        .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;
        if !supported {
            return Err(fe::ErrorKind::NotSupported);
        }

        let formats = unsafe {
            surface
                .functor
                .get_physical_device_surface_formats(physical_device, surface.raw)
        }
        .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let surface_format = formats
            .iter()
            .copied()
            .find(|format| {
                format.format == preferred.format && format.color_space == preferred.color_space
            })
            .unwrap_or_else(|| {
                log::warn!(
                    "swapchain format {:?} is not supported, using the first supported one",
                    preferred.format
                );
                formats[0]
            });

        let capabilities = unsafe {
            surface
                .functor
                .get_physical_device_surface_capabilities(physical_device, surface.raw)
        }
        .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        let min = capabilities.min_image_extent;
        let max = capabilities.max_image_extent;
        let mut extent = vk::Extent2D {
            width: desc.width.clamp(min.width, max.width),
            height: desc.height.clamp(min.height, max.height),
        };
        if extent.width != desc.width || extent.height != desc.height {
            log::warn!(
                "requested swapchain size ({}, {}) was resized to ({}, {}) according to capabilities",
                desc.width,
                desc.height,
                extent.width,
                extent.height
            );
        }
        if capabilities.current_extent.width != u32::MAX {
            extent = capabilities.current_extent;
        }

        // FIFO is always available; without vsync prefer immediate or
        // mailbox when the driver offers them.
        let mut present_mode = vk::PresentModeKHR::FIFO;
        if !desc.vsync {
            let supported_modes = unsafe {
                surface
                    .functor
                    .get_physical_device_surface_present_modes(physical_device, surface.raw)
            }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;
            for preferred in [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX] {
                if supported_modes.contains(&preferred) {
                    present_mode = preferred;
                    break;
                }
            }
            if present_mode == vk::PresentModeKHR::FIFO {
                log::warn!("v-sync is force enabled, because FIFO is the only supported present mode");
            }
        }

        let image_count = desc
            .image_count
            .max(capabilities.min_image_count)
            .min(if capabilities.max_image_count == 0 {
                u32::MAX
            } else {
                capabilities.max_image_count
            });

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.raw)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let loader = khr::Swapchain::new(&shared.instance.raw, &shared.raw);
        let raw = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        let images = unsafe { loader.get_swapchain_images(raw) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        let format = conv::map_from_vk_format(surface_format.format);
        let texture_desc = fe::TextureDesc {
            dimension: fe::TextureDimension::D2,
            width: extent.width,
            height: extent.height,
            depth: 1,
            mip_count: 1,
            array_size: 1,
            sample_count: 1,
            format,
            bind_flags: fe::ImageBindFlags::COLOR_TARGET | fe::ImageBindFlags::TRANSFER_DST,
            usage: fe::ResourceUsage::DeviceOnly,
        };
        let textures = images
            .into_iter()
            .map(|image| Texture::from_raw_image(shared, image, &texture_desc).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let mut image_available = Vec::with_capacity(textures.len());
        let mut render_finished = Vec::with_capacity(textures.len());
        for _ in 0..textures.len() {
            let info = vk::SemaphoreCreateInfo::builder();
            unsafe {
                image_available.push(
                    shared
                        .raw
                        .create_semaphore(&info, None)
                        .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?,
                );
                render_finished.push(
                    shared
                        .raw
                        .create_semaphore(&info, None)
                        .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?,
                );
            }
        }

        Ok(Self {
            device: device.clone(),
            loader,
            raw,
            format,
            extent,
            textures,
            image_available,
            render_finished,
            frame_index: 0,
            desc: desc.clone(),
        })
    }

    pub fn format(&self) -> fe::Format {
        self.format
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    pub fn image_count(&self) -> u32 {
        self.textures.len() as u32
    }

    pub fn image(&self, index: u32) -> &Arc<Texture> {
        &self.textures[index as usize]
    }

    /// Blocks until an image is available and returns the frame to render.
    /// Advances the internal frame index modulo the image count.
    pub fn acquire_next_image(&mut self) -> Result<SwapchainFrame, SurfaceError> {
        profiling::scope!("Swapchain::acquire_next_image");

        let slot = self.frame_index;
        self.frame_index = (self.frame_index + 1) % self.textures.len();

        let image_available = self.image_available[slot];
        let (image_index, suboptimal) = unsafe {
            self.loader
                .acquire_next_image(self.raw, u64::MAX, image_available, vk::Fence::null())
        }
        .map_err(|error| match error {
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::NOT_READY => SurfaceError::Outdated,
            vk::Result::ERROR_SURFACE_LOST_KHR => SurfaceError::Lost,
            other => SurfaceError::Device(DeviceError::from(other)),
        })?;
        if suboptimal {
            log::warn!("suboptimal acquire of image {image_index}");
        }

        Ok(SwapchainFrame {
            image_index,
            texture: Arc::clone(&self.textures[image_index as usize]),
            image_available,
            render_finished: self.render_finished[slot],
        })
    }

    /// Presents `frame` on the graphics queue, waiting on its
    /// render-finished semaphore.
    pub fn present(&mut self, frame: SwapchainFrame) -> Result<(), SurfaceError> {
        profiling::scope!("Swapchain::present");

        let queue = self.device.get_command_queue(fe::QueueKind::Graphics);
        let wait_semaphores = [frame.render_finished];
        let swapchains = [self.raw];
        let image_indices = [frame.image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = queue
            .with_raw(|raw| unsafe { self.loader.queue_present(raw, &present_info) })
            .map_err(|error| match error {
                vk::Result::ERROR_OUT_OF_DATE_KHR => SurfaceError::Outdated,
                vk::Result::ERROR_SURFACE_LOST_KHR => SurfaceError::Lost,
                other => SurfaceError::Device(DeviceError::from(other)),
            })?;
        if suboptimal {
            log::warn!("suboptimal present of image {}", frame.image_index);
        }
        Ok(())
    }

    /// Tears the swapchain down and rebuilds it at the new size. All
    /// dependent framebuffers and views are invalid afterwards.
    pub fn recreate(
        &mut self,
        surface: &Surface,
        width: u32,
        height: u32,
    ) -> Result<(), fe::ErrorKind> {
        self.desc.width = width;
        self.desc.height = height;
        let desc = self.desc.clone();
        let device = self.device.clone();

        // Emptying first makes dropping the old value a no-op.
        self.release_resources();
        *self = Self::new(&device, surface, &desc)?;
        Ok(())
    }

    /// Waits for the device and destroys the native objects. There is no
    /// portable way to wait for presentation only.
    fn release_resources(&mut self) {
        self.device.wait_idle();
        let shared = self.device.shared();
        unsafe {
            for semaphore in self.image_available.drain(..) {
                shared.raw.destroy_semaphore(semaphore, None);
            }
            for semaphore in self.render_finished.drain(..) {
                shared.raw.destroy_semaphore(semaphore, None);
            }
            self.textures.clear();
            if self.raw != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.raw, None);
                self.raw = vk::SwapchainKHR::null();
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.release_resources();
    }
}
