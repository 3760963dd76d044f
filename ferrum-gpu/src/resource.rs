use std::fmt;
use std::sync::Arc;

use ash::vk::{self, Handle as _};
use gpu_alloc::{MemoryBlock, Request};
use gpu_alloc_ash::AshMemoryDevice;
use parking_lot::Mutex;

use crate::conv;
use crate::device::DeviceShared;
use crate::{map_alloc_error, DeviceError};

/// Monotonic identity of a buffer or texture, unique among live resources
/// and recycled through a free list on destruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u32);

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

pub struct Buffer {
    shared: Arc<DeviceShared>,
    raw: vk::Buffer,
    block: Option<Mutex<MemoryBlock<vk::DeviceMemory>>>,
    resource_id: ResourceId,
    desc: fe::BufferDesc,
}

impl Buffer {
    pub(crate) fn create(
        shared: &Arc<DeviceShared>,
        label: &str,
        desc: &fe::BufferDesc,
    ) -> Result<Self, fe::ErrorKind> {
        profiling::scope!("Buffer::create");

        if desc.size == 0 {
            return Err(fe::ErrorKind::InvalidArgument("buffer size must be non-zero"));
        }
        if desc.bind_flags.is_empty() {
            return Err(fe::ErrorKind::InvalidArgument("buffer needs at least one bind flag"));
        }

        let create_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(conv::map_buffer_usage(desc.bind_flags))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { shared.raw.create_buffer(&create_info, None) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        let requirements = unsafe { shared.raw.get_buffer_memory_requirements(raw) };
        let block = unsafe {
            shared.mem_allocator.lock().alloc(
                AshMemoryDevice::wrap(&shared.raw),
                Request {
                    size: requirements.size,
                    align_mask: requirements.alignment - 1,
                    usage: conv::map_memory_usage(desc.usage),
                    memory_types: requirements.memory_type_bits,
                },
            )
        }
        .map_err(|error| {
            unsafe { shared.raw.destroy_buffer(raw, None) };
            map_alloc_error(error)
        })?;

        unsafe {
            shared
                .raw
                .bind_buffer_memory(raw, *block.memory(), block.offset())
        }
        .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        shared.set_object_name(vk::ObjectType::BUFFER, raw.as_raw(), label);

        Ok(Self {
            shared: Arc::clone(shared),
            raw,
            block: Some(Mutex::new(block)),
            resource_id: ResourceId(shared.resource_ids.allocate()),
            desc: desc.clone(),
        })
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn desc(&self) -> &fe::BufferDesc {
        &self.desc
    }

    pub(crate) fn raw(&self) -> vk::Buffer {
        self.raw
    }

    /// # Safety
    ///
    /// - The buffer handle must not be manually destroyed
    pub unsafe fn raw_handle(&self) -> vk::Buffer {
        self.raw
    }

    /// Writes `data` at `offset` without synchronization. Legal only for
    /// host-visible usages; device-only buffers go through the async copy
    /// queue.
    pub fn update_data(&self, data: &[u8], offset: u64) -> Result<(), fe::ErrorKind> {
        if self.desc.usage == fe::ResourceUsage::DeviceOnly {
            return Err(fe::ErrorKind::InvalidArgument(
                "update_data requires a host-visible usage",
            ));
        }
        if offset + data.len() as u64 > self.desc.size {
            return Err(fe::ErrorKind::InvalidArgument("update_data out of bounds"));
        }

        let mut block = self.block.as_ref().unwrap().lock();
        unsafe {
            block
                .write_bytes(AshMemoryDevice::wrap(&self.shared.raw), offset, data)
                .map_err(|_| fe::ErrorKind::UnknownError)
        }
    }

    /// Reads back `data.len()` bytes at `offset`; requires random-access
    /// usage.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> Result<(), fe::ErrorKind> {
        if self.desc.usage != fe::ResourceUsage::HostRandomAccess {
            return Err(fe::ErrorKind::InvalidArgument(
                "read_data requires random-access usage",
            ));
        }
        if offset + data.len() as u64 > self.desc.size {
            return Err(fe::ErrorKind::InvalidArgument("read_data out of bounds"));
        }

        let mut block = self.block.as_ref().unwrap().lock();
        unsafe {
            block
                .read_bytes(AshMemoryDevice::wrap(&self.shared.raw), offset, data)
                .map_err(|_| fe::ErrorKind::UnknownError)
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.shared.resource_ids.release(self.resource_id.0);
        unsafe {
            self.shared.raw.destroy_buffer(self.raw, None);
            if let Some(block) = self.block.take() {
                self.shared
                    .mem_allocator
                    .lock()
                    .dealloc(AshMemoryDevice::wrap(&self.shared.raw), block.into_inner());
            }
        }
    }
}

#[derive(Clone, Copy)]
struct ViewCacheEntry {
    key: u32,
    view: vk::ImageView,
}

pub struct Texture {
    shared: Arc<DeviceShared>,
    raw: vk::Image,
    /// `None` for swapchain images, which the presentation engine owns.
    block: Option<Mutex<MemoryBlock<vk::DeviceMemory>>>,
    owns_image: bool,
    resource_id: ResourceId,
    desc: fe::TextureDesc,
    default_view: vk::ImageView,
    whole_subresource: fe::Subresource,
    /// Sorted by key; append + reshuffle on miss. The cache is small and
    /// read-dominated, so no tree.
    view_cache: Mutex<Vec<ViewCacheEntry>>,
}

fn create_view(
    shared: &DeviceShared,
    image: vk::Image,
    desc: &fe::TextureDesc,
    subresource: fe::Subresource,
) -> Result<vk::ImageView, DeviceError> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .format(conv::map_format(desc.format))
        .view_type(conv::map_image_view_type(
            desc.dimension,
            desc.array_size > 1,
        ))
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: conv::map_aspect_flags(desc.format),
            base_mip_level: u32::from(subresource.most_detailed_mip),
            level_count: u32::from(subresource.mip_count),
            base_array_layer: u32::from(subresource.first_array_slice),
            layer_count: u32::from(subresource.array_size),
        });
    Ok(unsafe { shared.raw.create_image_view(&create_info, None)? })
}

impl Texture {
    pub(crate) fn create(
        shared: &Arc<DeviceShared>,
        label: &str,
        desc: &fe::TextureDesc,
    ) -> Result<Self, fe::ErrorKind> {
        profiling::scope!("Texture::create");

        fe::validate_texture_desc(desc)?;

        let mut flags = vk::ImageCreateFlags::empty();
        if desc.dimension == fe::TextureDimension::Cube {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        let create_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(conv::map_image_type(desc.dimension))
            .format(conv::map_format(desc.format))
            .extent(conv::map_extent(desc.extent()))
            .mip_levels(desc.mip_count)
            .array_layers(desc.array_size)
            .samples(vk::SampleCountFlags::from_raw(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(conv::map_image_usage(desc.bind_flags))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw = unsafe { shared.raw.create_image(&create_info, None) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        let requirements = unsafe { shared.raw.get_image_memory_requirements(raw) };
        let block = unsafe {
            shared.mem_allocator.lock().alloc(
                AshMemoryDevice::wrap(&shared.raw),
                Request {
                    size: requirements.size,
                    align_mask: requirements.alignment - 1,
                    usage: conv::map_memory_usage(desc.usage),
                    memory_types: requirements.memory_type_bits,
                },
            )
        }
        .map_err(|error| {
            unsafe { shared.raw.destroy_image(raw, None) };
            map_alloc_error(error)
        })?;

        unsafe {
            shared
                .raw
                .bind_image_memory(raw, *block.memory(), block.offset())
        }
        .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        shared.set_object_name(vk::ObjectType::IMAGE, raw.as_raw(), label);

        let whole_subresource = fe::Subresource::whole(desc);
        let default_view = create_view(shared, raw, desc, whole_subresource)
            .map_err(fe::ErrorKind::from)?;

        Ok(Self {
            shared: Arc::clone(shared),
            raw,
            block: Some(Mutex::new(block)),
            owns_image: true,
            resource_id: ResourceId(shared.resource_ids.allocate()),
            desc: desc.clone(),
            default_view,
            whole_subresource,
            view_cache: Mutex::new(Vec::new()),
        })
    }

    /// Wraps an image owned elsewhere (a swapchain) in the resource model.
    pub(crate) fn from_raw_image(
        shared: &Arc<DeviceShared>,
        raw: vk::Image,
        desc: &fe::TextureDesc,
    ) -> Result<Self, fe::ErrorKind> {
        let whole_subresource = fe::Subresource::whole(desc);
        let default_view = create_view(shared, raw, desc, whole_subresource)
            .map_err(fe::ErrorKind::from)?;
        Ok(Self {
            shared: Arc::clone(shared),
            raw,
            block: None,
            owns_image: false,
            resource_id: ResourceId(shared.resource_ids.allocate()),
            desc: desc.clone(),
            default_view,
            whole_subresource,
            view_cache: Mutex::new(Vec::new()),
        })
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn desc(&self) -> &fe::TextureDesc {
        &self.desc
    }

    pub(crate) fn raw(&self) -> vk::Image {
        self.raw
    }

    /// # Safety
    ///
    /// - The image handle must not be manually destroyed
    pub unsafe fn raw_handle(&self) -> vk::Image {
        self.raw
    }

    /// The view covering the whole image.
    pub fn default_view(&self) -> vk::ImageView {
        self.default_view
    }

    /// Returns the view of `subresource`, creating and memoizing it on
    /// first request. The whole-image subresource maps to the default view
    /// and never enters the cache. Views live until the texture dies.
    pub fn get_subresource_view(&self, subresource: fe::Subresource) -> vk::ImageView {
        profiling::scope!("Texture::get_subresource_view");

        let key = subresource.to_bits();
        if key == self.whole_subresource.to_bits() {
            return self.default_view;
        }

        assert!(
            u32::from(subresource.first_array_slice) + u32::from(subresource.array_size)
                <= self.desc.array_size,
            "subresource array range out of bounds"
        );
        assert!(
            u32::from(subresource.most_detailed_mip) + u32::from(subresource.mip_count)
                <= self.desc.mip_count,
            "subresource mip range out of bounds"
        );

        let mut cache = self.view_cache.lock();
        match cache.binary_search_by_key(&key, |entry| entry.key) {
            Ok(index) => cache[index].view,
            Err(index) => {
                let view = create_view(&self.shared, self.raw, &self.desc, subresource)
                    .expect("image view creation failed");
                cache.insert(index, ViewCacheEntry { key, view });
                view
            }
        }
    }

    /// Number of memoized non-default views.
    pub fn cached_view_count(&self) -> usize {
        self.view_cache.lock().len()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.shared.resource_ids.release(self.resource_id.0);
        unsafe {
            for entry in self.view_cache.get_mut().drain(..) {
                self.shared.raw.destroy_image_view(entry.view, None);
            }
            self.shared.raw.destroy_image_view(self.default_view, None);

            if self.owns_image {
                self.shared.raw.destroy_image(self.raw, None);
            }
            if let Some(block) = self.block.take() {
                self.shared
                    .mem_allocator
                    .lock()
                    .dealloc(AshMemoryDevice::wrap(&self.shared.raw), block.into_inner());
            }
        }
    }
}
