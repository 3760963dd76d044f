use std::collections::VecDeque;
use std::ffi::CStr;
use std::sync::Arc;

use ash::{extensions::khr, vk};
use gpu_alloc::{Config, GpuAllocator};
use gpu_alloc_ash::AshMemoryDevice;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::conv;
use crate::fence::{Fence, FenceSyncPoint};
use crate::instance::InstanceShared;
use crate::pool::IdPool;
use crate::resource::{Buffer, Texture};
use crate::DeviceError;

pub(crate) struct QueueFamily {
    pub family_index: u32,
    pub kind: fe::QueueKind,
    pub command_pool: Mutex<vk::CommandPool>,
}

/// One hardware queue of the device. Submission is internally synchronized.
pub struct Queue {
    shared: Arc<DeviceShared>,
    raw: Mutex<vk::Queue>,
    family_index: u32,
    kind: fe::QueueKind,
}

impl Queue {
    pub fn kind(&self) -> fe::QueueKind {
        self.kind
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Submits command buffers, optionally signaling `fence` with `value`.
    ///
    /// `wait` entries are binary semaphores with the stage their payload is
    /// first consumed at; `signal_binary` semaphores signal alongside the
    /// fence (used by the present path).
    pub fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signal_binary: &[vk::Semaphore],
        signal_fence: Option<(&Fence, u64)>,
    ) -> Result<(), DeviceError> {
        let wait_semaphores: Vec<vk::Semaphore> = wait.iter().map(|&(sem, _)| sem).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            wait.iter().map(|&(_, stage)| stage).collect();

        let mut signal_semaphores: Vec<vk::Semaphore> = signal_binary.to_vec();
        let mut signal_values: Vec<u64> = Vec::new();

        if let Some((fence, value)) = signal_fence {
            fence.note_pending(value);
            // Binary semaphore slots still need a (ignored) value entry.
            signal_values.resize(signal_binary.len(), !0);
            signal_semaphores.push(fence.raw());
            signal_values.push(value);
        }

        let wait_values = vec![0u64; wait_semaphores.len()];

        let mut submit_info = vk::SubmitInfo::builder()
            .command_buffers(command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        let mut timeline_info;
        if !signal_values.is_empty() {
            timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
                .wait_semaphore_values(&wait_values)
                .signal_semaphore_values(&signal_values);
            submit_info = submit_info.push_next(&mut timeline_info);
        }

        profiling::scope!("vkQueueSubmit");
        let raw = self.raw.lock();
        unsafe {
            self.shared
                .raw
                .queue_submit(*raw, &[submit_info.build()], vk::Fence::null())?;
        }
        Ok(())
    }

    pub(crate) fn with_raw<T>(&self, f: impl FnOnce(vk::Queue) -> T) -> T {
        let raw = self.raw.lock();
        f(*raw)
    }
}

pub(crate) struct DeviceShared {
    pub raw: ash::Device,
    pub instance: Arc<InstanceShared>,
    pub physical_device: vk::PhysicalDevice,
    pub families: Vec<QueueFamily>,
    pub mem_allocator: Mutex<GpuAllocator<vk::DeviceMemory>>,
    sampler_cache: Mutex<FxHashMap<fe::SamplerState, vk::Sampler>>,
    pub resource_ids: IdPool,
    pub limits: vk::PhysicalDeviceLimits,
}

impl DeviceShared {
    pub fn queue_family_index(&self, kind: fe::QueueKind) -> u32 {
        self.families
            .iter()
            .find(|family| family.kind == kind)
            .map(|family| family.family_index)
            // Queue classes fall back to graphics when the hardware has no
            // dedicated family.
            .unwrap_or_else(|| self.families[0].family_index)
    }

    /// Samplers are keyed by state bits, created on first use and destroyed
    /// only with the device.
    pub fn get_sampler(&self, state: fe::SamplerState) -> Result<vk::Sampler, DeviceError> {
        let mut cache = self.sampler_cache.lock();
        if let Some(&sampler) = cache.get(&state) {
            return Ok(sampler);
        }

        let mut create_info = vk::SamplerCreateInfo::builder()
            .min_filter(conv::map_filter(state.min_filter))
            .mag_filter(conv::map_filter(state.mag_filter))
            .mipmap_mode(conv::map_mip_filter(state.mip_filter))
            .address_mode_u(conv::map_address_mode(state.address_mode))
            .address_mode_v(conv::map_address_mode(state.address_mode))
            .address_mode_w(conv::map_address_mode(state.address_mode))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        if state.anisotropy != fe::Anisotropy::None {
            create_info = create_info
                .anisotropy_enable(true)
                .max_anisotropy(state.anisotropy.max_level() as f32);
        }
        if let Some(compare_op) = state.compare_op {
            create_info = create_info
                .compare_enable(true)
                .compare_op(conv::map_compare_op(compare_op));
        }

        let sampler = unsafe { self.raw.create_sampler(&create_info, None)? };
        cache.insert(state, sampler);
        Ok(sampler)
    }

    /// Attaches a debug name when the debug runtime is active.
    pub fn set_object_name(&self, object_type: vk::ObjectType, handle: u64, name: &str) {
        let Some(debug_utils) = self.instance.debug_utils.as_ref() else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(object_type)
            .object_handle(handle)
            .object_name(&name);
        let _ = unsafe {
            debug_utils
                .extension
                .set_debug_utils_object_name(self.raw.handle(), &name_info)
        };
    }

    pub fn allocate_command_buffer(
        &self,
        kind: fe::QueueKind,
    ) -> Result<vk::CommandBuffer, DeviceError> {
        let family = self
            .families
            .iter()
            .find(|family| family.kind == kind)
            .unwrap_or(&self.families[0]);
        let pool = family.command_pool.lock();
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.raw.allocate_command_buffers(&allocate_info)? };
        Ok(buffers[0])
    }

    pub fn free_command_buffer(&self, kind: fe::QueueKind, command_buffer: vk::CommandBuffer) {
        let family = self
            .families
            .iter()
            .find(|family| family.kind == kind)
            .unwrap_or(&self.families[0]);
        let pool = family.command_pool.lock();
        unsafe { self.raw.free_command_buffers(*pool, &[command_buffer]) };
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            for (_, sampler) in self.sampler_cache.get_mut().drain() {
                self.raw.destroy_sampler(sampler, None);
            }
            for family in &self.families {
                self.raw.destroy_command_pool(*family.command_pool.lock(), None);
            }
            self.mem_allocator
                .get_mut()
                .cleanup(AshMemoryDevice::wrap(&self.raw));
            self.raw.destroy_device(None);
        }
    }
}

struct PendingRetire {
    sync: FenceSyncPoint,
    _payload: Box<dyn Send>,
}

/// The GPU context: queues, global caches and the deferred-destruction
/// authority for every object it creates.
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
    queues: Arc<Vec<Arc<Queue>>>,
    retire_queue: Arc<Mutex<VecDeque<PendingRetire>>>,
}

/// Greedy classification: the first family covering a class claims it, one
/// family per class.
fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Vec<(u32, fe::QueueKind)> {
    let properties =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let graphics_bits =
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
    let compute_bits = vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
    let transfer_bits = vk::QueueFlags::TRANSFER;

    let mut selected: Vec<(u32, fe::QueueKind)> = Vec::new();
    let has_kind =
        |selected: &[(u32, fe::QueueKind)], kind| selected.iter().any(|&(_, k)| k == kind);

    for (index, family) in properties.iter().enumerate() {
        let index = index as u32;
        if family.queue_flags.contains(graphics_bits)
            && !has_kind(&selected, fe::QueueKind::Graphics)
        {
            selected.push((index, fe::QueueKind::Graphics));
        } else if family.queue_flags.contains(compute_bits)
            && !has_kind(&selected, fe::QueueKind::Compute)
        {
            selected.push((index, fe::QueueKind::Compute));
        } else if family.queue_flags.contains(transfer_bits)
            && !has_kind(&selected, fe::QueueKind::Transfer)
        {
            selected.push((index, fe::QueueKind::Transfer));
        }
    }
    selected
}

impl Device {
    pub(crate) fn new(
        instance: Arc<InstanceShared>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, fe::ErrorKind> {
        profiling::scope!("Device::new");

        let properties = unsafe { instance.raw.get_physical_device_properties(physical_device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Creating Vulkan device on GPU: {}...",
            device_name.to_string_lossy()
        );

        let selected_families = find_queue_families(&instance.raw, physical_device);
        if !selected_families
            .iter()
            .any(|&(_, kind)| kind == fe::QueueKind::Graphics)
        {
            return Err(fe::ErrorKind::NotSupported);
        }

        let available_extensions = unsafe {
            instance
                .raw
                .enumerate_device_extension_properties(physical_device)
        }
        .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;
        let has_extension = |name: &CStr| {
            available_extensions
                .iter()
                .any(|properties| unsafe { CStr::from_ptr(properties.extension_name.as_ptr()) } == name)
        };

        let mut extensions: Vec<*const i8> = Vec::new();
        if has_extension(khr::Swapchain::name()) {
            extensions.push(khr::Swapchain::name().as_ptr());
        } else {
            log::warn!("VK_KHR_swapchain is not available; presentation is disabled");
        }

        // Required feature set: timeline sync, bindless indexing, sync2 and
        // dynamic rendering. A device without them is not usable by the core.
        let mut supported12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut supported13 = vk::PhysicalDeviceVulkan13Features::default();
        let sampler_anisotropy;
        {
            let mut supported = vk::PhysicalDeviceFeatures2::builder()
                .push_next(&mut supported12)
                .push_next(&mut supported13);
            unsafe {
                instance
                    .raw
                    .get_physical_device_features2(physical_device, &mut supported)
            };
            sampler_anisotropy = supported.features.sampler_anisotropy == vk::TRUE;
        }

        if supported12.timeline_semaphore == vk::FALSE
            || supported12.descriptor_indexing == vk::FALSE
            || supported12.descriptor_binding_partially_bound == vk::FALSE
            || supported12.descriptor_binding_variable_descriptor_count == vk::FALSE
            || supported12.descriptor_binding_sampled_image_update_after_bind == vk::FALSE
            || supported12.runtime_descriptor_array == vk::FALSE
            || supported13.synchronization2 == vk::FALSE
            || supported13.dynamic_rendering == vk::FALSE
        {
            log::error!("required Vulkan 1.2/1.3 features are missing on this adapter");
            return Err(fe::ErrorKind::NotSupported);
        }

        let scalar_block_layout = supported12.scalar_block_layout == vk::TRUE;

        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
            .timeline_semaphore(true)
            .scalar_block_layout(scalar_block_layout)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
            .synchronization2(true)
            .dynamic_rendering(true);
        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(sampler_anisotropy);

        let queue_priority = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = selected_families
            .iter()
            .map(|&(family_index, _)| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family_index)
                    .queue_priorities(&queue_priority)
                    .build()
            })
            .collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let raw = unsafe {
            instance
                .raw
                .create_device(physical_device, &create_info, None)
        }
        .map_err(|error| {
            log::error!("vkCreateDevice failed: {error}");
            fe::ErrorKind::from(DeviceError::from(error))
        })?;

        let families: Vec<QueueFamily> = selected_families
            .iter()
            .map(|&(family_index, kind)| {
                let pool_info = vk::CommandPoolCreateInfo::builder()
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                    .queue_family_index(family_index);
                let command_pool = unsafe { raw.create_command_pool(&pool_info, None) }
                    .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;
                Ok(QueueFamily {
                    family_index,
                    kind,
                    command_pool: Mutex::new(command_pool),
                })
            })
            .collect::<Result<_, fe::ErrorKind>>()?;

        let allocator_properties = unsafe {
            gpu_alloc_ash::device_properties(&instance.raw, vk::API_VERSION_1_3, physical_device)
        }
        .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;
        let mem_allocator =
            GpuAllocator::new(Config::i_am_prototyping(), allocator_properties);

        let shared = Arc::new(DeviceShared {
            raw,
            instance,
            physical_device,
            families,
            mem_allocator: Mutex::new(mem_allocator),
            sampler_cache: Mutex::new(FxHashMap::default()),
            resource_ids: IdPool::new(),
            limits: properties.limits,
        });

        let queues = shared
            .families
            .iter()
            .map(|family| {
                let raw_queue = unsafe { shared.raw.get_device_queue(family.family_index, 0) };
                Arc::new(Queue {
                    shared: Arc::clone(&shared),
                    raw: Mutex::new(raw_queue),
                    family_index: family.family_index,
                    kind: family.kind,
                })
            })
            .collect();

        Ok(Self {
            shared,
            queues: Arc::new(queues),
            retire_queue: Arc::new(Mutex::new(VecDeque::new())),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    pub(crate) fn raw(&self) -> &ash::Device {
        &self.shared.raw
    }

    /// The queue serving `kind`, falling back to the graphics queue when
    /// the hardware has no dedicated family.
    pub fn get_command_queue(&self, kind: fe::QueueKind) -> Arc<Queue> {
        self.queues
            .iter()
            .find(|queue| queue.kind == kind)
            .or_else(|| self.queues.first())
            .map(Arc::clone)
            .expect("device has no queues")
    }

    pub fn create_fence(&self, initial_value: u64) -> Result<Arc<Fence>, fe::ErrorKind> {
        Fence::new(Arc::clone(&self.shared), initial_value)
            .map(Arc::new)
            .map_err(fe::ErrorKind::from)
    }

    pub fn create_buffer(
        &self,
        label: &str,
        desc: &fe::BufferDesc,
    ) -> Result<Arc<Buffer>, fe::ErrorKind> {
        Buffer::create(&self.shared, label, desc).map(Arc::new)
    }

    pub fn create_texture(
        &self,
        label: &str,
        desc: &fe::TextureDesc,
    ) -> Result<Arc<Texture>, fe::ErrorKind> {
        Texture::create(&self.shared, label, desc).map(Arc::new)
    }

    pub fn get_sampler(&self, state: fe::SamplerState) -> Result<ash::vk::Sampler, fe::ErrorKind> {
        self.shared.get_sampler(state).map_err(fe::ErrorKind::from)
    }

    /// Keeps `payload` alive until the GPU passes `sync`, then drops it on
    /// the next [`Self::end_frame`].
    pub fn retire(&self, sync: FenceSyncPoint, payload: impl Send + 'static) {
        self.retire_queue.lock().push_back(PendingRetire {
            sync,
            _payload: Box::new(payload),
        });
    }

    /// Frame-end maintenance: drops retired payloads whose sync point the
    /// GPU has reached. The queue is in-order, so draining stops at the
    /// first unreached entry.
    pub fn end_frame(&self) {
        let mut retired = self.retire_queue.lock();
        while let Some(front) = retired.front() {
            if !front.sync.is_reached() {
                break;
            }
            retired.pop_front();
        }
    }

    /// Drains all queues and force-releases the pending deferred-destruction
    /// queue. Reserved for shutdown and device-global reconfiguration.
    pub fn wait_idle(&self) {
        profiling::scope!("Device::wait_idle");
        unsafe {
            let _ = self.shared.raw.device_wait_idle();
        }
        self.retire_queue.lock().clear();
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Only the last clone drains; earlier drops must leave the context
        // intact for the remaining owners.
        if Arc::strong_count(&self.queues) == 1 {
            self.wait_idle();
        }
    }
}
