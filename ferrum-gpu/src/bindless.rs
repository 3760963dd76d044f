//! The frame-recycled bindless descriptor set.
//!
//! Rendering code never creates descriptor sets; it asks for a stable slot
//! index for a sampler state or a `(texture, subresource)` pair and passes
//! those indices to shaders as root constants or in buffers. One batched
//! descriptor update happens per frame in [`BindlessManager::close_frame`].

use std::sync::Arc;

use ash::vk;
use rustc_hash::FxHashMap;

use crate::device::Device;
use crate::fence::{Fence, FenceSyncPoint};
use crate::resource::Texture;
use crate::{DeviceError, MAX_DESCRIPTOR_SETS, SAMPLER_COUNT, TEXTURE_SRV_COUNT};

const SAMPLER_BINDING: u32 = 0;
const TEXTURE_SRV_BINDING: u32 = 1;

/// Per-frame slot bookkeeping: the write vectors and the dedup maps.
#[derive(Default)]
struct DescriptorTable {
    samplers: Vec<vk::Sampler>,
    sampler_infos: Vec<vk::DescriptorImageInfo>,
    image_infos: Vec<vk::DescriptorImageInfo>,
    /// `(resource_id << 32 | subresource_bits)` to descriptor index.
    image_map: FxHashMap<u64, u32>,
}

impl DescriptorTable {
    fn reset(&mut self) {
        self.samplers.clear();
        self.sampler_infos.clear();
        self.image_infos.clear();
        self.image_map.clear();
    }

    fn register_sampler(&mut self, sampler: vk::Sampler) -> u32 {
        for (index, &existing) in self.samplers.iter().enumerate() {
            if existing == sampler {
                return index as u32;
            }
        }

        let index = self.samplers.len() as u32;
        assert!(index < SAMPLER_COUNT, "bindless sampler table is full");
        self.samplers.push(sampler);
        self.sampler_infos.push(vk::DescriptorImageInfo {
            sampler,
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });
        index
    }

    fn register_srv(&mut self, key: u64, view: vk::ImageView) -> u32 {
        if let Some(&index) = self.image_map.get(&key) {
            debug_assert!(
                self.image_infos[index as usize].image_view == view,
                "stale view behind a bindless key"
            );
            return index;
        }

        let index = self.image_infos.len() as u32;
        assert!(index < TEXTURE_SRV_COUNT, "bindless SRV table is full");
        self.image_map.insert(key, index);
        self.image_infos.push(vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });
        index
    }
}

struct RetiredSet {
    set: vk::DescriptorSet,
    fence_value: u64,
}

/// Maintains the single frame-stable descriptor set of samplers and sampled
/// images. Single-threaded caller contract; one instance per device.
pub struct BindlessManager {
    device: Device,
    fence: Arc<Fence>,
    fence_value: u64,
    descriptor_pool: vk::DescriptorPool,
    set_layout: vk::DescriptorSetLayout,
    current_set: vk::DescriptorSet,
    allocated_set_count: u32,
    table: DescriptorTable,
    retired_sets: Vec<RetiredSet>,
}

impl BindlessManager {
    pub fn new(device: &Device) -> Result<Self, fe::ErrorKind> {
        profiling::scope!("BindlessManager::new");

        let shared = device.shared();
        let fence = device.create_fence(0)?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: SAMPLER_COUNT * MAX_DESCRIPTOR_SETS * 2,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: TEXTURE_SRV_COUNT * MAX_DESCRIPTOR_SETS * 2,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(MAX_DESCRIPTOR_SETS)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { shared.raw.create_descriptor_pool(&pool_info, None) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        let bindings = [
            vk::DescriptorSetLayoutBinding {
                binding: SAMPLER_BINDING,
                descriptor_type: vk::DescriptorType::SAMPLER,
                descriptor_count: SAMPLER_COUNT,
                stage_flags: vk::ShaderStageFlags::ALL,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: TEXTURE_SRV_BINDING,
                descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: TEXTURE_SRV_COUNT,
                stage_flags: vk::ShaderStageFlags::ALL,
                ..Default::default()
            },
        ];
        let binding_flags = [
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND,
            vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
                | vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND,
        ];
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&binding_flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut flags_info);
        let set_layout = unsafe { shared.raw.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        Ok(Self {
            device: device.clone(),
            fence,
            fence_value: 0,
            descriptor_pool,
            set_layout,
            current_set: vk::DescriptorSet::null(),
            allocated_set_count: 0,
            table: DescriptorTable::default(),
            retired_sets: Vec::new(),
        })
    }

    /// The one set layout every pipeline layout is built from.
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    /// The fence frame submissions must signal with the value returned by
    /// [`Self::close_frame`].
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// The set being filled this frame; valid between `begin_frame` and
    /// `close_frame`.
    pub fn current_set(&self) -> vk::DescriptorSet {
        self.current_set
    }

    /// Reclaims a retired set whose fence value has completed, or allocates
    /// a fresh one while under the in-flight cap. With the cap reached and
    /// nothing complete, blocks on the oldest retirement.
    pub fn begin_frame(&mut self) -> Result<(), fe::ErrorKind> {
        profiling::scope!("BindlessManager::begin_frame");

        debug_assert!(self.current_set == vk::DescriptorSet::null());

        let completed = self
            .fence
            .completed_value()
            .map_err(fe::ErrorKind::from)?;
        for index in 0..self.retired_sets.len() {
            if self.retired_sets[index].fence_value <= completed {
                self.current_set = self.retired_sets.swap_remove(index).set;
                break;
            }
        }

        if self.current_set == vk::DescriptorSet::null() {
            if self.allocated_set_count < MAX_DESCRIPTOR_SETS {
                self.current_set = self.allocate_descriptor_set()?;
                self.allocated_set_count += 1;
            } else {
                let oldest = self
                    .retired_sets
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, retired)| retired.fence_value)
                    .map(|(index, _)| index)
                    .expect("descriptor set cap reached with no retired sets");
                self.fence
                    .wait(self.retired_sets[oldest].fence_value)
                    .map_err(fe::ErrorKind::from)?;
                self.current_set = self.retired_sets.swap_remove(oldest).set;
            }
        }

        self.table.reset();
        Ok(())
    }

    /// Returns the stable slot of `state` for this frame.
    pub fn register_sampler(&mut self, state: fe::SamplerState) -> Result<u32, fe::ErrorKind> {
        let sampler = self.device.shared().get_sampler(state).map_err(fe::ErrorKind::from)?;
        Ok(self.table.register_sampler(sampler))
    }

    /// Returns the stable slot of `(texture, subresource)` for this frame;
    /// repeated registrations return the same index.
    pub fn register_srv(&mut self, texture: &Texture, subresource: fe::Subresource) -> u32 {
        let key = u64::from(texture.resource_id().0) << 32 | u64::from(subresource.to_bits());
        let view = texture.get_subresource_view(subresource);
        self.table.register_srv(key, view)
    }

    /// Writes every registered descriptor into the current set with one
    /// batched update, retires the set at the next fence value, and returns
    /// the sync point the frame submission must signal.
    pub fn close_frame(&mut self) -> FenceSyncPoint {
        profiling::scope!("BindlessManager::close_frame");

        debug_assert!(self.current_set != vk::DescriptorSet::null());

        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::with_capacity(2);
        if !self.table.sampler_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.current_set)
                    .dst_binding(SAMPLER_BINDING)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(&self.table.sampler_infos)
                    .build(),
            );
        }
        if !self.table.image_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.current_set)
                    .dst_binding(TEXTURE_SRV_BINDING)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(&self.table.image_infos)
                    .build(),
            );
        }
        if !writes.is_empty() {
            unsafe { self.device.raw().update_descriptor_sets(&writes, &[]) };
        }

        self.fence_value += 1;
        self.retired_sets.push(RetiredSet {
            set: self.current_set,
            fence_value: self.fence_value,
        });
        self.current_set = vk::DescriptorSet::null();

        FenceSyncPoint::new(Arc::clone(&self.fence), self.fence_value)
    }

    fn allocate_descriptor_set(&self) -> Result<vk::DescriptorSet, fe::ErrorKind> {
        let descriptor_counts = [TEXTURE_SRV_COUNT];
        let mut variable_info = vk::DescriptorSetVariableDescriptorCountAllocateInfo::builder()
            .descriptor_counts(&descriptor_counts);

        let set_layouts = [self.set_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts)
            .push_next(&mut variable_info);

        let sets = unsafe { self.device.raw().allocate_descriptor_sets(&allocate_info) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;
        Ok(sets[0])
    }
}

impl Drop for BindlessManager {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device
                .raw()
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle as _;

    #[test]
    fn srv_registration_is_stable_within_a_frame() {
        let mut table = DescriptorTable::default();
        let key_a = 7u64 << 32 | 1;
        let key_b = 9u64 << 32 | 1;

        let index_a = table.register_srv(key_a, vk::ImageView::from_raw(0xa));
        assert_eq!(table.register_srv(key_a, vk::ImageView::from_raw(0xa)), index_a);

        let index_b = table.register_srv(key_b, vk::ImageView::from_raw(0xb));
        assert_ne!(index_a, index_b);
        assert_eq!(table.image_infos.len(), 2);
    }

    #[test]
    fn samplers_dedupe_by_handle() {
        let mut table = DescriptorTable::default();
        let sampler = vk::Sampler::from_raw(0x51);

        let first = table.register_sampler(sampler);
        let second = table.register_sampler(sampler);
        assert_eq!(first, second);
        assert_eq!(table.sampler_infos.len(), 1);

        let other = table.register_sampler(vk::Sampler::from_raw(0x52));
        assert_ne!(other, first);
    }

    #[test]
    fn reset_clears_all_slots() {
        let mut table = DescriptorTable::default();
        table.register_sampler(vk::Sampler::from_raw(1));
        table.register_srv(1 << 32, vk::ImageView::from_raw(2));

        table.reset();
        assert!(table.sampler_infos.is_empty());
        assert!(table.image_infos.is_empty());
        // Indices restart from zero after the reset.
        assert_eq!(table.register_srv(5 << 32, vk::ImageView::from_raw(3)), 0);
    }
}
