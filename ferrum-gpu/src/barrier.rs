//! Coalesces resource transitions into as few pipeline barriers as
//! possible.
//!
//! Pipeline stages are left at ALL_COMMANDS on both sides; conservatively
//! correct, and a later pass may narrow them.

use std::hash::{Hash, Hasher};

use ash::vk;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::device::Device;

/// How a buffer is accessed on one side of a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    TransferDst,
    UnorderedAccess,
    TransferSrc,
    ShaderResource,
    IndirectArgument,
}

/// How an image is accessed on one side of a transition; each value pins
/// both the access mask and the layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageAccess {
    TransferDst,
    UnorderedAccess,
    ColorTarget,
    DepthStencilTarget,
    TransferSrc,
    ShaderResource,
    DepthRead,
}

pub(crate) fn buffer_access_flags(access: BufferAccess) -> vk::AccessFlags2 {
    match access {
        BufferAccess::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
        BufferAccess::UnorderedAccess => vk::AccessFlags2::MEMORY_READ,
        BufferAccess::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
        BufferAccess::ShaderResource => vk::AccessFlags2::SHADER_READ,
        BufferAccess::IndirectArgument => vk::AccessFlags2::INDIRECT_COMMAND_READ,
    }
}

pub(crate) fn image_access_flags(access: ImageAccess) -> (vk::AccessFlags2, vk::ImageLayout) {
    match access {
        ImageAccess::TransferDst => (
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        ImageAccess::UnorderedAccess => {
            (vk::AccessFlags2::MEMORY_READ, vk::ImageLayout::GENERAL)
        }
        ImageAccess::ColorTarget => (
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
        ImageAccess::DepthStencilTarget => (
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ),
        ImageAccess::TransferSrc => (
            vk::AccessFlags2::TRANSFER_READ,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ),
        ImageAccess::ShaderResource => (
            vk::AccessFlags2::SHADER_READ,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ),
        ImageAccess::DepthRead => (
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferBarrierDesc {
    pub buffer: vk::Buffer,
    pub source_access: BufferAccess,
    pub dest_access: BufferAccess,
    pub source_queue: fe::QueueKind,
    pub dest_queue: fe::QueueKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageBarrierDesc {
    pub image: vk::Image,
    pub subresource: fe::Subresource,
    pub aspects: vk::ImageAspectFlags,
    pub source_access: ImageAccess,
    pub dest_access: ImageAccess,
    pub source_queue: fe::QueueKind,
    pub dest_queue: fe::QueueKind,
}

fn desc_hash(desc: &impl Hash) -> u64 {
    let mut hasher = FxHasher::default();
    desc.hash(&mut hasher);
    hasher.finish()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueueAction {
    AlreadyQueued,
    Queue,
    FlushThenQueue,
}

/// The pending lists and the dedup/conflict decisions, kept free of command
/// recording so they stay testable.
#[derive(Default)]
struct PendingBarriers {
    buffers: Vec<(BufferBarrierDesc, u64)>,
    images: Vec<(ImageBarrierDesc, u64)>,
}

impl PendingBarriers {
    fn classify_buffer(&self, desc: &BufferBarrierDesc, hash: u64) -> QueueAction {
        for (queued, queued_hash) in &self.buffers {
            if *queued_hash == hash {
                return QueueAction::AlreadyQueued;
            }
            if queued.buffer == desc.buffer {
                return QueueAction::FlushThenQueue;
            }
        }
        QueueAction::Queue
    }

    /// Two queued barriers on the same image would alias layouts, so the
    /// second forces a flush even when the hashes differ.
    fn classify_image(&self, desc: &ImageBarrierDesc, hash: u64) -> QueueAction {
        for (queued, queued_hash) in &self.images {
            if *queued_hash == hash {
                return QueueAction::AlreadyQueued;
            }
            if queued.image == desc.image {
                return QueueAction::FlushThenQueue;
            }
        }
        QueueAction::Queue
    }

    fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }

    fn clear(&mut self) {
        self.buffers.clear();
        self.images.clear();
    }
}

/// Batches read/write transitions and issues a single
/// `vkCmdPipelineBarrier2` per flush.
///
/// Single-threaded caller contract: one batcher per command list.
pub struct ResourceBarrierBatcher {
    device: Device,
    command_buffer: vk::CommandBuffer,
    pending: PendingBarriers,
}

impl ResourceBarrierBatcher {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            command_buffer: vk::CommandBuffer::null(),
            pending: PendingBarriers::default(),
        }
    }

    pub fn begin(&mut self, command_buffer: vk::CommandBuffer) {
        assert!(self.command_buffer == vk::CommandBuffer::null());
        self.command_buffer = command_buffer;
    }

    /// Flushes whatever is still queued and detaches the command buffer.
    pub fn end(&mut self) {
        self.flush();
        self.command_buffer = vk::CommandBuffer::null();
    }

    pub fn add_buffer_barrier(&mut self, desc: BufferBarrierDesc) {
        profiling::scope!("ResourceBarrierBatcher::add_buffer_barrier");

        let hash = desc_hash(&desc);
        match self.pending.classify_buffer(&desc, hash) {
            QueueAction::AlreadyQueued => return,
            QueueAction::FlushThenQueue => self.flush(),
            QueueAction::Queue => {}
        }
        self.pending.buffers.push((desc, hash));
    }

    pub fn add_image_barrier(&mut self, desc: ImageBarrierDesc) {
        profiling::scope!("ResourceBarrierBatcher::add_image_barrier");

        let hash = desc_hash(&desc);
        match self.pending.classify_image(&desc, hash) {
            QueueAction::AlreadyQueued => return,
            QueueAction::FlushThenQueue => self.flush(),
            QueueAction::Queue => {}
        }
        self.pending.images.push((desc, hash));
    }

    pub fn flush(&mut self) {
        profiling::scope!("ResourceBarrierBatcher::flush");

        if self.pending.is_empty() {
            return;
        }
        assert!(self.command_buffer != vk::CommandBuffer::null());

        let shared = self.device.shared();

        let mut buffer_barriers: SmallVec<[vk::BufferMemoryBarrier2; 8]> =
            SmallVec::with_capacity(self.pending.buffers.len());
        for (desc, _) in &self.pending.buffers {
            let mut barrier = vk::BufferMemoryBarrier2::builder()
                .buffer(desc.buffer)
                .src_access_mask(buffer_access_flags(desc.source_access))
                .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .dst_access_mask(buffer_access_flags(desc.dest_access))
                .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .offset(0)
                .size(vk::WHOLE_SIZE);

            if desc.source_queue != desc.dest_queue {
                barrier = barrier
                    .src_queue_family_index(shared.queue_family_index(desc.source_queue))
                    .dst_queue_family_index(shared.queue_family_index(desc.dest_queue));
            } else {
                barrier = barrier
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
            }
            buffer_barriers.push(barrier.build());
        }

        let mut image_barriers: SmallVec<[vk::ImageMemoryBarrier2; 8]> =
            SmallVec::with_capacity(self.pending.images.len());
        for (desc, _) in &self.pending.images {
            let (src_access, old_layout) = image_access_flags(desc.source_access);
            let (dst_access, new_layout) = image_access_flags(desc.dest_access);

            let mut barrier = vk::ImageMemoryBarrier2::builder()
                .image(desc.image)
                .src_access_mask(src_access)
                .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .old_layout(old_layout)
                .dst_access_mask(dst_access)
                .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .new_layout(new_layout)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: desc.aspects,
                    base_mip_level: u32::from(desc.subresource.most_detailed_mip),
                    level_count: u32::from(desc.subresource.mip_count),
                    base_array_layer: u32::from(desc.subresource.first_array_slice),
                    layer_count: u32::from(desc.subresource.array_size),
                });

            if desc.source_queue != desc.dest_queue {
                barrier = barrier
                    .src_queue_family_index(shared.queue_family_index(desc.source_queue))
                    .dst_queue_family_index(shared.queue_family_index(desc.dest_queue));
            } else {
                barrier = barrier
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
            }
            image_barriers.push(barrier.build());
        }

        let dependency_info = vk::DependencyInfo::builder()
            .buffer_memory_barriers(&buffer_barriers)
            .image_memory_barriers(&image_barriers);

        unsafe {
            shared
                .raw
                .cmd_pipeline_barrier2(self.command_buffer, &dependency_info);
        }

        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle as _;

    fn image_desc(image: u64, dest: ImageAccess) -> ImageBarrierDesc {
        ImageBarrierDesc {
            image: vk::Image::from_raw(image),
            subresource: fe::Subresource::mips(0, 1, 0),
            aspects: vk::ImageAspectFlags::COLOR,
            source_access: ImageAccess::TransferDst,
            dest_access: dest,
            source_queue: fe::QueueKind::Graphics,
            dest_queue: fe::QueueKind::Graphics,
        }
    }

    #[test]
    fn identical_barriers_coalesce() {
        let mut pending = PendingBarriers::default();
        let desc = image_desc(1, ImageAccess::ShaderResource);
        let hash = desc_hash(&desc);

        assert_eq!(pending.classify_image(&desc, hash), QueueAction::Queue);
        pending.images.push((desc, hash));
        // The same desc by hash is a no-op.
        assert_eq!(
            pending.classify_image(&desc, hash),
            QueueAction::AlreadyQueued
        );
    }

    #[test]
    fn same_image_different_transition_flushes_first() {
        let mut pending = PendingBarriers::default();
        let first = image_desc(1, ImageAccess::ShaderResource);
        pending.images.push((first, desc_hash(&first)));

        let second = image_desc(1, ImageAccess::ColorTarget);
        assert_eq!(
            pending.classify_image(&second, desc_hash(&second)),
            QueueAction::FlushThenQueue
        );

        // A different image coexists in the same batch.
        let other = image_desc(2, ImageAccess::ShaderResource);
        assert_eq!(
            pending.classify_image(&other, desc_hash(&other)),
            QueueAction::Queue
        );
    }

    #[test]
    fn buffer_conflicts_by_handle() {
        let mut pending = PendingBarriers::default();
        let first = BufferBarrierDesc {
            buffer: vk::Buffer::from_raw(7),
            source_access: BufferAccess::TransferDst,
            dest_access: BufferAccess::ShaderResource,
            source_queue: fe::QueueKind::Transfer,
            dest_queue: fe::QueueKind::Graphics,
        };
        pending.buffers.push((first, desc_hash(&first)));

        let mut second = first;
        second.dest_access = BufferAccess::UnorderedAccess;
        assert_eq!(
            pending.classify_buffer(&second, desc_hash(&second)),
            QueueAction::FlushThenQueue
        );
        assert_eq!(
            pending.classify_buffer(&first, desc_hash(&first)),
            QueueAction::AlreadyQueued
        );
    }

    #[test]
    fn access_tables_match_layouts() {
        let (access, layout) = image_access_flags(ImageAccess::ShaderResource);
        assert_eq!(access, vk::AccessFlags2::SHADER_READ);
        assert_eq!(layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let (access, layout) = image_access_flags(ImageAccess::DepthRead);
        assert_eq!(access, vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ);
        assert_eq!(layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);

        assert_eq!(
            buffer_access_flags(BufferAccess::IndirectArgument),
            vk::AccessFlags2::INDIRECT_COMMAND_READ
        );
    }
}
