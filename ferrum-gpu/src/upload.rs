//! Staging upload orchestration on the transfer queue.
//!
//! Uploads are recorded into an [`AsyncCopyCommandList`] by the builder and
//! handed to the [`AsyncCopyQueue`], whose single worker gives the whole
//! system its ordering guarantee: commands within one list execute in
//! recorded order, lists execute in submission order, and `invoke`
//! callbacks run on the worker only after the list's fence has completed.

use std::sync::Arc;
use std::thread;

use ash::vk;
use crossbeam_channel::{Receiver, Sender};
use ferrum_jobs::WaitGroup;
use parking_lot::Mutex;

use crate::barrier::{BufferAccess, BufferBarrierDesc, ImageAccess, ImageBarrierDesc, ResourceBarrierBatcher};
use crate::conv;
use crate::device::Device;
use crate::fence::Fence;
use crate::resource::{Buffer, Texture};
use crate::DeviceError;

enum CopyCommand {
    UploadBuffer {
        dst: Arc<Buffer>,
        data: Box<[u8]>,
    },
    UploadTexture {
        dst: Arc<Texture>,
        data: Box<[u8]>,
        src_offset: usize,
        subresource: fe::Subresource,
    },
    Invoke(Box<dyn FnOnce() + Send>),
}

/// A forward-only command log; build one with
/// [`AsyncCopyCommandListBuilder`].
pub struct AsyncCopyCommandList {
    commands: Vec<CopyCommand>,
    wait_group: Option<Arc<WaitGroup>>,
}

/// Records upload commands. Single-threaded caller contract, one builder
/// per list.
#[derive(Default)]
pub struct AsyncCopyCommandListBuilder {
    commands: Vec<CopyCommand>,
}

impl AsyncCopyCommandListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads `data` into `dst` starting at byte zero.
    pub fn upload_buffer(&mut self, dst: &Arc<Buffer>, data: impl Into<Box<[u8]>>) {
        self.commands.push(CopyCommand::UploadBuffer {
            dst: Arc::clone(dst),
            data: data.into(),
        });
    }

    /// Uploads the bytes at `data[src_offset..]` into the given subresource
    /// window of `dst`, tightly packed mip after mip.
    pub fn upload_texture(
        &mut self,
        dst: &Arc<Texture>,
        data: impl Into<Box<[u8]>>,
        src_offset: usize,
        subresource: fe::Subresource,
    ) {
        self.commands.push(CopyCommand::UploadTexture {
            dst: Arc::clone(dst),
            data: data.into(),
            src_offset,
            subresource,
        });
    }

    /// Posts `callback` on the copy-queue worker after every command in
    /// this list has been submitted and the associated fence has advanced.
    pub fn invoke(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.commands.push(CopyCommand::Invoke(Box::new(callback)));
    }

    /// Finishes the list; `wait_group` (if any) is signaled once the list
    /// has fully completed on the GPU and its callbacks have run.
    pub fn build(self, wait_group: Option<Arc<WaitGroup>>) -> AsyncCopyCommandList {
        AsyncCopyCommandList {
            commands: self.commands,
            wait_group,
        }
    }
}

enum QueueMessage {
    Execute(AsyncCopyCommandList),
    Stop,
}

/// The async copy queue: one worker on the transfer queue family.
pub struct AsyncCopyQueue {
    sender: Sender<QueueMessage>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    fence: Arc<Fence>,
}

impl AsyncCopyQueue {
    pub fn new(device: &Device) -> Result<Self, fe::ErrorKind> {
        let fence = device.create_fence(0)?;
        let (sender, receiver) = crossbeam_channel::unbounded();

        let worker_device = device.clone();
        let worker_fence = Arc::clone(&fence);
        let worker = thread::Builder::new()
            .name("fe-async-copy".into())
            .spawn(move || worker_loop(worker_device, worker_fence, &receiver))
            .map_err(|_| fe::ErrorKind::UnknownError)?;

        Ok(Self {
            sender,
            worker: Mutex::new(Some(worker)),
            fence,
        })
    }

    /// Enqueues a list; lists complete in execution order.
    pub fn execute_command_list(&self, list: AsyncCopyCommandList) {
        let _ = self.sender.send(QueueMessage::Execute(list));
    }

    /// The timeline fence the worker signals once per processed list.
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }
}

impl Drop for AsyncCopyQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(QueueMessage::Stop);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(device: Device, fence: Arc<Fence>, receiver: &Receiver<QueueMessage>) {
    let mut next_value = 1u64;
    while let Ok(message) = receiver.recv() {
        match message {
            QueueMessage::Execute(list) => {
                if let Err(error) = process_list(&device, &fence, next_value, &list) {
                    log::error!("async copy submission failed: {error}");
                }
                next_value += 1;

                // Callbacks run in recorded order, strictly after the
                // list's GPU work.
                for command in list.commands {
                    if let CopyCommand::Invoke(callback) = command {
                        callback();
                    }
                }
                if let Some(wait_group) = list.wait_group {
                    wait_group.signal();
                }
            }
            QueueMessage::Stop => break,
        }
    }
}

fn texture_upload_size(texture: &Texture, subresource: fe::Subresource) -> u64 {
    let desc = texture.desc();
    let info = desc.format.info();
    let per_slice = info.mip_range_byte_size(
        desc.extent(),
        u32::from(subresource.most_detailed_mip),
        u32::from(subresource.mip_count),
    );
    u64::from(per_slice) * u64::from(subresource.array_size)
}

fn process_list(
    device: &Device,
    fence: &Arc<Fence>,
    value: u64,
    list: &AsyncCopyCommandList,
) -> Result<(), DeviceError> {
    profiling::scope!("AsyncCopyQueue::process_list");

    // Staging layout: payloads packed in recorded order.
    let mut staging_size = 0u64;
    let mut staging_offsets = Vec::with_capacity(list.commands.len());
    for command in &list.commands {
        staging_offsets.push(staging_size);
        match command {
            CopyCommand::UploadBuffer { data, .. } => staging_size += data.len() as u64,
            CopyCommand::UploadTexture {
                dst, subresource, ..
            } => staging_size += texture_upload_size(dst, *subresource),
            CopyCommand::Invoke(_) => {}
        }
    }

    if staging_size == 0 {
        // Nothing to submit; the fence still advances so callers observing
        // the queue's fence see this list as complete.
        return fence.signal(value);
    }

    let staging = Buffer::create(
        device.shared(),
        "AsyncCopyStaging",
        &fe::BufferDesc::new(
            staging_size,
            fe::BufferBindFlags::TRANSFER_SRC,
            fe::ResourceUsage::HostWriteThrough,
        ),
    )
    .map_err(|_| DeviceError::OutOfMemory)?;

    for (command, &offset) in list.commands.iter().zip(&staging_offsets) {
        match command {
            CopyCommand::UploadBuffer { data, .. } => {
                staging
                    .update_data(data, offset)
                    .map_err(|_| DeviceError::Lost)?;
            }
            CopyCommand::UploadTexture {
                dst,
                data,
                src_offset,
                subresource,
            } => {
                let size = texture_upload_size(dst, *subresource) as usize;
                staging
                    .update_data(&data[*src_offset..*src_offset + size], offset)
                    .map_err(|_| DeviceError::Lost)?;
            }
            CopyCommand::Invoke(_) => {}
        }
    }

    let shared = device.shared();
    let command_buffer = shared.allocate_command_buffer(fe::QueueKind::Transfer)?;
    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { shared.raw.begin_command_buffer(command_buffer, &begin_info)? };

    // Fresh subresources enter from UNDEFINED, outside the batcher's
    // read/write tables.
    let mut acquire_barriers: Vec<vk::ImageMemoryBarrier2> = Vec::new();
    for command in &list.commands {
        if let CopyCommand::UploadTexture {
            dst, subresource, ..
        } = command
        {
            acquire_barriers.push(
                vk::ImageMemoryBarrier2::builder()
                    .image(dst.raw())
                    .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                    .src_access_mask(vk::AccessFlags2::empty())
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                    .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: conv::map_aspect_flags(dst.desc().format),
                        base_mip_level: u32::from(subresource.most_detailed_mip),
                        level_count: u32::from(subresource.mip_count),
                        base_array_layer: u32::from(subresource.first_array_slice),
                        layer_count: u32::from(subresource.array_size),
                    })
                    .build(),
            );
        }
    }
    if !acquire_barriers.is_empty() {
        let dependency_info =
            vk::DependencyInfo::builder().image_memory_barriers(&acquire_barriers);
        unsafe { shared.raw.cmd_pipeline_barrier2(command_buffer, &dependency_info) };
    }

    for (command, &offset) in list.commands.iter().zip(&staging_offsets) {
        match command {
            CopyCommand::UploadBuffer { dst, data } => {
                let region = vk::BufferCopy {
                    src_offset: offset,
                    dst_offset: 0,
                    size: data.len() as u64,
                };
                unsafe {
                    shared
                        .raw
                        .cmd_copy_buffer(command_buffer, staging.raw(), dst.raw(), &[region]);
                }
            }
            CopyCommand::UploadTexture {
                dst, subresource, ..
            } => {
                let desc = dst.desc();
                let info = desc.format.info();
                let mut running_offset = offset;
                let mut regions = Vec::with_capacity(usize::from(subresource.mip_count));
                for mip_index in 0..u32::from(subresource.mip_count) {
                    let mip = u32::from(subresource.most_detailed_mip) + mip_index;
                    let extent = desc.extent().mip(mip);
                    regions.push(vk::BufferImageCopy {
                        buffer_offset: running_offset,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: conv::map_aspect_flags(desc.format),
                            mip_level: mip,
                            base_array_layer: u32::from(subresource.first_array_slice),
                            layer_count: u32::from(subresource.array_size),
                        },
                        image_offset: vk::Offset3D::default(),
                        image_extent: conv::map_extent(extent),
                    });
                    running_offset += u64::from(info.mip_byte_size(desc.extent(), mip))
                        * u64::from(subresource.array_size);
                }
                unsafe {
                    shared.raw.cmd_copy_buffer_to_image(
                        command_buffer,
                        staging.raw(),
                        dst.raw(),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &regions,
                    );
                }
            }
            CopyCommand::Invoke(_) => {}
        }
    }

    // Release transitions go through the batcher so identical transitions
    // coalesce into one native barrier.
    let mut batcher = ResourceBarrierBatcher::new(device.clone());
    batcher.begin(command_buffer);
    for command in &list.commands {
        match command {
            CopyCommand::UploadBuffer { dst, .. } => {
                batcher.add_buffer_barrier(BufferBarrierDesc {
                    buffer: dst.raw(),
                    source_access: BufferAccess::TransferDst,
                    dest_access: BufferAccess::ShaderResource,
                    source_queue: fe::QueueKind::Transfer,
                    dest_queue: fe::QueueKind::Transfer,
                });
            }
            CopyCommand::UploadTexture {
                dst, subresource, ..
            } => {
                batcher.add_image_barrier(ImageBarrierDesc {
                    image: dst.raw(),
                    subresource: *subresource,
                    aspects: conv::map_aspect_flags(dst.desc().format),
                    source_access: ImageAccess::TransferDst,
                    dest_access: ImageAccess::ShaderResource,
                    source_queue: fe::QueueKind::Transfer,
                    dest_queue: fe::QueueKind::Transfer,
                });
            }
            CopyCommand::Invoke(_) => {}
        }
    }
    batcher.end();

    unsafe { shared.raw.end_command_buffer(command_buffer)? };

    let queue = device.get_command_queue(fe::QueueKind::Transfer);
    queue.submit(&[command_buffer], &[], &[], Some((fence.as_ref(), value)))?;

    // The worker owns completion: block here so callbacks and the staging
    // release happen strictly after the GPU is done.
    fence.wait(value)?;

    shared.free_command_buffer(fe::QueueKind::Transfer, command_buffer);
    drop(staging);
    Ok(())
}
