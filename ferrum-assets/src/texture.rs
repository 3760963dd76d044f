//! Streaming texture loader: header block, then one read per mip chain,
//! coarse chains first.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use ferrum_gpu::{AsyncCopyCommandListBuilder, AsyncCopyQueue, Device, Texture};
use ferrum_jobs::{JobAffinity, JobSystem, WaitGroup};
use parking_lot::Mutex;

use crate::format::{self, ByteReader, MipChainInfo};
use crate::io::{
    AsyncBlockIo, AsyncBlockReadRequest, AsyncOperationStatus, BlockReadResult, BlockStream,
    PRIORITY_NORMAL,
};
use crate::{AssetLoadingStatus, AssetState};

pub struct TextureAsset {
    name: String,
    state: AssetState,
    resource: OnceLock<Arc<Texture>>,
}

impl TextureAsset {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> AssetLoadingStatus {
        self.state.status()
    }

    /// The GPU texture; present once the header has loaded. Partially
    /// streamed mips are observable through [`Self::status`].
    pub fn resource(&self) -> Option<&Arc<Texture>> {
        self.resource.get()
    }

    /// Signaled once loading completes or fails.
    pub fn completion_wait_group(&self) -> &Arc<WaitGroup> {
        self.state.wait_group()
    }
}

struct MipChainState {
    info: MipChainInfo,
    loaded_block_count: AtomicU32,
    data: Mutex<Vec<u8>>,
}

struct TextureRequest {
    asset: Arc<TextureAsset>,
    mip_chains: Vec<MipChainState>,
    /// Inspected together with its popcount, hence the lock.
    loaded_chains_mask: Mutex<u64>,
}

struct Services {
    device: Device,
    jobs: Arc<JobSystem>,
    io: Arc<AsyncBlockIo>,
    copy_queue: Arc<AsyncCopyQueue>,
}

/// One scheduled body read per mip chain that is not co-resident with the
/// header block. Later (finer) chains read at lower priority.
fn plan_chain_reads(
    chains: &[MipChainInfo],
    first_chain_inline: bool,
) -> Vec<(usize, u32, i32)> {
    chains
        .iter()
        .enumerate()
        .filter(|&(chain_index, _)| !(first_chain_inline && chain_index == 0))
        .map(|(chain_index, chain)| {
            (
                chain_index,
                chain.block_count,
                PRIORITY_NORMAL + chain_index as i32,
            )
        })
        .collect()
}

pub struct TextureAssetManager {
    services: Arc<Services>,
}

impl TextureAssetManager {
    pub fn new(
        device: Device,
        jobs: Arc<JobSystem>,
        io: Arc<AsyncBlockIo>,
        copy_queue: Arc<AsyncCopyQueue>,
    ) -> Self {
        Self {
            services: Arc::new(Services {
                device,
                jobs,
                io,
                copy_queue,
            }),
        }
    }

    /// Starts loading `path`. The returned asset's wait group signals on
    /// completion or failure; poll `status` for partial residency.
    pub fn load(&self, path: &Path) -> Arc<TextureAsset> {
        profiling::scope!("TextureAssetManager::load");

        let asset = Arc::new(TextureAsset {
            name: path.display().to_string(),
            state: AssetState::new(),
            resource: OnceLock::new(),
        });

        let stream = match self.services.io.open(path) {
            Ok(stream) => stream,
            Err(_) => {
                asset.state.finish(AssetLoadingStatus::Failed);
                return asset;
            }
        };

        let services = Arc::clone(&self.services);
        let header_context = Mutex::new(Some((services, Arc::clone(&asset), stream.clone())));
        self.services.io.read_async(AsyncBlockReadRequest {
            stream,
            block_count: 1,
            priority: PRIORITY_NORMAL,
            cancel: None,
            callback: Box::new(move |result| {
                // The header request has a single block, so this fires once.
                if let Some((services, asset, stream)) = header_context.lock().take() {
                    on_header_loaded(&services, &asset, &stream, result);
                }
            }),
        });

        asset
    }
}

fn on_header_loaded(
    services: &Arc<Services>,
    asset: &Arc<TextureAsset>,
    stream: &BlockStream,
    result: BlockReadResult,
) {
    profiling::scope!("TextureAssetManager::on_header_loaded");

    if result.status != AsyncOperationStatus::Succeeded {
        asset.state.finish(AssetLoadingStatus::Failed);
        return;
    }

    let mut reader = ByteReader::new(&result.data);
    let parsed = format::read_texture_header(&mut reader).and_then(|(header, chains)| {
        header.desc.unpack().map(|desc| (desc, chains))
    });
    let (desc, chains) = match parsed {
        Ok(parsed) => parsed,
        Err(error) => {
            log::error!("{}: bad texture header: {error}", asset.name);
            asset.state.finish(AssetLoadingStatus::Failed);
            return;
        }
    };
    if desc.array_size != 1 {
        log::error!("{}: texture arrays are not supported yet", asset.name);
        asset.state.finish(AssetLoadingStatus::Failed);
        return;
    }

    let texture = match services.device.create_texture(&asset.name, &desc) {
        Ok(texture) => texture,
        Err(error) => {
            log::error!("{}: texture creation failed: {error}", asset.name);
            asset.state.finish(AssetLoadingStatus::Failed);
            return;
        }
    };
    let _ = asset.resource.set(texture);
    asset.state.advance(AssetLoadingStatus::HeaderLoaded);

    let request = Arc::new(TextureRequest {
        asset: Arc::clone(asset),
        mip_chains: chains
            .iter()
            .map(|&info| MipChainState {
                info,
                loaded_block_count: AtomicU32::new(0),
                data: Mutex::new(Vec::new()),
            })
            .collect(),
        loaded_chains_mask: Mutex::new(0),
    });

    // The least detailed mip chain may share the header block.
    let first_chain_inline = reader.remaining() > 0;
    if first_chain_inline {
        let inline_data = reader.rest().to_vec();
        upload_mip_chain(services, &request, 0, inline_data);
    }

    for (chain_index, block_count, priority) in plan_chain_reads(&chains, first_chain_inline) {
        let io = Arc::clone(&services.io);
        let services = Arc::clone(services);
        let request_for_chain = Arc::clone(&request);
        io.read_async(AsyncBlockReadRequest {
            stream: stream.clone(),
            block_count,
            priority,
            cancel: None,
            callback: Box::new(move |result| {
                on_chain_block_loaded(&services, &request_for_chain, chain_index, result);
            }),
        });
    }
}

fn on_chain_block_loaded(
    services: &Arc<Services>,
    request: &Arc<TextureRequest>,
    chain_index: usize,
    result: BlockReadResult,
) {
    if result.status != AsyncOperationStatus::Succeeded {
        request.asset.state.finish(AssetLoadingStatus::Failed);
        return;
    }

    let chain = &request.mip_chains[chain_index];
    chain.data.lock().extend_from_slice(&result.data);

    let loaded = chain.loaded_block_count.fetch_add(1, Ordering::AcqRel);
    if loaded + 1 < chain.info.block_count {
        return;
    }

    let data = std::mem::take(&mut *chain.data.lock());
    upload_mip_chain(services, request, chain_index, data);
}

fn upload_mip_chain(
    services: &Arc<Services>,
    request: &Arc<TextureRequest>,
    chain_index: usize,
    data: Vec<u8>,
) {
    profiling::scope!("TextureAssetManager::upload_mip_chain");

    let asset = &request.asset;
    let info = request.mip_chains[chain_index].info;
    let texture = asset.resource().expect("texture exists past the header stage");

    let subresource = fe::Subresource {
        most_detailed_mip: info.most_detailed_mip as u8,
        mip_count: info.mip_count as u8,
        first_array_slice: info.array_slice as u8,
        array_size: 1,
    };

    let format_info = texture.desc().format.info();
    let expected = format_info.mip_range_byte_size(
        texture.desc().extent(),
        info.most_detailed_mip,
        info.mip_count,
    ) as usize;
    if data.len() < expected {
        log::error!("{}: mip chain {chain_index} is truncated", asset.name);
        asset.state.finish(AssetLoadingStatus::Failed);
        return;
    }

    let upload_wait_group = WaitGroup::new(1);
    let mut builder = AsyncCopyCommandListBuilder::new();
    builder.upload_texture(texture, data, 0, subresource);
    services
        .copy_queue
        .execute_command_list(builder.build(Some(Arc::clone(&upload_wait_group))));

    let request = Arc::clone(request);
    services.jobs.schedule(JobAffinity::AnyWorker, move || {
        upload_wait_group.wait();
        finalize_mip_chain(&request, chain_index);
    });
}

fn finalize_mip_chain(request: &Arc<TextureRequest>, chain_index: usize) {
    profiling::scope!("FinalizeMipChain");

    let asset = &request.asset;
    let mut mask = request.loaded_chains_mask.lock();
    debug_assert!(*mask & 1 << chain_index == 0);
    *mask |= 1 << chain_index;

    if mask.count_ones() as usize == request.mip_chains.len() {
        asset.state.finish(AssetLoadingStatus::CompletelyLoaded);
    } else {
        asset.state.advance(AssetLoadingStatus::HasLoadedMips);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(most_detailed_mip: u32, mip_count: u32, block_count: u32) -> MipChainInfo {
        MipChainInfo {
            most_detailed_mip,
            mip_count,
            array_slice: 0,
            block_count,
            reserved: 0,
        }
    }

    #[test]
    fn two_chains_make_two_body_reads() {
        // Five mips: a coarse chain covering 2..4 and a fine one covering
        // 0..1, neither sharing the header block.
        let chains = [chain(2, 3, 1), chain(0, 2, 3)];
        let plan = plan_chain_reads(&chains, false);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], (0, 1, PRIORITY_NORMAL));
        assert_eq!(plan[1], (1, 3, PRIORITY_NORMAL + 1));
        // The coarse chain reads at the more urgent priority.
        assert!(plan[0].2 < plan[1].2);
    }

    #[test]
    fn header_coresident_chain_is_not_read_again() {
        let chains = [chain(2, 3, 1), chain(0, 2, 3)];
        let plan = plan_chain_reads(&chains, true);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].0, 1);
    }
}
