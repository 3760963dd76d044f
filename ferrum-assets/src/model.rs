//! Streaming model loader: header block, then one body read per LOD.
//! LOD payloads are stored coarsest first, so partial loads always hold a
//! drawable (if coarse) version of every mesh.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use ferrum_gpu::{AsyncCopyCommandListBuilder, AsyncCopyQueue, Buffer, Device};
use ferrum_jobs::{JobSystem, WaitGroup};
use parking_lot::Mutex;

use crate::format::{self, ByteReader, MeshInfo, MeshLodInfo};
use crate::io::{
    AsyncBlockIo, AsyncBlockReadRequest, AsyncOperationStatus, BlockReadResult, BlockStream,
    PRIORITY_NORMAL,
};
use crate::{AssetLoadingStatus, AssetState};

/// The parsed header tables of a model.
pub struct ModelInfo {
    pub mesh_count: u32,
    pub lod_count: u32,
    pub meshes: Vec<MeshInfo>,
    /// `lod_count` records per mesh, mesh-major.
    pub lods: Vec<MeshLodInfo>,
    pub lod_errors: Vec<f32>,
}

pub struct ModelAsset {
    name: String,
    state: AssetState,
    info: OnceLock<ModelInfo>,
    /// One geometry buffer per LOD, filled as payloads arrive.
    geometry_buffers: Mutex<Vec<Option<Arc<Buffer>>>>,
}

impl ModelAsset {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> AssetLoadingStatus {
        self.state.status()
    }

    /// Header tables; present once the header has loaded.
    pub fn info(&self) -> Option<&ModelInfo> {
        self.info.get()
    }

    /// The geometry buffer of a file LOD index (0 = coarsest), if that
    /// LOD has finished uploading.
    pub fn geometry_buffer(&self, lod_index: u32) -> Option<Arc<Buffer>> {
        self.geometry_buffers
            .lock()
            .get(lod_index as usize)
            .and_then(Clone::clone)
    }

    pub fn completion_wait_group(&self) -> &Arc<WaitGroup> {
        self.state.wait_group()
    }
}

struct LodState {
    expected_size: u32,
    block_count: u32,
    loaded_block_count: AtomicU32,
    data: Mutex<Vec<u8>>,
}

struct ModelRequest {
    asset: Arc<ModelAsset>,
    lods: Vec<LodState>,
    loaded_lod_count: AtomicU32,
}

struct Services {
    device: Device,
    #[allow(dead_code)]
    jobs: Arc<JobSystem>,
    io: Arc<AsyncBlockIo>,
    copy_queue: Arc<AsyncCopyQueue>,
}

/// One body read per LOD: `(lod_index, byte_size, block_count)`.
fn plan_lod_reads(meshes: &[MeshInfo], lods: &[MeshLodInfo], lod_count: u32) -> Vec<(u32, u32, u32)> {
    (0..lod_count)
        .map(|lod_index| {
            let size = format::lod_payload_size(meshes, lods, lod_count, lod_index);
            (lod_index, size, format::block_count(size))
        })
        .collect()
}

pub struct ModelAssetManager {
    services: Arc<Services>,
}

impl ModelAssetManager {
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
    /// completion or failure.
    pub fn load(&self, path: &Path) -> Arc<ModelAsset> {
        profiling::scope!("ModelAssetManager::load");

        let asset = Arc::new(ModelAsset {
            name: path.display().to_string(),
            state: AssetState::new(),
            info: OnceLock::new(),
            geometry_buffers: Mutex::new(Vec::new()),
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
                if let Some((services, asset, stream)) = header_context.lock().take() {
                    on_headers_loaded(&services, &asset, &stream, result);
                }
            }),
        });

        asset
    }
}

fn on_headers_loaded(
    services: &Arc<Services>,
    asset: &Arc<ModelAsset>,
    stream: &BlockStream,
    result: BlockReadResult,
) {
    profiling::scope!("ModelAssetManager::on_headers_loaded");

    if result.status != AsyncOperationStatus::Succeeded {
        asset.state.finish(AssetLoadingStatus::Failed);
        return;
    }

    let mut reader = ByteReader::new(&result.data);
    let (header, meshes, lods, lod_errors) = match format::read_model_header(&mut reader) {
        Ok(parsed) => parsed,
        Err(error) => {
            log::error!("{}: bad model header: {error}", asset.name);
            asset.state.finish(AssetLoadingStatus::Failed);
            return;
        }
    };

    let plan = plan_lod_reads(&meshes, &lods, header.lod_count);

    let _ = asset.info.set(ModelInfo {
        mesh_count: header.mesh_count,
        lod_count: header.lod_count,
        meshes,
        lods,
        lod_errors,
    });
    *asset.geometry_buffers.lock() = vec![None; header.lod_count as usize];
    asset.state.advance(AssetLoadingStatus::HeaderLoaded);

    let request = Arc::new(ModelRequest {
        asset: Arc::clone(asset),
        lods: plan
            .iter()
            .map(|&(_, size, block_count)| LodState {
                expected_size: size,
                block_count,
                loaded_block_count: AtomicU32::new(0),
                data: Mutex::new(Vec::new()),
            })
            .collect(),
        loaded_lod_count: AtomicU32::new(0),
    });

    for (lod_index, size, block_count) in plan {
        if size == 0 {
            log::warn!("{}: LOD {lod_index} is empty", asset.name);
            complete_lod(&request.asset, &request.loaded_lod_count, request.lods.len() as u32);
            continue;
        }

        let io = Arc::clone(&services.io);
        let services = Arc::clone(services);
        let request_for_lod = Arc::clone(&request);
        io.read_async(AsyncBlockReadRequest {
            stream: stream.clone(),
            block_count,
            priority: PRIORITY_NORMAL,
            cancel: None,
            callback: Box::new(move |result| {
                on_lod_block_loaded(&services, &request_for_lod, lod_index, result);
            }),
        });
    }
}

fn on_lod_block_loaded(
    services: &Arc<Services>,
    request: &Arc<ModelRequest>,
    lod_index: u32,
    result: BlockReadResult,
) {
    if result.status != AsyncOperationStatus::Succeeded {
        request.asset.state.finish(AssetLoadingStatus::Failed);
        return;
    }

    let lod = &request.lods[lod_index as usize];
    lod.data.lock().extend_from_slice(&result.data);

    let loaded = lod.loaded_block_count.fetch_add(1, Ordering::AcqRel);
    if loaded + 1 < lod.block_count {
        return;
    }

    let data = std::mem::take(&mut *lod.data.lock());
    upload_lod(services, request, lod_index, data);
}

fn upload_lod(
    services: &Arc<Services>,
    request: &Arc<ModelRequest>,
    lod_index: u32,
    data: Vec<u8>,
) {
    profiling::scope!("ModelAssetManager::upload_lod");

    let asset = &request.asset;
    let lod = &request.lods[lod_index as usize];
    let lod_count = request.lods.len() as u32;

    if data.len() < lod.expected_size as usize {
        log::error!("{}: LOD {lod_index} payload is truncated", asset.name);
        asset.state.finish(AssetLoadingStatus::Failed);
        return;
    }

    // Display LOD numbers count down from the finest level.
    let buffer = match services.device.create_buffer(
        &format!("GeometryBuffer '{}' LOD{}", asset.name, lod_count - lod_index - 1),
        &fe::BufferDesc::new(
            u64::from(lod.expected_size),
            fe::BufferBindFlags::SHADER_RESOURCE,
            fe::ResourceUsage::DeviceOnly,
        ),
    ) {
        Ok(buffer) => buffer,
        Err(error) => {
            log::error!("{}: geometry buffer creation failed: {error}", asset.name);
            asset.state.finish(AssetLoadingStatus::Failed);
            return;
        }
    };
    asset.geometry_buffers.lock()[lod_index as usize] = Some(Arc::clone(&buffer));

    let mut builder = AsyncCopyCommandListBuilder::new();
    builder.upload_buffer(&buffer, data);
    let asset_for_invoke = Arc::clone(asset);
    let counter = Arc::clone(request);
    builder.invoke(move || {
        complete_lod(&asset_for_invoke, &counter.loaded_lod_count, lod_count);
    });
    services.copy_queue.execute_command_list(builder.build(None));
}

fn complete_lod(asset: &Arc<ModelAsset>, loaded_lod_count: &AtomicU32, lod_count: u32) {
    let loaded = loaded_lod_count.fetch_add(1, Ordering::AcqRel) + 1;
    if loaded == lod_count {
        asset.state.finish(AssetLoadingStatus::CompletelyLoaded);
    } else if loaded == 1 {
        asset.state.advance(AssetLoadingStatus::HasLoadedLods);
    } else {
        debug_assert_eq!(asset.status(), AssetLoadingStatus::HasLoadedLods);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{DiskInputLayout, BLOCK_SIZE};

    #[test]
    fn one_body_read_per_lod() {
        let layout = fe::InputLayout::interleaved(
            fe::PrimitiveTopology::TriangleList,
            &[(fe::VertexSemantic::Position, fe::Format::R32G32B32_SFLOAT)],
        );
        let meshes = vec![
            MeshInfo {
                layout: DiskInputLayout::pack(&layout),
            };
            2
        ];
        // Two meshes with three LODs each; LOD byte sizes shrink towards
        // the coarse end.
        let lods: Vec<MeshLodInfo> = [16384, 4096, 512, 16384, 4096, 512]
            .iter()
            .map(|&vertex_count| MeshLodInfo {
                vertex_count,
                index_count: vertex_count * 3,
                meshlet_count: 0,
                primitive_count: 0,
            })
            .collect();

        let plan = plan_lod_reads(&meshes, &lods, 3);
        assert_eq!(plan.len(), 3);
        for (lod_index, size, block_count) in &plan {
            assert_eq!(*size, format::lod_payload_size(&meshes, &lods, 3, *lod_index));
            assert_eq!(*block_count, (*size + BLOCK_SIZE - 1) / BLOCK_SIZE);
        }
        // 16384 verts * (12 + 12) bytes per mesh pair exceeds one block.
        assert!(plan[0].2 > 1);
        assert_eq!(plan[2].2, 1);
    }
}
