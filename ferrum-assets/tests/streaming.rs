//! End-to-end streaming tests: real asset files on disk, loaded through
//! the block reader and uploaded through the async copy queue. Skipped
//! when the machine has no usable Vulkan implementation.

use std::path::PathBuf;
use std::sync::Arc;

use ferrum_assets::format::{
    self, ByteWriter, DiskInputLayout, DiskTextureDesc, MeshInfo, MeshLodInfo, MipChainInfo,
    ModelHeader, TextureHeader, MODEL_MAGIC, TEXTURE_MAGIC,
};
use ferrum_assets::io::AsyncBlockIo;
use ferrum_assets::{
    AssetLoadingStatus, ModelAssetManager, TextureAssetManager,
};
use ferrum_gpu::{AsyncCopyQueue, Device, Instance, InstanceDesc};
use ferrum_jobs::JobSystem;

fn create_test_device() -> Option<Device> {
    let instance = Instance::new(&InstanceDesc {
        application_name: "ferrum-assets-tests".into(),
        debug_runtime: false,
    })
    .ok()?;
    match instance.create_default_device() {
        Ok(device) => Some(device),
        Err(error) => {
            eprintln!("skipping: no usable Vulkan device ({error})");
            None
        }
    }
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ferrum-streaming-{}-{name}", std::process::id()))
}

/// 16x16 RGBA8 with five mips split into a coarse chain (mips 2..4) and a
/// fine chain (mips 0..1), neither sharing the header block.
fn write_test_texture(path: &PathBuf) {
    let desc = fe::TextureDesc {
        mip_count: 5,
        ..fe::TextureDesc::texture_2d(16, 16, fe::Format::R8G8B8A8_UNORM)
    };
    let info = desc.format.info();

    let coarse_size = info.mip_range_byte_size(desc.extent(), 2, 3);
    let fine_size = info.mip_range_byte_size(desc.extent(), 0, 2);

    let chains = [
        MipChainInfo {
            most_detailed_mip: 2,
            mip_count: 3,
            array_slice: 0,
            block_count: format::block_count(coarse_size),
            reserved: 0,
        },
        MipChainInfo {
            most_detailed_mip: 0,
            mip_count: 2,
            array_slice: 0,
            block_count: format::block_count(fine_size),
            reserved: 0,
        },
    ];

    let mut header_payload = ByteWriter::new();
    format::write_texture_header(
        &mut header_payload,
        &TextureHeader {
            magic: TEXTURE_MAGIC,
            desc: DiskTextureDesc::pack(&desc),
        },
        &chains,
    );

    let mut file = ByteWriter::new();
    format::write_block(&mut file, &header_payload.into_inner());
    format::write_blocks(&mut file, &vec![0x11u8; coarse_size as usize]);
    format::write_blocks(&mut file, &vec![0x22u8; fine_size as usize]);
    std::fs::write(path, file.into_inner()).unwrap();
}

#[test]
fn texture_streams_to_completely_loaded() {
    let Some(device) = create_test_device() else {
        return;
    };

    let path = temp_path("texture.ftx");
    write_test_texture(&path);

    let jobs = JobSystem::new(2);
    let io = AsyncBlockIo::new();
    let copy_queue = Arc::new(AsyncCopyQueue::new(&device).unwrap());
    let manager = TextureAssetManager::new(device.clone(), Arc::clone(&jobs), io, copy_queue);

    let asset = manager.load(&path);
    asset.completion_wait_group().wait();

    assert_eq!(asset.status(), AssetLoadingStatus::CompletelyLoaded);
    let texture = asset.resource().expect("texture resource exists");
    assert_eq!(texture.desc().mip_count, 5);
    assert_eq!(texture.desc().width, 16);

    device.wait_idle();
    let _ = std::fs::remove_file(path);
}

#[test]
fn missing_texture_fails_and_signals() {
    let Some(device) = create_test_device() else {
        return;
    };

    let jobs = JobSystem::new(1);
    let io = AsyncBlockIo::new();
    let copy_queue = Arc::new(AsyncCopyQueue::new(&device).unwrap());
    let manager = TextureAssetManager::new(device, jobs, io, copy_queue);

    let asset = manager.load(&temp_path("does-not-exist.ftx"));
    asset.completion_wait_group().wait();
    assert_eq!(asset.status(), AssetLoadingStatus::Failed);
    assert!(asset.resource().is_none());
}

#[test]
fn corrupt_texture_magic_fails() {
    let Some(device) = create_test_device() else {
        return;
    };

    let path = temp_path("bad-magic.ftx");
    let mut header_payload = ByteWriter::new();
    header_payload.write(&TextureHeader {
        magic: 0x0bad_0bad,
        ..Default::default()
    });
    let mut file = ByteWriter::new();
    format::write_block(&mut file, &header_payload.into_inner());
    std::fs::write(&path, file.into_inner()).unwrap();

    let jobs = JobSystem::new(1);
    let io = AsyncBlockIo::new();
    let copy_queue = Arc::new(AsyncCopyQueue::new(&device).unwrap());
    let manager = TextureAssetManager::new(device, jobs, io, copy_queue);

    let asset = manager.load(&path);
    asset.completion_wait_group().wait();
    assert_eq!(asset.status(), AssetLoadingStatus::Failed);
    let _ = std::fs::remove_file(path);
}

#[test]
fn model_streams_all_lods() {
    let Some(device) = create_test_device() else {
        return;
    };

    let layout = fe::InputLayout::interleaved(
        fe::PrimitiveTopology::TriangleList,
        &[(fe::VertexSemantic::Position, fe::Format::R32G32B32_SFLOAT)],
    );
    let header = ModelHeader {
        magic: MODEL_MAGIC,
        mesh_count: 2,
        lod_count: 3,
    };
    let meshes = vec![
        MeshInfo {
            layout: DiskInputLayout::pack(&layout),
        };
        2
    ];
    // Coarsest LOD first in the file, growing towards the fine end.
    let lods: Vec<MeshLodInfo> = [8, 32, 128, 8, 32, 128]
        .iter()
        .map(|&vertex_count| MeshLodInfo {
            vertex_count,
            index_count: vertex_count * 3,
            meshlet_count: 0,
            primitive_count: 0,
        })
        .collect();
    let lod_errors = vec![0.25, 0.5];

    let mut header_payload = ByteWriter::new();
    format::write_model_header(&mut header_payload, &header, &meshes, &lods, &lod_errors);

    let mut file = ByteWriter::new();
    format::write_block(&mut file, &header_payload.into_inner());
    for lod_index in 0..header.lod_count {
        let size = format::lod_payload_size(&meshes, &lods, header.lod_count, lod_index);
        format::write_blocks(&mut file, &vec![lod_index as u8; size as usize]);
    }

    let path = temp_path("model.fmd");
    std::fs::write(&path, file.into_inner()).unwrap();

    let jobs = JobSystem::new(2);
    let io = AsyncBlockIo::new();
    let copy_queue = Arc::new(AsyncCopyQueue::new(&device).unwrap());
    let manager = ModelAssetManager::new(device.clone(), jobs, io, copy_queue);

    let asset = manager.load(&path);
    asset.completion_wait_group().wait();

    assert_eq!(asset.status(), AssetLoadingStatus::CompletelyLoaded);
    let info = asset.info().expect("header tables exist");
    assert_eq!(info.mesh_count, 2);
    assert_eq!(info.lod_count, 3);
    assert_eq!(info.lod_errors, [0.25, 0.5]);
    for lod_index in 0..3 {
        let buffer = asset
            .geometry_buffer(lod_index)
            .expect("every LOD has a geometry buffer");
        assert_eq!(
            buffer.desc().size,
            u64::from(format::lod_payload_size(&meshes, &lods, 3, lod_index))
        );
    }

    device.wait_idle();
    let _ = std::fs::remove_file(path);
}
