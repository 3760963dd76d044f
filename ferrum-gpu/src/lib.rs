/*!
# Vulkan rendering substrate.

## Object lifetime

GPU objects are owned by `Arc`s handed out by the [`Device`]; nothing here
is intrusively reference counted. Objects that may still be referenced by
in-flight GPU work are retired through [`Device::retire`], which holds the
final strong reference until a fence sync point is reached. `wait_idle`
force-drains that queue.

## Fences

Fences are Vulkan timeline semaphores, 1:1. Values are 64-bit, only ever
increase, and are compared without wrapping.

## Bindless access

A single descriptor set layout covers every pipeline: binding 0 holds
samplers, binding 1 a large variable-count sampled-image array. Shaders
receive slot indices as root constants instead of per-draw sets.
!*/

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications
)]
#![allow(
    // Explicit match arms read better in the translation tables.
    clippy::match_like_matches_macro,
    clippy::too_many_arguments
)]

mod barrier;
mod bindless;
mod conv;
mod device;
mod fence;
mod geometry;
mod instance;
mod pipeline;
mod pool;
mod renderpass;
mod resource;
mod shader;
mod swapchain;
mod upload;
mod variant;

pub use barrier::{BufferAccess, BufferBarrierDesc, ImageAccess, ImageBarrierDesc, ResourceBarrierBatcher};
pub use bindless::BindlessManager;
pub use device::{Device, Queue};
pub use fence::{Fence, FenceSyncPoint};
pub use geometry::{
    GeometryAllocationDesc, GeometryPool, GeometryView, IndexBufferView, MeshletGeometryView,
    StreamBufferView,
};
pub use instance::{Instance, InstanceDesc};
pub use pipeline::{
    ComputePipeline, ComputePipelineRequest, GraphicsPipeline, GraphicsPipelineDesc,
    PipelineFactory, ShaderRequest,
};
pub use renderpass::{Framebuffer, RenderPass};
pub use resource::{Buffer, ResourceId, Texture};
pub use shader::{
    ShaderCompiler, ShaderCompilerArgs, ShaderCompilerResult, ShaderInputAttribute,
    ShaderReflection, ShaderResourceBinding, ShaderResourceType, ShaderRootConstant,
    ShaderSourceCache,
};
pub use swapchain::{Surface, SurfaceError, Swapchain, SwapchainDesc, SwapchainFrame};
pub use upload::{AsyncCopyCommandList, AsyncCopyCommandListBuilder, AsyncCopyQueue};
pub use variant::{
    compile_global_pipeline_sets, get_pipeline, register_pipeline_set,
    wait_for_global_pipeline_sets, CompiledPipeline, PipelineRequest, PipelineSetHandle,
    PipelineVariantSet,
};

use thiserror::Error;

/// Bindless capacity of binding 0 (samplers).
pub const SAMPLER_COUNT: u32 = 1024;
/// Bindless capacity of binding 1 (sampled images).
pub const TEXTURE_SRV_COUNT: u32 = 65536;
/// Upper bound of bindless descriptor sets in flight.
pub const MAX_DESCRIPTOR_SETS: u32 = 3;

/// Fatal device-level failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device lost")]
    Lost,
}

impl From<ash::vk::Result> for DeviceError {
    fn from(result: ash::vk::Result) -> Self {
        use ash::vk;
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                Self::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => Self::Lost,
            _ => {
                log::warn!("unrecognized device error {result:?}");
                Self::Lost
            }
        }
    }
}

impl From<DeviceError> for fe::ErrorKind {
    fn from(error: DeviceError) -> Self {
        match error {
            DeviceError::OutOfMemory => Self::OutOfMemory,
            DeviceError::Lost => Self::UnknownError,
        }
    }
}

fn map_alloc_error(error: gpu_alloc::AllocationError) -> fe::ErrorKind {
    use gpu_alloc::AllocationError;
    match error {
        AllocationError::OutOfDeviceMemory | AllocationError::OutOfHostMemory => {
            fe::ErrorKind::OutOfMemory
        }
        AllocationError::NoCompatibleMemoryTypes => fe::ErrorKind::NotSupported,
        AllocationError::TooManyObjects => fe::ErrorKind::OutOfMemory,
    }
}
