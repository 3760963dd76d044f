/*! Plain data types for the Ferrum3D rendering core.
 *
 * This crate carries no Vulkan dependency: everything here is a descriptor,
 * a packed key, or an enum that the GPU layer translates to native values.
 */

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications
)]

mod format;
mod pass;
mod pipeline;

pub use format::*;
pub use pass::*;
pub use pipeline::*;

use std::fmt;

use thiserror::Error;

/// A monotonically increasing value signaled through a timeline fence.
pub type FenceValue = u64;

/// Error kinds surfaced by the rendering core.
///
/// Construction-time failures return one of these; per-frame recording
/// errors are programming bugs and assert instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("feature or format is not supported")]
    NotSupported,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("out of memory")]
    OutOfMemory,
    #[error("io error")]
    IoError,
    #[error("shader compilation failed")]
    CompileError,
    #[error("unknown error")]
    UnknownError,
}

/// The class of a GPU reported at adapter enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterKind {
    Integrated,
    Discrete,
    Virtual,
    Cpu,
    None,
}

#[derive(Clone, Debug)]
pub struct AdapterInfo {
    pub kind: AdapterKind,
    pub name: String,
}

/// Hardware queue classes exposed by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

/// Memory tier of a buffer or texture.
///
/// Host-visible tiers permit direct `update_data`/`read_data`; device-only
/// resources are filled through the async copy queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResourceUsage {
    #[default]
    DeviceOnly,
    HostWriteThrough,
    HostRandomAccess,
}

bitflags::bitflags! {
    /// Pipeline binding points a buffer can be used at.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BufferBindFlags: u32 {
        const VERTEX_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const CONSTANT_BUFFER = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
        const INDIRECT_ARGUMENT = 1 << 5;
        const TRANSFER_SRC = 1 << 6;
        const TRANSFER_DST = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Pipeline binding points a texture can be used at.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ImageBindFlags: u32 {
        const SHADER_READ = 1 << 0;
        const UNORDERED_ACCESS = 1 << 1;
        const COLOR_TARGET = 1 << 2;
        const DEPTH_STENCIL_TARGET = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub bind_flags: BufferBindFlags,
    pub usage: ResourceUsage,
}

impl BufferDesc {
    pub fn new(size: u64, bind_flags: BufferBindFlags, usage: ResourceUsage) -> Self {
        Self {
            size,
            bind_flags,
            usage,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextureDimension {
    D1,
    #[default]
    D2,
    D3,
    Cube,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub array_size: u32,
    pub sample_count: u32,
    pub format: Format,
    pub bind_flags: ImageBindFlags,
    pub usage: ResourceUsage,
}

impl TextureDesc {
    pub fn texture_2d(width: u32, height: u32, format: Format) -> Self {
        Self {
            dimension: TextureDimension::D2,
            width,
            height,
            depth: 1,
            mip_count: 1,
            array_size: 1,
            sample_count: 1,
            format,
            bind_flags: ImageBindFlags::SHADER_READ,
            usage: ResourceUsage::DeviceOnly,
        }
    }

    pub fn extent(&self) -> Extent3d {
        Extent3d {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }
}

/// A mip/array window of a texture.
///
/// The packed [`Self::to_bits`] form is the key of the subresource view
/// cache and half of the bindless SRV key, so the four fields must stay
/// 8 bits each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subresource {
    pub most_detailed_mip: u8,
    pub mip_count: u8,
    pub first_array_slice: u8,
    pub array_size: u8,
}

impl Subresource {
    pub fn whole(desc: &TextureDesc) -> Self {
        Self {
            most_detailed_mip: 0,
            mip_count: desc.mip_count as u8,
            first_array_slice: 0,
            array_size: desc.array_size as u8,
        }
    }

    pub fn mips(most_detailed_mip: u8, mip_count: u8, array_slice: u8) -> Self {
        Self {
            most_detailed_mip,
            mip_count,
            first_array_slice: array_slice,
            array_size: 1,
        }
    }

    #[inline]
    pub fn to_bits(self) -> u32 {
        u32::from_le_bytes([
            self.most_detailed_mip,
            self.mip_count,
            self.first_array_slice,
            self.array_size,
        ])
    }

    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        let [most_detailed_mip, mip_count, first_array_slice, array_size] = bits.to_le_bytes();
        Self {
            most_detailed_mip,
            mip_count,
            first_array_slice,
            array_size,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirrorRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Anisotropy {
    #[default]
    None,
    X2,
    X4,
    X8,
    X16,
}

impl Anisotropy {
    pub fn max_level(self) -> u32 {
        match self {
            Self::None => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
            Self::X16 => 16,
        }
    }
}

/// Sampler state, also the key of the device sampler cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SamplerState {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mip_filter: Filter,
    pub address_mode: AddressMode,
    pub anisotropy: Anisotropy,
    pub compare_op: Option<CompareOp>,
}

/// Stable index of an entry in the geometry pool.
///
/// Handles never move; an index stays valid until the entry is explicitly
/// freed, after which the slot may be reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryHandle(pub u32);

impl GeometryHandle {
    pub const INVALID: Self = Self(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for GeometryHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for GeometryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "GeometryHandle({})", self.0)
        } else {
            write!(f, "GeometryHandle(invalid)")
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    pub fn byte_size(self) -> u32 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Non-indexed or indexed draw parameters of a geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawArguments {
    Linear {
        start_vertex: u32,
        vertex_count: u32,
    },
    Indexed {
        start_index: u32,
        base_vertex: i32,
        index_count: u32,
    },
}

impl Default for DrawArguments {
    fn default() -> Self {
        Self::Linear {
            start_vertex: 0,
            vertex_count: 0,
        }
    }
}

/// A GPU-culled primitive group; the header the mesh pipeline reads per
/// meshlet.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshletHeader {
    pub vertex_offset: u32,
    pub primitive_offset: u32,
    pub vertex_count: u32,
    pub primitive_count: u32,
}

/// Three meshlet-local vertex indices packed into 10 bits each.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackedTriangle(pub u32);

impl PackedTriangle {
    pub fn new(a: u32, b: u32, c: u32) -> Self {
        debug_assert!(a < 1024 && b < 1024 && c < 1024);
        Self(a | b << 10 | c << 20)
    }

    pub fn indices(self) -> [u32; 3] {
        [self.0 & 0x3ff, self.0 >> 10 & 0x3ff, self.0 >> 20 & 0x3ff]
    }
}

pub const MAX_VERTEX_STREAMS: usize = 8;
pub const MAX_VERTEX_CHANNELS: usize = 16;

/// HLSL vertex-input semantic of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    Position,
    Normal,
    Tangent,
    Bitangent,
    TexCoord0,
    TexCoord1,
    Color,
}

impl VertexSemantic {
    /// The semantic string as it appears in shader reflection, without the
    /// trailing index digit.
    pub fn hlsl(self) -> &'static str {
        match self {
            Self::Position => "POSITION",
            Self::Normal => "NORMAL",
            Self::Tangent => "TANGENT",
            Self::Bitangent => "BITANGENT",
            Self::TexCoord0 => "TEXCOORD",
            Self::TexCoord1 => "TEXCOORD1",
            Self::Color => "COLOR",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexChannel {
    pub semantic: VertexSemantic,
    pub format: Format,
    pub stream: u8,
}

/// Vertex input layout: an ordered channel list spread over up to
/// [`MAX_VERTEX_STREAMS`] interleaved streams.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputLayout {
    pub topology: PrimitiveTopology,
    pub channels: Vec<VertexChannel>,
}

impl InputLayout {
    pub fn interleaved(topology: PrimitiveTopology, channels: &[(VertexSemantic, Format)]) -> Self {
        Self {
            topology,
            channels: channels
                .iter()
                .map(|&(semantic, format)| VertexChannel {
                    semantic,
                    format,
                    stream: 0,
                })
                .collect(),
        }
    }

    /// Bit mask of streams referenced by at least one channel.
    pub fn active_stream_mask(&self) -> u32 {
        self.channels
            .iter()
            .fold(0, |mask, channel| mask | 1 << channel.stream)
    }

    /// Byte stride of one vertex in `stream`.
    pub fn stream_stride(&self, stream: u8) -> u32 {
        self.channels
            .iter()
            .filter(|channel| channel.stream == stream)
            .map(|channel| channel.format.info().block_byte_size as u32)
            .sum()
    }

    /// Byte offset of `channel` within its stream, following channel order.
    pub fn channel_offset(&self, index: usize) -> u32 {
        let stream = self.channels[index].stream;
        self.channels[..index]
            .iter()
            .filter(|channel| channel.stream == stream)
            .map(|channel| channel.format.info().block_byte_size as u32)
            .sum()
    }

    /// Total vertex size across all streams.
    pub fn total_stride(&self) -> u32 {
        self.channels
            .iter()
            .map(|channel| channel.format.info().block_byte_size as u32)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subresource_bits_round_trip() {
        let sub = Subresource {
            most_detailed_mip: 2,
            mip_count: 3,
            first_array_slice: 1,
            array_size: 4,
        };
        assert_eq!(Subresource::from_bits(sub.to_bits()), sub);
        assert_ne!(
            sub.to_bits(),
            Subresource::mips(2, 3, 0).to_bits(),
            "array slice must participate in the key"
        );
    }

    #[test]
    fn input_layout_streams() {
        let layout = InputLayout {
            topology: PrimitiveTopology::TriangleList,
            channels: vec![
                VertexChannel {
                    semantic: VertexSemantic::Position,
                    format: Format::R32G32B32_SFLOAT,
                    stream: 0,
                },
                VertexChannel {
                    semantic: VertexSemantic::Normal,
                    format: Format::R32G32B32_SFLOAT,
                    stream: 0,
                },
                VertexChannel {
                    semantic: VertexSemantic::TexCoord0,
                    format: Format::R32G32_SFLOAT,
                    stream: 2,
                },
            ],
        };
        assert_eq!(layout.active_stream_mask(), 0b101);
        assert_eq!(layout.stream_stride(0), 24);
        assert_eq!(layout.stream_stride(2), 8);
        assert_eq!(layout.channel_offset(1), 12);
        assert_eq!(layout.total_stride(), 32);
        assert_eq!(layout.active_stream_mask().count_ones(), 2);
    }
}
