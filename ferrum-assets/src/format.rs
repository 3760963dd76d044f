//! On-disk formats: texture and model asset files and the compression
//! block container both are chunked into.
//!
//! Everything is little-endian `repr(C)`; headers are read and written
//! through `bytemuck` Pod casts.

use bytemuck::{Pod, Zeroable};

/// Payload bytes carried by one compression block. Asset tiers are sized
/// in whole blocks: `block_count = ceil_div(byte_size, BLOCK_SIZE)`.
pub const BLOCK_SIZE: u32 = 64 * 1024;

pub const TEXTURE_MAGIC: u32 = u32::from_le_bytes(*b"FTX\0");
pub const MODEL_MAGIC: u32 = u32::from_le_bytes(*b"FMD\0");

pub const MAX_MIP_COUNT: u32 = 16;

pub const fn ceil_div(value: u32, divisor: u32) -> u32 {
    (value + divisor - 1) / divisor
}

pub const fn block_count(byte_size: u32) -> u32 {
    ceil_div(byte_size, BLOCK_SIZE)
}

// --- texture assets ---------------------------------------------------

/// `fe::TextureDesc` flattened into fixed-width fields.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DiskTextureDesc {
    pub dimension: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub array_size: u32,
    pub sample_count: u32,
    pub format: u32,
}

const DIMENSIONS: &[fe::TextureDimension] = &[
    fe::TextureDimension::D1,
    fe::TextureDimension::D2,
    fe::TextureDimension::D3,
    fe::TextureDimension::Cube,
];

const FORMATS: &[fe::Format] = &[
    fe::Format::Undefined,
    fe::Format::R8_UNORM,
    fe::Format::R8G8_UNORM,
    fe::Format::R8G8B8A8_UNORM,
    fe::Format::R8G8B8A8_SRGB,
    fe::Format::B8G8R8A8_UNORM,
    fe::Format::B8G8R8A8_SRGB,
    fe::Format::R16G16_SFLOAT,
    fe::Format::R16G16B16A16_SFLOAT,
    fe::Format::R32_UINT,
    fe::Format::R32_SINT,
    fe::Format::R32_SFLOAT,
    fe::Format::R32G32_UINT,
    fe::Format::R32G32_SINT,
    fe::Format::R32G32_SFLOAT,
    fe::Format::R32G32B32_UINT,
    fe::Format::R32G32B32_SINT,
    fe::Format::R32G32B32_SFLOAT,
    fe::Format::R32G32B32A32_UINT,
    fe::Format::R32G32B32A32_SINT,
    fe::Format::R32G32B32A32_SFLOAT,
    fe::Format::D32_SFLOAT,
    fe::Format::D24_UNORM_S8_UINT,
    fe::Format::BC1_RGBA_UNORM,
    fe::Format::BC3_UNORM,
    fe::Format::BC5_UNORM,
    fe::Format::BC7_UNORM,
];

fn encode_enum<T: Copy + PartialEq>(table: &[T], value: T) -> u32 {
    table
        .iter()
        .position(|&entry| entry == value)
        .expect("value missing from the encoding table") as u32
}

fn decode_enum<T: Copy>(table: &[T], value: u32) -> Result<T, fe::ErrorKind> {
    table
        .get(value as usize)
        .copied()
        .ok_or(fe::ErrorKind::InvalidArgument("unknown enum encoding"))
}

impl DiskTextureDesc {
    pub fn pack(desc: &fe::TextureDesc) -> Self {
        Self {
            dimension: encode_enum(DIMENSIONS, desc.dimension),
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
            mip_count: desc.mip_count,
            array_size: desc.array_size,
            sample_count: desc.sample_count,
            format: encode_enum(FORMATS, desc.format),
        }
    }

    pub fn unpack(&self) -> Result<fe::TextureDesc, fe::ErrorKind> {
        let desc = fe::TextureDesc {
            dimension: decode_enum(DIMENSIONS, self.dimension)?,
            width: self.width,
            height: self.height,
            depth: self.depth,
            mip_count: self.mip_count,
            array_size: self.array_size,
            sample_count: self.sample_count,
            format: decode_enum(FORMATS, self.format)?,
            bind_flags: fe::ImageBindFlags::SHADER_READ | fe::ImageBindFlags::TRANSFER_DST,
            usage: fe::ResourceUsage::DeviceOnly,
        };
        fe::validate_texture_desc(&desc)?;
        Ok(desc)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureHeader {
    pub magic: u32,
    pub desc: DiskTextureDesc,
}

/// One streaming unit of a texture: a contiguous mip range of one array
/// slice, stored as `block_count` blocks. Chains are listed coarsest
/// first, matching the block layout in the file.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MipChainInfo {
    pub most_detailed_mip: u32,
    pub mip_count: u32,
    pub array_slice: u32,
    pub block_count: u32,
    pub reserved: u32,
}

// --- model assets -----------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ModelHeader {
    pub magic: u32,
    pub mesh_count: u32,
    /// LOD payloads are stored coarsest first; file index 0 is the least
    /// detailed level.
    pub lod_count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DiskVertexChannel {
    pub semantic: u32,
    pub format: u32,
    pub stream: u32,
    pub reserved: u32,
}

const SEMANTICS: &[fe::VertexSemantic] = &[
    fe::VertexSemantic::Position,
    fe::VertexSemantic::Normal,
    fe::VertexSemantic::Tangent,
    fe::VertexSemantic::Bitangent,
    fe::VertexSemantic::TexCoord0,
    fe::VertexSemantic::TexCoord1,
    fe::VertexSemantic::Color,
];

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DiskInputLayout {
    pub topology: u32,
    pub channel_count: u32,
    pub channels: [DiskVertexChannel; fe::MAX_VERTEX_CHANNELS],
}

const TOPOLOGIES: &[fe::PrimitiveTopology] = &[
    fe::PrimitiveTopology::PointList,
    fe::PrimitiveTopology::LineList,
    fe::PrimitiveTopology::LineStrip,
    fe::PrimitiveTopology::TriangleList,
    fe::PrimitiveTopology::TriangleStrip,
];

impl DiskInputLayout {
    pub fn pack(layout: &fe::InputLayout) -> Self {
        assert!(layout.channels.len() <= fe::MAX_VERTEX_CHANNELS);
        let mut channels = [DiskVertexChannel::default(); fe::MAX_VERTEX_CHANNELS];
        for (slot, channel) in channels.iter_mut().zip(&layout.channels) {
            *slot = DiskVertexChannel {
                semantic: encode_enum(SEMANTICS, channel.semantic),
                format: encode_enum(FORMATS, channel.format),
                stream: u32::from(channel.stream),
                reserved: 0,
            };
        }
        Self {
            topology: encode_enum(TOPOLOGIES, layout.topology),
            channel_count: layout.channels.len() as u32,
            channels,
        }
    }

    pub fn unpack(&self) -> Result<fe::InputLayout, fe::ErrorKind> {
        if self.channel_count as usize > fe::MAX_VERTEX_CHANNELS {
            return Err(fe::ErrorKind::InvalidArgument("too many vertex channels"));
        }
        let mut channels = Vec::with_capacity(self.channel_count as usize);
        for channel in &self.channels[..self.channel_count as usize] {
            channels.push(fe::VertexChannel {
                semantic: decode_enum(SEMANTICS, channel.semantic)?,
                format: decode_enum(FORMATS, channel.format)?,
                stream: channel.stream as u8,
            });
        }
        Ok(fe::InputLayout {
            topology: decode_enum(TOPOLOGIES, self.topology)?,
            channels,
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshInfo {
    pub layout: DiskInputLayout,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshLodInfo {
    pub vertex_count: u32,
    pub index_count: u32,
    pub meshlet_count: u32,
    pub primitive_count: u32,
}

/// Byte size of one LOD payload: the per-mesh sum of vertex, index,
/// meshlet-header and packed-triangle data.
pub fn lod_payload_size(meshes: &[MeshInfo], lods: &[MeshLodInfo], lod_count: u32, lod_index: u32) -> u32 {
    let mut size = 0;
    for (mesh_index, mesh) in meshes.iter().enumerate() {
        let lod = &lods[mesh_index * lod_count as usize + lod_index as usize];
        let vertex_size = mesh
            .layout
            .unpack()
            .map(|layout| layout.total_stride())
            .unwrap_or(0);
        size += vertex_size * lod.vertex_count;
        size += 4 * lod.index_count;
        size += std::mem::size_of::<fe::MeshletHeader>() as u32 * lod.meshlet_count;
        size += std::mem::size_of::<fe::PackedTriangle>() as u32 * lod.primitive_count;
    }
    size
}

// --- byte-level access ------------------------------------------------

pub struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn read<T: Pod>(&mut self) -> Result<T, fe::ErrorKind> {
        let size = std::mem::size_of::<T>();
        if self.remaining() < size {
            return Err(fe::ErrorKind::IoError);
        }
        let value = bytemuck::pod_read_unaligned(&self.data[self.offset..self.offset + size]);
        self.offset += size;
        Ok(value)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], fe::ErrorKind> {
        if self.remaining() < len {
            return Err(fe::ErrorKind::IoError);
        }
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.offset..];
        self.offset = self.data.len();
        bytes
    }
}

#[derive(Default)]
pub struct ByteWriter {
    data: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<T: Pod>(&mut self, value: &T) {
        self.data.extend_from_slice(bytemuck::bytes_of(value));
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Parses the texture header block: header plus mip-chain records, read
/// until the chains cover every mip of the description.
pub fn read_texture_header(
    reader: &mut ByteReader<'_>,
) -> Result<(TextureHeader, Vec<MipChainInfo>), fe::ErrorKind> {
    let header: TextureHeader = reader.read()?;
    if header.magic != TEXTURE_MAGIC {
        return Err(fe::ErrorKind::InvalidArgument("bad texture magic"));
    }
    if header.desc.mip_count == 0 || header.desc.mip_count > MAX_MIP_COUNT {
        return Err(fe::ErrorKind::InvalidArgument("bad texture mip count"));
    }

    let mut chains = Vec::new();
    let mut covered_mips = 0;
    while covered_mips < header.desc.mip_count {
        let chain: MipChainInfo = reader.read()?;
        if chain.mip_count == 0
            || chain.most_detailed_mip + chain.mip_count > header.desc.mip_count
        {
            return Err(fe::ErrorKind::InvalidArgument("bad mip chain record"));
        }
        covered_mips += chain.mip_count;
        chains.push(chain);
    }
    if covered_mips != header.desc.mip_count {
        return Err(fe::ErrorKind::InvalidArgument("mip chains overlap"));
    }
    Ok((header, chains))
}

pub fn write_texture_header(
    writer: &mut ByteWriter,
    header: &TextureHeader,
    chains: &[MipChainInfo],
) {
    writer.write(header);
    for chain in chains {
        writer.write(chain);
    }
}

/// Parses the model header block: header, per-mesh info with interleaved
/// LOD records, then `lod_count - 1` LOD error floats.
#[allow(clippy::type_complexity)]
pub fn read_model_header(
    reader: &mut ByteReader<'_>,
) -> Result<(ModelHeader, Vec<MeshInfo>, Vec<MeshLodInfo>, Vec<f32>), fe::ErrorKind> {
    let header: ModelHeader = reader.read()?;
    if header.magic != MODEL_MAGIC {
        return Err(fe::ErrorKind::InvalidArgument("bad model magic"));
    }
    if header.mesh_count == 0 || header.lod_count == 0 {
        return Err(fe::ErrorKind::InvalidArgument("empty model"));
    }

    let mut meshes = Vec::with_capacity(header.mesh_count as usize);
    let mut lods = Vec::with_capacity((header.mesh_count * header.lod_count) as usize);
    for _ in 0..header.mesh_count {
        meshes.push(reader.read::<MeshInfo>()?);
        for _ in 0..header.lod_count {
            lods.push(reader.read::<MeshLodInfo>()?);
        }
    }

    let mut lod_errors = Vec::with_capacity(header.lod_count as usize - 1);
    for _ in 0..header.lod_count - 1 {
        lod_errors.push(reader.read::<f32>()?);
    }

    Ok((header, meshes, lods, lod_errors))
}

pub fn write_model_header(
    writer: &mut ByteWriter,
    header: &ModelHeader,
    meshes: &[MeshInfo],
    lods: &[MeshLodInfo],
    lod_errors: &[f32],
) {
    debug_assert_eq!(meshes.len() as u32, header.mesh_count);
    debug_assert_eq!(lods.len() as u32, header.mesh_count * header.lod_count);
    debug_assert_eq!(lod_errors.len() as u32, header.lod_count - 1);

    writer.write(header);
    for (mesh_index, mesh) in meshes.iter().enumerate() {
        writer.write(mesh);
        for lod in &lods[mesh_index * header.lod_count as usize..][..header.lod_count as usize] {
            writer.write(lod);
        }
    }
    for error in lod_errors {
        writer.write(error);
    }
}

// --- compression block container --------------------------------------

pub const CODEC_NONE: u32 = 0;
/// Marks the last page of a block.
pub const LAST_PAGE: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BlockHeader {
    pub codec: u32,
    pub uncompressed_size: u32,
}

/// After compaction `next_page_offset` equals `compressed_size`; before,
/// it is the padded distance to the next page header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PageHeader {
    pub next_page_offset: u32,
    pub compressed_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BlockFooter {
    pub checksum: u32,
}

fn payload_checksum(bytes: &[u8]) -> u32 {
    // FNV-1a, truncated; enough to catch torn blocks.
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Page alignment of the uncompacted form produced by encoders.
const PAGE_PADDING: u32 = 16;

/// Writes one block in the padded, uncompacted page form.
pub fn write_block_pages(writer: &mut ByteWriter, pages: &[&[u8]]) {
    assert!(!pages.is_empty());
    let total: usize = pages.iter().map(|page| page.len()).sum();
    assert!(total as u32 <= BLOCK_SIZE);

    writer.write(&BlockHeader {
        codec: CODEC_NONE,
        uncompressed_size: total as u32,
    });

    let mut checksum = 0u32;
    for (index, page) in pages.iter().enumerate() {
        let padded = (page.len() as u32 + PAGE_PADDING - 1) / PAGE_PADDING * PAGE_PADDING;
        let next_page_offset = if index + 1 == pages.len() {
            LAST_PAGE
        } else {
            padded
        };
        writer.write(&PageHeader {
            next_page_offset,
            compressed_size: page.len() as u32,
        });
        writer.write_bytes(page);
        if next_page_offset != LAST_PAGE {
            for _ in page.len() as u32..padded {
                writer.write_bytes(&[0]);
            }
        }
        checksum ^= payload_checksum(page);
    }

    writer.write(&BlockFooter { checksum });
}

/// Writes one block with a single page, already in compacted form.
pub fn write_block(writer: &mut ByteWriter, payload: &[u8]) {
    write_block_pages(writer, &[payload]);
}

/// Rewrites `next_page_offset` to each page's start, dropping the padding
/// between pages; the texture compressor runs this before writing.
pub fn compact_block(reader: &mut ByteReader<'_>, writer: &mut ByteWriter) -> Result<(), fe::ErrorKind> {
    let header: BlockHeader = reader.read()?;
    writer.write(&header);

    let mut page: PageHeader = reader.read()?;
    loop {
        let mut compacted = page;
        if compacted.next_page_offset != LAST_PAGE {
            compacted.next_page_offset = page.compressed_size;
        }
        writer.write(&compacted);

        let payload = reader.read_bytes(page.compressed_size as usize)?;
        writer.write_bytes(payload);

        if page.next_page_offset == LAST_PAGE {
            break;
        }
        // Skip the padding up to the next page header.
        reader.read_bytes((page.next_page_offset - page.compressed_size) as usize)?;
        page = reader.read()?;
    }

    writer.write(&reader.read::<BlockFooter>()?);
    Ok(())
}

/// Reads one compacted block, returning the concatenated page payloads.
pub fn read_block(reader: &mut ByteReader<'_>) -> Result<Vec<u8>, fe::ErrorKind> {
    let header: BlockHeader = reader.read()?;
    if header.codec != CODEC_NONE {
        return Err(fe::ErrorKind::NotSupported);
    }
    if header.uncompressed_size > BLOCK_SIZE {
        return Err(fe::ErrorKind::IoError);
    }

    let mut payload = Vec::with_capacity(header.uncompressed_size as usize);
    let mut checksum = 0u32;
    loop {
        let page: PageHeader = reader.read()?;
        let bytes = reader.read_bytes(page.compressed_size as usize)?;
        payload.extend_from_slice(bytes);
        checksum ^= payload_checksum(bytes);
        if page.next_page_offset == LAST_PAGE {
            break;
        }
        if page.next_page_offset != page.compressed_size {
            return Err(fe::ErrorKind::IoError);
        }
    }

    let footer: BlockFooter = reader.read()?;
    if footer.checksum != checksum || payload.len() as u32 != header.uncompressed_size {
        return Err(fe::ErrorKind::IoError);
    }
    Ok(payload)
}

/// Chunks `payload` into compacted blocks of at most [`BLOCK_SIZE`] bytes.
pub fn write_blocks(writer: &mut ByteWriter, payload: &[u8]) -> u32 {
    let mut count = 0;
    if payload.is_empty() {
        return 0;
    }
    for chunk in payload.chunks(BLOCK_SIZE as usize) {
        write_block(writer, chunk);
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_header_round_trip() {
        let desc = fe::TextureDesc {
            dimension: fe::TextureDimension::D2,
            width: 256,
            height: 128,
            depth: 1,
            mip_count: 5,
            array_size: 1,
            sample_count: 1,
            format: fe::Format::BC7_UNORM,
            bind_flags: fe::ImageBindFlags::SHADER_READ | fe::ImageBindFlags::TRANSFER_DST,
            usage: fe::ResourceUsage::DeviceOnly,
        };
        let header = TextureHeader {
            magic: TEXTURE_MAGIC,
            desc: DiskTextureDesc::pack(&desc),
        };
        let chains = vec![
            MipChainInfo {
                most_detailed_mip: 2,
                mip_count: 3,
                array_slice: 0,
                block_count: 1,
                reserved: 0,
            },
            MipChainInfo {
                most_detailed_mip: 0,
                mip_count: 2,
                array_slice: 0,
                block_count: 2,
                reserved: 0,
            },
        ];

        let mut writer = ByteWriter::new();
        write_texture_header(&mut writer, &header, &chains);
        let bytes = writer.into_inner();

        let mut reader = ByteReader::new(&bytes);
        let (decoded, decoded_chains) = read_texture_header(&mut reader).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded_chains, chains);
        assert_eq!(decoded.desc.unpack().unwrap(), desc);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn bad_texture_magic_is_rejected() {
        let mut writer = ByteWriter::new();
        writer.write(&TextureHeader {
            magic: 0xdead_beef,
            ..Default::default()
        });
        let bytes = writer.into_inner();
        assert!(read_texture_header(&mut ByteReader::new(&bytes)).is_err());
    }

    #[test]
    fn model_header_round_trip() {
        let layout = fe::InputLayout::interleaved(
            fe::PrimitiveTopology::TriangleList,
            &[
                (fe::VertexSemantic::Position, fe::Format::R32G32B32_SFLOAT),
                (fe::VertexSemantic::TexCoord0, fe::Format::R32G32_SFLOAT),
            ],
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
        let lods: Vec<MeshLodInfo> = (0..6)
            .map(|index| MeshLodInfo {
                vertex_count: 100 + index,
                index_count: 300 + index,
                meshlet_count: 0,
                primitive_count: 0,
            })
            .collect();
        let lod_errors = vec![0.1, 0.4];

        let mut writer = ByteWriter::new();
        write_model_header(&mut writer, &header, &meshes, &lods, &lod_errors);
        let bytes = writer.into_inner();

        let mut reader = ByteReader::new(&bytes);
        let (decoded, decoded_meshes, decoded_lods, decoded_errors) =
            read_model_header(&mut reader).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded_meshes, meshes);
        assert_eq!(decoded_lods, lods);
        assert_eq!(decoded_errors, lod_errors);
        assert_eq!(decoded_meshes[0].layout.unpack().unwrap(), layout);
    }

    #[test]
    fn lod_payload_sizes_sum_all_meshes() {
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
        // Two meshes, two LODs each.
        let lods = vec![
            MeshLodInfo {
                vertex_count: 10,
                index_count: 30,
                meshlet_count: 1,
                primitive_count: 10,
                // mesh 0
            },
            MeshLodInfo {
                vertex_count: 4,
                index_count: 6,
                meshlet_count: 0,
                primitive_count: 0,
            },
            MeshLodInfo {
                vertex_count: 20,
                index_count: 60,
                meshlet_count: 2,
                primitive_count: 20,
                // mesh 1
            },
            MeshLodInfo {
                vertex_count: 8,
                index_count: 12,
                meshlet_count: 0,
                primitive_count: 0,
            },
        ];

        // LOD 0: both meshes' first records.
        let expected0 = (12 * 10 + 4 * 30 + 16 + 4 * 10) + (12 * 20 + 4 * 60 + 32 + 4 * 20);
        assert_eq!(lod_payload_size(&meshes, &lods, 2, 0), expected0);

        let expected1 = (12 * 4 + 4 * 6) + (12 * 8 + 4 * 12);
        assert_eq!(lod_payload_size(&meshes, &lods, 2, 1), expected1);

        assert_eq!(block_count(expected0), 1);
        assert_eq!(block_count(BLOCK_SIZE + 1), 2);
        assert_eq!(block_count(BLOCK_SIZE), 1);
    }

    #[test]
    fn block_round_trip_and_compaction() {
        let page_a = vec![7u8; 1000];
        let page_b = vec![9u8; 333];

        let mut padded = ByteWriter::new();
        write_block_pages(&mut padded, &[&page_a, &page_b]);
        let padded_bytes = padded.into_inner();

        let mut compacted = ByteWriter::new();
        compact_block(&mut ByteReader::new(&padded_bytes), &mut compacted).unwrap();
        let compacted_bytes = compacted.into_inner();
        assert!(compacted_bytes.len() <= padded_bytes.len());

        let payload = read_block(&mut ByteReader::new(&compacted_bytes)).unwrap();
        assert_eq!(payload.len(), 1333);
        assert_eq!(&payload[..1000], &page_a[..]);
        assert_eq!(&payload[1000..], &page_b[..]);
    }

    #[test]
    fn corrupt_block_payload_fails_the_checksum() {
        let mut writer = ByteWriter::new();
        write_block(&mut writer, &[1, 2, 3, 4, 5]);
        let mut bytes = writer.into_inner();

        let payload_start = std::mem::size_of::<BlockHeader>() + std::mem::size_of::<PageHeader>();
        bytes[payload_start] ^= 0xff;
        assert_eq!(
            read_block(&mut ByteReader::new(&bytes)).unwrap_err(),
            fe::ErrorKind::IoError
        );
    }

    #[test]
    fn whole_payload_chunks_into_expected_blocks() {
        let payload = vec![0x5au8; BLOCK_SIZE as usize + 17];
        let mut writer = ByteWriter::new();
        let count = write_blocks(&mut writer, &payload);
        assert_eq!(count, block_count(payload.len() as u32));

        let bytes = writer.into_inner();
        let mut reader = ByteReader::new(&bytes);
        let mut read_back = Vec::new();
        for _ in 0..count {
            read_back.extend(read_block(&mut reader).unwrap());
        }
        assert_eq!(read_back, payload);
        assert_eq!(reader.remaining(), 0);
    }
}
