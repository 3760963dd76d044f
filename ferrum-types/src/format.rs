use crate::TextureDimension;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ImageAspectFlags: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Texel formats used by the core.
///
/// The names follow the Vulkan spelling so the translation table in the GPU
/// layer stays mechanical.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Format {
    #[default]
    Undefined,
    R8_UNORM,
    R8G8_UNORM,
    R8G8B8A8_UNORM,
    R8G8B8A8_SRGB,
    B8G8R8A8_UNORM,
    B8G8R8A8_SRGB,
    R16G16_SFLOAT,
    R16G16B16A16_SFLOAT,
    R32_UINT,
    R32_SINT,
    R32_SFLOAT,
    R32G32_UINT,
    R32G32_SINT,
    R32G32_SFLOAT,
    R32G32B32_UINT,
    R32G32B32_SINT,
    R32G32B32_SFLOAT,
    R32G32B32A32_UINT,
    R32G32B32A32_SINT,
    R32G32B32A32_SFLOAT,
    D32_SFLOAT,
    D24_UNORM_S8_UINT,
    BC1_RGBA_UNORM,
    BC3_UNORM,
    BC5_UNORM,
    BC7_UNORM,
}

/// Per-format layout facts used wherever staging sizes are computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatInfo {
    /// Bytes per texel, or per compression block for block formats.
    pub block_byte_size: u8,
    pub block_width: u8,
    pub block_height: u8,
    pub aspects: ImageAspectFlags,
}

impl FormatInfo {
    const fn color(block_byte_size: u8) -> Self {
        Self {
            block_byte_size,
            block_width: 1,
            block_height: 1,
            aspects: ImageAspectFlags::COLOR,
        }
    }

    const fn compressed(block_byte_size: u8) -> Self {
        Self {
            block_byte_size,
            block_width: 4,
            block_height: 4,
            aspects: ImageAspectFlags::COLOR,
        }
    }

    pub fn is_block_compressed(&self) -> bool {
        self.block_width > 1
    }
}

impl Format {
    pub fn info(self) -> FormatInfo {
        match self {
            Self::Undefined => FormatInfo::color(0),
            Self::R8_UNORM => FormatInfo::color(1),
            Self::R8G8_UNORM => FormatInfo::color(2),
            Self::R8G8B8A8_UNORM
            | Self::R8G8B8A8_SRGB
            | Self::B8G8R8A8_UNORM
            | Self::B8G8R8A8_SRGB => FormatInfo::color(4),
            Self::R16G16_SFLOAT => FormatInfo::color(4),
            Self::R16G16B16A16_SFLOAT => FormatInfo::color(8),
            Self::R32_UINT | Self::R32_SINT | Self::R32_SFLOAT => FormatInfo::color(4),
            Self::R32G32_UINT | Self::R32G32_SINT | Self::R32G32_SFLOAT => FormatInfo::color(8),
            Self::R32G32B32_UINT | Self::R32G32B32_SINT | Self::R32G32B32_SFLOAT => {
                FormatInfo::color(12)
            }
            Self::R32G32B32A32_UINT | Self::R32G32B32A32_SINT | Self::R32G32B32A32_SFLOAT => {
                FormatInfo::color(16)
            }
            Self::D32_SFLOAT => FormatInfo {
                block_byte_size: 4,
                block_width: 1,
                block_height: 1,
                aspects: ImageAspectFlags::DEPTH,
            },
            Self::D24_UNORM_S8_UINT => FormatInfo {
                block_byte_size: 4,
                block_width: 1,
                block_height: 1,
                aspects: ImageAspectFlags::DEPTH.union(ImageAspectFlags::STENCIL),
            },
            Self::BC1_RGBA_UNORM => FormatInfo::compressed(8),
            Self::BC3_UNORM | Self::BC5_UNORM | Self::BC7_UNORM => FormatInfo::compressed(16),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    /// Extent of `mip`, never rounding below one texel.
    pub fn mip(self, mip: u32) -> Self {
        Self {
            width: (self.width >> mip).max(1),
            height: (self.height >> mip).max(1),
            depth: (self.depth >> mip).max(1),
        }
    }
}

pub const fn ceil_div(value: u32, divisor: u32) -> u32 {
    (value + divisor - 1) / divisor
}

impl FormatInfo {
    /// Byte size of one array slice of `mip`, rounding block-compressed
    /// dimensions up to whole 4x4 blocks.
    pub fn mip_byte_size(&self, extent: Extent3d, mip: u32) -> u32 {
        let extent = extent.mip(mip);
        let blocks_x = ceil_div(extent.width, u32::from(self.block_width));
        let blocks_y = ceil_div(extent.height, u32::from(self.block_height));
        blocks_x * blocks_y * extent.depth * u32::from(self.block_byte_size)
    }

    /// Byte size of a contiguous mip range of one array slice.
    pub fn mip_range_byte_size(&self, extent: Extent3d, first_mip: u32, mip_count: u32) -> u32 {
        (first_mip..first_mip + mip_count)
            .map(|mip| self.mip_byte_size(extent, mip))
            .sum()
    }
}

/// Validates the dimensional invariants of a texture description.
pub fn validate_texture_desc(desc: &crate::TextureDesc) -> Result<(), crate::ErrorKind> {
    use crate::ErrorKind;

    if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
        return Err(ErrorKind::InvalidArgument("texture extent must be non-zero"));
    }
    if desc.mip_count == 0 || desc.array_size == 0 {
        return Err(ErrorKind::InvalidArgument(
            "texture mip and array counts must be non-zero",
        ));
    }
    if desc.sample_count == 0 || !desc.sample_count.is_power_of_two() || desc.sample_count > 64 {
        return Err(ErrorKind::InvalidArgument(
            "sample count must be a power of two up to 64",
        ));
    }
    match desc.dimension {
        TextureDimension::D3 if desc.array_size > 1 => {
            Err(ErrorKind::InvalidArgument("arrays of 3D textures are not allowed"))
        }
        TextureDimension::Cube if desc.array_size % 6 != 0 => Err(ErrorKind::InvalidArgument(
            "cube textures need a multiple of 6 array slices",
        )),
        TextureDimension::D1 if desc.height > 1 || desc.depth > 1 => Err(
            ErrorKind::InvalidArgument("1D textures must have height = depth = 1"),
        ),
        TextureDimension::D2 | TextureDimension::Cube if desc.depth > 1 => Err(
            ErrorKind::InvalidArgument("non-3D textures must have depth = 1"),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, TextureDesc};

    #[test]
    fn block_compressed_mip_sizes() {
        let info = Format::BC7_UNORM.info();
        let extent = Extent3d {
            width: 16,
            height: 16,
            depth: 1,
        };
        // 4x4 blocks of 16 bytes.
        assert_eq!(info.mip_byte_size(extent, 0), 4 * 4 * 16);
        // 8x8 -> 2x2 blocks.
        assert_eq!(info.mip_byte_size(extent, 1), 2 * 2 * 16);
        // 1x1 still occupies a whole block.
        assert_eq!(info.mip_byte_size(extent, 4), 16);
        assert_eq!(info.mip_byte_size(extent, 6), 16);
    }

    #[test]
    fn linear_mip_sizes() {
        let info = Format::R8G8B8A8_UNORM.info();
        let extent = Extent3d {
            width: 5,
            height: 3,
            depth: 1,
        };
        assert_eq!(info.mip_byte_size(extent, 0), 5 * 3 * 4);
        assert_eq!(info.mip_byte_size(extent, 1), 2 * 4);
        assert_eq!(info.mip_range_byte_size(extent, 0, 2), 5 * 3 * 4 + 2 * 4);
    }

    #[test]
    fn texture_desc_invariants() {
        let mut desc = TextureDesc::texture_2d(16, 16, Format::R8G8B8A8_UNORM);
        assert_eq!(validate_texture_desc(&desc), Ok(()));

        desc.dimension = TextureDimension::D3;
        desc.depth = 4;
        desc.array_size = 2;
        assert!(matches!(
            validate_texture_desc(&desc),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }
}
