//! Pure translation tables from core types to Vulkan values.

use ash::vk;

pub fn map_format(format: fe::Format) -> vk::Format {
    use fe::Format as F;
    match format {
        F::Undefined => vk::Format::UNDEFINED,
        F::R8_UNORM => vk::Format::R8_UNORM,
        F::R8G8_UNORM => vk::Format::R8G8_UNORM,
        F::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        F::R8G8B8A8_SRGB => vk::Format::R8G8B8A8_SRGB,
        F::B8G8R8A8_UNORM => vk::Format::B8G8R8A8_UNORM,
        F::B8G8R8A8_SRGB => vk::Format::B8G8R8A8_SRGB,
        F::R16G16_SFLOAT => vk::Format::R16G16_SFLOAT,
        F::R16G16B16A16_SFLOAT => vk::Format::R16G16B16A16_SFLOAT,
        F::R32_UINT => vk::Format::R32_UINT,
        F::R32_SINT => vk::Format::R32_SINT,
        F::R32_SFLOAT => vk::Format::R32_SFLOAT,
        F::R32G32_UINT => vk::Format::R32G32_UINT,
        F::R32G32_SINT => vk::Format::R32G32_SINT,
        F::R32G32_SFLOAT => vk::Format::R32G32_SFLOAT,
        F::R32G32B32_UINT => vk::Format::R32G32B32_UINT,
        F::R32G32B32_SINT => vk::Format::R32G32B32_SINT,
        F::R32G32B32_SFLOAT => vk::Format::R32G32B32_SFLOAT,
        F::R32G32B32A32_UINT => vk::Format::R32G32B32A32_UINT,
        F::R32G32B32A32_SINT => vk::Format::R32G32B32A32_SINT,
        F::R32G32B32A32_SFLOAT => vk::Format::R32G32B32A32_SFLOAT,
        F::D32_SFLOAT => vk::Format::D32_SFLOAT,
        F::D24_UNORM_S8_UINT => vk::Format::D24_UNORM_S8_UINT,
        F::BC1_RGBA_UNORM => vk::Format::BC1_RGBA_UNORM_BLOCK,
        F::BC3_UNORM => vk::Format::BC3_UNORM_BLOCK,
        F::BC5_UNORM => vk::Format::BC5_UNORM_BLOCK,
        F::BC7_UNORM => vk::Format::BC7_UNORM_BLOCK,
    }
}

pub fn map_from_vk_format(format: vk::Format) -> fe::Format {
    use fe::Format as F;
    match format {
        vk::Format::R8G8B8A8_UNORM => F::R8G8B8A8_UNORM,
        vk::Format::R8G8B8A8_SRGB => F::R8G8B8A8_SRGB,
        vk::Format::B8G8R8A8_UNORM => F::B8G8R8A8_UNORM,
        vk::Format::B8G8R8A8_SRGB => F::B8G8R8A8_SRGB,
        _ => F::Undefined,
    }
}

pub fn map_aspect_flags(format: fe::Format) -> vk::ImageAspectFlags {
    let aspects = format.info().aspects;
    let mut result = vk::ImageAspectFlags::empty();
    if aspects.contains(fe::ImageAspectFlags::COLOR) {
        result |= vk::ImageAspectFlags::COLOR;
    }
    if aspects.contains(fe::ImageAspectFlags::DEPTH) {
        result |= vk::ImageAspectFlags::DEPTH;
    }
    if aspects.contains(fe::ImageAspectFlags::STENCIL) {
        result |= vk::ImageAspectFlags::STENCIL;
    }
    result
}

pub fn map_sample_count(sample_count: u32) -> vk::SampleCountFlags {
    debug_assert!(sample_count.is_power_of_two() && sample_count <= 64);
    vk::SampleCountFlags::from_raw(sample_count)
}

pub fn map_buffer_usage(flags: fe::BufferBindFlags) -> vk::BufferUsageFlags {
    use fe::BufferBindFlags as B;
    let mut result = vk::BufferUsageFlags::empty();
    if flags.contains(B::VERTEX_BUFFER) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
    }
    if flags.contains(B::INDEX_BUFFER) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
    }
    if flags.contains(B::CONSTANT_BUFFER) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if flags.contains(B::SHADER_RESOURCE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
    }
    if flags.contains(B::UNORDERED_ACCESS) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
    }
    if flags.contains(B::INDIRECT_ARGUMENT) {
        result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if flags.contains(B::TRANSFER_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if flags.contains(B::TRANSFER_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    result
}

pub fn map_image_usage(flags: fe::ImageBindFlags) -> vk::ImageUsageFlags {
    use fe::ImageBindFlags as B;
    let mut result = vk::ImageUsageFlags::empty();
    if flags.contains(B::SHADER_READ) {
        result |= vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    }
    if flags.contains(B::UNORDERED_ACCESS) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if flags.contains(B::COLOR_TARGET) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST;
    }
    if flags.contains(B::DEPTH_STENCIL_TARGET) {
        result |=
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST;
    }
    if flags.contains(B::TRANSFER_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if flags.contains(B::TRANSFER_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    result
}

pub fn map_image_type(dimension: fe::TextureDimension) -> vk::ImageType {
    use fe::TextureDimension as D;
    match dimension {
        D::D1 => vk::ImageType::TYPE_1D,
        D::D2 | D::Cube => vk::ImageType::TYPE_2D,
        D::D3 => vk::ImageType::TYPE_3D,
    }
}

pub fn map_image_view_type(dimension: fe::TextureDimension, is_array: bool) -> vk::ImageViewType {
    use fe::TextureDimension as D;
    match dimension {
        D::D1 if is_array => vk::ImageViewType::TYPE_1D_ARRAY,
        D::D1 => vk::ImageViewType::TYPE_1D,
        D::D2 if is_array => vk::ImageViewType::TYPE_2D_ARRAY,
        D::D2 => vk::ImageViewType::TYPE_2D,
        D::D3 => {
            debug_assert!(!is_array, "arrays of 3D images are not allowed");
            vk::ImageViewType::TYPE_3D
        }
        D::Cube if is_array => vk::ImageViewType::CUBE_ARRAY,
        D::Cube => vk::ImageViewType::CUBE,
    }
}

pub fn map_memory_usage(usage: fe::ResourceUsage) -> gpu_alloc::UsageFlags {
    use gpu_alloc::UsageFlags;
    match usage {
        fe::ResourceUsage::DeviceOnly => UsageFlags::FAST_DEVICE_ACCESS,
        fe::ResourceUsage::HostWriteThrough => UsageFlags::HOST_ACCESS | UsageFlags::UPLOAD,
        fe::ResourceUsage::HostRandomAccess => {
            UsageFlags::HOST_ACCESS | UsageFlags::UPLOAD | UsageFlags::DOWNLOAD
        }
    }
}

pub fn map_filter(filter: fe::Filter) -> vk::Filter {
    match filter {
        fe::Filter::Nearest => vk::Filter::NEAREST,
        fe::Filter::Linear => vk::Filter::LINEAR,
    }
}

pub fn map_mip_filter(filter: fe::Filter) -> vk::SamplerMipmapMode {
    match filter {
        fe::Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
        fe::Filter::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn map_address_mode(mode: fe::AddressMode) -> vk::SamplerAddressMode {
    use fe::AddressMode as A;
    match mode {
        A::Repeat => vk::SamplerAddressMode::REPEAT,
        A::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        A::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        A::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub fn map_compare_op(op: fe::CompareOp) -> vk::CompareOp {
    use fe::CompareOp as C;
    match op {
        C::Never => vk::CompareOp::NEVER,
        C::Always => vk::CompareOp::ALWAYS,
        C::Less => vk::CompareOp::LESS,
        C::Equal => vk::CompareOp::EQUAL,
        C::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        C::Greater => vk::CompareOp::GREATER,
        C::NotEqual => vk::CompareOp::NOT_EQUAL,
        C::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
    }
}

pub fn map_blend_op(op: fe::BlendOperation) -> vk::BlendOp {
    use fe::BlendOperation as B;
    match op {
        B::Add => vk::BlendOp::ADD,
        B::Subtract => vk::BlendOp::SUBTRACT,
        B::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        B::Min => vk::BlendOp::MIN,
        B::Max => vk::BlendOp::MAX,
    }
}

pub fn map_blend_factor(factor: fe::BlendFactor) -> vk::BlendFactor {
    use fe::BlendFactor as B;
    match factor {
        B::Zero => vk::BlendFactor::ZERO,
        B::One => vk::BlendFactor::ONE,
        B::SrcColor => vk::BlendFactor::SRC_COLOR,
        B::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        B::DstColor => vk::BlendFactor::DST_COLOR,
        B::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        B::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        B::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        B::DstAlpha => vk::BlendFactor::DST_ALPHA,
        B::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        B::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
        B::OneMinusConstantColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        B::SrcAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
    }
}

pub fn map_color_components(flags: fe::ColorComponentFlags) -> vk::ColorComponentFlags {
    use fe::ColorComponentFlags as C;
    let mut result = vk::ColorComponentFlags::empty();
    if flags.contains(C::RED) {
        result |= vk::ColorComponentFlags::R;
    }
    if flags.contains(C::GREEN) {
        result |= vk::ColorComponentFlags::G;
    }
    if flags.contains(C::BLUE) {
        result |= vk::ColorComponentFlags::B;
    }
    if flags.contains(C::ALPHA) {
        result |= vk::ColorComponentFlags::A;
    }
    result
}

pub fn map_cull_mode(mode: fe::CullMode) -> vk::CullModeFlags {
    let mut result = vk::CullModeFlags::NONE;
    if mode.contains(fe::CullMode::FRONT) {
        result |= vk::CullModeFlags::FRONT;
    }
    if mode.contains(fe::CullMode::BACK) {
        result |= vk::CullModeFlags::BACK;
    }
    result
}

pub fn map_polygon_mode(mode: fe::PolygonMode) -> vk::PolygonMode {
    use fe::PolygonMode as P;
    match mode {
        P::Fill => vk::PolygonMode::FILL,
        P::Line => vk::PolygonMode::LINE,
        P::Point => vk::PolygonMode::POINT,
    }
}

pub fn map_topology(topology: fe::PrimitiveTopology) -> vk::PrimitiveTopology {
    use fe::PrimitiveTopology as T;
    match topology {
        T::PointList => vk::PrimitiveTopology::POINT_LIST,
        T::LineList => vk::PrimitiveTopology::LINE_LIST,
        T::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        T::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        T::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub fn map_input_rate(rate: fe::InputStreamRate) -> vk::VertexInputRate {
    match rate {
        fe::InputStreamRate::PerVertex => vk::VertexInputRate::VERTEX,
        fe::InputStreamRate::PerInstance => vk::VertexInputRate::INSTANCE,
    }
}

pub fn map_shader_stage(stage: fe::ShaderStage) -> vk::ShaderStageFlags {
    use fe::ShaderStage as S;
    match stage {
        S::Vertex => vk::ShaderStageFlags::VERTEX,
        S::Pixel => vk::ShaderStageFlags::FRAGMENT,
        S::Hull => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        S::Domain => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        S::Geometry => vk::ShaderStageFlags::GEOMETRY,
        S::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub fn map_load_op(op: fe::AttachmentLoadOp) -> vk::AttachmentLoadOp {
    use fe::AttachmentLoadOp as L;
    match op {
        L::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        L::Load => vk::AttachmentLoadOp::LOAD,
        L::Clear => vk::AttachmentLoadOp::CLEAR,
    }
}

pub fn map_store_op(op: fe::AttachmentStoreOp) -> vk::AttachmentStoreOp {
    use fe::AttachmentStoreOp as S;
    match op {
        S::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        S::Store => vk::AttachmentStoreOp::STORE,
    }
}

pub fn map_resource_state_layout(state: fe::ResourceState) -> vk::ImageLayout {
    use fe::ResourceState as R;
    match state {
        R::Undefined => vk::ImageLayout::UNDEFINED,
        R::Common => vk::ImageLayout::GENERAL,
        R::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        R::UnorderedAccess => vk::ImageLayout::GENERAL,
        R::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        R::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        R::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        R::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        R::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        R::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub fn map_resource_state_access(state: fe::ResourceState) -> vk::AccessFlags {
    use fe::ResourceState as R;
    match state {
        R::Undefined | R::Common | R::Present => vk::AccessFlags::empty(),
        R::RenderTarget => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        R::UnorderedAccess => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        R::DepthWrite => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        R::DepthRead => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        R::ShaderResource => vk::AccessFlags::SHADER_READ,
        R::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        R::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
    }
}

pub fn map_pipeline_stages(mask: fe::PipelineStageMask) -> vk::PipelineStageFlags {
    use fe::PipelineStageMask as P;
    let mut result = vk::PipelineStageFlags::empty();
    let pairs = [
        (P::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (P::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (P::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (P::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (
            P::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        (
            P::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        (
            P::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (P::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (P::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (P::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        (P::ALL_GRAPHICS, vk::PipelineStageFlags::ALL_GRAPHICS),
        (P::ALL_COMMANDS, vk::PipelineStageFlags::ALL_COMMANDS),
    ];
    for (ours, theirs) in pairs {
        if mask.contains(ours) {
            result |= theirs;
        }
    }
    result
}

pub fn map_index_type(index_type: fe::IndexType) -> vk::IndexType {
    match index_type {
        fe::IndexType::U16 => vk::IndexType::UINT16,
        fe::IndexType::U32 => vk::IndexType::UINT32,
    }
}

pub fn map_extent(extent: fe::Extent3d) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: extent.depth,
    }
}
