use crate::Format;

/// Logical state of a resource at a render-pass boundary.
///
/// The GPU layer maps each state to a fixed image layout + access mask pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResourceState {
    #[default]
    Undefined,
    Common,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    ShaderResource,
    TransferSrc,
    TransferDst,
    Present,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AttachmentLoadOp {
    #[default]
    DontCare,
    Load,
    Clear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AttachmentStoreOp {
    #[default]
    DontCare,
    Store,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttachmentDesc {
    pub format: Format,
    pub load_op: AttachmentLoadOp,
    pub store_op: AttachmentStoreOp,
    pub stencil_load_op: AttachmentLoadOp,
    pub stencil_store_op: AttachmentStoreOp,
    pub initial_state: ResourceState,
    pub final_state: ResourceState,
    pub sample_count: u32,
}

impl AttachmentDesc {
    pub fn color(format: Format) -> Self {
        Self {
            format,
            load_op: AttachmentLoadOp::Clear,
            store_op: AttachmentStoreOp::Store,
            stencil_load_op: AttachmentLoadOp::DontCare,
            stencil_store_op: AttachmentStoreOp::DontCare,
            initial_state: ResourceState::Undefined,
            final_state: ResourceState::Present,
            sample_count: 1,
        }
    }
}

/// An attachment reference within a subpass: attachment index plus the
/// state it is used in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubpassAttachment {
    pub index: u32,
    pub state: ResourceState,
}

impl SubpassAttachment {
    pub const NONE: Self = Self {
        index: u32::MAX,
        state: ResourceState::Undefined,
    };

    pub fn new(index: u32, state: ResourceState) -> Self {
        Self { index, state }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubpassDesc {
    pub input_attachments: Vec<SubpassAttachment>,
    pub render_target_attachments: Vec<SubpassAttachment>,
    pub msaa_resolve_attachments: Vec<SubpassAttachment>,
    pub depth_stencil_attachment: Option<SubpassAttachment>,
    pub preserve_attachments: Vec<u32>,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PipelineStageMask: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const VERTEX_INPUT = 1 << 1;
        const VERTEX_SHADER = 1 << 2;
        const FRAGMENT_SHADER = 1 << 3;
        const EARLY_FRAGMENT_TESTS = 1 << 4;
        const LATE_FRAGMENT_TESTS = 1 << 5;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 6;
        const COMPUTE_SHADER = 1 << 7;
        const TRANSFER = 1 << 8;
        const BOTTOM_OF_PIPE = 1 << 9;
        const ALL_GRAPHICS = 1 << 10;
        const ALL_COMMANDS = 1 << 11;
    }
}

/// `src_subpass == u32::MAX` refers to the implicit external subpass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubpassDependencyDesc {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: PipelineStageMask,
    pub dst_stage: PipelineStageMask,
    pub src_state: ResourceState,
    pub dst_state: ResourceState,
}

pub const EXTERNAL_SUBPASS: u32 = u32::MAX;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<SubpassDependencyDesc>,
}
