bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ColorComponentFlags: u32 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
    }
}

impl Default for ColorComponentFlags {
    fn default() -> Self {
        Self::all()
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CullMode: u32 {
        const FRONT = 1 << 0;
        const BACK = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    #[default]
    Always,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InputStreamRate {
    #[default]
    PerVertex,
    PerInstance,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    #[default]
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    SrcAlphaSaturate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TargetBlendState {
    pub blend_enabled: bool,
    pub source_factor: BlendFactor,
    pub destination_factor: BlendFactor,
    pub blend_op: BlendOperation,
    pub source_alpha_factor: BlendFactor,
    pub destination_alpha_factor: BlendFactor,
    pub alpha_blend_op: BlendOperation,
    pub color_write_flags: ColorComponentFlags,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColorBlendState {
    pub target_blend_states: Vec<TargetBlendState>,
    pub blend_constants: [f32; 4],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RasterizationState {
    pub cull_mode: CullMode,
    pub polygon_mode: PolygonMode,
    pub depth_clamp_enabled: bool,
    pub depth_bias_enabled: bool,
    pub raster_discard_enabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MultisampleState {
    pub sample_count: u32,
    pub sample_shading_enabled: bool,
    pub min_sample_shading: f32,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            sample_count: 1,
            sample_shading_enabled: false,
            min_sample_shading: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_test_enabled: bool,
    pub depth_write_enabled: bool,
    pub depth_compare_op: CompareOp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn with_size(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Shader pipeline stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Hull,
    Domain,
    Geometry,
    Compute,
}

impl ShaderStage {
    /// DXC target profile for this stage.
    pub fn target_profile(self) -> &'static str {
        match self {
            Self::Vertex => "vs_6_6",
            Self::Pixel => "ps_6_6",
            Self::Hull => "hs_6_6",
            Self::Domain => "ds_6_6",
            Self::Geometry => "gs_6_6",
            Self::Compute => "cs_6_6",
        }
    }

    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Vertex => "VSMain",
            Self::Pixel => "PSMain",
            Self::Hull => "HSMain",
            Self::Domain => "DSMain",
            Self::Geometry => "GSMain",
            Self::Compute => "CSMain",
        }
    }
}

/// A preprocessor define passed to the shader compiler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderDefine {
    pub name: String,
    pub value: String,
}

impl ShaderDefine {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A specialization constant assignment, matched to a constant id through
/// shader reflection by name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSpecializationConstant {
    pub name: String,
    pub value: u32,
}
