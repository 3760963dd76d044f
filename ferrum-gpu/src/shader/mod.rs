//! HLSL compilation and SPIR-V reflection.

mod compiler;
mod reflection;
mod source;

pub use compiler::{ShaderCompiler, ShaderCompilerArgs, ShaderCompilerResult};
pub use reflection::{
    ShaderInputAttribute, ShaderReflection, ShaderResourceBinding, ShaderResourceType,
    ShaderRootConstant,
};
pub use source::ShaderSourceCache;
