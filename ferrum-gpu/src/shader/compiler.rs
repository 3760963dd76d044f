use std::hash::Hasher as _;
use std::sync::Arc;

use hassle_rs::{Dxc, DxcCompiler, DxcIncludeHandler, DxcLibrary};
use parking_lot::Mutex;
use rustc_hash::FxHasher;

use super::source::ShaderSourceCache;

/// Fixed DXC argument list: SPIR-V 1.4, scalar block layout, reflection
/// decorations on, debug info generated then stripped, optimization off
/// for debuggability.
const COMPILER_ARGS: &[&str] = &[
    "-spirv",
    "-fspv-target-env=vulkan1.1spirv1.4",
    "-fspv-extension=SPV_EXT_descriptor_indexing",
    "-fspv-extension=SPV_GOOGLE_hlsl_functionality1",
    "-fspv-extension=SPV_GOOGLE_user_type",
    "-fvk-use-scalar-layout",
    "-fspv-reflect",
    "-Od",
    "-Zi",
    "-Qstrip_debug",
];

pub struct ShaderCompilerArgs<'a> {
    /// Source path relative to the shader root; also the diagnostics name.
    pub shader_name: &'a str,
    pub stage: fe::ShaderStage,
    pub defines: &'a [fe::ShaderDefine],
    /// Overrides the stage's conventional entry point.
    pub entry_point: Option<&'a str>,
}

/// DWORD-aligned SPIR-V plus its hash. An empty result (both `valid` flags
/// false) reports a failed compilation; diagnostics go to the log.
#[derive(Default)]
pub struct ShaderCompilerResult {
    pub byte_code: Vec<u8>,
    /// Size before the zero padding to DWORD alignment.
    pub byte_code_size: u32,
    pub hash: u64,
    pub code_valid: bool,
    pub hash_valid: bool,
}

impl ShaderCompilerResult {
    /// The byte code as SPIR-V words.
    pub fn words(&self) -> Vec<u32> {
        self.byte_code
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect()
    }
}

struct DxcContext {
    // Field order is drop order: the compiler and library must go before
    // the loaded dxcompiler module.
    compiler: DxcCompiler,
    library: DxcLibrary,
    _dxc: Dxc,
}

// The DXC COM objects are only ever touched under the mutex below.
unsafe impl Send for DxcContext {}

struct CacheIncludeHandler<'a> {
    cache: &'a ShaderSourceCache,
}

impl DxcIncludeHandler for CacheIncludeHandler<'_> {
    fn load_source(&mut self, filename: String) -> Option<String> {
        // DXC hands absolute-ish "./"-prefixed paths to the handler.
        let name = filename.trim_start_matches("./");
        match self.cache.get_source(name) {
            Ok(source) => Some(source.to_string()),
            Err(_) => {
                log::error!("failed to load shader source file: {name}");
                None
            }
        }
    }
}

/// HLSL to SPIR-V through DXC, with sources and includes resolved by the
/// [`ShaderSourceCache`].
pub struct ShaderCompiler {
    source_cache: Arc<ShaderSourceCache>,
    dxc: Mutex<DxcContext>,
}

impl ShaderCompiler {
    pub fn new(source_cache: Arc<ShaderSourceCache>) -> Result<Self, fe::ErrorKind> {
        profiling::scope!("ShaderCompiler::new");

        let dxc = Dxc::new(None).map_err(|error| {
            log::error!("failed to load dxcompiler: {error}");
            fe::ErrorKind::NotSupported
        })?;
        let compiler = dxc.create_compiler().map_err(|_| fe::ErrorKind::NotSupported)?;
        let library = dxc.create_library().map_err(|_| fe::ErrorKind::NotSupported)?;

        Ok(Self {
            source_cache,
            dxc: Mutex::new(DxcContext {
                compiler,
                library,
                _dxc: dxc,
            }),
        })
    }

    pub fn source_cache(&self) -> &Arc<ShaderSourceCache> {
        &self.source_cache
    }

    /// Compiles one stage. Failures are logged and reported through an
    /// empty result rather than an error: a null pipeline slot is the
    /// render path's signal.
    pub fn compile(&self, args: &ShaderCompilerArgs<'_>) -> ShaderCompilerResult {
        profiling::scope!("ShaderCompiler::compile");

        let source = match self.source_cache.get_source(args.shader_name) {
            Ok(source) => source,
            Err(error) => {
                log::error!(
                    "failed to load shader source file {}: {error}",
                    args.shader_name
                );
                return ShaderCompilerResult::default();
            }
        };

        let defines: Vec<(&str, Option<&str>)> = args
            .defines
            .iter()
            .map(|define| (define.name.as_str(), Some(define.value.as_str())))
            .collect();

        let entry_point = args.entry_point.unwrap_or_else(|| args.stage.entry_point());

        let context = self.dxc.lock();
        let blob = match context.library.create_blob_with_encoding_from_str(&source) {
            Ok(blob) => blob,
            Err(error) => {
                log::error!("failed to create source blob for {}: {error}", args.shader_name);
                return ShaderCompilerResult::default();
            }
        };

        let mut include_handler = CacheIncludeHandler {
            cache: &self.source_cache,
        };
        let result = context.compiler.compile(
            &blob,
            args.shader_name,
            entry_point,
            args.stage.target_profile(),
            COMPILER_ARGS,
            Some(&mut include_handler),
            &defines,
        );

        let operation = match result {
            Ok(operation) => operation,
            Err((operation, _)) => {
                if let Ok(error_blob) = operation.get_error_buffer() {
                    if let Ok(message) = context.library.get_blob_as_string(&error_blob.into()) {
                        log::error!("{}: {}", args.shader_name, message);
                    }
                }
                log::error!("failed to compile shader: {}", args.shader_name);
                return ShaderCompilerResult::default();
            }
        };

        let binary: Vec<u8> = match operation.get_result() {
            Ok(blob) => blob.to_vec(),
            Err(error) => {
                log::error!("failed to get shader binary for {}: {error}", args.shader_name);
                return ShaderCompilerResult::default();
            }
        };

        let byte_code_size = binary.len() as u32;
        let aligned_size = (byte_code_size + 3) & !3;
        let mut byte_code = binary;
        byte_code.resize(aligned_size as usize, 0);

        let mut hasher = FxHasher::default();
        hasher.write(&byte_code);

        ShaderCompilerResult {
            byte_code,
            byte_code_size,
            hash: hasher.finish(),
            code_valid: true,
            hash_valid: true,
        }
    }
}
