//! Pipeline variant sets: declaratively expanded families of pipelines
//! sharing a template but differing in defines and specialization
//! constants.
//!
//! Sets are registered into a process-wide list during startup, before
//! [`compile_global_pipeline_sets`] walks it; after that the list is only
//! read.

use std::sync::Arc;

use ferrum_jobs::{JobAffinity, JobSystem, WaitGroup};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::pipeline::{
    ComputePipeline, ComputePipelineRequest, GraphicsPipeline, GraphicsPipelineDesc,
    PipelineFactory,
};

pub enum PipelineRequest {
    Graphics(GraphicsPipelineDesc),
    Compute(ComputePipelineRequest),
}

/// The capability set a variant family implements.
///
/// `variant_count` is fixed at construction; each variant contributes its
/// defines and specialization constants on top of the request the set
/// fills in.
pub trait PipelineVariantSet: Send + Sync + 'static {
    fn variant_count(&self) -> u32;

    /// Defines appended to every shader of `variant_index`.
    fn defines(&self, variant_index: u32) -> Vec<fe::ShaderDefine>;

    fn specialization_constants(&self, variant_index: u32)
        -> Vec<fe::ShaderSpecializationConstant>;

    /// Fills the pipeline request template for `variant_index`.
    fn setup_request(&self, variant_index: u32) -> PipelineRequest;

    /// Discarded variants keep their index but never compile.
    fn is_variant_discarded(&self, _variant_index: u32) -> bool {
        false
    }
}

#[derive(Clone)]
pub enum CompiledPipeline {
    Graphics(Arc<GraphicsPipeline>),
    Compute(Arc<ComputePipeline>),
}

struct RegisteredSet {
    set: Arc<dyn PipelineVariantSet>,
    /// Dense, indexed by variant; `None` is a discarded variant or a
    /// failed compile, which the render path must check before binding.
    pipelines: Arc<Vec<Mutex<Option<CompiledPipeline>>>>,
}

static GLOBAL_SETS: Lazy<Mutex<Vec<RegisteredSet>>> = Lazy::new(|| Mutex::new(Vec::new()));
static GLOBAL_WAIT_GROUP: Lazy<Mutex<Option<Arc<WaitGroup>>>> = Lazy::new(|| Mutex::new(None));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineSetHandle(usize);

/// Adds a set to the global list. Call during startup only.
pub fn register_pipeline_set(set: Arc<dyn PipelineVariantSet>) -> PipelineSetHandle {
    let pipelines = (0..set.variant_count()).map(|_| Mutex::new(None)).collect();
    let mut sets = GLOBAL_SETS.lock();
    sets.push(RegisteredSet {
        set,
        pipelines: Arc::new(pipelines),
    });
    PipelineSetHandle(sets.len() - 1)
}

/// The compiled pipeline of a variant, `None` until
/// [`compile_global_pipeline_sets`] has finished it.
pub fn get_pipeline(handle: PipelineSetHandle, variant_index: u32) -> Option<CompiledPipeline> {
    let sets = GLOBAL_SETS.lock();
    let registered = sets.get(handle.0)?;
    let result = registered
        .pipelines
        .get(variant_index as usize)?
        .lock()
        .clone();
    result
}

/// Schedules one compilation job per live variant of every registered set
/// and records the wait group for [`wait_for_global_pipeline_sets`].
pub fn compile_global_pipeline_sets(factory: &Arc<PipelineFactory>, jobs: &JobSystem) {
    profiling::scope!("compile_global_pipeline_sets");

    let sets = GLOBAL_SETS.lock();

    let mut live_variants = 0;
    for registered in sets.iter() {
        for variant_index in 0..registered.set.variant_count() {
            if !registered.set.is_variant_discarded(variant_index) {
                live_variants += 1;
            }
        }
    }

    let wait_group = WaitGroup::new(live_variants);
    for registered in sets.iter() {
        for variant_index in 0..registered.set.variant_count() {
            if registered.set.is_variant_discarded(variant_index) {
                continue;
            }

            let set = Arc::clone(&registered.set);
            let pipelines = Arc::clone(&registered.pipelines);
            let factory = Arc::clone(factory);
            let wait_group = Arc::clone(&wait_group);
            jobs.schedule(JobAffinity::AnyWorker, move || {
                let compiled = compile_variant(&factory, set.as_ref(), variant_index);
                *pipelines[variant_index as usize].lock() = compiled;
                wait_group.signal();
            });
        }
    }

    *GLOBAL_WAIT_GROUP.lock() = Some(wait_group);
}

/// Blocks until every job scheduled by the last
/// [`compile_global_pipeline_sets`] call has finished.
pub fn wait_for_global_pipeline_sets() {
    let wait_group = GLOBAL_WAIT_GROUP.lock().clone();
    if let Some(wait_group) = wait_group {
        wait_group.wait();
    }
}

fn compile_variant(
    factory: &PipelineFactory,
    set: &dyn PipelineVariantSet,
    variant_index: u32,
) -> Option<CompiledPipeline> {
    match set.setup_request(variant_index) {
        PipelineRequest::Graphics(mut desc) => {
            desc.defines.extend(set.defines(variant_index));
            desc.specialization_constants
                .extend(set.specialization_constants(variant_index));
            match factory.create_graphics_pipeline(&desc) {
                Ok(pipeline) => Some(CompiledPipeline::Graphics(pipeline)),
                Err(error) => {
                    log::error!("variant {variant_index} failed to compile: {error}");
                    None
                }
            }
        }
        PipelineRequest::Compute(mut request) => {
            request.defines.extend(set.defines(variant_index));
            request
                .specialization_constants
                .extend(set.specialization_constants(variant_index));
            match factory.create_compute_pipeline(&request) {
                Ok(pipeline) => Some(CompiledPipeline::Compute(pipeline)),
                Err(error) => {
                    log::error!("variant {variant_index} failed to compile: {error}");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSet;

    impl PipelineVariantSet for TestSet {
        fn variant_count(&self) -> u32 {
            4
        }

        fn defines(&self, variant_index: u32) -> Vec<fe::ShaderDefine> {
            vec![fe::ShaderDefine::new("VARIANT", variant_index.to_string())]
        }

        fn specialization_constants(
            &self,
            _variant_index: u32,
        ) -> Vec<fe::ShaderSpecializationConstant> {
            Vec::new()
        }

        fn setup_request(&self, _variant_index: u32) -> PipelineRequest {
            PipelineRequest::Compute(ComputePipelineRequest::default())
        }

        fn is_variant_discarded(&self, variant_index: u32) -> bool {
            variant_index == 3
        }
    }

    #[test]
    fn registered_sets_start_uncompiled() {
        let handle = register_pipeline_set(Arc::new(TestSet));
        for variant_index in 0..4 {
            assert!(get_pipeline(handle, variant_index).is_none());
        }
        // Out-of-range variants are not an error, just absent.
        assert!(get_pipeline(handle, 99).is_none());
    }
}
