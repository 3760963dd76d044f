//! Builds graphics and compute pipelines from descriptors, resolving
//! shaders through the compiler and reflection.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use smallvec::SmallVec;

use crate::bindless::BindlessManager;
use crate::conv;
use crate::device::{Device, DeviceShared};
use crate::renderpass::RenderPass;
use crate::shader::{ShaderCompiler, ShaderCompilerArgs, ShaderReflection};
use crate::DeviceError;

#[derive(Clone, Debug)]
pub struct ShaderRequest {
    pub shader_name: String,
    pub stage: fe::ShaderStage,
}

pub struct GraphicsPipelineDesc {
    pub input_layout: fe::InputLayout,
    pub rasterization: fe::RasterizationState,
    pub multisample: fe::MultisampleState,
    pub depth_stencil: fe::DepthStencilState,
    pub color_blend: fe::ColorBlendState,
    pub viewport: fe::Viewport,
    pub scissor: fe::ScissorRect,
    /// Ordered stage list; exactly one vertex shader expected.
    pub shaders: Vec<ShaderRequest>,
    pub defines: Vec<fe::ShaderDefine>,
    pub specialization_constants: Vec<fe::ShaderSpecializationConstant>,
    pub render_pass: Arc<RenderPass>,
    pub subpass_index: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ComputePipelineRequest {
    pub shader_name: String,
    pub defines: Vec<fe::ShaderDefine>,
    pub specialization_constants: Vec<fe::ShaderSpecializationConstant>,
}

pub struct GraphicsPipeline {
    shared: Arc<DeviceShared>,
    raw: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    pub(crate) fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// # Safety
    ///
    /// - The pipeline handle must not be manually destroyed
    pub unsafe fn raw_handle(&self) -> vk::Pipeline {
        self.raw
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.shared.raw.destroy_pipeline(self.raw, None);
            self.shared.raw.destroy_pipeline_layout(self.layout, None);
        }
    }
}

pub struct ComputePipeline {
    shared: Arc<DeviceShared>,
    raw: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl ComputePipeline {
    pub(crate) fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// # Safety
    ///
    /// - The pipeline handle must not be manually destroyed
    pub unsafe fn raw_handle(&self) -> vk::Pipeline {
        self.raw
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.shared.raw.destroy_pipeline(self.raw, None);
            self.shared.raw.destroy_pipeline_layout(self.layout, None);
        }
    }
}

struct CompiledStage {
    stage: fe::ShaderStage,
    module: vk::ShaderModule,
    reflection: ShaderReflection,
    entry_point: CString,
}

/// Produces pipelines whose layout is always the bindless set layout plus
/// the reflected push-constant ranges.
pub struct PipelineFactory {
    device: Device,
    compiler: Arc<ShaderCompiler>,
    bindless_layout: vk::DescriptorSetLayout,
}

impl PipelineFactory {
    pub fn new(device: &Device, compiler: Arc<ShaderCompiler>, bindless: &BindlessManager) -> Self {
        Self {
            device: device.clone(),
            compiler,
            bindless_layout: bindless.set_layout(),
        }
    }

    pub fn compiler(&self) -> &Arc<ShaderCompiler> {
        &self.compiler
    }

    fn compile_stage(
        &self,
        shader_name: &str,
        stage: fe::ShaderStage,
        defines: &[fe::ShaderDefine],
    ) -> Result<CompiledStage, fe::ErrorKind> {
        let compiled = self.compiler.compile(&ShaderCompilerArgs {
            shader_name,
            stage,
            defines,
            entry_point: None,
        });
        if !compiled.code_valid {
            return Err(fe::ErrorKind::CompileError);
        }

        let reflection = ShaderReflection::new(&compiled.byte_code)?;

        let words = compiled.words();
        let module_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { self.device.raw().create_shader_module(&module_info, None) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        Ok(CompiledStage {
            stage,
            module,
            reflection,
            entry_point: CString::new(stage.entry_point()).unwrap(),
        })
    }

    /// The pipeline layout: the single bindless set plus every reflected
    /// push-constant range, visible to all stages.
    fn build_pipeline_layout(
        &self,
        stages: &[CompiledStage],
    ) -> Result<vk::PipelineLayout, fe::ErrorKind> {
        let mut push_constant_size = 0u32;
        for stage in stages {
            for root_constant in stage.reflection.root_constants() {
                push_constant_size =
                    push_constant_size.max(root_constant.offset + root_constant.byte_size);
            }
        }
        if push_constant_size > self.device.shared().limits.max_push_constants_size {
            return Err(fe::ErrorKind::NotSupported);
        }

        let push_constant_ranges: SmallVec<[vk::PushConstantRange; 1]> = if push_constant_size > 0
        {
            smallvec::smallvec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::ALL,
                offset: 0,
                size: push_constant_size,
            }]
        } else {
            SmallVec::new()
        };

        let set_layouts = [self.bindless_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        unsafe { self.device.raw().create_pipeline_layout(&layout_info, None) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))
    }

    pub fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Arc<GraphicsPipeline>, fe::ErrorKind> {
        profiling::scope!("PipelineFactory::create_graphics_pipeline");

        let mut stages = Vec::with_capacity(desc.shaders.len());
        for request in &desc.shaders {
            match self.compile_stage(&request.shader_name, request.stage, &desc.defines) {
                Ok(stage) => stages.push(stage),
                Err(error) => {
                    self.destroy_stages(&stages);
                    return Err(error);
                }
            }
        }

        let result = self.create_graphics_inner(desc, &stages);
        self.destroy_stages(&stages);
        result
    }

    fn create_graphics_inner(
        &self,
        desc: &GraphicsPipelineDesc,
        stages: &[CompiledStage],
    ) -> Result<Arc<GraphicsPipeline>, fe::ErrorKind> {
        let vertex_stage = stages
            .iter()
            .find(|stage| stage.stage == fe::ShaderStage::Vertex)
            .ok_or(fe::ErrorKind::InvalidArgument(
                "graphics pipeline needs a vertex shader",
            ))?;

        // One binding per active stream, densely numbered in stream order
        // to match the geometry pool's packed stream views.
        let layout = &desc.input_layout;
        let active_mask = layout.active_stream_mask();
        let mut bindings: SmallVec<[vk::VertexInputBindingDescription; 4]> = SmallVec::new();
        let mut stream_to_binding = [u32::MAX; fe::MAX_VERTEX_STREAMS];
        for stream in 0..fe::MAX_VERTEX_STREAMS as u8 {
            if active_mask & 1 << stream == 0 {
                continue;
            }
            stream_to_binding[stream as usize] = bindings.len() as u32;
            bindings.push(vk::VertexInputBindingDescription {
                binding: bindings.len() as u32,
                stride: layout.stream_stride(stream),
                input_rate: conv::map_input_rate(fe::InputStreamRate::PerVertex),
            });
        }

        let mut attributes: SmallVec<[vk::VertexInputAttributeDescription; 8]> = SmallVec::new();
        for (index, channel) in layout.channels.iter().enumerate() {
            let location = vertex_stage
                .reflection
                .get_input_attribute_location(channel.semantic.hlsl())
                .ok_or(fe::ErrorKind::InvalidArgument(
                    "vertex channel semantic is not consumed by the vertex shader",
                ))?;
            attributes.push(vk::VertexInputAttributeDescription {
                location,
                binding: stream_to_binding[channel.stream as usize],
                format: conv::map_format(channel.format),
                offset: layout.channel_offset(index),
            });
        }

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(conv::map_topology(layout.topology))
            .primitive_restart_enable(false);

        let specialization = build_specialization(stages, &desc.specialization_constants);
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = stages
            .iter()
            .zip(&specialization)
            .map(|(stage, spec)| {
                let mut info = vk::PipelineShaderStageCreateInfo::builder()
                    .stage(conv::map_shader_stage(stage.stage))
                    .module(stage.module)
                    .name(&stage.entry_point);
                if let Some(spec_info) = spec.info.as_ref() {
                    info = info.specialization_info(spec_info);
                }
                info.build()
            })
            .collect();

        let viewport = vk::Viewport {
            x: desc.viewport.x,
            y: desc.viewport.y,
            width: desc.viewport.width,
            height: desc.viewport.height,
            min_depth: desc.viewport.min_depth,
            max_depth: desc.viewport.max_depth,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: desc.scissor.x,
                y: desc.scissor.y,
            },
            extent: vk::Extent2D {
                width: desc.scissor.width,
                height: desc.scissor.height,
            },
        };
        let viewports = [viewport];
        let scissors = [scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(desc.rasterization.depth_clamp_enabled)
            .depth_bias_enable(desc.rasterization.depth_bias_enabled)
            .rasterizer_discard_enable(desc.rasterization.raster_discard_enabled)
            .cull_mode(conv::map_cull_mode(desc.rasterization.cull_mode))
            .polygon_mode(conv::map_polygon_mode(desc.rasterization.polygon_mode))
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(conv::map_sample_count(desc.multisample.sample_count))
            .sample_shading_enable(desc.multisample.sample_shading_enabled)
            .min_sample_shading(desc.multisample.min_sample_shading);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_stencil.depth_test_enabled)
            .depth_write_enable(desc.depth_stencil.depth_write_enabled)
            .depth_compare_op(conv::map_compare_op(desc.depth_stencil.depth_compare_op))
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_blend
            .target_blend_states
            .iter()
            .map(|state| vk::PipelineColorBlendAttachmentState {
                blend_enable: state.blend_enabled.into(),
                src_color_blend_factor: conv::map_blend_factor(state.source_factor),
                dst_color_blend_factor: conv::map_blend_factor(state.destination_factor),
                color_blend_op: conv::map_blend_op(state.blend_op),
                src_alpha_blend_factor: conv::map_blend_factor(state.source_alpha_factor),
                dst_alpha_blend_factor: conv::map_blend_factor(state.destination_alpha_factor),
                alpha_blend_op: conv::map_blend_op(state.alpha_blend_op),
                color_write_mask: conv::map_color_components(state.color_write_flags),
            })
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments)
            .blend_constants(desc.color_blend.blend_constants);

        // Viewport and scissor are always dynamic; the static values above
        // are only defaults.
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let layout = self.build_pipeline_layout(stages)?;

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(desc.render_pass.raw())
            .subpass(desc.subpass_index);

        let pipelines = unsafe {
            self.device.raw().create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[create_info.build()],
                None,
            )
        }
        .map_err(|(_, error)| {
            unsafe { self.device.raw().destroy_pipeline_layout(layout, None) };
            log::error!("graphics pipeline creation failed: {error}");
            fe::ErrorKind::from(DeviceError::from(error))
        })?;

        Ok(Arc::new(GraphicsPipeline {
            shared: Arc::clone(self.device.shared()),
            raw: pipelines[0],
            layout,
        }))
    }

    pub fn create_compute_pipeline(
        &self,
        request: &ComputePipelineRequest,
    ) -> Result<Arc<ComputePipeline>, fe::ErrorKind> {
        profiling::scope!("PipelineFactory::create_compute_pipeline");

        let stage = self.compile_stage(
            &request.shader_name,
            fe::ShaderStage::Compute,
            &request.defines,
        )?;
        let stages = [stage];

        let result = (|| {
            let specialization = build_specialization(&stages, &request.specialization_constants);
            let mut stage_info = vk::PipelineShaderStageCreateInfo::builder()
                .stage(conv::map_shader_stage(fe::ShaderStage::Compute))
                .module(stages[0].module)
                .name(&stages[0].entry_point);
            if let Some(spec_info) = specialization[0].info.as_ref() {
                stage_info = stage_info.specialization_info(spec_info);
            }

            let layout = self.build_pipeline_layout(&stages)?;
            let create_info = vk::ComputePipelineCreateInfo::builder()
                .stage(stage_info.build())
                .layout(layout);

            let pipelines = unsafe {
                self.device.raw().create_compute_pipelines(
                    vk::PipelineCache::null(),
                    &[create_info.build()],
                    None,
                )
            }
            .map_err(|(_, error)| {
                unsafe { self.device.raw().destroy_pipeline_layout(layout, None) };
                log::error!("compute pipeline creation failed: {error}");
                fe::ErrorKind::from(DeviceError::from(error))
            })?;

            Ok(Arc::new(ComputePipeline {
                shared: Arc::clone(self.device.shared()),
                raw: pipelines[0],
                layout,
            }))
        })();

        self.destroy_stages(&stages);
        result
    }

    fn destroy_stages(&self, stages: &[CompiledStage]) {
        for stage in stages {
            unsafe { self.device.raw().destroy_shader_module(stage.module, None) };
        }
    }
}

struct StageSpecialization {
    _entries: Vec<vk::SpecializationMapEntry>,
    _data: Vec<u8>,
    info: Option<Box<vk::SpecializationInfo>>,
}

/// Builds one `VkSpecializationInfo` per stage, matching constants to ids
/// through each stage's reflection. Unknown names are skipped with a
/// warning so a stale variant set degrades instead of aborting.
fn build_specialization(
    stages: &[CompiledStage],
    constants: &[fe::ShaderSpecializationConstant],
) -> Vec<StageSpecialization> {
    stages
        .iter()
        .map(|stage| {
            let mut entries = Vec::new();
            let mut data = Vec::new();
            for constant in constants {
                let Some(constant_id) =
                    stage.reflection.get_specialization_constant_id(&constant.name)
                else {
                    log::warn!(
                        "specialization constant {} not found in shader",
                        constant.name
                    );
                    continue;
                };
                entries.push(vk::SpecializationMapEntry {
                    constant_id,
                    offset: data.len() as u32,
                    size: 4,
                });
                data.extend_from_slice(&constant.value.to_le_bytes());
            }

            if entries.is_empty() {
                return StageSpecialization {
                    _entries: entries,
                    _data: data,
                    info: None,
                };
            }

            let info = vk::SpecializationInfo {
                map_entry_count: entries.len() as u32,
                p_map_entries: entries.as_ptr(),
                data_size: data.len(),
                p_data: data.as_ptr().cast(),
            };
            StageSpecialization {
                _entries: entries,
                _data: data,
                info: Some(Box::new(info)),
            }
        })
        .collect()
}
