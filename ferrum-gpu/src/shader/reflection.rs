use spirv_reflect::types::{
    ReflectDecorationFlags, ReflectDescriptorBinding, ReflectDescriptorType, ReflectDimension,
    ReflectFormat, ReflectResourceType,
};

/// What a shader binds a resource slot as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderResourceType {
    ConstantBuffer,
    BufferSrv,
    BufferUav,
    TextureSrv,
    TextureUav,
    Sampler,
}

/// One stage input: location, HLSL semantic (trailing `0` stripped) and the
/// element format derived from the vector base type.
#[derive(Clone, Debug)]
pub struct ShaderInputAttribute {
    pub location: u32,
    pub semantic: String,
    pub format: fe::Format,
}

#[derive(Clone, Debug)]
pub struct ShaderResourceBinding {
    pub name: String,
    pub kind: ShaderResourceType,
    pub set: u32,
    pub slot: u32,
    /// 1 unless the HLSL declaration is an array.
    pub count: u32,
}

/// A push-constant range.
#[derive(Clone, Debug)]
pub struct ShaderRootConstant {
    pub name: String,
    pub offset: u32,
    pub byte_size: u32,
}

/// Reflection data extracted from a compiled stage.
pub struct ShaderReflection {
    input_attributes: Vec<ShaderInputAttribute>,
    resource_bindings: Vec<ShaderResourceBinding>,
    root_constants: Vec<ShaderRootConstant>,
    specialization_constant_names: Vec<String>,
}

fn map_input_format(format: ReflectFormat) -> fe::Format {
    use fe::Format as F;
    match format {
        ReflectFormat::R32_UINT => F::R32_UINT,
        ReflectFormat::R32_SINT => F::R32_SINT,
        ReflectFormat::R32_SFLOAT => F::R32_SFLOAT,
        ReflectFormat::R32G32_UINT => F::R32G32_UINT,
        ReflectFormat::R32G32_SINT => F::R32G32_SINT,
        ReflectFormat::R32G32_SFLOAT => F::R32G32_SFLOAT,
        ReflectFormat::R32G32B32_UINT => F::R32G32B32_UINT,
        ReflectFormat::R32G32B32_SINT => F::R32G32B32_SINT,
        ReflectFormat::R32G32B32_SFLOAT => F::R32G32B32_SFLOAT,
        ReflectFormat::R32G32B32A32_UINT => F::R32G32B32A32_UINT,
        ReflectFormat::R32G32B32A32_SINT => F::R32G32B32A32_SINT,
        ReflectFormat::R32G32B32A32_SFLOAT => F::R32G32B32A32_SFLOAT,
        ReflectFormat::Undefined => F::Undefined,
    }
}

fn map_binding(binding: &ReflectDescriptorBinding) -> Option<ShaderResourceBinding> {
    let kind = match binding.descriptor_type {
        ReflectDescriptorType::Sampler => ShaderResourceType::Sampler,
        ReflectDescriptorType::UniformBuffer => ShaderResourceType::ConstantBuffer,
        ReflectDescriptorType::SampledImage | ReflectDescriptorType::CombinedImageSampler => {
            if binding.image.dim == ReflectDimension::Buffer {
                ShaderResourceType::BufferSrv
            } else {
                ShaderResourceType::TextureSrv
            }
        }
        ReflectDescriptorType::StorageImage => {
            if binding.image.dim == ReflectDimension::Buffer {
                ShaderResourceType::BufferUav
            } else {
                ShaderResourceType::TextureUav
            }
        }
        ReflectDescriptorType::UniformTexelBuffer => ShaderResourceType::BufferSrv,
        ReflectDescriptorType::StorageTexelBuffer => ShaderResourceType::BufferUav,
        ReflectDescriptorType::StorageBuffer => {
            if binding.resource_type == ReflectResourceType::UnorderedAccessView {
                ShaderResourceType::BufferUav
            } else {
                ShaderResourceType::BufferSrv
            }
        }
        _ => {
            log::warn!("unhandled descriptor type on binding {}", binding.name);
            return None;
        }
    };

    Some(ShaderResourceBinding {
        name: binding.name.clone(),
        kind,
        set: binding.set,
        slot: binding.binding,
        count: binding.count.max(1),
    })
}

impl ShaderReflection {
    pub fn new(byte_code: &[u8]) -> Result<Self, fe::ErrorKind> {
        profiling::scope!("ShaderReflection::new");

        let module = spirv_reflect::ShaderModule::load_u8_data(byte_code).map_err(|error| {
            log::error!("shader reflection failed: {error}");
            fe::ErrorKind::CompileError
        })?;

        let mut input_attributes = Vec::new();
        for input in module
            .enumerate_input_variables(None)
            .map_err(|_| fe::ErrorKind::CompileError)?
        {
            if input
                .decoration_flags
                .contains(ReflectDecorationFlags::BUILT_IN)
            {
                continue;
            }
            let mut semantic = input.semantic.clone();
            if semantic.is_empty() {
                semantic = input.name.clone();
            }
            if semantic.ends_with('0') {
                semantic.pop();
            }
            input_attributes.push(ShaderInputAttribute {
                location: input.location,
                semantic,
                format: map_input_format(input.format),
            });
        }

        let resource_bindings = module
            .enumerate_descriptor_bindings(None)
            .map_err(|_| fe::ErrorKind::CompileError)?
            .iter()
            .filter_map(map_binding)
            .collect();

        let root_constants = module
            .enumerate_push_constant_blocks(None)
            .map_err(|_| fe::ErrorKind::CompileError)?
            .iter()
            .map(|block| ShaderRootConstant {
                name: block.name.clone(),
                offset: block.offset,
                byte_size: block.size,
            })
            .collect();

        let specialization_constant_names = parse_specialization_constants(byte_code);

        Ok(Self {
            input_attributes,
            resource_bindings,
            root_constants,
            specialization_constant_names,
        })
    }

    pub fn input_attributes(&self) -> &[ShaderInputAttribute] {
        &self.input_attributes
    }

    pub fn resource_bindings(&self) -> &[ShaderResourceBinding] {
        &self.resource_bindings
    }

    pub fn root_constants(&self) -> &[ShaderRootConstant] {
        &self.root_constants
    }

    /// Names ordered by `constant_id`, which reflection validates to be
    /// densely numbered from zero.
    pub fn specialization_constant_names(&self) -> &[String] {
        &self.specialization_constant_names
    }

    /// Location of the input matching `semantic`, also accepting the
    /// `semantic + "0"` spelling.
    pub fn get_input_attribute_location(&self, semantic: &str) -> Option<u32> {
        let alt = format!("{semantic}0");
        self.input_attributes
            .iter()
            .find(|input| input.semantic == semantic || input.semantic == alt)
            .map(|input| input.location)
    }

    pub fn get_resource_binding_index(&self, name: &str) -> Option<u32> {
        self.resource_bindings
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| binding.slot)
    }

    pub fn get_specialization_constant_id(&self, name: &str) -> Option<u32> {
        self.specialization_constant_names
            .iter()
            .position(|existing| existing == name)
            .map(|index| index as u32)
    }
}

const OP_NAME: u32 = 5;
const OP_DECORATE: u32 = 71;
const DECORATION_SPEC_ID: u32 = 1;

/// The `spirv-reflect` crate does not surface specialization constants, so
/// scan `OpDecorate SpecId` + `OpName` pairs directly.
fn parse_specialization_constants(byte_code: &[u8]) -> Vec<String> {
    let words: Vec<u32> = byte_code
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    if words.len() < 5 {
        return Vec::new();
    }

    let mut names: Vec<(u32, String)> = Vec::new();
    let mut spec_ids: Vec<(u32, u32)> = Vec::new();

    let mut cursor = 5;
    while cursor < words.len() {
        let word = words[cursor];
        let opcode = word & 0xffff;
        let count = (word >> 16) as usize;
        if count == 0 || cursor + count > words.len() {
            break;
        }

        match opcode {
            OP_NAME if count >= 3 => {
                let target = words[cursor + 1];
                let bytes: Vec<u8> = words[cursor + 2..cursor + count]
                    .iter()
                    .flat_map(|word| word.to_le_bytes())
                    .take_while(|&byte| byte != 0)
                    .collect();
                if let Ok(name) = String::from_utf8(bytes) {
                    names.push((target, name));
                }
            }
            OP_DECORATE if count >= 4 && words[cursor + 2] == DECORATION_SPEC_ID => {
                spec_ids.push((words[cursor + 3], words[cursor + 1]));
            }
            _ => {}
        }
        cursor += count;
    }

    spec_ids.sort_by_key(|&(constant_id, _)| constant_id);
    for (index, &(constant_id, _)) in spec_ids.iter().enumerate() {
        debug_assert_eq!(
            constant_id, index as u32,
            "specialization constants must be densely numbered"
        );
    }

    spec_ids
        .iter()
        .map(|&(_, target)| {
            names
                .iter()
                .find(|&&(id, _)| id == target)
                .map(|(_, name)| name.clone())
                .unwrap_or_default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_instruction(words: &mut Vec<u32>, opcode: u32, operands: &[u32]) {
        words.push(opcode | ((operands.len() as u32 + 1) << 16));
        words.extend_from_slice(operands);
    }

    fn push_name(words: &mut Vec<u32>, target: u32, name: &str) {
        let mut bytes = name.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        let mut operands = vec![target];
        operands.extend(
            bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap())),
        );
        push_instruction(words, OP_NAME, &operands);
    }

    #[test]
    fn specialization_constants_order_by_id() {
        // Minimal module: header plus OpName/OpDecorate pairs declared out
        // of id order.
        let mut words = vec![0x0723_0203, 0x0001_0400, 0, 100, 0];
        push_name(&mut words, 42, "ENABLE_FOG");
        push_name(&mut words, 17, "SAMPLE_COUNT");
        push_instruction(&mut words, OP_DECORATE, &[42, DECORATION_SPEC_ID, 1]);
        push_instruction(&mut words, OP_DECORATE, &[17, DECORATION_SPEC_ID, 0]);

        let byte_code: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        let names = parse_specialization_constants(&byte_code);
        assert_eq!(names, ["SAMPLE_COUNT", "ENABLE_FOG"]);
    }

    #[test]
    fn empty_module_has_no_spec_constants() {
        assert!(parse_specialization_constants(&[]).is_empty());
    }
}
