use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use ash::vk;
use tracing::error;

use super::descriptor_sets::{create_descriptor_pool, create_descriptor_set_layout};
use super::{GPUError, Result, VulkanDevice};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Reads a SPIR-V file into 32-bit words.
pub fn read_shader_file(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| {
        error!("Invalid File '{}'", path.display());
        GPUError::ShaderLoad {
            path: path.to_path_buf(),
            source,
        }
    })?;
    decode_spirv(&bytes)
}

/// Decodes SPIR-V bytes into words, fixing up byte order if needed.
pub fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(GPUError::InvalidShaderCode)
}

/// Builds a shader module from SPIR-V bytes.
pub fn create_shader(device: &ash::Device, bytes: &[u8]) -> Result<vk::ShaderModule> {
    let code = decode_spirv(bytes)?;
    let ci = vk::ShaderModuleCreateInfo::builder().code(&code);
    Ok(unsafe { device.create_shader_module(&ci, None)? })
}

/// Loads a SPIR-V file and builds a shader module from it.
pub fn load_shader(device: &ash::Device, path: &Path) -> Result<vk::ShaderModule> {
    let code = read_shader_file(path)?;
    let ci = vk::ShaderModuleCreateInfo::builder().code(&code);
    Ok(unsafe { device.create_shader_module(&ci, None)? })
}

/// The fixed compute pipeline: one shader stage reading binding 0 and
/// writing binding 1, both storage buffers.
#[derive(Debug)]
pub struct ComputePipeline {
    pub(super) shader_module: vk::ShaderModule,
    pub(super) descriptor_pool: vk::DescriptorPool,
    pub(super) set_layout: vk::DescriptorSetLayout,
    pub(super) layout: vk::PipelineLayout,
    pub(super) raw: vk::Pipeline,
}

impl ComputePipeline {
    pub(super) fn new(device: &VulkanDevice, shader: &Path) -> Result<Self> {
        let raw_device = device.raw();
        let shader_module = load_shader(raw_device, shader)?;
        let descriptor_pool = create_descriptor_pool(raw_device)?;
        let set_layout = create_descriptor_set_layout(raw_device)?;

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe { raw_device.create_pipeline_layout(&layout_info, None)? };
        device.set_name(layout, "Default PipelineLayout");

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(ENTRY_POINT)
            .build();
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();

        let pipelines = unsafe {
            raw_device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| GPUError::from(e))?
        };
        let raw = pipelines[0];
        device.set_name(raw, "Default ComputePipeline");

        Ok(Self {
            shader_module,
            descriptor_pool,
            set_layout,
            layout,
            raw,
        })
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    pub(super) unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.raw, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
        device.destroy_descriptor_pool(self.descriptor_pool, None);
        device.destroy_shader_module(self.shader_module, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn reads_spirv_words() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        file.write_all(bytemuck::cast_slice(&words[..])).unwrap();

        let code = read_shader_file(file.path()).unwrap();
        assert_eq!(code, words);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.comp.spv");
        let err = read_shader_file(&path).unwrap_err();
        assert!(matches!(err, GPUError::ShaderLoad { .. }));
        assert!(err.to_string().starts_with("Invalid File '"));
    }

    #[test]
    fn rejects_truncated_code() {
        assert!(matches!(
            decode_spirv(&[0x03, 0x02, 0x23]),
            Err(GPUError::InvalidShaderCode(_))
        ));
    }
}
