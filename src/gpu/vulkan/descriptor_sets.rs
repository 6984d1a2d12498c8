use ash::vk;

use super::{BufferPair, GPUError, Result, VulkanDevice};

/// Storage-buffer bindings of the fixed layout: 0 is input, 1 is output.
pub const INPUT_BINDING: u32 = 0;
pub const OUTPUT_BINDING: u32 = 1;

pub(super) fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
    let sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::STORAGE_BUFFER,
        descriptor_count: 2,
    }];
    let ci = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&sizes)
        .max_sets(2);
    Ok(unsafe { device.create_descriptor_pool(&ci, None)? })
}

fn layout_bindings() -> [vk::DescriptorSetLayoutBinding; 2] {
    [INPUT_BINDING, OUTPUT_BINDING].map(|binding| {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::ALL)
            .build()
    })
}

pub(super) fn create_descriptor_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let bindings = layout_bindings();
    let ci = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    Ok(unsafe { device.create_descriptor_set_layout(&ci, None)? })
}

fn buffer_infos(pair: &BufferPair) -> [[vk::DescriptorBufferInfo; 1]; 2] {
    [pair.input, pair.output].map(|buffer| {
        [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }]
    })
}

impl VulkanDevice {
    /// Allocates the descriptor set and points it at the I/O buffers in one
    /// update. Needs the compute pipeline and the buffers.
    pub fn create_descriptor_sets(&self) -> Result<vk::DescriptorSet> {
        if self.descriptor_set.get().is_some() {
            return Err(GPUError::AlreadyInitialized("descriptor set"));
        }
        let pipeline = self.pipeline()?;
        let pair = self.buffers()?;

        let layouts = [pipeline.set_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pipeline.descriptor_pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info)? };
        let set = sets[0];
        self.set_name(set, "Default DescriptorSet");

        let infos = buffer_infos(&pair);
        let writes = [INPUT_BINDING, OUTPUT_BINDING].map(|binding| {
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&infos[binding as usize])
                .build()
        });
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };

        self.descriptor_set
            .set(set)
            .map_err(|_| GPUError::AlreadyInitialized("descriptor set"))?;
        Ok(set)
    }

    pub fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.descriptor_set.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn layout_has_two_storage_bindings() {
        let bindings = layout_bindings();
        assert_eq!(bindings[0].binding, INPUT_BINDING);
        assert_eq!(bindings[1].binding, OUTPUT_BINDING);
        for b in &bindings {
            assert_eq!(b.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
            assert_eq!(b.descriptor_count, 1);
            assert_eq!(b.stage_flags, vk::ShaderStageFlags::ALL);
        }
    }

    #[test]
    fn buffer_infos_cover_whole_buffers() {
        let pair = BufferPair {
            input: vk::Buffer::from_raw(1),
            output: vk::Buffer::from_raw(2),
            memory: vk::DeviceMemory::from_raw(3),
        };
        let infos = buffer_infos(&pair);
        assert_eq!(infos[INPUT_BINDING as usize][0].buffer, pair.input);
        assert_eq!(infos[OUTPUT_BINDING as usize][0].buffer, pair.output);
        assert!(infos.iter().all(|i| i[0].range == vk::WHOLE_SIZE && i[0].offset == 0));
    }
}
