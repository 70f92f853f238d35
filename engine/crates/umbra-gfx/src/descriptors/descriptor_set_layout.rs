use ash::vk;

use crate::foundation::device::GfxDevice;

pub fn create_descriptor_set_layout(
    device: &GfxDevice,
    bindings: &[vk::DescriptorSetLayoutBinding],
    debug_name: impl AsRef<str>,
) -> anyhow::Result<vk::DescriptorSetLayout> {
    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
    let handle = unsafe { device.create_descriptor_set_layout(&create_info, None)? };
    device.set_object_debug_name(handle, debug_name);
    Ok(handle)
}

/// descriptor 写入的资源
#[derive(Clone, Copy, Debug)]
pub enum GfxDescriptorResource {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

#[derive(Clone, Copy, Debug)]
pub struct GfxDescriptorWrite {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub resource: GfxDescriptorResource,
}

/// 一次性把所有 descriptor 写入到 set 中
pub fn write_descriptor_set(device: &GfxDevice, set: vk::DescriptorSet, writes: &[GfxDescriptorWrite]) {
    let writes = writes
        .iter()
        .map(|write| {
            let vk_write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding)
                .dst_array_element(0)
                .descriptor_type(write.descriptor_type);
            match &write.resource {
                GfxDescriptorResource::Buffer(info) => vk_write.buffer_info(std::slice::from_ref(info)),
                GfxDescriptorResource::Image(info) => vk_write.image_info(std::slice::from_ref(info)),
            }
        })
        .collect::<Vec<_>>();
    unsafe {
        device.update_descriptor_sets(&writes, &[]);
    }
}
