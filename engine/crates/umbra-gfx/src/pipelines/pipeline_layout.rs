use ash::vk;

use crate::foundation::device::GfxDevice;

/// 多个 pipeline 可以共享同一个 pipeline layout，由上层的缓存负责销毁
pub fn create_pipeline_layout(
    device: &GfxDevice,
    descriptor_set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
    debug_name: impl AsRef<str>,
) -> anyhow::Result<vk::PipelineLayout> {
    let pipeline_layout_create_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(descriptor_set_layouts)
        .push_constant_ranges(push_constant_ranges);
    let handle = unsafe { device.create_pipeline_layout(&pipeline_layout_create_info, None)? };
    device.set_object_debug_name(handle, debug_name);
    Ok(handle)
}
