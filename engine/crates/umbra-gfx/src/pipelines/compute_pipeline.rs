use std::path::Path;

use ash::vk;

use crate::foundation::device::GfxDevice;
use crate::pipelines::shader::{GfxShaderModuleCache, SHADER_ENTRY_POINT};
use crate::utilities::helper::profile_scope;

pub fn create_compute_pipeline(
    device: &GfxDevice,
    shader_dir: &Path,
    shader: &str,
    layout: vk::PipelineLayout,
    debug_name: &str,
) -> anyhow::Result<vk::Pipeline> {
    let _span = profile_scope("create_compute_pipeline");

    let mut shader_modules = GfxShaderModuleCache::new(device, shader_dir);
    let result = (|| -> anyhow::Result<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_modules.get_or_load(shader)?)
            .name(SHADER_ENTRY_POINT);
        let create_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);

        let pipelines = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
                .map_err(|(_, e)| e)?
        };
        Ok(pipelines[0])
    })();
    shader_modules.destroy();

    let pipeline = result?;
    device.set_object_debug_name(pipeline, debug_name);
    Ok(pipeline)
}
