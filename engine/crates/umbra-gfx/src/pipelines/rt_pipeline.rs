use std::path::Path;

use ash::vk;
use itertools::Itertools;

use crate::foundation::device::GfxDevice;
use crate::pipelines::shader::{GfxShaderModuleCache, SHADER_ENTRY_POINT};
use crate::utilities::helper::profile_scope;

/// 光追 pipeline 的 shader 组成
///
/// shader group 的顺序固定为：raygen，所有 miss，一个 triangle hit group
pub struct GfxRtPipelineCreateInfo<'a> {
    pub raygen: &'a str,
    pub miss: &'a [&'a str],
    pub closest_hit: &'a str,
    pub any_hit: Option<&'a str>,
    pub max_recursion_depth: u32,
}
impl GfxRtPipelineCreateInfo<'_> {
    #[inline]
    pub fn group_count(&self) -> u32 {
        1 + self.miss.len() as u32 + 1
    }

    pub fn create(
        &self,
        device: &GfxDevice,
        shader_dir: &Path,
        layout: vk::PipelineLayout,
        debug_name: &str,
    ) -> anyhow::Result<vk::Pipeline> {
        let _span = profile_scope("GfxRtPipelineCreateInfo::create");

        let mut shader_modules = GfxShaderModuleCache::new(device, shader_dir);
        let result = self.create_inner(device, &mut shader_modules, layout);
        shader_modules.destroy();

        let pipeline = result?;
        device.set_object_debug_name(pipeline, debug_name);
        Ok(pipeline)
    }

    fn create_inner(
        &self,
        device: &GfxDevice,
        shader_modules: &mut GfxShaderModuleCache,
        layout: vk::PipelineLayout,
    ) -> anyhow::Result<vk::Pipeline> {
        let max_recursion = device.rt_pipeline_props().max_ray_recursion_depth;
        anyhow::ensure!(
            self.max_recursion_depth <= max_recursion,
            "max recursion depth {} exceeds device limit {}",
            self.max_recursion_depth,
            max_recursion
        );

        // stage 的顺序：raygen, miss..., closest hit, any hit
        let mut stages = vec![(vk::ShaderStageFlags::RAYGEN_KHR, self.raygen)];
        stages.extend(self.miss.iter().map(|miss| (vk::ShaderStageFlags::MISS_KHR, *miss)));
        stages.push((vk::ShaderStageFlags::CLOSEST_HIT_KHR, self.closest_hit));
        if let Some(any_hit) = self.any_hit {
            stages.push((vk::ShaderStageFlags::ANY_HIT_KHR, any_hit));
        }

        let stage_infos = stages
            .iter()
            .map(|(stage, name)| {
                Ok(vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(shader_modules.get_or_load(name)?)
                    .name(SHADER_ENTRY_POINT))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let general_group = |stage_idx: u32| {
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(stage_idx)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
        };

        let miss_count = self.miss.len() as u32;
        let closest_hit_idx = 1 + miss_count;
        let mut groups = (0..=miss_count).map(general_group).collect_vec();
        groups.push(
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(closest_hit_idx)
                .any_hit_shader(if self.any_hit.is_some() { closest_hit_idx + 1 } else { vk::SHADER_UNUSED_KHR })
                .intersection_shader(vk::SHADER_UNUSED_KHR),
        );

        let create_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stage_infos)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(self.max_recursion_depth)
            .layout(layout);

        let pipelines = unsafe {
            device
                .ray_tracing_pipeline
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&create_info),
                    None,
                )
                .map_err(|(_, e)| e)?
        };
        Ok(pipelines[0])
    }
}
