use std::path::Path;

use ash::vk;
use itertools::Itertools;

use crate::foundation::device::GfxDevice;
use crate::pipelines::shader::{GfxShaderModuleCache, SHADER_ENTRY_POINT};
use crate::utilities::helper::profile_scope;

/// 光栅化 pipeline 的创建参数
///
/// viewport 和 scissor 始终是 dynamic state
pub struct GfxGraphicsPipelineCreateInfo {
    /// dynamic render 需要的 framebuffer 信息
    color_attach_formats: Vec<vk::Format>,
    /// format = undefined 表示不使用这个 attachment
    depth_attach_format: vk::Format,

    vertex_shader: String,
    fragment_shader: String,

    vertex_binding_desc: Vec<vk::VertexInputBindingDescription>,
    vertex_attribute_desc: Vec<vk::VertexInputAttributeDescription>,

    primitive_topology: vk::PrimitiveTopology,

    rasterize_state_info: vk::PipelineRasterizationStateCreateInfo<'static>,
    depth_stencil_info: vk::PipelineDepthStencilStateCreateInfo<'static>,

    alpha_blend: bool,
}
impl Default for GfxGraphicsPipelineCreateInfo {
    fn default() -> Self {
        Self {
            color_attach_formats: vec![],
            depth_attach_format: vk::Format::UNDEFINED,

            vertex_shader: String::new(),
            fragment_shader: String::new(),

            vertex_binding_desc: vec![],
            vertex_attribute_desc: vec![],

            primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,

            rasterize_state_info: vk::PipelineRasterizationStateCreateInfo::default()
                .depth_clamp_enable(false)
                .rasterizer_discard_enable(false)
                .polygon_mode(vk::PolygonMode::FILL)
                .line_width(1.0)
                .cull_mode(vk::CullModeFlags::BACK)
                // 按照 OpenGL 的传统，将 CCW 视为 front face
                .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
                .depth_bias_enable(false),
            depth_stencil_info: vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(true)
                .depth_compare_op(vk::CompareOp::LESS)
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false),

            alpha_blend: false,
        }
    }
}
// builder
impl GfxGraphicsPipelineCreateInfo {
    #[inline]
    pub fn attach_info(&mut self, color_attach_formats: Vec<vk::Format>, depth_format: Option<vk::Format>) -> &mut Self {
        self.color_attach_formats = color_attach_formats;
        self.depth_attach_format = depth_format.unwrap_or(vk::Format::UNDEFINED);
        self
    }

    #[inline]
    pub fn shaders(&mut self, vertex_shader: &str, fragment_shader: &str) -> &mut Self {
        self.vertex_shader = vertex_shader.to_string();
        self.fragment_shader = fragment_shader.to_string();
        self
    }

    #[inline]
    pub fn vertex_input(
        &mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> &mut Self {
        self.vertex_binding_desc = bindings;
        self.vertex_attribute_desc = attributes;
        self
    }

    #[inline]
    pub fn primitive_topology(&mut self, topology: vk::PrimitiveTopology) -> &mut Self {
        self.primitive_topology = topology;
        self
    }

    #[inline]
    pub fn cull_mode(&mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> &mut Self {
        self.rasterize_state_info.cull_mode = mode;
        self.rasterize_state_info.front_face = front_face;
        self
    }

    #[inline]
    pub fn polygon_mode(&mut self, mode: vk::PolygonMode) -> &mut Self {
        self.rasterize_state_info.polygon_mode = mode;
        self
    }

    #[inline]
    pub fn depth_test(&mut self, test: bool, write: bool, compare_op: vk::CompareOp) -> &mut Self {
        self.depth_stencil_info.depth_test_enable = test.into();
        self.depth_stencil_info.depth_write_enable = write.into();
        self.depth_stencil_info.depth_compare_op = compare_op;
        self
    }

    /// 所有 color attachment 使用相同的 alpha blend 设置
    #[inline]
    pub fn alpha_blend(&mut self, enable: bool) -> &mut Self {
        self.alpha_blend = enable;
        self
    }
}
// create
impl GfxGraphicsPipelineCreateInfo {
    fn color_blend_state(&self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA);
        if !self.alpha_blend {
            return state.blend_enable(false);
        }
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }

    pub fn create(
        &self,
        device: &GfxDevice,
        shader_dir: &Path,
        layout: vk::PipelineLayout,
        debug_name: &str,
    ) -> anyhow::Result<vk::Pipeline> {
        let _span = profile_scope("GfxGraphicsPipelineCreateInfo::create");

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
        // dynamic rendering 需要的 framebuffer 信息
        let mut attach_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&self.color_attach_formats)
            .depth_attachment_format(self.depth_attach_format);

        let shader_stages_info = [
            (vk::ShaderStageFlags::VERTEX, self.vertex_shader.as_str()),
            (vk::ShaderStageFlags::FRAGMENT, self.fragment_shader.as_str()),
        ]
        .into_iter()
        .map(|(stage, name)| {
            Ok(vk::PipelineShaderStageCreateInfo::default()
                .stage(stage)
                .module(shader_modules.get_or_load(name)?)
                .name(SHADER_ENTRY_POINT))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

        // 顶点和 index
        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_binding_desc)
            .vertex_attribute_descriptions(&self.vertex_attribute_desc);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.primitive_topology)
            .primitive_restart_enable(false);

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let msaa_info = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // 混合设置：需要为每个 color attachment 分别指定
        let color_blend_states = self.color_attach_formats.iter().map(|_| self.color_blend_state()).collect_vec();
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_states)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages_info)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&self.rasterize_state_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&self.depth_stencil_info)
            .layout(layout)
            .dynamic_state(&dynamic_state_info)
            .push_next(&mut attach_info);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
                .map_err(|(_, e)| e)?
        };
        Ok(pipelines[0])
    }
}
