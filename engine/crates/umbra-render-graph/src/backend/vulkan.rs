//! 基于 `umbra-gfx` 的 [`RgDevice`] 实现

use std::collections::HashMap;
use std::path::PathBuf;

use ash::vk;
use itertools::Itertools;
use umbra_gfx::basic::color::LabelColor;
use umbra_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use umbra_gfx::commands::command_buffer::GfxCommandBuffer;
use umbra_gfx::descriptors::descriptor_pool::GfxDescriptorAllocator;
use umbra_gfx::descriptors::descriptor_set_layout::{
    GfxDescriptorResource, GfxDescriptorWrite, create_descriptor_set_layout, write_descriptor_set,
};
use umbra_gfx::descriptors::sampler::create_sampler;
use umbra_gfx::foundation::device::GfxDevice;
use umbra_gfx::pipelines::compute_pipeline::create_compute_pipeline;
use umbra_gfx::pipelines::graphics_pipeline::GfxGraphicsPipelineCreateInfo;
use umbra_gfx::pipelines::pipeline_layout::create_pipeline_layout;
use umbra_gfx::pipelines::rt_pipeline::GfxRtPipelineCreateInfo;
use umbra_gfx::pipelines::sbt::GfxSbt;
use umbra_gfx::resources::buffer::{GfxBuffer, GfxImage};
use umbra_gfx::resources::image_view::{GfxImageViewDesc, create_image_view};

use crate::access::PipelineKind;
use crate::bindable::{ImageViewParams, SamplerKind};
use crate::cache::DescriptorSetLayoutKey;
use crate::config::DescriptorPoolConfig;
use crate::device::{
    RgComputePipelineInfo, RgDescriptorResource, RgDescriptorWrite, RgDevice, RgRasterPipelineInfo,
    RgRaytracePipeline, RgRaytracePipelineInfo, RgRenderingAttachment, RgRenderingInfo, RgSbtRegions,
};
use crate::tracker::RgBarrierBatch;

/// Vulkan 后端
///
/// 逻辑设备和 allocator 由调用方创建；这里持有 descriptor pool、SBT，
/// 以及调用方交给 render graph 管理生命周期的 buffer / image。
pub struct VulkanRgDevice {
    device: GfxDevice,
    allocator: vk_mem::Allocator,
    shader_dir: PathBuf,

    descriptor_allocator: GfxDescriptorAllocator,
    sbts: HashMap<vk::Pipeline, GfxSbt>,

    buffers: HashMap<vk::Buffer, GfxBuffer>,
    images: HashMap<vk::Image, GfxImage>,
}

// new & init
impl VulkanRgDevice {
    /// shader 名称会被解析为 `<shader_dir>/<name>.spv`
    pub fn new(
        device: GfxDevice,
        allocator: vk_mem::Allocator,
        shader_dir: impl Into<PathBuf>,
        descriptor_pool: DescriptorPoolConfig,
    ) -> anyhow::Result<Self> {
        let descriptor_allocator = GfxDescriptorAllocator::new(&device, descriptor_pool.into())?;
        let shader_dir = shader_dir.into();
        log::info!("vulkan render graph device created, shader dir: {}", shader_dir.display());
        Ok(Self {
            device,
            allocator,
            shader_dir,
            descriptor_allocator,
            sbts: HashMap::new(),
            buffers: HashMap::new(),
            images: HashMap::new(),
        })
    }

    /// 释放 descriptor pool、SBT 以及托管的资源；需要在 graph 的 `destroy` 之后调用
    pub fn destroy(self) {
        let Self {
            device,
            allocator,
            descriptor_allocator,
            sbts,
            buffers,
            images,
            ..
        } = self;

        descriptor_allocator.destroy(&device);
        for (_, sbt) in sbts {
            sbt.destroy(&allocator);
        }
        for (_, buffer) in buffers {
            buffer.destroy(&allocator);
        }
        for (_, image) in images {
            image.destroy(&allocator);
        }
        drop(allocator);
        log::info!("vulkan render graph device destroyed");
    }
}

// getters
impl VulkanRgDevice {
    #[inline]
    pub fn gfx_device(&self) -> &GfxDevice {
        &self.device
    }

    #[inline]
    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }

    #[inline]
    fn cmd(&self, cmd: vk::CommandBuffer) -> GfxCommandBuffer<'_> {
        GfxCommandBuffer::new(&self.device, cmd)
    }
}

// 托管资源
impl VulkanRgDevice {
    /// 之后可以通过 `RenderGraph::destroy_resource` 释放
    pub fn adopt_buffer(&mut self, buffer: GfxBuffer) -> vk::Buffer {
        let handle = buffer.handle();
        self.buffers.insert(handle, buffer);
        handle
    }

    pub fn adopt_image(&mut self, image: GfxImage) -> vk::Image {
        let handle = image.handle();
        self.images.insert(handle, image);
        handle
    }
}

fn label_color(kind: PipelineKind) -> glam::Vec4 {
    match kind {
        PipelineKind::Compute => LabelColor::COLOR_COMPUTE_PASS,
        PipelineKind::Raster => LabelColor::COLOR_RASTER_PASS,
        PipelineKind::Raytrace => LabelColor::COLOR_RAYTRACE_PASS,
        PipelineKind::Custom => LabelColor::COLOR_CUSTOM_PASS,
    }
}

fn rendering_attachment(attachment: &RgRenderingAttachment, is_depth: bool) -> vk::RenderingAttachmentInfo<'static> {
    let (load_op, clear_value) = match attachment.clear {
        Some(clear) if is_depth => (
            vk::AttachmentLoadOp::CLEAR,
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear[0],
                    stencil: 0,
                },
            },
        ),
        Some(clear) => (
            vk::AttachmentLoadOp::CLEAR,
            vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            },
        ),
        None => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
    };
    vk::RenderingAttachmentInfo::default()
        .image_view(attachment.view)
        .image_layout(attachment.layout)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(clear_value)
}

impl RgDevice for VulkanRgDevice {
    fn create_descriptor_set_layout(
        &mut self,
        key: &DescriptorSetLayoutKey,
        name: &str,
    ) -> anyhow::Result<vk::DescriptorSetLayout> {
        let bindings = key
            .bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(binding.stages)
            })
            .collect_vec();
        create_descriptor_set_layout(&self.device, &bindings, format!("{name}-set-layout"))
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: Option<vk::PushConstantRange>,
        name: &str,
    ) -> anyhow::Result<vk::PipelineLayout> {
        create_pipeline_layout(&self.device, set_layouts, push_constants.as_slice(), format!("{name}-layout"))
    }

    fn create_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
        writes: &[RgDescriptorWrite],
        name: &str,
    ) -> anyhow::Result<vk::DescriptorSet> {
        let set = self.descriptor_allocator.allocate(&self.device, layout)?;
        self.device.set_object_debug_name(set, format!("{name}-set"));

        let writes = writes
            .iter()
            .map(|write| GfxDescriptorWrite {
                binding: write.binding,
                descriptor_type: write.descriptor_type,
                resource: match write.resource {
                    RgDescriptorResource::Buffer { buffer, offset, range } => {
                        GfxDescriptorResource::Buffer(vk::DescriptorBufferInfo { buffer, offset, range })
                    }
                    RgDescriptorResource::Image { view, layout, sampler } => {
                        GfxDescriptorResource::Image(vk::DescriptorImageInfo {
                            sampler,
                            image_view: view,
                            image_layout: layout,
                        })
                    }
                },
            })
            .collect_vec();
        write_descriptor_set(&self.device, set, &writes);
        Ok(set)
    }

    fn create_image_view(
        &mut self,
        image: vk::Image,
        params: &ImageViewParams,
        name: &str,
    ) -> anyhow::Result<vk::ImageView> {
        let desc = GfxImageViewDesc {
            format: params.format,
            view_type: params.view_type,
            aspect_mask: params.aspect,
            base_mip: params.base_mip,
            mip_count: params.mip_count,
        };
        create_image_view(&self.device, image, &desc, format!("{name}-view"))
    }

    fn create_sampler(&mut self, kind: SamplerKind) -> anyhow::Result<vk::Sampler> {
        match kind {
            SamplerKind::Linear => create_sampler(&self.device, vk::Filter::LINEAR, "linear"),
            SamplerKind::Nearest => create_sampler(&self.device, vk::Filter::NEAREST, "nearest"),
            SamplerKind::None => anyhow::bail!("SamplerKind::None has no sampler"),
        }
    }

    fn create_compute_pipeline(&mut self, info: &RgComputePipelineInfo) -> anyhow::Result<vk::Pipeline> {
        create_compute_pipeline(&self.device, &self.shader_dir, info.shader, info.layout, info.name)
    }

    fn create_raster_pipeline(&mut self, info: &RgRasterPipelineInfo) -> anyhow::Result<vk::Pipeline> {
        let vertex_bindings = info
            .vertex_streams
            .iter()
            .map(|stream| vk::VertexInputBindingDescription {
                binding: stream.binding,
                stride: stream.stride,
                input_rate: if stream.per_instance != 0 {
                    vk::VertexInputRate::INSTANCE
                } else {
                    vk::VertexInputRate::VERTEX
                },
            })
            .collect_vec();
        let vertex_attributes = info
            .vertex_attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: attribute.format(),
                offset: attribute.offset,
            })
            .collect_vec();

        let state = &info.state;
        let mut create_info = GfxGraphicsPipelineCreateInfo::default();
        create_info
            .attach_info(info.color_formats.to_vec(), info.depth_format)
            .shaders(info.vertex_shader, info.fragment_shader)
            .vertex_input(vertex_bindings, vertex_attributes)
            .primitive_topology(state.topology)
            .cull_mode(state.cull_mode, state.front_face)
            .polygon_mode(state.polygon_mode)
            .depth_test(state.depth_test, state.depth_write, state.depth_compare)
            .alpha_blend(state.alpha_blend);
        create_info.create(&self.device, &self.shader_dir, info.layout, info.name)
    }

    fn create_raytrace_pipeline(&mut self, info: &RgRaytracePipelineInfo) -> anyhow::Result<RgRaytracePipeline> {
        let create_info = GfxRtPipelineCreateInfo {
            raygen: info.raygen,
            miss: info.miss,
            closest_hit: info.closest_hit,
            any_hit: info.any_hit,
            max_recursion_depth: info.max_recursion,
        };
        let pipeline = create_info.create(&self.device, &self.shader_dir, info.layout, info.name)?;

        let sbt = match GfxSbt::new(&self.device, &self.allocator, pipeline, info.miss.len() as u32, 1, info.name) {
            Ok(sbt) => sbt,
            Err(e) => {
                unsafe { self.device.destroy_pipeline(pipeline, None) };
                return Err(e);
            }
        };
        let regions = sbt.regions();
        let sbt_regions = RgSbtRegions {
            raygen: regions.raygen,
            miss: regions.miss,
            hit: regions.hit,
            callable: regions.callable,
        };
        self.sbts.insert(pipeline, sbt);

        Ok(RgRaytracePipeline {
            pipeline,
            sbt: sbt_regions,
        })
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn destroy_raytrace_pipeline(&mut self, pipeline: &RgRaytracePipeline) {
        if let Some(sbt) = self.sbts.remove(&pipeline.pipeline) {
            sbt.destroy(&self.allocator);
        }
        unsafe { self.device.destroy_pipeline(pipeline.pipeline, None) };
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        match self.buffers.remove(&buffer) {
            Some(owned) => owned.destroy(&self.allocator),
            None => log::warn!("destroy_buffer: {:?} is not owned by the render graph device", buffer),
        }
    }

    fn destroy_image(&mut self, image: vk::Image) {
        match self.images.remove(&image) {
            Some(owned) => owned.destroy(&self.allocator),
            None => log::warn!("destroy_image: {:?} is not owned by the render graph device", image),
        }
    }

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, batch: &RgBarrierBatch) {
        let buffer_barriers = batch
            .buffer_barriers
            .iter()
            .map(|barrier| {
                GfxBufferBarrier::new()
                    .src_mask(barrier.src.stage, barrier.src.access)
                    .dst_mask(barrier.dst.stage, barrier.dst.access)
                    .buffer(barrier.buffer)
            })
            .collect_vec();
        let image_barriers = batch
            .image_barriers
            .iter()
            .map(|barrier| {
                GfxImageBarrier::new()
                    .image(barrier.image)
                    .image_aspect_flag(barrier.aspect)
                    .mip_level(barrier.mip_level)
                    .layout_transfer(barrier.old_layout, barrier.new_layout)
                    .src_mask(barrier.src.stage, barrier.src.access)
                    .dst_mask(barrier.dst.stage, barrier.dst.access)
            })
            .collect_vec();
        self.cmd(cmd).pipeline_barrier(&buffer_barriers, &image_barriers);
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.cmd(cmd).cmd_bind_pipeline(bind_point, pipeline);
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.cmd(cmd).bind_descriptor_sets(bind_point, layout, first_set, sets);
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.cmd(cmd).cmd_push_constants(layout, stages, 0, data);
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_count: [u32; 3]) {
        self.cmd(cmd).cmd_dispatch(glam::UVec3::from_array(group_count));
    }

    fn cmd_trace_rays(&self, cmd: vk::CommandBuffer, sbt: &RgSbtRegions, extent: [u32; 3]) {
        self.cmd(cmd).trace_rays(&sbt.raygen, &sbt.miss, &sbt.hit, &sbt.callable, extent);
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &RgRenderingInfo) {
        let color_attachments =
            info.color_attachments.iter().map(|attachment| rendering_attachment(attachment, false)).collect_vec();
        let depth_attachment = info.depth_attachment.as_ref().map(|attachment| rendering_attachment(attachment, true));

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: info.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }
        self.cmd(cmd).cmd_begin_rendering(&rendering_info);
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        self.cmd(cmd).end_rendering();
    }

    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let cmd = self.cmd(cmd);
        cmd.cmd_set_viewport(0, &[viewport]);
        cmd.cmd_set_scissor(0, &[scissor]);
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        self.cmd(cmd).cmd_bind_vertex_buffers(first_binding, buffers, offsets);
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.cmd(cmd).cmd_bind_index_buffer(buffer, offset, index_type);
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        self.cmd(cmd).cmd_draw(vertex_count, instance_count, 0, 0);
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, instance_count: u32) {
        self.cmd(cmd).draw_indexed(index_count, 0, instance_count, 0, 0);
    }

    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, name: &str, kind: PipelineKind) {
        self.cmd(cmd).begin_label(name, label_color(kind));
    }

    fn cmd_end_label(&self, cmd: vk::CommandBuffer) {
        self.cmd(cmd).end_label();
    }
}
