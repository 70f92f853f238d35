//! 单元测试使用的 device：返回递增的假句柄，并记录所有命令

use std::cell::RefCell;

use ash::vk;
use ash::vk::Handle;

use crate::access::PipelineKind;
use crate::bindable::{ImageViewParams, SamplerKind};
use crate::cache::DescriptorSetLayoutKey;
use crate::device::{
    RgComputePipelineInfo, RgDescriptorWrite, RgDevice, RgRasterPipelineInfo, RgRaytracePipeline,
    RgRaytracePipelineInfo, RgRenderingInfo, RgSbtRegions,
};
use crate::tracker::{RgBarrierBatch, RgBufferBarrier, RgImageBarrier};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum MockCommand {
    Barrier {
        buffers: Vec<RgBufferBarrier>,
        images: Vec<RgImageBarrier>,
    },
    BindPipeline(vk::PipelineBindPoint, vk::Pipeline),
    BindDescriptorSets {
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants(Vec<u8>),
    Dispatch([u32; 3]),
    TraceRays([u32; 3]),
    BeginRendering {
        color_layouts: Vec<vk::ImageLayout>,
        has_depth: bool,
    },
    EndRendering,
    SetViewportScissor(vk::Extent2D),
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
    },
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    Draw(u32),
    DrawIndexed(u32),
    BeginLabel(String),
    EndLabel,
}

/// 每种对象被创建的次数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct MockCreated {
    pub descriptor_set_layouts: u32,
    pub pipeline_layouts: u32,
    pub descriptor_sets: u32,
    pub image_views: u32,
    pub samplers: u32,
    pub pipelines: u32,
    pub rt_pipelines: u32,
}

#[derive(Default)]
pub(crate) struct MockDevice {
    next_handle: u64,
    pub created: MockCreated,
    pub destroyed_pipelines: Vec<vk::Pipeline>,
    pub destroyed_views: Vec<vk::ImageView>,
    pub destroyed_buffers: Vec<vk::Buffer>,
    pub destroyed_images: Vec<vk::Image>,
    pub destroyed_layouts: u32,
    /// 每次创建光追 pipeline 时的 miss shader 数量
    pub rt_miss_counts: Vec<usize>,
    pub commands: RefCell<Vec<MockCommand>>,
}

impl MockDevice {
    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }

    fn push(&self, command: MockCommand) {
        self.commands.borrow_mut().push(command);
    }

    pub fn take_commands(&self) -> Vec<MockCommand> {
        std::mem::take(&mut *self.commands.borrow_mut())
    }

    /// 只保留 barrier 和 dispatch / draw / trace，便于检查 barrier 的位置
    pub fn take_timeline(&self) -> Vec<MockCommand> {
        self.take_commands()
            .into_iter()
            .filter(|command| {
                matches!(
                    command,
                    MockCommand::Barrier { .. }
                        | MockCommand::Dispatch(_)
                        | MockCommand::TraceRays(_)
                        | MockCommand::Draw(_)
                        | MockCommand::DrawIndexed(_)
                )
            })
            .collect()
    }
}

impl RgDevice for MockDevice {
    fn create_descriptor_set_layout(
        &mut self,
        _key: &DescriptorSetLayoutKey,
        _name: &str,
    ) -> anyhow::Result<vk::DescriptorSetLayout> {
        self.created.descriptor_set_layouts += 1;
        Ok(vk::DescriptorSetLayout::from_raw(self.next()))
    }

    fn create_pipeline_layout(
        &mut self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constants: Option<vk::PushConstantRange>,
        _name: &str,
    ) -> anyhow::Result<vk::PipelineLayout> {
        self.created.pipeline_layouts += 1;
        Ok(vk::PipelineLayout::from_raw(self.next()))
    }

    fn create_descriptor_set(
        &mut self,
        _layout: vk::DescriptorSetLayout,
        _writes: &[RgDescriptorWrite],
        _name: &str,
    ) -> anyhow::Result<vk::DescriptorSet> {
        self.created.descriptor_sets += 1;
        Ok(vk::DescriptorSet::from_raw(self.next()))
    }

    fn create_image_view(
        &mut self,
        _image: vk::Image,
        _params: &ImageViewParams,
        _name: &str,
    ) -> anyhow::Result<vk::ImageView> {
        self.created.image_views += 1;
        Ok(vk::ImageView::from_raw(self.next()))
    }

    fn create_sampler(&mut self, _kind: SamplerKind) -> anyhow::Result<vk::Sampler> {
        self.created.samplers += 1;
        Ok(vk::Sampler::from_raw(self.next()))
    }

    fn create_compute_pipeline(&mut self, info: &RgComputePipelineInfo) -> anyhow::Result<vk::Pipeline> {
        if info.shader.is_empty() {
            anyhow::bail!("empty shader name");
        }
        self.created.pipelines += 1;
        Ok(vk::Pipeline::from_raw(self.next()))
    }

    fn create_raster_pipeline(&mut self, _info: &RgRasterPipelineInfo) -> anyhow::Result<vk::Pipeline> {
        self.created.pipelines += 1;
        Ok(vk::Pipeline::from_raw(self.next()))
    }

    fn create_raytrace_pipeline(&mut self, info: &RgRaytracePipelineInfo) -> anyhow::Result<RgRaytracePipeline> {
        self.created.rt_pipelines += 1;
        self.rt_miss_counts.push(info.miss.len());
        Ok(RgRaytracePipeline {
            pipeline: vk::Pipeline::from_raw(self.next()),
            sbt: RgSbtRegions::default(),
        })
    }

    fn destroy_descriptor_set_layout(&mut self, _layout: vk::DescriptorSetLayout) {
        self.destroyed_layouts += 1;
    }

    fn destroy_pipeline_layout(&mut self, _layout: vk::PipelineLayout) {
        self.destroyed_layouts += 1;
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.destroyed_views.push(view);
    }

    fn destroy_sampler(&mut self, _sampler: vk::Sampler) {}

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.destroyed_pipelines.push(pipeline);
    }

    fn destroy_raytrace_pipeline(&mut self, pipeline: &RgRaytracePipeline) {
        self.destroyed_pipelines.push(pipeline.pipeline);
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        self.destroyed_buffers.push(buffer);
    }

    fn destroy_image(&mut self, image: vk::Image) {
        self.destroyed_images.push(image);
    }

    fn cmd_pipeline_barrier(&self, _cmd: vk::CommandBuffer, batch: &RgBarrierBatch) {
        self.push(MockCommand::Barrier {
            buffers: batch.buffer_barriers.clone(),
            images: batch.image_barriers.clone(),
        });
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.push(MockCommand::BindPipeline(bind_point, pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.push(MockCommand::BindDescriptorSets {
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.push(MockCommand::PushConstants(data.to_vec()));
    }

    fn cmd_dispatch(&self, _cmd: vk::CommandBuffer, group_count: [u32; 3]) {
        self.push(MockCommand::Dispatch(group_count));
    }

    fn cmd_trace_rays(&self, _cmd: vk::CommandBuffer, _sbt: &RgSbtRegions, extent: [u32; 3]) {
        self.push(MockCommand::TraceRays(extent));
    }

    fn cmd_begin_rendering(&self, _cmd: vk::CommandBuffer, info: &RgRenderingInfo) {
        self.push(MockCommand::BeginRendering {
            color_layouts: info.color_attachments.iter().map(|a| a.layout).collect(),
            has_depth: info.depth_attachment.is_some(),
        });
    }

    fn cmd_end_rendering(&self, _cmd: vk::CommandBuffer) {
        self.push(MockCommand::EndRendering);
    }

    fn cmd_set_viewport_scissor(&self, _cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.push(MockCommand::SetViewportScissor(extent));
    }

    fn cmd_bind_vertex_buffers(
        &self,
        _cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.push(MockCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
        });
    }

    fn cmd_bind_index_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.push(MockCommand::BindIndexBuffer(buffer, index_type));
    }

    fn cmd_draw(&self, _cmd: vk::CommandBuffer, vertex_count: u32, _instance_count: u32) {
        self.push(MockCommand::Draw(vertex_count));
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, index_count: u32, _instance_count: u32) {
        self.push(MockCommand::DrawIndexed(index_count));
    }

    fn cmd_begin_label(&self, _cmd: vk::CommandBuffer, name: &str, _kind: PipelineKind) {
        self.push(MockCommand::BeginLabel(name.to_string()));
    }

    fn cmd_end_label(&self, _cmd: vk::CommandBuffer) {
        self.push(MockCommand::EndLabel);
    }
}
