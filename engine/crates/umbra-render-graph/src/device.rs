//! render graph 与图形 API 之间的边界
//!
//! graph 只通过 [`RgDevice`] 创建对象和录制命令。创建失败返回 `anyhow::Error`，
//! 由 graph 决定如何处理；录制命令不会失败。

use ash::vk;

use crate::bindable::{ImageViewParams, SamplerKind};
use crate::cache::DescriptorSetLayoutKey;
use crate::pass::{RgRasterState, RgVertexAttribute, RgVertexStream};
use crate::tracker::RgBarrierBatch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgDescriptorResource {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        view: vk::ImageView,
        layout: vk::ImageLayout,
        /// 非 combined image sampler 时为 null
        sampler: vk::Sampler,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgDescriptorWrite {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub resource: RgDescriptorResource,
}

pub struct RgComputePipelineInfo<'a> {
    pub name: &'a str,
    pub shader: &'a str,
    pub layout: vk::PipelineLayout,
}

pub struct RgRasterPipelineInfo<'a> {
    pub name: &'a str,
    pub vertex_shader: &'a str,
    pub fragment_shader: &'a str,
    pub layout: vk::PipelineLayout,
    pub color_formats: &'a [vk::Format],
    pub depth_format: Option<vk::Format>,
    pub state: RgRasterState,
    pub vertex_streams: &'a [RgVertexStream],
    pub vertex_attributes: &'a [RgVertexAttribute],
}

pub struct RgRaytracePipelineInfo<'a> {
    pub name: &'a str,
    pub raygen: &'a str,
    pub miss: &'a [&'a str],
    pub closest_hit: &'a str,
    pub any_hit: Option<&'a str>,
    pub max_recursion: u32,
    pub layout: vk::PipelineLayout,
}

/// shader binding table 的各个 region
#[derive(Clone, Copy, Debug, Default)]
pub struct RgSbtRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

/// 光追 pipeline 以及它的 SBT，SBT 的内存由 device 持有
#[derive(Clone, Copy, Debug)]
pub struct RgRaytracePipeline {
    pub pipeline: vk::Pipeline,
    pub sbt: RgSbtRegions,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgRenderingAttachment {
    pub view: vk::ImageView,
    pub layout: vk::ImageLayout,
    /// `None` 表示 load 之前的内容；depth 只使用第一个分量
    pub clear: Option<[f32; 4]>,
}

pub struct RgRenderingInfo<'a> {
    pub extent: vk::Extent2D,
    pub color_attachments: &'a [RgRenderingAttachment],
    pub depth_attachment: Option<RgRenderingAttachment>,
}

/// 图形 API 需要提供的全部能力
///
/// 创建和销毁需要 `&mut self`；录制命令只需要 `&self`，
/// 因此 pass 回调可以拿到 `&dyn RgDevice` 来录制 draw 等命令。
pub trait RgDevice {
    // 创建
    fn create_descriptor_set_layout(
        &mut self,
        key: &DescriptorSetLayoutKey,
        name: &str,
    ) -> anyhow::Result<vk::DescriptorSetLayout>;
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: Option<vk::PushConstantRange>,
        name: &str,
    ) -> anyhow::Result<vk::PipelineLayout>;
    fn create_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
        writes: &[RgDescriptorWrite],
        name: &str,
    ) -> anyhow::Result<vk::DescriptorSet>;
    fn create_image_view(
        &mut self,
        image: vk::Image,
        params: &ImageViewParams,
        name: &str,
    ) -> anyhow::Result<vk::ImageView>;
    fn create_sampler(&mut self, kind: SamplerKind) -> anyhow::Result<vk::Sampler>;
    fn create_compute_pipeline(&mut self, info: &RgComputePipelineInfo) -> anyhow::Result<vk::Pipeline>;
    fn create_raster_pipeline(&mut self, info: &RgRasterPipelineInfo) -> anyhow::Result<vk::Pipeline>;
    fn create_raytrace_pipeline(&mut self, info: &RgRaytracePipelineInfo) -> anyhow::Result<RgRaytracePipeline>;

    // 销毁
    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout);
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);
    fn destroy_image_view(&mut self, view: vk::ImageView);
    fn destroy_sampler(&mut self, sampler: vk::Sampler);
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);
    fn destroy_raytrace_pipeline(&mut self, pipeline: &RgRaytracePipeline);
    /// 释放调用方交给 device 的 buffer 及其内存
    fn destroy_buffer(&mut self, buffer: vk::Buffer);
    /// 释放调用方交给 device 的 image 及其内存
    fn destroy_image(&mut self, image: vk::Image);

    // 录制
    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, batch: &RgBarrierBatch);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    );
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_count: [u32; 3]);
    fn cmd_trace_rays(&self, cmd: vk::CommandBuffer, sbt: &RgSbtRegions, extent: [u32; 3]);
    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &RgRenderingInfo);
    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);
    /// viewport 和 scissor 都覆盖整个 `extent`
    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32);
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, instance_count: u32);
    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, name: &str, kind: crate::access::PipelineKind);
    fn cmd_end_label(&self, cmd: vk::CommandBuffer);
}
