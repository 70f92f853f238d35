//! Pass 描述
//!
//! 调用方通过 [`RgPassDesc`] 描述一个 pass，`add_render_pass` 会把其中的变长数据
//! 拷贝到帧内存中，得到一个 [`RgPass`]，帧结束时统一失效。

use ash::vk;
use ash::vk::Handle as _;
use bytemuck::{Pod, Zeroable};

use crate::access::PipelineKind;
use crate::arena::{ArenaSlice, ArenaStr, ArenaStrList, FrameArena};
use crate::bindable::{Bindable, BindingTable};
use crate::device::RgDevice;
use crate::error::RgResult;
use crate::pool::Handle;

/// 资源声明：`set` 是 descriptor set 的索引
///
/// 作为 vertex buffer 声明时，`set` 表示 vertex input binding
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct RgBinding {
    pub set: u32,
    index: u32,
    generation: u32,
}
impl RgBinding {
    #[inline]
    pub fn new(set: u32, handle: Handle<Bindable>) -> Self {
        Self {
            set,
            index: handle.index(),
            generation: handle.generation(),
        }
    }

    #[inline]
    pub fn handle(&self) -> Handle<Bindable> {
        Handle::from_raw(self.index, self.generation)
    }
}

/// 调用方自己创建好的 descriptor set，直接绑定到 `set`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct RgExtraSet {
    pub set: u32,
    _reserved: u32,
    layout: u64,
    descriptor_set: u64,
}
impl RgExtraSet {
    #[inline]
    pub fn new(set: u32, layout: vk::DescriptorSetLayout, descriptor_set: vk::DescriptorSet) -> Self {
        Self {
            set,
            _reserved: 0,
            layout: layout.as_raw(),
            descriptor_set: descriptor_set.as_raw(),
        }
    }

    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        vk::DescriptorSetLayout::from_raw(self.layout)
    }

    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        vk::DescriptorSet::from_raw(self.descriptor_set)
    }
}

/// raster pass 的 color / depth 输出
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RgAttachment {
    index: u32,
    generation: u32,
    flags: u32,
    _reserved: u32,
    /// depth 输出只使用第一个分量
    pub clear_value: [f32; 4],
}
impl RgAttachment {
    const FLAG_CLEAR: u32 = 1 << 0;
    const FLAG_SWAPCHAIN: u32 = 1 << 1;

    /// 默认 load 之前的内容
    #[inline]
    pub fn new(handle: Handle<Bindable>) -> Self {
        Self {
            index: handle.index(),
            generation: handle.generation(),
            flags: 0,
            _reserved: 0,
            clear_value: [0.0; 4],
        }
    }

    #[inline]
    pub fn with_clear(mut self, clear_value: [f32; 4]) -> Self {
        self.flags |= Self::FLAG_CLEAR;
        self.clear_value = clear_value;
        self
    }

    /// pass 结束后转换到 PRESENT_SRC
    #[inline]
    pub fn presented(mut self) -> Self {
        self.flags |= Self::FLAG_SWAPCHAIN;
        self
    }

    #[inline]
    pub fn handle(&self) -> Handle<Bindable> {
        Handle::from_raw(self.index, self.generation)
    }

    #[inline]
    pub fn clear(&self) -> Option<[f32; 4]> {
        (self.flags & Self::FLAG_CLEAR != 0).then_some(self.clear_value)
    }

    #[inline]
    pub fn is_presented(&self) -> bool {
        self.flags & Self::FLAG_SWAPCHAIN != 0
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct RgVertexStream {
    pub binding: u32,
    pub stride: u32,
    /// 非 0 表示按 instance 步进
    pub per_instance: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct RgVertexAttribute {
    pub location: u32,
    pub binding: u32,
    format: i32,
    pub offset: u32,
}
impl RgVertexAttribute {
    #[inline]
    pub fn new(location: u32, binding: u32, format: vk::Format, offset: u32) -> Self {
        Self {
            location,
            binding,
            format: format.as_raw(),
            offset,
        }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        vk::Format::from_raw(self.format)
    }
}

/// 固定管线状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgRasterState {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub alpha_blend: bool,
}
impl Default for RgRasterState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            alpha_blend: false,
        }
    }
}

pub struct RgRasterDesc<'a> {
    pub vertex_shader: &'a str,
    pub fragment_shader: &'a str,
    pub color_outputs: &'a [RgAttachment],
    pub depth_output: Option<RgAttachment>,
    /// viewport 和 render area
    pub extent: vk::Extent2D,
    pub state: RgRasterState,
    pub vertex_buffers: &'a [RgBinding],
    pub index_buffer: Option<Handle<Bindable>>,
    pub vertex_streams: &'a [RgVertexStream],
    pub vertex_attributes: &'a [RgVertexAttribute],
}
impl<'a> RgRasterDesc<'a> {
    pub fn new(vertex_shader: &'a str, fragment_shader: &'a str, extent: vk::Extent2D) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            color_outputs: &[],
            depth_output: None,
            extent,
            state: RgRasterState::default(),
            vertex_buffers: &[],
            index_buffer: None,
            vertex_streams: &[],
            vertex_attributes: &[],
        }
    }
}

pub struct RgRaytraceDesc<'a> {
    pub raygen: &'a str,
    pub miss: &'a [&'a str],
    pub closest_hit: &'a str,
    pub any_hit: Option<&'a str>,
    /// width × height × depth
    pub extent: [u32; 3],
    pub max_recursion: u32,
}

pub enum RgPipelineDesc<'a> {
    Compute { shader: &'a str, group_count: [u32; 3] },
    Raster(RgRasterDesc<'a>),
    Raytrace(RgRaytraceDesc<'a>),
    Custom,
}
impl RgPipelineDesc<'_> {
    #[inline]
    pub fn kind(&self) -> PipelineKind {
        match self {
            RgPipelineDesc::Compute { .. } => PipelineKind::Compute,
            RgPipelineDesc::Raster(_) => PipelineKind::Raster,
            RgPipelineDesc::Raytrace(_) => PipelineKind::Raytrace,
            RgPipelineDesc::Custom => PipelineKind::Custom,
        }
    }
}

/// pass 执行时传给回调的上下文
pub struct RgPassContext<'a> {
    pub cmd: vk::CommandBuffer,
    pub device: &'a dyn RgDevice,
    pub pass_name: &'a str,
    pub pipeline_kind: PipelineKind,
    /// custom pass 为 null
    pub pipeline_layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub(crate) bindings: &'a BindingTable,
}
impl RgPassContext<'_> {
    #[inline]
    pub fn bindable(&self, handle: Handle<Bindable>) -> Option<&Bindable> {
        self.bindings.get(handle)
    }
}

pub type RgPassCallback = Box<dyn FnMut(&mut RgPassContext<'_>)>;

/// 调用方提交的 pass 描述
pub struct RgPassDesc<'a> {
    pub name: &'a str,
    pub pipeline: RgPipelineDesc<'a>,
    pub reads: &'a [RgBinding],
    pub writes: &'a [RgBinding],
    pub extra_sets: &'a [RgExtraSet],
    pub push_constants: &'a [u8],
    /// compute / raytrace：绑定完成后、dispatch / trace 之前调用；
    /// raster：在 rendering scope 内调用，负责 draw；
    /// custom：唯一的执行内容
    pub callback: Option<RgPassCallback>,
    pub skip_execution: bool,
}
// new & init
impl<'a> RgPassDesc<'a> {
    pub fn new(name: &'a str, pipeline: RgPipelineDesc<'a>) -> Self {
        Self {
            name,
            pipeline,
            reads: &[],
            writes: &[],
            extra_sets: &[],
            push_constants: &[],
            callback: None,
            skip_execution: false,
        }
    }

    pub fn compute(name: &'a str, shader: &'a str, group_count: [u32; 3]) -> Self {
        Self::new(name, RgPipelineDesc::Compute { shader, group_count })
    }

    pub fn raster(name: &'a str, raster: RgRasterDesc<'a>) -> Self {
        Self::new(name, RgPipelineDesc::Raster(raster))
    }

    pub fn raytrace(name: &'a str, raytrace: RgRaytraceDesc<'a>) -> Self {
        Self::new(name, RgPipelineDesc::Raytrace(raytrace))
    }

    pub fn custom(name: &'a str, callback: impl FnMut(&mut RgPassContext<'_>) + 'static) -> Self {
        Self::new(name, RgPipelineDesc::Custom).callback(callback)
    }
}
// builder
impl<'a> RgPassDesc<'a> {
    #[inline]
    pub fn reads(mut self, reads: &'a [RgBinding]) -> Self {
        self.reads = reads;
        self
    }

    #[inline]
    pub fn writes(mut self, writes: &'a [RgBinding]) -> Self {
        self.writes = writes;
        self
    }

    #[inline]
    pub fn extra_sets(mut self, extra_sets: &'a [RgExtraSet]) -> Self {
        self.extra_sets = extra_sets;
        self
    }

    #[inline]
    pub fn push_constants(mut self, push_constants: &'a [u8]) -> Self {
        self.push_constants = push_constants;
        self
    }

    #[inline]
    pub fn callback(mut self, callback: impl FnMut(&mut RgPassContext<'_>) + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    #[inline]
    pub fn skip_execution(mut self, skip: bool) -> Self {
        self.skip_execution = skip;
        self
    }
}

/// 本帧内有效的 pass 引用
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgPassId {
    pub(crate) index: u32,
    pub(crate) epoch: u64,
}
impl RgPassId {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

pub(crate) struct RgRasterData {
    pub vertex_shader: ArenaStr,
    pub fragment_shader: ArenaStr,
    pub color_outputs: ArenaSlice<RgAttachment>,
    pub depth_output: Option<RgAttachment>,
    pub extent: vk::Extent2D,
    pub state: RgRasterState,
    pub vertex_buffers: ArenaSlice<RgBinding>,
    pub index_buffer: Option<Handle<Bindable>>,
    pub vertex_streams: ArenaSlice<RgVertexStream>,
    pub vertex_attributes: ArenaSlice<RgVertexAttribute>,
}

pub(crate) struct RgRaytraceData {
    pub raygen: ArenaStr,
    pub miss: ArenaStrList,
    pub closest_hit: ArenaStr,
    pub any_hit: Option<ArenaStr>,
    pub extent: [u32; 3],
    pub max_recursion: u32,
}

pub(crate) enum RgPipelineData {
    Compute { shader: ArenaStr, group_count: [u32; 3] },
    Raster(RgRasterData),
    Raytrace(RgRaytraceData),
    Custom,
}

/// 帧内存中的 pass
pub struct RgPass {
    pub(crate) name: ArenaStr,
    pub(crate) pipeline: RgPipelineData,
    pub(crate) reads: ArenaSlice<RgBinding>,
    pub(crate) writes: ArenaSlice<RgBinding>,
    pub(crate) extra_sets: ArenaSlice<RgExtraSet>,
    pub(crate) push_constants: ArenaSlice<u8>,
    pub(crate) descriptor_set_count: u32,
    pub(crate) skip_execution: bool,
}

// record
impl RgPass {
    /// 拷贝 `desc` 中的变长数据到 arena，callback 由调用方单独保存
    pub(crate) fn record(arena: &mut FrameArena, desc: &RgPassDesc) -> RgResult<Self> {
        let pipeline = match &desc.pipeline {
            RgPipelineDesc::Compute { shader, group_count } => RgPipelineData::Compute {
                shader: arena.alloc_str(shader)?,
                group_count: *group_count,
            },
            RgPipelineDesc::Raster(raster) => RgPipelineData::Raster(RgRasterData {
                vertex_shader: arena.alloc_str(raster.vertex_shader)?,
                fragment_shader: arena.alloc_str(raster.fragment_shader)?,
                color_outputs: arena.alloc_slice(raster.color_outputs)?,
                depth_output: raster.depth_output,
                extent: raster.extent,
                state: raster.state,
                vertex_buffers: arena.alloc_slice(raster.vertex_buffers)?,
                index_buffer: raster.index_buffer,
                vertex_streams: arena.alloc_slice(raster.vertex_streams)?,
                vertex_attributes: arena.alloc_slice(raster.vertex_attributes)?,
            }),
            RgPipelineDesc::Raytrace(rt) => RgPipelineData::Raytrace(RgRaytraceData {
                raygen: arena.alloc_str(rt.raygen)?,
                miss: arena.alloc_strs(rt.miss)?,
                closest_hit: arena.alloc_str(rt.closest_hit)?,
                any_hit: rt.any_hit.map(|any_hit| arena.alloc_str(any_hit)).transpose()?,
                extent: rt.extent,
                max_recursion: rt.max_recursion,
            }),
            RgPipelineDesc::Custom => RgPipelineData::Custom,
        };

        let descriptor_set_count = desc
            .reads
            .iter()
            .chain(desc.writes)
            .map(|binding| binding.set)
            .chain(desc.extra_sets.iter().map(|extra| extra.set))
            .max()
            .map_or(0, |max_set| max_set + 1);

        Ok(Self {
            name: arena.alloc_str(desc.name)?,
            pipeline,
            reads: arena.alloc_slice(desc.reads)?,
            writes: arena.alloc_slice(desc.writes)?,
            extra_sets: arena.alloc_slice(desc.extra_sets)?,
            push_constants: arena.alloc_slice(desc.push_constants)?,
            descriptor_set_count,
            skip_execution: desc.skip_execution,
        })
    }
}

// getters
impl RgPass {
    #[inline]
    pub fn kind(&self) -> PipelineKind {
        match &self.pipeline {
            RgPipelineData::Compute { .. } => PipelineKind::Compute,
            RgPipelineData::Raster(_) => PipelineKind::Raster,
            RgPipelineData::Raytrace(_) => PipelineKind::Raytrace,
            RgPipelineData::Custom => PipelineKind::Custom,
        }
    }

    /// `1 + max(set)`，没有任何声明时为 0
    #[inline]
    pub fn descriptor_set_count(&self) -> u32 {
        self.descriptor_set_count
    }

    #[inline]
    pub fn is_skipped(&self) -> bool {
        self.skip_execution
    }

    pub fn name<'a>(&self, arena: &'a FrameArena) -> RgResult<&'a str> {
        arena.get_str(&self.name)
    }

    pub fn reads<'a>(&self, arena: &'a FrameArena) -> RgResult<&'a [RgBinding]> {
        arena.get(&self.reads)
    }

    pub fn writes<'a>(&self, arena: &'a FrameArena) -> RgResult<&'a [RgBinding]> {
        arena.get(&self.writes)
    }

    pub fn extra_sets<'a>(&self, arena: &'a FrameArena) -> RgResult<&'a [RgExtraSet]> {
        arena.get(&self.extra_sets)
    }

    pub fn push_constants<'a>(&self, arena: &'a FrameArena) -> RgResult<&'a [u8]> {
        arena.get(&self.push_constants)
    }
}
