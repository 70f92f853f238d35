//! render graph
//!
//! 一帧的流程：注册资源 → `add_render_pass` → `execute`。
//! `execute` 严格按照提交顺序执行 pass，不做任何重排；每个 pass 执行之前
//! 根据 reads / writes 推导 barrier，再从缓存中取出（或者创建）pipeline、
//! pipeline layout 和 descriptor set。
//!
//! 帧结束时清空访问状态、pass 列表和帧内存；绑定表、image layout 和所有缓存跨帧保留。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ash::vk;
use itertools::Itertools;
use umbra_gfx::utilities::helper::profile_scope;

use crate::access::{AccessState, PipelineKind};
use crate::arena::FrameArena;
use crate::bindable::{
    Bindable, BindableKind, BindableResource, BindingTable, ImageViewParams, RgBufferRef, RgImageRef, SamplerKind,
};
use crate::cache::{
    CachedPipeline, CachedRtPipeline, DescriptorBindingKey, DescriptorSetKey, DescriptorSetLayoutKey, ImageViewKey,
    PipelineLayoutKey, RgCacheStats, RgCaches, SetLayoutSlot,
};
use crate::config::RenderGraphConfig;
use crate::device::{
    RgComputePipelineInfo, RgDescriptorResource, RgDescriptorWrite, RgDevice, RgRasterPipelineInfo,
    RgRaytracePipeline, RgRaytracePipelineInfo, RgRenderingAttachment, RgRenderingInfo,
};
use crate::error::{RgError, RgResult};
use crate::pass::{
    RgAttachment, RgBinding, RgPass, RgPassCallback, RgPassContext, RgPassDesc, RgPassId, RgPipelineData, RgRasterData,
};
use crate::pool::Handle;
use crate::profiler::{NoopProfiler, RgPassProfiler};
use crate::tracker::{AccessTracker, RgBarrierBatch};

/// 最近一次 `execute` 的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgFrameStats {
    pub passes_executed: u32,
    /// 录制中途出错而被中止的 pass，不计入 `passes_executed`
    pub aborted_passes: u32,
    pub buffer_barriers: u32,
    pub image_barriers: u32,
    /// handle 已失效而被跳过的绑定
    pub skipped_bindings: u32,
}

pub struct RenderGraph<D: RgDevice> {
    device: D,
    config: RenderGraphConfig,
    profiler: Box<dyn RgPassProfiler>,

    bindings: BindingTable,
    tracker: AccessTracker,
    caches: RgCaches,

    arena: FrameArena,
    passes: Vec<RgPass>,
    /// 和 `passes` 一一对应
    callbacks: Vec<Option<RgPassCallback>>,

    frame_index: u64,
    last_frame_stats: RgFrameStats,
}

// new & init
impl<D: RgDevice> RenderGraph<D> {
    pub fn new(device: D, config: RenderGraphConfig) -> Self {
        log::info!(
            "render graph created: arena {} bytes, debug labels: {}",
            config.arena_capacity,
            config.pass_debug_labels
        );
        Self {
            arena: FrameArena::new(config.arena_capacity),
            device,
            config,
            profiler: Box::new(NoopProfiler),
            bindings: BindingTable::new(),
            tracker: AccessTracker::new(),
            caches: RgCaches::default(),
            passes: Vec::new(),
            callbacks: Vec::new(),
            frame_index: 0,
            last_frame_stats: RgFrameStats::default(),
        }
    }

    #[inline]
    pub fn with_profiler(mut self, profiler: impl RgPassProfiler + 'static) -> Self {
        self.profiler = Box::new(profiler);
        self
    }
}

// register
impl<D: RgDevice> RenderGraph<D> {
    #[inline]
    pub fn register_image_view(
        &mut self,
        image: RgImageRef,
        view: ImageViewParams,
        name: impl Into<String>,
    ) -> Handle<Bindable> {
        self.bindings.register_image_view(image, view, name)
    }

    #[inline]
    pub fn register_storage_buffer(&mut self, buffer: RgBufferRef, name: impl Into<String>) -> Handle<Bindable> {
        self.bindings.register_storage_buffer(buffer, name)
    }

    #[inline]
    pub fn register_uniform_buffer(&mut self, buffer: RgBufferRef, name: impl Into<String>) -> Handle<Bindable> {
        self.bindings.register_uniform_buffer(buffer, name)
    }

    #[inline]
    pub fn register_vertex_buffer(&mut self, buffer: RgBufferRef, name: impl Into<String>) -> Handle<Bindable> {
        self.bindings.register_vertex_buffer(buffer, name)
    }

    #[inline]
    pub fn register_index_buffer(
        &mut self,
        buffer: RgBufferRef,
        index_type: vk::IndexType,
        name: impl Into<String>,
    ) -> Handle<Bindable> {
        self.bindings.register_index_buffer(buffer, index_type, name)
    }

    /// 只释放 handle，底层资源仍由调用方持有
    #[inline]
    pub fn unregister(&mut self, handle: Handle<Bindable>) -> Option<Bindable> {
        self.bindings.unregister(handle)
    }

    /// 销毁 handle 指向的 buffer 或 image
    ///
    /// 所有指向同一资源的 handle 都会失效，相关的访问记录、image view 和
    /// descriptor set 缓存会被清除
    pub fn destroy_resource(&mut self, handle: Handle<Bindable>) -> RgResult<()> {
        let resource = self.bindings.pool().try_get(handle)?.resource;
        match resource {
            BindableResource::Buffer { buffer, .. } => {
                let buffer = buffer.buffer;
                for stale in self.bindings.handles_of_buffer(buffer) {
                    self.bindings.unregister(stale);
                }
                self.tracker.forget_buffer(buffer);
                self.caches.purge_buffer(buffer);
                self.device.destroy_buffer(buffer);
            }
            BindableResource::Image { image, .. } => {
                let image = image.image;
                for stale in self.bindings.handles_of_image(image) {
                    self.bindings.unregister(stale);
                }
                self.tracker.forget_image(image);
                self.caches.purge_image(image, &mut self.device);
                self.device.destroy_image(image);
            }
        }
        Ok(())
    }
}

// pass
impl<D: RgDevice> RenderGraph<D> {
    /// 把 pass 的变长数据拷贝到帧内存，返回的 id 在本帧 `execute` 之前有效
    ///
    /// 帧内存不足时直接 panic
    pub fn add_render_pass(&mut self, mut desc: RgPassDesc) -> RgPassId {
        let callback = desc.callback.take();
        let pass = match RgPass::record(&mut self.arena, &desc) {
            Ok(pass) => pass,
            Err(e) => panic!("render graph: failed to record pass '{}': {}", desc.name, e),
        };

        let id = RgPassId {
            index: self.passes.len() as u32,
            epoch: self.arena.epoch(),
        };
        self.passes.push(pass);
        self.callbacks.push(callback);
        id
    }

    pub fn pass(&self, id: RgPassId) -> RgResult<&RgPass> {
        let unknown = RgError::UnknownPass {
            index: id.index,
            epoch: id.epoch,
        };
        if id.epoch != self.arena.epoch() {
            return Err(unknown);
        }
        self.passes.get(id.index as usize).ok_or(unknown)
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }
}

// execute
impl<D: RgDevice> RenderGraph<D> {
    /// 按提交顺序录制所有 pass，然后重置本帧状态
    pub fn execute(&mut self, cmd: vk::CommandBuffer) {
        let _span = profile_scope("RenderGraph::execute");

        let passes = std::mem::take(&mut self.passes);
        let mut callbacks = std::mem::take(&mut self.callbacks);
        let mut stats = RgFrameStats::default();

        for (pass, callback) in passes.iter().zip(callbacks.iter_mut()) {
            if pass.is_skipped() {
                continue;
            }
            let pass_name = match pass.name(&self.arena) {
                Ok(name) => name,
                Err(e) => {
                    log::error!("render graph: cannot read pass name: {}", e);
                    continue;
                }
            };

            self.profiler.start_recording(pass_name, cmd);
            if self.config.pass_debug_labels {
                self.device.cmd_begin_label(cmd, pass_name, pass.kind());
            }

            let mut recorder = PassRecorder {
                device: &mut self.device,
                arena: &self.arena,
                bindings: &self.bindings,
                tracker: &mut self.tracker,
                caches: &mut self.caches,
                config: &self.config,
                stats: &mut stats,
                cmd,
            };
            match recorder.record(pass, pass_name, callback.as_mut()) {
                Ok(()) => stats.passes_executed += 1,
                Err(e) => {
                    log::error!("render graph: pass '{}' aborted: {}", pass_name, e);
                    stats.aborted_passes += 1;
                }
            }

            if self.config.pass_debug_labels {
                self.device.cmd_end_label(cmd);
            }
            self.profiler.stop_recording(pass_name, cmd);
        }

        log::trace!(
            "frame {} executed: {} passes, {} buffer barriers, {} image barriers",
            self.frame_index,
            stats.passes_executed,
            stats.buffer_barriers,
            stats.image_barriers
        );

        drop(callbacks);
        self.tracker.reset_frame();
        self.arena.reset();
        self.frame_index += 1;
        self.last_frame_stats = stats;
    }

    /// shader 热重载：销毁所有 pipeline，下一次执行时重新创建
    pub fn rebuild_pipelines(&mut self) {
        let count = self.caches.pipelines.len() + self.caches.rt_pipelines.len() + self.caches.retired_count();
        self.caches.clear_pipelines(&mut self.device);
        log::info!("render graph: {} pipelines destroyed for rebuild", count);
    }

    /// 销毁所有缓存的对象；graph 之后仍然可用，缓存会重新填充
    pub fn destroy(&mut self) {
        self.caches.destroy(&mut self.device);
        log::info!("render graph destroyed after {} frames", self.frame_index);
    }

    /// 销毁缓存并交还 device，用于在 graph 之后释放 device 自身持有的对象
    pub fn into_device(mut self) -> D {
        self.destroy();
        self.device
    }
}

// getters
impl<D: RgDevice> RenderGraph<D> {
    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[inline]
    pub fn config(&self) -> &RenderGraphConfig {
        &self.config
    }

    #[inline]
    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    #[inline]
    pub fn tracker(&self) -> &AccessTracker {
        &self.tracker
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn cache_stats(&self) -> RgCacheStats {
        self.caches.stats()
    }

    #[inline]
    pub fn last_frame_stats(&self) -> RgFrameStats {
        self.last_frame_stats
    }
}

// debug
impl<D: RgDevice> RenderGraph<D> {
    fn bindable_name(&self, handle: Handle<Bindable>) -> &str {
        self.bindings.get(handle).map_or("<stale>", |bindable| bindable.name.as_str())
    }

    fn describe_bindings(&self, bindings: RgResult<&[RgBinding]>) -> String {
        match bindings {
            Ok(bindings) => bindings
                .iter()
                .map(|binding| format!("{}@{}", self.bindable_name(binding.handle()), binding.set))
                .join(", "),
            Err(e) => format!("<{}>", e),
        }
    }

    /// 打印本帧已经提交的 pass
    pub fn print_execution_plan(&self) {
        log::info!("render graph frame {}: {} passes", self.frame_index, self.passes.len());
        for (index, pass) in self.passes.iter().enumerate() {
            let name = pass.name(&self.arena).unwrap_or("<stale>");
            let skipped = if pass.is_skipped() { " (skipped)" } else { "" };
            log::info!("  #{} {} [{:?}, {} sets]{}", index, name, pass.kind(), pass.descriptor_set_count(), skipped);
            log::info!("      reads : {}", self.describe_bindings(pass.reads(&self.arena)));
            log::info!("      writes: {}", self.describe_bindings(pass.writes(&self.arena)));

            if let RgPipelineData::Raster(raster) = &pass.pipeline {
                let outputs = self.arena.get(&raster.color_outputs).map(|colors| {
                    colors
                        .iter()
                        .chain(raster.depth_output.as_ref())
                        .map(|attachment| self.bindable_name(attachment.handle()))
                        .join(", ")
                });
                log::info!("      output: {}", outputs.unwrap_or_default());
            }
        }
    }
}

/// 解析成功的 read / write 声明
struct ResolvedBinding<'g> {
    set: u32,
    /// set 内的 binding 编号：先 reads 后 writes，按声明顺序递增
    binding: u32,
    is_write: bool,
    bindable: &'g Bindable,
}

struct ResolvedAttachment<'g> {
    attachment: RgAttachment,
    image: &'g RgImageRef,
    view: &'g ImageViewParams,
    name: &'g str,
}

/// raster pass 的输入输出
#[derive(Default)]
struct RasterIo<'g> {
    colors: Vec<ResolvedAttachment<'g>>,
    depth: Option<ResolvedAttachment<'g>>,
    vertex_buffers: Vec<(u32, &'g RgBufferRef)>,
    index_buffer: Option<(&'g RgBufferRef, vk::IndexType)>,
}

/// 录制单个 pass 期间需要的 graph 状态
struct PassRecorder<'g, D: RgDevice> {
    device: &'g mut D,
    arena: &'g FrameArena,
    bindings: &'g BindingTable,
    tracker: &'g mut AccessTracker,
    caches: &'g mut RgCaches,
    config: &'g RenderGraphConfig,
    stats: &'g mut RgFrameStats,
    cmd: vk::CommandBuffer,
}

// record
impl<'g, D: RgDevice> PassRecorder<'g, D> {
    fn record(&mut self, pass: &RgPass, pass_name: &str, callback: Option<&mut RgPassCallback>) -> RgResult<()> {
        let kind = pass.kind();
        if kind == PipelineKind::Custom {
            if let Some(callback) = callback {
                callback(&mut self.context(pass_name, kind, vk::PipelineLayout::null(), vk::Extent2D::default()));
            }
            return Ok(());
        }

        let resolved = self.resolve_bindings(pass)?;
        let raster_io = match &pass.pipeline {
            RgPipelineData::Raster(raster) => self.resolve_raster_io(raster)?,
            _ => RasterIo::default(),
        };

        // 1. barrier：先处理所有 writes，再处理所有 reads
        let mut batch = RgBarrierBatch::default();
        for is_write in [true, false] {
            let Some(state) = AccessState::for_request(kind, is_write) else {
                continue;
            };
            for binding in resolved.iter().filter(|binding| binding.is_write == is_write) {
                self.synchronize(binding.bindable, state, &mut batch);
            }
        }
        self.synchronize_raster(&raster_io, &mut batch);
        self.flush_barriers(pass_name, &batch);

        // 2. layout & descriptor set
        let (layout, sets) = self.resolve_descriptors(pass, pass_name, &resolved)?;
        let push_constants = pass.push_constants(self.arena)?;

        // 3. pipeline & 执行
        match &pass.pipeline {
            RgPipelineData::Compute { shader, group_count } => {
                let shader = self.arena.get_str(shader)?;
                let pipeline = self.compute_pipeline(pass_name, shader, layout);
                self.bind(kind, pipeline, layout, &sets, push_constants);

                if let Some(callback) = callback {
                    callback(&mut self.context(pass_name, kind, layout, vk::Extent2D::default()));
                }
                self.device.cmd_dispatch(self.cmd, *group_count);
            }
            RgPipelineData::Raster(raster) => {
                let vertex_shader = self.arena.get_str(&raster.vertex_shader)?;
                let fragment_shader = self.arena.get_str(&raster.fragment_shader)?;
                let color_formats = raster_io.colors.iter().map(|color| color.view.format).collect_vec();
                let pipeline = self.raster_pipeline(&RgRasterPipelineInfo {
                    name: pass_name,
                    vertex_shader,
                    fragment_shader,
                    layout,
                    color_formats: &color_formats,
                    depth_format: raster_io.depth.as_ref().map(|depth| depth.view.format),
                    state: raster.state,
                    vertex_streams: self.arena.get(&raster.vertex_streams)?,
                    vertex_attributes: self.arena.get(&raster.vertex_attributes)?,
                });
                self.bind(kind, pipeline, layout, &sets, push_constants);

                let color_attachments = raster_io
                    .colors
                    .iter()
                    .map(|color| self.rendering_attachment(color, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                    .collect_vec();
                let depth_attachment = raster_io
                    .depth
                    .as_ref()
                    .map(|depth| self.rendering_attachment(depth, AccessState::DEPTH_WRITE.layout));

                self.device.cmd_begin_rendering(
                    self.cmd,
                    &RgRenderingInfo {
                        extent: raster.extent,
                        color_attachments: &color_attachments,
                        depth_attachment,
                    },
                );
                self.device.cmd_set_viewport_scissor(self.cmd, raster.extent);
                for (binding, buffer) in &raster_io.vertex_buffers {
                    self.device.cmd_bind_vertex_buffers(self.cmd, *binding, &[buffer.buffer], &[buffer.offset]);
                }
                if let Some((buffer, index_type)) = raster_io.index_buffer {
                    self.device.cmd_bind_index_buffer(self.cmd, buffer.buffer, buffer.offset, index_type);
                }

                if let Some(callback) = callback {
                    callback(&mut self.context(pass_name, kind, layout, raster.extent));
                }
                self.device.cmd_end_rendering(self.cmd);

                self.present(pass_name, &raster_io);
            }
            RgPipelineData::Raytrace(rt) => {
                let miss = self.arena.get_strs(&rt.miss)?;
                let any_hit = rt.any_hit.as_ref().map(|any_hit| self.arena.get_str(any_hit)).transpose()?;
                let pipeline = self.raytrace_pipeline(&RgRaytracePipelineInfo {
                    name: pass_name,
                    raygen: self.arena.get_str(&rt.raygen)?,
                    miss: &miss,
                    closest_hit: self.arena.get_str(&rt.closest_hit)?,
                    any_hit,
                    max_recursion: rt.max_recursion,
                    layout,
                });
                self.bind(kind, pipeline.pipeline, layout, &sets, push_constants);

                let extent = vk::Extent2D {
                    width: rt.extent[0],
                    height: rt.extent[1],
                };
                if let Some(callback) = callback {
                    callback(&mut self.context(pass_name, kind, layout, extent));
                }
                self.device.cmd_trace_rays(self.cmd, &pipeline.sbt, rt.extent);
            }
            RgPipelineData::Custom => {}
        }

        Ok(())
    }

    fn context<'c>(
        &'c self,
        pass_name: &'c str,
        pipeline_kind: PipelineKind,
        pipeline_layout: vk::PipelineLayout,
        extent: vk::Extent2D,
    ) -> RgPassContext<'c> {
        RgPassContext {
            cmd: self.cmd,
            device: &*self.device,
            pass_name,
            pipeline_kind,
            pipeline_layout,
            extent,
            bindings: self.bindings,
        }
    }

    fn bind(
        &self,
        kind: PipelineKind,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
        push_constants: &[u8],
    ) {
        let bind_point = kind.bind_point();
        self.device.cmd_bind_pipeline(self.cmd, bind_point, pipeline);
        if !sets.is_empty() {
            self.device.cmd_bind_descriptor_sets(self.cmd, bind_point, layout, 0, sets);
        }
        if !push_constants.is_empty() {
            self.device.cmd_push_constants(self.cmd, layout, kind.shader_stages(), push_constants);
        }
    }
}

// resolve
impl<'g, D: RgDevice> PassRecorder<'g, D> {
    fn lookup(&mut self, handle: Handle<Bindable>, usage: &str) -> Option<&'g Bindable> {
        let bindings: &'g BindingTable = self.bindings;
        let bindable = bindings.get(handle);
        if bindable.is_none() {
            log::warn!("render graph: skip stale {} handle {:?}", usage, handle);
            self.stats.skipped_bindings += 1;
        }
        bindable
    }

    fn resolve_bindings(&mut self, pass: &RgPass) -> RgResult<Vec<ResolvedBinding<'g>>> {
        let arena: &'g FrameArena = self.arena;
        let reads = pass.reads(arena)?;
        let writes = pass.writes(arena)?;

        let mut next_binding = vec![0_u32; pass.descriptor_set_count() as usize];
        let mut resolved = Vec::with_capacity(reads.len() + writes.len());
        let declarations = reads.iter().map(|binding| (binding, false)).chain(writes.iter().map(|binding| (binding, true)));
        for (declared, is_write) in declarations {
            let slot = &mut next_binding[declared.set as usize];
            let binding = *slot;
            *slot += 1;

            if let Some(bindable) = self.lookup(declared.handle(), if is_write { "write" } else { "read" }) {
                resolved.push(ResolvedBinding {
                    set: declared.set,
                    binding,
                    is_write,
                    bindable,
                });
            }
        }
        Ok(resolved)
    }

    fn resolve_attachment(&mut self, attachment: RgAttachment) -> Option<ResolvedAttachment<'g>> {
        let bindable = self.lookup(attachment.handle(), "output")?;
        let Some((image, view)) = bindable.image() else {
            log::warn!("render graph: output '{}' is not an image view", bindable.name);
            return None;
        };
        Some(ResolvedAttachment {
            attachment,
            image,
            view,
            name: &bindable.name,
        })
    }

    fn resolve_raster_io(&mut self, raster: &RgRasterData) -> RgResult<RasterIo<'g>> {
        let arena: &'g FrameArena = self.arena;
        let mut io = RasterIo::default();

        for color in arena.get(&raster.color_outputs)? {
            io.colors.extend(self.resolve_attachment(*color));
        }
        io.depth = raster.depth_output.and_then(|depth| self.resolve_attachment(depth));

        for vertex_buffer in arena.get(&raster.vertex_buffers)? {
            let Some(bindable) = self.lookup(vertex_buffer.handle(), "vertex buffer") else {
                continue;
            };
            match bindable.buffer() {
                Some(buffer) => io.vertex_buffers.push((vertex_buffer.set, buffer)),
                None => log::warn!("render graph: vertex buffer '{}' is not a buffer", bindable.name),
            }
        }

        if let Some(handle) = raster.index_buffer {
            if let Some(bindable) = self.lookup(handle, "index buffer") {
                match bindable.resource {
                    BindableResource::Buffer { ref buffer, index_type } => {
                        io.index_buffer = Some((buffer, index_type.unwrap_or(vk::IndexType::UINT32)));
                    }
                    BindableResource::Image { .. } => {
                        log::warn!("render graph: index buffer '{}' is not a buffer", bindable.name);
                    }
                }
            }
        }

        Ok(io)
    }
}

// barrier
impl<'g, D: RgDevice> PassRecorder<'g, D> {
    fn synchronize(&mut self, bindable: &Bindable, state: AccessState, batch: &mut RgBarrierBatch) {
        match &bindable.resource {
            BindableResource::Buffer { buffer, .. } => {
                batch.buffer_barriers.extend(self.tracker.access_buffer(buffer.buffer, state));
            }
            BindableResource::Image { image, view } => {
                for mip in view.mip_range() {
                    batch.image_barriers.extend(self.tracker.access_image(image.image, view.aspect, mip, state));
                }
            }
        }
    }

    /// vertex / index buffer 按读取处理；color / depth 输出无条件转换
    fn synchronize_raster(&mut self, io: &RasterIo, batch: &mut RgBarrierBatch) {
        let vertex_inputs = io.vertex_buffers.iter().map(|(_, buffer)| *buffer).chain(io.index_buffer.map(|(buffer, _)| buffer));
        for buffer in vertex_inputs {
            batch.buffer_barriers.extend(self.tracker.access_buffer(buffer.buffer, AccessState::VERTEX_READ));
        }

        let outputs = io
            .colors
            .iter()
            .map(|color| (color, AccessState::COLOR_WRITE))
            .chain(io.depth.as_ref().map(|depth| (depth, AccessState::DEPTH_WRITE)));
        for (output, state) in outputs {
            for mip in output.view.mip_range() {
                batch.image_barriers.push(self.tracker.transition_image(output.image.image, output.view.aspect, mip, state));
            }
        }
    }

    /// swapchain 输出在 rendering 结束后转换到 PRESENT_SRC
    fn present(&mut self, pass_name: &str, io: &RasterIo) {
        let mut batch = RgBarrierBatch::default();
        for color in io.colors.iter().filter(|color| color.attachment.is_presented() || color.image.is_swapchain) {
            for mip in color.view.mip_range() {
                batch.image_barriers.push(self.tracker.transition_image(
                    color.image.image,
                    color.view.aspect,
                    mip,
                    AccessState::PRESENT,
                ));
            }
        }
        self.flush_barriers(pass_name, &batch);
    }

    fn flush_barriers(&mut self, pass_name: &str, batch: &RgBarrierBatch) {
        if batch.is_empty() {
            return;
        }
        if self.config.log_barriers {
            for barrier in &batch.buffer_barriers {
                log::debug!("[{}] {}", pass_name, barrier);
            }
            for barrier in &batch.image_barriers {
                log::debug!("[{}] {}", pass_name, barrier);
            }
        }
        self.stats.buffer_barriers += batch.buffer_barriers.len() as u32;
        self.stats.image_barriers += batch.image_barriers.len() as u32;
        self.device.cmd_pipeline_barrier(self.cmd, batch);
    }
}

// descriptor
impl<'g, D: RgDevice> PassRecorder<'g, D> {
    fn resolve_descriptors(
        &mut self,
        pass: &RgPass,
        pass_name: &str,
        resolved: &[ResolvedBinding],
    ) -> RgResult<(vk::PipelineLayout, Vec<vk::DescriptorSet>)> {
        let kind = pass.kind();
        let stages = kind.shader_stages();
        let extra_sets = pass.extra_sets(self.arena)?;
        let push_constants = pass.push_constants(self.arena)?;
        let set_count = pass.descriptor_set_count() as usize;
        let extra_at = |set: usize| extra_sets.iter().find(|extra| extra.set as usize == set);

        let mut layout_keys = vec![DescriptorSetLayoutKey::default(); set_count];
        let mut set_writes = vec![Vec::new(); set_count];
        for binding in resolved {
            let set = binding.set as usize;
            if extra_at(set).is_some() {
                log::warn!(
                    "render graph: pass '{}' binds '{}' to set {} which is provided externally",
                    pass_name,
                    binding.bindable.name,
                    set
                );
                continue;
            }
            let write = self.descriptor_write(binding);
            layout_keys[set].bindings.push(DescriptorBindingKey {
                binding: write.binding,
                descriptor_type: write.descriptor_type,
                stages,
            });
            set_writes[set].push(write);
        }

        let slots = layout_keys
            .into_iter()
            .enumerate()
            .map(|(set, key)| match extra_at(set) {
                Some(extra) => SetLayoutSlot::External(extra.layout()),
                None => SetLayoutSlot::Derived(key),
            })
            .collect_vec();
        let set_layouts = slots
            .iter()
            .map(|slot| match slot {
                SetLayoutSlot::Derived(key) => self.set_layout(key, pass_name),
                SetLayoutSlot::External(layout) => *layout,
            })
            .collect_vec();

        let push_range = (!push_constants.is_empty()).then(|| vk::PushConstantRange {
            stage_flags: stages,
            offset: 0,
            size: push_constants.len() as u32,
        });
        let layout_key = PipelineLayoutKey {
            push_constant_size: push_constants.len() as u32,
            push_constant_stages: push_range.map_or(vk::ShaderStageFlags::empty(), |range| range.stage_flags),
            sets: slots,
        };
        let device = &mut *self.device;
        let layout = fatal(
            self.caches.pipeline_layouts.get_or_create(&layout_key, || {
                device.create_pipeline_layout(&set_layouts, push_range, pass_name)
            }),
            "pipeline layout",
            pass_name,
        );

        let mut sets = Vec::with_capacity(set_count);
        for (set, slot) in layout_key.sets.iter().enumerate() {
            let descriptor_set = match (slot, extra_at(set)) {
                (_, Some(extra)) => extra.descriptor_set(),
                (SetLayoutSlot::Derived(key), None) => {
                    let set_key = DescriptorSetKey {
                        layout: key.clone(),
                        writes: std::mem::take(&mut set_writes[set]),
                    };
                    let set_layout = set_layouts[set];
                    let device = &mut *self.device;
                    fatal(
                        self.caches.descriptor_sets.get_or_create(&set_key, || {
                            device.create_descriptor_set(set_layout, &set_key.writes, pass_name)
                        }),
                        "descriptor set",
                        pass_name,
                    )
                }
                (SetLayoutSlot::External(_), None) => vk::DescriptorSet::null(),
            };
            sets.push(descriptor_set);
        }

        Ok((layout, sets))
    }

    /// - buffer：uniform 为 UNIFORM_BUFFER，其余为 STORAGE_BUFFER
    /// - image 写入：STORAGE_IMAGE
    /// - image 读取：带 sampler 时为 COMBINED_IMAGE_SAMPLER，否则为 SAMPLED_IMAGE
    fn descriptor_write(&mut self, binding: &ResolvedBinding) -> RgDescriptorWrite {
        let (descriptor_type, resource) = match &binding.bindable.resource {
            BindableResource::Buffer { buffer, .. } => {
                let descriptor_type = match binding.bindable.kind {
                    BindableKind::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
                    _ => vk::DescriptorType::STORAGE_BUFFER,
                };
                let resource = RgDescriptorResource::Buffer {
                    buffer: buffer.buffer,
                    offset: buffer.offset,
                    range: buffer.size,
                };
                (descriptor_type, resource)
            }
            BindableResource::Image { image, view } => {
                let image_view = self.image_view(image.image, view, &binding.bindable.name);
                let (descriptor_type, layout, sampler) = if binding.is_write {
                    (vk::DescriptorType::STORAGE_IMAGE, vk::ImageLayout::GENERAL, vk::Sampler::null())
                } else if view.sampler != SamplerKind::None {
                    (
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        self.sampler(view.sampler),
                    )
                } else {
                    (vk::DescriptorType::SAMPLED_IMAGE, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::Sampler::null())
                };
                let resource = RgDescriptorResource::Image {
                    view: image_view,
                    layout,
                    sampler,
                };
                (descriptor_type, resource)
            }
        };

        RgDescriptorWrite {
            binding: binding.binding,
            descriptor_type,
            resource,
        }
    }

    fn set_layout(&mut self, key: &DescriptorSetLayoutKey, pass_name: &str) -> vk::DescriptorSetLayout {
        let device = &mut *self.device;
        fatal(
            self.caches.descriptor_set_layouts.get_or_create(key, || device.create_descriptor_set_layout(key, pass_name)),
            "descriptor set layout",
            pass_name,
        )
    }

    fn image_view(&mut self, image: vk::Image, params: &ImageViewParams, name: &str) -> vk::ImageView {
        let key = ImageViewKey::new(image, params);
        let device = &mut *self.device;
        fatal(
            self.caches.image_views.get_or_create(&key, || device.create_image_view(image, params, name)),
            "image view",
            name,
        )
    }

    fn sampler(&mut self, kind: SamplerKind) -> vk::Sampler {
        let device = &mut *self.device;
        fatal(self.caches.samplers.get_or_create(&kind, || device.create_sampler(kind)), "sampler", "<shared>")
    }

    fn rendering_attachment(&mut self, output: &ResolvedAttachment, layout: vk::ImageLayout) -> RgRenderingAttachment {
        RgRenderingAttachment {
            view: self.image_view(output.image.image, output.view, output.name),
            layout,
            clear: output.attachment.clear(),
        }
    }
}

// pipeline
impl<'g, D: RgDevice> PassRecorder<'g, D> {
    fn compute_pipeline(&mut self, pass_name: &str, shader: &str, layout: vk::PipelineLayout) -> vk::Pipeline {
        let identity = fingerprint(&(PipelineKind::Compute, shader));
        let variant = fingerprint(&layout);
        if let Some(cached) = self.caches.pipelines.get(pass_name) {
            if is_stale_pipeline(pass_name, (cached.fingerprint, cached.variant), (identity, variant)) {
                self.caches.retire_pipeline(pass_name);
            }
        }

        let device = &mut *self.device;
        let cached = fatal(
            self.caches.pipelines.get_or_create(pass_name, || {
                let pipeline = device.create_compute_pipeline(&RgComputePipelineInfo {
                    name: pass_name,
                    shader,
                    layout,
                })?;
                Ok(CachedPipeline {
                    pipeline,
                    layout,
                    fingerprint: identity,
                    variant,
                })
            }),
            "compute pipeline",
            pass_name,
        );
        cached.pipeline
    }

    fn raster_pipeline(&mut self, info: &RgRasterPipelineInfo) -> vk::Pipeline {
        let identity = fingerprint(&(PipelineKind::Raster, info.vertex_shader, info.fragment_shader));
        let variant = fingerprint(&(
            info.layout,
            info.color_formats,
            info.depth_format,
            info.state,
            info.vertex_streams,
            info.vertex_attributes,
        ));
        if let Some(cached) = self.caches.pipelines.get(info.name) {
            if is_stale_pipeline(info.name, (cached.fingerprint, cached.variant), (identity, variant)) {
                self.caches.retire_pipeline(info.name);
            }
        }

        let device = &mut *self.device;
        let cached = fatal(
            self.caches.pipelines.get_or_create(info.name, || {
                let pipeline = device.create_raster_pipeline(info)?;
                Ok(CachedPipeline {
                    pipeline,
                    layout: info.layout,
                    fingerprint: identity,
                    variant,
                })
            }),
            "raster pipeline",
            info.name,
        );
        cached.pipeline
    }

    fn raytrace_pipeline(&mut self, info: &RgRaytracePipelineInfo) -> RgRaytracePipeline {
        let identity = fingerprint(&(
            PipelineKind::Raytrace,
            info.raygen,
            info.miss,
            info.closest_hit,
            info.any_hit,
        ));
        let variant = fingerprint(&(info.layout, info.max_recursion));
        if let Some(cached) = self.caches.rt_pipelines.get(info.name) {
            if is_stale_pipeline(info.name, (cached.fingerprint, cached.variant), (identity, variant)) {
                self.caches.retire_rt_pipeline(info.name);
            }
        }

        let device = &mut *self.device;
        let cached = fatal(
            self.caches.rt_pipelines.get_or_create(info.name, || {
                let pipeline = device.create_raytrace_pipeline(info)?;
                Ok(CachedRtPipeline {
                    pipeline,
                    layout: info.layout,
                    fingerprint: identity,
                    variant,
                })
            }),
            "ray tracing pipeline",
            info.name,
        );
        cached.pipeline
    }
}

/// 设备对象创建失败意味着配置或驱动出了问题，无法在帧内恢复
fn fatal<T>(result: anyhow::Result<T>, object: &str, pass_name: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("render graph: failed to create {} for '{}': {:#}", object, pass_name, e),
    }
}

fn fingerprint(value: &impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// pipeline 缓存以 pass 名称为 key，返回缓存的 pipeline 是否需要重建
///
/// 参数均为 `(fingerprint, variant)`：
/// - fingerprint 不同：同名 pass 使用了不同的 shader，属于调用方错误
/// - variant 不同：layout 或 attachment format 发生变化（例如绑定的 handle 失效后被跳过），正常重建
fn is_stale_pipeline(pass_name: &str, cached: (u64, u64), current: (u64, u64)) -> bool {
    if cached.0 != current.0 {
        log::error!("pipeline name collision: pass '{}' reuses a pipeline built for a different shader", pass_name);
        debug_assert_eq!(cached.0, current.0, "pipeline name collision: {}", pass_name);
        return true;
    }
    if cached.1 != current.1 {
        log::info!("render graph: pipeline '{}' rebuilt, layout or attachments changed", pass_name);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use ash::vk::Handle as _;

    use super::*;
    use crate::pass::{RgExtraSet, RgRasterDesc, RgRaytraceDesc};
    use crate::testing::{MockCommand, MockDevice};
    use crate::tracker::{RgBufferBarrier, RgImageBarrier};

    const HDR: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
    const GROUPS: [u32; 3] = [8, 8, 1];

    fn graph() -> RenderGraph<MockDevice> {
        let _ = umbra_crate_tools::try_init_test_log();
        let config = RenderGraphConfig {
            arena_capacity: 64 * 1024,
            ..Default::default()
        };
        RenderGraph::new(MockDevice::default(), config)
    }

    fn cmd() -> vk::CommandBuffer {
        vk::CommandBuffer::null()
    }

    fn storage_buffer(graph: &mut RenderGraph<MockDevice>, raw: u64) -> Handle<Bindable> {
        graph.register_storage_buffer(RgBufferRef::whole(vk::Buffer::from_raw(raw), 1024), format!("buffer_{}", raw))
    }

    fn image(raw: u64, mip_levels: u32) -> RgImageRef {
        RgImageRef {
            image: vk::Image::from_raw(raw),
            format: HDR,
            extent: vk::Extent3D {
                width: 256,
                height: 256,
                depth: 1,
            },
            mip_levels,
            is_swapchain: false,
        }
    }

    fn color_view() -> ImageViewParams {
        ImageViewParams::new_2d(HDR, vk::ImageAspectFlags::COLOR)
    }

    fn image_barrier(raw: u64, mip_level: u32, src: AccessState, dst: AccessState) -> RgImageBarrier {
        RgImageBarrier {
            image: vk::Image::from_raw(raw),
            aspect: vk::ImageAspectFlags::COLOR,
            mip_level,
            src,
            dst,
            old_layout: src.layout,
            new_layout: dst.layout,
        }
    }

    #[test]
    fn test_write_then_read_across_frames() {
        let mut graph = graph();
        let b = storage_buffer(&mut graph, 100);
        let bindings = [RgBinding::new(0, b)];

        graph.add_render_pass(RgPassDesc::compute("p1", "fill", GROUPS).writes(&bindings));
        graph.add_render_pass(RgPassDesc::compute("p2", "consume", GROUPS).reads(&bindings));
        graph.execute(cmd());

        assert_eq!(
            graph.device().take_timeline(),
            vec![
                MockCommand::Dispatch(GROUPS),
                MockCommand::Barrier {
                    buffers: vec![RgBufferBarrier {
                        buffer: vk::Buffer::from_raw(100),
                        src: AccessState::COMPUTE_WRITE,
                        dst: AccessState::COMPUTE_READ,
                    }],
                    images: vec![],
                },
                MockCommand::Dispatch(GROUPS),
            ]
        );
        assert_eq!(
            graph.last_frame_stats(),
            RgFrameStats {
                passes_executed: 2,
                aborted_passes: 0,
                buffer_barriers: 1,
                image_barriers: 0,
                skipped_bindings: 0,
            }
        );

        // 访问状态每帧清空，第二帧的第一次读不需要 barrier
        graph.add_render_pass(RgPassDesc::compute("p3", "consume_again", GROUPS).reads(&bindings));
        graph.execute(cmd());
        assert_eq!(graph.device().take_timeline(), vec![MockCommand::Dispatch(GROUPS)]);
    }

    #[test]
    fn test_read_after_read_is_elided() {
        let mut graph = graph();
        let view = graph.register_image_view(image(200, 1), color_view(), "hdr");
        let reads = [RgBinding::new(0, view)];

        graph.add_render_pass(RgPassDesc::compute("luminance", "luminance", GROUPS).reads(&reads));
        graph.add_render_pass(RgPassDesc::compute("histogram", "histogram", GROUPS).reads(&reads));
        graph.execute(cmd());

        assert_eq!(
            graph.device().take_timeline(),
            vec![
                MockCommand::Barrier {
                    buffers: vec![],
                    images: vec![image_barrier(200, 0, AccessState::NONE, AccessState::COMPUTE_READ)],
                },
                MockCommand::Dispatch(GROUPS),
                MockCommand::Dispatch(GROUPS),
            ]
        );
    }

    #[test]
    fn test_write_after_write_barrier() {
        let mut graph = graph();
        let b = storage_buffer(&mut graph, 101);
        let writes = [RgBinding::new(0, b)];

        graph.add_render_pass(RgPassDesc::compute("clear", "clear", GROUPS).writes(&writes));
        graph.add_render_pass(RgPassDesc::compute("accumulate", "accumulate", GROUPS).writes(&writes));
        graph.execute(cmd());

        assert_eq!(
            graph.device().take_timeline(),
            vec![
                MockCommand::Dispatch(GROUPS),
                MockCommand::Barrier {
                    buffers: vec![RgBufferBarrier {
                        buffer: vk::Buffer::from_raw(101),
                        src: AccessState::COMPUTE_WRITE,
                        dst: AccessState::COMPUTE_WRITE,
                    }],
                    images: vec![],
                },
                MockCommand::Dispatch(GROUPS),
            ]
        );
    }

    #[test]
    fn test_mips_are_tracked_independently() {
        let mut graph = graph();
        let img = image(300, 2);
        let mip0 = graph.register_image_view(img, color_view().with_mips(0, 1), "mip0");
        let mip1 = graph.register_image_view(img, color_view().with_mips(1, 1), "mip1");

        // 上一帧已经把 mip 1 转换到 shader read
        graph.add_render_pass(RgPassDesc::compute("warmup", "sample_mip1", GROUPS).reads(&[RgBinding::new(0, mip1)]));
        graph.execute(cmd());
        graph.device().take_commands();

        graph.add_render_pass(RgPassDesc::compute("write_mip0", "write", GROUPS).writes(&[RgBinding::new(0, mip0)]));
        graph.add_render_pass(RgPassDesc::compute("read_mip1", "read", GROUPS).reads(&[RgBinding::new(0, mip1)]));
        graph.add_render_pass(RgPassDesc::compute("read_mip0", "read", GROUPS).reads(&[RgBinding::new(0, mip0)]));
        graph.execute(cmd());

        assert_eq!(
            graph.device().take_timeline(),
            vec![
                MockCommand::Barrier {
                    buffers: vec![],
                    images: vec![image_barrier(300, 0, AccessState::NONE, AccessState::COMPUTE_WRITE)],
                },
                MockCommand::Dispatch(GROUPS),
                MockCommand::Dispatch(GROUPS),
                MockCommand::Barrier {
                    buffers: vec![],
                    images: vec![image_barrier(300, 0, AccessState::COMPUTE_WRITE, AccessState::COMPUTE_READ)],
                },
                MockCommand::Dispatch(GROUPS),
            ]
        );
    }

    #[test]
    fn test_multi_mip_view_barriers_each_mip() {
        let mut graph = graph();
        let all_mips = graph.register_image_view(image(310, 3), color_view().with_mips(0, 3), "chain");

        graph.add_render_pass(RgPassDesc::compute("downsample", "downsample", GROUPS).writes(&[RgBinding::new(0, all_mips)]));
        graph.execute(cmd());

        assert_eq!(graph.last_frame_stats().image_barriers, 3);
        for mip in 0..3 {
            assert_eq!(graph.tracker().image_layout(vk::Image::from_raw(310), mip), vk::ImageLayout::GENERAL);
        }
    }

    #[test]
    fn test_descriptor_set_layout_cache() {
        let mut graph = graph();
        let a = storage_buffer(&mut graph, 110);
        let b = storage_buffer(&mut graph, 111);
        let u = graph.register_uniform_buffer(RgBufferRef::whole(vk::Buffer::from_raw(112), 256), "camera");

        graph.add_render_pass(RgPassDesc::compute("cull_a", "cull", GROUPS).reads(&[RgBinding::new(0, a)]));
        graph.add_render_pass(RgPassDesc::compute("cull_b", "cull", GROUPS).reads(&[RgBinding::new(0, b)]));
        graph.execute(cmd());

        // 结构相同：同一个 layout，不同的 descriptor set
        assert_eq!(graph.device().created.descriptor_set_layouts, 1);
        assert_eq!(graph.device().created.pipeline_layouts, 1);
        assert_eq!(graph.device().created.descriptor_sets, 2);
        assert_eq!(graph.cache_stats().descriptor_set_layouts.hits, 1);

        // 同一个 slot 换成 uniform buffer
        graph.add_render_pass(RgPassDesc::compute("shade", "shade", GROUPS).reads(&[RgBinding::new(0, u)]));
        graph.execute(cmd());
        assert_eq!(graph.device().created.descriptor_set_layouts, 2);

        // 完全相同的 pass 不会创建任何新对象
        let before = graph.device().created;
        graph.add_render_pass(RgPassDesc::compute("cull_a", "cull", GROUPS).reads(&[RgBinding::new(0, a)]));
        graph.execute(cmd());
        assert_eq!(graph.device().created, before);
    }

    #[test]
    fn test_access_resets_but_layout_persists() {
        let mut graph = graph();
        let view = graph.register_image_view(image(320, 1), color_view(), "history");
        let b = storage_buffer(&mut graph, 120);
        let image_binding = [RgBinding::new(0, view)];
        let buffer_binding = [RgBinding::new(1, b)];

        graph.add_render_pass(
            RgPassDesc::compute("produce", "produce", GROUPS).writes(&image_binding).reads(&buffer_binding),
        );
        graph.execute(cmd());
        graph.device().take_commands();

        let img = vk::Image::from_raw(320);
        assert_eq!(graph.tracker().image_layout(img, 0), vk::ImageLayout::GENERAL);
        assert_eq!(graph.tracker().image_state(img, 0), AccessState::NONE);
        assert_eq!(graph.tracker().tracked_count(), 0);

        // 访问状态被清空，但 old layout 来自上一帧
        graph.add_render_pass(RgPassDesc::compute("consume", "consume", GROUPS).reads(&image_binding));
        graph.execute(cmd());
        let expected = RgImageBarrier {
            old_layout: vk::ImageLayout::GENERAL,
            ..image_barrier(320, 0, AccessState::NONE, AccessState::COMPUTE_READ)
        };
        assert_eq!(
            graph.device().take_timeline(),
            vec![
                MockCommand::Barrier {
                    buffers: vec![],
                    images: vec![expected],
                },
                MockCommand::Dispatch(GROUPS),
            ]
        );

        // buffer 没有 layout，跨帧的第一次写不产生 barrier
        graph.add_render_pass(RgPassDesc::compute("overwrite", "overwrite", GROUPS).writes(&buffer_binding));
        graph.execute(cmd());
        assert_eq!(graph.device().take_timeline(), vec![MockCommand::Dispatch(GROUPS)]);
    }

    #[test]
    fn test_rebuild_pipelines_keeps_layouts() {
        let mut graph = graph();
        let b = storage_buffer(&mut graph, 130);
        let bindings = [RgBinding::new(0, b)];

        graph.add_render_pass(RgPassDesc::compute("simulate", "simulate", GROUPS).writes(&bindings));
        graph.execute(cmd());
        assert_eq!(graph.device().created.pipelines, 1);

        graph.rebuild_pipelines();
        assert_eq!(graph.device().destroyed_pipelines.len(), 1);
        assert_eq!(graph.cache_stats().pipelines.entries, 0);
        assert_eq!(graph.cache_stats().pipeline_layouts.entries, 1);
        assert_eq!(graph.cache_stats().descriptor_sets.entries, 1);

        graph.add_render_pass(RgPassDesc::compute("simulate", "simulate", GROUPS).writes(&bindings));
        graph.execute(cmd());
        let created = graph.device().created;
        assert_eq!(created.pipelines, 2);
        assert_eq!(created.pipeline_layouts, 1);
        assert_eq!(created.descriptor_set_layouts, 1);
        assert_eq!(created.descriptor_sets, 1);
    }

    #[test]
    fn test_stale_handle_is_skipped() {
        let mut graph = graph();
        let b = storage_buffer(&mut graph, 140);
        graph.unregister(b);
        assert_eq!(
            graph.bindings().pool().try_get(b).unwrap_err(),
            RgError::StaleHandle {
                index: b.index(),
                generation: b.generation(),
            }
        );

        graph.add_render_pass(RgPassDesc::compute("orphan", "orphan", GROUPS).writes(&[RgBinding::new(0, b)]));
        graph.execute(cmd());

        assert_eq!(graph.last_frame_stats().skipped_bindings, 1);
        assert_eq!(graph.device().take_timeline(), vec![MockCommand::Dispatch(GROUPS)]);
    }

    #[test]
    fn test_custom_pass_records_without_barriers() {
        let mut graph = graph();
        let b = storage_buffer(&mut graph, 150);
        let calls = Rc::new(Cell::new(0));

        let counter = calls.clone();
        graph.add_render_pass(
            RgPassDesc::custom("blit", move |ctx| {
                assert_eq!(ctx.pipeline_kind, PipelineKind::Custom);
                counter.set(counter.get() + 1);
                ctx.device.cmd_draw(ctx.cmd, 3, 1);
            })
            .writes(&[RgBinding::new(0, b)]),
        );
        graph.execute(cmd());

        assert_eq!(calls.get(), 1);
        assert_eq!(
            graph.device().take_commands(),
            vec![
                MockCommand::BeginLabel("blit".to_string()),
                MockCommand::Draw(3),
                MockCommand::EndLabel,
            ]
        );
        assert_eq!(graph.tracker().buffer_state(vk::Buffer::from_raw(150)), AccessState::NONE);
    }

    #[test]
    fn test_raster_pass_presents_swapchain() {
        let mut graph = graph();
        let swapchain = RgImageRef {
            is_swapchain: true,
            format: vk::Format::B8G8R8A8_UNORM,
            ..image(400, 1)
        };
        let target = graph.register_image_view(
            swapchain,
            ImageViewParams::new_2d(vk::Format::B8G8R8A8_UNORM, vk::ImageAspectFlags::COLOR),
            "swapchain",
        );
        let vertices = graph.register_vertex_buffer(RgBufferRef::whole(vk::Buffer::from_raw(500), 36), "vertices");
        let indices = graph.register_index_buffer(
            RgBufferRef::whole(vk::Buffer::from_raw(501), 6),
            vk::IndexType::UINT16,
            "indices",
        );

        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let colors = [RgAttachment::new(target).with_clear([0.0, 0.0, 0.0, 1.0])];
        let vertex_buffers = [RgBinding::new(0, vertices)];
        let add_pass = |graph: &mut RenderGraph<MockDevice>| {
            let mut raster = RgRasterDesc::new("triangle_vs", "triangle_fs", extent);
            raster.color_outputs = &colors;
            raster.vertex_buffers = &vertex_buffers;
            raster.index_buffer = Some(indices);
            graph.add_render_pass(
                RgPassDesc::raster("triangle", raster).callback(|ctx| ctx.device.cmd_draw_indexed(ctx.cmd, 3, 1)),
            );
        };

        add_pass(&mut graph);
        graph.execute(cmd());

        let to_color = RgImageBarrier {
            image: vk::Image::from_raw(400),
            aspect: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            src: AccessState::NONE,
            dst: AccessState::COLOR_WRITE,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let to_present = RgImageBarrier {
            src: AccessState::COLOR_WRITE,
            dst: AccessState::PRESENT,
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..to_color
        };
        let commands = graph
            .device()
            .take_commands()
            .into_iter()
            .filter(|command| !matches!(command, MockCommand::BindPipeline(..)))
            .collect_vec();
        assert_eq!(
            commands,
            vec![
                MockCommand::BeginLabel("triangle".to_string()),
                MockCommand::Barrier {
                    buffers: vec![],
                    images: vec![to_color],
                },
                MockCommand::BeginRendering {
                    color_layouts: vec![vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL],
                    has_depth: false,
                },
                MockCommand::SetViewportScissor(extent),
                MockCommand::BindVertexBuffers {
                    first_binding: 0,
                    buffers: vec![vk::Buffer::from_raw(500)],
                },
                MockCommand::BindIndexBuffer(vk::Buffer::from_raw(501), vk::IndexType::UINT16),
                MockCommand::DrawIndexed(3),
                MockCommand::EndRendering,
                MockCommand::Barrier {
                    buffers: vec![],
                    images: vec![to_present],
                },
                MockCommand::EndLabel,
            ]
        );

        // 下一帧从 PRESENT_SRC 开始转换
        add_pass(&mut graph);
        graph.execute(cmd());
        let first_barrier = graph.device().take_timeline().into_iter().next();
        assert_eq!(
            first_barrier,
            Some(MockCommand::Barrier {
                buffers: vec![],
                images: vec![RgImageBarrier {
                    old_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                    ..to_color
                }],
            })
        );
        assert_eq!(graph.device().created.pipelines, 1);
        assert_eq!(graph.device().created.image_views, 1);
    }

    #[test]
    fn test_raytrace_pass() {
        let mut graph = graph();
        let output = graph.register_image_view(image(600, 1), color_view(), "rt_output");
        let writes = [RgBinding::new(0, output)];
        let miss = ["miss", "shadow_miss"];

        for _ in 0..2 {
            let rt = RgRaytraceDesc {
                raygen: "rgen",
                miss: &miss,
                closest_hit: "chit",
                any_hit: None,
                extent: [1280, 720, 1],
                max_recursion: 2,
            };
            graph.add_render_pass(RgPassDesc::raytrace("path_trace", rt).writes(&writes));
            graph.execute(cmd());
        }

        let timeline = graph.device().take_timeline();
        let traces = timeline.iter().filter(|command| matches!(command, MockCommand::TraceRays(_))).count();
        assert_eq!(traces, 2);
        assert!(timeline.contains(&MockCommand::TraceRays([1280, 720, 1])));
        assert_eq!(graph.device().created.rt_pipelines, 1);
        assert_eq!(graph.cache_stats().rt_pipelines.hits, 1);
    }

    #[test]
    fn test_skipped_pass_touches_nothing() {
        let mut graph = graph();
        let b = storage_buffer(&mut graph, 160);
        let writes = [RgBinding::new(0, b)];

        graph.add_render_pass(RgPassDesc::compute("disabled", "disabled", GROUPS).writes(&writes).skip_execution(true));
        graph.add_render_pass(RgPassDesc::compute("enabled", "enabled", GROUPS).writes(&writes));
        graph.execute(cmd());

        assert_eq!(graph.device().take_timeline(), vec![MockCommand::Dispatch(GROUPS)]);
        assert_eq!(graph.last_frame_stats().passes_executed, 1);
        assert_eq!(graph.device().created.pipelines, 1);
    }

    #[test]
    fn test_extra_sets_and_push_constants() {
        let mut graph = graph();
        let b = storage_buffer(&mut graph, 170);
        let extra = [RgExtraSet::new(
            1,
            vk::DescriptorSetLayout::from_raw(0xAA),
            vk::DescriptorSet::from_raw(0xBB),
        )];

        let id = graph.add_render_pass(
            RgPassDesc::compute("bindless", "bindless", GROUPS)
                .reads(&[RgBinding::new(0, b)])
                .extra_sets(&extra)
                .push_constants(&[1, 2, 3, 4]),
        );
        assert_eq!(graph.pass(id).unwrap().descriptor_set_count(), 2);
        graph.execute(cmd());

        let commands = graph.device().take_commands();
        let bound_sets = commands.iter().find_map(|command| match command {
            MockCommand::BindDescriptorSets { first_set, sets } => Some((*first_set, sets.clone())),
            _ => None,
        });
        let (first_set, sets) = bound_sets.unwrap();
        assert_eq!(first_set, 0);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[1], vk::DescriptorSet::from_raw(0xBB));
        assert!(commands.contains(&MockCommand::PushConstants(vec![1, 2, 3, 4])));
        assert_eq!(graph.device().created.descriptor_set_layouts, 1);
    }

    #[test]
    fn test_pass_id_expires_after_execute() {
        let mut graph = graph();
        let id = graph.add_render_pass(RgPassDesc::compute("noop", "noop", GROUPS));
        assert_eq!(graph.pass(id).unwrap().kind(), PipelineKind::Compute);
        assert_eq!(graph.pass(id).unwrap().descriptor_set_count(), 0);
        graph.print_execution_plan();

        graph.execute(cmd());
        assert!(matches!(graph.pass(id), Err(RgError::UnknownPass { index: 0, .. })));
        assert_eq!(graph.pass_count(), 0);
        assert_eq!(graph.frame_index(), 1);
    }

    #[test]
    fn test_destroy_resource_invalidates_handles() {
        let mut graph = graph();
        let img = image(700, 1);
        let storage = graph.register_image_view(img, color_view(), "storage");
        let sampled = graph.register_image_view(img, color_view().with_sampler(SamplerKind::Linear), "sampled");

        graph.add_render_pass(RgPassDesc::compute("write", "write_img", GROUPS).writes(&[RgBinding::new(0, storage)]));
        graph.add_render_pass(RgPassDesc::compute("sample", "sample_img", GROUPS).reads(&[RgBinding::new(0, sampled)]));
        graph.execute(cmd());
        assert_eq!(graph.device().created.image_views, 1);
        assert_eq!(graph.device().created.samplers, 1);
        assert_eq!(graph.cache_stats().descriptor_sets.entries, 2);

        graph.destroy_resource(storage).unwrap();
        assert!(graph.bindings().get(storage).is_none());
        assert!(graph.bindings().get(sampled).is_none());
        assert_eq!(graph.device().destroyed_images, vec![vk::Image::from_raw(700)]);
        assert_eq!(graph.device().destroyed_views.len(), 1);
        assert_eq!(graph.cache_stats().descriptor_sets.entries, 0);
        assert_eq!(graph.tracker().image_layout(vk::Image::from_raw(700), 0), vk::ImageLayout::UNDEFINED);

        assert!(graph.destroy_resource(storage).is_err());
    }

    #[test]
    fn test_destroy_releases_cached_objects() {
        let mut graph = graph();
        let b = storage_buffer(&mut graph, 180);
        graph.add_render_pass(RgPassDesc::compute("temp", "temp", GROUPS).writes(&[RgBinding::new(0, b)]));
        graph.execute(cmd());

        graph.destroy();
        assert_eq!(graph.device().destroyed_pipelines.len(), 1);
        assert_eq!(graph.device().destroyed_layouts, 2);
        let stats = graph.cache_stats();
        assert_eq!(stats.pipelines.entries, 0);
        assert_eq!(stats.pipeline_layouts.entries, 0);
        assert_eq!(stats.descriptor_set_layouts.entries, 0);
        assert_eq!(stats.descriptor_sets.entries, 0);
    }

    #[test]
    fn test_stale_binding_rebuilds_pipeline_next_frame() {
        let mut graph = graph();
        let a = storage_buffer(&mut graph, 200);
        let b = storage_buffer(&mut graph, 201);
        let reads = [RgBinding::new(0, a), RgBinding::new(0, b)];

        graph.add_render_pass(RgPassDesc::compute("blur", "blur", GROUPS).reads(&reads));
        graph.execute(cmd());
        graph.device().take_timeline();

        // a 失效后 set 0 只剩一个 binding，layout 随之变化
        graph.unregister(a);
        graph.add_render_pass(RgPassDesc::compute("blur", "blur", GROUPS).reads(&reads));
        graph.execute(cmd());

        assert_eq!(graph.last_frame_stats().skipped_bindings, 1);
        assert_eq!(graph.last_frame_stats().passes_executed, 1);
        assert_eq!(graph.device().take_timeline(), vec![MockCommand::Dispatch(GROUPS)]);
        assert_eq!(graph.device().created.pipeline_layouts, 2);
        assert_eq!(graph.device().created.pipelines, 2);
        assert_eq!(graph.cache_stats().pipelines.entries, 1);

        // 同样的 layout 再执行一次，直接命中缓存
        graph.add_render_pass(RgPassDesc::compute("blur", "blur", GROUPS).reads(&reads));
        graph.execute(cmd());
        assert_eq!(graph.device().created.pipelines, 2);

        // 被替换的 pipeline 延迟到 destroy 时释放
        assert!(graph.device().destroyed_pipelines.is_empty());
        graph.destroy();
        assert_eq!(graph.device().destroyed_pipelines.len(), 2);
    }

    #[test]
    fn test_stale_color_output_rebuilds_raster_pipeline() {
        let mut graph = graph();
        let albedo = graph.register_image_view(image(210, 1), color_view(), "albedo");
        let normal = graph.register_image_view(image(211, 1), color_view(), "normal");
        let colors = [RgAttachment::new(albedo), RgAttachment::new(normal)];
        let extent = vk::Extent2D {
            width: 256,
            height: 256,
        };
        let add_pass = |graph: &mut RenderGraph<MockDevice>| {
            let mut raster = RgRasterDesc::new("gbuffer_vs", "gbuffer_fs", extent);
            raster.color_outputs = &colors;
            graph.add_render_pass(RgPassDesc::raster("gbuffer", raster));
        };

        add_pass(&mut graph);
        graph.execute(cmd());
        graph.unregister(normal);
        add_pass(&mut graph);
        graph.execute(cmd());

        assert_eq!(graph.last_frame_stats().passes_executed, 1);
        assert_eq!(graph.device().created.pipelines, 2);
        assert_eq!(graph.cache_stats().pipelines.entries, 1);
    }

    #[test]
    fn test_remaining_mip_levels_view_barriers() {
        let mut graph = graph();
        let tail = graph.register_image_view(image(320, 4), color_view().with_mips(1, vk::REMAINING_MIP_LEVELS), "mip_tail");

        graph.add_render_pass(RgPassDesc::compute("downsample_tail", "downsample", GROUPS).writes(&[RgBinding::new(0, tail)]));
        graph.execute(cmd());

        assert_eq!(graph.last_frame_stats().image_barriers, 3);
        assert_eq!(graph.tracker().image_layout(vk::Image::from_raw(320), 0), vk::ImageLayout::UNDEFINED);
        for mip in 1..4 {
            assert_eq!(graph.tracker().image_layout(vk::Image::from_raw(320), mip), vk::ImageLayout::GENERAL);
        }
    }

    #[test]
    fn test_destroy_buffer_invalidates_handles() {
        let mut graph = graph();
        let raw = vk::Buffer::from_raw(190);
        let particles = graph.register_storage_buffer(RgBufferRef::whole(raw, 1024), "particles");
        let particles_read = graph.register_storage_buffer(RgBufferRef::whole(raw, 1024), "particles_read");

        graph.add_render_pass(
            RgPassDesc::compute("simulate", "simulate", GROUPS)
                .reads(&[RgBinding::new(0, particles_read)])
                .writes(&[RgBinding::new(0, particles)]),
        );
        graph.execute(cmd());
        assert_eq!(graph.cache_stats().descriptor_sets.entries, 1);

        graph.destroy_resource(particles).unwrap();
        assert!(graph.bindings().get(particles).is_none());
        assert!(graph.bindings().get(particles_read).is_none());
        assert_eq!(graph.cache_stats().descriptor_sets.entries, 0);
        assert_eq!(graph.device().destroyed_buffers, vec![raw]);
        assert_eq!(graph.tracker().buffer_state(raw), AccessState::NONE);

        assert!(graph.destroy_resource(particles_read).is_err());
    }

    #[test]
    fn test_raytrace_keeps_empty_miss_name() {
        let mut graph = graph();
        let output = graph.register_image_view(image(610, 1), color_view(), "rt_output");
        let miss = ["miss", ""];
        let rt = RgRaytraceDesc {
            raygen: "rgen",
            miss: &miss,
            closest_hit: "chit",
            any_hit: None,
            extent: [64, 64, 1],
            max_recursion: 1,
        };

        graph.add_render_pass(RgPassDesc::raytrace("shadow_trace", rt).writes(&[RgBinding::new(0, output)]));
        graph.execute(cmd());

        assert_eq!(graph.device().rt_miss_counts, vec![2]);
    }

    #[test]
    fn test_aborted_pass_is_not_counted() {
        let mut graph = graph();
        let b = storage_buffer(&mut graph, 220);
        graph.add_render_pass(RgPassDesc::compute("broken_reads", "broken", GROUPS));
        graph.add_render_pass(RgPassDesc::compute("fine", "fine", GROUPS).writes(&[RgBinding::new(0, b)]));

        // 来自另一个 epoch 的区间，录制时读取失败
        let mut other = FrameArena::new(64);
        other.reset();
        graph.passes[0].reads = other.alloc_slice(&[RgBinding::new(0, b)]).unwrap();
        graph.execute(cmd());

        let stats = graph.last_frame_stats();
        assert_eq!(stats.passes_executed, 1);
        assert_eq!(stats.aborted_passes, 1);
        assert_eq!(graph.device().take_timeline(), vec![MockCommand::Dispatch(GROUPS)]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "pipeline name collision")]
    fn test_pipeline_name_collision() {
        let mut graph = graph();
        graph.add_render_pass(RgPassDesc::compute("shared", "shader_a", GROUPS));
        graph.add_render_pass(RgPassDesc::compute("shared", "shader_b", GROUPS));
        graph.execute(cmd());
    }

    #[test]
    #[should_panic(expected = "frame arena exhausted")]
    fn test_arena_exhaustion_fails_loudly() {
        let config = RenderGraphConfig {
            arena_capacity: 16,
            ..Default::default()
        };
        let mut graph = RenderGraph::new(MockDevice::default(), config);
        graph.add_render_pass(RgPassDesc::compute("a_pass_name_longer_than_the_arena", "cs", GROUPS));
    }

    #[test]
    #[should_panic(expected = "failed to create compute pipeline")]
    fn test_creation_failure_is_fatal() {
        let mut graph = graph();
        graph.add_render_pass(RgPassDesc::compute("broken", "", GROUPS));
        graph.execute(cmd());
    }
}
