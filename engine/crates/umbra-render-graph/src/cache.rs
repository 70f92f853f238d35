//! 对象缓存
//!
//! 以结构化的值作为 key，查找或者创建 GPU 对象。缓存没有淘汰策略，
//! 在进程生命周期内单调增长；只有 `rebuild_pipelines` 和资源销毁会移除条目。
//!
//! layout 级别的 key 只包含 descriptor 类型等结构信息，不包含资源句柄；
//! descriptor set 的 key 则包含具体的 buffer / image view，因为 set 和资源绑定在一起。

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use ash::vk;

use crate::bindable::{ImageViewParams, SamplerKind};
use crate::device::{RgDescriptorResource, RgDescriptorWrite, RgDevice, RgRaytracePipeline};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorBindingKey {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// 按 binding 升序排列
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutKey {
    pub bindings: Vec<DescriptorBindingKey>,
}

/// pipeline layout 中某个 set 的来源
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SetLayoutSlot {
    /// 由 pass 的 reads / writes 推导
    Derived(DescriptorSetLayoutKey),
    /// 调用方提供的 descriptor set，只能通过 layout 句柄区分
    External(vk::DescriptorSetLayout),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineLayoutKey {
    pub sets: Vec<SetLayoutSlot>,
    pub push_constant_size: u32,
    pub push_constant_stages: vk::ShaderStageFlags,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetKey {
    pub layout: DescriptorSetLayoutKey,
    pub writes: Vec<RgDescriptorWrite>,
}
impl DescriptorSetKey {
    fn references_buffer(&self, buffer: vk::Buffer) -> bool {
        self.writes
            .iter()
            .any(|w| matches!(w.resource, RgDescriptorResource::Buffer { buffer: b, .. } if b == buffer))
    }

    fn references_view(&self, view: vk::ImageView) -> bool {
        self.writes
            .iter()
            .any(|w| matches!(w.resource, RgDescriptorResource::Image { view: v, .. } if v == view))
    }
}

/// sampler 不属于 image view，不参与比较
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageViewKey {
    pub image: vk::Image,
    pub format: vk::Format,
    pub view_type: vk::ImageViewType,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub mip_count: u32,
}
impl ImageViewKey {
    pub fn new(image: vk::Image, params: &ImageViewParams) -> Self {
        Self {
            image,
            format: params.format,
            view_type: params.view_type,
            aspect: params.aspect,
            base_mip: params.base_mip,
            mip_count: params.mip_count,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// 查找或创建，不做淘汰
pub struct ObjectCache<K, V> {
    name: &'static str,
    entries: HashMap<K, V>,
    hits: u64,
    misses: u64,
}

// new & init
impl<K: Eq + Hash, V: Copy> ObjectCache<K, V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }
}

// lookup
impl<K: Eq + Hash, V: Copy> ObjectCache<K, V> {
    /// 命中时不会拷贝 key
    pub fn get_or_create<Q>(&mut self, key: &Q, create: impl FnOnce() -> anyhow::Result<V>) -> anyhow::Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(value) = self.entries.get(key) {
            self.hits += 1;
            return Ok(*value);
        }

        let value = create()?;
        self.misses += 1;
        self.entries.insert(key.to_owned(), value);
        log::debug!("{} cache: created entry #{}", self.name, self.entries.len());
        Ok(value)
    }

    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).copied()
    }
}

// getter & iter
impl<K: Eq + Hash, V: Copy> ObjectCache<K, V> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }

    #[inline]
    pub fn values(&self) -> impl Iterator<Item = V> + '_ {
        self.entries.values().copied()
    }
}

// remove
impl<K: Eq + Hash, V: Copy> ObjectCache<K, V> {
    /// 移除所有条目并返回它们的值，由调用方销毁
    pub fn take_all(&mut self) -> Vec<V> {
        self.entries.drain().map(|(_, value)| value).collect()
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key)
    }

    /// 移除所有满足 `pred` 的条目并返回它们的值
    pub fn take_where(&mut self, mut pred: impl FnMut(&K, &V) -> bool) -> Vec<V> {
        let mut removed = Vec::new();
        self.entries.retain(|key, value| {
            if pred(key, value) {
                removed.push(*value);
                false
            } else {
                true
            }
        });
        removed
    }
}

/// 以 pass 名称为 key 缓存的 pipeline
///
/// - `fingerprint`：pipeline 类型和 shader，同名 pass 的 shader 不同视为名称冲突
/// - `variant`：pipeline layout、attachment format 等，变化时（例如某个绑定的 handle 失效）
///   pipeline 会被重建
#[derive(Clone, Copy, Debug)]
pub struct CachedPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub fingerprint: u64,
    pub variant: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct CachedRtPipeline {
    pub pipeline: RgRaytracePipeline,
    pub layout: vk::PipelineLayout,
    pub fingerprint: u64,
    pub variant: u64,
}

/// 所有缓存的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgCacheStats {
    pub descriptor_set_layouts: CacheStats,
    pub pipeline_layouts: CacheStats,
    pub descriptor_sets: CacheStats,
    pub image_views: CacheStats,
    pub samplers: CacheStats,
    pub pipelines: CacheStats,
    pub rt_pipelines: CacheStats,
}

/// render graph 持有的全部缓存，跨帧保留
pub struct RgCaches {
    pub descriptor_set_layouts: ObjectCache<DescriptorSetLayoutKey, vk::DescriptorSetLayout>,
    pub pipeline_layouts: ObjectCache<PipelineLayoutKey, vk::PipelineLayout>,
    pub descriptor_sets: ObjectCache<DescriptorSetKey, vk::DescriptorSet>,
    pub image_views: ObjectCache<ImageViewKey, vk::ImageView>,
    pub samplers: ObjectCache<SamplerKind, vk::Sampler>,
    pub pipelines: ObjectCache<String, CachedPipeline>,
    pub rt_pipelines: ObjectCache<String, CachedRtPipeline>,

    /// 被重建替换下来的 pipeline，之前录制的命令可能仍在使用，
    /// 等到 `clear_pipelines` / `destroy` 时再销毁
    retired_pipelines: Vec<vk::Pipeline>,
    retired_rt_pipelines: Vec<RgRaytracePipeline>,
}

impl Default for RgCaches {
    fn default() -> Self {
        Self {
            descriptor_set_layouts: ObjectCache::new("descriptor set layout"),
            pipeline_layouts: ObjectCache::new("pipeline layout"),
            descriptor_sets: ObjectCache::new("descriptor set"),
            image_views: ObjectCache::new("image view"),
            samplers: ObjectCache::new("sampler"),
            pipelines: ObjectCache::new("pipeline"),
            rt_pipelines: ObjectCache::new("rt pipeline"),
            retired_pipelines: Vec::new(),
            retired_rt_pipelines: Vec::new(),
        }
    }
}

// stats
impl RgCaches {
    pub fn stats(&self) -> RgCacheStats {
        RgCacheStats {
            descriptor_set_layouts: self.descriptor_set_layouts.stats(),
            pipeline_layouts: self.pipeline_layouts.stats(),
            descriptor_sets: self.descriptor_sets.stats(),
            image_views: self.image_views.stats(),
            samplers: self.samplers.stats(),
            pipelines: self.pipelines.stats(),
            rt_pipelines: self.rt_pipelines.stats(),
        }
    }
}

// 失效 & 销毁
impl RgCaches {
    /// 从缓存中移除 `name` 对应的 pipeline，延迟到下一次清空时销毁
    pub fn retire_pipeline(&mut self, name: &str) {
        if let Some(cached) = self.pipelines.remove(name) {
            self.retired_pipelines.push(cached.pipeline);
        }
    }

    pub fn retire_rt_pipeline(&mut self, name: &str) {
        if let Some(cached) = self.rt_pipelines.remove(name) {
            self.retired_rt_pipelines.push(cached.pipeline);
        }
    }

    #[inline]
    pub fn retired_count(&self) -> usize {
        self.retired_pipelines.len() + self.retired_rt_pipelines.len()
    }

    /// 只清空 pipeline 和光追 pipeline，layout / descriptor / image view 与 shader 无关
    pub fn clear_pipelines(&mut self, device: &mut dyn RgDevice) {
        let retired = std::mem::take(&mut self.retired_pipelines);
        for pipeline in self.pipelines.take_all().into_iter().map(|cached| cached.pipeline).chain(retired) {
            device.destroy_pipeline(pipeline);
        }
        let retired_rt = std::mem::take(&mut self.retired_rt_pipelines);
        for pipeline in self.rt_pipelines.take_all().into_iter().map(|cached| cached.pipeline).chain(retired_rt) {
            device.destroy_raytrace_pipeline(&pipeline);
        }
    }

    /// buffer 被销毁后，引用它的 descriptor set 不能再被复用
    ///
    /// descriptor set 随 pool 一起释放，这里只从缓存中移除
    pub fn purge_buffer(&mut self, buffer: vk::Buffer) {
        self.descriptor_sets.take_where(|key, _| key.references_buffer(buffer));
    }

    /// 销毁 image 的所有 view，并移除引用这些 view 的 descriptor set
    pub fn purge_image(&mut self, image: vk::Image, device: &mut dyn RgDevice) {
        let views = self.image_views.take_where(|key, _| key.image == image);
        for view in views {
            self.descriptor_sets.take_where(|key, _| key.references_view(view));
            device.destroy_image_view(view);
        }
    }

    pub fn destroy(&mut self, device: &mut dyn RgDevice) {
        self.clear_pipelines(device);
        for layout in self.pipeline_layouts.take_all() {
            device.destroy_pipeline_layout(layout);
        }
        for layout in self.descriptor_set_layouts.take_all() {
            device.destroy_descriptor_set_layout(layout);
        }
        self.descriptor_sets.take_all();
        for view in self.image_views.take_all() {
            device.destroy_image_view(view);
        }
        for sampler in self.samplers.take_all() {
            device.destroy_sampler(sampler);
        }
    }
}
