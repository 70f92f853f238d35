//! 资源绑定表
//!
//! 每个注册的 buffer 或 image view 对应一条 [`Bindable`] 记录，
//! pass 之间传递的是 `Handle<Bindable>`。资源本身由调用方创建，
//! 绑定表只记录身份和元数据。

use ash::vk;

use crate::pool::{Handle, Pool};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindableKind {
    Uniform,
    Storage,
    Vertex,
    Index,
    ImageView,
}

/// 采样读取时使用的 sampler，`None` 表示以 sampled image 的方式读取
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SamplerKind {
    #[default]
    None,
    Linear,
    Nearest,
}

/// 调用方创建好的 image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgImageRef {
    pub image: vk::Image,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    /// swapchain image 作为 raster 输出时，pass 结束后会被转换到 PRESENT_SRC
    pub is_swapchain: bool,
}

/// image view 的参数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageViewParams {
    pub format: vk::Format,
    pub view_type: vk::ImageViewType,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub mip_count: u32,
    pub sampler: SamplerKind,
}
impl ImageViewParams {
    /// 单个 mip 的 2D view
    pub fn new_2d(format: vk::Format, aspect: vk::ImageAspectFlags) -> Self {
        Self {
            format,
            view_type: vk::ImageViewType::TYPE_2D,
            aspect,
            base_mip: 0,
            mip_count: 1,
            sampler: SamplerKind::None,
        }
    }

    #[inline]
    pub fn with_mips(mut self, base_mip: u32, mip_count: u32) -> Self {
        self.base_mip = base_mip;
        self.mip_count = mip_count;
        self
    }

    #[inline]
    pub fn with_sampler(mut self, sampler: SamplerKind) -> Self {
        self.sampler = sampler;
        self
    }

    /// view 覆盖的 mip level
    #[inline]
    pub fn mip_range(&self) -> std::ops::Range<u32> {
        self.base_mip..self.base_mip.saturating_add(self.mip_count)
    }

    /// 展开 `vk::REMAINING_MIP_LEVELS`，并把 mip 区间限制在 `[0, mip_levels)` 之内，至少覆盖一个 mip
    pub fn resolve_mips(mut self, mip_levels: u32) -> Self {
        let mip_levels = mip_levels.max(1);
        self.base_mip = self.base_mip.min(mip_levels - 1);
        let available = mip_levels - self.base_mip;
        self.mip_count = match self.mip_count {
            vk::REMAINING_MIP_LEVELS => available,
            count => count.clamp(1, available),
        };
        self
    }
}

/// 调用方创建好的 buffer（或 buffer 的一段）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBufferRef {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}
impl RgBufferRef {
    /// 整个 buffer
    #[inline]
    pub fn whole(buffer: vk::Buffer, size: vk::DeviceSize) -> Self {
        Self { buffer, offset: 0, size }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindableResource {
    Buffer {
        buffer: RgBufferRef,
        /// 只有 index buffer 有值
        index_type: Option<vk::IndexType>,
    },
    Image {
        image: RgImageRef,
        view: ImageViewParams,
    },
}

#[derive(Clone, Debug)]
pub struct Bindable {
    pub kind: BindableKind,
    pub resource: BindableResource,
    pub name: String,
}
// getters
impl Bindable {
    #[inline]
    pub fn buffer(&self) -> Option<&RgBufferRef> {
        match &self.resource {
            BindableResource::Buffer { buffer, .. } => Some(buffer),
            BindableResource::Image { .. } => None,
        }
    }

    #[inline]
    pub fn image(&self) -> Option<(&RgImageRef, &ImageViewParams)> {
        match &self.resource {
            BindableResource::Image { image, view } => Some((image, view)),
            BindableResource::Buffer { .. } => None,
        }
    }

    /// image view 的 format，buffer 返回 UNDEFINED
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image().map_or(vk::Format::UNDEFINED, |(_, view)| view.format)
    }
}

/// 所有注册资源的表
#[derive(Default)]
pub struct BindingTable {
    bindables: Pool<Bindable>,
}

// new & init
impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }
}

// register
impl BindingTable {
    pub fn register_image_view(
        &mut self,
        image: RgImageRef,
        view: ImageViewParams,
        name: impl Into<String>,
    ) -> Handle<Bindable> {
        let resolved = view.resolve_mips(image.mip_levels);
        let clamped = resolved.base_mip != view.base_mip
            || (view.mip_count != vk::REMAINING_MIP_LEVELS && resolved.mip_count != view.mip_count);
        if clamped {
            log::warn!(
                "image view mips {}+{} clamped to {}+{} ({} mip levels)",
                view.base_mip,
                view.mip_count,
                resolved.base_mip,
                resolved.mip_count,
                image.mip_levels
            );
        }
        self.insert(BindableKind::ImageView, BindableResource::Image { image, view: resolved }, name)
    }

    pub fn register_storage_buffer(&mut self, buffer: RgBufferRef, name: impl Into<String>) -> Handle<Bindable> {
        self.insert_buffer(BindableKind::Storage, buffer, None, name)
    }

    pub fn register_uniform_buffer(&mut self, buffer: RgBufferRef, name: impl Into<String>) -> Handle<Bindable> {
        self.insert_buffer(BindableKind::Uniform, buffer, None, name)
    }

    pub fn register_vertex_buffer(&mut self, buffer: RgBufferRef, name: impl Into<String>) -> Handle<Bindable> {
        self.insert_buffer(BindableKind::Vertex, buffer, None, name)
    }

    pub fn register_index_buffer(
        &mut self,
        buffer: RgBufferRef,
        index_type: vk::IndexType,
        name: impl Into<String>,
    ) -> Handle<Bindable> {
        self.insert_buffer(BindableKind::Index, buffer, Some(index_type), name)
    }

    fn insert_buffer(
        &mut self,
        kind: BindableKind,
        buffer: RgBufferRef,
        index_type: Option<vk::IndexType>,
        name: impl Into<String>,
    ) -> Handle<Bindable> {
        self.insert(kind, BindableResource::Buffer { buffer, index_type }, name)
    }

    fn insert(&mut self, kind: BindableKind, resource: BindableResource, name: impl Into<String>) -> Handle<Bindable> {
        let name = name.into();
        let handle = self.bindables.put(Bindable { kind, resource, name });
        log::debug!("register bindable {:?} as {:?}", kind, handle);
        handle
    }

    /// 只释放 handle 的 slot，不会销毁底层资源
    pub fn unregister(&mut self, handle: Handle<Bindable>) -> Option<Bindable> {
        self.bindables.remove(handle)
    }
}

// getter & iter
impl BindingTable {
    #[inline]
    pub fn get(&self, handle: Handle<Bindable>) -> Option<&Bindable> {
        self.bindables.get(handle)
    }

    #[inline]
    pub fn pool(&self) -> &Pool<Bindable> {
        &self.bindables
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bindables.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindables.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Handle<Bindable>, &Bindable)> {
        self.bindables.iter()
    }

    /// 引用了 `image` 的所有 handle
    pub fn handles_of_image(&self, image: vk::Image) -> Vec<Handle<Bindable>> {
        self.iter().filter(|(_, b)| b.image().is_some_and(|(i, _)| i.image == image)).map(|(h, _)| h).collect()
    }

    /// 引用了 `buffer` 的所有 handle
    pub fn handles_of_buffer(&self, buffer: vk::Buffer) -> Vec<Handle<Bindable>> {
        self.iter().filter(|(_, b)| b.buffer().is_some_and(|r| r.buffer == buffer)).map(|(h, _)| h).collect()
    }
}
