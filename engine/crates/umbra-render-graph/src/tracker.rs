//! 冒险追踪
//!
//! 记录每个 buffer 以及每个 (image, mip) 最近一次的访问状态，
//! 比较前后两次访问来决定是否需要 barrier。
//!
//! 访问状态每帧清空，但 image layout 跨帧保留：新的一帧里资源的前一次访问总是
//! [`AccessState::NONE`]，而 layout 仍然是上一帧最后的 layout。

use std::collections::HashMap;

use ash::vk;

use crate::access::{AccessState, format_access_flags, format_pipeline_stage};

/// buffer 的内存 barrier，覆盖整个 buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBufferBarrier {
    pub buffer: vk::Buffer,
    pub src: AccessState,
    pub dst: AccessState,
}

/// image 的 layout 转换 barrier，只作用于一个 mip level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub mip_level: u32,
    pub src: AccessState,
    pub dst: AccessState,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}
impl std::fmt::Display for RgImageBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "image {:?} mip {}: {:?} -> {:?}, [{}] {} -> [{}] {}",
            self.image,
            self.mip_level,
            self.old_layout,
            self.new_layout,
            format_pipeline_stage(self.src.stage),
            format_access_flags(self.src.access),
            format_pipeline_stage(self.dst.stage),
            format_access_flags(self.dst.access),
        )
    }
}
impl std::fmt::Display for RgBufferBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "buffer {:?}: [{}] {} -> [{}] {}",
            self.buffer,
            format_pipeline_stage(self.src.stage),
            format_access_flags(self.src.access),
            format_pipeline_stage(self.dst.stage),
            format_access_flags(self.dst.access),
        )
    }
}

/// 一个 pass 需要的所有 barrier，合并为一次 pipeline barrier 命令
#[derive(Clone, Debug, Default)]
pub struct RgBarrierBatch {
    pub buffer_barriers: Vec<RgBufferBarrier>,
    pub image_barriers: Vec<RgImageBarrier>,
}
impl RgBarrierBatch {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.buffer_barriers.clear();
        self.image_barriers.clear();
    }
}

#[derive(Default)]
pub struct AccessTracker {
    /// 每帧清空
    buffer_access: HashMap<vk::Buffer, AccessState>,
    /// 每帧清空
    image_access: HashMap<(vk::Image, u32), AccessState>,
    /// 跨帧保留
    image_layouts: HashMap<(vk::Image, u32), vk::ImageLayout>,
}

// new & init
impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

// 访问
impl AccessTracker {
    /// - 写：只要本帧之前访问过就需要 barrier
    /// - 读：只有前一次访问是写时才需要 barrier，连续的读不会产生 barrier
    pub fn access_buffer(&mut self, buffer: vk::Buffer, new_state: AccessState) -> Option<RgBufferBarrier> {
        let prev_state = self.buffer_access.insert(buffer, new_state).unwrap_or(AccessState::NONE);

        let need_barrier = if new_state.is_write() { !prev_state.is_none() } else { prev_state.is_write() };
        need_barrier.then_some(RgBufferBarrier {
            buffer,
            src: prev_state,
            dst: new_state,
        })
    }

    /// 和 buffer 的规则相同，另外 layout 不一致时也需要 barrier
    pub fn access_image(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_level: u32,
        new_state: AccessState,
    ) -> Option<RgImageBarrier> {
        let key = (image, mip_level);
        let prev_state = self.image_access.insert(key, new_state).unwrap_or(AccessState::NONE);
        let prev_layout = self.image_layouts.insert(key, new_state.layout).unwrap_or(vk::ImageLayout::UNDEFINED);

        let layout_differs = prev_layout != new_state.layout;
        let need_barrier = if new_state.is_write() {
            !prev_state.is_none() || layout_differs
        } else {
            prev_state.is_write() || layout_differs
        };
        need_barrier.then_some(RgImageBarrier {
            image,
            aspect,
            mip_level,
            src: prev_state,
            dst: new_state,
            old_layout: prev_layout,
            new_layout: new_state.layout,
        })
    }

    /// 无条件转换，用于 raster 的 color / depth 输出以及 present
    pub fn transition_image(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_level: u32,
        new_state: AccessState,
    ) -> RgImageBarrier {
        let key = (image, mip_level);
        let prev_state = self.image_access.insert(key, new_state).unwrap_or(AccessState::NONE);
        let prev_layout = self.image_layouts.insert(key, new_state.layout).unwrap_or(vk::ImageLayout::UNDEFINED);
        RgImageBarrier {
            image,
            aspect,
            mip_level,
            src: prev_state,
            dst: new_state,
            old_layout: prev_layout,
            new_layout: new_state.layout,
        }
    }
}

// reset & forget
impl AccessTracker {
    /// 帧结束：清空访问状态，保留 image layout
    ///
    /// 下一帧对同一资源的首次读不会产生 barrier，只依赖提交之间的同步。
    /// 访问状态与 layout 的生命周期不一致，需要跨帧依赖时要重新审视这里。
    pub fn reset_frame(&mut self) {
        self.buffer_access.clear();
        self.image_access.clear();
    }

    /// 资源被销毁后清除与它相关的全部记录
    pub fn forget_buffer(&mut self, buffer: vk::Buffer) {
        self.buffer_access.remove(&buffer);
    }

    pub fn forget_image(&mut self, image: vk::Image) {
        self.image_access.retain(|(i, _), _| *i != image);
        self.image_layouts.retain(|(i, _), _| *i != image);
    }
}

// getters
impl AccessTracker {
    #[inline]
    pub fn buffer_state(&self, buffer: vk::Buffer) -> AccessState {
        self.buffer_access.get(&buffer).copied().unwrap_or(AccessState::NONE)
    }

    #[inline]
    pub fn image_state(&self, image: vk::Image, mip_level: u32) -> AccessState {
        self.image_access.get(&(image, mip_level)).copied().unwrap_or(AccessState::NONE)
    }

    #[inline]
    pub fn image_layout(&self, image: vk::Image, mip_level: u32) -> vk::ImageLayout {
        self.image_layouts.get(&(image, mip_level)).copied().unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    /// 本帧内被访问过的资源数量，(image, mip) 分别计数
    #[inline]
    pub fn tracked_count(&self) -> usize {
        self.buffer_access.len() + self.image_access.len()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    const COLOR: vk::ImageAspectFlags = vk::ImageAspectFlags::COLOR;

    #[test]
    fn test_buffer_first_write_no_barrier() {
        let mut tracker = AccessTracker::new();
        let buffer = vk::Buffer::from_raw(1);
        assert!(tracker.access_buffer(buffer, AccessState::COMPUTE_WRITE).is_none());
        assert_eq!(tracker.buffer_state(buffer), AccessState::COMPUTE_WRITE);
    }

    #[test]
    fn test_buffer_write_after_write() {
        let mut tracker = AccessTracker::new();
        let buffer = vk::Buffer::from_raw(1);
        tracker.access_buffer(buffer, AccessState::COMPUTE_WRITE);

        let barrier = tracker.access_buffer(buffer, AccessState::RAYTRACE_WRITE).unwrap();
        assert_eq!(barrier.src, AccessState::COMPUTE_WRITE);
        assert_eq!(barrier.dst, AccessState::RAYTRACE_WRITE);
    }

    #[test]
    fn test_buffer_write_after_read() {
        let mut tracker = AccessTracker::new();
        let buffer = vk::Buffer::from_raw(1);
        assert!(tracker.access_buffer(buffer, AccessState::COMPUTE_READ).is_none());
        assert!(tracker.access_buffer(buffer, AccessState::COMPUTE_WRITE).is_some());
    }

    #[test]
    fn test_buffer_read_after_read_elided() {
        let mut tracker = AccessTracker::new();
        let buffer = vk::Buffer::from_raw(1);
        tracker.access_buffer(buffer, AccessState::COMPUTE_WRITE);

        assert!(tracker.access_buffer(buffer, AccessState::COMPUTE_READ).is_some());
        assert!(tracker.access_buffer(buffer, AccessState::FRAGMENT_READ).is_none());
        assert!(tracker.access_buffer(buffer, AccessState::RAYTRACE_READ).is_none());
    }

    #[test]
    fn test_image_read_after_read_single_barrier() {
        let mut tracker = AccessTracker::new();
        let image = vk::Image::from_raw(2);

        let first = tracker.access_image(image, COLOR, 0, AccessState::COMPUTE_READ).unwrap();
        assert_eq!(first.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        // layout 相同的只读到只读可以跳过
        assert!(tracker.access_image(image, COLOR, 0, AccessState::FRAGMENT_READ).is_none());
    }

    #[test]
    fn test_image_per_mip_independence() {
        let mut tracker = AccessTracker::new();
        let image = vk::Image::from_raw(3);
        tracker.access_image(image, COLOR, 1, AccessState::COMPUTE_READ);
        tracker.reset_frame();

        assert!(tracker.access_image(image, COLOR, 0, AccessState::COMPUTE_WRITE).is_some());
        // mip 1 的 layout 已经是 SHADER_READ_ONLY，并且本帧没有写过 mip 1
        assert!(tracker.access_image(image, COLOR, 1, AccessState::COMPUTE_READ).is_none());

        let barrier = tracker.access_image(image, COLOR, 0, AccessState::COMPUTE_READ).unwrap();
        assert_eq!(barrier.mip_level, 0);
        assert_eq!(barrier.src, AccessState::COMPUTE_WRITE);
        assert_eq!(barrier.old_layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn test_layout_persists_across_frames() {
        let mut tracker = AccessTracker::new();
        let image = vk::Image::from_raw(4);
        tracker.access_image(image, COLOR, 0, AccessState::COMPUTE_WRITE);
        tracker.access_image(image, COLOR, 0, AccessState::COMPUTE_READ);
        tracker.reset_frame();

        assert_eq!(tracker.image_state(image, 0), AccessState::NONE);
        assert_eq!(tracker.image_layout(image, 0), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        // 访问状态已清空，但 layout 不同，仍然需要 barrier
        let barrier = tracker.access_image(image, COLOR, 0, AccessState::COMPUTE_WRITE).unwrap();
        assert_eq!(barrier.src, AccessState::NONE);
        assert_eq!(barrier.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_write_same_layout_next_frame_no_barrier() {
        let mut tracker = AccessTracker::new();
        let image = vk::Image::from_raw(5);
        tracker.access_image(image, COLOR, 0, AccessState::COMPUTE_WRITE);
        tracker.reset_frame();

        assert!(tracker.access_image(image, COLOR, 0, AccessState::RAYTRACE_WRITE).is_none());
    }

    #[test]
    fn test_transition_is_unconditional() {
        let mut tracker = AccessTracker::new();
        let image = vk::Image::from_raw(6);
        let first = tracker.transition_image(image, COLOR, 0, AccessState::COLOR_WRITE);
        assert_eq!(first.old_layout, vk::ImageLayout::UNDEFINED);

        let second = tracker.transition_image(image, COLOR, 0, AccessState::COLOR_WRITE);
        assert_eq!(second.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(second.src, AccessState::COLOR_WRITE);
    }

    #[test]
    fn test_forget_image() {
        let mut tracker = AccessTracker::new();
        let image = vk::Image::from_raw(7);
        tracker.access_image(image, COLOR, 0, AccessState::COMPUTE_WRITE);
        tracker.access_image(image, COLOR, 2, AccessState::COMPUTE_WRITE);
        tracker.forget_image(image);

        assert_eq!(tracker.tracked_count(), 0);
        assert_eq!(tracker.image_layout(image, 2), vk::ImageLayout::UNDEFINED);
    }
}
