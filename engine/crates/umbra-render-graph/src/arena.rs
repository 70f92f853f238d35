//! 帧内存
//!
//! 一块固定容量的 bump allocator，每帧结束时 reset 一次。
//! pass 的 reads / writes / push constants 等变长数据都拷贝到这里，
//! 避免每个 pass 都做堆分配。
//!
//! 分配结果是带 epoch 的 offset 区间而不是引用，reset 之后再访问旧区间会得到
//! [`RgError::StaleArenaData`]，而不是读到下一帧的数据。

use std::marker::PhantomData;

use bytemuck::{Pod, Zeroable};

use crate::error::{RgError, RgResult};

/// arena 支持的最大对齐
pub const ARENA_MAX_ALIGN: usize = 16;

#[repr(C, align(16))]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ArenaChunk([u8; ARENA_MAX_ALIGN]);

/// arena 中的一段字节区间
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaRange {
    offset: usize,
    len: usize,
    epoch: u64,
}
impl ArenaRange {
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// arena 中的一段 `[T]`
pub struct ArenaSlice<T> {
    range: ArenaRange,
    count: usize,
    _marker: PhantomData<fn() -> T>,
}
impl<T> Clone for ArenaSlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ArenaSlice<T> {}
impl<T> std::fmt::Debug for ArenaSlice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArenaSlice({} x {}, epoch {})", self.count, std::any::type_name::<T>(), self.range.epoch)
    }
}
impl<T> ArenaSlice<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// arena 中的一段 utf-8 字符串
pub type ArenaStr = ArenaSlice<u8>;

/// arena 中的一组字符串：拼接后的字节加上每个字符串的长度，空字符串同样保留
#[derive(Clone, Copy, Debug)]
pub struct ArenaStrList {
    bytes: ArenaStr,
    lengths: ArenaSlice<u32>,
}
impl ArenaStrList {
    #[inline]
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}

pub struct FrameArena {
    storage: Vec<ArenaChunk>,
    cursor: usize,
    /// 每次 reset 递增
    epoch: u64,
}

// new & init
impl FrameArena {
    /// `capacity` 会向上取整到 [`ARENA_MAX_ALIGN`]，之后不会再增长
    pub fn new(capacity: usize) -> Self {
        let chunk_count = capacity.div_ceil(ARENA_MAX_ALIGN);
        Self {
            storage: vec![ArenaChunk::zeroed(); chunk_count],
            cursor: 0,
            epoch: 0,
        }
    }

    /// 回到起点，之前分配的所有区间失效
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.epoch += 1;
    }
}

// getters
impl FrameArena {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len() * ARENA_MAX_ALIGN
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.cursor
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.storage)
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.storage)
    }
}

// allocate
impl FrameArena {
    /// bump 分配，空间不足时返回 `None`，不会增长
    ///
    /// `alignment` 必须是 2 的幂且不超过 [`ARENA_MAX_ALIGN`]
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<ArenaRange> {
        debug_assert!(alignment.is_power_of_two() && alignment <= ARENA_MAX_ALIGN);

        let offset = self.cursor.checked_next_multiple_of(alignment.max(1))?;
        let end = offset.checked_add(size)?;
        if end > self.capacity() {
            return None;
        }
        self.cursor = end;
        Some(ArenaRange {
            offset,
            len: size,
            epoch: self.epoch,
        })
    }

    pub fn alloc_slice<T: Pod>(&mut self, items: &[T]) -> RgResult<ArenaSlice<T>> {
        let src: &[u8] = bytemuck::cast_slice(items);
        let Some(range) = self.allocate(src.len(), align_of::<T>()) else {
            return Err(RgError::ArenaExhausted {
                requested: src.len(),
                remaining: self.remaining(),
            });
        };
        self.bytes_mut()[range.offset..range.offset + range.len].copy_from_slice(src);
        Ok(ArenaSlice {
            range,
            count: items.len(),
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn alloc_str(&mut self, s: &str) -> RgResult<ArenaStr> {
        self.alloc_slice(s.as_bytes())
    }

    pub fn alloc_strs(&mut self, strs: &[&str]) -> RgResult<ArenaStrList> {
        let lengths = strs.iter().map(|s| s.len() as u32).collect::<Vec<_>>();
        Ok(ArenaStrList {
            bytes: self.alloc_str(&strs.concat())?,
            lengths: self.alloc_slice(&lengths)?,
        })
    }
}

// read
impl FrameArena {
    #[inline]
    fn check_epoch(&self, range: &ArenaRange) -> RgResult<()> {
        if range.epoch != self.epoch {
            return Err(RgError::StaleArenaData {
                epoch: range.epoch,
                current: self.epoch,
            });
        }
        Ok(())
    }

    pub fn get<T: Pod>(&self, slice: &ArenaSlice<T>) -> RgResult<&[T]> {
        self.check_epoch(&slice.range)?;
        let bytes = &self.bytes()[slice.range.offset..slice.range.offset + slice.range.len];
        Ok(bytemuck::cast_slice(bytes))
    }

    pub fn get_str(&self, s: &ArenaStr) -> RgResult<&str> {
        let bytes = self.get(s)?;
        std::str::from_utf8(bytes).map_err(|_| RgError::ArenaUtf8 { offset: s.range.offset })
    }

    pub fn get_strs(&self, list: &ArenaStrList) -> RgResult<Vec<&str>> {
        let joined = self.get_str(&list.bytes)?;
        let mut start = 0;
        let mut strs = Vec::with_capacity(list.len());
        for &len in self.get(&list.lengths)? {
            let end = start + len as usize;
            let s = joined.get(start..end).ok_or(RgError::ArenaUtf8 {
                offset: list.bytes.range.offset + start,
            })?;
            strs.push(s);
            start = end;
        }
        Ok(strs)
    }
}
