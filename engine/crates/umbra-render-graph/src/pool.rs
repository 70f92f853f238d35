//! 代际句柄池
//!
//! `Handle<T>` 由 slot 索引和 generation 组成，generation 为 0 表示从未赋值。
//! slot 被移除时 generation 递增（不会回到 0），因此旧的 handle 永远不会
//! 被误认为是复用之后的 slot。

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::{RgError, RgResult};

/// 指向 [`Pool<T>`] 中某个 slot 的弱引用，本身不持有任何东西
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

// new & getters
impl<T> Handle<T> {
    /// 无效的 handle，任何 pool 都无法解析它
    pub const INVALID: Self = Self::from_raw(0, 0);

    #[inline]
    pub const fn from_raw(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.generation != 0
    }

    #[inline]
    fn stale_error(&self) -> RgError {
        RgError::StaleHandle {
            index: self.index,
            generation: self.generation,
        }
    }
}

// derive 会给 T 加上不必要的约束，这里手动实现
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}
impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}
impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}
impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}.g{})", self.index, self.generation)
    }
}

/// 代际 slot 池
///
/// - `put` 优先复用最近释放的 slot（LIFO），否则追加新的 slot，新 slot 的 generation 为 1
/// - 访问过期的 handle 不会 panic，而是返回 `None` / [`RgError::StaleHandle`]
pub struct Pool<T> {
    /// `None` 表示 slot 已经被移除（墓碑）
    data: Vec<Option<T>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
        }
    }
}

// new & init
impl<T> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

// put & remove
impl<T> Pool<T> {
    pub fn put(&mut self, value: T) -> Handle<T> {
        if let Some(index) = self.free_list.pop() {
            let slot = index as usize;
            debug_assert!(self.data[slot].is_none());
            self.data[slot] = Some(value);
            return Handle::from_raw(index, self.generations[slot]);
        }

        let index = self.data.len() as u32;
        self.data.push(Some(value));
        self.generations.push(1);
        Handle::from_raw(index, 1)
    }

    /// 过期的 handle 返回 `None`，不会修改 pool
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        self.try_remove(handle).ok()
    }

    pub fn try_remove(&mut self, handle: Handle<T>) -> RgResult<T> {
        if !self.is_live(handle) {
            return Err(handle.stale_error());
        }
        let slot = handle.index as usize;

        // generation 跳过 0，0 保留给无效 handle
        let next_generation = match self.generations[slot].wrapping_add(1) {
            0 => 1,
            generation => generation,
        };
        self.generations[slot] = next_generation;
        self.free_list.push(handle.index);

        self.data[slot].take().ok_or_else(|| handle.stale_error())
    }

    /// 移除所有元素，已有的 handle 全部失效
    pub fn clear(&mut self) {
        let live = self.iter().map(|(handle, _)| handle).collect::<Vec<_>>();
        for handle in live {
            self.remove(handle);
        }
    }
}

// getter & iter
impl<T> Pool<T> {
    #[inline]
    fn is_live(&self, handle: Handle<T>) -> bool {
        let slot = handle.index as usize;
        handle.is_valid()
            && slot < self.data.len()
            && self.generations[slot] == handle.generation
            && self.data[slot].is_some()
    }

    #[inline]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if !self.is_live(handle) {
            return None;
        }
        self.data[handle.index as usize].as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if !self.is_live(handle) {
            return None;
        }
        self.data[handle.index as usize].as_mut()
    }

    #[inline]
    pub fn try_get(&self, handle: Handle<T>) -> RgResult<&T> {
        self.get(handle).ok_or_else(|| handle.stale_error())
    }

    #[inline]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.is_live(handle)
    }

    /// 通过原始 slot 索引获取当前的 handle，slot 为墓碑或者越界时返回无效 handle
    ///
    /// 用于调试界面遍历
    pub fn handle_at(&self, index: u32) -> Handle<T> {
        match self.data.get(index as usize) {
            Some(Some(_)) => Handle::from_raw(index, self.generations[index as usize]),
            _ => Handle::INVALID,
        }
    }

    /// 存活的元素数量
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.free_list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// slot 数量，包含墓碑
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data.iter().enumerate().filter_map(|(slot, value)| {
            value.as_ref().map(|value| (Handle::from_raw(slot as u32, self.generations[slot]), value))
        })
    }
}
