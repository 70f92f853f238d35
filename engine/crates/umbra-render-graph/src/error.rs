//! render graph 的可恢复错误
//!
//! 设备对象创建失败不在这里：那一类错误由 `anyhow` 传递，并在 graph 中直接 panic。

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RgError {
    /// handle 的 generation 和 slot 当前的 generation 不一致，或者 handle 从未被赋值
    #[error("stale handle (index: {index}, generation: {generation})")]
    StaleHandle { index: u32, generation: u32 },

    #[error("frame arena exhausted: requested {requested} bytes, {remaining} bytes remaining")]
    ArenaExhausted { requested: usize, remaining: usize },

    /// 访问了上一帧（reset 之前）分配的 arena 数据
    #[error("arena data from epoch {epoch} accessed at epoch {current}")]
    StaleArenaData { epoch: u64, current: u64 },

    #[error("arena string at offset {offset} is not valid utf-8")]
    ArenaUtf8 { offset: usize },

    #[error("unknown pass (index: {index}, epoch: {epoch})")]
    UnknownPass { index: u32, epoch: u64 },
}

pub type RgResult<T> = Result<T, RgError>;
