//! 即时式 render graph
//!
//! 资源通过 [`pool::Handle`] 注册到 [`bindable::BindingTable`]，每帧调用方声明若干 pass，
//! [`graph::RenderGraph::execute`] 按声明顺序推导 barrier、创建或复用 descriptor / pipeline，
//! 然后录制命令。图形 API 藏在 [`device::RgDevice`] 之后，Vulkan 实现位于 [`backend::vulkan`]。

pub mod access;
pub mod arena;
pub mod backend;
pub mod bindable;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod graph;
pub mod pass;
pub mod pool;
pub mod profiler;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use error::{RgError, RgResult};
pub use graph::RenderGraph;
