//! Vulkan GFX 抽象层
//!
//! 对 `ash` 的薄封装：设备与扩展函数指针、barrier 构建、命令录制、
//! 管线 / 描述符 / 采样器 / image view 的创建。
//! 与单例式的封装不同，这里所有对象都显式接收 [`foundation::device::GfxDevice`]，
//! 生命周期由调用方管理。

pub mod basic;
pub mod commands;
pub mod descriptors;
pub mod foundation;
pub mod pipelines;
pub mod resources;
pub mod utilities;
