//! Umbra 工具集
//!
//! 目前只包含日志初始化：彩色等级 + 本地时间 + 源码位置。

pub mod init_log;

pub use init_log::{init_log, init_log_with_level, try_init_test_log};
