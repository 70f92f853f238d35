//! pass 级别的性能采样

use ash::vk;
use umbra_gfx::utilities::helper::profile_scope;

/// 每个未被跳过的 pass 执行前后都会调用
pub trait RgPassProfiler {
    fn start_recording(&mut self, pass_name: &str, cmd: vk::CommandBuffer);
    fn stop_recording(&mut self, pass_name: &str, cmd: vk::CommandBuffer);
}

#[derive(Default)]
pub struct NoopProfiler;
impl RgPassProfiler for NoopProfiler {
    fn start_recording(&mut self, _pass_name: &str, _cmd: vk::CommandBuffer) {}
    fn stop_recording(&mut self, _pass_name: &str, _cmd: vk::CommandBuffer) {}
}

/// 以 tracy span 记录每个 pass 的 CPU 录制耗时
///
/// tracy client 没有运行时不产生任何 span
#[derive(Default)]
pub struct TracyPassProfiler {
    spans: Vec<Option<tracy_client::Span>>,
}
impl RgPassProfiler for TracyPassProfiler {
    fn start_recording(&mut self, pass_name: &str, _cmd: vk::CommandBuffer) {
        self.spans.push(profile_scope(pass_name));
    }

    fn stop_recording(&mut self, pass_name: &str, _cmd: vk::CommandBuffer) {
        if self.spans.pop().is_none() {
            log::warn!("profiler: stop_recording({}) without matching start", pass_name);
        }
    }
}
