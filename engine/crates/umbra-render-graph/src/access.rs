//! 访问状态
//!
//! 封装 Vulkan 的 pipeline stage、access mask 和 image layout，
//! 每种访问分类对应一个固定的组合。

use ash::vk;

/// pass 的管线类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Compute,
    Raster,
    Raytrace,
    /// 调用方直接录制命令，不声明 reads / writes
    Custom,
}
impl PipelineKind {
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        match self {
            PipelineKind::Compute | PipelineKind::Custom => vk::PipelineBindPoint::COMPUTE,
            PipelineKind::Raster => vk::PipelineBindPoint::GRAPHICS,
            PipelineKind::Raytrace => vk::PipelineBindPoint::RAY_TRACING_KHR,
        }
    }

    /// descriptor 和 push constant 对哪些 shader stage 可见
    #[inline]
    pub fn shader_stages(&self) -> vk::ShaderStageFlags {
        match self {
            PipelineKind::Compute | PipelineKind::Custom => vk::ShaderStageFlags::COMPUTE,
            PipelineKind::Raster => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            PipelineKind::Raytrace => {
                vk::ShaderStageFlags::RAYGEN_KHR
                    | vk::ShaderStageFlags::MISS_KHR
                    | vk::ShaderStageFlags::CLOSEST_HIT_KHR
                    | vk::ShaderStageFlags::ANY_HIT_KHR
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccessKind {
    #[default]
    None,
    ColorWrite,
    DepthWrite,
    ComputeWrite,
    ComputeRead,
    /// raster shader 中的 storage 写入
    FragmentWrite,
    FragmentRead,
    /// vertex / index buffer 被 input assembly 读取
    VertexRead,
    RaytraceWrite,
    RaytraceRead,
}

/// 资源（buffer 或者 image 的某个 mip）最近一次被访问的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessState {
    pub kind: AccessKind,
    pub access: vk::AccessFlags2,
    pub stage: vk::PipelineStageFlags2,
    pub layout: vk::ImageLayout,
}

impl Default for AccessState {
    fn default() -> Self {
        Self::NONE
    }
}

// 常量定义
impl AccessState {
    #[inline]
    pub const fn new(
        kind: AccessKind,
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Self {
        Self {
            kind,
            access,
            stage,
            layout,
        }
    }

    /// 本帧内还没有被访问过
    pub const NONE: Self = Self::new(
        AccessKind::None,
        vk::PipelineStageFlags2::TOP_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::UNDEFINED,
    );

    pub const COLOR_WRITE: Self = Self::new(
        AccessKind::ColorWrite,
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    pub const DEPTH_WRITE: Self = Self::new(
        AccessKind::DepthWrite,
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
    );

    pub const COMPUTE_WRITE: Self = Self::new(
        AccessKind::ComputeWrite,
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_WRITE,
        vk::ImageLayout::GENERAL,
    );

    pub const COMPUTE_READ: Self = Self::new(
        AccessKind::ComputeRead,
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const FRAGMENT_WRITE: Self = Self::new(
        AccessKind::FragmentWrite,
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_WRITE,
        vk::ImageLayout::GENERAL,
    );

    pub const FRAGMENT_READ: Self = Self::new(
        AccessKind::FragmentRead,
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const VERTEX_READ: Self = Self::new(
        AccessKind::VertexRead,
        vk::PipelineStageFlags2::VERTEX_INPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw() | vk::AccessFlags2::INDEX_READ.as_raw(),
        ),
        vk::ImageLayout::UNDEFINED,
    );

    pub const RAYTRACE_WRITE: Self = Self::new(
        AccessKind::RaytraceWrite,
        vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags2::SHADER_WRITE,
        vk::ImageLayout::GENERAL,
    );

    pub const RAYTRACE_READ: Self = Self::new(
        AccessKind::RaytraceRead,
        vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// swapchain image 交给 present，不属于任何 pass 的访问
    pub const PRESENT: Self = Self::new(
        AccessKind::None,
        vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );
}

// 查询
impl AccessState {
    /// 通用 read / write 声明对应的访问状态
    ///
    /// raster 的 color / depth 输出不经过这里；custom pass 没有访问声明，返回 `None`
    pub fn for_request(pipeline: PipelineKind, is_write: bool) -> Option<Self> {
        match (pipeline, is_write) {
            (PipelineKind::Compute, true) => Some(Self::COMPUTE_WRITE),
            (PipelineKind::Compute, false) => Some(Self::COMPUTE_READ),
            (PipelineKind::Raster, true) => Some(Self::FRAGMENT_WRITE),
            (PipelineKind::Raster, false) => Some(Self::FRAGMENT_READ),
            (PipelineKind::Raytrace, true) => Some(Self::RAYTRACE_WRITE),
            (PipelineKind::Raytrace, false) => Some(Self::RAYTRACE_READ),
            (PipelineKind::Custom, _) => None,
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.kind == AccessKind::None
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        matches!(
            self.kind,
            AccessKind::ColorWrite
                | AccessKind::DepthWrite
                | AccessKind::ComputeWrite
                | AccessKind::FragmentWrite
                | AccessKind::RaytraceWrite
        )
    }
}

/// 格式化 pipeline stage flags 为简短字符串
pub fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    const NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
        (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP"),
        (vk::PipelineStageFlags2::VERTEX_INPUT, "VERTEX_INPUT"),
        (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAG"),
        (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAG"),
        (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAG"),
        (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_OUT"),
        (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE"),
        (vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR, "RT"),
        (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM"),
    ];
    format_flags(stage.as_raw(), NAMES.iter().map(|(flag, name)| (flag.as_raw(), *name)))
}

/// 格式化 access flags 为简短字符串
pub fn format_access_flags(access: vk::AccessFlags2) -> String {
    const NAMES: &[(vk::AccessFlags2, &str)] = &[
        (vk::AccessFlags2::SHADER_READ, "SHADER_R"),
        (vk::AccessFlags2::SHADER_WRITE, "SHADER_W"),
        (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_W"),
        (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_R"),
        (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_W"),
        (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_R"),
        (vk::AccessFlags2::INDEX_READ, "INDEX_R"),
    ];
    format_flags(access.as_raw(), NAMES.iter().map(|(flag, name)| (flag.as_raw(), *name)))
}

fn format_flags(raw: u64, names: impl Iterator<Item = (u64, &'static str)>) -> String {
    if raw == 0 {
        return "NONE".to_string();
    }
    let mut rest = raw;
    let mut parts = Vec::new();
    for (bit, name) in names {
        if raw & bit == bit {
            parts.push(name.to_string());
            rest &= !bit;
        }
    }
    if rest != 0 {
        parts.push(format!("{rest:#x}"));
    }
    parts.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_table() {
        let compute_write = AccessState::for_request(PipelineKind::Compute, true).unwrap();
        assert_eq!(compute_write.kind, AccessKind::ComputeWrite);
        assert_eq!(compute_write.layout, vk::ImageLayout::GENERAL);
        assert!(compute_write.is_write());

        let rt_read = AccessState::for_request(PipelineKind::Raytrace, false).unwrap();
        assert_eq!(rt_read.stage, vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR);
        assert_eq!(rt_read.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(!rt_read.is_write());

        let frag_read = AccessState::for_request(PipelineKind::Raster, false).unwrap();
        assert_eq!(frag_read.kind, AccessKind::FragmentRead);

        assert!(AccessState::for_request(PipelineKind::Custom, true).is_none());
    }

    #[test]
    fn test_none_is_neither_read_nor_write() {
        assert!(AccessState::NONE.is_none());
        assert!(!AccessState::NONE.is_write());
        assert_eq!(AccessState::default(), AccessState::NONE);
    }

    #[test]
    fn test_format_flags() {
        assert_eq!(format_pipeline_stage(vk::PipelineStageFlags2::NONE), "NONE");
        assert_eq!(format_pipeline_stage(AccessState::DEPTH_WRITE.stage), "EARLY_FRAG|LATE_FRAG");
        assert_eq!(format_access_flags(AccessState::VERTEX_READ.access), "VERTEX_R|INDEX_R");
    }
}
