use std::ffi::CString;
use std::ops::Deref;

use ash::vk;

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及 render graph 需要的扩展函数指针。
/// 设备本身由上层创建（需要开启 dynamic rendering、synchronization2、
/// ray tracing pipeline 以及 buffer device address），这里只负责持有。
///
/// # 扩展支持
/// - Dynamic Rendering (KHR)
/// - Ray Tracing Pipeline (KHR)
/// - Debug Utils (EXT)
pub struct GfxDevice {
    /// 核心 Vulkan 设备 API
    pub(crate) device: ash::Device,
    /// 动态渲染扩展 API
    pub(crate) dynamic_rendering: ash::khr::dynamic_rendering::Device,
    /// 光线追踪管线扩展 API
    pub(crate) ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device,
    /// 调试工具扩展 API
    pub(crate) debug_utils: ash::ext::debug_utils::Device,

    rt_pipeline_props: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static>,
}
// new & init
impl GfxDevice {
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: ash::Device) -> Self {
        let mut rt_pipeline_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        {
            let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut rt_pipeline_props);
            unsafe {
                instance.get_physical_device_properties2(pdevice, &mut props2);
            }
        }
        // 查询结束后链表已经没有意义
        rt_pipeline_props.p_next = std::ptr::null_mut();

        log::info!(
            "rt pipeline props: handle size {}, handle alignment {}, base alignment {}, max recursion {}",
            rt_pipeline_props.shader_group_handle_size,
            rt_pipeline_props.shader_group_handle_alignment,
            rt_pipeline_props.shader_group_base_alignment,
            rt_pipeline_props.max_ray_recursion_depth
        );

        Self {
            dynamic_rendering: ash::khr::dynamic_rendering::Device::new(instance, &device),
            ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device::new(instance, &device),
            debug_utils: ash::ext::debug_utils::Device::new(instance, &device),
            device,
            rt_pipeline_props,
        }
    }
}
// getters
impl GfxDevice {
    #[inline]
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn rt_pipeline_props(&self) -> &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static> {
        &self.rt_pipeline_props
    }

    #[inline]
    pub fn ray_tracing_pipeline(&self) -> &ash::khr::ray_tracing_pipeline::Device {
        &self.ray_tracing_pipeline
    }
}
// debug
impl GfxDevice {
    /// 为 vulkan 对象设置 debug name，名称中含有 `\0` 时直接忽略
    pub fn set_object_debug_name<T: vk::Handle>(&self, handle: T, name: impl AsRef<str>) {
        let Ok(name) = CString::new(name.as_ref()) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(name.as_c_str());
        unsafe {
            if let Err(e) = self.debug_utils.set_debug_utils_object_name(&name_info) {
                log::warn!("failed to set debug name {:?}: {:?}", name, e);
            }
        }
    }
}
impl Deref for GfxDevice {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.device
    }
}
