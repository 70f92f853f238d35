use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ash::vk;

use crate::foundation::device::GfxDevice;

/// 所有 shader 统一使用的入口函数
pub const SHADER_ENTRY_POINT: &std::ffi::CStr = c"main";

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxShaderModule {
    handle: vk::ShaderModule,

    #[cfg(debug_assertions)]
    destroyed: bool,
}
impl GfxShaderModule {
    /// # param
    /// * path - spv shader 文件路径
    pub fn new(device: &GfxDevice, path: &Path) -> anyhow::Result<Self> {
        let mut file = std::fs::File::open(path).with_context(|| format!("open shader {}", path.display()))?;
        let shader_code = ash::util::read_spv(&mut file).with_context(|| format!("read spv {}", path.display()))?;

        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(&shader_code);
        let handle = unsafe { device.create_shader_module(&shader_module_info, None)? };
        device.set_object_debug_name(handle, path.to_string_lossy());

        Ok(Self {
            handle,

            #[cfg(debug_assertions)]
            destroyed: false,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn destroy(mut self, device: &GfxDevice) {
        unsafe {
            device.destroy_shader_module(self.handle, None);
        }
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for GfxShaderModule {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed, "GfxShaderModule must be destroyed manually before drop.");
    }
}

/// 创建一条 pipeline 期间使用的 shader module 集合，使用 shader 名称进行索引
///
/// shader 名称会被解析为 `<shader_dir>/<name>.spv`
pub struct GfxShaderModuleCache<'a> {
    device: &'a GfxDevice,
    shader_dir: &'a Path,
    shader_modules: HashMap<String, GfxShaderModule>,
}
impl<'a> GfxShaderModuleCache<'a> {
    pub fn new(device: &'a GfxDevice, shader_dir: &'a Path) -> Self {
        Self {
            device,
            shader_dir,
            shader_modules: HashMap::new(),
        }
    }

    pub fn shader_path(shader_dir: &Path, name: &str) -> PathBuf {
        shader_dir.join(format!("{name}.spv"))
    }

    pub fn get_or_load(&mut self, name: &str) -> anyhow::Result<vk::ShaderModule> {
        if let Some(module) = self.shader_modules.get(name) {
            return Ok(module.handle());
        }
        let module = GfxShaderModule::new(self.device, &Self::shader_path(self.shader_dir, name))?;
        let handle = module.handle();
        self.shader_modules.insert(name.to_string(), module);
        Ok(handle)
    }

    /// pipeline 创建完成之后 shader module 即可销毁
    pub fn destroy(self) {
        let device = self.device;
        self.shader_modules.into_values().for_each(|module| module.destroy(device));
    }
}
