use ash::vk;
use vk_mem::Alloc;

use crate::foundation::device::GfxDevice;

/// 通过 vk-mem 分配的 buffer
///
/// # Destroy
/// 需要手动调用 `destroy`，drop 时只做检查
pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,

    size: vk::DeviceSize,

    /// 在初始化阶段写死
    map_ptr: Option<*mut u8>,
    /// 只有在 buffer usage 包含 SHADER_DEVICE_ADDRESS 时才有值
    device_addr: Option<vk::DeviceAddress>,

    #[cfg(debug_assertions)]
    destroyed: bool,
}
// init & destroy
impl GfxBuffer {
    /// - align: 当 buffer 处于一个大的 memory block 中时，align 用来指定 buffer 的起始 offset
    ///   的内存对齐，默认对齐到 8 字节
    /// - 优先使用 device memory
    pub fn new(
        device: &GfxDevice,
        allocator: &vk_mem::Allocator,
        buffer_size: vk::DeviceSize,
        buffer_usage: vk::BufferUsageFlags,
        align: Option<vk::DeviceSize>,
        mem_map: bool,
        name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let buffer_ci = vk::BufferCreateInfo::default().size(buffer_size).usage(buffer_usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if mem_map {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let align = align.unwrap_or(8);
        let (buffer, mut alloc) = unsafe { allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, align)? };

        let mut map_ptr = None;
        if mem_map {
            map_ptr = Some(unsafe { allocator.map_memory(&mut alloc)? });
        }

        let mut device_addr = None;
        if buffer_usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            device_addr =
                Some(unsafe { device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer)) });
        }

        device.set_object_debug_name(buffer, format!("Buffer::{}", name.as_ref()));
        Ok(Self {
            handle: buffer,
            allocation: alloc,
            size: buffer_size,
            map_ptr,
            device_addr,

            #[cfg(debug_assertions)]
            destroyed: false,
        })
    }

    pub fn destroy(mut self, allocator: &vk_mem::Allocator) {
        unsafe {
            if self.map_ptr.is_some() {
                allocator.unmap_memory(&mut self.allocation);
            }
            allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for GfxBuffer {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed, "GfxBuffer must be destroyed manually before drop.");
    }
}
// getters
impl GfxBuffer {
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// buffer 创建时没有 SHADER_DEVICE_ADDRESS 时返回 0
    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_addr.unwrap_or(0)
    }
}
// host 访问
impl GfxBuffer {
    /// 将数据写入到 mapped 内存的 `offset` 处
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> anyhow::Result<()> {
        let Some(map_ptr) = self.map_ptr else {
            anyhow::bail!("buffer is not host mapped");
        };
        anyhow::ensure!(
            offset + data.len() <= self.size as usize,
            "write out of range: offset {} + len {} > size {}",
            offset,
            data.len(),
            self.size
        );
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), map_ptr.add(offset), data.len());
        }
        Ok(())
    }

    pub fn flush(&self, allocator: &vk_mem::Allocator, offset: vk::DeviceSize, size: vk::DeviceSize) -> anyhow::Result<()> {
        allocator.flush_allocation(&self.allocation, offset, size)?;
        Ok(())
    }
}

/// 通过 vk-mem 分配的 image，render graph 的 `destroy_resource` 会通过它释放内存
pub struct GfxImage {
    handle: vk::Image,
    allocation: vk_mem::Allocation,
}
impl GfxImage {
    pub fn new(
        device: &GfxDevice,
        allocator: &vk_mem::Allocator,
        image_ci: &vk::ImageCreateInfo,
        name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, allocation) = unsafe { allocator.create_image(image_ci, &alloc_ci)? };
        device.set_object_debug_name(image, format!("Image::{}", name.as_ref()));
        Ok(Self { handle: image, allocation })
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn destroy(mut self, allocator: &vk_mem::Allocator) {
        unsafe {
            allocator.destroy_image(self.handle, &mut self.allocation);
        }
    }
}
