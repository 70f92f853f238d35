use ash::vk;

use crate::foundation::device::GfxDevice;
use crate::resources::buffer::GfxBuffer;
use crate::utilities::helper::align_up;

/// shader binding table 的各个 region
#[derive(Clone, Copy, Debug, Default)]
pub struct GfxSbtRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

/// 每个 region 的字节大小，不含 buffer 的基地址
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxSbtLayout {
    pub handle_stride: u32,
    pub raygen_size: u32,
    pub miss_size: u32,
    pub hit_size: u32,
}
impl GfxSbtLayout {
    /// 因为不需要 user data，所以 stride 直接使用对齐后的 shader group handle size；
    /// 每一个 region 需要使用 base align 进行对齐
    pub fn new(handle_size: u32, handle_alignment: u32, base_alignment: u32, miss_count: u32, hit_count: u32) -> Self {
        let handle_stride = align_up(handle_size, handle_alignment);
        Self {
            handle_stride,
            raygen_size: align_up(handle_stride, base_alignment),
            miss_size: align_up(miss_count * handle_stride, base_alignment),
            hit_size: align_up(hit_count * handle_stride, base_alignment),
        }
    }

    #[inline]
    pub fn total_size(&self) -> u32 {
        self.raygen_size + self.miss_size + self.hit_size
    }

    pub fn regions(&self, sbt_address: vk::DeviceAddress) -> GfxSbtRegions {
        let stride = self.handle_stride as vk::DeviceSize;
        GfxSbtRegions {
            // raygen 的 stride 需要和 size 一样
            raygen: vk::StridedDeviceAddressRegionKHR::default()
                .stride(self.raygen_size as vk::DeviceSize)
                .size(self.raygen_size as vk::DeviceSize)
                .device_address(sbt_address),
            miss: vk::StridedDeviceAddressRegionKHR::default()
                .stride(stride)
                .size(self.miss_size as vk::DeviceSize)
                .device_address(sbt_address + self.raygen_size as vk::DeviceSize),
            hit: vk::StridedDeviceAddressRegionKHR::default()
                .stride(stride)
                .size(self.hit_size as vk::DeviceSize)
                .device_address(sbt_address + (self.raygen_size + self.miss_size) as vk::DeviceSize),
            callable: vk::StridedDeviceAddressRegionKHR::default(),
        }
    }
}

/// 光追 pipeline 对应的 shader binding table
///
/// group 的顺序和 [`crate::pipelines::rt_pipeline::GfxRtPipelineCreateInfo`] 保持一致：
/// raygen，miss...，hit
pub struct GfxSbt {
    regions: GfxSbtRegions,
    buffer: GfxBuffer,
}
impl GfxSbt {
    pub fn new(
        device: &GfxDevice,
        allocator: &vk_mem::Allocator,
        pipeline: vk::Pipeline,
        miss_count: u32,
        hit_count: u32,
        name: &str,
    ) -> anyhow::Result<Self> {
        let props = device.rt_pipeline_props();
        let handle_size = props.shader_group_handle_size;
        let layout = GfxSbtLayout::new(
            handle_size,
            props.shader_group_handle_alignment,
            props.shader_group_base_alignment,
            miss_count,
            hit_count,
        );

        let mut buffer = GfxBuffer::new(
            device,
            allocator,
            layout.total_size() as vk::DeviceSize,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            Some(props.shader_group_base_alignment as vk::DeviceSize),
            true,
            format!("sbt-{name}"),
        )?;
        let regions = layout.regions(buffer.device_address());

        // 从 pipeline 中获取 shader 的 handle，并且将 shader handle 写入到 shader binding table 中
        let group_count = 1 + miss_count + hit_count;
        let write_result = (|| -> anyhow::Result<()> {
            let handle_data = unsafe {
                device.ray_tracing_pipeline().get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    group_count,
                    (group_count * handle_size) as usize,
                )?
            };
            let group_handle = |group_idx: u32| {
                let start = (group_idx * handle_size) as usize;
                &handle_data[start..start + handle_size as usize]
            };

            buffer.write_bytes(0, group_handle(0))?;
            for i in 0..miss_count {
                let offset = layout.raygen_size + i * layout.handle_stride;
                buffer.write_bytes(offset as usize, group_handle(1 + i))?;
            }
            for i in 0..hit_count {
                let offset = layout.raygen_size + layout.miss_size + i * layout.handle_stride;
                buffer.write_bytes(offset as usize, group_handle(1 + miss_count + i))?;
            }
            buffer.flush(allocator, 0, buffer.size())
        })();
        if let Err(e) = write_result {
            buffer.destroy(allocator);
            return Err(e);
        }

        Ok(Self { regions, buffer })
    }

    #[inline]
    pub fn regions(&self) -> &GfxSbtRegions {
        &self.regions
    }

    pub fn destroy(self, allocator: &vk_mem::Allocator) {
        self.buffer.destroy(allocator);
    }
}
