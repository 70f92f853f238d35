use ash::vk;

use crate::foundation::device::GfxDevice;

/// descriptor pool 的容量配置
#[derive(Clone, Copy, Debug)]
pub struct GfxDescriptorPoolSizes {
    pub max_sets: u32,
    pub uniform_buffers: u32,
    pub storage_buffers: u32,
    pub sampled_images: u32,
    pub storage_images: u32,
    pub combined_image_samplers: u32,
}

/// 可增长的 descriptor pool
///
/// 当前 pool 用尽时会新建一个同样大小的 pool，之前的 pool 不会被回收
pub struct GfxDescriptorAllocator {
    sizes: GfxDescriptorPoolSizes,
    pools: Vec<vk::DescriptorPool>,
}
// new & init
impl GfxDescriptorAllocator {
    pub fn new(device: &GfxDevice, sizes: GfxDescriptorPoolSizes) -> anyhow::Result<Self> {
        let mut allocator = Self { sizes, pools: vec![] };
        allocator.grow(device)?;
        Ok(allocator)
    }

    fn grow(&mut self, device: &GfxDevice) -> anyhow::Result<vk::DescriptorPool> {
        let pool_sizes = [
            (vk::DescriptorType::UNIFORM_BUFFER, self.sizes.uniform_buffers),
            (vk::DescriptorType::STORAGE_BUFFER, self.sizes.storage_buffers),
            (vk::DescriptorType::SAMPLED_IMAGE, self.sizes.sampled_images),
            (vk::DescriptorType::STORAGE_IMAGE, self.sizes.storage_images),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, self.sizes.combined_image_samplers),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect::<Vec<_>>();

        let create_info = vk::DescriptorPoolCreateInfo::default().max_sets(self.sizes.max_sets).pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&create_info, None)? };
        device.set_object_debug_name(pool, format!("rg-descriptor-pool-{}", self.pools.len()));
        log::info!("create descriptor pool #{}, max sets {}", self.pools.len(), self.sizes.max_sets);

        self.pools.push(pool);
        Ok(pool)
    }
}
// allocate
impl GfxDescriptorAllocator {
    pub fn allocate(&mut self, device: &GfxDevice, layout: vk::DescriptorSetLayout) -> anyhow::Result<vk::DescriptorSet> {
        let layouts = [layout];
        if let Some(&pool) = self.pools.last() {
            let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&layouts);
            match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
                Ok(sets) => return Ok(sets[0]),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let pool = self.grow(device)?;
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&layouts);
        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    /// 销毁 pool 的同时会释放其中所有的 descriptor set
    pub fn destroy(self, device: &GfxDevice) {
        for pool in self.pools {
            unsafe {
                device.destroy_descriptor_pool(pool, None);
            }
        }
    }
}
