use ash::vk;

use crate::foundation::device::GfxDevice;

/// 默认配置：repeat，全部 mip level 可用
pub fn create_sampler(device: &GfxDevice, filter: vk::Filter, debug_name: &str) -> anyhow::Result<vk::Sampler> {
    let mipmap_mode = if filter == vk::Filter::NEAREST {
        vk::SamplerMipmapMode::NEAREST
    } else {
        vk::SamplerMipmapMode::LINEAR
    };
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(mipmap_mode)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE);

    let handle = unsafe { device.create_sampler(&sampler_info, None)? };
    device.set_object_debug_name(handle, debug_name);
    Ok(handle)
}
