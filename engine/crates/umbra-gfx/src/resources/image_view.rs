use ash::vk;

use crate::foundation::device::GfxDevice;

/// image view 的描述，可以作为 HashMap 的 key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImageViewDesc {
    pub format: vk::Format,
    pub view_type: vk::ImageViewType,
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub mip_count: u32,
}
impl GfxImageViewDesc {
    #[inline]
    pub fn new_2d(format: vk::Format, aspect_mask: vk::ImageAspectFlags) -> Self {
        Self {
            format,
            view_type: vk::ImageViewType::TYPE_2D,
            aspect_mask,
            base_mip: 0,
            mip_count: 1,
        }
    }
}

pub fn create_image_view(
    device: &GfxDevice,
    image: vk::Image,
    view_desc: &GfxImageViewDesc,
    name: impl AsRef<str>,
) -> anyhow::Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo {
        image,
        view_type: view_desc.view_type,
        format: view_desc.format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: view_desc.aspect_mask,
            base_mip_level: view_desc.base_mip,
            level_count: view_desc.mip_count,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };

    let handle = unsafe { device.create_image_view(&info, None)? };
    device.set_object_debug_name(handle, name);
    Ok(handle)
}
