pub mod buffer;
pub mod image_view;
