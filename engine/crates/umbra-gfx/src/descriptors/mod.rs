pub mod descriptor_pool;
pub mod descriptor_set_layout;
pub mod sampler;
