pub mod compute_pipeline;
pub mod graphics_pipeline;
pub mod pipeline_layout;
pub mod rt_pipeline;
pub mod sbt;
pub mod shader;
