//! render graph 的配置
//!
//! 可以从 toml 加载，缺失的字段使用默认值：
//!
//! ```toml
//! arena_capacity = 16777216
//! log_barriers = true
//!
//! [descriptor_pool]
//! max_sets = 512
//! ```

use std::path::Path;

use serde::Deserialize;
use umbra_gfx::descriptors::descriptor_pool::GfxDescriptorPoolSizes;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    pub max_sets: u32,
    pub uniform_buffers: u32,
    pub storage_buffers: u32,
    pub sampled_images: u32,
    pub storage_images: u32,
    pub combined_image_samplers: u32,
}
impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            max_sets: 1024,
            uniform_buffers: 1024,
            storage_buffers: 4096,
            sampled_images: 2048,
            storage_images: 2048,
            combined_image_samplers: 2048,
        }
    }
}
impl From<DescriptorPoolConfig> for GfxDescriptorPoolSizes {
    fn from(config: DescriptorPoolConfig) -> Self {
        Self {
            max_sets: config.max_sets,
            uniform_buffers: config.uniform_buffers,
            storage_buffers: config.storage_buffers,
            sampled_images: config.sampled_images,
            storage_images: config.storage_images,
            combined_image_samplers: config.combined_image_samplers,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RenderGraphConfig {
    /// 帧内存的大小，单位 byte
    pub arena_capacity: usize,
    /// 每个 pass 外包裹一个 debug label
    pub pass_debug_labels: bool,
    /// 以 debug 级别打印每个 barrier
    pub log_barriers: bool,
    pub descriptor_pool: DescriptorPoolConfig,
}
impl Default for RenderGraphConfig {
    fn default() -> Self {
        Self {
            arena_capacity: 64 * 1024 * 1024,
            pass_debug_labels: true,
            log_barriers: false,
            descriptor_pool: DescriptorPoolConfig::default(),
        }
    }
}

// load
impl RenderGraphConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read render graph config {}: {}", path.display(), e))?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse render graph config {}: {}", path.display(), e))?;
        log::info!("loaded render graph config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(RenderGraphConfig::from_toml_str("").unwrap(), RenderGraphConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = RenderGraphConfig::from_toml_str(
            r#"
            arena_capacity = 4096
            log_barriers = true

            [descriptor_pool]
            max_sets = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.arena_capacity, 4096);
        assert!(config.log_barriers);
        assert!(config.pass_debug_labels);
        assert_eq!(config.descriptor_pool.max_sets, 8);
        assert_eq!(config.descriptor_pool.storage_buffers, DescriptorPoolConfig::default().storage_buffers);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(RenderGraphConfig::from_toml_str("arena_capacity = \"big\"").is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(RenderGraphConfig::from_toml_file("/nonexistent/umbra_render_graph.toml").is_err());
    }
}
