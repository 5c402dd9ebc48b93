//! # Configuration Loader / 配置加载器
//!
//! Reads a TOML file into [`StoreConfig`]. Missing sections and keys take
//! their defaults; values are not validated here. The digest algorithm
//! name is checked when the runtime starts.
//!
//! 仅负责读取 TOML 并映射为 [`StoreConfig`]，不做校验。

use std::path::Path;

use anyhow::Context;
use cs_core::StoreConfig;

/// Load configuration from a TOML file
/// 从 TOML 文件加载配置
///
/// # Errors / 错误
///
/// Returns error if the file cannot be read or is not valid TOML for
/// [`StoreConfig`].
pub fn load_config(config_path: impl AsRef<Path>) -> anyhow::Result<StoreConfig> {
    let config_path = config_path.as_ref();
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    toml::from_str(&content).context("Failed to parse config as TOML")
}
