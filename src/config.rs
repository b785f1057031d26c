//! Configuration for AtlasCol
//!
//! Centralized configuration with sensible defaults.

use crate::column::BlockLayout;
use crate::error::{AtlasError, Result};

/// Environment variable that overrides [`Config::file_key_safety_check`]
pub const SAFETY_CHECK_PROPERTY: &str = "ATLASCOL_FILE_KEY_SAFETY_CHECK";

/// Main configuration for AtlasCol
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Block Directory Configuration
    // -------------------------------------------------------------------------
    /// log2 of the number of values per block
    pub block_shift: u32,

    /// log2 of the number of blocks per directory page (two-level directories)
    pub page_shift: u32,

    /// Exclusive upper bound on row keys for stores built from this config
    pub max_row_count: u64,

    // -------------------------------------------------------------------------
    // File Handle Configuration
    // -------------------------------------------------------------------------
    /// Fail refreshes whose reopened file has a different file key.
    /// When false, the mismatch is only logged.
    pub file_key_safety_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_shift: 16, // 64K values
            page_shift: 12,  // 4K blocks
            max_row_count: 1 << 40,
            file_key_safety_check: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Default config with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(SAFETY_CHECK_PROPERTY) {
            config.file_key_safety_check = parse_bool(&raw).ok_or_else(|| {
                AtlasError::Config(format!(
                    "{} must be true/false/1/0, got '{}'",
                    SAFETY_CHECK_PROPERTY, raw
                ))
            })?;
        }
        Ok(config)
    }

    /// Validated block layout for stores built from this config
    pub fn block_layout(&self) -> Result<BlockLayout> {
        BlockLayout::new(self.block_shift, self.page_shift, self.max_row_count)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set log2 of the block size
    pub fn block_shift(mut self, shift: u32) -> Self {
        self.config.block_shift = shift;
        self
    }

    /// Set log2 of the directory page size
    pub fn page_shift(mut self, shift: u32) -> Self {
        self.config.page_shift = shift;
        self
    }

    /// Set the exclusive upper bound on row keys
    pub fn max_row_count(mut self, count: u64) -> Self {
        self.config.max_row_count = count;
        self
    }

    /// Enable or disable the file key safety check
    pub fn file_key_safety_check(mut self, enabled: bool) -> Self {
        self.config.file_key_safety_check = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
