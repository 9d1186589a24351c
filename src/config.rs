//! Engine configuration.
//!
//! Handles loading, validating and merging `photoprep.toml`. Stock defaults
//! are the base layer; a user file overrides any subset of keys on top.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [validation]
//! min_file_size = 100               # bytes
//! max_file_size = 20971520          # bytes (20 MiB)
//! allowed_types = ["jpeg", "png", "webp"]
//! min_width = 16
//! min_height = 16
//! max_width = 8192
//! max_height = 8192
//! min_aspect_ratio = 0.1
//! max_aspect_ratio = 10.0
//! check_signature = true
//! check_corruption = true
//! memory_warning_bytes = 104857600  # 100 MiB
//! recommended_min_dimension = 512
//!
//! [compression]
//! max_size_bytes = 1048576          # 1 MiB budget
//! max_dimension = 2048
//! initial_quality = 85
//! min_quality = 40
//! quality_step = 10
//! max_iterations = 10
//! # output_format = "webp"          # omit to keep the source format
//! correct_orientation = true
//!
//! [conversion]
//! quality = 85
//! # max_dimension = 4096
//! correct_orientation = true
//!
//! [preview]
//! max_dimension = 100
//! quality = 30
//! format = "jpeg"
//! correct_orientation = true
//!
//! [preview_cache]
//! max_entries = 50
//! ttl_secs = 300
//!
//! [pool]
//! # max_workers = 4                # omit for auto (CPU cores, at most 8)
//! task_timeout_ms = 30000
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::compress::CompressConfig;
use crate::pool::PoolConfig;
use crate::preview::{PreviewCacheConfig, PreviewConfig};
use crate::process::ConversionConfig;
use crate::validate::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name looked up by [`load_config_from_dir`].
pub const CONFIG_FILE_NAME: &str = "photoprep.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Everything the engine can be tuned with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub validation: ValidationConfig,
    pub compression: CompressConfig,
    pub conversion: ConversionConfig,
    pub preview: PreviewConfig,
    pub preview_cache: PreviewCacheConfig,
    pub pool: PoolConfig,
}

fn check(ok: bool, message: &str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.into()))
    }
}

fn check_quality(q: u32, key: &str) -> Result<(), ConfigError> {
    check(
        (1..=100).contains(&q),
        &format!("{key} must be 1-100, got {q}"),
    )
}

impl EngineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.validation;
        check(
            v.min_file_size <= v.max_file_size,
            "validation.min_file_size must not exceed max_file_size",
        )?;
        check(
            v.min_width > 0 && v.min_height > 0,
            "validation.min_width and min_height must be non-zero",
        )?;
        check(
            v.min_width <= v.max_width && v.min_height <= v.max_height,
            "validation minimum dimensions must not exceed the maximums",
        )?;
        check(
            v.min_aspect_ratio > 0.0 && v.min_aspect_ratio <= v.max_aspect_ratio,
            "validation.min_aspect_ratio must be positive and not exceed max_aspect_ratio",
        )?;
        check(
            !v.allowed_types.is_empty(),
            "validation.allowed_types must not be empty",
        )?;

        let c = &self.compression;
        check(
            c.max_size_bytes > 0,
            "compression.max_size_bytes must be non-zero",
        )?;
        check(
            c.max_dimension > 0,
            "compression.max_dimension must be non-zero",
        )?;
        check_quality(c.initial_quality, "compression.initial_quality")?;
        check_quality(c.min_quality, "compression.min_quality")?;
        check(
            c.min_quality <= c.initial_quality,
            "compression.min_quality must not exceed initial_quality",
        )?;
        check(
            c.quality_step > 0,
            "compression.quality_step must be non-zero",
        )?;
        check(
            c.max_iterations > 0,
            "compression.max_iterations must be non-zero",
        )?;

        check_quality(self.conversion.quality, "conversion.quality")?;
        check(
            self.conversion.max_dimension != Some(0),
            "conversion.max_dimension must be non-zero when set",
        )?;

        check(
            self.preview.max_dimension > 0,
            "preview.max_dimension must be non-zero",
        )?;
        check_quality(self.preview.quality, "preview.quality")?;
        check(
            self.preview_cache.max_entries > 0,
            "preview_cache.max_entries must be non-zero",
        )?;
        check(
            self.preview_cache.ttl_secs > 0,
            "preview_cache.ttl_secs must be non-zero",
        )?;

        check(
            self.pool.max_workers != Some(0),
            "pool.max_workers must be non-zero when set",
        )?;
        check(
            self.pool.task_timeout_ms > 0,
            "pool.task_timeout_ms must be non-zero",
        )?;
        Ok(())
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(EngineConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<EngineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: EngineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a file, layered over stock defaults.
///
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Load [`CONFIG_FILE_NAME`] from a directory.
pub fn load_config_from_dir(dir: &Path) -> Result<EngineConfig, ConfigError> {
    load_config(&dir.join(CONFIG_FILE_NAME))
}

/// Returns a fully-commented stock `photoprep.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# photoprep configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Validation
# ---------------------------------------------------------------------------
[validation]
# Accepted file size range, in bytes.
min_file_size = 100
max_file_size = 20971520

# Declared types that are accepted at all.
allowed_types = ["jpeg", "png", "webp"]

# Pixel bounds, measured on the upright image.
min_width = 16
min_height = 16
max_width = 8192
max_height = 8192

# Accepted width / height range.
min_aspect_ratio = 0.1
max_aspect_ratio = 10.0

# Compare leading bytes with the declared type.
check_signature = true

# Draw the decoded image and read a pixel back.
check_corruption = true

# Warn when width x height x 4 exceeds this many bytes.
memory_warning_bytes = 104857600

# Warn when the longer edge is below this many pixels.
recommended_min_dimension = 512

# ---------------------------------------------------------------------------
# Compression to a byte budget
# ---------------------------------------------------------------------------
[compression]
max_size_bytes = 1048576

# Longer-edge cap applied before the quality descent.
max_dimension = 2048

# Lossy formats step quality down from initial to min, then scale by 0.85.
initial_quality = 85
min_quality = 40
quality_step = 10
max_iterations = 10

# One of "jpeg", "png", "webp", "avif". Omit to keep the source format.
# output_format = "webp"

correct_orientation = true

# ---------------------------------------------------------------------------
# Format conversion
# ---------------------------------------------------------------------------
[conversion]
quality = 85
# max_dimension = 4096
correct_orientation = true

# ---------------------------------------------------------------------------
# Previews
# ---------------------------------------------------------------------------
[preview]
max_dimension = 100
quality = 30
format = "jpeg"
correct_orientation = true

[preview_cache]
# Entries kept before the least recently used 20% are evicted.
max_entries = 50
# Seconds an entry stays fresh.
ttl_secs = 300

# ---------------------------------------------------------------------------
# Execution pool
# ---------------------------------------------------------------------------
[pool]
# Maximum worker slots.
# Omit or comment out to auto-detect (= CPU cores, at most 8).
# max_workers = 4

# Default per-task deadline in milliseconds.
task_timeout_ms = 30000
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::OutputFormat;
    use crate::types::ImageType;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.compression.max_size_bytes, 1024 * 1024);
        assert_eq!(config.preview.max_dimension, 100);
        assert_eq!(config.preview_cache.max_entries, 50);
        assert_eq!(config.preview_cache.ttl_secs, 300);
        assert_eq!(config.pool.task_timeout_ms, 30_000);
        assert_eq!(config.pool.max_workers, None);
    }

    #[test]
    fn validate_default_config_passes() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[compression]
max_size_bytes = 500000
output_format = "webp"
"#;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.compression.max_size_bytes, 500_000);
        assert_eq!(config.compression.output_format, Some(OutputFormat::WebP));
        // Defaults preserved
        assert_eq!(config.compression.initial_quality, 85);
        assert_eq!(config.validation.max_width, 8192);
    }

    #[test]
    fn parse_allowed_types() {
        let toml = r#"
[validation]
allowed_types = ["jpeg"]
"#;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.validation.allowed_types, vec![ImageType::Jpeg]);
    }

    #[test]
    fn unknown_key_rejected() {
        let toml = r#"
[pool]
max_threads = 4
"#;
        assert!(toml::from_str::<EngineConfig>(toml).is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        assert!(toml::from_str::<EngineConfig>("[cache]\nsize = 1\n").is_err());
    }

    // =========================================================================
    // validate()
    // =========================================================================

    #[test]
    fn validate_quality_out_of_range() {
        let mut config = EngineConfig::default();
        config.preview.quality = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.conversion.quality = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_min_quality_above_initial() {
        let mut config = EngineConfig::default();
        config.compression.min_quality = 90;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_quality"));
    }

    #[test]
    fn validate_zero_workers() {
        let mut config = EngineConfig::default();
        config.pool.max_workers = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_zero_cache_capacity() {
        let mut config = EngineConfig::default();
        config.preview_cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_inverted_dimension_bounds() {
        let mut config = EngineConfig::default();
        config.validation.min_width = 9000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_inverted_aspect_bounds() {
        let mut config = EngineConfig::default();
        config.validation.min_aspect_ratio = 20.0;
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // merge_toml
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Value = toml::from_str("b = 3").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"].as_integer(), Some(1));
        assert_eq!(merged["b"].as_integer(), Some(3));
    }

    #[test]
    fn merge_toml_table_merge() {
        let base: toml::Value = toml::from_str("[pool]\ntask_timeout_ms = 1\nother = 2").unwrap();
        let overlay: toml::Value = toml::from_str("[pool]\ntask_timeout_ms = 5").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["pool"]["task_timeout_ms"].as_integer(), Some(5));
        assert_eq!(merged["pool"]["other"].as_integer(), Some(2));
    }

    #[test]
    fn merge_toml_arrays_replace() {
        let base: toml::Value = toml::from_str("v = [1, 2, 3]").unwrap();
        let overlay: toml::Value = toml::from_str("v = [9]").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["v"].as_array().map(Vec::len), Some(1));
    }

    // =========================================================================
    // Loading
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from_dir(dir.path()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[pool]\nmax_workers = 3\n\n[preview]\nquality = 50\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.pool.max_workers, Some(3));
        assert_eq!(config.preview.quality, 50);
        assert_eq!(config.preview.max_dimension, 100);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "this is not toml [[[");
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_validates_values() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[compression]\nmax_iterations = 0\n");
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn unknown_key_rejected_via_load_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[preview]\nsize = 3\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn load_raw_config_returns_none_when_no_file() {
        let dir = TempDir::new().unwrap();
        let raw = load_raw_config(&dir.path().join("missing.toml")).unwrap();
        assert!(raw.is_none());
    }

    // =========================================================================
    // Stock config
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: EngineConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn stock_config_toml_contains_all_sections() {
        let text = stock_config_toml();
        for section in [
            "[validation]",
            "[compression]",
            "[conversion]",
            "[preview]",
            "[preview_cache]",
            "[pool]",
        ] {
            assert!(text.contains(section), "missing {section}");
        }
    }

    #[test]
    fn stock_defaults_value_is_table() {
        let value = stock_defaults_value().unwrap();
        assert!(value.is_table());
        assert!(value.get("pool").is_some());
    }
}
