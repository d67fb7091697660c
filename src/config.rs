//! Build configuration.
//!
//! Handles loading, validating, and merging `siena.toml`. Stock defaults are
//! serialized to a TOML table, the user's file is merged over it key by key,
//! and the result is deserialized and validated.
//!
//! ## Config File Location
//!
//! ```text
//! site/
//! ├── siena.toml        # optional, overrides stock defaults
//! ├── content/
//! │   └── posts/hello.md
//! └── public/
//!     └── .siena/       # variant cache (output_dir/cache_dir_name)
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! output_dir = "public"       # Rendered site, relative to the build root
//! cache_dir_name = ".siena"   # Variant cache inside output_dir, also the URL prefix
//! loading = "lazy"            # lazy | eager
//! gc_scope = "session"        # session | per-document
//!
//! [images]
//! max_width = 1920            # Variants are never wider than this
//! quality = 80                # Encoding quality (1-100)
//! formats = ["webp", "avif"]  # <source> formats after the canonical jpg
//!
//! [fetch]
//! timeout_secs = 30           # Per-request timeout for remote images
//!
//! [processing]
//! max_processes = 4           # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! ## GC scope
//!
//! `session` collects once, after every document of the build has been
//! transformed. `per-document` collects after each document against that
//! document's references alone, which deletes variants other documents of
//! the same build still use. Only pick it when the cache directory belongs to
//! a single document.
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{DEFAULT_MAX_WIDTH, OutputFormat, Quality};
use crate::tree::Loading;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the config file looked up in the build root.
pub const CONFIG_FILE_NAME: &str = "siena.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// When stale variants are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GcScope {
    /// After the host ends the session.
    #[default]
    Session,
    /// After every document.
    PerDocument,
}

/// Configuration loaded from `siena.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SienaConfig {
    /// Rendered output directory, relative to the build root.
    pub output_dir: String,
    /// Cache directory inside `output_dir`; also the URL path prefix.
    pub cache_dir_name: String,
    /// `loading` attribute put on rewritten images.
    pub loading: Loading,
    pub gc_scope: GcScope,
    pub images: ImagesConfig,
    pub fetch: FetchConfig,
    pub processing: ProcessingConfig,
}

impl Default for SienaConfig {
    fn default() -> Self {
        Self {
            output_dir: "public".to_string(),
            cache_dir_name: ".siena".to_string(),
            loading: Loading::Lazy,
            gc_scope: GcScope::Session,
            images: ImagesConfig::default(),
            fetch: FetchConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl SienaConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.images.quality) {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if self.images.max_width == 0 {
            return Err(ConfigError::Validation(
                "images.max_width must be non-zero".into(),
            ));
        }
        if self.images.formats.contains(&OutputFormat::Jpg) {
            return Err(ConfigError::Validation(
                "images.formats must not list jpg, it is always generated".into(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.images.formats.iter().find(|f| !seen.insert(**f)) {
            return Err(ConfigError::Validation(format!(
                "images.formats lists {dup} twice"
            )));
        }
        if self.cache_dir_name.is_empty()
            || self.cache_dir_name.contains(['/', '\\'])
            || self.cache_dir_name == "."
            || self.cache_dir_name == ".."
        {
            return Err(ConfigError::Validation(
                "cache_dir_name must be a single directory name".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "fetch.timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Absolute location of the variant cache for `root`.
    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.output_dir).join(&self.cache_dir_name)
    }

    /// URL path under which cached variants are served, e.g. `/.siena`.
    pub fn url_prefix(&self) -> String {
        format!("/{}", self.cache_dir_name)
    }
}

/// Variant generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    pub max_width: u32,
    /// Encoding quality (1 = worst, 100 = best).
    pub quality: u32,
    /// Alternate formats, emitted as `<source>` elements in this order.
    pub formats: Vec<OutputFormat>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            quality: 80,
            formats: vec![OutputFormat::Webp, OutputFormat::Avif],
        }
    }
}

impl ImagesConfig {
    pub fn quality(&self) -> Quality {
        Quality::new(self.quality)
    }
}

/// Remote image settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.clamp(1, cores)).unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SienaConfig::default()).expect("default config must serialize")
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

/// Load `siena.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the directory has no `siena.toml`.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SienaConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SienaConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `siena.toml` in the build root.
pub fn load_config(root: &Path) -> Result<SienaConfig, ConfigError> {
    resolve_config(stock_defaults_value(), load_raw_config(root)?)
}

/// Fully-commented stock `siena.toml`, printed by `siena gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# siena configuration
# ===================
# All settings are optional. Values shown are the defaults.
# Unknown keys cause an error.

# Rendered site directory, relative to the build root.
output_dir = "public"

# Variant cache directory inside output_dir. Variants are served from
# /<cache_dir_name>/<hash>.<format>.
cache_dir_name = ".siena"

# loading attribute on rewritten images: "lazy" or "eager".
loading = "lazy"

# When stale variants are deleted:
#   "session"      - once, after the whole build
#   "per-document" - after every document, against that document only.
#                    Deletes variants other documents still use; only for
#                    cache directories owned by a single document.
gc_scope = "session"

[images]
# Variants are scaled down to at most this width. Never upscaled.
max_width = 1920
# Encoding quality (1-100).
quality = 80
# Extra <source> formats, in order. A jpg is always produced.
formats = ["webp", "avif"]

[fetch]
# Timeout for fetching remote images, in seconds.
timeout_secs = 30

[processing]
# Maximum parallel workers. Omit to use all CPU cores.
# max_processes = 4
"##
}
