//! Surface cache configuration.
//!
//! Sizes can come from defaults, environment variables, or a serialized
//! viewer configuration. [`CacheConfig::validate`] rejects degenerate budgets,
//! which is the only way building a cache can fail.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MB: usize = 1024 * 1024;

/// Budget and retention settings for rendered page surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on bytes held by full-resolution surfaces and thumbnails
    pub surface_budget_bytes: usize,
    /// Upper bound on pages holding a full-resolution surface
    pub max_pages: usize,
    /// Keep a downscaled copy after the full surface is evicted
    pub keep_thumbnails: bool,
    /// Longest edge of a retained thumbnail, in pixels
    pub thumbnail_max_dim: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            surface_budget_bytes: 256 * MB,
            max_pages: 32,
            keep_thumbnails: true,
            thumbnail_max_dim: 256,
        }
    }
}

impl CacheConfig {
    /// Sets the surface budget in megabytes.
    pub fn with_budget_mb(mut self, mb: usize) -> Self {
        self.surface_budget_bytes = mb * MB;
        self
    }

    /// Sets the budget in bytes. Mostly useful for small test caches.
    pub fn with_budget_bytes(mut self, bytes: usize) -> Self {
        self.surface_budget_bytes = bytes;
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    pub fn with_thumbnails(mut self, keep: bool) -> Self {
        self.keep_thumbnails = keep;
        self
    }

    pub fn with_thumbnail_max_dim(mut self, pixels: u32) -> Self {
        self.thumbnail_max_dim = pixels;
        self
    }

    pub fn budget_mb(&self) -> usize {
        self.surface_budget_bytes / MB
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PDF_VIEWER_SURFACE_CACHE_MB`: surface budget in MB (default: 256)
    /// - `PDF_VIEWER_PAGE_CACHE_SIZE`: maximum cached pages (default: 32)
    /// - `PDF_VIEWER_KEEP_THUMBNAILS`: `true`/`false`/`1`/`0` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields of `self` from the environment.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(mb) = env_parse::<usize>("PDF_VIEWER_SURFACE_CACHE_MB")? {
            self.surface_budget_bytes = mb.checked_mul(MB).ok_or_else(|| {
                ConfigError::InvalidValue("PDF_VIEWER_SURFACE_CACHE_MB".to_string())
            })?;
        }
        if let Some(pages) = env_parse::<usize>("PDF_VIEWER_PAGE_CACHE_SIZE")? {
            self.max_pages = pages;
        }
        if let Ok(value) = std::env::var("PDF_VIEWER_KEEP_THUMBNAILS") {
            self.keep_thumbnails = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "PDF_VIEWER_KEEP_THUMBNAILS".to_string(),
                    ))
                }
            };
        }
        Ok(self)
    }

    /// Rejects budgets a cache cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pages == 0 {
            return Err(ConfigError::ZeroBudget("max_pages"));
        }
        if self.surface_budget_bytes == 0 {
            return Err(ConfigError::ZeroBudget("surface_budget_bytes"));
        }
        if self.keep_thumbnails && self.thumbnail_max_dim == 0 {
            return Err(ConfigError::ZeroBudget("thumbnail_max_dim"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur when building cache configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    InvalidValue(String),

    #[error("{0} must be greater than zero")]
    ZeroBudget(&'static str),
}
