//! Viewer configuration
//!
//! Stored as JSON; every field has a default so partial files work. Paths in
//! `search.roots` may start with `~/`.

use crate::export::{DEFAULT_ENDPOINT, DEFAULT_TOKEN_ENV};
use crate::visibility::Layout;
use pdf_viewer_cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Cache(#[from] pdf_viewer_cache::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Quiet period before a content search starts
    pub delay_ms: u64,
    pub max_count: usize,
    pub timeout_ms: u64,
    pub preview_chars: usize,
    pub roots: Vec<String>,
    pub program: String,
    /// Directories scanned for the filename picker
    pub file_roots: Vec<String>,
    /// Directory levels below each file root that are scanned
    pub scan_depth: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            delay_ms: 300,
            max_count: 50,
            timeout_ms: 10_000,
            preview_chars: 60,
            roots: vec![
                "~/Downloads".to_string(),
                "~/Documents".to_string(),
                "~/projects".to_string(),
            ],
            program: "rga".to_string(),
            file_roots: vec![
                "~/Downloads".to_string(),
                "~/Documents".to_string(),
                "~/projects".to_string(),
                "/tmp".to_string(),
            ],
            scan_depth: 3,
        }
    }
}

impl SearchConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Roots with `~/` expanded against the home directory
    pub fn resolved_roots(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|root| expand_home(root)).collect()
    }

    pub fn resolved_file_roots(&self) -> Vec<PathBuf> {
        self.file_roots.iter().map(|root| expand_home(root)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub endpoint: String,
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout_secs: 30,
        }
    }
}

impl ExportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub layout: Layout,
    pub search: SearchConfig,
    pub export: ExportConfig,
    pub cache: CacheConfig,
    /// Pages on each side of the visible range rendered ahead; 0 disables
    pub prefetch_radius: usize,
    pub render_workers: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            search: SearchConfig::default(),
            export: ExportConfig::default(),
            cache: CacheConfig::default(),
            prefetch_radius: 0,
            render_workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().clamp(1, 4))
        .unwrap_or(2)
}

impl ViewerConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `<config dir>/pdf-viewer/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pdf-viewer").join("config.json"))
    }

    /// Load from the default location, falling back to the defaults
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Apply environment overrides for the cache section
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        self.cache = self.cache.apply_env()?;
        Ok(self)
    }

    /// Coerce out-of-range values, returning a warning for each fix
    pub fn normalize(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        warnings.extend(self.layout.normalize());
        if self.render_workers == 0 {
            self.render_workers = 1;
            warnings.push("render-workers must be positive, using 1".to_string());
        }
        if self.search.max_count == 0 {
            self.search.max_count = SearchConfig::default().max_count;
            warnings.push("search max-count must be positive, using 50".to_string());
        }
        warnings
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ViewerConfig::default();
        assert_eq!(config.search.delay(), Duration::from_millis(300));
        assert_eq!(config.search.max_count, 50);
        assert_eq!(config.search.preview_chars, 60);
        assert_eq!(config.search.file_roots.len(), 4);
        assert!(config
            .search
            .resolved_file_roots()
            .contains(&PathBuf::from("/tmp")));
        assert_eq!(config.export.token_env, "READWISE_TOKEN");
        assert_eq!(config.export.timeout(), Duration::from_secs(30));
        assert_eq!(config.layout.pages_per_row, 1);
        assert!(config.render_workers >= 1);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ViewerConfig::from_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"layout": {"pages_per_row": 2}, "search": {"delay_ms": 150}, "cache": {"max_pages": 8}}"#,
        )
        .unwrap();
        let config = ViewerConfig::from_file(&path).unwrap();
        assert_eq!(config.layout.pages_per_row, 2);
        assert_eq!(config.search.delay_ms, 150);
        assert_eq!(config.search.max_count, 50);
        assert_eq!(config.cache.max_pages, 8);
    }

    #[test]
    fn test_invalid_json_is_reported_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{").unwrap();
        let err = ViewerConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_normalize_coerces_zero_pages_per_row() {
        let mut config = ViewerConfig::default();
        config.layout.pages_per_row = 0;
        config.render_workers = 0;
        let warnings = config.normalize();
        assert_eq!(warnings.len(), 2);
        assert_eq!(config.layout.pages_per_row, 1);
        assert_eq!(config.render_workers, 1);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/Documents"), home.join("Documents"));
        }
    }
}
