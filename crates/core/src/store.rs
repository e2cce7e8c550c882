//! Persistent annotation store
//!
//! The store is keyed by the absolute path of the annotated file. All
//! annotations live in a single `annotations.json` document under the local
//! data directory; every mutation rewrites it atomically (temp file + rename).

use crate::annotation::{Annotation, AnnotationId};
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const STORE_FILE: &str = "annotations.json";
const STORE_VERSION: u32 = 1;

/// CRUD contract of the external annotation database
pub trait AnnotationStore {
    fn add(&self, file: &Path, annotation: &Annotation) -> Result<(), StoreError>;

    /// Returns `true` if an annotation with `id` existed
    fn remove(&self, file: &Path, id: &str) -> Result<bool, StoreError>;

    fn list(&self, file: &Path) -> Result<Vec<Annotation>, StoreError>;

    /// Replace the stored annotation with the same id
    fn update(&self, file: &Path, annotation: &Annotation) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    files: BTreeMap<String, Vec<Annotation>>,
}

/// JSON-file backed [`AnnotationStore`]
#[derive(Debug, Clone)]
pub struct JsonAnnotationStore {
    root: PathBuf,
}

impl JsonAnnotationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the platform's local data directory
    pub fn open_default() -> Result<Self, StoreError> {
        Self::default_root().map(Self::new)
    }

    pub fn default_root() -> Result<PathBuf, StoreError> {
        dirs::data_local_dir()
            .map(|dir| dir.join("pdf-viewer"))
            .ok_or(StoreError::NoDataDirectory)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    fn load(&self) -> Result<StoreFile, StoreError> {
        let path = self.store_path();
        if !path.exists() {
            return Ok(StoreFile {
                version: STORE_VERSION,
                ..StoreFile::default()
            });
        }
        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn save(&self, data: &StoreFile) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        let path = self.store_path();
        let json = serde_json::to_string_pretty(data)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn modify<T>(
        &self,
        file: &Path,
        change: impl FnOnce(&mut Vec<Annotation>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut data = self.load()?;
        let key = file_key(file);
        let entries = data.files.entry(key.clone()).or_default();
        let result = change(entries)?;
        if entries.is_empty() {
            data.files.remove(&key);
        }
        data.version = STORE_VERSION;
        self.save(&data)?;
        Ok(result)
    }
}

impl AnnotationStore for JsonAnnotationStore {
    fn add(&self, file: &Path, annotation: &Annotation) -> Result<(), StoreError> {
        debug!(id = annotation.id(), page = annotation.page(), "storing annotation");
        self.modify(file, |entries| {
            entries.retain(|existing| existing.id() != annotation.id());
            entries.push(annotation.clone());
            Ok(())
        })
    }

    fn remove(&self, file: &Path, id: &str) -> Result<bool, StoreError> {
        self.modify(file, |entries| {
            let before = entries.len();
            entries.retain(|existing| existing.id() != id);
            Ok(entries.len() != before)
        })
    }

    fn list(&self, file: &Path) -> Result<Vec<Annotation>, StoreError> {
        let mut data = self.load()?;
        Ok(data.files.remove(&file_key(file)).unwrap_or_default())
    }

    fn update(&self, file: &Path, annotation: &Annotation) -> Result<(), StoreError> {
        self.modify(file, |entries| {
            let slot = entries
                .iter_mut()
                .find(|existing| existing.id() == annotation.id())
                .ok_or_else(|| StoreError::NotFound(AnnotationId::from(annotation.id())))?;
            *slot = annotation.clone();
            Ok(())
        })
    }
}

/// Absolute path used as the store key; falls back to the path as given
fn file_key(file: &Path) -> String {
    fs::canonicalize(file)
        .unwrap_or_else(|_| file.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
