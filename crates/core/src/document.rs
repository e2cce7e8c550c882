//! Document and page state
//!
//! A [`Document`] exclusively owns its pages. Caches and trackers refer to
//! pages by zero-based index only.

use crate::visibility::VisibilityDelta;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Unique identifier for an opened document within one session
pub type DocumentId = u64;

/// Page dimensions in points (1/72 inch)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PageDimensions {
    pub width: f64,
    pub height: f64,
}

impl PageDimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Descriptive metadata reported by the document backend
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub index: usize,
    pub width: f64,
    pub height: f64,
    pub visible: bool,
    pub last_viewed: Option<Instant>,
    /// Cursor into this page's search matches
    pub search_current: usize,
}

impl Page {
    pub fn new(index: usize, dimensions: PageDimensions) -> Self {
        Self {
            index,
            width: dimensions.width,
            height: dimensions.height,
            visible: false,
            last_viewed: None,
            search_current: 0,
        }
    }
}

#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    path: PathBuf,
    metadata: DocumentMetadata,
    pages: Vec<Page>,
}

impl Document {
    pub fn new(
        id: DocumentId,
        path: impl Into<PathBuf>,
        metadata: DocumentMetadata,
        dimensions: &[PageDimensions],
    ) -> Self {
        let pages = dimensions
            .iter()
            .enumerate()
            .map(|(index, dims)| Page::new(index, *dims))
            .collect();
        Self {
            id,
            path: path.into(),
            metadata,
            pages,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    /// Title for export records: metadata title, else the file stem
    pub fn display_title(&self) -> String {
        self.metadata
            .title
            .clone()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| {
                self.path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| self.path.display().to_string())
            })
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_visible(&self, index: usize) -> bool {
        self.pages.get(index).is_some_and(|page| page.visible)
    }

    pub fn visible_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|page| page.visible)
            .map(|page| page.index)
            .collect()
    }

    /// Apply a visibility delta computed by the tracker
    ///
    /// Newly visible pages get their last-viewed time refreshed; pages that
    /// left the viewport reset their search cursor.
    pub fn apply_visibility(&mut self, delta: &VisibilityDelta, now: Instant) {
        for &index in &delta.became_visible {
            if let Some(page) = self.pages.get_mut(index) {
                page.visible = true;
                page.last_viewed = Some(now);
            }
        }
        for &index in &delta.became_invisible {
            if let Some(page) = self.pages.get_mut(index) {
                page.visible = false;
                page.search_current = 0;
            }
        }
    }

    /// Refresh last-viewed for pages that stayed visible
    pub fn touch_visible(&mut self, now: Instant) {
        for page in self.pages.iter_mut().filter(|page| page.visible) {
            page.last_viewed = Some(now);
        }
    }

    pub fn set_search_current(&mut self, index: usize, current: usize) {
        if let Some(page) = self.pages.get_mut(index) {
            page.search_current = current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(pages: usize) -> Document {
        let dims = vec![PageDimensions::new(612.0, 792.0); pages];
        Document::new(1, "/docs/report.pdf", DocumentMetadata::default(), &dims)
    }

    #[test]
    fn pages_are_indexed_from_zero() {
        let doc = document(3);
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.page(2).map(|page| page.index), Some(2));
        assert!(doc.page(3).is_none());
    }

    #[test]
    fn apply_visibility_updates_flags_and_cursor() {
        let mut doc = document(4);
        let now = Instant::now();
        doc.apply_visibility(
            &VisibilityDelta {
                became_visible: vec![1, 2],
                became_invisible: vec![],
            },
            now,
        );
        doc.set_search_current(1, 5);
        assert_eq!(doc.visible_pages(), vec![1, 2]);
        assert_eq!(doc.page(1).unwrap().last_viewed, Some(now));

        doc.apply_visibility(
            &VisibilityDelta {
                became_visible: vec![],
                became_invisible: vec![1],
            },
            now,
        );
        assert!(!doc.is_visible(1));
        assert_eq!(doc.page(1).unwrap().search_current, 0);
    }

    #[test]
    fn display_title_falls_back_to_file_stem() {
        let doc = document(1);
        assert_eq!(doc.display_title(), "report");

        let titled = Document::new(
            2,
            "/docs/x.pdf",
            DocumentMetadata {
                title: Some("Annual Report".into()),
                author: None,
            },
            &[],
        );
        assert_eq!(titled.display_title(), "Annual Report");
    }
}
