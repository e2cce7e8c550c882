//! In-memory collaborators for unit tests

use crate::annotation::{Annotation, HighlightColor};
use crate::backend::{DocumentBackend, OpenedDocument, RenderBackend, RenderOutcome};
use crate::document::{DocumentMetadata, PageDimensions};
use crate::embedded::{EmbeddedDocument, EmbeddedHighlight, EmbeddedNote, NativeAnnotation};
use crate::error::{ExportError, OpenError, RenderError, SearchError, StoreError};
use crate::export::{ExportPayload, HighlightSink};
use crate::geometry::Rect;
use crate::search::{ContentSearcher, SearchHit, SearchRequest};
use crate::store::AnnotationStore;
use parking_lot::Mutex;
use pdf_viewer_cache::Surface;
use pdf_viewer_scheduler::CancellationToken;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Annotation store that can be switched into failure mode
#[derive(Default)]
pub struct MemoryStore {
    files: RefCell<HashMap<PathBuf, Vec<Annotation>>>,
    failing: Cell<bool>,
}

impl MemoryStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.get() {
            Err(StoreError::Backend("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl AnnotationStore for MemoryStore {
    fn add(&self, file: &Path, annotation: &Annotation) -> Result<(), StoreError> {
        self.check()?;
        self.files
            .borrow_mut()
            .entry(file.to_path_buf())
            .or_default()
            .push(annotation.clone());
        Ok(())
    }

    fn remove(&self, file: &Path, id: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut files = self.files.borrow_mut();
        let Some(entries) = files.get_mut(file) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|annotation| annotation.id() != id);
        Ok(entries.len() != before)
    }

    fn list(&self, file: &Path) -> Result<Vec<Annotation>, StoreError> {
        self.check()?;
        Ok(self.files.borrow().get(file).cloned().unwrap_or_default())
    }

    fn update(&self, file: &Path, annotation: &Annotation) -> Result<(), StoreError> {
        self.check()?;
        let mut files = self.files.borrow_mut();
        let slot = files
            .get_mut(file)
            .and_then(|entries| entries.iter_mut().find(|a| a.id() == annotation.id()))
            .ok_or_else(|| StoreError::NotFound(annotation.id().to_string()))?;
        *slot = annotation.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddedCall {
    Add {
        page: usize,
        annotation: NativeAnnotation,
    },
    Delete {
        page: usize,
        geometry: Rect,
    },
    SetColor {
        page: usize,
        geometry: Rect,
        color: HighlightColor,
    },
    UpdateNote {
        page: usize,
        x: f64,
        y: f64,
        content: String,
    },
    Save(PathBuf),
}

#[derive(Default)]
pub struct EmbeddedState {
    pub highlights: HashMap<usize, Vec<EmbeddedHighlight>>,
    pub notes: HashMap<usize, Vec<EmbeddedNote>>,
    pub calls: Vec<EmbeddedCall>,
    pub fail_delete: bool,
    pub fail_save: bool,
}

/// Embedded annotation layer that records every call
///
/// Clones share state, so a test can keep one handle after boxing another.
#[derive(Clone, Default)]
pub struct FakeEmbedded {
    state: Rc<RefCell<EmbeddedState>>,
}

impl FakeEmbedded {
    pub fn with_state(&self, change: impl FnOnce(&mut EmbeddedState)) {
        change(&mut self.state.borrow_mut());
    }

    pub fn calls(&self) -> Vec<EmbeddedCall> {
        self.state.borrow().calls.clone()
    }
}

impl EmbeddedDocument for FakeEmbedded {
    fn list_highlights(&self, page: usize) -> Result<Vec<EmbeddedHighlight>, StoreError> {
        Ok(self
            .state
            .borrow()
            .highlights
            .get(&page)
            .cloned()
            .unwrap_or_default())
    }

    fn list_notes(&self, page: usize) -> Result<Vec<EmbeddedNote>, StoreError> {
        Ok(self
            .state
            .borrow()
            .notes
            .get(&page)
            .cloned()
            .unwrap_or_default())
    }

    fn add_annotation(
        &mut self,
        page: usize,
        annotation: &NativeAnnotation,
    ) -> Result<(), StoreError> {
        self.state.borrow_mut().calls.push(EmbeddedCall::Add {
            page,
            annotation: annotation.clone(),
        });
        Ok(())
    }

    fn delete_annotation(&mut self, page: usize, geometry: &Rect) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        if state.fail_delete {
            return Err(StoreError::Backend("no annotation at location".into()));
        }
        state.calls.push(EmbeddedCall::Delete {
            page,
            geometry: *geometry,
        });
        Ok(())
    }

    fn set_color(
        &mut self,
        page: usize,
        geometry: &Rect,
        color: HighlightColor,
    ) -> Result<(), StoreError> {
        self.state.borrow_mut().calls.push(EmbeddedCall::SetColor {
            page,
            geometry: *geometry,
            color,
        });
        Ok(())
    }

    fn update_note_content(
        &mut self,
        page: usize,
        x: f64,
        y: f64,
        content: &str,
    ) -> Result<(), StoreError> {
        self.state.borrow_mut().calls.push(EmbeddedCall::UpdateNote {
            page,
            x,
            y,
            content: content.to_string(),
        });
        Ok(())
    }

    fn save_as(&mut self, path: &Path) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        if state.fail_save {
            return Err(StoreError::Backend("disk full".into()));
        }
        state.calls.push(EmbeddedCall::Save(path.to_path_buf()));
        Ok(())
    }
}

/// Renderer that takes `delay` per page and honours cancellation
#[derive(Default)]
pub struct FakeRenderer {
    delay: Duration,
    failing: Mutex<HashSet<usize>>,
    rendered: Mutex<Vec<(usize, f64)>>,
}

impl FakeRenderer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_page(&self, page: usize) {
        self.failing.lock().insert(page);
    }

    /// Pages that produced a surface, with the scale used
    pub fn rendered(&self) -> Vec<(usize, f64)> {
        self.rendered.lock().clone()
    }
}

impl RenderBackend for FakeRenderer {
    fn render(
        &self,
        page: usize,
        scale: f64,
        token: &CancellationToken,
    ) -> Result<RenderOutcome, RenderError> {
        let deadline = Instant::now() + self.delay;
        while Instant::now() < deadline {
            if token.is_cancelled() {
                return Ok(RenderOutcome::Cancelled);
            }
            thread::sleep(Duration::from_millis(1));
        }
        if token.is_cancelled() {
            return Ok(RenderOutcome::Cancelled);
        }
        if self.failing.lock().contains(&page) {
            return Err(RenderError::Backend(format!("cannot decode page {page}")));
        }
        self.rendered.lock().push((page, scale));
        Ok(RenderOutcome::Rendered(Surface::blank(16, 16)))
    }
}

/// Document backend serving fixed page layouts
#[derive(Default)]
pub struct FakeBackend {
    documents: RefCell<HashMap<PathBuf, (DocumentMetadata, Vec<PageDimensions>)>>,
    embedded: RefCell<HashMap<PathBuf, FakeEmbedded>>,
    renderer: Arc<FakeRenderer>,
}

impl FakeBackend {
    pub fn new(renderer: Arc<FakeRenderer>) -> Self {
        Self {
            renderer,
            ..Self::default()
        }
    }

    /// Register `pages` pages of 100x100 points at `path`
    pub fn add_document(&self, path: &Path, pages: usize) -> FakeEmbedded {
        self.documents.borrow_mut().insert(
            path.to_path_buf(),
            (
                DocumentMetadata {
                    title: Some("Test Document".into()),
                    author: Some("A. Author".into()),
                },
                vec![PageDimensions::new(100.0, 100.0); pages],
            ),
        );
        let embedded = FakeEmbedded::default();
        self.embedded
            .borrow_mut()
            .insert(path.to_path_buf(), embedded.clone());
        embedded
    }
}

impl DocumentBackend for FakeBackend {
    fn open(&self, path: &Path) -> Result<OpenedDocument, OpenError> {
        let (metadata, pages) = self
            .documents
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| OpenError::Backend {
                path: path.to_path_buf(),
                reason: "not a document".into(),
            })?;
        let embedded = self
            .embedded
            .borrow()
            .get(path)
            .cloned()
            .unwrap_or_default();
        Ok(OpenedDocument {
            metadata,
            pages,
            renderer: self.renderer.clone(),
            embedded: Box::new(embedded),
        })
    }
}

/// Searcher returning canned hits and recording queries
#[derive(Default)]
pub struct FakeSearcher {
    hits: Mutex<Vec<SearchHit>>,
    queries: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl FakeSearcher {
    pub fn set_hits(&self, hits: Vec<SearchHit>) {
        *self.hits.lock() = hits;
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

impl ContentSearcher for FakeSearcher {
    fn search(
        &self,
        request: &SearchRequest,
        _token: &CancellationToken,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.queries.lock().push(request.query.clone());
        if *self.fail.lock() {
            return Err(SearchError::Failed {
                status: Some(2),
                stderr: "rga: unreadable root".into(),
            });
        }
        Ok(self.hits.lock().clone())
    }
}

type FailWith = Box<dyn Fn() -> ExportError + Send + Sync>;

/// Highlight sink recording `(token, highlight count)` per post
#[derive(Default)]
pub struct RecordingSink {
    posts: Mutex<Vec<(String, usize)>>,
    fail_with: Option<FailWith>,
}

impl RecordingSink {
    pub fn failing(error: impl Fn() -> ExportError + Send + Sync + 'static) -> Self {
        Self {
            posts: Mutex::new(Vec::new()),
            fail_with: Some(Box::new(error)),
        }
    }

    pub fn posts(&self) -> Vec<(String, usize)> {
        self.posts.lock().clone()
    }
}

impl HighlightSink for RecordingSink {
    fn post(&self, token: &str, payload: &ExportPayload) -> Result<(), ExportError> {
        if let Some(fail) = &self.fail_with {
            return Err(fail());
        }
        self.posts.lock().push((token.to_string(), payload.len()));
        Ok(())
    }
}
