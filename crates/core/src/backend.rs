//! Contracts of the document-format backend
//!
//! The viewer never parses documents itself. A [`DocumentBackend`] opens a
//! file and hands back page sizes, a thread-safe [`RenderBackend`] and the
//! document's embedded annotation layer.

use crate::document::{DocumentMetadata, PageDimensions};
use crate::embedded::EmbeddedDocument;
use crate::error::{OpenError, RenderError};
use pdf_viewer_cache::Surface;
use pdf_viewer_scheduler::CancellationToken;
use std::path::Path;
use std::sync::Arc;

/// Result of a render call that did not fail
#[derive(Debug)]
pub enum RenderOutcome {
    Rendered(Surface),
    /// The token was cancelled before or during rendering. Not an error.
    Cancelled,
}

/// Produces page surfaces on worker threads
///
/// Implementations must poll `token` and return
/// [`RenderOutcome::Cancelled`] once it is set.
pub trait RenderBackend: Send + Sync {
    fn render(
        &self,
        page: usize,
        scale: f64,
        token: &CancellationToken,
    ) -> Result<RenderOutcome, RenderError>;
}

/// Everything the viewer needs from an opened file
pub struct OpenedDocument {
    pub metadata: DocumentMetadata,
    pub pages: Vec<PageDimensions>,
    pub renderer: Arc<dyn RenderBackend>,
    pub embedded: Box<dyn EmbeddedDocument>,
}

pub trait DocumentBackend {
    fn open(&self, path: &Path) -> Result<OpenedDocument, OpenError>;
}
