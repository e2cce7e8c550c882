//! PDF Viewer Core Library
//!
//! Document model, visibility tracking, render-state bookkeeping and the
//! annotation, search and export services of the viewer.
//!
//! Everything here runs on the main loop except the pieces that are
//! explicitly `Send`: render backends, content searchers and highlight
//! sinks are called from worker threads and report back through the
//! session's task queue.

pub mod annotation;
pub mod backend;
pub mod config;
pub mod document;
pub mod embedded;
pub mod error;
pub mod export;
pub mod geometry;
pub mod render_cache;
pub mod runner;
pub mod search;
pub mod session;
pub mod store;
pub mod sync;
pub mod viewer;
pub mod visibility;

#[cfg(test)]
pub(crate) mod testing;

pub use annotation::{Annotation, AnnotationId, AnnotationKind, HighlightColor, Origin};
pub use backend::{DocumentBackend, OpenedDocument, RenderBackend, RenderOutcome};
pub use config::{ConfigError, ExportConfig, SearchConfig, ViewerConfig};
pub use document::{Document, DocumentId, DocumentMetadata, Page, PageDimensions};
pub use embedded::{EmbeddedDocument, EmbeddedHighlight, EmbeddedNote, NativeAnnotation};
pub use error::{ExportError, OpenError, RenderError, SearchError, StoreError};
pub use export::{ExportPayload, HighlightRecord, HighlightSink, ReadwiseExporter};
pub use geometry::{Point, Rect};
pub use render_cache::{PageRenderCache, PageState, RenderCompletion, RenderRequest};
pub use runner::{BackgroundRunner, RunnerError, RunnerHost};
pub use search::{ContentSearcher, QueryMode, RipgrepAll, SearchHit, SearchRequest};
pub use session::{Control, Session};
pub use store::{AnnotationStore, JsonAnnotationStore};
pub use sync::{AnnotationSynchronizer, WriteOutcome};
pub use viewer::{Channel, Notice, NoticeLevel, SearchState, Viewer, ViewerContext};
pub use visibility::{Layout, Viewport, VisibilityDelta, VisibilityTracker};
