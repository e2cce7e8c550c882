//! Main-loop viewer state
//!
//! [`Viewer`] is the state every deferred task and posted result runs
//! against. It owns the open document, its render cache and annotation
//! synchronizer, and the search state. Worker threads never see it; they
//! post closures that call back into it on the next turn.

use crate::annotation::{Annotation, HighlightColor, Origin};
use crate::backend::{DocumentBackend, RenderBackend, RenderOutcome};
use crate::config::ViewerConfig;
use crate::document::{Document, DocumentId};
use crate::error::{ExportError, OpenError, RenderError, SearchError};
use crate::export::{self, ExportPayload, HighlightSink};
use crate::geometry::{Point, Rect};
use crate::render_cache::{PageRenderCache, RenderCompletion, RenderRequest};
use crate::runner::{BackgroundRunner, RunnerError, RunnerHost};
use crate::search::{self, ContentSearcher, QueryMode, SearchHit, SearchRequest};
use crate::store::AnnotationStore;
use crate::sync::AnnotationSynchronizer;
use crate::visibility::{Viewport, VisibilityTracker};
use parking_lot::Mutex;
use pdf_viewer_scheduler::{
    CancellationToken, Clock, Job, JobExecutor, JobScheduler, LiveHandle, Liveness, Poster,
};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Collaborators a viewer is built from
///
/// Each component receives only the pieces it uses.
pub struct ViewerContext {
    pub config: ViewerConfig,
    pub clock: Arc<dyn Clock>,
    pub backend: Rc<dyn DocumentBackend>,
    pub store: Rc<dyn AnnotationStore>,
    pub searcher: Arc<dyn ContentSearcher>,
    pub exporter: Arc<dyn HighlightSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-visible message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Keys for background launches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    ContentSearch,
    Export,
}

#[derive(Debug, Default)]
pub struct SearchState {
    pub content_mode: bool,
    pub query: String,
    pub results: Vec<SearchHit>,
    pub filter: QueryMode,
    /// PDFs found under the file roots, listed in filename mode
    pub files: Vec<PathBuf>,
}

/// Renderer the worker threads should use right now
#[derive(Clone)]
struct ActiveRenderer {
    document: DocumentId,
    backend: Arc<dyn RenderBackend>,
    scale: f64,
}

type RendererSlot = Arc<Mutex<Option<ActiveRenderer>>>;

struct OpenDocument {
    liveness: Liveness,
    document: Document,
    render_cache: PageRenderCache,
    annotations: AnnotationSynchronizer,
}

pub struct Viewer {
    config: ViewerConfig,
    clock: Arc<dyn Clock>,
    backend: Rc<dyn DocumentBackend>,
    store: Rc<dyn AnnotationStore>,
    searcher: Arc<dyn ContentSearcher>,
    exporter: Arc<dyn HighlightSink>,
    scheduler: JobScheduler,
    renderer: RendererSlot,
    poster: Poster<Viewer>,
    tracker: VisibilityTracker,
    viewport: Viewport,
    scale_factor: f64,
    document: Option<OpenDocument>,
    next_document: DocumentId,
    runner: BackgroundRunner<Channel>,
    search: SearchState,
    redraw: Vec<usize>,
    notices: VecDeque<Notice>,
}

impl RunnerHost<Channel> for Viewer {
    fn runner(&mut self) -> &mut BackgroundRunner<Channel> {
        &mut self.runner
    }
}

impl Viewer {
    pub(crate) fn new(context: ViewerContext, scheduler: JobScheduler, poster: Poster<Viewer>) -> Self {
        let ViewerContext {
            mut config,
            clock,
            backend,
            store,
            searcher,
            exporter,
        } = context;

        let warnings = config.normalize();
        let tracker = VisibilityTracker::new(config.layout.clone());
        let mut viewer = Self {
            config,
            clock,
            backend,
            store,
            searcher,
            exporter,
            scheduler,
            renderer: Arc::new(Mutex::new(None)),
            poster,
            tracker,
            viewport: Viewport::default(),
            scale_factor: 1.0,
            document: None,
            next_document: 1,
            runner: BackgroundRunner::new(),
            search: SearchState::default(),
            redraw: Vec::new(),
            notices: VecDeque::new(),
        };
        for warning in warnings {
            viewer.notify(NoticeLevel::Warning, warning);
        }
        viewer
    }

    /// Worker callback that renders one job and posts the result back
    pub(crate) fn render_executor(&self) -> JobExecutor {
        let slot = Arc::clone(&self.renderer);
        let poster = self.poster.clone();
        Arc::new(move |job: &Job, token: &CancellationToken| {
            let Some(active) = slot.lock().clone() else {
                return;
            };
            let (document, page, generation) = (job.owner, job.page, job.generation);

            if token.is_cancelled() || active.document != document {
                post_finished(&poster, document, page, generation, Ok(RenderOutcome::Cancelled));
                return;
            }
            let _ = poster.post(move |viewer: &mut Viewer, _| {
                viewer.render_started(document, page, generation);
                Ok(())
            });

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                active.backend.render(page, active.scale, token)
            }))
            .unwrap_or_else(|_| Err(RenderError::Backend("renderer panicked".into())));
            post_finished(&poster, document, page, generation, result);
        })
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref().map(|open| &open.document)
    }

    pub fn render_cache(&self) -> Option<&PageRenderCache> {
        self.document.as_ref().map(|open| &open.render_cache)
    }

    pub fn render_cache_mut(&mut self) -> Option<&mut PageRenderCache> {
        self.document.as_mut().map(|open| &mut open.render_cache)
    }

    pub fn annotations(&self) -> Option<&AnnotationSynchronizer> {
        self.document.as_ref().map(|open| &open.annotations)
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub(crate) fn search_mut(&mut self) -> &mut SearchState {
        &mut self.search
    }

    /// Liveness handle of the open document, for guarded tasks
    pub fn document_handle(&self) -> Option<LiveHandle> {
        self.document.as_ref().map(|open| open.liveness.handle())
    }

    pub fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Info => info!(%message, "notice"),
            NoticeLevel::Warning => warn!(%message, "notice"),
            NoticeLevel::Error => error!(%message, "notice"),
        }
        self.notices.push_back(Notice { level, message });
    }

    pub fn pending_notices(&self) -> usize {
        self.notices.len()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// Pages whose rendering or annotations changed since the last call
    pub fn take_redraw(&mut self) -> Vec<usize> {
        let mut pages = std::mem::take(&mut self.redraw);
        if let Some(open) = &mut self.document {
            pages.extend(open.annotations.take_redraw());
        }
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    // Documents

    /// Replace the open document with `path`
    ///
    /// `page` is 1-based and only honoured when it lies within the
    /// document. Returns `false` (after raising a notice) on failure.
    pub fn open_document(&mut self, path: &Path, page: Option<usize>) -> bool {
        self.close_document();
        match self.load(path) {
            Ok(()) => {
                let count = self.document().map_or(0, Document::page_count);
                match page {
                    Some(page) if page > 0 && page <= count => self.go_to_page(page - 1),
                    _ => self.refresh_visibility(),
                }
                true
            }
            Err(err) => {
                self.notify(NoticeLevel::Error, err.to_string());
                false
            }
        }
    }

    fn load(&mut self, path: &Path) -> Result<(), OpenError> {
        if !path.exists() {
            return Err(OpenError::Missing(path.to_path_buf()));
        }
        let opened = self.backend.open(path)?;
        let id = self.next_document;
        self.next_document += 1;

        let document = Document::new(id, path, opened.metadata, &opened.pages);
        let mut render_cache = PageRenderCache::new(document.page_count(), self.config.cache.clone())?;
        render_cache.set_scale_factor(self.scale_factor, &[]);
        let (annotations, load_errors) = AnnotationSynchronizer::open(
            path,
            document.page_count(),
            Rc::clone(&self.store),
            opened.embedded,
        );
        for err in load_errors {
            self.notify(NoticeLevel::Warning, format!("Annotations: {err}"));
        }

        *self.renderer.lock() = Some(ActiveRenderer {
            document: id,
            backend: opened.renderer,
            scale: self.scale_factor,
        });
        info!(path = %path.display(), pages = document.page_count(), "document opened");
        self.document = Some(OpenDocument {
            liveness: Liveness::new(),
            document,
            render_cache,
            annotations,
        });
        Ok(())
    }

    pub fn close_document(&mut self) {
        let Some(mut open) = self.document.take() else {
            return;
        };
        open.liveness.revoke();
        open.render_cache.cancel_all();
        self.scheduler.clear();
        *self.renderer.lock() = None;
        if open.annotations.is_dirty() {
            self.notify(
                NoticeLevel::Warning,
                format!(
                    "Unsaved annotation changes in {} were discarded",
                    open.document.path().display()
                ),
            );
        }
        debug!(path = %open.document.path().display(), "document closed");
    }

    // Viewport and rendering

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.refresh_visibility();
    }

    /// Scroll so the top of `page` (0-based) is at the top of the viewport
    pub fn go_to_page(&mut self, page: usize) {
        let Some(open) = &self.document else {
            return;
        };
        if let Some(extent) = self.tracker.page_extent(open.document.pages(), page) {
            self.viewport.y = extent.y0;
        }
        self.refresh_visibility();
    }

    /// Recompute visibility, then cancel and request renders accordingly
    pub fn refresh_visibility(&mut self) {
        let now = self.clock.now();
        let Some(open) = &mut self.document else {
            return;
        };

        let delta = self.tracker.update(open.document.pages(), &self.viewport);
        open.document.apply_visibility(&delta, now);
        open.document.touch_visible(now);

        let id = open.document.id();
        for &page in &delta.became_invisible {
            abort_page(&self.scheduler, &mut open.render_cache, page, now);
        }
        for &page in &delta.became_visible {
            if let Some(request) = open.render_cache.became_visible(page, now) {
                submit(&self.scheduler, id, request);
            }
        }

        let visible = open.document.visible_pages();
        let window = match (visible.first(), visible.last()) {
            (Some(&first), Some(&last)) => {
                let radius = self.config.prefetch_radius;
                let end = (last + radius).min(open.document.page_count().saturating_sub(1));
                Some(first.saturating_sub(radius)..=end)
            }
            _ => None,
        };
        // Prefetches that fell out of the window
        for page in open.render_cache.in_flight() {
            let in_window = window.as_ref().is_some_and(|window| window.contains(&page));
            if !in_window && !open.document.is_visible(page) {
                abort_page(&self.scheduler, &mut open.render_cache, page, now);
            }
        }
        if let Some(window) = window {
            for page in window.filter(|page| !open.document.is_visible(*page)) {
                if let Some(request) = open.render_cache.prefetch(page) {
                    submit(&self.scheduler, id, request);
                }
            }
        }

        let document = &open.document;
        let evicted = open.render_cache.evict(|page| document.is_visible(page));
        self.redraw.extend(evicted);
        if !delta.is_empty() {
            debug!(
                visible = ?delta.became_visible,
                invisible = ?delta.became_invisible,
                "visibility changed"
            );
        }
    }

    /// Change the device scale factor; ignored for 0 or the current value
    pub fn set_scale_factor(&mut self, factor: f64) {
        if !factor.is_finite() || factor <= 0.0 || factor == self.scale_factor {
            return;
        }
        self.scale_factor = factor;
        if let Some(active) = self.renderer.lock().as_mut() {
            active.scale = factor;
        }
        let Some(open) = &mut self.document else {
            return;
        };
        self.scheduler.clear();
        let visible = open.document.visible_pages();
        let id = open.document.id();
        for request in open.render_cache.set_scale_factor(factor, &visible) {
            submit(&self.scheduler, id, request);
        }
        self.redraw.extend(visible);
    }

    /// Drop and re-render one page
    pub fn refresh_page(&mut self, page: usize) {
        let Some(open) = &mut self.document else {
            return;
        };
        self.scheduler.cancel_page_jobs(page);
        let visible = open.document.is_visible(page);
        if let Some(request) = open.render_cache.request_refresh(page, visible) {
            submit(&self.scheduler, open.document.id(), request);
        }
    }

    fn render_started(&mut self, document: DocumentId, page: usize, generation: u64) {
        if let Some(open) = self.open_for(document) {
            open.render_cache.mark_rendering(page, generation);
        }
    }

    fn render_finished(
        &mut self,
        document: DocumentId,
        page: usize,
        generation: u64,
        result: Result<RenderOutcome, RenderError>,
    ) {
        let now = self.clock.now();
        let Some(open) = self.open_for(document) else {
            debug!(document, page, "render result for closed document dropped");
            return;
        };
        match open.render_cache.complete(page, generation, result, now) {
            RenderCompletion::Stored => {
                let doc = &open.document;
                let evicted = open.render_cache.evict(|page| doc.is_visible(page));
                self.redraw.push(page);
                self.redraw.extend(evicted);
            }
            RenderCompletion::Failed(err) => self.notify(
                NoticeLevel::Warning,
                format!("Failed to render page {}: {err}", page + 1),
            ),
            RenderCompletion::Stale | RenderCompletion::Cancelled => {}
        }
    }

    fn open_for(&mut self, document: DocumentId) -> Option<&mut OpenDocument> {
        self.document
            .as_mut()
            .filter(|open| open.document.id() == document)
    }

    // Content search

    pub(crate) fn launch_content_search(&mut self, query: String) {
        if !self.search.content_mode {
            return;
        }
        let request = SearchRequest {
            query,
            roots: self.config.search.resolved_roots(),
            max_count: self.config.search.max_count,
            timeout: self.config.search.timeout(),
        };
        let searcher = Arc::clone(&self.searcher);
        self.runner.launch(
            &self.poster,
            Channel::ContentSearch,
            "search",
            move |token| searcher.search(&request, token),
            |viewer: &mut Viewer, _, result| viewer.search_finished(result),
        );
    }

    fn search_finished(&mut self, result: Result<Result<Vec<SearchHit>, SearchError>, RunnerError>) {
        if !self.search.content_mode {
            return;
        }
        match result {
            Ok(Ok(hits)) => {
                debug!(count = hits.len(), "content search finished");
                self.search.results = hits;
            }
            Ok(Err(SearchError::Cancelled)) => {}
            Ok(Err(err)) => self.notify(NoticeLevel::Warning, format!("Search failed: {err}")),
            Err(err) => self.notify(NoticeLevel::Error, format!("Search failed: {err}")),
        }
    }

    /// Drop results and discard any search still running
    pub(crate) fn reset_search_results(&mut self) {
        self.runner.invalidate(&Channel::ContentSearch);
        self.search.results.clear();
    }

    /// Display lines for the current results
    pub fn result_lines(&self) -> Vec<String> {
        let preview = self.config.search.preview_chars;
        self.search
            .results
            .iter()
            .map(|hit| hit.display(preview))
            .collect()
    }

    /// Rescan the file roots for the filename picker
    pub fn refresh_file_list(&mut self) {
        let roots = self.config.search.resolved_file_roots();
        self.search.files = search::scan_pdfs(&roots, self.config.search.scan_depth);
    }

    /// Picker entries matching the current query, in list order
    pub fn file_matches(&self) -> Vec<&Path> {
        if self.search.content_mode {
            return Vec::new();
        }
        search::filter_files(&self.search.files, &self.search.query, self.search.filter)
    }

    /// Annotation panel listing filtered by the current query
    pub fn filtered_annotations(&self) -> Vec<&Annotation> {
        let Some(open) = &self.document else {
            return Vec::new();
        };
        let query = self.search.query.trim();
        open.annotations
            .list_all()
            .into_iter()
            .filter(|annotation| {
                query.is_empty()
                    || self
                        .search
                        .filter
                        .matches(query, annotation.text().unwrap_or_default())
            })
            .collect()
    }

    // Annotations

    pub fn add_highlight(
        &mut self,
        page: usize,
        rects: Vec<Rect>,
        text: Option<String>,
        origin: Origin,
    ) -> Option<String> {
        self.add_annotation(Annotation::highlight(page, rects, text, origin))
    }

    /// Create a note; a note without content is not created
    pub fn add_note(
        &mut self,
        page: usize,
        anchor: Point,
        content: Option<String>,
        origin: Origin,
    ) -> Option<String> {
        let content = content.filter(|content| !content.trim().is_empty())?;
        self.add_annotation(Annotation::note(page, anchor, Some(content), origin))
    }

    fn add_annotation(&mut self, annotation: Annotation) -> Option<String> {
        let open = self.document.as_mut()?;
        let id = annotation.id().to_string();
        match open.annotations.add(annotation) {
            Ok(()) => Some(id),
            Err(err) => {
                self.notify(NoticeLevel::Error, format!("Failed to save annotation: {err}"));
                None
            }
        }
    }

    pub fn delete_annotation(&mut self, id: &str, origin: Origin) -> bool {
        let Some(open) = &mut self.document else {
            return false;
        };
        match open.annotations.remove(id, origin) {
            Ok(outcome) => {
                if let Some(err) = outcome.save_warning {
                    self.notify(
                        NoticeLevel::Warning,
                        format!("Annotation deleted but document not saved: {err}"),
                    );
                }
                true
            }
            Err(err) => {
                self.notify(NoticeLevel::Error, format!("Failed to delete annotation: {err}"));
                false
            }
        }
    }

    pub fn cycle_color(&mut self, id: &str) -> Option<HighlightColor> {
        let open = self.document.as_mut()?;
        match open.annotations.update_color(id) {
            Ok(color) => {
                self.notify(NoticeLevel::Info, format!("Color: {color}"));
                Some(color)
            }
            Err(err) => {
                self.notify(NoticeLevel::Error, format!("Failed to change color: {err}"));
                None
            }
        }
    }

    pub fn edit_note(&mut self, id: &str, content: Option<String>) -> bool {
        let Some(open) = &mut self.document else {
            return false;
        };
        match open.annotations.update_note(id, content) {
            Ok(outcome) => {
                if let Some(err) = outcome.save_warning {
                    self.notify(
                        NoticeLevel::Warning,
                        format!("Note updated but document not saved: {err}"),
                    );
                }
                true
            }
            Err(err) => {
                self.notify(NoticeLevel::Error, format!("Failed to update note: {err}"));
                false
            }
        }
    }

    pub fn save_embedded(&mut self) -> bool {
        let Some(open) = &mut self.document else {
            return false;
        };
        let path = open.document.path().to_path_buf();
        match open.annotations.save_embedded() {
            Ok(()) => {
                self.notify(NoticeLevel::Info, format!("Saved {}", path.display()));
                true
            }
            Err(err) => {
                self.notify(NoticeLevel::Error, format!("Failed to save document: {err}"));
                false
            }
        }
    }

    // Export

    /// Export the open document's highlights in the background
    ///
    /// The token is checked first; without one nothing is launched.
    pub fn export_highlights(&mut self) {
        let token = match export::token_from_env(&self.config.export.token_env) {
            Ok(token) => token,
            Err(err) => {
                self.notify(NoticeLevel::Error, err.user_message());
                return;
            }
        };
        let Some(open) = &self.document else {
            self.notify(NoticeLevel::Warning, "No document open");
            return;
        };

        let document = &open.document;
        let payload = ExportPayload::from_annotations(
            &document.display_title(),
            document.metadata().author.as_deref(),
            open.annotations.list_all(),
        );
        let exporter = Arc::clone(&self.exporter);
        self.runner.launch(
            &self.poster,
            Channel::Export,
            "export",
            move |_| export::export(exporter.as_ref(), &token, &payload),
            |viewer: &mut Viewer, _, result| viewer.export_finished(result),
        );
    }

    fn export_finished(&mut self, result: Result<Result<usize, ExportError>, RunnerError>) {
        match result {
            Ok(Ok(0)) => self.notify(NoticeLevel::Info, "No highlights to export"),
            Ok(Ok(count)) => {
                self.notify(NoticeLevel::Info, format!("Exported {count} highlights"))
            }
            Ok(Err(err)) => {
                warn!(error = %err, "export failed");
                self.notify(NoticeLevel::Error, err.user_message());
            }
            Err(err) => self.notify(NoticeLevel::Error, format!("Export failed: {err}")),
        }
    }

    pub fn document_path(&self) -> Option<PathBuf> {
        self.document().map(|document| document.path().to_path_buf())
    }
}

fn submit(scheduler: &JobScheduler, document: DocumentId, request: RenderRequest) {
    scheduler.submit_with_token(
        request.priority,
        document,
        request.page,
        request.generation,
        request.token,
    );
}

/// Cancel the live request of `page`, acknowledging jobs no worker took yet
fn abort_page(scheduler: &JobScheduler, cache: &mut PageRenderCache, page: usize, now: Instant) {
    if cache.became_invisible(page).is_some() {
        for job in scheduler.cancel_page_jobs(page) {
            cache.acknowledge_cancel(job.page, job.generation, now);
        }
    }
}

fn post_finished(
    poster: &Poster<Viewer>,
    document: DocumentId,
    page: usize,
    generation: u64,
    result: Result<RenderOutcome, RenderError>,
) {
    let posted = poster.post(move |viewer: &mut Viewer, _| {
        viewer.render_finished(document, page, generation, result);
        Ok(())
    });
    if posted.is_err() {
        debug!(page, "main loop gone, render result dropped");
    }
}
