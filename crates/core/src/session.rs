//! Viewer session: the main loop and everything attached to it
//!
//! A [`Session`] owns the [`Viewer`] state, the task queue that runs
//! against it, the render worker pool and the search debouncer. The host
//! drives it by calling [`Session::pump`] (or one of the blocking helpers)
//! from its event loop.
//!
//! User actions either run immediately (scrolling, zoom) or are deferred to
//! the next turn. Deferred annotation actions are tied to the open document
//! and are skipped if it is closed before they run.

use crate::annotation::Origin;
use crate::geometry::{Point, Rect};
use crate::viewer::{Notice, Viewer, ViewerContext};
use crate::visibility::Viewport;
use pdf_viewer_scheduler::{
    Debouncer, JobScheduler, SchedulerError, TaskQueue, WorkerPool, WorkerPoolConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Inputs whose requests are debounced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    SearchEntry,
}

const WORKER_POLL: Duration = Duration::from_millis(10);
const MAX_TURNS: usize = 64;

pub struct Session {
    // Declared first so the workers stop before the queue goes away
    workers: WorkerPool,
    queue: TaskQueue<Viewer>,
    viewer: Viewer,
    search_debounce: Debouncer<Viewer, Control, String>,
}

impl Session {
    pub fn new(context: ViewerContext) -> Result<Self, SchedulerError> {
        let queue = TaskQueue::new(Arc::clone(&context.clock));
        let scheduler = JobScheduler::new();
        let viewer = Viewer::new(context, scheduler.clone(), queue.poster());

        let workers = WorkerPool::new(
            scheduler,
            viewer.render_executor(),
            WorkerPoolConfig::new(viewer.config().render_workers).with_poll_interval(WORKER_POLL),
        )?;

        let search_debounce =
            Debouncer::new(|viewer: &mut Viewer, _: &TaskQueue<Viewer>, query: String| {
                viewer.launch_content_search(query);
                Ok(())
            });

        Ok(Self {
            workers,
            queue,
            viewer,
            search_debounce,
        })
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn viewer_mut(&mut self) -> &mut Viewer {
        &mut self.viewer
    }

    pub fn queue(&self) -> &TaskQueue<Viewer> {
        &self.queue
    }

    pub fn worker_count(&self) -> usize {
        self.workers.num_workers()
    }

    // Main loop

    /// Run one turn of the task queue
    pub fn pump(&mut self) -> usize {
        self.queue.run_turn(&mut self.viewer)
    }

    /// Run turns until nothing is ready
    pub fn run_until_idle(&mut self) -> usize {
        self.queue.run_until_idle(&mut self.viewer, MAX_TURNS)
    }

    /// When the next timer is due, for hosts that sleep between turns
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// Keep running turns, waiting for posted results in between, until
    /// `done` holds or `timeout` of real time has passed
    pub fn run_until(&mut self, timeout: Duration, mut done: impl FnMut(&Viewer) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_until_idle();
            if done(&self.viewer) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.queue
                .wait_for_posted((deadline - now).min(Duration::from_millis(20)));
        }
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.viewer.take_notices()
    }

    // Documents

    pub fn open(&self, path: impl Into<PathBuf>) {
        self.open_at(path, None);
    }

    /// Open `path` on the next turn, optionally at 1-based `page`
    pub fn open_at(&self, path: impl Into<PathBuf>, page: Option<usize>) {
        let path = path.into();
        self.queue.schedule(move |viewer, _| {
            viewer.open_document(&path, page);
            Ok(())
        });
    }

    pub fn close(&self) {
        self.queue.schedule(|viewer, _| {
            viewer.close_document();
            Ok(())
        });
    }

    // Viewport

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewer.set_viewport(viewport);
    }

    pub fn scroll_to(&mut self, x: f64, y: f64) {
        let viewport = self.viewer.viewport();
        self.viewer
            .set_viewport(Viewport::new(x, y, viewport.width, viewport.height));
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        let viewport = self.viewer.viewport();
        self.viewer
            .set_viewport(Viewport::new(viewport.x, viewport.y, width, height));
    }

    pub fn go_to_page(&mut self, page: usize) {
        self.viewer.go_to_page(page);
    }

    pub fn set_scale_factor(&mut self, factor: f64) {
        self.viewer.set_scale_factor(factor);
    }

    pub fn refresh_page(&mut self, page: usize) {
        self.viewer.refresh_page(page);
    }

    // Search

    /// New text in the search entry
    ///
    /// In content mode the search is debounced; otherwise the text filters
    /// the file list and the annotation panel directly. Clearing the entry drops results and
    /// any pending or running search.
    pub fn search_input(&mut self, text: &str) {
        let query = text.trim().to_string();
        self.viewer.search_mut().query = query.clone();

        if query.is_empty() {
            self.search_debounce.cancel(&self.queue, &Control::SearchEntry);
            self.viewer.reset_search_results();
            return;
        }
        if self.viewer.search().content_mode {
            let delay = self.viewer.config().search.delay();
            self.search_debounce
                .trigger(&self.queue, Control::SearchEntry, query, delay);
        }
    }

    /// Switch between filename mode and content search
    ///
    /// Leaving content mode rescans the file roots.
    pub fn toggle_content_mode(&mut self) {
        let search = self.viewer.search_mut();
        search.content_mode = !search.content_mode;
        let (content_mode, query) = (search.content_mode, search.query.clone());
        debug!(content_mode, "search mode toggled");

        self.search_debounce.cancel(&self.queue, &Control::SearchEntry);
        self.viewer.reset_search_results();
        if !content_mode {
            self.viewer.refresh_file_list();
        } else if !query.is_empty() {
            let delay = self.viewer.config().search.delay();
            self.search_debounce
                .trigger(&self.queue, Control::SearchEntry, query, delay);
        }
    }

    /// Exact/fuzzy matching of names and annotation text; no-op in content mode
    pub fn toggle_filter_mode(&mut self) {
        let search = self.viewer.search_mut();
        if !search.content_mode {
            search.filter = search.filter.toggled();
        }
    }

    pub fn refresh_file_list(&mut self) {
        self.viewer.refresh_file_list();
    }

    /// Open the document of result `index` at its page
    pub fn activate_result(&self, index: usize) -> bool {
        let Some(hit) = self.viewer.search().results.get(index) else {
            return false;
        };
        self.open_at(hit.path.clone(), Some(hit.page));
        true
    }

    /// Open entry `index` of the filtered file list
    pub fn activate_file(&self, index: usize) -> bool {
        let Some(path) = self.viewer.file_matches().get(index).map(|path| path.to_path_buf())
        else {
            return false;
        };
        self.open(path);
        true
    }

    // Annotations

    pub fn add_highlight(
        &self,
        page: usize,
        rects: Vec<Rect>,
        text: Option<String>,
        origin: Origin,
    ) -> bool {
        self.on_document(move |viewer| {
            viewer.add_highlight(page, rects, text, origin);
        })
    }

    pub fn add_note(
        &self,
        page: usize,
        anchor: Point,
        content: Option<String>,
        origin: Origin,
    ) -> bool {
        self.on_document(move |viewer| {
            viewer.add_note(page, anchor, content, origin);
        })
    }

    pub fn delete_annotation(&self, id: impl Into<String>, origin: Origin) -> bool {
        let id = id.into();
        self.on_document(move |viewer| {
            viewer.delete_annotation(&id, origin);
        })
    }

    pub fn cycle_color(&self, id: impl Into<String>) -> bool {
        let id = id.into();
        self.on_document(move |viewer| {
            viewer.cycle_color(&id);
        })
    }

    pub fn edit_note(&self, id: impl Into<String>, content: Option<String>) -> bool {
        let id = id.into();
        self.on_document(move |viewer| {
            viewer.edit_note(&id, content);
        })
    }

    pub fn save_embedded(&self) -> bool {
        self.on_document(|viewer| {
            viewer.save_embedded();
        })
    }

    pub fn export_highlights(&mut self) {
        self.viewer.export_highlights();
    }

    /// Defer `work` to the next turn, dropping it if the document closes
    fn on_document(&self, work: impl FnOnce(&mut Viewer) + 'static) -> bool {
        let Some(handle) = self.viewer.document_handle() else {
            return false;
        };
        self.queue.schedule_guarded(handle, move |viewer, _| {
            work(viewer);
            Ok(())
        });
        true
    }
}
