//! Page render cache
//!
//! Per-page state machine driving render requests:
//!
//! ```text
//! Idle -> Requested -> Rendering -> Cached
//!            |             |
//!            +--> Aborting <+   (became invisible, waits for acknowledgement)
//! ```
//!
//! Every request carries a generation from [`Generations`]; a completion whose
//! generation is no longer current is discarded without touching state.
//! Surfaces live in a [`SurfaceCache`] and are only evicted by
//! [`PageRenderCache::evict`], never because a page scrolled away.

use crate::backend::RenderOutcome;
use crate::error::RenderError;
use pdf_viewer_cache::{CacheConfig, CacheStats, ConfigError, Surface, SurfaceCache};
use pdf_viewer_scheduler::{CancellationToken, Generations, JobPriority};
use std::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Idle,
    Requested,
    Rendering,
    Cached,
    Aborting,
}

/// Work order for the render backend
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub page: usize,
    pub generation: u64,
    pub priority: JobPriority,
    pub token: CancellationToken,
}

/// What [`PageRenderCache::complete`] did with a result
#[derive(Debug, PartialEq)]
pub enum RenderCompletion {
    /// Surface stored, page is `Cached`
    Stored,
    /// Generation mismatch, result dropped
    Stale,
    /// Request was cancelled, page is back to `Idle`
    Cancelled,
    /// Backend error, page is back to `Idle`
    Failed(RenderError),
}

#[derive(Debug)]
struct Slot {
    state: PageState,
    token: Option<CancellationToken>,
}

impl Slot {
    fn idle() -> Self {
        Self {
            state: PageState::Idle,
            token: None,
        }
    }

    fn reset(&mut self) {
        self.state = PageState::Idle;
        self.token = None;
    }
}

pub struct PageRenderCache {
    slots: Vec<Slot>,
    generations: Generations<usize>,
    surfaces: SurfaceCache,
    scale_factor: f64,
}

impl PageRenderCache {
    /// Fails only for a degenerate cache configuration
    pub fn new(page_count: usize, config: CacheConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            slots: (0..page_count).map(|_| Slot::idle()).collect(),
            generations: Generations::new(),
            surfaces: SurfaceCache::new(config)?,
            scale_factor: 1.0,
        })
    }

    pub fn page_count(&self) -> usize {
        self.slots.len()
    }

    pub fn state(&self, page: usize) -> Option<PageState> {
        self.slots.get(page).map(|slot| slot.state)
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn current_generation(&self, page: usize) -> u64 {
        self.generations.current(&page)
    }

    pub fn is_current(&self, page: usize, generation: u64) -> bool {
        self.generations.is_current(&page, generation)
    }

    /// Pages with a request that has not been resolved yet
    pub fn in_flight(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                matches!(
                    slot.state,
                    PageState::Requested | PageState::Rendering | PageState::Aborting
                )
            })
            .map(|(page, _)| page)
            .collect()
    }

    fn issue(&mut self, page: usize, priority: JobPriority) -> RenderRequest {
        let generation = self.generations.advance(&page);
        let token = CancellationToken::new();
        let slot = &mut self.slots[page];
        slot.state = PageState::Requested;
        slot.token = Some(token.clone());
        trace!(page, generation, ?priority, "render requested");
        RenderRequest {
            page,
            generation,
            priority,
            token,
        }
    }

    /// Request a render for a page that just entered the viewport
    ///
    /// Cached pages and pages with a live request are left alone. A page
    /// that is still aborting gets a fresh request that supersedes the old
    /// one.
    pub fn became_visible(&mut self, page: usize, now: Instant) -> Option<RenderRequest> {
        self.request(page, JobPriority::Visible, now)
    }

    /// Low-priority request for a page next to the visible range
    pub fn prefetch(&mut self, page: usize) -> Option<RenderRequest> {
        match self.state(page)? {
            PageState::Idle => Some(self.issue(page, JobPriority::Prefetch)),
            _ => None,
        }
    }

    fn request(
        &mut self,
        page: usize,
        priority: JobPriority,
        now: Instant,
    ) -> Option<RenderRequest> {
        match self.state(page)? {
            PageState::Idle | PageState::Aborting => Some(self.issue(page, priority)),
            PageState::Cached => {
                self.surfaces.touch(page, now);
                None
            }
            PageState::Requested | PageState::Rendering => None,
        }
    }

    /// Backend picked the job up
    pub fn mark_rendering(&mut self, page: usize, generation: u64) -> bool {
        if !self.is_current(page, generation) {
            return false;
        }
        match self.slots.get_mut(page) {
            Some(slot) if slot.state == PageState::Requested => {
                slot.state = PageState::Rendering;
                true
            }
            _ => false,
        }
    }

    /// Cancel the live request of a page that left the viewport
    ///
    /// Returns the generation being aborted. Cached surfaces stay.
    pub fn became_invisible(&mut self, page: usize) -> Option<u64> {
        let generation = self.generations.current(&page);
        let slot = self.slots.get_mut(page)?;
        match slot.state {
            PageState::Requested | PageState::Rendering => {
                if let Some(token) = &slot.token {
                    token.cancel();
                }
                slot.state = PageState::Aborting;
                trace!(page, generation, "render aborting");
                Some(generation)
            }
            _ => None,
        }
    }

    /// Apply a render result
    pub fn complete(
        &mut self,
        page: usize,
        generation: u64,
        result: Result<RenderOutcome, RenderError>,
        now: Instant,
    ) -> RenderCompletion {
        let awaiting = matches!(
            self.state(page),
            Some(PageState::Requested | PageState::Rendering | PageState::Aborting)
        );
        if !awaiting || !self.is_current(page, generation) {
            trace!(page, generation, "stale render result dropped");
            return RenderCompletion::Stale;
        }

        let slot = &mut self.slots[page];
        let cancelled = slot.state == PageState::Aborting
            || slot.token.as_ref().is_some_and(CancellationToken::is_cancelled);

        match result {
            Ok(RenderOutcome::Rendered(surface)) if !cancelled => {
                slot.state = PageState::Cached;
                slot.token = None;
                debug!(page, generation, bytes = surface.byte_size(), "page rendered");
                self.surfaces.insert(page, surface, now);
                RenderCompletion::Stored
            }
            Ok(_) => {
                slot.reset();
                trace!(page, generation, "render cancellation acknowledged");
                RenderCompletion::Cancelled
            }
            Err(err) => {
                slot.reset();
                warn!(page, generation, error = %err, "page render failed");
                RenderCompletion::Failed(err)
            }
        }
    }

    /// Acknowledge a request that was dropped before any worker ran it
    pub fn acknowledge_cancel(
        &mut self,
        page: usize,
        generation: u64,
        now: Instant,
    ) -> RenderCompletion {
        self.complete(page, generation, Ok(RenderOutcome::Cancelled), now)
    }

    /// Throw the current surface away and render again
    ///
    /// Returns the new request when the page is visible; otherwise the page
    /// goes back to `Idle`.
    pub fn request_refresh(&mut self, page: usize, visible: bool) -> Option<RenderRequest> {
        let slot = self.slots.get_mut(page)?;
        if let Some(token) = slot.token.take() {
            token.cancel();
        }
        slot.reset();
        self.surfaces.remove(page);
        if visible {
            Some(self.issue(page, JobPriority::Visible))
        } else {
            self.generations.advance(&page);
            None
        }
    }

    /// Switch to a new device scale factor
    ///
    /// Every surface is dropped and every outstanding request cancelled.
    /// Only `visible` pages are requested again. A factor that is not
    /// positive or equals the current one is ignored.
    pub fn set_scale_factor(&mut self, factor: f64, visible: &[usize]) -> Vec<RenderRequest> {
        if !factor.is_finite() || factor <= 0.0 || factor == self.scale_factor {
            return Vec::new();
        }
        debug!(from = self.scale_factor, to = factor, "scale factor changed");
        self.scale_factor = factor;
        self.surfaces.clear();

        for page in 0..self.slots.len() {
            if let Some(token) = self.slots[page].token.take() {
                token.cancel();
            }
            self.slots[page].reset();
            self.generations.advance(&page);
        }

        let page_count = self.slots.len();
        visible
            .iter()
            .filter(|&&page| page < page_count)
            .map(|&page| self.issue(page, JobPriority::Visible))
            .collect()
    }

    /// Cancel everything in flight (document close)
    pub fn cancel_all(&mut self) {
        for page in 0..self.slots.len() {
            let slot = &mut self.slots[page];
            if let Some(token) = slot.token.take() {
                token.cancel();
            }
            if slot.state != PageState::Cached {
                slot.reset();
                self.generations.advance(&page);
            }
        }
    }

    /// Enforce the surface budget, evicting only invisible pages
    ///
    /// Returns the pages that went back to `Idle`.
    pub fn evict(&mut self, is_visible: impl Fn(usize) -> bool) -> Vec<usize> {
        let evicted = self.surfaces.evict_to_fit(is_visible);
        for &page in &evicted {
            if let Some(slot) = self.slots.get_mut(page) {
                if slot.state == PageState::Cached {
                    slot.reset();
                }
            }
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "surfaces evicted");
        }
        evicted
    }

    pub fn surface(&mut self, page: usize, now: Instant) -> Option<&Surface> {
        self.surfaces.get(page, now)
    }

    pub fn thumbnail(&self, page: usize) -> Option<&Surface> {
        self.surfaces.thumbnail(page)
    }

    pub fn set_thumbnail_retention(&mut self, page: usize, retain: bool) {
        self.surfaces.set_thumbnail_retention(page, retain);
    }

    pub fn stats(&self) -> CacheStats {
        self.surfaces.stats()
    }
}
