//! Page surface cache with LRU eviction
//!
//! Holds the rendered surface of each page plus an optional downscaled
//! thumbnail. Owned by the main loop, so there is no locking. Eviction is
//! never automatic: the caller passes a visibility predicate to
//! [`SurfaceCache::evict_to_fit`] after inserting, and only surfaces of
//! invisible pages are candidates.

use crate::{CacheConfig, ConfigError, MemoryPressure, Surface};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Pages currently holding a full-resolution surface
    pub surface_count: usize,
    /// Pages holding only a retained thumbnail
    pub thumbnail_only_count: usize,
    pub memory_used: usize,
    pub memory_limit: usize,
    pub hits: u64,
    pub misses: u64,
    /// Full surfaces dropped to honour the budget
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }
}

/// Cached data for one page
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub page: usize,
    surface: Option<Surface>,
    thumbnail: Option<Surface>,
    /// While set, evicting the full surface keeps the thumbnail
    pub retain_thumbnail: bool,
    pub last_access: Instant,
}

impl CacheEntry {
    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn thumbnail(&self) -> Option<&Surface> {
        self.thumbnail.as_ref()
    }

    fn memory_size(&self) -> usize {
        self.surface.as_ref().map_or(0, Surface::byte_size)
            + self.thumbnail.as_ref().map_or(0, Surface::byte_size)
    }
}

/// Main-loop cache of rendered page surfaces
///
/// # Example
///
/// ```
/// use pdf_viewer_cache::{CacheConfig, Surface, SurfaceCache};
/// use std::time::Instant;
///
/// let mut cache = SurfaceCache::new(CacheConfig::default()).unwrap();
/// cache.insert(0, Surface::blank(612, 792), Instant::now());
///
/// assert!(cache.get(0, Instant::now()).is_some());
/// assert!(cache.thumbnail(0).is_some());
/// ```
#[derive(Debug)]
pub struct SurfaceCache {
    config: CacheConfig,
    entries: HashMap<usize, CacheEntry>,
    memory_used: usize,
    stats: CacheStats,
}

impl SurfaceCache {
    /// Build a cache. Fails only for a degenerate configuration.
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let stats = CacheStats {
            memory_limit: config.surface_budget_bytes,
            ..Default::default()
        };
        Ok(Self {
            config,
            entries: HashMap::new(),
            memory_used: 0,
            stats,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store the surface for `page`, replacing any previous one
    ///
    /// A thumbnail is derived when thumbnails are enabled.
    pub fn insert(&mut self, page: usize, surface: Surface, now: Instant) {
        self.drop_entry(page);

        let thumbnail = self
            .config
            .keep_thumbnails
            .then(|| surface.downscaled(self.config.thumbnail_max_dim));
        let entry = CacheEntry {
            page,
            surface: Some(surface),
            thumbnail,
            retain_thumbnail: self.config.keep_thumbnails,
            last_access: now,
        };

        self.memory_used += entry.memory_size();
        self.entries.insert(page, entry);
        self.refresh_stats();
    }

    /// Full-resolution surface for `page`, marking it recently used
    pub fn get(&mut self, page: usize, now: Instant) -> Option<&Surface> {
        match self.entries.get_mut(&page) {
            Some(entry) if entry.surface.is_some() => {
                entry.last_access = now;
                self.stats.hits += 1;
                entry.surface.as_ref()
            }
            _ => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Retained thumbnail for `page`, without touching LRU order
    pub fn thumbnail(&self, page: usize) -> Option<&Surface> {
        self.entries.get(&page).and_then(CacheEntry::thumbnail)
    }

    /// True if a full-resolution surface is cached for `page`
    pub fn contains(&self, page: usize) -> bool {
        self.entries
            .get(&page)
            .is_some_and(|entry| entry.surface.is_some())
    }

    pub fn entry(&self, page: usize) -> Option<&CacheEntry> {
        self.entries.get(&page)
    }

    /// Mark `page` as recently used without counting a hit
    pub fn touch(&mut self, page: usize, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&page) {
            entry.last_access = now;
        }
    }

    /// Toggle thumbnail retention for one page
    ///
    /// Clearing the flag on a thumbnail-only entry removes the entry.
    pub fn set_thumbnail_retention(&mut self, page: usize, retain: bool) {
        let Some(entry) = self.entries.get_mut(&page) else {
            return;
        };
        entry.retain_thumbnail = retain;
        if !retain && entry.surface.is_none() {
            self.drop_entry(page);
            self.refresh_stats();
        }
    }

    /// Remove everything cached for `page`
    pub fn remove(&mut self, page: usize) -> bool {
        let removed = self.drop_entry(page);
        self.refresh_stats();
        removed
    }

    /// Drop every surface and thumbnail (resolution change, document close)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.memory_used = 0;
        self.refresh_stats();
    }

    /// Evict full surfaces of invisible pages until within budget
    ///
    /// Candidates are taken oldest-access first. If the byte budget is still
    /// exceeded afterwards, retained thumbnails of invisible pages go next.
    /// Pages for which `is_visible` returns true are never touched, so the
    /// cache may stay over budget when the visible set alone exceeds it.
    /// Returns the pages whose full surface was evicted.
    pub fn evict_to_fit<F>(&mut self, is_visible: F) -> Vec<usize>
    where
        F: Fn(usize) -> bool,
    {
        let mut evicted = Vec::new();
        if !self.over_budget() {
            return evicted;
        }

        let mut candidates: Vec<(Instant, usize)> = self
            .entries
            .values()
            .filter(|entry| entry.surface.is_some() && !is_visible(entry.page))
            .map(|entry| (entry.last_access, entry.page))
            .collect();
        candidates.sort();

        for (_, page) in candidates {
            if !self.over_budget() {
                break;
            }
            self.evict_surface(page);
            evicted.push(page);
        }

        if self.over_byte_budget() {
            self.evict_thumbnails(&is_visible);
        }

        if self.over_budget() {
            debug!(
                memory_used = self.memory_used,
                limit = self.config.surface_budget_bytes,
                "visible pages alone exceed the surface budget"
            );
        }
        self.refresh_stats();
        evicted
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    pub fn memory_pressure(&self) -> MemoryPressure {
        MemoryPressure::from_usage(self.memory_used, self.config.surface_budget_bytes)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Pages with a full-resolution surface, in ascending order
    pub fn cached_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self
            .entries
            .values()
            .filter(|entry| entry.surface.is_some())
            .map(|entry| entry.page)
            .collect();
        pages.sort_unstable();
        pages
    }

    fn surface_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.surface.is_some())
            .count()
    }

    fn over_budget(&self) -> bool {
        self.over_byte_budget() || self.surface_count() > self.config.max_pages
    }

    fn over_byte_budget(&self) -> bool {
        self.memory_used > self.config.surface_budget_bytes
    }

    fn evict_thumbnails(&mut self, is_visible: impl Fn(usize) -> bool) {
        let mut candidates: Vec<(Instant, usize)> = self
            .entries
            .values()
            .filter(|entry| entry.surface.is_none() && !is_visible(entry.page))
            .map(|entry| (entry.last_access, entry.page))
            .collect();
        candidates.sort();

        let mut dropped = 0;
        for (_, page) in candidates {
            if !self.over_byte_budget() {
                break;
            }
            self.drop_entry(page);
            dropped += 1;
        }
        if dropped > 0 {
            debug!(count = dropped, "retained thumbnails evicted");
        }
    }

    fn evict_surface(&mut self, page: usize) {
        let Some(entry) = self.entries.get_mut(&page) else {
            return;
        };
        if let Some(surface) = entry.surface.take() {
            self.memory_used = self.memory_used.saturating_sub(surface.byte_size());
            self.stats.evictions += 1;
        }
        if !entry.retain_thumbnail {
            self.drop_entry(page);
        }
    }

    fn drop_entry(&mut self, page: usize) -> bool {
        match self.entries.remove(&page) {
            Some(entry) => {
                self.memory_used = self.memory_used.saturating_sub(entry.memory_size());
                true
            }
            None => false,
        }
    }

    fn refresh_stats(&mut self) {
        self.stats.surface_count = self.surface_count();
        self.stats.thumbnail_only_count = self.entries.len() - self.stats.surface_count;
        self.stats.memory_used = self.memory_used;
        self.stats.memory_limit = self.config.surface_budget_bytes;
    }
}
