//! PDF Viewer Cache Library
//!
//! Main-loop cache of rendered page surfaces with LRU eviction, a byte and
//! page budget, and thumbnail retention.

pub mod config;
pub mod memory_budget;
pub mod store;
pub mod surface;

pub use config::{CacheConfig, ConfigError};
pub use memory_budget::MemoryPressure;
pub use store::{CacheEntry, CacheStats, SurfaceCache};
pub use surface::{Surface, BYTES_PER_PIXEL};
