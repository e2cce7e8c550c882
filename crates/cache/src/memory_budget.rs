//! Memory pressure classification
//!
//! Maps how full the surface budget is onto a coarse level the viewer can
//! log and react to.

/// Memory pressure level indicating cache health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Below 50% of the budget
    Low,
    /// 50-75%
    Moderate,
    /// 75-90%
    High,
    /// 90% and above
    Critical,
}

impl MemoryPressure {
    /// Classify a utilization ratio (0.0 to 1.0, may exceed 1.0 when over budget)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Classify `used` bytes against a `budget`
    pub fn from_usage(used: usize, budget: usize) -> Self {
        if budget == 0 {
            return MemoryPressure::Critical;
        }
        Self::from_utilization(used as f64 / budget as f64)
    }

    /// True at High or Critical
    pub fn needs_eviction(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}
