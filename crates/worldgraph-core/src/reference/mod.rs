//! Size-aware lazy references
//!
//! A [`VirtualReference`] wraps a value that is expensive to produce and can
//! be produced again at any time. A shared [`ReferenceTracker`] orders all
//! live references by recency and decides, from their estimated sizes and a
//! byte budget, which ones stay strongly retained.
//!
//! # Retention
//!
//! ```text
//! Strong  owns the value, counted against the budget
//! Soft    owns the value, dropped once the soft budget overflows
//! Weak    value lives only while some caller still holds it
//! Absent  nothing held; the next get() reloads
//! ```
//!
//! Eviction is explicit: demoting a reference drops its `Arc`, so memory is
//! released as soon as the last caller lets go.

pub mod tracker;
pub mod virtual_ref;

use serde::Serialize;
use thiserror::Error;

pub use tracker::{Demotion, ReferenceTracker, TrackedReference, TrackerConfig, TrackerMetrics};
pub use virtual_ref::VirtualReference;

/// Identifier assigned to a reference by its tracker
pub type ReferenceId = u64;

/// How strongly a reference currently holds its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionMode {
    Absent,
    Strong,
    Soft,
    Weak,
}

impl RetentionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Strong => "strong",
            Self::Soft => "soft",
            Self::Weak => "weak",
        }
    }
}

impl std::fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tracker's view of a reference.
///
/// Implementations must not call back into the tracker.
pub trait Retainable: Send + Sync {
    /// Switch to `mode`, returning whether a value is still resident.
    fn set_retention(&self, mode: RetentionMode) -> bool;

    fn retention(&self) -> RetentionMode;
}

/// Best-effort heap footprint of a value
pub trait EstimatedSize {
    /// `None` when the size cannot be estimated
    fn estimated_memory_size(&self) -> Option<usize>;
}

/// Failure to produce a referenced value
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{name} is unavailable: {source}")]
    Unavailable {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LoadError {
    pub fn unavailable(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Unavailable {
            name: name.into(),
            source: source.into(),
        }
    }
}
