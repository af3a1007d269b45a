//! Reference Tracker
//!
//! Size-weighted LRU over virtual references. References are kept in recency
//! order; after a load, or a touch of a reference that is not strong, the
//! tracker walks from the most recent one, keeps references strong while the
//! accumulated size fits the budget and demotes every older one.
//!
//! Thread-safe via interior mutability using parking_lot::Mutex. Lock order
//! is tracker state first, then a reference's own state.

use super::{ReferenceId, Retainable, RetentionMode};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Default strong budget (512 MB)
pub const DEFAULT_BUDGET_BYTES: usize = 512 * 1024 * 1024;

/// Default size assumed for a value that cannot estimate itself (64 MB)
pub const DEFAULT_UNKNOWN_SIZE_BYTES: usize = 64 * 1024 * 1024;

/// Mode assigned to references that no longer fit the strong budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Demotion {
    #[default]
    Soft,
    Weak,
}

/// Tracker budget configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Bytes of strongly retained values
    pub budget_bytes: usize,
    pub demotion: Demotion,
    /// Bytes of softly retained values; overflow is demoted to weak
    pub soft_budget_bytes: usize,
    /// Size charged for a value whose size is unknown
    pub unknown_size_bytes: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            demotion: Demotion::Soft,
            soft_budget_bytes: DEFAULT_BUDGET_BYTES,
            unknown_size_bytes: DEFAULT_UNKNOWN_SIZE_BYTES,
        }
    }
}

impl TrackerConfig {
    pub fn with_budget(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            ..Default::default()
        }
    }

    pub fn demotion(mut self, demotion: Demotion) -> Self {
        self.demotion = demotion;
        self
    }

    pub fn soft_budget(mut self, soft_budget_bytes: usize) -> Self {
        self.soft_budget_bytes = soft_budget_bytes;
        self
    }

    pub fn unknown_size(mut self, unknown_size_bytes: usize) -> Self {
        self.unknown_size_bytes = unknown_size_bytes;
        self
    }
}

/// Tracker metrics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerMetrics {
    /// Accesses that found a resident value
    pub hits: u64,
    /// Accesses that had to run the loader
    pub misses: u64,
    /// Transitions into strong
    pub promotions: u64,
    /// Transitions out of strong
    pub demotions: u64,
    /// Entries dropped because their value was gone
    pub reclaimed: u64,
    /// Rebalances where the most recent reference alone exceeded the budget
    pub oversized: u64,
}

impl TrackerMetrics {
    /// Get hit rate as a percentage (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Snapshot of one tracked reference, most recent first in listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedReference {
    pub id: ReferenceId,
    pub mode: RetentionMode,
    pub estimated_bytes: usize,
}

struct TrackedEntry {
    estimated_bytes: usize,
    mode: RetentionMode,
    handle: Weak<dyn Retainable>,
}

/// Inner state for ReferenceTracker (protected by Mutex)
struct TrackerState {
    /// Most recently used references are at the "front"
    lru: LruCache<ReferenceId, TrackedEntry>,
    strong_bytes: usize,
    metrics: TrackerMetrics,
}

/// Budget-bounded retention policy shared by a family of references
pub struct ReferenceTracker {
    config: TrackerConfig,
    next_id: AtomicU64,
    state: Mutex<TrackerState>,
}

impl std::fmt::Debug for ReferenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceTracker")
            .field("config", &self.config)
            .field("tracked", &self.tracked_count())
            .field("strong_bytes", &self.strong_bytes())
            .finish()
    }
}

impl ReferenceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            state: Mutex::new(TrackerState {
                lru: LruCache::unbounded(),
                strong_bytes: 0,
                metrics: TrackerMetrics::default(),
            }),
        }
    }

    /// Tracker with default settings and the given strong budget
    pub fn with_budget(budget_bytes: usize) -> Self {
        Self::new(TrackerConfig::with_budget(budget_bytes))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Allocate an identifier for a new reference
    pub fn next_id(&self) -> ReferenceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Policy
    // =========================================================================

    /// Register a freshly produced value as the most recent reference.
    ///
    /// `estimated_bytes` of `None` is charged as `unknown_size_bytes`.
    pub fn track(
        &self,
        id: ReferenceId,
        estimated_bytes: Option<usize>,
        handle: Weak<dyn Retainable>,
    ) {
        let estimated_bytes = estimated_bytes.unwrap_or(self.config.unknown_size_bytes);
        // Declared before the guard so upgraded handles drop after unlocking
        let mut keep_alive = Vec::new();
        let mut state = self.state.lock();
        state.lru.put(
            id,
            TrackedEntry {
                estimated_bytes,
                mode: RetentionMode::Strong,
                handle,
            },
        );
        self.rebalance(&mut state, &mut keep_alive);
    }

    /// Mark a reference as just accessed.
    ///
    /// Returns false if the reference is not tracked.
    pub fn touch(&self, id: ReferenceId) -> bool {
        let mut keep_alive = Vec::new();
        let mut state = self.state.lock();
        let mode = match state.lru.get(&id) {
            Some(entry) => entry.mode,
            None => return false,
        };
        state.metrics.hits += 1;
        if mode != RetentionMode::Strong {
            self.rebalance(&mut state, &mut keep_alive);
        }
        true
    }

    /// Count an access that had to run the loader
    pub fn record_miss(&self) {
        self.state.lock().metrics.misses += 1;
    }

    /// Stop tracking a reference; returns false if it was not tracked
    pub fn untrack(&self, id: ReferenceId) -> bool {
        let mut state = self.state.lock();
        match state.lru.pop(&id) {
            Some(entry) => {
                if entry.mode == RetentionMode::Strong {
                    state.strong_bytes = state.strong_bytes.saturating_sub(entry.estimated_bytes);
                }
                true
            }
            None => false,
        }
    }

    /// Demote every soft reference to weak, releasing values no caller holds.
    ///
    /// Returns the number of values released.
    pub fn reclaim_soft(&self) -> usize {
        let mut keep_alive = Vec::new();
        let mut state = self.state.lock();
        let mut dead = Vec::new();
        for (id, entry) in state.lru.iter_mut() {
            if entry.mode != RetentionMode::Soft {
                continue;
            }
            let Some(handle) = entry.handle.upgrade() else {
                dead.push(*id);
                continue;
            };
            let resident = handle.set_retention(RetentionMode::Weak);
            keep_alive.push(handle);
            if resident {
                entry.mode = RetentionMode::Weak;
            } else {
                dead.push(*id);
            }
        }
        for id in &dead {
            state.lru.pop(id);
        }
        state.metrics.reclaimed += dead.len() as u64;
        debug!("Reclaimed {} soft references", dead.len());
        dead.len()
    }

    /// Recompute retention for every tracked reference, most recent first
    fn rebalance(&self, state: &mut TrackerState, keep_alive: &mut Vec<Arc<dyn Retainable>>) {
        let budget = self.config.budget_bytes;
        let mut strong_bytes = 0usize;
        let mut soft_bytes = 0usize;
        let mut over_budget = false;
        let mut first = true;
        let mut dead = Vec::new();
        let mut promotions = 0u64;
        let mut demotions = 0u64;

        for (id, entry) in state.lru.iter_mut() {
            let size = entry.estimated_bytes;
            let target = if !over_budget && (first || strong_bytes + size <= budget) {
                RetentionMode::Strong
            } else {
                over_budget = true;
                match self.config.demotion {
                    Demotion::Soft if soft_bytes + size <= self.config.soft_budget_bytes => {
                        RetentionMode::Soft
                    }
                    _ => RetentionMode::Weak,
                }
            };

            let Some(handle) = entry.handle.upgrade() else {
                dead.push(*id);
                continue;
            };
            let resident = handle.set_retention(target);
            keep_alive.push(handle);
            if !resident {
                dead.push(*id);
                continue;
            }

            if first && size > budget {
                warn!(
                    "Reference {} ({} bytes) exceeds the whole budget of {} bytes; keeping it alone",
                    id, size, budget
                );
                state.metrics.oversized += 1;
            }
            first = false;

            match target {
                RetentionMode::Strong => strong_bytes += size,
                RetentionMode::Soft => soft_bytes += size,
                _ => {}
            }
            if entry.mode != RetentionMode::Strong && target == RetentionMode::Strong {
                promotions += 1;
            } else if entry.mode == RetentionMode::Strong && target != RetentionMode::Strong {
                demotions += 1;
            }
            entry.mode = target;
        }

        for id in &dead {
            state.lru.pop(id);
        }
        state.strong_bytes = strong_bytes;
        state.metrics.promotions += promotions;
        state.metrics.demotions += demotions;
        state.metrics.reclaimed += dead.len() as u64;
        if demotions > 0 {
            debug!(
                "Rebalanced: {} demoted, {} strong bytes of {}",
                demotions, strong_bytes, budget
            );
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Sum of estimated sizes of strong references
    pub fn strong_bytes(&self) -> usize {
        self.state.lock().strong_bytes
    }

    pub fn tracked_count(&self) -> usize {
        self.state.lock().lru.len()
    }

    pub fn contains(&self, id: ReferenceId) -> bool {
        self.state.lock().lru.contains(&id)
    }

    /// Retention last assigned to a reference, without touching it
    pub fn mode_of(&self, id: ReferenceId) -> Option<RetentionMode> {
        self.state.lock().lru.peek(&id).map(|entry| entry.mode)
    }

    /// Every tracked reference, most recent first
    pub fn snapshot(&self) -> Vec<TrackedReference> {
        self.state
            .lock()
            .lru
            .iter()
            .map(|(id, entry)| TrackedReference {
                id: *id,
                mode: entry.mode,
                estimated_bytes: entry.estimated_bytes,
            })
            .collect()
    }

    /// Get a snapshot of tracker metrics
    pub fn metrics(&self) -> TrackerMetrics {
        self.state.lock().metrics.clone()
    }

    pub fn reset_metrics(&self) {
        self.state.lock().metrics = TrackerMetrics::default();
    }
}

impl Default for ReferenceTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}
