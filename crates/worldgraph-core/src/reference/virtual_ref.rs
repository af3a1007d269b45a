//! Virtual Reference
//!
//! A handle whose value is produced on demand by a loader closure and may be
//! dropped at any time by its tracker. `get()` is transparent to callers: a
//! reclaimed value is simply loaded again.

use super::{EstimatedSize, LoadError, ReferenceId, ReferenceTracker, Retainable, RetentionMode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

type Loader<T> = Box<dyn Fn() -> Result<T, LoadError> + Send + Sync>;

/// What the reference currently owns
enum Held<T> {
    Absent,
    Strong(Arc<T>),
    Soft(Arc<T>),
    Weak(Weak<T>),
}

impl<T> Held<T> {
    fn upgrade(&self) -> Option<Arc<T>> {
        match self {
            Self::Absent => None,
            Self::Strong(value) | Self::Soft(value) => Some(Arc::clone(value)),
            Self::Weak(value) => value.upgrade(),
        }
    }

    fn mode(&self) -> RetentionMode {
        match self {
            Self::Absent => RetentionMode::Absent,
            Self::Strong(_) => RetentionMode::Strong,
            Self::Soft(_) => RetentionMode::Soft,
            Self::Weak(value) if value.strong_count() > 0 => RetentionMode::Weak,
            Self::Weak(_) => RetentionMode::Absent,
        }
    }
}

/// Lazily loaded, tracker-managed value
pub struct VirtualReference<T> {
    id: ReferenceId,
    name: String,
    tracker: Arc<ReferenceTracker>,
    loader: Loader<T>,
    state: Mutex<Held<T>>,
    /// Serializes loads so concurrent misses run the loader once
    load_lock: Mutex<()>,
    loads: AtomicU64,
    this: Weak<VirtualReference<T>>,
}

impl<T> std::fmt::Debug for VirtualReference<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualReference")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("retention", &self.state.lock().mode())
            .field("loads", &self.loads.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> VirtualReference<T>
where
    T: EstimatedSize + Send + Sync + 'static,
{
    /// Create an unloaded reference managed by `tracker`
    pub fn new<F>(name: impl Into<String>, tracker: Arc<ReferenceTracker>, loader: F) -> Arc<Self>
    where
        F: Fn() -> Result<T, LoadError> + Send + Sync + 'static,
    {
        let id = tracker.next_id();
        Arc::new_cyclic(|this| Self {
            id,
            name: name.into(),
            tracker,
            loader: Box::new(loader),
            state: Mutex::new(Held::Absent),
            load_lock: Mutex::new(()),
            loads: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    /// Return the value, loading it if it is not resident.
    ///
    /// A hit marks the reference as most recently used. A miss runs the
    /// loader, retains the result strongly and lets the tracker rebalance.
    pub fn get(&self) -> Result<Arc<T>, LoadError> {
        // Fast path: value resident
        if let Some(value) = self.resident() {
            self.tracker.touch(self.id);
            return Ok(value);
        }

        let _guard = self.load_lock.lock();

        // Double-check after acquiring the load lock
        if let Some(value) = self.resident() {
            self.tracker.touch(self.id);
            return Ok(value);
        }

        self.tracker.record_miss();
        trace!("Loading {}", self.name);
        let value = Arc::new((self.loader)()?);
        let size = value.estimated_memory_size();
        *self.state.lock() = Held::Strong(Arc::clone(&value));
        let count = self.loads.fetch_add(1, Ordering::Relaxed) + 1;
        if count > 1 {
            debug!("Reloaded {} (load #{})", self.name, count);
        }

        let handle: Weak<dyn Retainable> = self.this.clone();
        self.tracker.track(self.id, size, handle);
        Ok(value)
    }
}

impl<T> VirtualReference<T> {
    pub fn id(&self) -> ReferenceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracker(&self) -> &Arc<ReferenceTracker> {
        &self.tracker
    }

    /// The value if it is resident, without loading or touching it
    pub fn get_if_loaded(&self) -> Option<Arc<T>> {
        self.resident()
    }

    pub fn is_resident(&self) -> bool {
        self.state.lock().mode() != RetentionMode::Absent
    }

    /// Number of times the loader has produced a value
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Drop the held value and stop tracking; the next `get()` reloads
    pub fn unload(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), Held::Absent);
        self.tracker.untrack(self.id);
        if !matches!(previous, Held::Absent) {
            debug!("Unloaded {}", self.name);
        }
    }

    fn resident(&self) -> Option<Arc<T>> {
        self.state.lock().upgrade()
    }
}

impl<T: Send + Sync> Retainable for VirtualReference<T> {
    fn set_retention(&self, mode: RetentionMode) -> bool {
        let mut state = self.state.lock();
        let current = std::mem::replace(&mut *state, Held::Absent);
        *state = match (mode, current.upgrade()) {
            (_, None) | (RetentionMode::Absent, _) => Held::Absent,
            (RetentionMode::Strong, Some(value)) => Held::Strong(value),
            (RetentionMode::Soft, Some(value)) => Held::Soft(value),
            (RetentionMode::Weak, Some(value)) => Held::Weak(Arc::downgrade(&value)),
        };
        // `current` and the temporary upgrade drop here; a weak value with no
        // other holders is released at this point
        drop(current);
        state.mode() != RetentionMode::Absent
    }

    fn retention(&self) -> RetentionMode {
        self.state.lock().mode()
    }
}

impl<T> Drop for VirtualReference<T> {
    fn drop(&mut self) {
        self.tracker.untrack(self.id);
    }
}
