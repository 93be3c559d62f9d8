//! Live client accounting shared by the scheduler and its clients

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Tracks which clients are running against the current stage target
///
/// `live` counts clients that have not been asked to retire; `active`
/// counts tasks that still hold a slot (a retiring client stays active
/// until its in-flight iteration ends). The semaphore enforces
/// `max_concurrency` on `active`, so the peak can never exceed it.
pub struct Population {
    max: usize,
    target: AtomicUsize,
    live: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    admitted: AtomicUsize,
    clamp_warned: AtomicBool,
    ordinals: Mutex<OrdinalPool>,
    semaphore: Arc<Semaphore>,
}

#[derive(Default)]
struct OrdinalPool {
    free: BTreeSet<usize>,
    next: usize,
}

impl OrdinalPool {
    fn take(&mut self) -> usize {
        if let Some(ordinal) = self.free.pop_first() {
            return ordinal;
        }
        self.next += 1;
        self.next
    }
}

impl Population {
    /// Population capped at `max` simultaneously active clients
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            max,
            target: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            admitted: AtomicUsize::new(0),
            clamp_warned: AtomicBool::new(false),
            ordinals: Mutex::new(OrdinalPool::default()),
            semaphore: Arc::new(Semaphore::new(max)),
        })
    }

    /// Move the target, clamped to the ceiling; returns the applied value
    pub fn set_target(&self, target: usize) -> usize {
        let clamped = target.min(self.max);
        if clamped < target && !self.clamp_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                requested = target,
                max = self.max,
                "Stage target exceeds max_concurrency, clamping"
            );
        }
        self.target.store(clamped, Ordering::SeqCst);
        clamped
    }

    /// Admit one client if the ceiling allows it
    ///
    /// Reuses the smallest ordinal released by a finished client before
    /// handing out a fresh one.
    pub fn try_admit(self: &Arc<Self>) -> Option<ClientSlot> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        let ordinal = self.ordinals.lock().take();

        self.live.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.admitted.fetch_add(1, Ordering::SeqCst);

        Some(ClientSlot {
            population: Arc::clone(self),
            ordinal,
            _permit: permit,
            retired: false,
            reusable: true,
        })
    }

    /// Configured ceiling
    pub fn max(&self) -> usize {
        self.max
    }

    /// Current target
    pub fn target(&self) -> usize {
        self.target.load(Ordering::SeqCst)
    }

    /// Clients not asked to retire
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Clients still holding a slot
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active clients
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Clients admitted since the start of the run
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    fn try_retire_one(&self) -> bool {
        let target = self.target.load(Ordering::SeqCst);
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live > target).then(|| live - 1)
            })
            .is_ok()
    }
}

impl std::fmt::Debug for Population {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Population")
            .field("max", &self.max)
            .field("target", &self.target())
            .field("live", &self.live())
            .field("active", &self.active())
            .field("peak", &self.peak())
            .finish()
    }
}

/// One admitted client's claim on the population
///
/// Dropping the slot releases the concurrency permit and returns the
/// ordinal for reuse.
pub struct ClientSlot {
    population: Arc<Population>,
    ordinal: usize,
    _permit: OwnedSemaphorePermit,
    retired: bool,
    reusable: bool,
}

impl ClientSlot {
    /// Ordinal assigned to the client
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Retire if the population is above target
    ///
    /// At most `live - target` concurrent callers succeed.
    pub fn try_retire(&mut self) -> bool {
        if self.retired {
            return true;
        }
        self.retired = self.population.try_retire_one();
        self.retired
    }

    /// Never hand this ordinal to another client
    pub fn mark_unusable(&mut self) {
        self.reusable = false;
    }
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        if !self.retired {
            self.population.live.fetch_sub(1, Ordering::SeqCst);
        }
        self.population.active.fetch_sub(1, Ordering::SeqCst);
        if self.reusable {
            self.population.ordinals.lock().free.insert(self.ordinal);
        }
    }
}

impl std::fmt::Debug for ClientSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSlot")
            .field("ordinal", &self.ordinal)
            .field("retired", &self.retired)
            .finish()
    }
}
