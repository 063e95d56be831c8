use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct TrackerState {
    generation: u64,
    active: Option<Arc<AtomicBool>>,
}

/// Hands out one ticket per submission to a tool. Starting a new submission
/// cancels the previous ticket, so a late result can tell it is stale.
#[derive(Debug, Default)]
pub struct SubmissionTracker {
    state: Mutex<TrackerState>,
}

impl SubmissionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> SubmissionTicket<'_> {
        let mut state = self.lock();
        if let Some(previous) = state.active.take() {
            previous.store(true, Ordering::SeqCst);
        }
        state.generation += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        state.active = Some(cancelled.clone());
        SubmissionTicket {
            tracker: self,
            generation: state.generation,
            cancelled,
        }
    }

    /// Cancels the in-flight submission, if any.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        match state.active.take() {
            Some(active) => {
                active.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock().active.is_some()
    }

    fn finish(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.active = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the busy flag when dropped, unless a newer ticket took over.
#[derive(Debug)]
pub struct SubmissionTicket<'a> {
    tracker: &'a SubmissionTracker,
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

impl SubmissionTicket<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for SubmissionTicket<'_> {
    fn drop(&mut self) {
        self.tracker.finish(self.generation);
    }
}
