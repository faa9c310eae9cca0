//! Process-wide run permit.

use crate::core::PipelineKind;
use crate::session::{Generation, SessionGuard};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Holder {
    id: u64,
    kind: PipelineKind,
    generation: Generation,
}

/// Allows one run of any kind at a time.
///
/// A holder whose generation was superseded no longer blocks: its writes are
/// void anyway, and the call it awaits cannot be cancelled.
#[derive(Debug, Default, Clone)]
pub struct RunLock {
    holder: Arc<Mutex<Option<Holder>>>,
    next_id: Arc<AtomicU64>,
}

impl RunLock {
    /// Creates an unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the permit, or returns `None` while a live run holds it.
    #[must_use]
    pub fn try_acquire(
        &self,
        kind: PipelineKind,
        generation: Generation,
        session: &SessionGuard,
    ) -> Option<RunPermit> {
        let mut holder = self.holder.lock();
        if let Some(current) = *holder {
            if session.is_current(current.generation) {
                debug!(
                    requested = %kind,
                    holder = %current.kind,
                    "Run refused, another run is in flight"
                );
                return None;
            }
            debug!(holder = %current.kind, generation = current.generation, "Superseding stale run");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *holder = Some(Holder {
            id,
            kind,
            generation,
        });
        Some(RunPermit {
            lock: self.clone(),
            id,
        })
    }

    /// Returns the kind and generation of the current holder.
    #[must_use]
    pub fn in_flight(&self) -> Option<(PipelineKind, Generation)> {
        self.holder.lock().map(|holder| (holder.kind, holder.generation))
    }
}

/// Held while a run executes; released on drop.
#[derive(Debug)]
pub struct RunPermit {
    lock: RunLock,
    id: u64,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let mut holder = self.lock.holder.lock();
        if holder.is_some_and(|current| current.id == self.id) {
            *holder = None;
        }
    }
}
