//! Session generation guard.
//!
//! Collaborator calls cannot be cancelled once issued. Instead, every write
//! a run performs carries the generation that was live when the run was
//! dispatched, and is dropped if a destructive operation (import, hard
//! reset) has advanced the generation since.

use crate::errors::StaleSessionDrop;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A session generation.
pub type Generation = u64;

/// Generation counter and write barrier.
#[derive(Debug, Default)]
pub struct SessionGuard {
    live: AtomicU64,
    barrier: RwLock<()>,
}

impl SessionGuard {
    /// Creates a guard at generation 0.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the live generation.
    #[must_use]
    pub fn current(&self) -> Generation {
        self.live.load(Ordering::SeqCst)
    }

    /// Returns true if `generation` is still live.
    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }

    /// Advances and returns the live generation.
    ///
    /// Waits for guarded writes already in progress to finish, so once this
    /// returns no write from an older generation can apply.
    pub async fn next_generation(&self) -> Generation {
        let _exclusive = self.barrier.write().await;
        let next = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation = next, "Session generation advanced");
        next
    }

    /// Runs `writes` only if `generation` is still live.
    ///
    /// The generation cannot advance while `writes` runs.
    pub async fn commit<F, T>(&self, generation: Generation, writes: F) -> Result<T, StaleSessionDrop>
    where
        F: Future<Output = T>,
    {
        let _shared = self.barrier.read().await;
        let live = self.current();
        if live != generation {
            debug!(issued = generation, live, "Dropping stale write");
            return Err(StaleSessionDrop {
                issued: generation,
                live,
            });
        }
        Ok(writes.await)
    }

    /// Wraps a state-setting callback so it becomes a no-op once `generation`
    /// is superseded.
    pub fn wrap<A, R, F>(self: &Arc<Self>, generation: Generation, callback: F) -> impl Fn(A) -> Option<R>
    where
        F: Fn(A) -> R,
    {
        let guard = Arc::clone(self);
        move |arg| {
            let live = guard.current();
            if live == generation {
                Some(callback(arg))
            } else {
                debug!(issued = generation, live, "Dropping stale callback");
                None
            }
        }
    }
}
