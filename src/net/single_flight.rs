//! Single-flight execution: at most one instance of an operation runs at a
//! time, and every caller that arrives while it runs gets its result.
//!
//! DESIGN
//! ======
//! The slot holds the shared future of the current episode, tagged with an
//! episode number. The flight clears the slot itself when it completes, before
//! any waiter sees the output, so the next caller after completion always
//! starts a new episode. The tag keeps a finished episode from clearing a
//! newer one.
//!
//! TRADE-OFFS
//! ==========
//! Dropping a waiter does not cancel the episode. As long as the slot holds
//! the flight, the next caller joins and drives it to completion.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

type Flight<T> = Shared<BoxFuture<'static, T>>;
type Slot<T> = Arc<Mutex<Option<(u64, Flight<T>)>>>;

pub struct SingleFlight<T> {
    slot: Slot<T>,
    episodes: AtomicU64,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self { slot: Arc::new(Mutex::new(None)), episodes: AtomicU64::new(0) }
    }

    /// Join the running episode, or start one with `start` if none is running.
    /// `start` is only invoked when this caller begins the episode.
    pub async fn run<F, Fut>(&self, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut slot = lock(&self.slot);
            match slot.as_ref() {
                Some((_, flight)) => flight.clone(),
                None => {
                    let episode = self.episodes.fetch_add(1, Ordering::Relaxed);
                    let flight = self.launch(episode, start());
                    *slot = Some((episode, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    /// True while an episode is outstanding.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Number of episodes started so far.
    #[must_use]
    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::Relaxed)
    }

    fn launch<Fut>(&self, episode: u64, work: Fut) -> Flight<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let slot = Arc::downgrade(&self.slot);
        async move {
            let output = work.await;
            if let Some(slot) = slot.upgrade() {
                let mut current = lock(&slot);
                if current.as_ref().is_some_and(|(id, _)| *id == episode) {
                    *current = None;
                }
            }
            output
        }
        .boxed()
        .shared()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "single_flight_test.rs"]
mod tests;
