//! Deferred post-response tasks and periodic jobs.
//!
//! The cache writes its miss responses *after* handing them back to the client.
//! That requires a host primitive that accepts a task, runs it without delaying
//! the response, and keeps it alive until it finishes even if the client has
//! already gone away. [`Deferred`] names that primitive; [`BackgroundTasks`] is
//! the Tokio implementation used by the server bootstrap, which [`drain`]s it
//! before shutting down.
//!
//! [`drain`]: BackgroundTasks::drain

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// A unit of post-response work.
pub type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Schedules work to run after the current response has been handed back.
///
/// Implementations must guarantee that a deferred task is eventually polled to
/// completion; they must not run it inline on the caller's path.
pub trait Deferred: Send + Sync {
    fn defer(&self, task: DeferredTask);
}

/// Tracks deferred tasks spawned onto the Tokio runtime.
///
/// Cloning is cheap and every clone shares the same task set.
///
/// # Examples
///
/// ```
/// use scrobble_edge::background::BackgroundTasks;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let tasks = BackgroundTasks::new();
/// tasks.spawn(async { /* write to cache */ });
/// assert_eq!(tasks.drain().await, 1);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` immediately and keeps its handle until it is drained.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock();
        // Reap whatever already finished so the set does not grow with traffic.
        while let Some(result) = set.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "background task failed");
            }
        }
        set.spawn(task);
    }

    /// Number of tasks spawned but not yet reaped.
    pub fn pending(&self) -> usize {
        self.set.lock().len()
    }

    /// Waits for every outstanding task, including ones spawned while draining.
    ///
    /// Returns how many tasks were awaited.
    pub async fn drain(&self) -> usize {
        let mut awaited = 0;
        loop {
            let mut set = std::mem::take(&mut *self.set.lock());
            if set.is_empty() {
                break;
            }
            while let Some(result) = set.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "background task failed");
                }
                awaited += 1;
            }
        }
        debug!(awaited, "background tasks drained");
        awaited
    }
}

impl Deferred for BackgroundTasks {
    fn defer(&self, task: DeferredTask) {
        self.spawn(task);
    }
}

/// Runs `job` every `period` until the returned handle is aborted.
///
/// The first run happens one full `period` after spawning. Missed ticks are
/// delayed rather than burst, so a stalled runtime never runs the job back to back.
pub fn spawn_periodic<F>(name: &'static str, period: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            debug!(job = name, "running periodic job");
            job();
        }
    })
}
