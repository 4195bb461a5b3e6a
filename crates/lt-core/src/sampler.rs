//! Periodic volume sampling bound to a single open session.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Handle to the sampling task of one session.
///
/// Dropping the handle aborts the task.
#[derive(Debug)]
pub(crate) struct Sampler {
    session: u64,
    task: JoinHandle<()>,
}

impl Sampler {
    /// Spawns a sampling loop on the current tokio runtime.
    ///
    /// `sample` is invoked every `period`, starting one period from now; the
    /// loop ends as soon as it returns `false`. Returns `None` when called
    /// outside a runtime.
    pub(crate) fn spawn<F>(session: u64, period: Duration, mut sample: F) -> Option<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = Handle::try_current().ok()?;
        let task = handle.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !sample() {
                    tracing::debug!(session, "volume sampler finished");
                    break;
                }
            }
        });
        Some(Self { session, task })
    }

    pub(crate) const fn session(&self) -> u64 {
        self.session
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Aborts the task. The session guard in the sample callback keeps a
    /// task that is already past its await point from writing.
    pub(crate) fn cancel(self) {
        drop(self);
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
