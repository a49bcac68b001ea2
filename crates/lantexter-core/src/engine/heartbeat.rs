//! Periodic discovery timer.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A repeating task that fires immediately and then every `period`.
///
/// Dropping the value leaves the task running; call [`stop`](Self::stop)
/// or [`abort`](Self::abort).
pub struct Heartbeat {
    period: Duration,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn start<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                tick().await;
            }
        });

        log::debug!("Heartbeat started, period {:?}", period);

        Self { period, handle }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cancel without waiting for the task to unwind.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Cancel and wait until no further tick can run.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
        log::debug!("Heartbeat stopped");
    }
}
