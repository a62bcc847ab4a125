//! Periodic poll loops with advisory cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Shared "still wanted" flag.
///
/// Stopping never interrupts a request already in flight. Whoever applies
/// its result checks the flag first and drops the result when stopped.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of periodic work.
#[async_trait]
pub trait Tick: Send + 'static {
    /// Used in log lines.
    fn name(&self) -> &'static str;

    async fn tick(&mut self) -> Result<(), ClientError>;
}

/// Owner's handle on a running poll loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct PollHandle {
    liveness: Liveness,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.liveness.stop();
    }

    pub fn is_stopped(&self) -> bool {
        !self.liveness.is_alive()
    }

    /// Stop and wait for the loop to notice.
    pub async fn join(mut self) {
        self.liveness.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.liveness.stop();
    }
}

/// Run `ticker` every `period` until `liveness` is stopped.
///
/// Ticks never overlap: a slow tick delays the next one. Errors are logged
/// and the loop carries on.
pub fn spawn_poll<T: Tick>(period: Duration, liveness: Liveness, mut ticker: T) -> PollHandle {
    let alive = liveness.clone();
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !alive.is_alive() {
                break;
            }
            if let Err(e) = ticker.tick().await {
                warn!(poller = ticker.name(), error = %e, "Poll tick failed");
            }
        }

        debug!(poller = ticker.name(), "Poll loop stopped");
    });

    PollHandle {
        liveness,
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        ticks: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl Tick for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn tick(&mut self) -> Result<(), ClientError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if std::mem::take(&mut self.fail_first) {
                return Err(ClientError::Server {
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn loop_survives_errors_and_stops() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let handle = spawn_poll(
            Duration::from_millis(5),
            Liveness::new(),
            Counter {
                ticks: ticks.clone(),
                fail_first: true,
            },
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);

        handle.join().await;
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn liveness_is_shared() {
        let liveness = Liveness::new();
        let clone = liveness.clone();
        assert!(clone.is_alive());
        liveness.stop();
        assert!(!clone.is_alive());
    }
}
