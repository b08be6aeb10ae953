//! Repeats the triage loop at randomized intervals
//!
//! A single task owns the loop, so ticks never overlap: the next delay is
//! drawn only after the previous run has finished. Stopping is cooperative.
//! The stop signal wakes a sleeping loop at once and is checked by a running
//! tick between candidates; a tick that outlives the grace period is aborted.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{GmailError, Result};
use crate::triage::TriageLoop;

/// Inclusive range of whole seconds between ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalBounds {
    min_secs: u64,
    max_secs: u64,
}

impl IntervalBounds {
    pub fn new(min_secs: u64, max_secs: u64) -> Result<Self> {
        if min_secs == 0 {
            return Err(GmailError::ConfigError(
                "Minimum interval must be at least one second".to_string(),
            ));
        }
        if min_secs > max_secs {
            return Err(GmailError::ConfigError(format!(
                "Minimum interval ({}s) exceeds maximum interval ({}s)",
                min_secs, max_secs
            )));
        }
        Ok(Self { min_secs, max_secs })
    }

    pub fn min_secs(&self) -> u64 {
        self.min_secs
    }

    pub fn max_secs(&self) -> u64 {
        self.max_secs
    }

    /// Draw a delay uniformly from `[min, max]` seconds
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        Duration::from_secs(rng.gen_range(self.min_secs..=self.max_secs))
    }
}

pub struct Scheduler {
    triage: Arc<TriageLoop>,
    bounds: IntervalBounds,
    grace: Duration,
}

impl Scheduler {
    pub fn new(triage: Arc<TriageLoop>, bounds: IntervalBounds, grace: Duration) -> Self {
        Self {
            triage,
            bounds,
            grace,
        }
    }

    /// Spawn the loop; the first tick runs immediately
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticks = Arc::new(AtomicU64::new(0));

        info!(
            "Starting scheduler with interval {}-{}s",
            self.bounds.min_secs, self.bounds.max_secs
        );

        let task = tokio::spawn(run_loop(
            self.triage,
            self.bounds,
            shutdown_rx,
            Arc::clone(&ticks),
        ));

        SchedulerHandle {
            shutdown_tx,
            task: Some(task),
            grace: self.grace,
            ticks,
        }
    }
}

async fn run_loop(
    triage: Arc<TriageLoop>,
    bounds: IntervalBounds,
    mut shutdown: watch::Receiver<bool>,
    ticks: Arc<AtomicU64>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let tick = ticks.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Scheduler tick {}", tick);
        match triage.run(&shutdown).await {
            Ok(report) if report.interrupted => break,
            Ok(_) => {}
            Err(e) => error!("Triage run {} failed: {}", tick, e),
        }

        let delay = bounds.sample(&mut rand::thread_rng());
        debug!("Next run in {}s", delay.as_secs());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                // sender dropped counts as a stop request
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Scheduler stopped");
}

/// Control surface for a running scheduler
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    grace: Duration,
    ticks: Arc<AtomicU64>,
}

impl SchedulerHandle {
    /// Number of ticks started so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal the loop and wait up to the grace period for it to finish
    pub async fn stop(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(self.grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => error!("Scheduler task panicked: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(
                    "Scheduler did not stop within {}s, aborting in-flight run",
                    self.grace.as_secs()
                );
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockMailbox;
    use crate::composer::ReplyComposer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicUsize;

    fn triage(mock_client: MockMailbox) -> Arc<TriageLoop> {
        Arc::new(TriageLoop::new(
            Arc::new(mock_client),
            ReplyComposer::new("me", "Away"),
            "Label_1",
        ))
    }

    /// Let spawned tasks run without advancing the paused clock
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_interval_bounds_validation() {
        assert!(IntervalBounds::new(45, 120).is_ok());
        assert!(IntervalBounds::new(60, 60).is_ok());
        assert!(matches!(
            IntervalBounds::new(120, 45),
            Err(GmailError::ConfigError(_))
        ));
        assert!(IntervalBounds::new(0, 10).is_err());
    }

    #[test]
    fn test_sample_stays_in_range() {
        let bounds = IntervalBounds::new(45, 120).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen_min = false;
        let mut seen_max = false;
        for _ in 0..20_000 {
            let secs = bounds.sample(&mut rng).as_secs();
            assert!((45..=120).contains(&secs));
            seen_min |= secs == 45;
            seen_max |= secs == 120;
        }
        // both ends of the range are reachable
        assert!(seen_min && seen_max);
    }

    #[test]
    fn test_sample_fixed_interval() {
        let bounds = IntervalBounds::new(60, 60).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(bounds.sample(&mut rng), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate_and_ticks_repeat() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut mock_client = MockMailbox::new();
        mock_client.expect_list_message_ids().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        });

        let bounds = IntervalBounds::new(10, 10).unwrap();
        let mut handle =
            Scheduler::new(triage(mock_client), bounds, Duration::from_secs(5)).start();

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.ticks(), 2);

        handle.stop().await;
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_wakes_sleeping_loop() {
        let mut mock_client = MockMailbox::new();
        mock_client
            .expect_list_message_ids()
            .returning(|_| Ok(Vec::new()));

        let bounds = IntervalBounds::new(3600, 3600).unwrap();
        let mut handle =
            Scheduler::new(triage(mock_client), bounds, Duration::from_secs(5)).start();
        settle().await;
        assert!(handle.is_running());

        let before = tokio::time::Instant::now();
        handle.stop().await;

        assert!(!handle.is_running());
        assert!(before.elapsed() < Duration::from_secs(5));
        assert_eq!(handle.ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_does_not_stop_scheduler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut mock_client = MockMailbox::new();
        mock_client.expect_list_message_ids().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(GmailError::NetworkError("unreachable".to_string()))
        });

        let bounds = IntervalBounds::new(1, 1).unwrap();
        let mut handle =
            Scheduler::new(triage(mock_client), bounds, Duration::from_secs(5)).start();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        settle().await;
        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert!(handle.is_running());

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_poll_runs_nothing() {
        let mut mock_client = MockMailbox::new();
        mock_client.expect_list_message_ids().never();

        let bounds = IntervalBounds::new(60, 60).unwrap();
        let mut handle =
            Scheduler::new(triage(mock_client), bounds, Duration::from_secs(5)).start();

        handle.stop().await;
        assert!(!handle.is_running());
        assert_eq!(handle.ticks(), 0);

        // a second stop is a no-op
        handle.stop().await;
    }
}
