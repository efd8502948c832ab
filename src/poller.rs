//! Background timers for auto-refresh and status polling.
//!
//! A poller never overlaps itself: if the previous run is still in flight
//! when the next tick fires, the tick is skipped. While the dashboard is
//! hidden the poller waits, and it fires once as soon as it becomes visible
//! again. Dropping the poller stops the timer and aborts a run in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Visibility of the dashboard, shared with every poller
#[derive(Debug, Clone)]
pub struct Visibility {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Visibility {
    pub fn new(visible: bool) -> Self {
        let (tx, _rx) = watch::channel(visible);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_visible(&self, visible: bool) {
        self.tx.send_replace(visible);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Aborts the job's task when the tick loop lets go of it
struct RunningJob(JoinHandle<()>);

impl RunningJob {
    fn is_running(&self) -> bool {
        !self.0.is_finished()
    }
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A running timer. Dropping it stops the timer.
pub struct Poller {
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, visibility: &Visibility, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut visible = visibility.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut running: Option<RunningJob> = None;

            loop {
                ticker.tick().await;

                if !*visible.borrow_and_update() {
                    tracing::debug!("Poller {} paused while hidden", name);
                    if visible.wait_for(|v| *v).await.is_err() {
                        break;
                    }
                    tracing::debug!("Poller {} resumed", name);
                    ticker.reset();
                }

                if running.as_ref().is_some_and(RunningJob::is_running) {
                    tracing::trace!("Poller {} skipped tick, previous run in flight", name);
                    continue;
                }

                running = Some(RunningJob(tokio::spawn(job())));
            }

            tracing::debug!("Poller {} stopped", name);
        });

        Self { handle }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const PERIOD: Duration = Duration::from_secs(1);

    fn counting_job(
        runs: &Arc<AtomicUsize>,
        gate: Option<Arc<Notify>>,
    ) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static {
        let runs = Arc::clone(runs);
        move || {
            let runs = Arc::clone(&runs);
            let gate = gate.clone();
            let run: BoxFuture<'static, ()> = Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = gate {
                    gate.notified().await;
                }
            });
            run
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_every_period() {
        let runs = Arc::new(AtomicUsize::new(0));
        let visibility = Visibility::default();
        let _poller = Poller::spawn("test", PERIOD, &visibility, counting_job(&runs, None));

        tokio::time::sleep(PERIOD * 3 + Duration::from_millis(10)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_while_previous_run_in_flight() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let visibility = Visibility::default();
        let _poller = Poller::spawn(
            "busy",
            PERIOD,
            &visibility,
            counting_job(&runs, Some(Arc::clone(&gate))),
        );

        tokio::time::sleep(PERIOD * 5 + Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        gate.notify_one();
        tokio::time::sleep(PERIOD).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_while_hidden() {
        let runs = Arc::new(AtomicUsize::new(0));
        let visibility = Visibility::new(false);
        let _poller = Poller::spawn("hidden", PERIOD, &visibility, counting_job(&runs, None));

        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        visibility.set_visible(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timer() {
        let runs = Arc::new(AtomicUsize::new(0));
        let visibility = Visibility::default();
        let poller = Poller::spawn("dropped", PERIOD, &visibility, counting_job(&runs, None));

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(poller);
        tokio::time::sleep(PERIOD * 5).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_run_in_flight() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));

        let poller = Poller::spawn("slow", PERIOD * 60, &Visibility::default(), move || {
            let (s, f) = (Arc::clone(&s), Arc::clone(&f));
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        drop(poller);
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
