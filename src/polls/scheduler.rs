//! Periodic auto-close of expired polls.
//!
//! Each tick closes every active poll whose `end_at` has passed with a
//! conditional update, and only the tick whose update won sends the result.
//! Overlapping ticks, other processes and concurrent nullifies therefore
//! produce one transition and at most one notification per poll.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::entities::discussion_poll::{self, PollStatus};
use crate::notify::Mailer;
use crate::state::ApiCache;
use crate::time::fixed_now;

use super::links::PollLinks;
use super::results::{self, DispatchOutcome};
use super::store::PollStore;

/// Progress of completed scans, shared with the readiness endpoint.
#[derive(Debug, Default)]
pub struct SchedulerStatus {
    last_tick_unix: AtomicI64,
    ticks: AtomicU64,
}

impl SchedulerStatus {
    fn record(&self, at: DateTime<FixedOffset>) {
        self.last_tick_unix
            .store(at.timestamp(), AtomicOrdering::SeqCst);
        self.ticks.fetch_add(1, AtomicOrdering::SeqCst);
    }

    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        match self.last_tick_unix.load(AtomicOrdering::SeqCst) {
            0 => None,
            seconds => Utc.timestamp_opt(seconds, 0).single(),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(AtomicOrdering::SeqCst)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub closed: usize,
    pub lost_races: usize,
    pub notified: usize,
    pub notify_skipped: usize,
    pub failures: usize,
    pub scan_failed: bool,
}

pub struct PollScheduler {
    store: PollStore,
    mailer: Arc<dyn Mailer>,
    links: PollLinks,
    cache: Arc<ApiCache>,
    interval: Duration,
    startup_delay: Duration,
    status: Arc<SchedulerStatus>,
}

impl PollScheduler {
    pub fn new(
        store: PollStore,
        mailer: Arc<dyn Mailer>,
        links: PollLinks,
        cache: Arc<ApiCache>,
        config: &SchedulerConfig,
        status: Arc<SchedulerStatus>,
    ) -> Self {
        let interval = config.close_interval();
        assert!(
            interval >= Duration::from_secs(crate::config::MIN_CLOSE_INTERVAL_SECONDS),
            "Close interval must respect the floor"
        );
        Self {
            store,
            mailer,
            links,
            cache,
            interval,
            startup_delay: config.startup_delay(),
            status,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_seconds = self.interval.as_secs(),
            startup_delay_seconds = self.startup_delay.as_secs(),
            "Starting poll auto-close scheduler"
        );

        let mut wait = self.startup_delay;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Poll scheduler shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting poll scheduler loop");
                            break;
                        }
                    }
                }
                _ = sleep(wait) => {
                    let report = self.tick(fixed_now()).await;
                    if report.closed > 0 || report.failures > 0 {
                        info!(
                            due = report.due,
                            closed = report.closed,
                            notified = report.notified,
                            failures = report.failures,
                            "Poll scheduler tick finished"
                        );
                    }
                    wait = self.interval;
                }
            }
        }
    }

    /// One pass over expired polls. Never returns an error: scan failures end
    /// the tick without counting it, per-poll failures are logged and skipped.
    pub async fn tick(&self, now: DateTime<FixedOffset>) -> TickReport {
        let mut report = TickReport::default();
        let due = match self.store.find_due(now).await {
            Ok(due) => due,
            Err(err) => {
                error!("Failed to scan for expired polls: {err}");
                report.scan_failed = true;
                return report;
            }
        };
        report.due = due.len();

        for poll in due {
            self.close_one(poll, now, &mut report).await;
        }

        self.status.record(now);
        report
    }

    async fn close_one(
        &self,
        mut poll: discussion_poll::Model,
        now: DateTime<FixedOffset>,
        report: &mut TickReport,
    ) {
        let won = match self.store.close_if_active(poll.id, now).await {
            Ok(won) => won,
            Err(err) => {
                warn!(poll_id = poll.id, "Failed to close expired poll: {err}");
                report.failures += 1;
                return;
            }
        };
        if !won {
            debug!(poll_id = poll.id, "Poll already left the active state");
            report.lost_races += 1;
            return;
        }

        report.closed += 1;
        info!(poll_id = poll.id, suggestion_id = poll.suggestion_id, "Poll closed");
        poll.status = PollStatus::Closed;
        poll.closed_at = Some(now);

        if let Err(err) = self.store.touch_suggestion(poll.suggestion_id, now).await {
            warn!(poll_id = poll.id, "Failed to touch discussion after close: {err}");
        }
        self.cache.poll_lists.invalidate(&poll.suggestion_id).await;

        if !poll.notify_enabled || poll.result_notified_at.is_some() {
            return;
        }
        match results::dispatch_result(&self.store, self.mailer.as_ref(), &self.links, &poll, now)
            .await
        {
            Ok(DispatchOutcome::Sent { .. }) => {
                report.notified += 1;
                self.cache.poll_lists.invalidate(&poll.suggestion_id).await;
            }
            Ok(outcome) => {
                debug!(poll_id = poll.id, ?outcome, "Poll result not dispatched");
                report.notify_skipped += 1;
            }
            Err(err) => {
                warn!(poll_id = poll.id, "Failed to notify poll result: {err}");
                report.failures += 1;
            }
        }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop and waits for the in-flight tick to finish.
    pub async fn stop(self) {
        self.shutdown_tx.send(true).ok();
        if let Err(join_err) = self.task.await {
            error!("Poll scheduler task join error: {join_err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use sea_orm::EntityTrait;

    use super::*;
    use crate::config::CacheConfig;
    use crate::entities::suggestion;
    use crate::polls::testing::{Fixture, RecordingMailer};

    fn scheduler(fx: &Fixture, mailer: &RecordingMailer) -> PollScheduler {
        PollScheduler::new(
            fx.store.clone(),
            Arc::new(mailer.clone()),
            PollLinks::new("https://ampa-jnt.es").unwrap(),
            Arc::new(ApiCache::new(&CacheConfig::default())),
            &SchedulerConfig {
                enabled: true,
                close_interval_seconds: Some(5),
                startup_delay_seconds: Some(0),
            },
            Arc::new(SchedulerStatus::default()),
        )
    }

    #[tokio::test]
    async fn expired_poll_is_closed_and_notified_once() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(2).await;
        let poll = fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, -1).await;
        let mailer = RecordingMailer::new();
        let scheduler = scheduler(&fx, &mailer);

        let report = scheduler.tick(fixed_now()).await;
        assert_eq!(report.closed, 1);
        assert_eq!(report.notified, 1);

        let stored = fx.reload(poll.id).await;
        assert_eq!(stored.status, PollStatus::Closed);
        assert!(stored.closed_at.unwrap() >= stored.end_at);
        assert!(stored.result_notified_at.is_some());
        assert_eq!(mailer.sent().len(), 1);

        // A later tick finds nothing to do.
        let again = scheduler.tick(fixed_now()).await;
        assert_eq!(again, TickReport::default());
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn future_poll_is_left_alone() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(1).await;
        let poll = fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, 3_600).await;
        let mailer = RecordingMailer::new();

        let report = scheduler(&fx, &mailer).tick(fixed_now()).await;
        assert_eq!(report.due, 0);

        let stored = fx.reload(poll.id).await;
        assert_eq!(stored.status, PollStatus::Active);
        assert!(stored.closed_at.is_none());
        assert_eq!(mailer.attempts(), 0);
    }

    #[tokio::test]
    async fn nulled_poll_never_changes() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(1).await;
        let poll = fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, -60).await;
        fx.store
            .nullify_if_active(poll.id, scoped.coordinator.id, fixed_now())
            .await
            .unwrap();
        let before = fx.reload(poll.id).await;
        let mailer = RecordingMailer::new();

        scheduler(&fx, &mailer).tick(fixed_now()).await;

        assert_eq!(fx.reload(poll.id).await, before);
        assert_eq!(mailer.attempts(), 0);
    }

    #[tokio::test]
    async fn concurrent_ticks_close_and_notify_once() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(3).await;
        let poll = fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, -1).await;
        let mailer = RecordingMailer::new();
        let first = scheduler(&fx, &mailer);
        let second = scheduler(&fx, &mailer);
        let now = fixed_now();

        let (a, b) = tokio::join!(first.tick(now), second.tick(now));

        assert_eq!(a.closed + b.closed, 1);
        assert_eq!(a.notified + b.notified, 1);
        assert_eq!(mailer.attempts(), 1);
        assert_eq!(fx.reload(poll.id).await.status, PollStatus::Closed);
    }

    #[tokio::test]
    async fn failed_dispatch_keeps_poll_closed_without_mark() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(1).await;
        let poll = fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, -1).await;
        let mailer = RecordingMailer::failing();

        let report = scheduler(&fx, &mailer).tick(fixed_now()).await;
        assert_eq!(report.closed, 1);
        assert_eq!(report.failures, 1);

        let stored = fx.reload(poll.id).await;
        assert_eq!(stored.status, PollStatus::Closed);
        assert!(stored.result_notified_at.is_none());

        // No automatic retry on the next tick.
        scheduler(&fx, &mailer).tick(fixed_now()).await;
        assert_eq!(mailer.attempts(), 1);
    }

    #[tokio::test]
    async fn disabled_notifications_close_silently() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(1).await;
        let poll = fx
            .poll_with(scoped.suggestion.id, scoped.coordinator.id, -1, false)
            .await;
        let mailer = RecordingMailer::new();

        let report = scheduler(&fx, &mailer).tick(fixed_now()).await;
        assert_eq!(report.closed, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(mailer.attempts(), 0);
        assert!(fx.reload(poll.id).await.result_notified_at.is_none());
    }

    #[tokio::test]
    async fn one_unscoped_poll_does_not_block_the_rest() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(1).await;
        let loose = fx.suggestion(scoped.coordinator.id, None).await;
        let orphan = fx.active_poll(loose.id, scoped.coordinator.id, -30).await;
        let normal = fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, -1).await;
        let mailer = RecordingMailer::new();

        let report = scheduler(&fx, &mailer).tick(fixed_now()).await;
        assert_eq!(report.closed, 2);
        assert_eq!(report.notified, 1);
        assert_eq!(report.notify_skipped, 1);
        assert_eq!(fx.reload(orphan.id).await.status, PollStatus::Closed);
        assert!(fx.reload(orphan.id).await.result_notified_at.is_none());
        assert!(fx.reload(normal.id).await.result_notified_at.is_some());
    }

    #[tokio::test]
    async fn close_touches_discussion() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(1).await;
        fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, -1).await;
        let later = fixed_now() + ChronoDuration::seconds(1);

        scheduler(&fx, &RecordingMailer::new()).tick(later).await;

        let discussion = suggestion::Entity::find_by_id(scoped.suggestion.id)
            .one(&fx.database)
            .await
            .unwrap()
            .unwrap();
        assert!(discussion.updated_at > scoped.suggestion.updated_at);
    }

    #[tokio::test]
    async fn failed_scan_is_not_counted_as_a_tick() {
        let fx = Fixture::new().await;
        let mailer = RecordingMailer::new();
        let status = Arc::new(SchedulerStatus::default());
        let scheduler = PollScheduler::new(
            fx.store.clone(),
            Arc::new(mailer.clone()),
            PollLinks::new("https://ampa-jnt.es").unwrap(),
            Arc::new(ApiCache::new(&CacheConfig::default())),
            &SchedulerConfig::default(),
            Arc::clone(&status),
        );

        fx.database.close_by_ref().await.unwrap();
        let report = scheduler.tick(fixed_now()).await;

        assert!(report.scan_failed);
        assert_eq!(report.due, 0);
        assert_eq!(status.ticks(), 0);
        assert!(status.last_tick().is_none());
        assert_eq!(mailer.attempts(), 0);
    }

    #[tokio::test]
    async fn started_scheduler_ticks_and_stops() {
        let fx = Fixture::new().await;
        let scoped = fx.scoped_discussion(1).await;
        let poll = fx.active_poll(scoped.suggestion.id, scoped.coordinator.id, -1).await;
        let mailer = RecordingMailer::new();
        let status = Arc::new(SchedulerStatus::default());
        let scheduler = PollScheduler::new(
            fx.store.clone(),
            Arc::new(mailer.clone()),
            PollLinks::new("https://ampa-jnt.es").unwrap(),
            Arc::new(ApiCache::new(&CacheConfig::default())),
            &SchedulerConfig {
                enabled: true,
                close_interval_seconds: Some(60),
                startup_delay_seconds: Some(0),
            },
            Arc::clone(&status),
        );
        assert_eq!(scheduler.interval(), Duration::from_secs(60));

        let handle = scheduler.start();
        for _ in 0..100 {
            if status.ticks() > 0 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        handle.stop().await;

        assert_eq!(status.ticks(), 1);
        assert!(status.last_tick().is_some());
        assert_eq!(fx.reload(poll.id).await.status, PollStatus::Closed);
    }

    #[test]
    fn interval_below_floor_is_clamped() {
        let config = SchedulerConfig {
            enabled: true,
            close_interval_seconds: Some(5),
            startup_delay_seconds: None,
        };
        assert_eq!(config.close_interval(), Duration::from_secs(15));
    }
}
