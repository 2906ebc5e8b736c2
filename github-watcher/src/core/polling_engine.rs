/*!
Periodic fetch, diff and dispatch of GitHub activity
*/

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::{
    config::{WatchOptions, WatcherConfig},
    event_system::{Alert, AlertRoute, StarEvent},
    output_plugins::MessageSink,
    state_manager::{Identity, Resource, SeenStateTracker},
};
use crate::github::ActivitySource;

/// Longest period the tick clock runs with. Longer intervals are accepted
/// but poll at this period, keeping clock arithmetic in range.
pub const MAX_POLL_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub notifications_dispatched: usize,
    pub stars_dispatched: usize,
    /// Identities marked seen without an alert because their resource was
    /// being primed
    pub absorbed: usize,
    pub failed_fetches: usize,
}

impl TickReport {
    pub fn dispatched(&self) -> usize {
        self.notifications_dispatched + self.stars_dispatched
    }
}

/// Owns the seen-state for one enabled session and turns remote listings
/// into alerts.
///
/// A resource (the notification feed, or one repository's stargazers) is
/// primed by its first successful fetch of the session: everything in that
/// listing is marked seen silently. Only identities that appear in later
/// listings are dispatched.
pub struct PollingEngine {
    source: Arc<dyn ActivitySource>,
    sink: Arc<dyn MessageSink>,
    seen: SeenStateTracker,
    options: WatchOptions,
    route: AlertRoute,
    ticks: u64,
}

impl PollingEngine {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        sink: Arc<dyn MessageSink>,
        options: WatchOptions,
        route: AlertRoute,
    ) -> Self {
        Self {
            source,
            sink,
            seen: SeenStateTracker::new(options.seen_capacity),
            options,
            route,
            ticks: 0,
        }
    }

    pub fn seen(&self) -> &SeenStateTracker {
        &self.seen
    }

    /// Reset the seen-state and snapshot what already exists. Never dispatches.
    pub async fn baseline(&mut self, config: &WatcherConfig) -> TickReport {
        self.seen.reset();

        let mut report = TickReport::default();
        async {
            self.check_notifications(config.access_token(), &mut report)
                .await;
            if config.watch_stars() {
                self.check_stars(config.access_token(), &mut report).await;
            }
        }
        .instrument(info_span!("baseline"))
        .await;

        info!(
            "Baseline recorded {} notifications and {} stars ({} failed fetches)",
            self.seen.notification_count(),
            self.seen.star_count(),
            report.failed_fetches
        );
        report
    }

    /// One fetch-diff-dispatch pass. Fetch failures are logged and skipped.
    pub async fn tick(&mut self, config: &WatcherConfig) -> TickReport {
        self.ticks += 1;
        let span = info_span!("tick", n = self.ticks);
        let mut report = TickReport::default();

        async {
            self.check_notifications(config.access_token(), &mut report)
                .await;
            if config.watch_stars() {
                self.check_stars(config.access_token(), &mut report).await;
            }
            debug!(
                "Tick complete: {} notifications and {} stars dispatched, {} absorbed, {} failed fetches",
                report.notifications_dispatched,
                report.stars_dispatched,
                report.absorbed,
                report.failed_fetches
            );
        }
        .instrument(span)
        .await;

        report
    }

    async fn check_notifications(&mut self, token: &str, report: &mut TickReport) {
        let notifications = match self.source.fetch_notifications(token).await {
            Ok(notifications) => notifications,
            Err(e) => {
                warn!("Could not fetch notifications: {}", e);
                report.failed_fetches += 1;
                return;
            }
        };

        let listing: Vec<Identity<'_>> = notifications
            .iter()
            .map(|notification| Identity::Notification(&notification.id))
            .collect();
        let novel = self.seen.observe_listing(Resource::Notifications, &listing);

        if !self.seen.is_primed(Resource::Notifications) {
            self.seen.mark_primed(Resource::Notifications);
            report.absorbed += notifications.len();
            return;
        }

        for (notification, novel) in notifications.iter().zip(novel) {
            if !novel {
                continue;
            }
            let alert = Alert::for_notification(notification, &self.options, &self.route);
            self.dispatch(&alert).await;
            report.notifications_dispatched += 1;
        }
    }

    async fn check_stars(&mut self, token: &str, report: &mut TickReport) {
        let repositories = match self.source.fetch_repositories(token).await {
            Ok(repositories) => repositories,
            Err(e) => {
                warn!("Could not fetch repositories: {}", e);
                report.failed_fetches += 1;
                return;
            }
        };
        debug!("Checking stars on {} repositories", repositories.len());

        let source = Arc::clone(&self.source);
        let token = token.to_string();
        let mut listings = stream::iter(repositories)
            .map(move |repository| {
                let source = Arc::clone(&source);
                let token = token.clone();
                async move {
                    let result = source.fetch_stargazers(&token, &repository).await;
                    (repository, result)
                }
            })
            .buffer_unordered(self.options.star_concurrency.max(1));

        while let Some((repository, result)) = listings.next().await {
            match result {
                Ok(stars) => self.diff_stars(&repository, &stars, report).await,
                Err(e) => {
                    warn!("Could not fetch stargazers of {}: {}", repository, e);
                    report.failed_fetches += 1;
                }
            }
        }
    }

    async fn diff_stars(&mut self, repository: &str, stars: &[StarEvent], report: &mut TickReport) {
        let resource = Resource::Stargazers(repository);
        let listing: Vec<Identity<'_>> = stars
            .iter()
            .map(|star| {
                let (repo, user) = star.identity();
                Identity::Star {
                    repository: repo,
                    user,
                }
            })
            .collect();
        let novel = self.seen.observe_listing(resource, &listing);

        if !self.seen.is_primed(resource) {
            self.seen.mark_primed(resource);
            report.absorbed += stars.len();
            return;
        }

        for (star, novel) in stars.iter().zip(novel) {
            if !novel {
                continue;
            }
            let alert = Alert::for_star(star, &self.options, &self.route);
            self.dispatch(&alert).await;
            report.stars_dispatched += 1;
        }
    }

    /// Best effort: the event stays seen whether or not delivery succeeds.
    async fn dispatch(&self, alert: &Alert) {
        match self.sink.send_alert(alert).await {
            Ok(()) => info!("Sent alert: {}", alert.title),
            Err(e) => warn!("Could not deliver alert \"{}\": {}", alert.title, e),
        }
    }

    /// Tick every poll interval until `cancel` fires.
    ///
    /// Ticks run one at a time on this task; firings that come due while a
    /// tick is still running are skipped and the next tick is a full period
    /// after the slow one ends. Cancellation is observed between
    /// ticks, so an in-flight tick always completes. Config updates take
    /// effect on the next tick, and a new interval restarts the clock.
    pub async fn run(mut self, mut config: watch::Receiver<WatcherConfig>, cancel: CancellationToken) {
        let mut period = clock_period(&config.borrow_and_update());
        let mut ticks = tick_stream(period);
        info!("Polling every {:?}", period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = config.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = clock_period(&config.borrow_and_update());
                    if next != period {
                        info!("Poll interval changed from {:?} to {:?}", period, next);
                        period = next;
                        ticks = tick_stream(period);
                    }
                    continue;
                }
                Some(_) = ticks.next() => {}
            }

            let current = config.borrow().clone();
            let started = Instant::now();
            self.tick(&current).await;
            if started.elapsed() >= period {
                debug!("Tick overran the poll interval, skipping missed firings");
                ticks.as_mut().reset();
            }
        }

        info!("Polling stopped after {} ticks", self.ticks);
    }
}

fn clock_period(config: &WatcherConfig) -> Duration {
    let interval = config.poll_interval();
    if interval > MAX_POLL_PERIOD {
        warn!("Poll interval {:?} is out of range, polling every {:?}", interval, MAX_POLL_PERIOD);
        return MAX_POLL_PERIOD;
    }
    interval
}

fn tick_stream(period: Duration) -> IntervalStream {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    IntervalStream::new(interval)
}
