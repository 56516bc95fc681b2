use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;

use crate::indicator::{Indicator, IndicatorColors, Rgb};
use crate::messages::{DeliveryOutcome, PresenceEdge, TokenKind};
use crate::presence::PresenceTracker;
use crate::scanner::{SensorPoller, TagReader};
use crate::webhook::{NotificationDispatcher, Transport};
use crate::wifi::{NetworkSession, TimeSource, WifiLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    /// Minimum spacing between scan starts.
    pub poll_interval: Duration,
    /// Spacing of network liveness checks.
    pub check_interval: Duration,
}

/// What happened during one tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub edge: Option<PresenceEdge>,
    pub outcome: Option<DeliveryOutcome>,
}

/// Runs the sensor, presence tracking, network upkeep and notifications
/// on one cooperative loop.
pub struct Manager<R, L, C, T, I> {
    poller: SensorPoller<R>,
    tracker: PresenceTracker,
    session: NetworkSession<L, C>,
    dispatcher: NotificationDispatcher<T>,
    indicator: I,
    colors: IndicatorColors,
    timing: LoopTiming,
    next_scan: Instant,
    next_check: Instant,
}

impl<R, L, C, T, I> Manager<R, L, C, T, I>
where
    R: TagReader,
    L: WifiLink,
    C: TimeSource,
    T: Transport,
    I: Indicator,
{
    pub fn new(
        poller: SensorPoller<R>,
        session: NetworkSession<L, C>,
        dispatcher: NotificationDispatcher<T>,
        indicator: I,
        colors: IndicatorColors,
        timing: LoopTiming,
    ) -> Self {
        let now = Instant::now();
        Manager {
            poller,
            tracker: PresenceTracker::new(),
            session,
            dispatcher,
            indicator,
            colors,
            timing,
            next_scan: now,
            next_check: now + timing.check_interval,
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &NetworkSession<L, C> {
        &self.session
    }

    /// Initial network acquisition and time sync. Neither failure is fatal;
    /// the periodic check retries acquisition.
    pub async fn bring_up(&mut self) {
        self.indicator.set_color(self.colors.connecting);
        match self.session.acquire(&mut self.indicator).await {
            Ok(()) => {
                if let Err(err) = self.session.sync_time(&mut self.indicator).await {
                    warn!("Initial time sync failed: {}", err);
                }
            }
            Err(err) => warn!("Initial network acquisition failed: {}", err),
        }
        self.next_check = Instant::now() + self.timing.check_interval;
    }

    /// Liveness check, reacquisition and resync when their timer is due.
    async fn maintain_network(&mut self, now: Instant) {
        if now < self.next_check {
            return;
        }
        if self.session.reconnect_if_needed(&mut self.indicator).await
            && self.session.resync_due(Instant::now())
        {
            if let Err(err) = self.session.sync_time(&mut self.indicator).await {
                warn!("Time resync failed: {}", err);
            }
        }
        self.next_check = Instant::now() + self.timing.check_interval;
    }

    /// Scan when due, track, notify. The indicator is refreshed every tick.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let started = Instant::now();

        self.maintain_network(started).await;

        if Instant::now() < self.next_scan.max(self.poller.settled_at()) {
            self.refresh_indicator();
            return report;
        }
        self.next_scan = Instant::now() + self.timing.poll_interval;

        let reading = self.poller.scan().await;
        if let Some(edge) = self.tracker.observe(reading, Instant::now()) {
            if self.session.is_connected() {
                let status = self.session.current_status();
                report.outcome = Some(self.dispatcher.dispatch(&edge, &status).await);
            } else {
                debug!("Not connected, skipping notification for {:?}", edge.kind);
            }
            report.edge = Some(edge);
        }

        self.refresh_indicator();
        report
    }

    fn refresh_indicator(&mut self) {
        let classified = self
            .tracker
            .current()
            .is_some_and(|token| token.kind() != TokenKind::Unclassified);
        self.indicator
            .set_color(self.colors.steady(classified, self.session.is_connected()));
    }

    /// Earliest instant at which the next tick has work to do.
    pub fn next_deadline(&self) -> Instant {
        self.next_scan
            .max(self.poller.settled_at())
            .min(self.next_check)
    }

    pub async fn run_loop(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("Entering control loop");

        loop {
            self.tick().await;
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep_until(self.next_deadline()) => {}
            }
        }

        info!("Exiting control loop");
        self.session.disconnect(&mut self.indicator).await;
        self.indicator.set_color(Rgb::OFF);
    }
}
