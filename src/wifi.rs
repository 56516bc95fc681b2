use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::config::NetworkCandidate;
use crate::error::{AcquisitionFailure, LinkError, SyncFailure};
use crate::indicator::{Indicator, IndicatorColors, Rgb};
use crate::messages::SessionStatus;

pub const TIME_NOT_SYNCED: &str = "Time not synced";

const SYNC_FLASH: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Associated { ssid: String, rssi: i32 },
    Disconnected,
}

/// Station-mode radio.
pub trait WifiLink {
    /// Names of the networks currently in range.
    async fn scan_networks(&mut self) -> Result<Vec<String>, LinkError>;

    /// Starts joining a network. Completion is observed through `status`.
    async fn begin_association(&mut self, ssid: &str, secret: &str) -> Result<(), LinkError>;

    async fn status(&mut self) -> LinkStatus;

    async fn disconnect(&mut self) -> Result<(), LinkError>;
}

/// Wall clock that can be disciplined over the network.
pub trait TimeSource {
    async fn request_sync(&mut self, server: &str) -> Result<(), LinkError>;

    async fn is_synchronized(&mut self) -> bool;

    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    /// Per-candidate association budget.
    pub connect_timeout: Duration,
    pub blink_interval: Duration,
    pub ntp_server: String,
    /// UTC offset plus daylight offset.
    pub utc_offset_seconds: i32,
    pub sync_retries: u32,
    pub sync_retry_interval: Duration,
    pub resync_interval: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub connected: bool,
    pub active_candidate: Option<String>,
    pub time_synced: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub signal_strength: Option<i32>,
    /// Set when an established link drops; cleared by the next acquisition.
    pub link_lost: bool,
}

/// Owns network reachability and wall-clock time.
pub struct NetworkSession<L, C> {
    link: L,
    clock: C,
    candidates: Vec<NetworkCandidate>,
    settings: SessionSettings,
    colors: IndicatorColors,
    state: SessionState,
    last_sync_instant: Option<Instant>,
}

impl<L: WifiLink, C: TimeSource> NetworkSession<L, C> {
    pub fn new(
        link: L,
        clock: C,
        candidates: Vec<NetworkCandidate>,
        settings: SessionSettings,
        colors: IndicatorColors,
    ) -> Self {
        NetworkSession {
            link,
            clock,
            candidates,
            settings,
            colors,
            state: SessionState::default(),
            last_sync_instant: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    /// Joins the first configured network that is visible and associates
    /// within the timeout. Each candidate is tried at most once.
    pub async fn acquire<I: Indicator>(
        &mut self,
        indicator: &mut I,
    ) -> Result<(), AcquisitionFailure> {
        if self.state.connected {
            return Ok(());
        }

        info!("Scanning available networks...");
        let visible = match self.link.scan_networks().await {
            Ok(visible) => visible,
            Err(err) => {
                warn!("Network scan failed: {}", err);
                indicator.set_color(self.colors.error);
                return Err(AcquisitionFailure::ScanFailed);
            }
        };
        if visible.is_empty() {
            warn!("No networks found!");
            indicator.set_color(self.colors.error);
            return Err(AcquisitionFailure::NoNetworksVisible);
        }

        let mut attempted = Vec::new();
        for candidate in self.candidates.clone() {
            if !visible.iter().any(|ssid| *ssid == candidate.ssid) {
                continue;
            }
            debug!("Found configured network: {}", candidate.ssid);
            attempted.push(candidate.ssid.clone());

            if let Some(rssi) = self.associate(&candidate, indicator).await {
                self.state.connected = true;
                self.state.active_candidate = Some(candidate.ssid.clone());
                self.state.signal_strength = Some(rssi);
                self.state.link_lost = false;
                indicator.set_color(self.colors.connected);
                info!("Connected to {} ({} dBm)", candidate.ssid, rssi);
                return Ok(());
            }
            warn!("Failed to connect to {}", candidate.ssid);
        }

        indicator.set_color(self.colors.error);
        if attempted.is_empty() {
            Err(AcquisitionFailure::NoCandidateVisible)
        } else {
            Err(AcquisitionFailure::AllCandidatesTimedOut { attempted })
        }
    }

    /// Waits up to the connect timeout for `candidate`, blinking the
    /// connecting color. Returns the signal strength on success.
    async fn associate<I: Indicator>(
        &mut self,
        candidate: &NetworkCandidate,
        indicator: &mut I,
    ) -> Option<i32> {
        info!("Attempting to connect to {}", candidate.ssid);
        if let Err(err) = self
            .link
            .begin_association(&candidate.ssid, &candidate.password)
            .await
        {
            warn!("Could not start association with {}: {}", candidate.ssid, err);
            return None;
        }

        let deadline = Instant::now() + self.settings.connect_timeout;
        let mut lit = false;
        while Instant::now() < deadline {
            if let LinkStatus::Associated { ssid, rssi } = self.link.status().await {
                if ssid == candidate.ssid {
                    return Some(rssi);
                }
            }
            lit = !lit;
            indicator.set_color(if lit { self.colors.connecting } else { Rgb::OFF });
            tokio::time::sleep_until(deadline.min(Instant::now() + self.settings.blink_interval))
                .await;
        }

        match self.link.status().await {
            LinkStatus::Associated { ssid, rssi } if ssid == candidate.ssid => Some(rssi),
            _ => None,
        }
    }

    /// Cheap status check. Does not reacquire.
    pub async fn verify<I: Indicator>(&mut self, indicator: &mut I) -> bool {
        match self.link.status().await {
            LinkStatus::Associated { ssid, rssi } => {
                self.state.connected = true;
                self.state.active_candidate = Some(ssid);
                self.state.signal_strength = Some(rssi);
            }
            LinkStatus::Disconnected => {
                if self.state.connected {
                    warn!("WiFi connection lost!");
                    self.state.connected = false;
                    self.state.active_candidate = None;
                    self.state.signal_strength = None;
                    self.state.link_lost = true;
                    indicator.set_color(self.colors.error);
                }
            }
        }
        self.state.connected
    }

    pub async fn reconnect_if_needed<I: Indicator>(&mut self, indicator: &mut I) -> bool {
        if self.verify(indicator).await {
            return true;
        }
        if self.state.link_lost {
            info!("Attempting to reconnect...");
        } else {
            info!("Attempting to connect...");
        }
        match self.acquire(indicator).await {
            Ok(()) => true,
            Err(err) => {
                warn!("Reconnect failed: {}", err);
                false
            }
        }
    }

    /// Synchronizes the wall clock. Safe to call repeatedly.
    pub async fn sync_time<I: Indicator>(&mut self, indicator: &mut I) -> Result<(), SyncFailure> {
        if !self.state.connected {
            warn!("Cannot sync time: WiFi not connected");
            return Err(SyncFailure::NotConnected);
        }

        info!("Syncing time with {}...", self.settings.ntp_server);
        if let Err(err) = self.clock.request_sync(&self.settings.ntp_server).await {
            warn!("Time sync request failed: {}", err);
        }

        let mut polls = 0;
        loop {
            polls += 1;
            if self.clock.is_synchronized().await {
                break;
            }
            if polls > self.settings.sync_retries {
                warn!("Time sync failed after {} polls", polls);
                return Err(SyncFailure::Exhausted { attempts: polls });
            }
            tokio::time::sleep(self.settings.sync_retry_interval).await;
        }

        let now = self.clock.now();
        self.state.time_synced = true;
        self.state.last_sync = Some(now);
        self.last_sync_instant = Some(Instant::now());
        info!("Time synced: {}", self.formatted_time());

        indicator.set_color(self.colors.synced);
        tokio::time::sleep(SYNC_FLASH).await;
        indicator.set_color(self.colors.connected);
        Ok(())
    }

    /// True when connected and the clock was never synced or the last
    /// sync is older than the resync interval.
    pub fn resync_due(&self, now: Instant) -> bool {
        if !self.state.connected {
            return false;
        }
        match self.last_sync_instant {
            Some(at) if self.state.time_synced => {
                now.saturating_duration_since(at) >= self.settings.resync_interval
            }
            _ => true,
        }
    }

    pub fn formatted_time(&self) -> String {
        if !self.state.time_synced {
            return TIME_NOT_SYNCED.to_string();
        }
        match FixedOffset::east_opt(self.settings.utc_offset_seconds) {
            Some(offset) => self
                .clock
                .now()
                .with_timezone(&offset)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            None => "Time error".to_string(),
        }
    }

    pub fn current_status(&self) -> SessionStatus {
        SessionStatus {
            connected: self.state.connected,
            ssid: self.state.active_candidate.clone(),
            signal: self.state.signal_strength,
            time_synced: self.state.time_synced,
            timestamp: self.formatted_time(),
        }
    }

    pub async fn disconnect<I: Indicator>(&mut self, indicator: &mut I) {
        if !self.state.connected {
            return;
        }
        if let Err(err) = self.link.disconnect().await {
            warn!("Error disconnecting: {}", err);
        }
        self.state.connected = false;
        self.state.active_candidate = None;
        self.state.signal_strength = None;
        indicator.set_color(self.colors.error);
        info!("WiFi disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeClock, FakeLink, RecordingIndicator};
    use chrono::TimeZone as _;

    fn settings() -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_secs(10),
            blink_interval: Duration::from_millis(200),
            ntp_server: "pool.ntp.org".to_string(),
            utc_offset_seconds: 7200,
            sync_retries: 10,
            sync_retry_interval: Duration::from_millis(500),
            resync_interval: Duration::from_secs(3600),
        }
    }

    fn candidates(names: &[&str]) -> Vec<NetworkCandidate> {
        names
            .iter()
            .map(|name| NetworkCandidate {
                ssid: name.to_string(),
                password: format!("{name}-secret"),
            })
            .collect()
    }

    fn session(link: FakeLink, clock: FakeClock) -> NetworkSession<FakeLink, FakeClock> {
        NetworkSession::new(
            link,
            clock,
            candidates(&["first", "second", "third"]),
            settings(),
            IndicatorColors::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_short_circuits_on_first_success() {
        let link = FakeLink::default()
            .visible(&["third", "second", "first"])
            .accepts(&["second", "third"]);
        let attempts = link.attempts();
        let mut indicator = RecordingIndicator::default();
        let mut session = session(link, FakeClock::default());

        session.acquire(&mut indicator).await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), vec!["first", "second"]);
        let state = session.state();
        assert!(state.connected);
        assert_eq!(state.active_candidate.as_deref(), Some("second"));
        assert_eq!(state.signal_strength, Some(-55));
        assert_eq!(indicator.last(), Some(IndicatorColors::default().connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_skips_invisible_candidates() {
        let link = FakeLink::default().visible(&["third"]).accepts(&["third"]);
        let attempts = link.attempts();
        let mut session = session(link, FakeClock::default());

        session
            .acquire(&mut RecordingIndicator::default())
            .await
            .unwrap();
        assert_eq!(*attempts.lock().unwrap(), vec!["third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_fails_when_all_time_out() {
        let link = FakeLink::default().visible(&["first", "second"]);
        let attempts = link.attempts();
        let mut indicator = RecordingIndicator::default();
        let mut session = session(link, FakeClock::default());

        let started = Instant::now();
        let result = session.acquire(&mut indicator).await;

        assert_eq!(
            result,
            Err(AcquisitionFailure::AllCandidatesTimedOut {
                attempted: vec!["first".to_string(), "second".to_string()]
            })
        );
        assert_eq!(*attempts.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        assert!(!session.is_connected());
        assert_eq!(indicator.last(), Some(IndicatorColors::default().error));

        let colors = indicator.colors();
        let seen = colors.lock().unwrap();
        assert!(seen.contains(&IndicatorColors::default().connecting));
        assert!(seen.contains(&Rgb::OFF));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_empty_scan() {
        let link = FakeLink::default();
        let attempts = link.attempts();
        let mut session = session(link, FakeClock::default());

        let result = session.acquire(&mut RecordingIndicator::default()).await;
        assert_eq!(result, Err(AcquisitionFailure::NoNetworksVisible));
        assert!(attempts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_no_configured_network_visible() {
        let link = FakeLink::default().visible(&["neighbour"]);
        let mut session = session(link, FakeClock::default());

        let result = session.acquire(&mut RecordingIndicator::default()).await;
        assert_eq!(result, Err(AcquisitionFailure::NoCandidateVisible));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_clears_state_on_loss() {
        let link = FakeLink::default().visible(&["first"]).accepts(&["first"]);
        let control = link.control();
        let mut indicator = RecordingIndicator::default();
        let mut session = session(link, FakeClock::default());
        session.acquire(&mut indicator).await.unwrap();

        assert!(session.verify(&mut indicator).await);
        control.lock().unwrap().drop_link();

        assert!(!session.verify(&mut indicator).await);
        let state = session.state();
        assert_eq!(state.active_candidate, None);
        assert_eq!(state.signal_strength, None);
        assert!(state.link_lost);
        assert_eq!(indicator.last(), Some(IndicatorColors::default().error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_if_needed_reacquires() {
        let link = FakeLink::default().visible(&["first"]).accepts(&["first"]);
        let control = link.control();
        let attempts = link.attempts();
        let mut indicator = RecordingIndicator::default();
        let mut session = session(link, FakeClock::default());
        session.acquire(&mut indicator).await.unwrap();

        assert!(session.reconnect_if_needed(&mut indicator).await);
        assert_eq!(attempts.lock().unwrap().len(), 1);

        control.lock().unwrap().drop_link();
        assert!(session.reconnect_if_needed(&mut indicator).await);
        assert_eq!(attempts.lock().unwrap().len(), 2);
        assert!(!session.state().link_lost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_time_requires_connection() {
        let mut session = session(FakeLink::default(), FakeClock::default());
        let result = session.sync_time(&mut RecordingIndicator::default()).await;
        assert_eq!(result, Err(SyncFailure::NotConnected));
        assert!(!session.state().time_synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_time_is_idempotent() {
        let link = FakeLink::default().visible(&["first"]).accepts(&["first"]);
        let clock = FakeClock::default().synced_after(3);
        let mut indicator = RecordingIndicator::default();
        let mut session = session(link, clock);
        session.acquire(&mut indicator).await.unwrap();

        session.sync_time(&mut indicator).await.unwrap();
        assert!(session.state().time_synced);
        session.sync_time(&mut indicator).await.unwrap();
        assert!(session.state().time_synced);
        assert!(session.state().last_sync.is_some());
        assert_eq!(indicator.last(), Some(IndicatorColors::default().connected));
        assert!(indicator
            .colors()
            .lock()
            .unwrap()
            .contains(&IndicatorColors::default().synced));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_time_exhausts_retries() {
        let link = FakeLink::default().visible(&["first"]).accepts(&["first"]);
        let clock = FakeClock::default().never_synced();
        let mut session = session(link, clock);
        session
            .acquire(&mut RecordingIndicator::default())
            .await
            .unwrap();

        let started = Instant::now();
        let result = session.sync_time(&mut RecordingIndicator::default()).await;
        assert_eq!(result, Err(SyncFailure::Exhausted { attempts: 11 }));
        assert_eq!(started.elapsed(), Duration::from_millis(5000));
        assert!(!session.state().time_synced);
        assert_eq!(session.current_status().timestamp, TIME_NOT_SYNCED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resync_keeps_prior_sync() {
        let link = FakeLink::default().visible(&["first"]).accepts(&["first"]);
        let clock = FakeClock::default();
        let control = clock.control();
        let mut indicator = RecordingIndicator::default();
        let mut session = session(link, clock);
        session.acquire(&mut indicator).await.unwrap();
        session.sync_time(&mut indicator).await.unwrap();

        control.lock().unwrap().synchronized = false;
        control.lock().unwrap().syncs_after = None;
        assert!(session.sync_time(&mut indicator).await.is_err());
        assert!(session.state().time_synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_status_formats_local_time() {
        let link = FakeLink::default().visible(&["first"]).accepts(&["first"]);
        let clock =
            FakeClock::default().at(Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap());
        let mut indicator = RecordingIndicator::default();
        let mut session = session(link, clock);

        assert_eq!(session.current_status().timestamp, TIME_NOT_SYNCED);
        session.acquire(&mut indicator).await.unwrap();
        session.sync_time(&mut indicator).await.unwrap();

        let status = session.current_status();
        assert!(status.connected);
        assert_eq!(status.ssid.as_deref(), Some("first"));
        assert_eq!(status.signal, Some(-55));
        assert!(status.time_synced);
        assert_eq!(status.timestamp, "2024-03-01 12:30:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_due() {
        let link = FakeLink::default().visible(&["first"]).accepts(&["first"]);
        let mut indicator = RecordingIndicator::default();
        let mut session = session(link, FakeClock::default());

        assert!(!session.resync_due(Instant::now()));
        session.acquire(&mut indicator).await.unwrap();
        assert!(session.resync_due(Instant::now()));

        session.sync_time(&mut indicator).await.unwrap();
        assert!(!session.resync_due(Instant::now()));
        assert!(session.resync_due(Instant::now() + Duration::from_secs(3600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect() {
        let link = FakeLink::default().visible(&["first"]).accepts(&["first"]);
        let mut indicator = RecordingIndicator::default();
        let mut session = session(link, FakeClock::default());
        session.acquire(&mut indicator).await.unwrap();

        session.disconnect(&mut indicator).await;
        assert!(!session.is_connected());
        assert_eq!(session.current_status().wifi_status(), "Disconnected");
    }
}
