//! In-memory stand-ins for the hardware seams, used by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone as _, Utc};

use crate::config::Endpoint;
use crate::error::{LinkError, ReaderError, TransportError};
use crate::indicator::{Indicator, Rgb};
use crate::scanner::TagReader;
use crate::webhook::Transport;
use crate::wifi::{LinkStatus, TimeSource, WifiLink};

pub struct FakeReader {
    firmware: Option<u32>,
    script: VecDeque<Result<Option<Vec<u8>>, ReaderError>>,
    delay: Duration,
}

impl Default for FakeReader {
    fn default() -> Self {
        FakeReader {
            firmware: Some(0x3201_0607),
            script: VecDeque::new(),
            delay: Duration::ZERO,
        }
    }
}

impl FakeReader {
    pub fn unresponsive() -> Self {
        FakeReader {
            firmware: None,
            ..FakeReader::default()
        }
    }

    pub fn with_firmware(firmware: u32) -> Self {
        FakeReader {
            firmware: Some(firmware),
            ..FakeReader::default()
        }
    }

    /// Readings returned in order; once exhausted every read is empty.
    pub fn script(mut self, readings: Vec<Result<Option<Vec<u8>>, ReaderError>>) -> Self {
        self.script = readings.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl TagReader for FakeReader {
    async fn identify(&mut self) -> Result<u32, ReaderError> {
        self.firmware.ok_or_else(|| {
            ReaderError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no reader",
            ))
        })
    }

    async fn read_uid(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, ReaderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script.pop_front().unwrap_or(Ok(None))
    }
}

#[derive(Debug, Default)]
pub struct LinkControl {
    pub visible: Vec<String>,
    pub accepts: Vec<String>,
    pub associated: Option<String>,
}

impl LinkControl {
    pub fn drop_link(&mut self) {
        self.associated = None;
    }
}

#[derive(Clone, Default)]
pub struct FakeLink {
    control: Arc<Mutex<LinkControl>>,
    attempts: Arc<Mutex<Vec<String>>>,
}

impl FakeLink {
    pub fn visible(self, ssids: &[&str]) -> Self {
        self.control.lock().unwrap().visible = ssids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Networks that associate as soon as they are joined.
    pub fn accepts(self, ssids: &[&str]) -> Self {
        self.control.lock().unwrap().accepts = ssids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn attempts(&self) -> Arc<Mutex<Vec<String>>> {
        self.attempts.clone()
    }

    pub fn control(&self) -> Arc<Mutex<LinkControl>> {
        self.control.clone()
    }
}

impl WifiLink for FakeLink {
    async fn scan_networks(&mut self) -> Result<Vec<String>, LinkError> {
        Ok(self.control.lock().unwrap().visible.clone())
    }

    async fn begin_association(&mut self, ssid: &str, _secret: &str) -> Result<(), LinkError> {
        self.attempts.lock().unwrap().push(ssid.to_string());
        let mut control = self.control.lock().unwrap();
        if control.accepts.iter().any(|s| s == ssid) {
            control.associated = Some(ssid.to_string());
        }
        Ok(())
    }

    async fn status(&mut self) -> LinkStatus {
        match &self.control.lock().unwrap().associated {
            Some(ssid) => LinkStatus::Associated {
                ssid: ssid.clone(),
                rssi: -55,
            },
            None => LinkStatus::Disconnected,
        }
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.control.lock().unwrap().drop_link();
        Ok(())
    }
}

#[derive(Debug)]
pub struct ClockControl {
    pub synchronized: bool,
    /// Polls needed after a sync request; `None` never syncs.
    pub syncs_after: Option<u32>,
    pending: Option<u32>,
    pub now: DateTime<Utc>,
}

#[derive(Clone)]
pub struct FakeClock {
    control: Arc<Mutex<ClockControl>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        FakeClock {
            control: Arc::new(Mutex::new(ClockControl {
                synchronized: false,
                syncs_after: Some(1),
                pending: None,
                now: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            })),
        }
    }
}

impl FakeClock {
    pub fn synced_after(self, polls: u32) -> Self {
        self.control.lock().unwrap().syncs_after = Some(polls);
        self
    }

    pub fn never_synced(self) -> Self {
        self.control.lock().unwrap().syncs_after = None;
        self
    }

    pub fn at(self, now: DateTime<Utc>) -> Self {
        self.control.lock().unwrap().now = now;
        self
    }

    pub fn control(&self) -> Arc<Mutex<ClockControl>> {
        self.control.clone()
    }
}

impl TimeSource for FakeClock {
    async fn request_sync(&mut self, _server: &str) -> Result<(), LinkError> {
        let mut control = self.control.lock().unwrap();
        control.pending = control.syncs_after;
        Ok(())
    }

    async fn is_synchronized(&mut self) -> bool {
        let mut control = self.control.lock().unwrap();
        if control.synchronized {
            return true;
        }
        match control.pending {
            Some(n) if n <= 1 => {
                control.synchronized = true;
                control.pending = None;
                true
            }
            Some(n) => {
                control.pending = Some(n - 1);
                false
            }
            None => false,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.control.lock().unwrap().now
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub body: String,
    pub timeout: Duration,
}

pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<u16, TransportError>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl FakeTransport {
    /// Responses returned in order; once exhausted every request gets 200.
    pub fn responding(responses: Vec<Result<u16, TransportError>>) -> Self {
        FakeTransport {
            responses: Mutex::new(responses.into()),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<Request>>> {
        self.requests.clone()
    }
}

impl Transport for FakeTransport {
    async fn post_json(
        &self,
        endpoint: &Endpoint,
        body: String,
        timeout: Duration,
    ) -> Result<u16, TransportError> {
        self.requests.lock().unwrap().push(Request {
            url: endpoint.url().to_string(),
            body,
            timeout,
        });
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(200))
    }
}

#[derive(Clone, Default)]
pub struct RecordingIndicator {
    colors: Arc<Mutex<Vec<Rgb>>>,
}

impl RecordingIndicator {
    pub fn colors(&self) -> Arc<Mutex<Vec<Rgb>>> {
        self.colors.clone()
    }

    pub fn last(&self) -> Option<Rgb> {
        self.colors.lock().unwrap().last().copied()
    }
}

impl Indicator for RecordingIndicator {
    fn set_color(&mut self, color: Rgb) {
        self.colors.lock().unwrap().push(color);
    }
}
