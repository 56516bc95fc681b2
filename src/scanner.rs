use std::time::Duration;

use log::{debug, info};
use tokio::time::Instant;

use crate::error::{ReaderError, StartupError};
use crate::messages::Token;

/// Longest UID defined by ISO 14443 (triple size).
const MAX_UID_LEN: usize = 10;

/// Bus-level access to the proximity sensor.
pub trait TagReader {
    /// Returns the 32-bit firmware word reported by the chip.
    async fn identify(&mut self) -> Result<u32, ReaderError>;

    /// Reads the UID of the tag in the field, if any.
    async fn read_uid(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, ReaderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub scan_timeout: Duration,
    /// Quiet time the bus needs after a transaction.
    pub settle: Duration,
}

pub struct SensorPoller<R> {
    reader: R,
    settings: PollerSettings,
    settled_at: Instant,
}

impl<R: TagReader> SensorPoller<R> {
    /// Probes the reader. Failure here is fatal to the device.
    pub async fn start(mut reader: R, settings: PollerSettings) -> Result<Self, StartupError> {
        let firmware = reader
            .identify()
            .await
            .map_err(StartupError::SensorNotDetected)?;
        if firmware == 0 {
            return Err(StartupError::SensorMisidentified);
        }

        info!(
            "Found chip PN5{:X}, firmware ver. {}.{}",
            (firmware >> 24) & 0xFF,
            (firmware >> 16) & 0xFF,
            (firmware >> 8) & 0xFF
        );

        Ok(SensorPoller {
            reader,
            settings,
            settled_at: Instant::now() + settings.settle,
        })
    }

    /// Earliest instant at which the next scan may start.
    pub fn settled_at(&self) -> Instant {
        self.settled_at
    }

    /// One bounded read. Timeouts, transport errors and malformed UIDs
    /// all read as "no tag".
    pub async fn scan(&mut self) -> Option<Token> {
        let timeout = self.settings.scan_timeout;
        let result = tokio::time::timeout(timeout, self.reader.read_uid(timeout)).await;
        self.settled_at = Instant::now() + self.settings.settle;

        match result {
            Ok(Ok(Some(uid))) if uid.is_empty() || uid.len() > MAX_UID_LEN => {
                debug!("Discarding malformed UID of {} bytes", uid.len());
                None
            }
            Ok(Ok(Some(uid))) => Some(Token::new(uid)),
            Ok(Ok(None)) => None,
            Ok(Err(err)) => {
                debug!("Tag read failed: {}", err);
                None
            }
            Err(_) => {
                debug!("Tag read timed out after {:?}", timeout);
                None
            }
        }
    }
}
