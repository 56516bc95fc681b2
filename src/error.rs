use thiserror::Error;

/// Conditions that stop the device before the control loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not initialize tag reader: {0}")]
    SensorNotDetected(#[source] ReaderError),

    #[error("tag reader did not report a firmware version")]
    SensorMisidentified,
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("reader I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed reader output: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link command failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("link command `{command}` exited with {status}")]
    CommandFailed { command: String, status: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquisitionFailure {
    #[error("network scan failed")]
    ScanFailed,

    #[error("no networks visible")]
    NoNetworksVisible,

    #[error("none of the configured networks is visible")]
    NoCandidateVisible,

    #[error("association timed out for every visible candidate: {attempted:?}")]
    AllCandidatesTimedOut { attempted: Vec<String> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncFailure {
    #[error("cannot sync time while disconnected")]
    NotConnected,

    #[error("time not synchronized after {attempts} polls")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one wifi network must be configured")]
    NoNetworks,

    #[error("invalid webhook url `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("`{0}` must be greater than zero")]
    ZeroInterval(&'static str),
}
