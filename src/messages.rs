use std::fmt;

use tokio::time::Instant;

/// Classification of a tag, derived only from the UID length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// 4-byte UID (Mifare Classic).
    ShortForm,
    /// 7-byte UID (ISO 14443-4).
    ExtendedForm,
    Unclassified,
}

impl TokenKind {
    pub fn from_len(len: usize) -> Self {
        match len {
            4 => TokenKind::ShortForm,
            7 => TokenKind::ExtendedForm,
            _ => TokenKind::Unclassified,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TokenKind::ShortForm => "Mifare Classic (4-byte)",
            TokenKind::ExtendedForm => "ISO14443-4 (7-byte)",
            TokenKind::Unclassified => "Unknown",
        }
    }
}

/// A UID read from the sensor. Equality is byte equality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    id: Vec<u8>,
}

impl Token {
    pub fn new(id: Vec<u8>) -> Self {
        Token { id }
    }

    pub fn kind(&self) -> TokenKind {
        TokenKind::from_len(self.id.len())
    }
}

/// Lowercase hex pairs separated by single spaces, e.g. `aa bb cc dd`.
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.id.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    Inserted,
    Removed,
    Changed,
}

impl EdgeKind {
    /// Wire name. `Changed` is reported as an insert.
    pub fn event_type(&self) -> &'static str {
        match self {
            EdgeKind::Inserted | EdgeKind::Changed => "tag_insert",
            EdgeKind::Removed => "tag_removed",
        }
    }

    pub fn tag_present(&self) -> bool {
        !matches!(self, EdgeKind::Removed)
    }
}

/// A presence transition. For `Removed` the token is the one that left.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceEdge {
    pub kind: EdgeKind,
    pub token: Option<Token>,
    pub observed_at: Instant,
}

/// Snapshot of the network session handed to the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub connected: bool,
    pub ssid: Option<String>,
    pub signal: Option<i32>,
    pub time_synced: bool,
    /// Formatted local time, or the "not synced" placeholder.
    pub timestamp: String,
}

impl SessionStatus {
    pub fn wifi_status(&self) -> String {
        match (&self.ssid, self.connected) {
            (Some(ssid), true) => format!(
                "Connected to {} ({} dBm)",
                ssid,
                self.signal.unwrap_or_default()
            ),
            _ => "Disconnected".to_string(),
        }
    }

    pub fn time_status(&self) -> &'static str {
        if self.time_synced {
            "Synced with NTP"
        } else {
            "Not synced"
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Rejected(u16),
    Unreachable,
}

impl DeliveryOutcome {
    pub fn from_status(code: u16) -> Self {
        match code {
            0 => DeliveryOutcome::Unreachable,
            1..=299 => DeliveryOutcome::Delivered,
            _ => DeliveryOutcome::Rejected(code),
        }
    }
}
