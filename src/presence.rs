use log::info;
use tokio::time::Instant;

use crate::messages::{EdgeKind, PresenceEdge, Token};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresenceState {
    pub present: bool,
    /// Last token ever seen. Kept while absent so removals can name it.
    pub last_token: Option<Token>,
}

/// Turns successive scan readings into presence edges.
///
/// There is no debounce: a single missed read while a tag is present is
/// reported as a removal.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    state: PresenceState,
}

impl PresenceTracker {
    pub fn new() -> Self {
        PresenceTracker::default()
    }

    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    /// The token currently in the field, if any.
    pub fn current(&self) -> Option<&Token> {
        if self.state.present {
            self.state.last_token.as_ref()
        } else {
            None
        }
    }

    pub fn observe(&mut self, reading: Option<Token>, at: Instant) -> Option<PresenceEdge> {
        let kind = match (&reading, self.state.present) {
            (Some(_), false) => EdgeKind::Inserted,
            (Some(token), true) if self.state.last_token.as_ref() != Some(token) => {
                EdgeKind::Changed
            }
            (None, true) => EdgeKind::Removed,
            _ => return None,
        };

        match reading {
            Some(token) => {
                self.state.present = true;
                self.state.last_token = Some(token);
            }
            None => self.state.present = false,
        }

        let edge = PresenceEdge {
            kind,
            token: self.state.last_token.clone(),
            observed_at: at,
        };
        if let Some(token) = &edge.token {
            info!(
                "Presence edge {:?}: {} ({})",
                kind,
                token,
                token.kind().label()
            );
        }
        Some(edge)
    }
}
