//! Per-connection lifecycle

use uuid::Uuid;

use crate::{ProtocolError, ProtocolResult};

/// Unique identifier assigned to each accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to correlate log lines
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

/// Connection state
///
/// `Accepted -> Handshaking -> Active -> Closed`, with `Closed` reachable
/// from every state and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport connection accepted, nothing exchanged yet
    Accepted,
    /// Public keys are being exchanged
    Handshaking,
    /// Session keys bound, frames flowing
    Active,
    /// Connection finished, normally or with an error
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{Accepted, Active, Closed, Handshaking};

        matches!(
            (self, next),
            (Accepted, Handshaking) | (Handshaking, Active) | (Accepted | Handshaking | Active, Closed)
        )
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: ConnectionState) -> ProtocolResult<()> {
        if !self.can_transition_to(next) {
            return Err(ProtocolError::InvalidStateTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }

    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}
