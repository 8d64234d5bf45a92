use crate::ClientError;

/// Where the connection is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// No socket and no connection attempt in progress.
    #[default]
    Disconnected,
    /// Connecting, or waiting out a reconnect backoff.
    Connecting,
    /// Connected with nothing in flight.
    Idle,
    /// A streaming request body is being written.
    Writing,
    /// Requests are on the wire and responses are outstanding.
    AwaitingResponse,
    /// `close` was called; queued requests are still being served.
    Closing,
    Destroyed,
}

/// Snapshot of the connection published after every state change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientStats {
    pub pending: usize,
    pub running: usize,
    pub size: usize,
    pub connected: bool,
    pub busy: bool,
    pub pipelining: usize,
    pub phase: Phase,
}

impl ClientStats {
    pub(crate) fn initial(pipelining: usize) -> Self {
        Self {
            pending: 0,
            running: 0,
            size: 0,
            connected: false,
            busy: false,
            pipelining,
            phase: Phase::Disconnected,
        }
    }
}

/// Connection lifecycle notifications, see [`Client::subscribe`](crate::Client::subscribe).
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    Connected,
    Disconnected(ClientError),
}
