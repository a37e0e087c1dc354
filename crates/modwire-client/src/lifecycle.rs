//! Connection lifecycle as a pure state machine.
//!
//! The engine feeds transport and caller events in and performs the returned
//! actions; nothing here touches I/O or timers.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    Offline,
    Connecting,
    Online,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offline => "offline",
            Self::Connecting => "connecting",
            Self::Online => "online",
            Self::Closing => "closing",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    ConnectRequested,
    TransportConnected,
    TransportFailed,
    TransportClosed,
    DisconnectRequested,
    RetryElapsed,
    SetRetryDelay(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenTransport,
    FlushQueued,
    RejectPending,
    ScheduleReconnect(Duration),
    CloseTransport,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConnectionState,
    retry_delay: Duration,
    closed_on_purpose: bool,
    reopen_when_closed: bool,
}

impl Lifecycle {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Offline,
            retry_delay,
            closed_on_purpose: false,
            reopen_when_closed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn closed_on_purpose(&self) -> bool {
        self.closed_on_purpose
    }

    /// Whether a connect was requested while the previous transport was
    /// still closing.
    pub fn reopen_pending(&self) -> bool {
        self.reopen_when_closed
    }

    pub fn handle(&mut self, event: LifecycleEvent) -> Vec<Action> {
        use ConnectionState::{Closing, Connecting, Offline, Online};

        match (self.state, event) {
            (_, LifecycleEvent::SetRetryDelay(delay)) => {
                self.retry_delay = delay;
                Vec::new()
            }

            // A transport that finishes opening after a disconnect is shut
            // straight away; its close brings the machine back to Offline.
            (Closing, LifecycleEvent::TransportConnected) => vec![Action::CloseTransport],
            (Closing, LifecycleEvent::TransportClosed | LifecycleEvent::TransportFailed) => {
                if std::mem::take(&mut self.reopen_when_closed) {
                    self.state = Connecting;
                    vec![Action::OpenTransport]
                } else {
                    self.state = Offline;
                    Vec::new()
                }
            }
            // The latest caller instruction wins once the close completes.
            (Closing, LifecycleEvent::ConnectRequested) => {
                self.closed_on_purpose = false;
                self.reopen_when_closed = true;
                Vec::new()
            }
            (Closing, LifecycleEvent::DisconnectRequested) => {
                self.closed_on_purpose = true;
                self.reopen_when_closed = false;
                Vec::new()
            }

            (Offline, LifecycleEvent::ConnectRequested) => {
                self.closed_on_purpose = false;
                self.state = Connecting;
                vec![Action::OpenTransport]
            }
            (Connecting | Online, LifecycleEvent::ConnectRequested) => Vec::new(),

            (Connecting, LifecycleEvent::TransportConnected) => {
                self.state = Online;
                vec![Action::FlushQueued]
            }

            (
                Connecting | Online,
                LifecycleEvent::TransportFailed | LifecycleEvent::TransportClosed,
            ) => {
                self.state = Offline;
                let mut actions = vec![Action::RejectPending];
                if !self.closed_on_purpose {
                    actions.push(Action::ScheduleReconnect(self.retry_delay));
                }
                actions
            }

            (Connecting | Online, LifecycleEvent::DisconnectRequested) => {
                self.closed_on_purpose = true;
                self.state = Closing;
                vec![Action::RejectPending, Action::CloseTransport]
            }
            (Offline, LifecycleEvent::DisconnectRequested) => {
                self.closed_on_purpose = true;
                Vec::new()
            }

            (Offline, LifecycleEvent::RetryElapsed) if !self.closed_on_purpose => {
                self.state = Connecting;
                vec![Action::OpenTransport]
            }

            (_, LifecycleEvent::RetryElapsed)
            | (Offline | Online, LifecycleEvent::TransportConnected)
            | (Offline, LifecycleEvent::TransportFailed | LifecycleEvent::TransportClosed) => {
                Vec::new()
            }
        }
    }
}
