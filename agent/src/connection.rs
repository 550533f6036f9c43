use std::fmt;

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closing,
    Terminated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Terminated => "terminated",
        })
    }
}

/// Everything the transport or the host process can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectRequested,
    ReconnectTimerFired,
    Established,
    Error,
    Closed,
    ShutdownRequested,
}

/// Side effects the driver must carry out after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Dial,
    ArmReconnectTimer,
    CancelReconnectTimer,
    CloseSocket,
}

/// Socket lifecycle of the single controller connection.
///
/// This type does no I/O. Every event goes through [`ConnectionManager::handle`],
/// which updates the state and returns the directives to execute. At most one
/// reconnect timer is ever outstanding, and nothing is dialed after shutdown.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    state: ConnectionState,
    reconnect_pending: bool,
    should_exit: bool,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn connect(&mut self) -> Vec<Directive> {
        self.handle(TransportEvent::ConnectRequested)
    }

    pub fn shutdown(&mut self) -> Vec<Directive> {
        self.handle(TransportEvent::ShutdownRequested)
    }

    pub fn handle(&mut self, event: TransportEvent) -> Vec<Directive> {
        if self.should_exit {
            debug!("ignoring {:?} after shutdown", event);
            return Vec::new();
        }

        let mut directives = Vec::new();
        match event {
            TransportEvent::ConnectRequested | TransportEvent::ReconnectTimerFired => {
                if event == TransportEvent::ReconnectTimerFired {
                    self.reconnect_pending = false;
                } else if self.reconnect_pending {
                    self.reconnect_pending = false;
                    directives.push(Directive::CancelReconnectTimer);
                }

                if self.state == ConnectionState::Idle {
                    self.state = ConnectionState::Connecting;
                    directives.push(Directive::Dial);
                } else {
                    debug!("connect requested while {}, ignoring", self.state);
                }
            }
            TransportEvent::Established => {
                if self.state != ConnectionState::Connecting {
                    debug!("unexpected connect while {}", self.state);
                }
                self.state = ConnectionState::Connected;
                if self.reconnect_pending {
                    self.reconnect_pending = false;
                    directives.push(Directive::CancelReconnectTimer);
                }
            }
            TransportEvent::Error => {
                if matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    self.state = ConnectionState::Closing;
                    directives.push(Directive::CloseSocket);
                }
                directives.extend(self.schedule_reconnect());
            }
            TransportEvent::Closed => {
                self.state = ConnectionState::Idle;
                directives.extend(self.schedule_reconnect());
            }
            TransportEvent::ShutdownRequested => {
                self.should_exit = true;
                if self.reconnect_pending {
                    self.reconnect_pending = false;
                    directives.push(Directive::CancelReconnectTimer);
                }
                if matches!(
                    self.state,
                    ConnectionState::Connecting
                        | ConnectionState::Connected
                        | ConnectionState::Closing
                ) {
                    directives.push(Directive::CloseSocket);
                }
                self.state = ConnectionState::Terminated;
            }
        }
        directives
    }

    /// Arms the reconnect timer unless one is already pending or the process is exiting.
    pub fn schedule_reconnect(&mut self) -> Option<Directive> {
        if self.should_exit {
            return None;
        }
        if self.reconnect_pending {
            info!("reconnect already scheduled");
            return None;
        }

        self.reconnect_pending = true;
        Some(Directive::ArmReconnectTimer)
    }
}
