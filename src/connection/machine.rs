//! Connection state machine.
//!
//! Transport activity reaches the manager as a [`TransportEvent`]. [`apply`]
//! maps the current state plus one event to the next state and the list of
//! side effects to run, without touching any I/O.

use snaplink_proto::{CloseCode, RelayMessage};
use tracing::warn;

use super::transport::TransportError;

/// Connection lifecycle.
///
/// `Paired` is a sub-state of `Open`: the transport is the same, the relay
/// has announced the remote counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Paired,
    Closing,
}

impl ConnectionState {
    /// A transport exists or is being opened.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Paired)
    }

    /// Frames can be written right now.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::Paired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Paired => "paired",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a transport can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    MessageReceived(String),
    Errored(TransportError),
    Closed { code: CloseCode, reason: String },
}

/// The manager facts a transition depends on.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub state: ConnectionState,
    pub announce: bool,
    /// `disconnect()` was called and its grace window has not expired.
    pub intentional: bool,
    pub shutting_down: bool,
    /// A connect was requested while the previous link was closing.
    pub pending_connect: bool,
    /// Retry counter after this close, already saturated at the ceiling.
    pub next_attempt: u32,
}

/// Side effects requested by a transition, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ResetRetry,
    Announce,
    FlushQueue,
    StartHeartbeat,
    StopHeartbeat,
    RecordActivity,
    ReplyPong,
    ScheduleReconnect { attempt: u32 },
    ReconnectNow,
    NotifyOpen,
    Dispatch(RelayMessage),
    NotifyError(TransportError),
    NotifyClose { code: CloseCode, reason: String },
}

impl Action {
    /// Handler callbacks. These run after the manager lock is released.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::NotifyOpen | Self::Dispatch(_) | Self::NotifyError(_) | Self::NotifyClose { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: ConnectionState,
    pub actions: Vec<Action>,
}

impl Transition {
    fn stay(state: ConnectionState) -> Self {
        Self {
            next: state,
            actions: Vec::new(),
        }
    }
}

/// Compute the transition for one event.
pub fn apply(ctx: &Context, event: TransportEvent) -> Transition {
    use ConnectionState::*;

    match event {
        TransportEvent::Opened => match ctx.state {
            Connecting => {
                let mut actions = vec![Action::ResetRetry];
                if ctx.announce {
                    actions.push(Action::Announce);
                }
                actions.extend([Action::FlushQueue, Action::StartHeartbeat, Action::NotifyOpen]);
                Transition {
                    next: Open,
                    actions,
                }
            }
            // A close was requested while the transport was still opening.
            // Keep the queue for the next link.
            other => Transition::stay(other),
        },

        TransportEvent::MessageReceived(text) => {
            if !ctx.state.is_open() {
                return Transition::stay(ctx.state);
            }
            let mut actions = vec![Action::RecordActivity];
            let message = match RelayMessage::parse(&text) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable frame");
                    return Transition {
                        next: ctx.state,
                        actions,
                    };
                }
            };

            let next = match message {
                RelayMessage::PartnerConnected => Paired,
                RelayMessage::PartnerDisconnected => Open,
                _ => ctx.state,
            };
            match message {
                RelayMessage::Ping { .. } => actions.push(Action::ReplyPong),
                ref m if m.is_internal_ack() => {}
                m => actions.push(Action::Dispatch(m)),
            }
            Transition { next, actions }
        }

        TransportEvent::Errored(error) => Transition {
            next: ctx.state,
            actions: vec![Action::NotifyError(error)],
        },

        TransportEvent::Closed { code, reason } => {
            let mut actions = vec![
                Action::StopHeartbeat,
                Action::NotifyClose {
                    code,
                    reason: reason.clone(),
                },
            ];
            if ctx.shutting_down {
                // Terminal.
            } else if ctx.pending_connect {
                actions.push(Action::ReconnectNow);
            } else if !ctx.intentional && !code.is_clean() {
                actions.push(Action::ScheduleReconnect {
                    attempt: ctx.next_attempt,
                });
            }
            Transition {
                next: Disconnected,
                actions,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(state: ConnectionState) -> Context {
        Context {
            state,
            announce: false,
            intentional: false,
            shutting_down: false,
            pending_connect: false,
            next_attempt: 1,
        }
    }

    fn closed(code: u16) -> TransportEvent {
        TransportEvent::Closed {
            code: CloseCode(code),
            reason: String::new(),
        }
    }

    #[test]
    fn test_open_resets_flushes_and_starts_heartbeat_in_order() {
        let t = apply(&ctx(ConnectionState::Connecting), TransportEvent::Opened);
        assert_eq!(t.next, ConnectionState::Open);
        assert_eq!(
            t.actions,
            vec![
                Action::ResetRetry,
                Action::FlushQueue,
                Action::StartHeartbeat,
                Action::NotifyOpen
            ]
        );
    }

    #[test]
    fn test_announce_precedes_flush() {
        let mut c = ctx(ConnectionState::Connecting);
        c.announce = true;
        let t = apply(&c, TransportEvent::Opened);
        assert_eq!(t.actions[1], Action::Announce);
        assert_eq!(t.actions[2], Action::FlushQueue);
    }

    #[test]
    fn test_open_while_closing_does_nothing() {
        let t = apply(&ctx(ConnectionState::Closing), TransportEvent::Opened);
        assert_eq!(t.next, ConnectionState::Closing);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn test_abnormal_close_schedules_reconnect() {
        let t = apply(&ctx(ConnectionState::Open), closed(1006));
        assert_eq!(t.next, ConnectionState::Disconnected);
        assert_eq!(t.actions[0], Action::StopHeartbeat);
        assert_eq!(
            t.actions.last(),
            Some(&Action::ScheduleReconnect { attempt: 1 })
        );
    }

    #[test]
    fn test_clean_close_does_not_reconnect() {
        let t = apply(&ctx(ConnectionState::Paired), closed(1000));
        assert_eq!(t.next, ConnectionState::Disconnected);
        assert!(!t.actions.iter().any(|a| matches!(
            a,
            Action::ScheduleReconnect { .. } | Action::ReconnectNow
        )));
    }

    #[test]
    fn test_intentional_and_shutdown_suppress_reconnect() {
        let mut c = ctx(ConnectionState::Open);
        c.intentional = true;
        let t = apply(&c, closed(1006));
        assert!(!t.actions.iter().any(|a| matches!(a, Action::ScheduleReconnect { .. })));

        let mut c = ctx(ConnectionState::Open);
        c.shutting_down = true;
        c.pending_connect = true;
        let t = apply(&c, closed(4001));
        assert!(!t.actions.iter().any(|a| matches!(
            a,
            Action::ScheduleReconnect { .. } | Action::ReconnectNow
        )));
    }

    #[test]
    fn test_pending_connect_reconnects_immediately() {
        let mut c = ctx(ConnectionState::Closing);
        c.pending_connect = true;
        let t = apply(&c, closed(4001));
        assert_eq!(t.actions.last(), Some(&Action::ReconnectNow));
    }

    #[test]
    fn test_error_never_changes_state() {
        let t = apply(
            &ctx(ConnectionState::Open),
            TransportEvent::Errored(TransportError::Receive("reset".into())),
        );
        assert_eq!(t.next, ConnectionState::Open);
        assert_eq!(
            t.actions,
            vec![Action::NotifyError(TransportError::Receive("reset".into()))]
        );
    }

    #[test]
    fn test_pong_and_probe_acks_are_consumed() {
        for raw in [r#"{"type":"pong"}"#, r#"{"type":"connection_verify_response"}"#] {
            let t = apply(
                &ctx(ConnectionState::Open),
                TransportEvent::MessageReceived(raw.to_string()),
            );
            assert_eq!(t.actions, vec![Action::RecordActivity], "{raw}");
        }
    }

    #[test]
    fn test_ping_is_answered_not_dispatched() {
        let t = apply(
            &ctx(ConnectionState::Open),
            TransportEvent::MessageReceived(r#"{"type":"ping","timestamp":1}"#.to_string()),
        );
        assert_eq!(t.actions, vec![Action::RecordActivity, Action::ReplyPong]);
    }

    #[test]
    fn test_partner_presence_toggles_paired() {
        let t = apply(
            &ctx(ConnectionState::Open),
            TransportEvent::MessageReceived(r#"{"type":"partner_connected"}"#.to_string()),
        );
        assert_eq!(t.next, ConnectionState::Paired);
        assert_eq!(
            t.actions,
            vec![
                Action::RecordActivity,
                Action::Dispatch(RelayMessage::PartnerConnected)
            ]
        );

        let t = apply(
            &ctx(ConnectionState::Paired),
            TransportEvent::MessageReceived(r#"{"type":"partner_disconnected"}"#.to_string()),
        );
        assert_eq!(t.next, ConnectionState::Open);
    }

    #[test]
    fn test_undecodable_frame_still_counts_as_activity() {
        let t = apply(
            &ctx(ConnectionState::Open),
            TransportEvent::MessageReceived("{not json".to_string()),
        );
        assert_eq!(t.next, ConnectionState::Open);
        assert_eq!(t.actions, vec![Action::RecordActivity]);
    }
}
