//! Per-channel connection state machine.
//!
//! Reconnect and backoff decisions are a pure transition table over
//! `(state, event)`, returning the actions the channel worker must
//! perform. This keeps the logic unit-testable without a live socket.

use common::backoff::ReconnectPolicy;
use std::time::Duration;

/// Connection lifecycle of one physical channel. Owned exclusively by
/// the channel worker; transitions drive reconnection scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Inputs to the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// `connect()` was called (or the service was constructed).
    ConnectRequested,
    /// A scheduled reconnect timer fired.
    RetryTimerFired,
    /// The socket handshake completed.
    SocketOpened,
    /// The socket closed (remote close frame or stream end).
    SocketClosed,
    /// The socket failed to open, or errored while open.
    SocketError,
    /// `disconnect()` was called. Never reschedules.
    DisconnectRequested,
}

/// Side effects the worker must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelAction {
    /// Open the physical socket.
    OpenSocket,
    /// Re-send a join for every room partitioned to this channel.
    ReplayRooms,
    /// Arm the reconnect timer with the given (jittered) delay.
    ScheduleRetry(Duration),
    /// Disarm a pending reconnect timer.
    CancelRetry,
    /// Close the physical socket.
    CloseSocket,
    /// Clear the dedup filter; ids from the dropped connection are
    /// irrelevant to a fresh one.
    ClearDedup,
}

pub struct ChannelStateMachine {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl ChannelStateMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Apply one event; returns the actions to perform, in order.
    pub fn handle(&mut self, event: ChannelEvent) -> Vec<ChannelAction> {
        use ChannelEvent::*;
        use ConnectionState::*;

        match (self.state, event) {
            (Disconnected, ConnectRequested) => {
                self.state = Connecting;
                vec![ChannelAction::CancelRetry, ChannelAction::OpenSocket]
            }
            (Disconnected, RetryTimerFired) => {
                self.state = Connecting;
                vec![ChannelAction::OpenSocket]
            }
            (Disconnected, DisconnectRequested) => {
                // Cancels a pending scheduled reconnect; nothing to close.
                vec![ChannelAction::CancelRetry, ChannelAction::ClearDedup]
            }

            (Connecting, SocketOpened) => {
                self.state = Open;
                self.attempts = 0;
                vec![ChannelAction::ReplayRooms]
            }
            (Connecting, SocketClosed) | (Connecting, SocketError) => {
                self.state = Disconnected;
                self.schedule_retry()
            }
            (Connecting, DisconnectRequested) => {
                self.state = Closing;
                vec![ChannelAction::CloseSocket, ChannelAction::ClearDedup]
            }

            (Open, SocketClosed) | (Open, SocketError) => {
                self.state = Disconnected;
                self.schedule_retry()
            }
            (Open, DisconnectRequested) => {
                self.state = Closing;
                vec![ChannelAction::CloseSocket, ChannelAction::ClearDedup]
            }

            (Closing, SocketClosed) | (Closing, SocketError) => {
                self.state = Disconnected;
                // Manual close: no reschedule.
                vec![]
            }

            // Idempotent or stale inputs.
            _ => vec![],
        }
    }

    fn schedule_retry(&mut self) -> Vec<ChannelAction> {
        let delay = self.policy.jittered_delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        vec![ChannelAction::ScheduleRetry(delay)]
    }
}
