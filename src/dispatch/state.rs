//! Pure dispatch loop state transitions

use std::fmt;

/// Dispatch loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// No live session; moves to `Connecting` immediately
    NoSession,
    /// Connecting and subscribing, with backoff between attempts
    Connecting,
    /// Receiving and dispatching frames
    Active,
    /// Unsubscribing, disconnecting, releasing resources
    Draining,
    /// Terminal
    Stopped,
}

impl DispatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchState::NoSession => "no_session",
            DispatchState::Connecting => "connecting",
            DispatchState::Active => "active",
            DispatchState::Draining => "draining",
            DispatchState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == DispatchState::Stopped
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Start,
    /// Work done without a state change (frame handled, registry applied)
    Continue,
    ConnectSucceeded,
    ConnectFailed,
    ReceiveFailed,
    ShutdownRequested,
    Drained,
}

/// Next state for an event (pure function)
///
/// Shutdown wins from every non-terminal state; the drain sequence is only
/// entered once because `Draining` and `Stopped` ignore further requests.
pub fn transition(state: DispatchState, event: LoopEvent) -> DispatchState {
    use DispatchState::*;
    use LoopEvent::*;

    match (state, event) {
        (Stopped, _) => Stopped,
        (Draining, Drained) => Stopped,
        (Draining, _) => Draining,
        (_, ShutdownRequested) => Draining,
        (NoSession, Start) => Connecting,
        (Connecting, ConnectSucceeded) => Active,
        (Connecting, ConnectFailed) => Connecting,
        (Active, ReceiveFailed) => Connecting,
        (current, _) => current,
    }
}
