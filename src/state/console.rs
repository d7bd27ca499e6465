use thiserror::Error;

/// Lifecycle phase of one remote-console link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsolePhase {
    /// No usable connection; the next command connects lazily.
    Disconnected,
    /// A handshake is in flight. Further connect requests are rejected.
    Connecting,
    /// Authenticated and ready for commands.
    Connected,
}

/// Events that drive a [`ConsoleStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// A caller started a handshake.
    ConnectStarted,
    /// The handshake completed and the password was accepted.
    Authenticated,
    /// The handshake failed, was refused, or timed out.
    ConnectFailed,
    /// An established link broke while sending or reading.
    LinkLost,
    /// The link was closed on purpose (descriptor change, removal, shutdown).
    Disconnect,
}

/// Error returned when an event does not apply to the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in when the event arrived.
    pub from: ConsolePhase,
    /// The rejected event.
    pub event: ConsoleEvent,
}

/// Per-server connection state machine.
///
/// The generation counter advances whenever a handshake starts or the link
/// is torn down on purpose, so a handshake that finishes after its entry was
/// reset can recognise itself as stale.
#[derive(Debug, Clone)]
pub struct ConsoleStateMachine {
    phase: ConsolePhase,
    generation: u64,
}

impl Default for ConsoleStateMachine {
    fn default() -> Self {
        Self {
            phase: ConsolePhase::Disconnected,
            generation: 0,
        }
    }
}

impl ConsoleStateMachine {
    /// Start disconnected at generation zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> ConsolePhase {
        self.phase
    }

    /// Advances when a handshake starts or the link is reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Apply `event`, returning the new phase.
    pub fn fire(&mut self, event: ConsoleEvent) -> Result<ConsolePhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        if matches!(event, ConsoleEvent::ConnectStarted | ConsoleEvent::Disconnect) {
            self.generation += 1;
        }
        self.phase = next;
        Ok(next)
    }

    fn compute_transition(&self, event: ConsoleEvent) -> Result<ConsolePhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (ConsolePhase::Disconnected, ConsoleEvent::ConnectStarted) => ConsolePhase::Connecting,
            (ConsolePhase::Connecting, ConsoleEvent::Authenticated) => ConsolePhase::Connected,
            (ConsolePhase::Connecting, ConsoleEvent::ConnectFailed) => ConsolePhase::Disconnected,
            (ConsolePhase::Connected, ConsoleEvent::LinkLost) => ConsolePhase::Disconnected,
            (_, ConsoleEvent::Disconnect) => ConsolePhase::Disconnected,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_disconnected() {
        let sm = ConsoleStateMachine::new();
        assert_eq!(sm.phase(), ConsolePhase::Disconnected);
        assert_eq!(sm.generation(), 0);
    }

    #[test]
    fn happy_path_and_link_loss() {
        let mut sm = ConsoleStateMachine::new();
        assert_eq!(
            sm.fire(ConsoleEvent::ConnectStarted).unwrap(),
            ConsolePhase::Connecting
        );
        assert_eq!(
            sm.fire(ConsoleEvent::Authenticated).unwrap(),
            ConsolePhase::Connected
        );
        assert_eq!(
            sm.fire(ConsoleEvent::LinkLost).unwrap(),
            ConsolePhase::Disconnected
        );
    }

    #[test]
    fn second_connect_while_connecting_is_rejected() {
        let mut sm = ConsoleStateMachine::new();
        sm.fire(ConsoleEvent::ConnectStarted).unwrap();

        let err = sm.fire(ConsoleEvent::ConnectStarted).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                from: ConsolePhase::Connecting,
                event: ConsoleEvent::ConnectStarted,
            }
        );
        assert_eq!(sm.phase(), ConsolePhase::Connecting);
    }

    #[test]
    fn failed_handshake_frees_the_entry() {
        let mut sm = ConsoleStateMachine::new();
        sm.fire(ConsoleEvent::ConnectStarted).unwrap();
        sm.fire(ConsoleEvent::ConnectFailed).unwrap();
        assert_eq!(
            sm.fire(ConsoleEvent::ConnectStarted).unwrap(),
            ConsolePhase::Connecting
        );
    }

    #[test]
    fn disconnect_invalidates_inflight_handshake() {
        let mut sm = ConsoleStateMachine::new();
        sm.fire(ConsoleEvent::ConnectStarted).unwrap();
        let started = sm.generation();

        sm.fire(ConsoleEvent::Disconnect).unwrap();
        assert_ne!(sm.generation(), started);
        assert!(sm.fire(ConsoleEvent::Authenticated).is_err());
    }

    #[test]
    fn authenticated_without_handshake_is_invalid() {
        let mut sm = ConsoleStateMachine::new();
        let err = sm.fire(ConsoleEvent::Authenticated).unwrap_err();
        assert_eq!(err.from, ConsolePhase::Disconnected);
    }
}
