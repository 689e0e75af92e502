use arcade_proto::{decode_control, ControlMessage, ProtocolError};
use tokio::time::Instant;
use tracing::{error, trace, warn};

use crate::{
    input::{InputEvent, InputTranslator},
    log_throttle::{should_log_input_event, InputLogKind},
    metrics,
    session::{Session, SessionRegistry},
};

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    UnmappedKey(String),
    UnmappedButton(i64),
    CleanupStarted,
}

impl DropReason {
    fn label(&self) -> &'static str {
        match self {
            DropReason::UnmappedKey(_) => "unmapped_key",
            DropReason::UnmappedButton(_) => "unmapped_button",
            DropReason::CleanupStarted => "closing",
        }
    }
}

/// What happened to one inbound control message.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Heartbeat,
    Relayed(InputEvent),
    Dropped(DropReason),
    Rejected(ProtocolError),
    SessionGone,
}

/// Routes viewer control messages into the owning session's simulation.
/// Nothing here ever tears a session down.
#[derive(Clone)]
pub struct InputRelay {
    registry: SessionRegistry,
    translator: InputTranslator,
}

impl InputRelay {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            translator: InputTranslator::new(),
        }
    }

    pub fn dispatch(&self, session_id: &str, raw: &str) -> RelayOutcome {
        let session = match self.live_session(session_id) {
            Ok(session) => session,
            Err(outcome) => return outcome,
        };
        match decode_control(raw) {
            Ok(message) => self.apply(&session, message),
            Err(err) => self.reject(session_id, err),
        }
    }

    pub fn dispatch_binary(&self, session_id: &str, len: usize) -> RelayOutcome {
        if let Err(outcome) = self.live_session(session_id) {
            return outcome;
        }
        trace!(session_id = %session_id, len, "binary control frame");
        self.reject(session_id, ProtocolError::Binary)
    }

    fn live_session(&self, session_id: &str) -> Result<std::sync::Arc<Session>, RelayOutcome> {
        let Ok(session) = self.registry.get(session_id) else {
            warn!(session_id = %session_id, "control message for unknown session dropped");
            metrics::INPUT_DROPPED.with_label_values(&["session_gone"]).inc();
            return Err(RelayOutcome::SessionGone);
        };
        if session.cleanup_started() {
            warn!(session_id = %session_id, "control message for closing session dropped");
            let reason = DropReason::CleanupStarted;
            metrics::INPUT_DROPPED
                .with_label_values(&[reason.label()])
                .inc();
            return Err(RelayOutcome::Dropped(reason));
        }
        Ok(session)
    }

    fn reject(&self, session_id: &str, err: ProtocolError) -> RelayOutcome {
        if should_log_input_event(InputLogKind::ProtocolError, session_id) {
            error!(session_id = %session_id, error = %err, "discarding control message");
        }
        metrics::INPUT_DROPPED.with_label_values(&["protocol"]).inc();
        RelayOutcome::Rejected(err)
    }

    fn apply(&self, session: &Session, message: ControlMessage) -> RelayOutcome {
        let event = match message {
            ControlMessage::Heartbeat => {
                session.record_heartbeat(Instant::now());
                return RelayOutcome::Heartbeat;
            }
            ControlMessage::KeyDown { key } => match self.translator.translate_key(&key) {
                Some(key) => InputEvent::KeyDown { key },
                None => return self.drop_unmapped(session, DropReason::UnmappedKey(key)),
            },
            ControlMessage::KeyUp { key } => match self.translator.translate_key(&key) {
                Some(key) => InputEvent::KeyUp { key },
                None => return self.drop_unmapped(session, DropReason::UnmappedKey(key)),
            },
            ControlMessage::PointerMove {
                movement_x,
                movement_y,
            } => InputEvent::PointerMotion {
                dx: movement_x,
                dy: movement_y,
            },
            ControlMessage::PointerDown { button } => {
                match self.translator.translate_button(button) {
                    Some(button) => InputEvent::ButtonDown { button },
                    None => {
                        return self.drop_unmapped(session, DropReason::UnmappedButton(button))
                    }
                }
            }
            ControlMessage::PointerUp { button } => match self.translator.translate_button(button)
            {
                Some(button) => InputEvent::ButtonUp { button },
                None => return self.drop_unmapped(session, DropReason::UnmappedButton(button)),
            },
        };
        session.simulation().apply_input(event);
        trace!(session_id = %session.id(), ?event, "input relayed");
        RelayOutcome::Relayed(event)
    }

    fn drop_unmapped(&self, session: &Session, reason: DropReason) -> RelayOutcome {
        let kind = match reason {
            DropReason::UnmappedButton(_) => InputLogKind::UnmappedButton,
            _ => InputLogKind::UnmappedKey,
        };
        if should_log_input_event(kind, session.id()) {
            match &reason {
                DropReason::UnmappedKey(key) => {
                    warn!(session_id = %session.id(), key = %key, "unmapped key ignored")
                }
                DropReason::UnmappedButton(button) => {
                    warn!(session_id = %session.id(), button, "unmapped pointer button ignored")
                }
                DropReason::CleanupStarted => {}
            }
        }
        metrics::INPUT_DROPPED
            .with_label_values(&[reason.label()])
            .inc();
        RelayOutcome::Dropped(reason)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::input::{Key, PointerButton};
    use crate::simulation::{test_pattern::TestPattern, ComputeDevice, SimulationContext};
    use crate::transport::{mock::MockTransportFactory, TransportFactory};

    async fn relay_with_session(id: &str) -> (InputRelay, Arc<Session>) {
        let registry = SessionRegistry::new();
        let (transport, _events) = MockTransportFactory::new().create(Vec::new()).await.unwrap();
        let sim = TestPattern::new(&SimulationContext {
            session_id: id.into(),
            category: "builtin".into(),
            simulation_id: "test-pattern".into(),
            fps: 30,
            device: ComputeDevice::Cpu,
        });
        let session = Arc::new(Session::new(id, "builtin", "test-pattern", Arc::new(sim), transport));
        registry.create(Arc::clone(&session)).unwrap();
        (InputRelay::new(registry), session)
    }

    #[tokio::test]
    async fn translates_keys_and_buttons() {
        let (relay, _) = relay_with_session("cafe0001").await;
        assert_eq!(
            relay.dispatch("cafe0001", r#"{"type":"keydown","key":"ArrowLeft"}"#),
            RelayOutcome::Relayed(InputEvent::KeyDown { key: Key::Left })
        );
        assert_eq!(
            relay.dispatch("cafe0001", r#"{"type":"mousedown","button":2}"#),
            RelayOutcome::Relayed(InputEvent::ButtonDown {
                button: PointerButton::Right
            })
        );
        assert_eq!(
            relay.dispatch("cafe0001", r#"{"type":"pointermove","movementX":3,"movementY":-1.5}"#),
            RelayOutcome::Relayed(InputEvent::PointerMotion { dx: 3.0, dy: -1.5 })
        );
    }

    #[tokio::test]
    async fn unmapped_and_malformed_input_is_dropped() {
        let (relay, session) = relay_with_session("cafe0002").await;
        assert_eq!(
            relay.dispatch("cafe0002", r#"{"type":"keydown","key":"F13"}"#),
            RelayOutcome::Dropped(DropReason::UnmappedKey("F13".into()))
        );
        assert_eq!(
            relay.dispatch("cafe0002", r#"{"type":"pointerup","button":7}"#),
            RelayOutcome::Dropped(DropReason::UnmappedButton(7))
        );
        assert!(matches!(
            relay.dispatch("cafe0002", "{nope"),
            RelayOutcome::Rejected(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            relay.dispatch("cafe0002", r#"{"type":"teleport"}"#),
            RelayOutcome::Rejected(ProtocolError::UnknownType(_))
        ));
        assert_eq!(
            relay.dispatch_binary("cafe0002", 16),
            RelayOutcome::Rejected(ProtocolError::Binary)
        );
        assert!(!session.cleanup_started());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_refreshes_liveness() {
        let (relay, session) = relay_with_session("cafe0003").await;
        let before = session.last_liveness();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(
            relay.dispatch("cafe0003", r#"{"type":"heartbeat"}"#),
            RelayOutcome::Heartbeat
        );
        assert_eq!(session.last_liveness(), before + Duration::from_secs(3));
    }

    #[tokio::test]
    async fn closing_or_missing_sessions_drop_input() {
        let (relay, session) = relay_with_session("cafe0004").await;
        assert_eq!(
            relay.dispatch("deadbeef", r#"{"type":"heartbeat"}"#),
            RelayOutcome::SessionGone
        );
        session.begin_cleanup();
        assert_eq!(
            relay.dispatch("cafe0004", r#"{"type":"heartbeat"}"#),
            RelayOutcome::Dropped(DropReason::CleanupStarted)
        );
    }
}
