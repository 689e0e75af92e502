use std::{sync::Arc, time::Duration};

use arcade_proto::SessionDescription;
use beach_arcade::{
    catalog::{SimulationCatalog, SimulationInfo},
    cleanup::{CleanupOutcome, CleanupTrigger},
    config::AppConfig,
    input::{InputEvent, Key},
    negotiation::NegotiationError,
    relay::{DropReason, RelayOutcome},
    session::SessionState,
    simulation::scripted::{ScriptedFactory, ScriptedOptions, ScriptedSimulation},
    state::{AppState, StateError},
    transport::{
        mock::{MockBehavior, MockTransport, MockTransportFactory},
        PeerState, PeerTransport,
    },
};
use serde_json::json;

struct Harness {
    state: AppState,
    sims: Arc<ScriptedFactory>,
    transports: Arc<MockTransportFactory>,
}

impl Harness {
    fn new() -> Self {
        Self::with(ScriptedOptions::default(), MockBehavior::default())
    }

    fn with(options: ScriptedOptions, behavior: MockBehavior) -> Self {
        let sims = Arc::new(ScriptedFactory::new(options));
        let mut catalog = SimulationCatalog::new();
        catalog.register(
            SimulationInfo {
                category: "arcade".into(),
                id: "scripted".into(),
                name: "Scripted".into(),
                title: None,
                description: None,
                tags: Vec::new(),
                author: None,
            },
            sims.clone(),
        );
        let transports = Arc::new(MockTransportFactory::with_behavior(behavior));
        let config = AppConfig {
            local_only: Some("1".into()),
            ..AppConfig::default()
        };
        let state = AppState::new(config, catalog, transports.clone());
        Self {
            state,
            sims,
            transports,
        }
    }

    async fn open(&self) -> (String, Arc<ScriptedSimulation>, Arc<MockTransport>) {
        let response = self
            .state
            .negotiation
            .negotiate("arcade", "scripted", offer(), "localhost")
            .await
            .expect("negotiated");
        let sim = self.sims.instances().pop().expect("simulation created");
        let transport = self.transports.last().expect("transport created");
        (response.session_id, sim, transport)
    }
}

fn offer() -> SessionDescription {
    SessionDescription {
        sdp: "v=0\r\n".into(),
        kind: "offer".into(),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn negotiated_session_is_registered_and_active() {
    let h = Harness::new();
    let (session_id, sim, transport) = h.open().await;

    assert!(!session_id.is_empty());
    assert_eq!(h.state.registry.len(), 1);
    let session = h.state.registry.get(&session_id).unwrap();
    assert!(!session.cleanup_started());
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(sim.start_calls(), 1);
    assert_eq!(h.state.registry.connection_count(), 1);
    assert_eq!(h.sims.contexts()[0].fps, 30);
    assert_eq!(h.sims.contexts()[0].session_id, session_id);
    assert_eq!(transport.state(), PeerState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn silent_session_is_swept_after_threshold() {
    let h = Harness::new();
    let (session_id, sim, transport) = h.open().await;
    let monitor = h.state.liveness_monitor();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(monitor.sweep().await.is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(monitor.sweep().await, vec![session_id.clone()]);
    assert_eq!(sim.stop_calls(), 1);
    assert_eq!(transport.close_calls(), 1);
    assert!(h.state.registry.get(&session_id).is_err());
    assert_eq!(h.state.registry.connection_count(), 0);

    assert!(monitor.sweep().await.is_empty());
    assert_eq!(sim.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_resets_staleness() {
    let h = Harness::new();
    let (session_id, sim, transport) = h.open().await;
    let monitor = h.state.liveness_monitor();

    tokio::time::sleep(Duration::from_secs(4)).await;
    transport.send_text(r#"{"type":"heartbeat"}"#);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(monitor.sweep().await.is_empty());
    assert_eq!(h.state.registry.len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(monitor.sweep().await, vec![session_id]);
    assert_eq!(sim.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_failure_and_sweep_clean_up_once() {
    let h = Harness::new();
    let (session_id, sim, transport) = h.open().await;
    let monitor = h.state.liveness_monitor();
    tokio::time::sleep(Duration::from_secs(6)).await;

    let (outcome, swept) = tokio::join!(
        h.state
            .cleanup
            .cleanup(&session_id, CleanupTrigger::TransportFailed),
        monitor.sweep()
    );
    let completed = usize::from(outcome == CleanupOutcome::Completed) + swept.len();
    assert_eq!(completed, 1);
    assert_eq!(sim.stop_calls(), 1);
    assert_eq!(transport.close_calls(), 1);
    assert!(h.state.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_cleanup_during_slow_close_is_a_no_op() {
    let h = Harness::with(
        ScriptedOptions::default(),
        MockBehavior {
            hang_on_close: true,
            ..MockBehavior::default()
        },
    );
    let (session_id, sim, transport) = h.open().await;
    let session = h.state.registry.get(&session_id).unwrap();

    let cleanup = h.state.cleanup.clone();
    let id = session_id.clone();
    let first = tokio::spawn(async move { cleanup.cleanup(&id, CleanupTrigger::TransportFailed).await });
    wait_until(|| session.cleanup_started()).await;

    assert_eq!(
        h.state
            .cleanup
            .cleanup(&session_id, CleanupTrigger::LivenessTimeout)
            .await,
        CleanupOutcome::AlreadyStarted
    );
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(h.state.liveness_monitor().sweep().await.is_empty());

    assert_eq!(first.await.unwrap(), CleanupOutcome::Completed);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.cancellation().is_cancelled());
    assert_eq!(sim.stop_calls(), 1);
    assert_eq!(transport.close_calls(), 1);
    assert!(h.state.registry.is_empty());
}

#[tokio::test]
async fn cleanup_of_unknown_session_only_logs() {
    let h = Harness::new();
    assert_eq!(
        h.state
            .cleanup
            .cleanup("feedface", CleanupTrigger::Explicit)
            .await,
        CleanupOutcome::UnknownSession
    );
    assert!(matches!(
        h.state.close_session("feedface").await,
        Err(StateError::SessionNotFound)
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_transport_tears_session_down() {
    let h = Harness::new();
    let (session_id, sim, transport) = h.open().await;

    transport.set_state(PeerState::Failed);
    wait_until(|| h.state.registry.is_empty()).await;
    assert!(h.state.registry.get(&session_id).is_err());
    assert_eq!(sim.stop_calls(), 1);
    assert_eq!(transport.close_calls(), 1);
    assert_eq!(transport.state(), PeerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn closed_transport_is_not_closed_again() {
    let h = Harness::new();
    let (_, sim, transport) = h.open().await;

    transport.set_state(PeerState::Closed);
    wait_until(|| h.state.registry.is_empty()).await;
    assert_eq!(sim.stop_calls(), 1);
    assert_eq!(transport.close_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unmapped_key_is_dropped_and_session_stays_active() {
    let h = Harness::new();
    let (session_id, sim, transport) = h.open().await;

    assert_eq!(
        h.state
            .relay
            .dispatch(&session_id, r#"{"type":"keydown","key":"Unmapped123"}"#),
        RelayOutcome::Dropped(DropReason::UnmappedKey("Unmapped123".into()))
    );
    transport.send_text(r#"{"type":"keydown","key":"Unmapped123"}"#);
    transport.send_text(r#"{"type":"warp","key":"KeyW"}"#);
    transport.send_text(r#"{"type":"keydown","key":"KeyW"}"#);
    wait_until(|| !sim.inputs().is_empty()).await;

    assert_eq!(sim.inputs(), vec![InputEvent::KeyDown { key: Key::W }]);
    let session = h.state.registry.get(&session_id).unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert!(!session.cleanup_started());
}

#[tokio::test(start_paused = true)]
async fn panicking_input_handler_keeps_the_session_alive() {
    let h = Harness::with(
        ScriptedOptions {
            panic_on_input: true,
            ..ScriptedOptions::default()
        },
        MockBehavior::default(),
    );
    let (session_id, _, transport) = h.open().await;
    let session = h.state.registry.get(&session_id).unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    let before = session.last_liveness();
    transport.send_text(r#"{"type":"pointermove","movementX":1e12,"movementY":0}"#);
    transport.send_text(r#"{"type":"heartbeat"}"#);
    wait_until(|| session.last_liveness() > before).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.state.liveness_monitor().sweep().await.is_empty());
    assert_eq!(session.state(), SessionState::Active);

    transport.set_state(PeerState::Failed);
    wait_until(|| h.state.registry.is_empty()).await;
}

#[tokio::test(start_paused = true)]
async fn huge_pointer_motion_on_builtin_pattern_is_harmless() {
    let transports = Arc::new(MockTransportFactory::new());
    let config = AppConfig {
        local_only: Some("1".into()),
        ..AppConfig::default()
    };
    let state = AppState::new(config, SimulationCatalog::with_builtins(), transports.clone());
    let response = state
        .negotiation
        .negotiate("builtin", "test-pattern", offer(), "localhost")
        .await
        .expect("negotiated");
    let transport = transports.last().unwrap();
    let session = state.registry.get(&response.session_id).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = session.last_liveness();
    transport.send_text(r#"{"type":"pointermove","movementX":1e12,"movementY":-1e12}"#);
    transport.send_text(r#"{"type":"heartbeat"}"#);
    wait_until(|| session.last_liveness() > before).await;
    assert!(!session.cleanup_started());
    assert!(transport.frame_count() > 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_parameters_leave_simulation_untouched() {
    let h = Harness::new();
    let (session_id, sim, _) = h.open().await;

    h.state
        .update_parameters(&session_id, json!({"gain": 1}))
        .unwrap();
    let err = h
        .state
        .update_parameters(&session_id, json!({"gain": "loud"}))
        .unwrap_err();
    assert!(matches!(err, StateError::Params(_)));
    assert_eq!(sim.params(), json!({"gain": 1}));

    assert!(matches!(
        h.state.update_parameters("00000000", json!({})),
        Err(StateError::SessionNotFound)
    ));
}

#[tokio::test]
async fn unknown_simulation_allocates_nothing() {
    let h = Harness::new();
    let err = h
        .state
        .negotiation
        .negotiate("arcade", "missing", offer(), "localhost")
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::UnknownSimulation { .. }));
    let err = h
        .state
        .negotiation
        .negotiate("nowhere", "scripted", offer(), "localhost")
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::UnknownCategory(_)));

    assert!(h.state.registry.is_empty());
    assert!(h.sims.instances().is_empty());
    assert!(h.transports.created().is_empty());
}

#[tokio::test]
async fn failed_start_releases_the_transport() {
    let h = Harness::with(
        ScriptedOptions {
            fail_start: true,
            ..ScriptedOptions::default()
        },
        MockBehavior::default(),
    );
    let err = h
        .state
        .negotiation
        .negotiate("arcade", "scripted", offer(), "localhost")
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::Simulation(_)));
    assert!(h.state.registry.is_empty());
    assert_eq!(h.transports.last().unwrap().close_calls(), 1);
    assert_eq!(h.sims.instances()[0].stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn frames_flow_at_cadence_and_stalls_stay_local() {
    let h = Harness::new();
    let (_, _, fast) = h.open().await;
    h.sims.set_options(ScriptedOptions {
        frame_delay: Some(Duration::from_millis(500)),
        ..ScriptedOptions::default()
    });
    let (_, _, slow) = h.open().await;

    tokio::time::sleep(Duration::from_secs(1)).await;

    let frames = fast.frames();
    assert!(
        (28..=32).contains(&frames.len()),
        "fast session sent {} frames",
        frames.len()
    );
    for pair in frames.windows(2) {
        assert!(pair[1].pts > pair[0].pts);
        assert!(pair[1].pts - pair[0].pts >= 2_900);
    }
    assert!(slow.frame_count() <= 3);
}

#[tokio::test(start_paused = true)]
async fn nothing_reaches_the_session_after_cleanup_starts() {
    let h = Harness::new();
    let (session_id, sim, transport) = h.open().await;

    transport.send_text(r#"{"type":"keydown","key":"KeyW"}"#);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(transport.frame_count() > 0);
    assert_eq!(sim.inputs().len(), 1);

    assert_eq!(
        h.state
            .cleanup
            .cleanup(&session_id, CleanupTrigger::Explicit)
            .await,
        CleanupOutcome::Completed
    );
    let frames_sent = transport.frame_count();
    let frames_rendered = sim.frames_rendered();

    transport.send_text(r#"{"type":"keydown","key":"KeyA"}"#);
    assert_eq!(
        h.state
            .relay
            .dispatch(&session_id, r#"{"type":"keydown","key":"KeyA"}"#),
        RelayOutcome::SessionGone
    );
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(transport.frame_count(), frames_sent);
    assert_eq!(sim.frames_rendered(), frames_rendered);
    assert_eq!(sim.inputs(), vec![InputEvent::KeyDown { key: Key::W }]);
}

#[tokio::test(start_paused = true)]
async fn panicking_stop_does_not_block_the_sweep() {
    let h = Harness::with(
        ScriptedOptions {
            panic_on_stop: true,
            ..ScriptedOptions::default()
        },
        MockBehavior::default(),
    );
    let (first, ..) = h.open().await;
    h.sims.set_options(ScriptedOptions::default());
    let (second, ..) = h.open().await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    let mut swept = h.state.liveness_monitor().sweep().await;
    swept.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(swept, expected);
    assert!(h.state.registry.is_empty());
    for sim in h.sims.instances() {
        assert_eq!(sim.stop_calls(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn periodic_monitor_runs_until_stopped() {
    let h = Harness::new();
    let (session_id, ..) = h.open().await;
    let task = Arc::new(h.state.liveness_monitor()).spawn(Duration::from_secs(30));

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(h.state.registry.get(&session_id).is_ok());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(h.state.registry.is_empty());

    task.stop().await;
    assert!(task.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_session() {
    let h = Harness::new();
    let (_, first_sim, first_tx) = h.open().await;
    let (_, second_sim, second_tx) = h.open().await;

    h.state.cleanup.shutdown().await;

    assert!(h.state.registry.is_empty());
    assert_eq!(h.state.registry.connection_count(), 0);
    for sim in [first_sim, second_sim] {
        assert_eq!(sim.stop_calls(), 1);
    }
    for tx in [first_tx, second_tx] {
        assert_eq!(tx.close_calls(), 1);
        assert_eq!(tx.state(), PeerState::Closed);
    }
}
