use crate::common::{agent, capture_at, reach, INDEX_JS};
use livebug::agent::capture::CaptureError;
use livebug::agent::engine::{EngineError, ExecutionEngine, RemoteValue};
use livebug::agent::{Error, Phase};

#[test]
fn test_breakpoint_pending_while_disconnected() {
    let (mut agent, _) = agent();
    agent.engine_mut().sever();

    let err = agent.set(capture_at("bp-1", "index.js", 12)).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(agent.phase("bp-1"), Some(Phase::Received));
    assert_eq!(agent.pending_ids().collect::<Vec<_>>(), vec!["bp-1"]);
    assert!(agent.control_plane().updates().is_empty());

    // invalid breakpoints are rejected without the engine
    assert_eq!(
        agent
            .set(capture_at("bp-2", "index.js", 12).with_condition("x = 1"))
            .unwrap(),
        Phase::Rejected
    );

    agent.reconnect().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Waiting));
    assert_eq!(agent.pending_ids().count(), 0);
    assert_eq!(agent.engine().native_breakpoint_count(), 1);

    assert!(reach(&mut agent, INDEX_JS, 12, vec![]));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));
}

#[test]
fn test_disconnect_during_set() {
    let (mut agent, _) = agent();
    agent.engine_mut().fail_next_set(EngineError::Disconnected);

    let err = agent.set(capture_at("bp-1", "index.js", 12)).unwrap_err();
    assert!(matches!(err, Error::Engine(EngineError::Disconnected)));
    assert_eq!(agent.phase("bp-1"), Some(Phase::Received));

    agent.reconnect().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Waiting));
}

#[test]
fn test_disconnect_during_capture() {
    let (mut agent, _) = agent();
    agent.set(capture_at("bp-1", "index.js", 12)).unwrap();
    assert!(reach(&mut agent, INDEX_JS, 12, vec![("x", RemoteValue::Null)]));
    agent.engine_mut().fail_next_read(EngineError::Disconnected);

    let err = agent.tick().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        Error::Capture(CaptureError::Engine(EngineError::Disconnected))
    ));
    assert!(!agent.engine().is_connected());

    // breakpoint is reported even though the engine is gone
    let updates = agent.control_plane().updates();
    assert_eq!(updates.len(), 1);
    let bp = &updates[0];
    assert!(bp.is_final_state);
    assert!(bp.stack_frames.is_empty());
    assert!(bp
        .status
        .as_ref()
        .unwrap()
        .description
        .format
        .starts_with(livebug::agent::format::CAPTURE_BREAKPOINT_DATA));
    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));

    agent.reconnect().unwrap();
    assert_eq!(agent.engine().native_breakpoint_count(), 0);
    assert_eq!(agent.active_ids().count(), 0);
}

#[test]
fn test_engine_failure_rejects_breakpoint() {
    let (mut agent, _) = agent();
    agent
        .engine_mut()
        .fail_next_set(EngineError::Protocol("no such script".to_string()));

    assert_eq!(
        agent.set(capture_at("bp-1", "index.js", 12)).unwrap(),
        Phase::Rejected
    );
    let updates = agent.control_plane().updates();
    let status = updates[0].status.as_ref().unwrap();
    assert!(status
        .description
        .format
        .starts_with(livebug::agent::format::ENGINE_BREAKPOINT_ERROR));
}

#[test]
fn test_reconnect_restores_active_breakpoints() {
    let (mut agent, _) = agent();
    agent.set(capture_at("bp-1", "index.js", 12)).unwrap();
    agent.set(capture_at("bp-2", "index.js", 12)).unwrap();
    agent.set(capture_at("bp-3", "index.js", 40)).unwrap();
    assert_eq!(agent.engine().native_breakpoint_count(), 2);

    agent.engine_mut().sever();
    assert_eq!(agent.engine().native_breakpoint_count(), 0);
    assert!(!reach(&mut agent, INDEX_JS, 12, vec![]));

    agent.reconnect().unwrap();
    assert_eq!(agent.engine().native_breakpoint_count(), 2);
    assert_eq!(
        agent.active_ids().collect::<Vec<_>>(),
        vec!["bp-1", "bp-2", "bp-3"]
    );

    assert!(reach(&mut agent, INDEX_JS, 12, vec![("x", RemoteValue::Null)]));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));
    assert_eq!(agent.phase("bp-2"), Some(Phase::Completed));
    assert_eq!(agent.phase("bp-3"), Some(Phase::Waiting));
    assert_eq!(agent.engine().native_breakpoint_count(), 1);
}

#[test]
fn test_sync_holds_breakpoints_until_reconnect() {
    let (mut agent, _) = agent();
    agent.engine_mut().sever();
    agent
        .control_plane()
        .set_active(vec![capture_at("bp-1", "index.js", 12)]);

    assert!(agent.sync().unwrap_err().is_fatal());
    // listed again while still disconnected
    assert!(agent.sync().is_ok());
    assert_eq!(agent.pending_ids().count(), 1);

    agent.control_plane().set_active(vec![]);
    agent.sync().unwrap();
    assert_eq!(agent.pending_ids().count(), 0);

    agent.reconnect().unwrap();
    assert!(agent.phase("bp-1").is_none());
    assert_eq!(agent.engine().native_breakpoint_count(), 0);
}
