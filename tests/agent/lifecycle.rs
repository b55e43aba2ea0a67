use crate::common::{agent, agent_with, capture_at, origin, reach, test_config, INDEX_JS};
use livebug::agent::breakpoint::{Breakpoint, Reference};
use livebug::agent::engine::heap::HeapEngine;
use livebug::agent::engine::{ExecutionEngine, ObjectId, RemoteValue, Scope, ScopeKind};
use livebug::agent::format;
use livebug::agent::Phase;
use std::time::Duration;

#[test]
fn test_capture_completes_once() {
    let (mut agent, clock) = agent();
    let phase = agent
        .set(capture_at("bp-1", "index.js", 12).with_expressions(["user.name"]))
        .unwrap();
    assert_eq!(phase, Phase::Waiting);
    assert_eq!(agent.engine().native_breakpoint_count(), 1);

    // line without breakpoint
    assert!(!reach(&mut agent, INDEX_JS, 11, vec![]));

    clock.advance(Duration::from_secs(3));
    let user = agent.engine_mut().object(
        "User",
        vec![
            ("name", RemoteValue::string("alice")),
            ("age", RemoteValue::Number(33.0)),
        ],
    );
    assert!(reach(&mut agent, INDEX_JS, 12, vec![("user", user.clone())]));
    assert!(reach(&mut agent, INDEX_JS, 12, vec![("user", user)]));
    agent.tick().unwrap();

    let updates = agent.control_plane().updates();
    assert_eq!(updates.len(), 1);
    let bp = &updates[0];
    assert!(bp.is_final_state);
    assert!(bp.status.is_none());
    assert_eq!(
        bp.final_time,
        Some(origin() + chrono::Duration::seconds(3))
    );

    let frame = &bp.stack_frames[0];
    assert_eq!(frame.function, "handler");
    assert_eq!(frame.location.path, "index.js");
    assert_eq!(frame.location.line, 12);
    let user = frame.locals.iter().find(|v| v.name.as_deref() == Some("user")).unwrap();
    let user_idx = user.var_table_index.unwrap();
    let members = &bp.variable_table[user_idx].members;
    assert_eq!(members[1].name.as_deref(), Some("age"));
    assert_eq!(members[1].value.as_deref(), Some("33"));

    assert_eq!(bp.evaluated_expressions.len(), 1);
    assert_eq!(bp.evaluated_expressions[0].name.as_deref(), Some("user.name"));
    assert_eq!(bp.evaluated_expressions[0].value.as_deref(), Some("alice"));

    let phase = agent.phase("bp-1").unwrap();
    assert_eq!(phase, Phase::Completed);
    assert!(phase.is_terminal());
    assert_eq!(agent.engine().native_breakpoint_count(), 0);
    assert_eq!(agent.active_ids().count(), 0);
}

#[test]
fn test_set_is_idempotent() {
    let (mut agent, _) = agent();
    let bp = capture_at("bp-1", "index.js", 12);
    assert_eq!(agent.set(bp.clone()).unwrap(), Phase::Waiting);
    assert_eq!(agent.set(bp).unwrap(), Phase::Waiting);
    assert_eq!(agent.engine().native_breakpoint_count(), 1);
    assert_eq!(agent.active_ids().collect::<Vec<_>>(), vec!["bp-1"]);
}

#[test]
fn test_breakpoints_share_native_breakpoint() {
    let (mut agent, _) = agent();
    agent.set(capture_at("bp-1", "index.js", 20)).unwrap();
    agent.set(capture_at("bp-2", "/srv/app/index.js", 20)).unwrap();
    assert_eq!(agent.engine().native_breakpoint_count(), 1);

    agent.clear("bp-1").unwrap();
    assert_eq!(agent.engine().native_breakpoint_count(), 1);

    assert!(reach(&mut agent, INDEX_JS, 20, vec![("x", RemoteValue::Number(1.0))]));
    agent.tick().unwrap();
    let updates = agent.control_plane().updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].id.as_deref(), Some("bp-2"));
    assert_eq!(agent.engine().native_breakpoint_count(), 0);
}

#[test]
fn test_one_hit_completes_all_breakpoints_at_location() {
    let (mut agent, _) = agent();
    agent.set(capture_at("bp-1", "index.js", 20)).unwrap();
    agent.set(capture_at("bp-2", "index.js", 20)).unwrap();

    assert!(reach(&mut agent, INDEX_JS, 20, vec![]));
    agent.tick().unwrap();

    let plane = agent.control_plane();
    assert_eq!(plane.updates_of("bp-1").len(), 1);
    assert_eq!(plane.updates_of("bp-2").len(), 1);
    assert_eq!(agent.engine().native_breakpoint_count(), 0);
}

#[test]
fn test_clear_does_not_report() {
    let (mut agent, _) = agent();
    agent.set(capture_at("bp-1", "index.js", 12)).unwrap();
    agent.clear("bp-1").unwrap();

    assert!(agent.phase("bp-1").is_none());
    assert_eq!(agent.engine().native_breakpoint_count(), 0);
    assert!(agent.control_plane().updates().is_empty());
    assert!(agent.clear("bp-1").is_err());
}

#[test]
fn test_expiry() {
    let mut config = test_config();
    config.breakpoint_expiration_sec = 10;
    let (mut agent, clock) = agent_with(config, HeapEngine::new());
    agent.set(capture_at("bp-1", "index.js", 12)).unwrap();
    assert_eq!(agent.next_deadline(), Some(Duration::from_secs(10)));

    clock.advance(Duration::from_secs(9));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Waiting));
    assert_eq!(agent.next_deadline(), Some(Duration::from_secs(1)));

    clock.advance(Duration::from_secs(1));
    agent.tick().unwrap();
    let updates = agent.control_plane().updates();
    assert_eq!(updates.len(), 1);
    let status = updates[0].status.as_ref().unwrap();
    assert!(status.is_error);
    assert_eq!(status.refers_to, Reference::BreakpointAge);
    assert_eq!(status.description.format, format::BREAKPOINT_EXPIRED);
    assert!(updates[0].is_final_state);
    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));
    assert_eq!(agent.next_deadline(), None);
}

#[test]
fn test_expiry_accounts_breakpoint_age() {
    let mut config = test_config();
    config.breakpoint_expiration_sec = 10;
    let (mut agent, clock) = agent_with(config, HeapEngine::new());
    let bp = Breakpoint {
        create_time: Some(origin() - chrono::Duration::seconds(6)),
        ..capture_at("bp-1", "index.js", 12)
    };
    agent.set(bp).unwrap();
    assert_eq!(agent.next_deadline(), Some(Duration::from_secs(4)));

    clock.advance(Duration::from_secs(4));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));
}

#[test]
fn test_unrepresentable_expiry_never_fires() {
    let mut config = test_config();
    config.breakpoint_expiration_sec = u64::MAX;
    let (mut agent, clock) = agent_with(config, HeapEngine::new());
    clock.advance(Duration::from_secs(1));

    assert_eq!(
        agent.set(capture_at("bp-1", "index.js", 12)).unwrap(),
        Phase::Waiting
    );
    assert_eq!(agent.next_deadline(), None);

    clock.advance(Duration::from_secs(86400 * 365));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Waiting));
    assert!(agent.control_plane().updates().is_empty());

    assert!(reach(&mut agent, INDEX_JS, 12, vec![]));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));
}

#[test]
fn test_hit_and_expiry_in_same_tick_report_once() {
    let mut config = test_config();
    config.breakpoint_expiration_sec = 5;
    let (mut agent, clock) = agent_with(config, HeapEngine::new());
    agent.set(capture_at("bp-1", "index.js", 12)).unwrap();

    clock.advance(Duration::from_secs(5));
    assert!(reach(&mut agent, INDEX_JS, 12, vec![]));
    agent.tick().unwrap();

    let updates = agent.control_plane().updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0].status.as_ref().unwrap().description.format,
        format::BREAKPOINT_EXPIRED
    );
}

#[test]
fn test_expiry_after_capture_is_noop() {
    let mut config = test_config();
    config.breakpoint_expiration_sec = 5;
    let (mut agent, clock) = agent_with(config, HeapEngine::new());
    agent.set(capture_at("bp-1", "index.js", 12)).unwrap();

    assert!(reach(&mut agent, INDEX_JS, 12, vec![]));
    agent.tick().unwrap();
    clock.advance(Duration::from_secs(60));
    agent.tick().unwrap();

    let updates = agent.control_plane().updates();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].status.is_none());
}

#[test]
fn test_agent_side_condition() {
    let (mut agent, _) = agent();
    agent
        .set(capture_at("bp-1", "index.js", 12).with_condition("user.admin"))
        .unwrap();
    let native = agent.engine().native_breakpoints().next().unwrap().1.clone();
    assert_eq!(native.condition, None);

    let user = agent
        .engine_mut()
        .object("User", vec![("admin", RemoteValue::Bool(false))]);
    assert!(reach(&mut agent, INDEX_JS, 12, vec![("user", user)]));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Waiting));
    assert!(agent.control_plane().updates().is_empty());

    let user = agent
        .engine_mut()
        .object("User", vec![("admin", RemoteValue::Bool(true))]);
    assert!(reach(&mut agent, INDEX_JS, 12, vec![("user", user)]));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));
    assert_eq!(agent.control_plane().updates().len(), 1);
}

#[test]
fn test_native_condition() {
    let (mut agent, _) = agent_with(test_config(), HeapEngine::new().with_native_conditions());
    agent
        .set(capture_at("bp-1", "index.js", 12).with_condition("ready"))
        .unwrap();
    let native = agent.engine().native_breakpoints().next().unwrap().1.clone();
    assert_eq!(native.condition.as_deref(), Some("ready"));

    assert!(!reach(&mut agent, INDEX_JS, 12, vec![("ready", RemoteValue::Bool(false))]));
    assert!(reach(&mut agent, INDEX_JS, 12, vec![("ready", RemoteValue::Bool(true))]));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));
}

#[test]
fn test_condition_evaluation_error_completes_capture() {
    let (mut agent, _) = agent();
    agent
        .set(capture_at("bp-1", "index.js", 12).with_condition("missing.flag"))
        .unwrap();
    assert!(reach(&mut agent, INDEX_JS, 12, vec![]));
    agent.tick().unwrap();

    let updates = agent.control_plane().updates();
    assert_eq!(updates.len(), 1);
    let status = updates[0].status.as_ref().unwrap();
    assert_eq!(status.refers_to, Reference::BreakpointCondition);
    assert!(status
        .description
        .format
        .starts_with(format::ERROR_EVALUATING_CONDITION));
    assert!(updates[0].stack_frames.is_empty());
}

#[test]
fn test_capture_error_completes_breakpoint() {
    let (mut agent, _) = agent();
    agent.set(capture_at("bp-1", "index.js", 12)).unwrap();

    // local scope object is already released by the engine
    let engine = agent.engine_mut();
    let released = Scope {
        kind: ScopeKind::Local,
        object: ObjectId(u64::MAX),
    };
    let module = engine.scope(ScopeKind::Module, vec![]);
    let global = engine.scope(ScopeKind::Global, vec![]);
    let frame = engine.frame("handler", INDEX_JS, 11, vec![released, module, global]);
    assert!(engine.pause_at(INDEX_JS, 11, vec![frame]));
    agent.tick().unwrap();

    let updates = agent.control_plane().updates();
    assert_eq!(updates.len(), 1);
    let bp = &updates[0];
    assert!(bp.is_final_state);
    assert!(bp.stack_frames.is_empty());
    let status = bp.status.as_ref().unwrap();
    assert!(status.is_error);
    assert_eq!(status.refers_to, Reference::Unspecified);
    assert!(status
        .description
        .format
        .starts_with(format::CAPTURE_BREAKPOINT_DATA));

    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));
    assert_eq!(agent.engine().native_breakpoint_count(), 0);
    assert!(agent.engine().is_connected());
}

#[test]
fn test_sync_follows_active_list() {
    let (mut agent, _) = agent();
    let plane_list = vec![
        capture_at("bp-1", "index.js", 12),
        capture_at("bp-2", "missing.js", 3),
    ];
    agent.control_plane().set_active(plane_list.clone());
    agent.sync().unwrap();

    assert_eq!(agent.phase("bp-1"), Some(Phase::Waiting));
    assert_eq!(agent.phase("bp-2"), Some(Phase::Rejected));
    assert_eq!(agent.control_plane().updates().len(), 1);

    // rejected breakpoint is still listed, it must not be reported again
    agent.sync().unwrap();
    assert_eq!(agent.control_plane().updates().len(), 1);

    agent.control_plane().set_active(vec![]);
    agent.sync().unwrap();
    assert!(agent.phase("bp-1").is_none());
    assert!(agent.phase("bp-2").is_none());
    assert_eq!(agent.engine().native_breakpoint_count(), 0);
    assert_eq!(agent.control_plane().updates().len(), 1);
}
