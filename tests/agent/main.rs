mod common;

mod connection;
mod lifecycle;
mod resolution;

use crate::common::{agent, capture_at, reach, INDEX_JS};
use livebug::agent::engine::RemoteValue;
use livebug::agent::{Error, Phase};
use serial_test::serial;

#[test]
fn test_agent_registers_debuggee() {
    let (agent, _) = agent();
    assert_eq!(agent.debuggee_id(), Some("debuggee-1"));

    let registered = agent.control_plane().registered.borrow().clone().unwrap();
    assert!(registered.agent_version.starts_with("livebug/"));
}

#[test]
fn test_sync_requires_registration() {
    let mut agent = livebug::agent::AgentBuilder::new()
        .with_config(common::test_config())
        .build(
            livebug::agent::engine::heap::HeapEngine::new(),
            common::RecordingControlPlane::default(),
        );
    assert!(matches!(agent.sync(), Err(Error::NotRegistered)));
}

#[test]
#[serial]
fn test_muted_diagnostics_keep_agent_working() {
    livebug::log::disable();

    let (mut agent, _) = agent();
    agent.set(capture_at("bp-1", "index.js", 12)).unwrap();
    assert!(reach(&mut agent, INDEX_JS, 12, vec![("n", RemoteValue::Number(1.0))]));
    agent.tick().unwrap();
    assert_eq!(agent.phase("bp-1"), Some(Phase::Completed));

    livebug::log::enable();
}
