use chrono::{DateTime, Utc};
use livebug::agent::breakpoint::{Breakpoint, SourceLocation};
use livebug::agent::config::AgentConfig;
use livebug::agent::control::{ControlPlane, Debuggee};
use livebug::agent::engine::heap::HeapEngine;
use livebug::agent::engine::{RemoteValue, ScopeKind};
use livebug::agent::location::{ScriptIndex, ScriptInfo};
use livebug::agent::timer::ManualClock;
use livebug::agent::{Agent, AgentBuilder};
use std::cell::RefCell;

pub const WORKING_DIR: &str = "/srv/app";
pub const INDEX_JS: &str = "/srv/app/index.js";
pub const SERVER_JS: &str = "/srv/app/lib/server.js";

pub type TestAgent = Agent<HeapEngine, RecordingControlPlane>;

/// Control plane that remembers everything the agent sends.
#[derive(Default)]
pub struct RecordingControlPlane {
    pub registered: RefCell<Option<Debuggee>>,
    pub active: RefCell<Vec<Breakpoint>>,
    pub updates: RefCell<Vec<Breakpoint>>,
}

impl RecordingControlPlane {
    pub fn set_active(&self, active: Vec<Breakpoint>) {
        *self.active.borrow_mut() = active;
    }

    pub fn updates(&self) -> Vec<Breakpoint> {
        self.updates.borrow().clone()
    }

    pub fn updates_of(&self, id: &str) -> Vec<Breakpoint> {
        self.updates
            .borrow()
            .iter()
            .filter(|bp| bp.id.as_deref() == Some(id))
            .cloned()
            .collect()
    }
}

impl ControlPlane for RecordingControlPlane {
    fn register(&self, debuggee: &Debuggee) -> anyhow::Result<String> {
        *self.registered.borrow_mut() = Some(debuggee.clone());
        Ok("debuggee-1".to_string())
    }

    fn list_active_breakpoints(&self, debuggee_id: &str) -> anyhow::Result<Vec<Breakpoint>> {
        anyhow::ensure!(debuggee_id == "debuggee-1", "unknown debuggee {debuggee_id}");
        Ok(self.active.borrow().clone())
    }

    fn update_breakpoint(&self, debuggee_id: &str, breakpoint: &Breakpoint) -> anyhow::Result<()> {
        anyhow::ensure!(debuggee_id == "debuggee-1", "unknown debuggee {debuggee_id}");
        self.updates.borrow_mut().push(breakpoint.clone());
        Ok(())
    }
}

pub fn origin() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn test_config() -> AgentConfig {
    AgentConfig {
        working_directory: WORKING_DIR.to_string(),
        allow_expressions: true,
        ..AgentConfig::default()
    }
}

pub fn scripts() -> ScriptIndex {
    let mut scripts = ScriptIndex::new();
    scripts.insert(INDEX_JS, ScriptInfo::new(100));
    scripts.insert(SERVER_JS, ScriptInfo::wrapped(40));
    scripts.insert("/srv/app/lib/util.js", ScriptInfo::new(20));
    scripts.insert("/srv/app/test/util.js", ScriptInfo::new(20));
    scripts
}

/// Started agent over a fresh engine.
pub fn agent_with(config: AgentConfig, engine: HeapEngine) -> (TestAgent, ManualClock) {
    let clock = ManualClock::new(origin());
    let mut agent = AgentBuilder::new()
        .with_config(config)
        .with_clock(clock.clone())
        .with_scripts(scripts())
        .build(engine, RecordingControlPlane::default());
    agent.start().unwrap();
    (agent, clock)
}

pub fn agent() -> (TestAgent, ManualClock) {
    agent_with(test_config(), HeapEngine::new())
}

pub fn capture_at(id: &str, path: &str, line: u32) -> Breakpoint {
    Breakpoint::new(id, SourceLocation::new(path, line))
}

/// Simulate that execution reached `url:line` (1-based) inside `handler` with given
/// local variables. Return true if a native breakpoint is hit.
pub fn reach(
    agent: &mut TestAgent,
    url: &str,
    line: u32,
    locals: Vec<(&str, RemoteValue)>,
) -> bool {
    let engine = agent.engine_mut();
    let local = engine.scope(ScopeKind::Local, locals);
    let module = engine.scope(
        ScopeKind::Module,
        vec![("require", RemoteValue::function("require"))],
    );
    let global = engine.scope(ScopeKind::Global, vec![("process", RemoteValue::Null)]);
    let frame = engine.frame("handler", url, line - 1, vec![local, module, global]);
    engine.pause_at(url, line - 1, vec![frame])
}
