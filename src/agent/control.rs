//! Contract of a control plane client: the remote side that lists desired breakpoints
//! and receives capture and log results.

use crate::agent::breakpoint::Breakpoint;
use crate::agent::config::DebuggeeConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registration record of a debugged program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Debuggee {
    pub description: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub agent_version: String,
}

impl Debuggee {
    pub fn new(config: &DebuggeeConfig) -> Self {
        Self {
            description: config.description.clone(),
            labels: config.labels.clone(),
            agent_version: format!("livebug/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub trait ControlPlane {
    /// Register a debuggee, return debuggee id assigned by the control plane.
    fn register(&self, debuggee: &Debuggee) -> anyhow::Result<String>;

    /// Currently active breakpoints of a debuggee. The list is the source of truth:
    /// breakpoints not listed must be cleared.
    fn list_active_breakpoints(&self, debuggee_id: &str) -> anyhow::Result<Vec<Breakpoint>>;

    /// Report breakpoint state.
    fn update_breakpoint(&self, debuggee_id: &str, breakpoint: &Breakpoint) -> anyhow::Result<()>;
}
