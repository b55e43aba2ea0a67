//! Breakpoint lifecycle controller.
//!
//! [`Agent`] owns logical breakpoints listed by a control plane and drives each of them
//! through its lifecycle:
//!
//! ```text
//! Received -> Resolving -> Rejected
//!                       -> Armed -> Waiting (capture) -> Completed
//!                                -> Logging (log)     -> Completed (on expiry)
//! ```
//!
//! The agent is single threaded. Engine pause events and timers (breakpoint expiry,
//! logpoint re-enable) are dispatched from [`Agent::tick`], so a capture always runs to
//! the end before the next event is handled.

pub mod breakpoint;
pub mod capture;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod format;
pub mod location;
pub mod registry;
pub mod throttle;
pub mod timer;
pub mod validate;

use crate::agent::breakpoint::{
    Action, Breakpoint, BreakpointId, Reference, StatusMessage, Variable,
};
use crate::agent::capture::Snapshot;
use crate::agent::config::AgentConfig;
use crate::agent::control::{ControlPlane, Debuggee};
use crate::agent::engine::{CallFrame, EngineError, ExecutionEngine, PauseEvent};
use crate::agent::location::{LocationResolver, NoSourceMaps, ScriptIndex, SourceMapper};
use crate::agent::registry::{Attachment, BreakpointRegistry};
use crate::agent::throttle::{Decision, LogPointThrottle};
use crate::agent::timer::{Clock, SystemClock, TimerId, TimerQueue};
use crate::agent::validate::validate_expression;
use crate::{lb_debug, lb_error, lb_info, lb_warn, muted_error, weak_error};
pub use error::{Error, ValidationError};
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::HashMap;
use std::time::Duration;

/// Lifecycle phase of a logical breakpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum Phase {
    Received,
    Resolving,
    Armed,
    Waiting,
    Logging,
    Rejected,
    Completed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Rejected | Phase::Completed)
    }
}

enum Listener {
    /// One-shot capture.
    Capture,
    /// Repeating log, rate limited.
    Log {
        throttle: LogPointThrottle,
        enabled: bool,
    },
}

struct Record {
    breakpoint: Breakpoint,
    phase: Phase,
    attachment: Option<Attachment>,
    listener: Listener,
    expiry: Option<TimerId>,
    reenable: Option<TimerId>,
}

enum TimerEvent {
    Expire(BreakpointId),
    ReenableLog(BreakpointId),
}

fn trace(id: &str, phase: Phase) {
    lb_debug!(target: "agent", "breakpoint {id}: {phase}");
}

pub struct Agent<E: ExecutionEngine, C: ControlPlane> {
    engine: E,
    control: C,
    config: AgentConfig,
    clock: Box<dyn Clock>,
    resolver: LocationResolver,
    registry: BreakpointRegistry,
    debuggee_id: Option<String>,
    /// Active (waiting or logging) breakpoints.
    breakpoints: IndexMap<BreakpointId, Record>,
    /// Breakpoints that reached a terminal phase, kept while a control plane lists them.
    finished: HashMap<BreakpointId, Phase>,
    /// Breakpoints received while the engine is disconnected.
    pending: IndexMap<BreakpointId, Breakpoint>,
    timers: TimerQueue<TimerEvent>,
}

impl<E: ExecutionEngine, C: ControlPlane> Agent<E, C> {
    /// Connect to the engine and register the debuggee at the control plane.
    pub fn start(&mut self) -> Result<(), Error> {
        self.engine.connect()?;
        let debuggee = Debuggee::new(&self.config.debuggee);
        let id = self.control.register(&debuggee).map_err(Error::Hook)?;
        lb_info!(target: "agent", "debuggee registered with id {id}");
        self.debuggee_id = Some(id);
        Ok(())
    }

    /// Fetch active breakpoints from the control plane and apply them.
    pub fn sync(&mut self) -> Result<(), Error> {
        let debuggee_id = self.debuggee_id.as_deref().ok_or(Error::NotRegistered)?;
        let active = self
            .control
            .list_active_breakpoints(debuggee_id)
            .map_err(Error::Hook)?;
        self.update_active(active)
    }

    /// Apply a list of active breakpoints: breakpoints that are not listed anymore are
    /// cleared, new ones are set.
    ///
    /// Return an error if the engine connection is lost, in this case new breakpoints
    /// are held until [`Agent::reconnect`].
    pub fn update_active(&mut self, active: Vec<Breakpoint>) -> Result<(), Error> {
        let listed: Vec<BreakpointId> = active
            .iter()
            .filter_map(|bp| bp.valid_id().map(ToString::to_string))
            .collect();

        let gone = self
            .breakpoints
            .keys()
            .filter(|id| !listed.contains(id))
            .cloned()
            .collect_vec();
        for id in gone {
            lb_info!(target: "agent", "breakpoint {id} is not listed anymore");
            muted_error!(self.clear(&id));
        }
        self.pending.retain(|id, _| listed.contains(id));
        self.finished.retain(|id, _| listed.contains(id));

        let mut result = Ok(());
        for bp in active {
            if let Some(id) = bp.valid_id() {
                if self.breakpoints.contains_key(id)
                    || self.finished.contains_key(id)
                    || self.pending.contains_key(id)
                {
                    continue;
                }
            }
            if let Err(e) = self.set(bp) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Set a breakpoint. Rejected breakpoints are reported to the control plane,
    /// an error is returned only if the engine connection is lost.
    pub fn set(&mut self, breakpoint: Breakpoint) -> Result<Phase, Error> {
        let Some(id) = breakpoint.valid_id().map(ToString::to_string) else {
            return Ok(self.reject(breakpoint, ValidationError::MissingId.into()));
        };
        if let Some(phase) = self.phase(&id) {
            return Ok(phase);
        }
        trace(&id, Phase::Received);

        trace(&id, Phase::Resolving);
        if let Err(e) = self.validate(&breakpoint) {
            return Ok(self.reject(breakpoint, e));
        }
        if !self.engine.is_connected() {
            lb_warn!(target: "agent", "engine is disconnected, breakpoint {id} is pending");
            self.pending.insert(id, breakpoint);
            return Err(EngineError::Disconnected.into());
        }

        let attachment = match self.attach(&id, &breakpoint) {
            Ok(attachment) => attachment,
            Err(e) if e.is_fatal() => {
                lb_warn!(target: "agent", "engine is disconnected, breakpoint {id} is pending");
                self.pending.insert(id, breakpoint);
                return Err(e);
            }
            Err(e) => return Ok(self.reject(breakpoint, e)),
        };
        trace(&id, Phase::Armed);
        lb_info!(target: "agent", "breakpoint {id} set at {}", attachment.key);

        let (phase, listener) = match breakpoint.action {
            Action::Log => (
                Phase::Logging,
                Listener::Log {
                    throttle: LogPointThrottle::new(&self.config.log),
                    enabled: true,
                },
            ),
            _ => (Phase::Waiting, Listener::Capture),
        };
        let expiry = self
            .expiry_deadline(&breakpoint)
            .map(|deadline| self.timers.schedule(deadline, TimerEvent::Expire(id.clone())));
        trace(&id, phase);

        self.breakpoints.insert(
            id,
            Record {
                breakpoint,
                phase,
                attachment: Some(attachment),
                listener,
                expiry,
                reenable: None,
            },
        );
        Ok(phase)
    }

    /// Clear a breakpoint removed by the control plane. Nothing is reported.
    pub fn clear(&mut self, id: &str) -> Result<(), Error> {
        if self.pending.shift_remove(id).is_some() || self.finished.remove(id).is_some() {
            return Ok(());
        }
        let record = self
            .breakpoints
            .shift_remove(id)
            .ok_or_else(|| Error::BreakpointNotFound(id.to_string()))?;
        self.release(id, record);
        lb_debug!(target: "agent", "breakpoint {id} cleared");
        Ok(())
    }

    /// Handle an engine pause event. Each hit breakpoint is handled to the end
    /// before the next one.
    pub fn on_paused(&mut self, event: PauseEvent) -> Result<(), Error> {
        let ids = event
            .hit_breakpoints
            .iter()
            .flat_map(|native| self.registry.logical_ids(native).iter().cloned())
            .unique()
            .collect_vec();

        let mut result = Ok(());
        for id in ids {
            if let Err(e) = self.on_hit(&id, &event.call_frames) {
                lb_warn!(target: "agent", "breakpoint {id} hit: {e:#}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Run due timers, then handle pending engine pause events.
    pub fn tick(&mut self) -> Result<(), Error> {
        let now = self.clock.now();
        while let Some((_, event)) = self.timers.pop_due(now) {
            match event {
                TimerEvent::Expire(id) => self.expire(&id),
                TimerEvent::ReenableLog(id) => self.reenable_log(&id),
            }
        }

        let mut result = Ok(());
        while let Some(event) = self.engine.poll_paused() {
            if let Err(e) = self.on_paused(event) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Time left until the next timer, `None` if there are no timers.
    pub fn next_deadline(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.timers
            .next_deadline()
            .map(|deadline| deadline.saturating_sub(now))
    }

    /// Reconnect to the engine. Native breakpoints are set again for active breakpoints,
    /// breakpoints received while the engine was disconnected are set.
    pub fn reconnect(&mut self) -> Result<(), Error> {
        self.engine.connect()?;
        self.registry.reset();
        lb_info!(
            target: "agent",
            "engine reconnected, {} active and {} pending breakpoints",
            self.breakpoints.len(),
            self.pending.len()
        );

        let active = self.breakpoints.keys().cloned().collect_vec();
        for id in active {
            let Some(breakpoint) = self.breakpoints.get(&id).map(|r| r.breakpoint.clone()) else {
                continue;
            };
            match self.attach(&id, &breakpoint) {
                Ok(attachment) => {
                    if let Some(record) = self.breakpoints.get_mut(&id) {
                        record.attachment = Some(attachment);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let status = e.status(breakpoint.location.as_ref());
                    self.finalize(&id, |bp| bp.status = Some(status));
                }
            }
        }

        let mut result = Ok(());
        for (_, breakpoint) in std::mem::take(&mut self.pending) {
            if let Err(e) = self.set(breakpoint) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Current phase of a breakpoint, `None` if breakpoint is unknown.
    pub fn phase(&self, id: &str) -> Option<Phase> {
        if let Some(record) = self.breakpoints.get(id) {
            return Some(record.phase);
        }
        if self.pending.contains_key(id) {
            return Some(Phase::Received);
        }
        self.finished.get(id).copied()
    }

    /// Active breakpoint in its current state.
    pub fn breakpoint(&self, id: &str) -> Option<&Breakpoint> {
        self.breakpoints.get(id).map(|record| &record.breakpoint)
    }

    pub fn active_ids(&self) -> impl Iterator<Item = &str> {
        self.breakpoints.keys().map(String::as_str)
    }

    pub fn pending_ids(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    /// Return true if a logpoint is temporarily disabled by rate limiting.
    pub fn is_log_suppressed(&self, id: &str) -> bool {
        matches!(
            self.breakpoints.get(id).map(|r| &r.listener),
            Some(Listener::Log { enabled: false, .. })
        )
    }

    pub fn debuggee_id(&self) -> Option<&str> {
        self.debuggee_id.as_deref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn control_plane(&self) -> &C {
        &self.control
    }

    /// Known scripts, should be updated by the embedder when scripts are loaded.
    pub fn scripts_mut(&mut self) -> &mut ScriptIndex {
        self.resolver.scripts_mut()
    }

    fn validate(&self, breakpoint: &Breakpoint) -> Result<(), Error> {
        if breakpoint.location.is_none() {
            return Err(ValidationError::MissingLocation.into());
        }
        if let Action::Unsupported(action) = &breakpoint.action {
            return Err(Error::UnsupportedAction(action.clone()));
        }

        let has_expressions = breakpoint.condition.is_some() || !breakpoint.expressions.is_empty();
        if has_expressions && !self.config.allow_expressions {
            return Err(Error::ExpressionsDisabled);
        }
        if let Some(condition) = &breakpoint.condition {
            validate_expression(condition).map_err(Error::Condition)?;
        }
        for expression in &breakpoint.expressions {
            validate_expression(expression).map_err(|error| Error::Expression {
                expression: expression.clone(),
                error,
            })?;
        }
        Ok(())
    }

    fn attach(&mut self, id: &str, breakpoint: &Breakpoint) -> Result<Attachment, Error> {
        let location = breakpoint
            .location
            .as_ref()
            .ok_or(ValidationError::MissingLocation)?;
        let resolved = self.resolver.resolve(location)?;
        let attachment = self.registry.attach(
            &mut self.engine,
            id,
            &resolved,
            breakpoint.condition.as_deref(),
        )?;
        Ok(attachment)
    }

    /// Instant when a breakpoint expires, `None` if it is too far to be represented.
    fn expiry_deadline(&self, breakpoint: &Breakpoint) -> Option<Duration> {
        let ttl = Duration::from_secs(self.config.breakpoint_expiration_sec);
        let age = breakpoint
            .create_time
            .and_then(|created| (self.clock.wall() - created).to_std().ok())
            .unwrap_or_default();
        self.clock.now().checked_add(ttl.saturating_sub(age))
    }

    fn reject(&mut self, mut breakpoint: Breakpoint, error: Error) -> Phase {
        let id = breakpoint.valid_id().unwrap_or("<no id>").to_string();
        lb_info!(target: "agent", "breakpoint {id} rejected: {error:#}");
        breakpoint.status = Some(error.status(breakpoint.location.as_ref()));
        breakpoint.is_final_state = true;
        breakpoint.final_time = Some(self.clock.wall());
        self.report(&breakpoint);

        if breakpoint.valid_id().is_some() {
            self.finished.insert(id.clone(), Phase::Rejected);
        }
        trace(&id, Phase::Rejected);
        Phase::Rejected
    }

    /// Complete an active breakpoint and report it. Return false if breakpoint is not
    /// active (already completed or cleared).
    fn finalize(&mut self, id: &str, apply: impl FnOnce(&mut Breakpoint)) -> bool {
        let Some(mut record) = self.breakpoints.shift_remove(id) else {
            return false;
        };
        apply(&mut record.breakpoint);
        record.breakpoint.is_final_state = true;
        record.breakpoint.final_time = Some(self.clock.wall());
        self.report(&record.breakpoint);
        self.release(id, record);

        self.finished.insert(id.to_string(), Phase::Completed);
        trace(id, Phase::Completed);
        true
    }

    /// Cancel timers and detach native breakpoint of a removed record.
    fn release(&mut self, id: &str, record: Record) {
        for timer in [record.expiry, record.reenable].into_iter().flatten() {
            self.timers.cancel(timer);
        }
        if let Some(attachment) = record.attachment {
            weak_error!(
                self.registry.detach(&mut self.engine, id, &attachment),
                "remove native breakpoint:"
            );
        }
    }

    fn report(&self, breakpoint: &Breakpoint) {
        let Some(debuggee_id) = self.debuggee_id.as_deref() else {
            lb_warn!(target: "agent", "breakpoint update is dropped, debuggee is not registered");
            return;
        };
        weak_error!(
            self.control
                .update_breakpoint(debuggee_id, breakpoint)
                .map_err(Error::Hook),
            "breakpoint update:"
        );
    }

    fn expire(&mut self, id: &str) {
        let expired = self.finalize(id, |bp| {
            bp.status = Some(StatusMessage::error(
                Reference::BreakpointAge,
                format::BREAKPOINT_EXPIRED,
            ));
        });
        if expired {
            lb_info!(target: "agent", "breakpoint {id} expired");
        }
    }

    fn reenable_log(&mut self, id: &str) {
        // breakpoint may be cleared during suppression
        let Some(record) = self.breakpoints.get_mut(id) else {
            return;
        };
        record.reenable = None;
        if let Listener::Log { throttle, enabled } = &mut record.listener {
            throttle.reenable();
            *enabled = true;
            lb_debug!(target: "agent", "logpoint {id} is enabled again");
        }
    }

    fn on_hit(&mut self, id: &str, frames: &[CallFrame]) -> Result<(), Error> {
        let Some(record) = self.breakpoints.get(id) else {
            return Ok(());
        };
        let is_log = matches!(record.listener, Listener::Log { .. });
        let condition = record
            .breakpoint
            .condition
            .clone()
            .filter(|_| !self.engine.supports_native_conditions());

        if let Some(condition) = condition {
            let Some(top) = frames.first() else {
                return Ok(());
            };
            match self.engine.evaluate(&condition, top.id, true) {
                Ok(value) if value.is_truthy() => {}
                Ok(_) => return Ok(()),
                Err(e) if is_log => {
                    lb_debug!(target: "agent", "logpoint {id} condition: {e}");
                    return Ok(());
                }
                Err(e) => {
                    let status = StatusMessage::error(
                        Reference::BreakpointCondition,
                        format!("{}{e}", format::ERROR_EVALUATING_CONDITION),
                    );
                    self.finalize(id, |bp| bp.status = Some(status));
                    return Ok(());
                }
            }
        }

        if is_log {
            self.log_hit(id, frames);
            Ok(())
        } else {
            self.capture_hit(id, frames)
        }
    }

    fn capture_hit(&mut self, id: &str, frames: &[CallFrame]) -> Result<(), Error> {
        let Some(record) = self.breakpoints.get(id) else {
            return Ok(());
        };
        let expressions = record.breakpoint.expressions.clone();
        let captured = capture::capture(
            &mut self.engine,
            frames,
            &expressions,
            &self.config.capture,
            &self.config.working_directory,
        );

        match captured {
            Ok(Snapshot {
                stack_frames,
                variable_table,
                evaluated_expressions,
            }) => {
                self.finalize(id, |bp| {
                    bp.stack_frames = stack_frames;
                    bp.variable_table = variable_table;
                    bp.evaluated_expressions = evaluated_expressions;
                });
                Ok(())
            }
            Err(e) => {
                let error = Error::Capture(e);
                lb_error!(target: "agent", "breakpoint {id}: snapshot capture failed: {error:#}");
                let status = error.status(None);
                self.finalize(id, |bp| bp.status = Some(status));
                if error.is_fatal() {
                    return Err(error);
                }
                Ok(())
            }
        }
    }

    fn log_hit(&mut self, id: &str, frames: &[CallFrame]) {
        let now = self.clock.now();
        let Some(record) = self.breakpoints.get_mut(id) else {
            return;
        };
        let Listener::Log { throttle, enabled } = &mut record.listener else {
            return;
        };
        if !*enabled || !throttle.admit(now) {
            return;
        }
        let Some(top) = frames.first() else {
            return;
        };

        let mut values = Vec::with_capacity(record.breakpoint.expressions.len());
        let mut evaluated = Vec::with_capacity(record.breakpoint.expressions.len());
        for expression in &record.breakpoint.expressions {
            match self.engine.evaluate(expression, top.id, true) {
                Ok(value) => {
                    let text = format::log_value(&value);
                    evaluated.push(Variable::named(expression).with_value(text.clone()));
                    values.push(text);
                }
                Err(e) => {
                    evaluated.push(Variable::named(expression).with_status(
                        StatusMessage::error(Reference::VariableValue, e.to_string()),
                    ));
                    values.push(e.to_string());
                }
            }
        }

        let template = record.breakpoint.log_message_format.as_deref().unwrap_or_default();
        let message = format::format_message(template, values.as_slice());
        let level: log::Level = record.breakpoint.log_level.into();
        log::log!(target: "logpoint", level, "{}{message}", format::LOGPOINT_PREFIX);

        let mut update = record.breakpoint.clone();
        update.evaluated_expressions = evaluated;
        if let Decision::Suspend { until } = throttle.record(now) {
            *enabled = false;
            lb_debug!(target: "agent", "logpoint {id} is suppressed by rate limit");
            record.reenable = Some(
                self.timers
                    .schedule(until, TimerEvent::ReenableLog(id.to_string())),
            );
        }
        self.report(&update);
    }
}

#[derive(Default)]
pub struct AgentBuilder {
    config: AgentConfig,
    clock: Option<Box<dyn Clock>>,
    scripts: ScriptIndex,
    mapper: Option<Box<dyn SourceMapper>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(self, config: AgentConfig) -> Self {
        Self { config, ..self }
    }

    pub fn with_clock(self, clock: impl Clock + 'static) -> Self {
        Self {
            clock: Some(Box::new(clock)),
            ..self
        }
    }

    /// Set initially known scripts.
    pub fn with_scripts(self, scripts: ScriptIndex) -> Self {
        Self { scripts, ..self }
    }

    pub fn with_source_mapper(self, mapper: impl SourceMapper + 'static) -> Self {
        Self {
            mapper: Some(Box::new(mapper)),
            ..self
        }
    }

    /// Create an agent. Call [`Agent::start`] to connect and register it.
    pub fn build<E: ExecutionEngine, C: ControlPlane>(self, engine: E, control: C) -> Agent<E, C> {
        let resolver = LocationResolver::new(
            self.scripts,
            self.mapper.unwrap_or_else(|| Box::new(NoSourceMaps)),
            &self.config.working_directory,
            self.config.module_wrapper_prefix_len,
        );
        Agent {
            engine,
            control,
            clock: self.clock.unwrap_or_else(|| Box::new(SystemClock::default())),
            resolver,
            registry: BreakpointRegistry::new(),
            debuggee_id: None,
            breakpoints: IndexMap::new(),
            finished: HashMap::new(),
            pending: IndexMap::new(),
            timers: TimerQueue::new(),
            config: self.config,
        }
    }
}
