//! Capture of paused execution state.
//!
//! Capture runs while the host thread is paused, so its cost is bounded by
//! [`CaptureConfig`]: number of frames, number of frames with variables, number of
//! object properties, length of strings and total data size. Work is done in a fixed
//! order, which defines what data survives when the budget runs out:
//!
//! 1. watch expressions, evaluated against the top frame
//! 2. stack frames with arguments and locals
//! 3. composite values of the variable table, in discovery order, while the budget lasts
//!
//! Values of the table that were not resolved are cut, and every reference to them
//! points at the "buffer full" sentinel.

pub mod table;

use crate::agent::breakpoint::{Reference, SourceLocation, StackFrame, StatusMessage, Variable};
use crate::agent::engine::{
    CallFrame, EngineError, EvalError, ExecutionEngine, FrameId, ObjectId, PropertyDescriptor,
    RemoteValue,
};
use crate::agent::format;
use crate::agent::location::normalize;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
pub use table::{
    VariableTable, BUFFER_FULL_INDEX, FRAME_DEPTH_INDEX, GETTER_PROPERTY_INDEX,
    NATIVE_PROPERTY_INDEX, SENTINEL_COUNT,
};

pub const ANONYMOUS_FUNCTION: &str = "(anonymous function)";

/// Size of a composite value reference for data size accounting.
const COMPOSITE_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no call frames to capture")]
    NoFrames,
}

/// Capture limits. Zero `max_properties`, `max_data_size` or `max_string_length`
/// disables the corresponding limit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    pub max_frames: usize,
    pub max_expand_frames: usize,
    pub max_properties: usize,
    pub max_data_size: usize,
    pub max_string_length: usize,
    /// Capture frames of vendored dependencies.
    pub include_dependencies: bool,
    pub dependency_dir: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_frames: 20,
            max_expand_frames: 5,
            max_properties: 10,
            max_data_size: 20000,
            max_string_length: 100,
            include_dependencies: false,
            dependency_dir: "node_modules".to_string(),
        }
    }
}

/// Captured state of a paused program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub stack_frames: Vec<StackFrame>,
    pub variable_table: Vec<Variable>,
    pub evaluated_expressions: Vec<Variable>,
}

/// Capture a snapshot.
///
/// # Arguments
///
/// * `engine`: paused execution engine
/// * `frames`: call frames, innermost first
/// * `expressions`: watch expressions
/// * `config`: capture limits
/// * `working_directory`: only frames of scripts inside this directory are captured
pub fn capture<E: ExecutionEngine + ?Sized>(
    engine: &mut E,
    frames: &[CallFrame],
    expressions: &[String],
    config: &CaptureConfig,
    working_directory: &str,
) -> Result<Snapshot, CaptureError> {
    VariableCapture::new(engine, config, working_directory).run(frames, expressions)
}

pub struct VariableCapture<'a, E: ExecutionEngine + ?Sized> {
    engine: &'a mut E,
    config: &'a CaptureConfig,
    working_directory: String,
    table: VariableTable,
    /// Table indices of watch expression results.
    evaluated: HashSet<usize>,
    total_size: usize,
}

impl<'a, E: ExecutionEngine + ?Sized> VariableCapture<'a, E> {
    pub fn new(engine: &'a mut E, config: &'a CaptureConfig, working_directory: &str) -> Self {
        Self {
            engine,
            config,
            working_directory: normalize(working_directory),
            table: VariableTable::new(config.max_expand_frames),
            evaluated: HashSet::new(),
            total_size: 0,
        }
    }

    pub fn run(
        mut self,
        frames: &[CallFrame],
        expressions: &[String],
    ) -> Result<Snapshot, CaptureError> {
        let top = frames.first().ok_or(CaptureError::NoFrames)?;

        let mut evaluated_expressions = Vec::with_capacity(expressions.len());
        for expression in expressions {
            evaluated_expressions.push(self.evaluate(top.id, expression)?);
        }

        let mut stack_frames = self.resolve_frames(frames)?;

        let resolved = self.drain()?;
        if resolved < self.table.len() {
            crate::lb_debug!(
                target: "agent",
                "capture budget exhausted, {} of {} values resolved",
                resolved,
                self.table.len()
            );
            self.table.truncate(resolved);
            let frame_vars = stack_frames
                .iter_mut()
                .flat_map(|f| f.arguments.iter_mut().chain(f.locals.iter_mut()));
            redirect_cut_references(frame_vars, resolved);
            redirect_cut_references(evaluated_expressions.iter_mut(), resolved);
            redirect_cut_references(self.table.variables_mut(), resolved);
        }

        Ok(Snapshot {
            stack_frames,
            variable_table: self.table.into_variables(),
            evaluated_expressions,
        })
    }

    fn evaluate(&mut self, frame: FrameId, expression: &str) -> Result<Variable, CaptureError> {
        match self.engine.evaluate(expression, frame, true) {
            Ok(value) => {
                let variable = self.resolve_value(expression, value, true);
                if let Some(idx) = variable.var_table_index {
                    self.evaluated.insert(idx);
                }
                Ok(variable)
            }
            Err(EvalError::Engine(e)) if e.is_disconnect() => Err(e.into()),
            Err(e) => Ok(Variable::named(expression)
                .with_status(StatusMessage::error(Reference::VariableValue, e.to_string()))),
        }
    }

    /// Path of a script relative to the working directory, `None` if frames of this
    /// script must not be captured.
    fn source_path(&self, url: &str) -> Option<String> {
        let path = normalize(url.strip_prefix("file://").unwrap_or(url));
        let root = self.working_directory.trim_end_matches('/');
        let relative = path.strip_prefix(root)?.strip_prefix('/')?;

        let dependency = relative
            .split('/')
            .any(|component| component == self.config.dependency_dir);
        if dependency && !self.config.include_dependencies {
            return None;
        }
        Some(relative.to_string())
    }

    fn resolve_frames(&mut self, frames: &[CallFrame]) -> Result<Vec<StackFrame>, CaptureError> {
        let visible = frames
            .iter()
            .filter_map(|frame| self.source_path(&frame.url).map(|path| (frame, path)))
            .take(self.config.max_frames)
            .collect_vec();

        let mut stack_frames = Vec::with_capacity(visible.len());
        for (depth, (frame, path)) in visible.into_iter().enumerate() {
            let function = if frame.function_name.is_empty() {
                ANONYMOUS_FUNCTION.to_string()
            } else {
                frame.function_name.clone()
            };
            let location = SourceLocation::new(path, frame.line + 1);

            let (arguments, locals) = if depth < self.config.max_expand_frames {
                self.resolve_frame_variables(frame)?
            } else {
                (
                    vec![Variable::named("arguments_not_available").with_index(FRAME_DEPTH_INDEX)],
                    vec![Variable::named("locals_not_available").with_index(FRAME_DEPTH_INDEX)],
                )
            };

            stack_frames.push(StackFrame {
                function,
                location,
                arguments,
                locals,
            });
        }
        Ok(stack_frames)
    }

    /// Collect arguments and locals of a frame. Arguments shadow locals, inner scopes
    /// shadow outer ones. Two outermost scopes (module and global) are not captured.
    fn resolve_frame_variables(
        &mut self,
        frame: &CallFrame,
    ) -> Result<(Vec<Variable>, Vec<Variable>), CaptureError> {
        let mut seen = HashSet::new();

        let mut arguments = vec![];
        for (name, value) in &frame.arguments {
            if seen.insert(name.clone()) {
                arguments.push(self.resolve_value(name, value.clone(), false));
            }
        }

        let mut locals = vec![];
        let scopes = &frame.scope_chain[..frame.scope_chain.len().saturating_sub(2)];
        for scope in scopes {
            for prop in self.engine.get_properties(scope.object)? {
                if !seen.insert(prop.name.clone()) {
                    continue;
                }
                let value = prop.value.unwrap_or(RemoteValue::Undefined);
                locals.push(self.resolve_value(&prop.name, value, false));
            }
        }

        if let Some(this @ RemoteValue::Object { .. }) = &frame.this {
            locals.push(self.resolve_value("context", this.clone(), false));
        }

        Ok((arguments, locals))
    }

    fn budget_exhausted(&self) -> bool {
        self.config.max_data_size > 0 && self.total_size >= self.config.max_data_size
    }

    /// Resolve queued composite values while the budget lasts.
    /// Return index of the first unresolved table slot.
    fn drain(&mut self) -> Result<usize, CaptureError> {
        let mut idx = SENTINEL_COUNT;
        while idx < self.table.len() && !self.budget_exhausted() {
            if let Some((object, description)) = self.table.pending(idx) {
                let variable = self.resolve_object(idx, object, description)?;
                self.table.resolve(idx, variable);
            }
            idx += 1;
        }
        Ok(idx)
    }

    fn resolve_object(
        &mut self,
        idx: usize,
        object: ObjectId,
        description: String,
    ) -> Result<Variable, CaptureError> {
        let is_evaluated = self.evaluated.contains(&idx);
        let own = self
            .engine
            .get_properties(object)?
            .into_iter()
            .filter(|prop| prop.is_own)
            .collect_vec();

        let max = self.config.max_properties;
        let capped = !is_evaluated && max > 0 && own.len() > max;
        let limit = if capped { max } else { own.len() };

        let mut members = Vec::with_capacity(limit + 1);
        for prop in own.into_iter().take(limit) {
            members.push(self.resolve_member(prop, is_evaluated));
        }
        if capped {
            members.push(Variable::default().with_status(StatusMessage::info(
                Reference::VariableValue,
                format::properties_truncated(max),
            )));
        }

        Ok(Variable {
            value: Some(description),
            r#type: Some("object".to_string()),
            members,
            ..Default::default()
        })
    }

    fn resolve_member(&mut self, prop: PropertyDescriptor, is_evaluated: bool) -> Variable {
        if prop.has_getter {
            return Variable::named(prop.name).with_index(GETTER_PROPERTY_INDEX);
        }
        if prop.is_native && prop.name != "length" {
            return Variable::named(prop.name).with_index(NATIVE_PROPERTY_INDEX);
        }
        let value = prop.value.unwrap_or(RemoteValue::Undefined);
        self.resolve_value(&prop.name, value, is_evaluated)
    }

    /// Resolve a value into a variable. Composite values are interned into the table.
    /// Values from watch expressions (`is_evaluated`) are never truncated.
    fn resolve_value(&mut self, name: &str, value: RemoteValue, is_evaluated: bool) -> Variable {
        let name_size = name.chars().count();
        let type_name = value.type_name().to_string();

        let variable = match value {
            RemoteValue::Object { id, description } => {
                self.total_size += name_size + COMPOSITE_SIZE;
                let idx = self.table.intern(id, &description);
                return Variable {
                    r#type: Some(type_name),
                    ..Variable::named(name).with_index(idx)
                };
            }
            RemoteValue::Function { name: fn_name } => Variable::named(name).with_value(format!(
                "function {}()",
                fn_name.as_deref().unwrap_or(ANONYMOUS_FUNCTION)
            )),
            RemoteValue::String(s) => {
                let max = self.config.max_string_length;
                let len = s.chars().count();
                if !is_evaluated && max > 0 && len > max {
                    let truncated: String = s.chars().take(max).collect();
                    Variable::named(name)
                        .with_value(format!("{truncated}..."))
                        .with_status(StatusMessage::info(
                            Reference::VariableValue,
                            format::string_truncated(max, len),
                        ))
                } else {
                    Variable::named(name).with_value(s)
                }
            }
            primitive => {
                Variable::named(name).with_value(primitive.primitive_text().unwrap_or_default())
            }
        };

        self.total_size += name_size + variable.value.as_deref().map_or(0, |v| v.chars().count());
        Variable {
            r#type: Some(type_name),
            ..variable
        }
    }
}

/// Point references to cut table slots (`idx >= limit`) at the "buffer full" sentinel.
fn redirect_cut_references<'v>(variables: impl Iterator<Item = &'v mut Variable>, limit: usize) {
    for var in variables {
        if var.var_table_index.is_some_and(|idx| idx >= limit) {
            var.var_table_index = Some(BUFFER_FULL_INDEX);
        }
        redirect_cut_references(var.members.iter_mut(), limit);
    }
}
