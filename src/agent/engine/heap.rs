//! In-memory execution engine.
//!
//! [`HeapEngine`] models a runtime as an object heap plus a set of native breakpoints.
//! An embedder (or a test) builds objects and call frames, then reports that execution
//! reached some line with [`HeapEngine::pause_at`]. Evaluation supports literals and
//! member access paths (`a.b[0]["key"]`), which is enough for watch expressions and
//! conditions over captured state.

use crate::agent::engine::{
    CallFrame, EngineError, EvalError, ExecutionEngine, FrameId, NativeBreakpointId, ObjectId,
    PauseEvent, PropertyDescriptor, RemoteValue, Scope, ScopeKind,
};
use crate::agent::validate::{identifier, quoted, Err};
use chumsky::error::Rich;
use chumsky::prelude::{any, choice, end, just};
use chumsky::{text, IterParser, Parser};
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Debug, PartialEq)]
pub struct NativeBreakpoint {
    pub url: String,
    /// 0-based line.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
    pub condition: Option<String>,
}

#[derive(Debug)]
struct HeapObject {
    properties: Vec<PropertyDescriptor>,
}

#[derive(Default)]
pub struct HeapEngine {
    connected: bool,
    native_conditions: bool,
    objects: HashMap<ObjectId, HeapObject>,
    next_object: u64,
    breakpoints: IndexMap<NativeBreakpointId, NativeBreakpoint>,
    next_breakpoint: u64,
    frames: HashMap<FrameId, CallFrame>,
    next_frame: u32,
    paused: VecDeque<PauseEvent>,
    fail_next_set: Option<EngineError>,
    fail_next_read: Option<EngineError>,
}

impl HeapEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate breakpoint conditions inside the engine.
    pub fn with_native_conditions(self) -> Self {
        Self {
            native_conditions: true,
            ..self
        }
    }

    /// Allocate an object with own data properties.
    pub fn object(
        &mut self,
        class_name: &str,
        properties: Vec<(&str, RemoteValue)>,
    ) -> RemoteValue {
        self.next_object += 1;
        let id = ObjectId(self.next_object);
        self.objects.insert(
            id,
            HeapObject {
                properties: properties
                    .into_iter()
                    .map(|(name, value)| PropertyDescriptor::data(name, value))
                    .collect(),
            },
        );
        RemoteValue::Object {
            id,
            description: class_name.to_string(),
        }
    }

    /// Set (or replace) a property of an object.
    pub fn define(&mut self, object: &RemoteValue, property: PropertyDescriptor) {
        let RemoteValue::Object { id, .. } = object else {
            return;
        };
        if let Some(obj) = self.objects.get_mut(id) {
            match obj.properties.iter_mut().find(|p| p.name == property.name) {
                Some(existing) => *existing = property,
                None => obj.properties.push(property),
            }
        }
    }

    pub fn set(&mut self, object: &RemoteValue, name: &str, value: RemoteValue) {
        self.define(object, PropertyDescriptor::data(name, value));
    }

    pub fn define_getter(&mut self, object: &RemoteValue, name: &str) {
        self.define(
            object,
            PropertyDescriptor {
                name: name.to_string(),
                value: None,
                is_own: true,
                has_getter: true,
                is_native: false,
            },
        );
    }

    pub fn define_native(&mut self, object: &RemoteValue, name: &str) {
        self.define(
            object,
            PropertyDescriptor {
                name: name.to_string(),
                value: None,
                is_own: true,
                has_getter: false,
                is_native: true,
            },
        );
    }

    pub fn define_inherited(&mut self, object: &RemoteValue, name: &str, value: RemoteValue) {
        self.define(
            object,
            PropertyDescriptor {
                is_own: false,
                ..PropertyDescriptor::data(name, value)
            },
        );
    }

    /// Create a scope with given variables.
    pub fn scope(&mut self, kind: ScopeKind, variables: Vec<(&str, RemoteValue)>) -> Scope {
        let RemoteValue::Object { id, .. } = self.object("Scope", variables) else {
            unreachable!("infallible: `object` always returns an object");
        };
        Scope { kind, object: id }
    }

    /// Create a call frame with a fresh id, `line` and `column` are 0-based.
    pub fn frame(
        &mut self,
        function_name: &str,
        url: &str,
        line: u32,
        scopes: Vec<Scope>,
    ) -> CallFrame {
        self.next_frame += 1;
        CallFrame {
            id: FrameId(self.next_frame),
            function_name: function_name.to_string(),
            url: url.to_string(),
            line,
            column: 0,
            scope_chain: scopes,
            this: None,
            arguments: vec![],
        }
    }

    /// Execution reached `url:line` (0-based line) with given call stack.
    /// Return true if at least one native breakpoint is hit, in this case a pause
    /// event is queued.
    pub fn pause_at(&mut self, url: &str, line: u32, call_frames: Vec<CallFrame>) -> bool {
        if !self.connected {
            return false;
        }
        for frame in &call_frames {
            self.frames.insert(frame.id, frame.clone());
        }

        let candidates: Vec<(NativeBreakpointId, Option<String>)> = self
            .breakpoints
            .iter()
            .filter(|(_, bp)| bp.url == url && bp.line == line)
            .map(|(id, bp)| (id.clone(), bp.condition.clone()))
            .collect();

        let top_frame = call_frames.first().map(|f| f.id);
        let hit_breakpoints: Vec<NativeBreakpointId> = candidates
            .into_iter()
            .filter(|(_, condition)| match (condition, top_frame) {
                (None, _) => true,
                (Some(condition), Some(frame)) => self
                    .evaluate(condition, frame, true)
                    .map(|v| v.is_truthy())
                    .unwrap_or(false),
                (Some(_), None) => false,
            })
            .map(|(id, _)| id)
            .collect();

        if hit_breakpoints.is_empty() {
            return false;
        }
        self.paused.push_back(PauseEvent {
            hit_breakpoints,
            call_frames,
        });
        true
    }

    /// Make next [`ExecutionEngine::set_breakpoint`] call fail with given error.
    pub fn fail_next_set(&mut self, err: EngineError) {
        self.fail_next_set = Some(err);
    }

    /// Make next [`ExecutionEngine::get_properties`] call fail with given error.
    pub fn fail_next_read(&mut self, err: EngineError) {
        self.fail_next_read = Some(err);
    }

    /// Simulate a lost connection, all native state is dropped.
    pub fn sever(&mut self) {
        self.connected = false;
        self.breakpoints.clear();
        self.paused.clear();
    }

    pub fn native_breakpoints(
        &self,
    ) -> impl Iterator<Item = (&NativeBreakpointId, &NativeBreakpoint)> {
        self.breakpoints.iter()
    }

    pub fn native_breakpoint_count(&self) -> usize {
        self.breakpoints.len()
    }

    fn find_property(
        &self,
        id: ObjectId,
        name: &str,
    ) -> Result<Option<&PropertyDescriptor>, EngineError> {
        let obj = self.objects.get(&id).ok_or(EngineError::ObjectNotFound(id))?;
        Ok(obj.properties.iter().find(|p| p.name == name))
    }

    fn lookup(&self, frame: &CallFrame, name: &str) -> Result<RemoteValue, EvalError> {
        if name == "this" {
            return Ok(frame.this.clone().unwrap_or(RemoteValue::Undefined));
        }
        if let Some((_, value)) = frame.arguments.iter().find(|(arg, _)| arg == name) {
            return Ok(value.clone());
        }
        for scope in &frame.scope_chain {
            if let Some(prop) = self.find_property(scope.object, name)? {
                return Ok(prop.value.clone().unwrap_or(RemoteValue::Undefined));
            }
        }
        Err(EvalError::Exception(format!(
            "ReferenceError: {name} is not defined"
        )))
    }

    fn member(
        &self,
        value: RemoteValue,
        name: &str,
        side_effect_free: bool,
    ) -> Result<RemoteValue, EvalError> {
        match value {
            RemoteValue::Object { id, .. } => match self.find_property(id, name)? {
                None => Ok(RemoteValue::Undefined),
                Some(prop) if prop.has_getter => {
                    if side_effect_free {
                        Err(EvalError::SideEffect)
                    } else {
                        Err(EvalError::Exception(format!(
                            "getter `{name}` can't be invoked"
                        )))
                    }
                }
                Some(prop) => Ok(prop.value.clone().unwrap_or(RemoteValue::Undefined)),
            },
            RemoteValue::String(s) if name == "length" => {
                Ok(RemoteValue::Number(s.encode_utf16().count() as f64))
            }
            RemoteValue::Undefined | RemoteValue::Null => Err(EvalError::Exception(format!(
                "TypeError: Cannot read properties of {} (reading '{name}')",
                value.primitive_text().unwrap_or_default()
            ))),
            _ => Ok(RemoteValue::Undefined),
        }
    }
}

fn literal<'a>() -> impl Parser<'a, &'a str, RemoteValue, Err<'a>> {
    let keyword = choice((
        just("undefined").to(RemoteValue::Undefined),
        just("null").to(RemoteValue::Null),
        just("true").to(RemoteValue::Bool(true)),
        just("false").to(RemoteValue::Bool(false)),
    ));
    let number = any()
        .filter(|c: &char| c.is_ascii_digit() || *c == '-' || *c == '.')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
                .repeated(),
        )
        .to_slice()
        .try_map(|n: &str, span| {
            n.parse::<f64>()
                .map(RemoteValue::Number)
                .map_err(|e| Rich::custom(span, e))
        });
    let string = choice((quoted('"'), quoted('\'')))
        .map(|s: &str| RemoteValue::String(s.to_string()));

    choice((keyword, number, string)).then_ignore(end())
}

/// Split `a.b[0]["c"]` into `["a", "b", "0", "c"]`.
fn path<'a>() -> impl Parser<'a, &'a str, Vec<String>, Err<'a>> {
    let key = choice((quoted('"'), quoted('\''), text::int(10)))
        .padded()
        .delimited_by(just('['), just(']'));
    let member = choice((just('.').ignore_then(identifier()), key));

    identifier()
        .then(member.repeated().collect::<Vec<_>>())
        .map(|(root, members)| {
            std::iter::once(root)
                .chain(members)
                .map(ToString::to_string)
                .collect()
        })
        .then_ignore(end())
}

fn parse_literal(expr: &str) -> Option<RemoteValue> {
    literal().parse(expr).into_result().ok()
}

fn parse_path(expr: &str) -> Option<Vec<String>> {
    path().parse(expr).into_result().ok()
}

impl ExecutionEngine for HeapEngine {
    fn connect(&mut self) -> Result<(), EngineError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.sever();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn supports_native_conditions(&self) -> bool {
        self.native_conditions
    }

    fn set_breakpoint(
        &mut self,
        url: &str,
        line: u32,
        column: u32,
        condition: Option<&str>,
    ) -> Result<NativeBreakpointId, EngineError> {
        if let Some(err) = self.fail_next_set.take() {
            if err.is_disconnect() {
                self.sever();
            }
            return Err(err);
        }
        if !self.connected {
            return Err(EngineError::Disconnected);
        }

        self.next_breakpoint += 1;
        let id = format!("{url}:{line}:{column}#{}", self.next_breakpoint);
        self.breakpoints.insert(
            id.clone(),
            NativeBreakpoint {
                url: url.to_string(),
                line,
                column,
                condition: condition.map(ToString::to_string),
            },
        );
        Ok(id)
    }

    fn remove_breakpoint(&mut self, id: &NativeBreakpointId) -> Result<(), EngineError> {
        if !self.connected {
            return Err(EngineError::Disconnected);
        }
        self.breakpoints
            .shift_remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::BreakpointNotFound(id.clone()))
    }

    fn evaluate(
        &mut self,
        expression: &str,
        frame: FrameId,
        side_effect_free: bool,
    ) -> Result<RemoteValue, EvalError> {
        if !self.connected {
            return Err(EngineError::Disconnected.into());
        }
        let frame = self
            .frames
            .get(&frame)
            .ok_or(EngineError::FrameNotFound(frame))?;

        let expression = expression.trim();
        if let Some(literal) = parse_literal(expression) {
            return Ok(literal);
        }
        let Some(path) = parse_path(expression) else {
            if expression.contains('(') && side_effect_free {
                return Err(EvalError::SideEffect);
            }
            return Err(EvalError::Exception(format!(
                "SyntaxError: unsupported expression `{expression}`"
            )));
        };

        let mut value = self.lookup(frame, &path[0])?;
        for member in &path[1..] {
            value = self.member(value, member, side_effect_free)?;
        }
        Ok(value)
    }

    fn get_properties(&mut self, object: ObjectId) -> Result<Vec<PropertyDescriptor>, EngineError> {
        if let Some(err) = self.fail_next_read.take() {
            if err.is_disconnect() {
                self.sever();
            }
            return Err(err);
        }
        if !self.connected {
            return Err(EngineError::Disconnected);
        }
        let obj = self
            .objects
            .get(&object)
            .ok_or(EngineError::ObjectNotFound(object))?;
        Ok(obj.properties.clone())
    }

    fn poll_paused(&mut self) -> Option<PauseEvent> {
        self.paused.pop_front()
    }
}
