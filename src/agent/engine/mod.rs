//! Capability contract of an execution engine: the runtime that owns scripts, sets native
//! breakpoints, pauses threads and exposes call frames.
//!
//! The agent is written once against [`ExecutionEngine`], concrete engines (an inspector
//! protocol client, the in-memory [`heap::HeapEngine`], ...) are interchangeable.

pub mod heap;

use std::fmt::{Display, Formatter};

/// Engine assigned id of a native breakpoint.
pub type NativeBreakpointId = String;

/// Identity of a live object inside an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Identity of a call frame, valid until execution resumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("execution engine is disconnected")]
    Disconnected,
    #[error("native breakpoint `{0}` not found")]
    BreakpointNotFound(NativeBreakpointId),
    #[error("{0} not found")]
    ObjectNotFound(ObjectId),
    #[error("call frame {0:?} not found")]
    FrameNotFound(FrameId),
    #[error("engine protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    /// True if connection to the engine is lost, no further request can be served.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, EngineError::Disconnected)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Exception(String),
    #[error("possible side-effect in debug-evaluate")]
    SideEffect,
}

/// Value as seen through an engine. Composite values are referenced by identity.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(String),
    String(String),
    Symbol(String),
    Function { name: Option<String> },
    Object { id: ObjectId, description: String },
}

impl RemoteValue {
    pub fn string(s: impl Into<String>) -> Self {
        RemoteValue::String(s.into())
    }

    pub fn function(name: &str) -> Self {
        RemoteValue::Function {
            name: (!name.is_empty()).then(|| name.to_string()),
        }
    }

    /// Truthiness, following the rules of the scripting language.
    pub fn is_truthy(&self) -> bool {
        match self {
            RemoteValue::Undefined | RemoteValue::Null => false,
            RemoteValue::Bool(b) => *b,
            RemoteValue::Number(n) => *n != 0.0 && !n.is_nan(),
            RemoteValue::BigInt(n) => n != "0",
            RemoteValue::String(s) => !s.is_empty(),
            RemoteValue::Symbol(_) | RemoteValue::Function { .. } | RemoteValue::Object { .. } => {
                true
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RemoteValue::Undefined => "undefined",
            RemoteValue::Null => "null",
            RemoteValue::Bool(_) => "boolean",
            RemoteValue::Number(_) => "number",
            RemoteValue::BigInt(_) => "bigint",
            RemoteValue::String(_) => "string",
            RemoteValue::Symbol(_) => "symbol",
            RemoteValue::Function { .. } => "function",
            RemoteValue::Object { .. } => "object",
        }
    }

    /// Textual form of a primitive value, `None` for functions and objects.
    pub fn primitive_text(&self) -> Option<String> {
        let text = match self {
            RemoteValue::Undefined => "undefined".to_string(),
            RemoteValue::Null => "null".to_string(),
            RemoteValue::Bool(b) => b.to_string(),
            RemoteValue::Number(n) => number_text(*n),
            RemoteValue::BigInt(n) => n.clone(),
            RemoteValue::String(s) => s.clone(),
            RemoteValue::Symbol(s) => format!("Symbol({s})"),
            RemoteValue::Function { .. } | RemoteValue::Object { .. } => return None,
        };
        Some(text)
    }
}

fn number_text(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Local,
    Closure,
    Block,
    Catch,
    With,
    Script,
    Module,
    Global,
}

/// Lexical scope of a call frame, its variables are the properties of `object`.
#[derive(Clone, Debug, PartialEq)]
pub struct Scope {
    pub kind: ScopeKind,
    pub object: ObjectId,
}

/// Paused call frame. Lines and columns are 0-based.
#[derive(Clone, Debug, PartialEq)]
pub struct CallFrame {
    pub id: FrameId,
    pub function_name: String,
    pub url: String,
    pub line: u32,
    pub column: u32,
    /// Innermost scope first.
    pub scope_chain: Vec<Scope>,
    pub this: Option<RemoteValue>,
    /// Invocation arguments, for engines that report them apart from scopes.
    pub arguments: Vec<(String, RemoteValue)>,
}

/// Property of an object as reported by an engine.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub value: Option<RemoteValue>,
    pub is_own: bool,
    pub has_getter: bool,
    /// Property backed by the engine itself, its value can't be read without side effects.
    pub is_native: bool,
}

impl PropertyDescriptor {
    pub fn data(name: impl Into<String>, value: RemoteValue) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            is_own: true,
            has_getter: false,
            is_native: false,
        }
    }
}

/// Execution stopped on one or more native breakpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct PauseEvent {
    pub hit_breakpoints: Vec<NativeBreakpointId>,
    /// Innermost frame first.
    pub call_frames: Vec<CallFrame>,
}

pub trait ExecutionEngine {
    /// Establish (or re-establish) connection with a runtime.
    fn connect(&mut self) -> Result<(), EngineError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// True if engine evaluates breakpoint conditions by itself.
    fn supports_native_conditions(&self) -> bool {
        false
    }

    /// Set a native breakpoint.
    ///
    /// # Arguments
    ///
    /// * `url`: script url as known by engine
    /// * `line`: 0-based line number
    /// * `column`: 0-based column number
    /// * `condition`: breakpoint condition, passed only if engine supports native conditions
    fn set_breakpoint(
        &mut self,
        url: &str,
        line: u32,
        column: u32,
        condition: Option<&str>,
    ) -> Result<NativeBreakpointId, EngineError>;

    fn remove_breakpoint(&mut self, id: &NativeBreakpointId) -> Result<(), EngineError>;

    /// Evaluate an expression in the context of a paused frame.
    fn evaluate(
        &mut self,
        expression: &str,
        frame: FrameId,
        side_effect_free: bool,
    ) -> Result<RemoteValue, EvalError>;

    fn get_properties(&mut self, object: ObjectId) -> Result<Vec<PropertyDescriptor>, EngineError>;

    /// Take next pending pause event (if exists).
    fn poll_paused(&mut self) -> Option<PauseEvent>;
}
