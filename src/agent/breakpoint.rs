//! Breakpoint representation exchanged with a control plane.
//!
//! Field names are a public contract, all structures are (de)serialized in camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{Display, Formatter};

/// Logical breakpoint identifier, assigned by a control plane.
pub type BreakpointId = String;

/// Location of a breakpoint in a source file. Lines and columns are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub path: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl SourceLocation {
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column: None,
        }
    }

    pub fn with_column(self, column: u32) -> Self {
        Self {
            column: Some(column),
            ..self
        }
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.column {
            None => write!(f, "{}:{}", self.path, self.line),
            Some(col) => write!(f, "{}:{}:{}", self.path, self.line, col),
        }
    }
}

/// What to do when a breakpoint is hit.
///
/// Unknown actions are kept as is, so that a breakpoint with such an action can still
/// be rejected with a meaningful status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Capture a snapshot once and complete.
    #[default]
    Capture,
    /// Emit a formatted message on every hit.
    Log,
    Unsupported(String),
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "CAPTURE" => Action::Capture,
            "LOG" => Action::Log,
            _ => Action::Unsupported(value),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Capture => "CAPTURE".to_string(),
            Action::Log => "LOG".to_string(),
            Action::Unsupported(action) => action,
        }
    }
}

/// Logpoint message severity.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Part of a breakpoint a status message refers to.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Reference {
    #[default]
    Unspecified,
    BreakpointSourceLocation,
    BreakpointCondition,
    BreakpointExpression,
    BreakpointAge,
    VariableName,
    VariableValue,
}

/// Human-readable message, `format` is ready for display.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatMessage {
    pub format: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub refers_to: Reference,
    pub description: FormatMessage,
}

impl StatusMessage {
    fn new(is_error: bool, refers_to: Reference, format: impl Into<String>) -> Self {
        Self {
            is_error,
            refers_to,
            description: FormatMessage {
                format: format.into(),
                parameters: vec![],
            },
        }
    }

    pub fn error(refers_to: Reference, format: impl Into<String>) -> Self {
        Self::new(true, refers_to, format)
    }

    pub fn info(refers_to: Reference, format: impl Into<String>) -> Self {
        Self::new(false, refers_to, format)
    }

    pub fn with_parameters(mut self, parameters: Vec<String>) -> Self {
        self.description.parameters = parameters;
        self
    }
}

/// Captured variable. Composite values are not inlined, they are referenced
/// by `var_table_index` in the variable table of a breakpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_table_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Variable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
}

impl Variable {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_value(self, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..self
        }
    }

    pub fn with_index(self, idx: usize) -> Self {
        Self {
            var_table_index: Some(idx),
            ..self
        }
    }

    pub fn with_status(self, status: StatusMessage) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub function: String,
    pub location: SourceLocation,
    #[serde(default)]
    pub arguments: Vec<Variable>,
    #[serde(default)]
    pub locals: Vec<Variable>,
}

/// Logical breakpoint, as listed by a control plane and reported back to it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<BreakpointId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<String>,
    #[serde(default)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message_format: Option<String>,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_frames: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variable_table: Vec<Variable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluated_expressions: Vec<Variable>,
    #[serde(default)]
    pub is_final_state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

impl Breakpoint {
    pub fn new(id: impl Into<BreakpointId>, location: SourceLocation) -> Self {
        Self {
            id: Some(id.into()),
            location: Some(location),
            ..Default::default()
        }
    }

    pub fn with_action(self, action: Action) -> Self {
        Self { action, ..self }
    }

    pub fn with_condition(self, condition: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            ..self
        }
    }

    pub fn with_expressions<S: Into<String>>(
        self,
        expressions: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            expressions: expressions.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_log_message(self, format: impl Into<String>) -> Self {
        Self {
            log_message_format: Some(format.into()),
            ..self
        }
    }

    /// Return breakpoint id if it exists and not empty.
    pub fn valid_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Control planes are not consistent about id representation, accept both strings and numbers.
fn deserialize_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<BreakpointId>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(Option::<RawId>::deserialize(d)?.map(|raw| match raw {
        RawId::Text(text) => text,
        RawId::Signed(num) => num.to_string(),
        RawId::Unsigned(num) => num.to_string(),
    }))
}
