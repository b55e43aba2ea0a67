use crate::agent::breakpoint::{Reference, SourceLocation, StatusMessage};
use crate::agent::capture::CaptureError;
use crate::agent::engine::EngineError;
use crate::agent::format;
use crate::agent::location::LocationError;
use crate::agent::validate::ExpressionError;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("breakpoint id is missing")]
    MissingId,
    #[error("breakpoint location is missing")]
    MissingLocation,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- breakpoint rejection --------------------------------------
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("expressions and conditions are disabled")]
    ExpressionsDisabled,
    #[error("condition: {0}")]
    Condition(ExpressionError),
    #[error("expression `{expression}`: {error}")]
    Expression {
        expression: String,
        error: ExpressionError,
    },
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error("unsupported breakpoint action `{0}`")]
    UnsupportedAction(String),

    // --------------------------------- runtime errors --------------------------------------------
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("breakpoint `{0}` not found")]
    BreakpointNotFound(String),
    #[error("agent is not registered at control plane")]
    NotRegistered,

    // --------------------------------- hook errors -----------------------------------------------
    #[error("control plane: {0:#}")]
    Hook(anyhow::Error),
}

impl Error {
    /// Return true if the agent can't arm breakpoints anymore, until the engine reconnects.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Validation(_) => false,
            Error::ExpressionsDisabled => false,
            Error::Condition(_) => false,
            Error::Expression { .. } => false,
            Error::Location(_) => false,
            Error::UnsupportedAction(_) => false,
            Error::Engine(e) => e.is_disconnect(),
            Error::Capture(CaptureError::Engine(e)) => e.is_disconnect(),
            Error::Capture(_) => false,
            Error::BreakpointNotFound(_) => false,
            Error::NotRegistered => false,
            Error::Hook(_) => false,
        }
    }

    /// User-visible status for a breakpoint that failed with this error.
    ///
    /// # Arguments
    ///
    /// * `location`: requested location of the breakpoint (if exists)
    pub fn status(&self, location: Option<&SourceLocation>) -> StatusMessage {
        match self {
            Error::Validation(_) => {
                StatusMessage::error(Reference::Unspecified, format::INVALID_BREAKPOINT)
            }
            Error::ExpressionsDisabled => {
                StatusMessage::error(Reference::Unspecified, format::EXPRESSIONS_DISABLED)
            }
            Error::Condition(ExpressionError::Disallowed(_)) => StatusMessage::error(
                Reference::BreakpointCondition,
                format::DISALLOWED_EXPRESSION,
            ),
            Error::Condition(ExpressionError::Compile(_)) => StatusMessage::error(
                Reference::BreakpointCondition,
                format::ERROR_COMPILING_CONDITION,
            ),
            Error::Expression {
                error: ExpressionError::Disallowed(_),
                ..
            } => StatusMessage::error(
                Reference::BreakpointExpression,
                format::DISALLOWED_EXPRESSION,
            ),
            Error::Expression {
                error: ExpressionError::Compile(_),
                ..
            } => StatusMessage::error(
                Reference::BreakpointExpression,
                format::ERROR_COMPILING_EXPRESSION,
            ),
            Error::Location(LocationError::NotFound(_)) => StatusMessage::error(
                Reference::BreakpointSourceLocation,
                format::SOURCE_FILE_NOT_FOUND,
            ),
            Error::Location(LocationError::Ambiguous { path, candidates }) => {
                StatusMessage::error(
                    Reference::BreakpointSourceLocation,
                    format::ambiguous_source(path, candidates),
                )
                .with_parameters(candidates.clone())
            }
            Error::Location(LocationError::InvalidLine { file, line, .. }) => {
                let position = location
                    .map(|l| format!("{}:{}", l.path, l.line))
                    .unwrap_or_else(|| format!("{file}:{line}"));
                StatusMessage::error(
                    Reference::BreakpointSourceLocation,
                    format!("{}{position}", format::INVALID_LINE_NUMBER),
                )
            }
            Error::Location(LocationError::InvalidColumn { file, line, column }) => {
                let position = location
                    .map(|l| format!("{}:{}:{column}", l.path, l.line))
                    .unwrap_or_else(|| format!("{file}:{line}:{column}"));
                StatusMessage::error(
                    Reference::BreakpointSourceLocation,
                    format!("{}{position}", format::INVALID_LINE_NUMBER),
                )
            }
            Error::Location(LocationError::OutputFileNotFound(_)) => StatusMessage::error(
                Reference::BreakpointSourceLocation,
                format::OUTPUT_FILE_NOT_FOUND,
            ),
            Error::UnsupportedAction(action) => StatusMessage::error(
                Reference::Unspecified,
                format!("{}{action}", format::UNSUPPORTED_ACTION),
            ),
            Error::Engine(e) => StatusMessage::error(
                Reference::BreakpointSourceLocation,
                format!("{}{e}", format::ENGINE_BREAKPOINT_ERROR),
            ),
            Error::Capture(e) => StatusMessage::error(
                Reference::Unspecified,
                format!("{}{e}", format::CAPTURE_BREAKPOINT_DATA),
            ),
            Error::BreakpointNotFound(_) | Error::NotRegistered | Error::Hook(_) => {
                StatusMessage::error(Reference::Unspecified, self.to_string())
            }
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                if $crate::log::is_enabled() {
                    $log_fn!(target: "agent", "{:#}", e);
                }
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                if $crate::log::is_enabled() {
                    $log_fn!(target: "agent", concat!($msg, " {:#}"), e);
                }
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
