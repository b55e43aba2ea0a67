//! Logpoint message formatting and user-visible status texts.

use crate::agent::capture::ANONYMOUS_FUNCTION;
use crate::agent::engine::RemoteValue;
use once_cell::sync::Lazy;
use regex::Regex;

pub const INVALID_BREAKPOINT: &str = "Invalid snapshot - id or location missing";
pub const SOURCE_FILE_NOT_FOUND: &str =
    "A script matching the source file was not found loaded on the debuggee";
pub const OUTPUT_FILE_NOT_FOUND: &str =
    "Could not determine the output file associated with the transpiled input file";
pub const INVALID_LINE_NUMBER: &str = "Invalid snapshot position: ";
pub const EXPRESSIONS_DISABLED: &str = "Expressions and conditions are not allowed";
pub const DISALLOWED_EXPRESSION: &str = "Expression not allowed";
pub const ERROR_COMPILING_CONDITION: &str = "Error compiling condition.";
pub const ERROR_COMPILING_EXPRESSION: &str = "Error compiling expression.";
pub const ERROR_EVALUATING_CONDITION: &str = "Error evaluating condition: ";
pub const ENGINE_BREAKPOINT_ERROR: &str = "Unable to set breakpoint in the execution engine: ";
pub const CAPTURE_BREAKPOINT_DATA: &str = "Error trying to capture snapshot data: ";
pub const UNSUPPORTED_ACTION: &str = "Unsupported breakpoint action: ";
pub const BREAKPOINT_EXPIRED: &str = "The snapshot has expired";
pub const LOGPOINT_PREFIX: &str = "LOGPOINT: ";

pub const BUFFER_FULL: &str = "Max data size reached";
pub const NATIVE_PROPERTY: &str = "Native properties are not available";
pub const GETTER_PROPERTY: &str = "Properties with getters are not available";

pub fn ambiguous_source(path: &str, candidates: &[String]) -> String {
    format!(
        "Unable to unambiguously find {path} on disk. Potential matches: {}",
        candidates.join(", ")
    )
}

pub fn frame_depth_limit(max_expand_frames: usize) -> String {
    format!(
        "Locals and arguments are only displayed for the top `{max_expand_frames}` stack frames."
    )
}

pub fn string_truncated(max_len: usize, full_len: usize) -> String {
    format!(
        "Only first `{max_len}` chars were captured for string of length `{full_len}`. \
         Use in an expression to see the full string."
    )
}

pub fn properties_truncated(max_properties: usize) -> String {
    format!(
        "Only first `{max_properties}` properties were captured. \
         Use in an expression to see all properties."
    )
}

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\$|\$\d+").expect("infallible: static regex"));

/// Substitute `$N` tokens of a logpoint template with values at index `N`.
/// `$$` is an escaped `$`, tokens without a value are left untouched.
///
/// # Arguments
///
/// * `template`: logpoint message format
/// * `values`: rendered expression values
pub fn format_message(template: &str, values: &[impl AsRef<str>]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for token in TOKEN.find_iter(template) {
        out.push_str(&template[last..token.start()]);
        let text = token.as_str();
        if text == "$$" {
            out.push('$');
        } else {
            let value = text[1..]
                .parse::<usize>()
                .ok()
                .and_then(|idx| values.get(idx));
            match value {
                Some(value) => out.push_str(value.as_ref()),
                None => out.push_str(text),
            }
        }
        last = token.end();
    }
    out.push_str(&template[last..]);
    out
}

/// Render a value for a logpoint message. Strings are quoted, composite values are
/// represented by their description.
pub fn log_value(value: &RemoteValue) -> String {
    match value {
        RemoteValue::String(s) => format!("\"{s}\""),
        RemoteValue::Function { name } => {
            format!("function {}()", name.as_deref().unwrap_or(ANONYMOUS_FUNCTION))
        }
        RemoteValue::Object { description, .. } => description.clone(),
        primitive => primitive.primitive_text().unwrap_or_default(),
    }
}
