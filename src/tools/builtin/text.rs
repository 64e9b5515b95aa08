//! String and JSON utilities.

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use super::{optional_str, string_arg, Args};
use crate::tools::{ToolContext, ToolError};

const MAX_INDENT: u64 = 8;

pub(super) fn echo(_: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let message = string_arg(args, "message")?;
    let prefix = optional_str(args, "prefix").unwrap_or("");
    let suffix = optional_str(args, "suffix").unwrap_or("");
    let repeat = args.get("repeat").and_then(Value::as_u64).unwrap_or(1);
    if !(1..=10).contains(&repeat) {
        return Err(ToolError::new("Repeat count must be between 1 and 10"));
    }

    let line = format!("{prefix}{message}{suffix}");
    let lines: Vec<&str> = (0..repeat).map(|_| line.as_str()).collect();
    Ok(Value::String(lines.join("\n")))
}

pub(super) fn text_processor(_: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let text = string_arg(args, "text")?;
    Ok(match string_arg(args, "operation")? {
        "uppercase" => Value::String(text.to_uppercase()),
        "lowercase" => Value::String(text.to_lowercase()),
        "title" => Value::String(title_case(text)),
        "reverse" => Value::String(text.chars().rev().collect()),
        "word_count" => Value::from(text.split_whitespace().count()),
        "char_count" => Value::from(text.chars().count()),
        "trim" => Value::String(text.trim().to_string()),
        other => return Err(ToolError::new(format!("Unknown operation: {other}"))),
    })
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// Object keys come out sorted: documents are re-serialised from a parsed
/// [`Value`], not reformatted in place.
pub(super) fn json_formatter(_: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let data = string_arg(args, "data")?;
    let operation = optional_str(args, "operation").unwrap_or("format");

    let parsed = match serde_json::from_str::<Value>(data) {
        Ok(parsed) => parsed,
        Err(_) if operation == "validate" => return Ok(Value::Bool(false)),
        Err(e) => return Err(ToolError::new(format!("Invalid JSON: {e}"))),
    };

    match operation {
        "validate" => Ok(Value::Bool(true)),
        "minify" => serde_json::to_string(&parsed)
            .map(Value::String)
            .map_err(|e| ToolError::new(format!("Cannot serialise JSON: {e}"))),
        "format" => {
            let width = args.get("indent").and_then(Value::as_u64).unwrap_or(2);
            if width > MAX_INDENT {
                return Err(ToolError::new(format!(
                    "indent must be between 0 and {MAX_INDENT}, got {width}"
                )));
            }
            pretty(&parsed, width).map(Value::String)
        }
        other => Err(ToolError::new(format!("Unknown operation: {other}"))),
    }
}

fn pretty(value: &Value, width: u64) -> Result<String, ToolError> {
    let indent = " ".repeat(usize::try_from(width).unwrap_or(0));
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));
    value
        .serialize(&mut serializer)
        .map_err(|e| ToolError::new(format!("Cannot serialise JSON: {e}")))?;
    String::from_utf8(out).map_err(|e| ToolError::new(format!("Cannot serialise JSON: {e}")))
}
