//! Built-in tool bodies.
//!
//! Each tool is an ordinary synchronous function over the validated argument
//! map. [`definitions`] collects their registrations in publication order and
//! [`handlers`] exposes the same functions by id for manifest files.
//!
//! The bodies live in submodules by subject: arithmetic in `math`, string
//! and JSON utilities in `text`, random values in `random`, clock and date
//! arithmetic in `dates`, and sandboxed file access in `files`.

mod dates;
mod files;
mod math;
mod random;
mod text;

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use super::{
    HandlerTable, RegistryError, ToolBuilder, ToolContext, ToolDefinition, ToolError, ToolRegistry,
};

/// Default and upper bound for `file_reader.max_size`.
const DEFAULT_READ_SIZE: u64 = 1_048_576;
const MAX_READ_SIZE: u64 = 10_485_760;

type Args = Map<String, Value>;

/// Registrations for every built-in tool, in publication order.
///
/// # Errors
///
/// Returns an error if a built-in schema fails to compile.
#[allow(clippy::too_many_lines)]
pub fn definitions() -> Result<Vec<ToolDefinition>, RegistryError> {
    vec![
        ToolBuilder::new("calculator")
            .description("Perform basic arithmetic operations")
            .category("math")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["add", "subtract", "multiply", "divide", "power", "sqrt", "abs"],
                        "description": "Arithmetic operation to perform"
                    },
                    "a": {"type": "number", "description": "First operand"},
                    "b": {"type": "number", "description": "Second operand (binary operations only)"}
                },
                "required": ["operation", "a"]
            }))
            .handler(math::calculator)
            .build(),
        ToolBuilder::new("advanced_calculator")
            .description("Trigonometric, logarithmic and integer functions")
            .category("math")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["sin", "cos", "tan", "log", "ln", "factorial", "gcd", "lcm"]
                    },
                    "a": {"type": "number"},
                    "b": {"type": "number", "description": "Second operand for gcd and lcm"},
                    "angle_unit": {
                        "type": "string",
                        "enum": ["radians", "degrees"],
                        "default": "radians"
                    }
                },
                "required": ["operation", "a"]
            }))
            .handler(math::advanced_calculator)
            .build(),
        ToolBuilder::new("calculator_help")
            .description("Get help and examples for calculator operations")
            .category("help")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "operation": {"type": "string", "description": "Operation to describe; omit for an overview"}
                }
            }))
            .handler(math::calculator_help)
            .build(),
        ToolBuilder::new("echo")
            .description("Echo a message back, optionally repeated and decorated")
            .category("utility")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"},
                    "repeat": {"type": "integer", "minimum": 1, "maximum": 10, "default": 1},
                    "prefix": {"type": "string", "default": ""},
                    "suffix": {"type": "string", "default": ""}
                },
                "required": ["message"]
            }))
            .handler(text::echo)
            .build(),
        ToolBuilder::new("text_processor")
            .description("Apply a text transformation or measurement")
            .category("utility")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "operation": {
                        "type": "string",
                        "enum": ["uppercase", "lowercase", "title", "reverse", "word_count", "char_count", "trim"]
                    }
                },
                "required": ["text", "operation"]
            }))
            .handler(text::text_processor)
            .build(),
        ToolBuilder::new("json_formatter")
            .description("Format, minify or validate a JSON document")
            .category("utility")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "data": {"type": "string", "description": "JSON text"},
                    "operation": {
                        "type": "string",
                        "enum": ["format", "validate", "minify"],
                        "default": "format"
                    },
                    "indent": {"type": "integer", "minimum": 0, "maximum": 8, "default": 2}
                },
                "required": ["data"]
            }))
            .handler(text::json_formatter)
            .build(),
        ToolBuilder::new("random_generator")
            .description("Generate a random integer, float, string, boolean or UUID")
            .category("utility")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["integer", "float", "string", "boolean", "uuid"]
                    },
                    "min_value": {"type": "number", "description": "Lower bound (integer: 0, float: 0.0)"},
                    "max_value": {"type": "number", "description": "Upper bound (integer: 100, float: 1.0)"},
                    "length": {"type": "integer", "minimum": 1, "maximum": 100, "default": 10},
                    "charset": {
                        "type": "string",
                        "enum": ["alphanumeric", "letters", "digits", "ascii"],
                        "default": "alphanumeric"
                    }
                },
                "required": ["type"]
            }))
            .handler(random::random_generator)
            .build(),
        ToolBuilder::new("time")
            .description("Current date and time in a chosen format")
            .category("time")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "format": {
                        "type": "string",
                        "enum": ["iso", "unix", "human", "utc", "local", "custom"],
                        "default": "iso"
                    },
                    "custom_format": {"type": "string", "description": "strftime-style format for format=custom"},
                    "timezone": {"type": "string", "enum": ["local", "utc"], "default": "local"}
                }
            }))
            .handler(dates::time)
            .build(),
        ToolBuilder::new("time_calculator")
            .description("Shift, compare and reformat dates")
            .category("time")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["add_days", "subtract_days", "add_hours", "subtract_hours", "days_between", "format_date"]
                    },
                    "date": {"type": "string", "description": "YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS[+HH:MM]; defaults to now"},
                    "amount": {"type": "number", "description": "Days or hours to add or subtract"},
                    "end_date": {"type": "string", "description": "Second date for days_between"},
                    "output_format": {
                        "type": "string",
                        "default": "iso",
                        "description": "iso, human, date_only or a strftime pattern"
                    }
                },
                "required": ["operation"]
            }))
            .handler(dates::time_calculator)
            .build(),
        ToolBuilder::new("file_reader")
            .description("Read a text file from the resources directory")
            .category("file")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path relative to the resources directory"},
                    "encoding": {
                        "type": "string",
                        "enum": ["utf-8", "ascii", "latin-1"],
                        "default": "utf-8"
                    },
                    "max_size": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_READ_SIZE,
                        "default": DEFAULT_READ_SIZE
                    }
                },
                "required": ["file_path"]
            }))
            .handler(files::file_reader)
            .build(),
        ToolBuilder::new("file_info")
            .description("Size, timestamps and type of a path in the resources directory")
            .category("file")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path relative to the resources directory"}
                },
                "required": ["file_path"]
            }))
            .handler(files::file_info)
            .build(),
        ToolBuilder::new("list_files")
            .description("List files and directories in the resources directory")
            .category("file")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "directory": {"type": "string", "default": "", "description": "Subdirectory; empty for the root"},
                    "include_hidden": {"type": "boolean", "default": false},
                    "file_types": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Extensions to keep, such as .txt"
                    }
                }
            }))
            .handler(files::list_files)
            .build(),
        ToolBuilder::new("search_files")
            .description("Search the resources directory by file name or content")
            .category("file")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "search_type": {
                        "type": "string",
                        "enum": ["filename", "content", "both"],
                        "default": "filename"
                    },
                    "case_sensitive": {"type": "boolean", "default": false},
                    "file_types": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["query"]
            }))
            .handler(files::search_files)
            .build(),
        ToolBuilder::new("tool_info")
            .description("Describe the published tools and their categories")
            .category("help")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "tool_name": {"type": "string"},
                    "category": {"type": "string"}
                }
            }))
            .handler(tool_info)
            .build(),
    ]
    .into_iter()
    .collect()
}

/// The built-in snapshot.
///
/// # Errors
///
/// Returns an error if a built-in schema fails to compile.
pub fn registry() -> Result<ToolRegistry, RegistryError> {
    ToolRegistry::build(definitions()?)
}

/// Built-in handlers addressable by id from tool manifests.
#[must_use]
pub fn handlers() -> HandlerTable {
    let mut table = HandlerTable::new();
    table.insert("calculator", Arc::new(math::calculator));
    table.insert("advanced_calculator", Arc::new(math::advanced_calculator));
    table.insert("calculator_help", Arc::new(math::calculator_help));
    table.insert("echo", Arc::new(text::echo));
    table.insert("text_processor", Arc::new(text::text_processor));
    table.insert("json_formatter", Arc::new(text::json_formatter));
    table.insert("random_generator", Arc::new(random::random_generator));
    table.insert("time", Arc::new(dates::time));
    table.insert("time_calculator", Arc::new(dates::time_calculator));
    table.insert("file_reader", Arc::new(files::file_reader));
    table.insert("file_info", Arc::new(files::file_info));
    table.insert("list_files", Arc::new(files::list_files));
    table.insert("search_files", Arc::new(files::search_files));
    table.insert("tool_info", Arc::new(tool_info));
    table
}

// ----------------------------------------------------------------------------
// Argument helpers
// ----------------------------------------------------------------------------

fn string_arg<'a>(args: &'a Args, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::new(format!("'{key}' must be a string")))
}

fn optional_str<'a>(args: &'a Args, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn number_arg(args: &Args, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

fn second_operand(args: &Args, what: &str) -> Result<f64, ToolError> {
    number_arg(args, "b").ok_or_else(|| ToolError::new(format!("{what} requires two numbers")))
}

// ----------------------------------------------------------------------------
// Registry introspection
// ----------------------------------------------------------------------------

fn tool_info(context: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let tools = context.tools()?;

    if let Some(name) = optional_str(args, "tool_name") {
        return Ok(tools
            .get(name)
            .map_or_else(|| json!({}), |tool| json!(tool.summary())));
    }

    let mut categories: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for name in tools.names() {
        if let Some(tool) = tools.get(name) {
            categories.entry(tool.category()).or_default().push(name);
        }
    }
    let describe = |names: &Vec<&str>| json!({"total_tools": names.len(), "tools": names});

    if let Some(category) = optional_str(args, "category") {
        return Ok(categories.get(category).map_or_else(|| json!({}), describe));
    }

    let summary: Map<String, Value> = categories
        .iter()
        .map(|(category, names)| ((*category).to_string(), describe(names)))
        .collect();
    Ok(json!({
        "registered_tools": tools.names().collect::<Vec<_>>(),
        "categories": summary,
        "total_tools": tools.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::InvokeError;

    pub(super) fn call(name: &str, arguments: Value) -> Result<Value, InvokeError> {
        let registry = Arc::new(registry().unwrap());
        let context = ToolContext::default().with_tools(Arc::clone(&registry));
        registry.invoke(&context, name, &arguments)
    }

    #[test]
    fn handler_table_covers_every_builtin() {
        let table = handlers();
        let registry = registry().unwrap();
        for name in registry.names() {
            assert!(table.contains_key(name), "missing handler for {name}");
        }
        assert_eq!(table.len(), registry.len());
    }

    #[test]
    fn tool_info_describes_one_tool() {
        let info = call("tool_info", json!({"tool_name": "echo"})).unwrap();
        assert_eq!(info["name"], "echo");
        assert_eq!(info["category"], "utility");
        assert_eq!(info["inputSchema"]["required"], json!(["message"]));

        assert_eq!(call("tool_info", json!({"tool_name": "nope"})).unwrap(), json!({}));
    }

    #[test]
    fn tool_info_groups_by_category() {
        let file = call("tool_info", json!({"category": "file"})).unwrap();
        assert_eq!(
            file["tools"],
            json!(["file_reader", "file_info", "list_files", "search_files"])
        );
        assert_eq!(file["total_tools"], 4);

        let overview = call("tool_info", json!({})).unwrap();
        assert_eq!(overview["total_tools"], 14);
        assert_eq!(overview["categories"]["help"]["tools"], json!(["calculator_help", "tool_info"]));
        assert_eq!(overview["registered_tools"][0], "calculator");
    }

    #[test]
    fn tool_info_without_registry_is_a_tool_error() {
        let err = registry()
            .unwrap()
            .invoke(&ToolContext::default(), "tool_info", &json!({}))
            .unwrap_err();
        assert!(matches!(err, InvokeError::Execution { .. }));
    }
}
