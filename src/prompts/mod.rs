//! Prompt registry: named, parameterised text templates.
//!
//! Each `*.json` file in the prompts directory declares one prompt whose id
//! is the file stem:
//!
//! ```json
//! {
//!   "title": "Code review",
//!   "description": "Ask for a focused review",
//!   "template": "Review this {{language}} code for {{focus}}:\n{{code}}",
//!   "parameters": [
//!     {"name": "language", "required": true},
//!     {"name": "focus", "default": "correctness"},
//!     {"name": "code", "required": true}
//!   ],
//!   "tags": ["code"]
//! }
//! ```
//!
//! Arguments are checked with the same rules as tool arguments, but flat:
//! parameters are scalars or arrays, never nested objects.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{Schema, SchemaError, SchemaType, ValidationError};

/// Errors raised by the prompt registry.
#[derive(Debug, Error)]
pub enum PromptError {
    /// No prompt with this id is published.
    #[error("prompt not found: {0}")]
    NotFound(String),

    /// Arguments failed validation.
    #[error("invalid arguments for prompt '{prompt}': {source}")]
    InvalidArguments {
        /// Prompt id.
        prompt: String,
        /// Field-level detail.
        #[source]
        source: ValidationError,
    },

    /// The template references a slot with no argument and no default.
    #[error("prompt '{prompt}' has unresolved slot '{slot}'")]
    Template {
        /// Prompt id.
        prompt: String,
        /// Slot name.
        slot: String,
    },

    /// A prompt declaration is invalid.
    #[error("invalid prompt '{id}': {message}")]
    Definition {
        /// Prompt id.
        id: String,
        /// What went wrong.
        message: String,
    },

    /// A prompt file could not be read or parsed.
    #[error("invalid prompt file {path}: {message}")]
    Load {
        /// Prompt file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
}

/// One declared prompt parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptParameter {
    /// Slot name.
    pub name: String,
    /// Value type (default `string`).
    #[serde(rename = "type", default = "default_parameter_type")]
    pub kind: SchemaType,
    /// Whether the caller must supply it.
    #[serde(default)]
    pub required: bool,
    /// Value used when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Description.
    #[serde(default)]
    pub description: String,
}

const fn default_parameter_type() -> SchemaType {
    SchemaType::String
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PromptFile {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: String,
    template: String,
    #[serde(default)]
    parameters: Vec<PromptParameter>,
    #[serde(default)]
    tags: Vec<String>,
}

/// A published prompt.
#[derive(Debug, Clone)]
pub struct PromptDefinition {
    id: String,
    title: String,
    description: String,
    template: String,
    parameters: Vec<PromptParameter>,
    tags: Vec<String>,
    schema: Schema,
}

impl PromptDefinition {
    /// Creates a prompt, checking its parameter declarations.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Definition`] for duplicate or nested
    /// parameters and defaults that do not match their type.
    pub fn new(
        id: impl Into<String>,
        template: impl Into<String>,
        parameters: Vec<PromptParameter>,
    ) -> Result<Self, PromptError> {
        let id = id.into();
        let schema = parameter_schema(&parameters).map_err(|message| PromptError::Definition {
            id: id.clone(),
            message,
        })?;
        Ok(Self {
            title: id.clone(),
            id,
            description: String::new(),
            template: template.into(),
            parameters,
            tags: Vec::new(),
            schema,
        })
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Prompt id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Template body.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Declared parameters, in order.
    #[must_use]
    pub fn parameters(&self) -> &[PromptParameter] {
        &self.parameters
    }

    /// Listing view.
    #[must_use]
    pub fn summary(&self) -> PromptSummary {
        PromptSummary {
            id: self.id.clone(),
            name: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            arguments: self.parameters.clone(),
            tags: self.tags.clone(),
        }
    }

    fn render(&self, arguments: &Value) -> Result<String, PromptError> {
        let values = match self.schema.validate(arguments) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(source) => {
                return Err(PromptError::InvalidArguments {
                    prompt: self.id.clone(),
                    source,
                })
            }
        };

        let mut unresolved = None;
        let rendered = slot_pattern().replace_all(&self.template, |caps: &Captures<'_>| {
            let name = &caps[1];
            values.get(name).map_or_else(
                || {
                    unresolved.get_or_insert_with(|| name.to_string());
                    String::new()
                },
                slot_text,
            )
        });

        match unresolved {
            Some(slot) => Err(PromptError::Template {
                prompt: self.id.clone(),
                slot,
            }),
            None => Ok(rendered.into_owned()),
        }
    }
}

fn parameter_schema(parameters: &[PromptParameter]) -> Result<Schema, String> {
    let mut properties = IndexMap::with_capacity(parameters.len());
    let mut required = Vec::new();

    for parameter in parameters {
        if parameter.kind == SchemaType::Object {
            return Err(format!("parameter '{}' cannot be an object", parameter.name));
        }
        let mut node = Schema::new(parameter.kind);
        if !parameter.description.is_empty() {
            node = node.with_description(parameter.description.clone());
        }
        if let Some(default) = &parameter.default {
            node = node.with_default(default.clone());
        }
        if properties.insert(parameter.name.clone(), node).is_some() {
            return Err(format!("duplicate parameter '{}'", parameter.name));
        }
        if parameter.required {
            required.push(parameter.name.clone());
        }
    }

    Schema::object(properties, required).map_err(|e: SchemaError| e.to_string())
}

fn slot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("slot pattern is valid"))
}

fn slot_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(slot_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// A prompt as returned by `prompts/list`.
#[derive(Debug, Clone, Serialize)]
pub struct PromptSummary {
    /// Prompt id.
    pub id: String,
    /// Same as `id`, for clients that expect `name`.
    pub name: String,
    /// Display title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Declared parameters.
    pub arguments: Vec<PromptParameter>,
    /// Tags.
    pub tags: Vec<String>,
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedPrompt {
    /// Prompt id.
    pub id: String,
    /// Rendered text.
    pub content: String,
    /// Prompt description.
    pub description: String,
}

/// Immutable snapshot of published prompts, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    prompts: IndexMap<String, PromptDefinition>,
}

impl PromptRegistry {
    /// Builds a snapshot from definitions.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::Definition`] if two prompts share an id.
    pub fn build(definitions: Vec<PromptDefinition>) -> Result<Self, PromptError> {
        let mut prompts = IndexMap::with_capacity(definitions.len());
        for definition in definitions {
            if prompts.contains_key(&definition.id) {
                return Err(PromptError::Definition {
                    message: "duplicate prompt id".to_string(),
                    id: definition.id,
                });
            }
            prompts.insert(definition.id.clone(), definition);
        }
        Ok(Self { prompts })
    }

    /// Loads every `*.json` prompt in `dir`. A missing directory yields an
    /// empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if any file is unreadable or declares an invalid
    /// prompt; nothing is loaded in that case.
    pub fn load_dir(dir: &Path) -> Result<Self, PromptError> {
        if !dir.is_dir() {
            tracing::warn!(path = %dir.display(), "Prompts directory not found");
            return Ok(Self::default());
        }

        let pattern = dir.join("*.json");
        let load_error = |path: &Path, message: String| PromptError::Load {
            path: path.to_path_buf(),
            message,
        };
        let pattern = pattern
            .to_str()
            .ok_or_else(|| load_error(dir, "directory path is not valid UTF-8".to_string()))?;
        let mut paths: Vec<PathBuf> = glob::glob(pattern)
            .map_err(|e| load_error(dir, e.to_string()))?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            let text =
                std::fs::read_to_string(&path).map_err(|e| load_error(&path, e.to_string()))?;
            let file: PromptFile =
                serde_json::from_str(&text).map_err(|e| load_error(&path, e.to_string()))?;

            let mut definition = PromptDefinition::new(id, file.template, file.parameters)?
                .with_description(file.description)
                .with_tags(file.tags);
            if let Some(title) = file.title {
                definition = definition.with_title(title);
            }
            definitions.push(definition);
        }

        let registry = Self::build(definitions)?;
        tracing::info!(count = registry.len(), "Loaded prompts");
        Ok(registry)
    }

    /// Lists published prompts.
    #[must_use]
    pub fn list(&self) -> Vec<PromptSummary> {
        self.prompts.values().map(PromptDefinition::summary).collect()
    }

    /// Looks up a prompt by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PromptDefinition> {
        self.prompts.get(id)
    }

    /// Number of prompts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    /// Returns `true` if nothing is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Validates `arguments` and renders the prompt.
    ///
    /// # Errors
    ///
    /// - [`PromptError::NotFound`] for an unknown id
    /// - [`PromptError::InvalidArguments`] if validation fails
    /// - [`PromptError::Template`] if a slot has no value
    pub fn render(&self, id: &str, arguments: &Value) -> Result<RenderedPrompt, PromptError> {
        let prompt = self
            .get(id)
            .ok_or_else(|| PromptError::NotFound(id.to_string()))?;
        let content = prompt.render(arguments)?;
        Ok(RenderedPrompt {
            id: prompt.id.clone(),
            content,
            description: prompt.description.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param(name: &str, required: bool, default: Option<Value>) -> PromptParameter {
        PromptParameter {
            name: name.to_string(),
            kind: SchemaType::String,
            required,
            default,
            description: String::new(),
        }
    }

    fn registry() -> PromptRegistry {
        let review = PromptDefinition::new(
            "review",
            "Review {{ language }} code for {{focus}}:\n{{code}}",
            vec![
                param("language", true, None),
                param("focus", false, Some(json!("correctness"))),
                param("code", true, None),
            ],
        )
        .unwrap()
        .with_description("Code review");
        let broken = PromptDefinition::new("broken", "Hello {{name}} from {{place}}", vec![param("name", true, None)])
            .unwrap();
        PromptRegistry::build(vec![review, broken]).unwrap()
    }

    #[test]
    fn renders_with_defaults() {
        let rendered = registry()
            .render("review", &json!({"language": "Rust", "code": "fn main() {}"}))
            .unwrap();
        assert_eq!(rendered.content, "Review Rust code for correctness:\nfn main() {}");
        assert_eq!(rendered.description, "Code review");
    }

    #[test]
    fn missing_required_argument() {
        let err = registry().render("review", &json!({"language": "Rust"})).unwrap_err();
        match err {
            PromptError::InvalidArguments { source, .. } => assert_eq!(source.field, "code"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unresolved_slot_is_template_error() {
        let err = registry().render("broken", &json!({"name": "Ada"})).unwrap_err();
        assert!(matches!(err, PromptError::Template { slot, .. } if slot == "place"));
    }

    #[test]
    fn unknown_prompt() {
        assert!(matches!(
            registry().render("nope", &Value::Null),
            Err(PromptError::NotFound(_))
        ));
    }

    #[test]
    fn non_string_values_are_stringified() {
        let prompt = PromptDefinition::new(
            "mix",
            "{{n}} {{flag}} [{{items}}]",
            vec![
                PromptParameter { kind: SchemaType::Integer, ..param("n", true, None) },
                PromptParameter { kind: SchemaType::Boolean, ..param("flag", false, Some(json!(false))) },
                PromptParameter { kind: SchemaType::Array, ..param("items", false, Some(json!([]))) },
            ],
        )
        .unwrap();
        let registry = PromptRegistry::build(vec![prompt]).unwrap();
        let rendered = registry
            .render("mix", &json!({"n": 3, "items": ["a", "b"]}))
            .unwrap();
        assert_eq!(rendered.content, "3 false [a, b]");
    }

    #[test]
    fn rejects_bad_declarations() {
        assert!(PromptDefinition::new("d", "", vec![param("x", false, None), param("x", false, None)]).is_err());
        assert!(PromptDefinition::new(
            "o",
            "",
            vec![PromptParameter { kind: SchemaType::Object, ..param("x", false, None) }]
        )
        .is_err());
        assert!(PromptDefinition::new(
            "t",
            "",
            vec![PromptParameter { kind: SchemaType::Integer, ..param("x", false, Some(json!("nope"))) }]
        )
        .is_err());
    }

    #[test]
    fn loads_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("greet.json"),
            json!({
                "title": "Greeting",
                "template": "Hi {{who}}",
                "parameters": [{"name": "who", "default": "there"}]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = PromptRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].title, "Greeting");
        assert_eq!(registry.render("greet", &json!({})).unwrap().content, "Hi there");
    }

    #[test]
    fn invalid_file_fails_whole_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), json!({"template": "ok"}).to_string()).unwrap();
        std::fs::write(dir.path().join("b.json"), "{").unwrap();
        assert!(matches!(
            PromptRegistry::load_dir(dir.path()),
            Err(PromptError::Load { .. })
        ));
    }
}
