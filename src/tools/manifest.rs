//! Directory-backed tool declarations.
//!
//! Every `*.json` file in the tools directory holds either one declaration
//! or an array of them:
//!
//! ```json
//! {
//!   "name": "add_numbers",
//!   "handler": "calculator",
//!   "description": "Arithmetic with a friendlier name",
//!   "category": "math",
//!   "parameters": { "type": "object", "properties": { ... } }
//! }
//! ```
//!
//! `handler` names an entry in the built-in handler table. Files are read in
//! file-name order, and any bad declaration fails the whole directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::{HandlerTable, RegistryError, ToolBuilder, ToolRegistry};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolManifest {
    name: String,
    handler: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "default_parameters")]
    parameters: Value,
}

fn default_parameters() -> Value {
    serde_json::json!({"type": "object"})
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Many(Vec<ToolManifest>),
    One(ToolManifest),
}

/// Lists the manifest files in `dir`, sorted by file name.
///
/// # Errors
///
/// Returns an error if the directory path cannot be expressed as a glob.
pub fn manifest_paths(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let pattern = dir.join("*.json");
    let pattern = pattern.to_str().ok_or_else(|| RegistryError::Manifest {
        path: dir.to_path_buf(),
        message: "directory path is not valid UTF-8".to_string(),
    })?;
    let entries = glob::glob(pattern).map_err(|e| RegistryError::Manifest {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .filter(|p| {
            !p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Builds a tool snapshot from every manifest in `dir`.
///
/// # Errors
///
/// Returns an error if a file cannot be read or parsed, references an
/// unknown handler, declares a malformed schema, or reuses a tool name.
pub fn load_dir(dir: &Path, handlers: &HandlerTable) -> Result<ToolRegistry, RegistryError> {
    let mut definitions = Vec::new();

    for path in manifest_paths(dir)? {
        let text = std::fs::read_to_string(&path).map_err(|e| RegistryError::Manifest {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let parsed: ManifestFile =
            serde_json::from_str(&text).map_err(|e| RegistryError::Manifest {
                path: path.clone(),
                message: e.to_string(),
            })?;
        let manifests = match parsed {
            ManifestFile::Many(list) => list,
            ManifestFile::One(single) => vec![single],
        };

        for manifest in manifests {
            let handler = handlers.get(manifest.handler.as_str()).cloned().ok_or_else(|| {
                RegistryError::UnknownHandler {
                    tool: manifest.name.clone(),
                    handler: manifest.handler.clone(),
                }
            })?;
            let mut builder = ToolBuilder::new(manifest.name)
                .description(manifest.description)
                .parameters(manifest.parameters)
                .shared_handler(handler);
            if let Some(category) = manifest.category {
                builder = builder.category(category);
            }
            definitions.push(builder.build()?);
        }
        tracing::debug!(path = %path.display(), "Loaded tool manifest");
    }

    ToolRegistry::build(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin;
    use crate::tools::ToolContext;
    use serde_json::json;

    fn write(dir: &Path, name: &str, value: &Value) {
        std::fs::write(dir.join(name), serde_json::to_vec_pretty(value).unwrap()).unwrap();
    }

    #[test]
    fn loads_single_and_array_manifests_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "b.json",
            &json!([
                {"name": "shout", "handler": "text_processor", "description": "Uppercase text",
                 "parameters": {"type": "object", "properties": {
                     "text": {"type": "string"},
                     "operation": {"type": "string", "default": "uppercase"}
                 }, "required": ["text"]}}
            ]),
        );
        write(
            dir.path(),
            "a.json",
            &json!({"name": "sum", "handler": "calculator", "category": "math",
                    "parameters": {"type": "object", "properties": {
                        "operation": {"type": "string", "default": "add"},
                        "a": {"type": "number"},
                        "b": {"type": "number"}
                    }, "required": ["a", "b"]}}),
        );
        std::fs::write(dir.path().join(".hidden.json"), "not json").unwrap();

        let registry = load_dir(dir.path(), &builtin::handlers()).unwrap();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, ["sum", "shout"]);

        let context = ToolContext::default();
        assert_eq!(
            registry.invoke(&context, "sum", &json!({"a": 2, "b": 3})).unwrap(),
            json!(5)
        );
        assert_eq!(
            registry.invoke(&context, "shout", &json!({"text": "hey"})).unwrap(),
            json!("HEY")
        );
    }

    #[test]
    fn duplicate_name_across_files_fails_whole_build() {
        let dir = tempfile::tempdir().unwrap();
        let decl = json!({"name": "dup", "handler": "echo",
                          "parameters": {"type": "object", "properties": {"message": {"type": "string"}}}});
        write(dir.path(), "one.json", &decl);
        write(dir.path(), "two.json", &decl);

        let err = load_dir(dir.path(), &builtin::handlers()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "dup"));
    }

    #[test]
    fn unknown_handler_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x.json", &json!({"name": "x", "handler": "missing"}));
        let err = load_dir(dir.path(), &builtin::handlers()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownHandler { .. }));
    }

    #[test]
    fn malformed_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "x.json",
            &json!({"name": "x", "handler": "echo",
                    "parameters": {"type": "object", "required": ["ghost"]}}),
        );
        let err = load_dir(dir.path(), &builtin::handlers()).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema { .. }));
    }

    #[test]
    fn unparseable_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        let err = load_dir(dir.path(), &builtin::handlers()).unwrap_err();
        assert!(matches!(err, RegistryError::Manifest { .. }));
    }
}
