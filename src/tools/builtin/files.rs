//! Read-only file tools confined to the resources sandbox.
//!
//! Every path a tool touches, including each entry found while listing or
//! searching, is re-resolved through [`Sandbox::resolve`], so symlinks that
//! point outside the root are skipped rather than followed.

use std::borrow::Cow;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde_json::{json, Value};

use super::dates::iso_timestamp;
use super::{optional_str, string_arg, Args, DEFAULT_READ_SIZE, MAX_READ_SIZE};
use crate::resources::sandbox::Sandbox;
use crate::tools::{ToolContext, ToolError};

fn resolve(sandbox: &Sandbox, relative: &str) -> Result<PathBuf, ToolError> {
    sandbox
        .resolve(relative)
        .map_err(|e| ToolError::new(e.to_string()))
}

/// `1536` as `1.5 KB`, stopping at gigabytes.
#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

fn timestamp(time: io::Result<SystemTime>) -> Value {
    time.map_or(Value::Null, |time| {
        Value::String(iso_timestamp(DateTime::<Local>::from(time).naive_local()))
    })
}

/// Lower-cased extension filter from `file_types`; `None` keeps everything.
fn extension_filter(args: &Args) -> Option<Vec<String>> {
    let filter: Vec<String> = args
        .get("file_types")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_lowercase)
        .collect();
    (!filter.is_empty()).then_some(filter)
}

/// `.txt` for `notes.txt`, empty for `Makefile` and `.hidden`.
fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or_else(String::new, |ext| format!(".{ext}"))
}

fn keeps(filter: Option<&[String]>, name: &str) -> bool {
    filter.map_or(true, |filter| {
        filter.contains(&extension(name).to_lowercase())
    })
}

fn fold(text: &str, case_sensitive: bool) -> Cow<'_, str> {
    if case_sensitive {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.to_lowercase())
    }
}

fn metadata(path: &Path, shown: &str) -> Result<Metadata, ToolError> {
    fs::metadata(path).map_err(|e| ToolError::new(format!("Error reading {shown}: {e}")))
}

pub(super) fn file_reader(context: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let file_path = string_arg(args, "file_path")?;
    let encoding = optional_str(args, "encoding").unwrap_or("utf-8");
    let max_size = args
        .get("max_size")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_READ_SIZE);

    let path = resolve(context.sandbox()?, file_path)?;
    if !path.is_file() {
        return Err(ToolError::new(format!("File not found: {file_path}")));
    }

    let size = metadata(&path, file_path)?.len();
    if size > max_size {
        return Err(ToolError::new(format!(
            "File too large: {size} bytes (max: {max_size} bytes)"
        )));
    }

    let bytes = fs::read(&path)
        .map_err(|e| ToolError::new(format!("Error reading file {file_path}: {e}")))?;
    let text = match encoding {
        "ascii" if bytes.is_ascii() => bytes.iter().map(|&b| char::from(b)).collect(),
        "ascii" => {
            return Err(ToolError::new(format!(
                "Encoding error reading {file_path}: not ASCII"
            )))
        }
        "latin-1" => bytes.iter().map(|&b| char::from(b)).collect(),
        _ => String::from_utf8(bytes)
            .map_err(|e| ToolError::new(format!("Encoding error reading {file_path}: {e}")))?,
    };
    Ok(Value::String(text))
}

pub(super) fn file_info(context: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let file_path = string_arg(args, "file_path")?;
    let path = resolve(context.sandbox()?, file_path)?;
    let metadata = metadata(&path, file_path)?;

    Ok(json!({
        "path": file_path,
        "size": metadata.len(),
        "size_human": human_size(metadata.len()),
        "is_file": metadata.is_file(),
        "is_directory": metadata.is_dir(),
        "created": timestamp(metadata.created()),
        "modified": timestamp(metadata.modified()),
        "accessed": timestamp(metadata.accessed()),
        "readonly": metadata.permissions().readonly(),
    }))
}

pub(super) fn list_files(context: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let directory = optional_str(args, "directory").unwrap_or("");
    let include_hidden = args
        .get("include_hidden")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let filter = extension_filter(args);

    let sandbox = context.sandbox()?;
    let path = resolve(sandbox, directory)?;
    if !path.is_dir() {
        return Err(ToolError::new(format!("Directory not found: {directory}")));
    }
    let entries = fs::read_dir(&path)
        .map_err(|e| ToolError::new(format!("Error listing directory {directory}: {e}")))?;

    let mut files = Vec::new();
    let mut directories = Vec::new();
    for entry in entries.filter_map(Result::ok) {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !include_hidden && name.starts_with('.') {
            continue;
        }
        let relative = match directory.trim_end_matches('/') {
            "" => name.clone(),
            parent => format!("{parent}/{name}"),
        };
        let Ok(metadata) = resolve(sandbox, &relative).and_then(|p| metadata(&p, &relative)) else {
            continue;
        };

        if metadata.is_file() {
            if !keeps(filter.as_deref(), &name) {
                continue;
            }
            let item = json!({
                "name": name,
                "path": relative,
                "size": metadata.len(),
                "size_human": human_size(metadata.len()),
                "modified": timestamp(metadata.modified()),
                "extension": extension(&name),
            });
            files.push((name, item));
        } else if metadata.is_dir() {
            directories.push((name.clone(), json!({"name": name, "path": relative})));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    directories.sort_by(|a, b| a.0.cmp(&b.0));

    let shown = if directory.is_empty() { "." } else { directory };
    Ok(json!({
        "directory": shown,
        "total_files": files.len(),
        "total_directories": directories.len(),
        "files": files.into_iter().map(|(_, item)| item).collect::<Vec<_>>(),
        "directories": directories.into_iter().map(|(_, item)| item).collect::<Vec<_>>(),
    }))
}

pub(super) fn search_files(context: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let query = string_arg(args, "query")?;
    let search_type = optional_str(args, "search_type").unwrap_or("filename");
    let case_sensitive = args
        .get("case_sensitive")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let filter = extension_filter(args);
    let by_name = matches!(search_type, "filename" | "both");
    let by_content = matches!(search_type, "content" | "both");
    let needle = fold(query, case_sensitive);

    let sandbox = context.sandbox()?;
    let root = sandbox.root();
    let root_text = root
        .to_str()
        .ok_or_else(|| ToolError::new("resources directory path is not valid UTF-8"))?;
    let pattern = format!("{}/**/*", glob::Pattern::escape(root_text));
    let walk = glob::glob(&pattern)
        .map_err(|e| ToolError::new(format!("Error searching files: {e}")))?;

    let mut matches = Vec::new();
    for path in walk.filter_map(Result::ok) {
        let Some(relative) = path.strip_prefix(root).ok().and_then(Path::to_str) else {
            continue;
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(resolved) = sandbox.resolve(relative) else {
            continue;
        };
        let Ok(metadata) = fs::metadata(&resolved) else {
            continue;
        };
        if !metadata.is_file() || !keeps(filter.as_deref(), name) {
            continue;
        }

        let mut match_type = Vec::new();
        if by_name && fold(name, case_sensitive).contains(needle.as_ref()) {
            match_type.push("filename");
        }
        if by_content && metadata.len() <= MAX_READ_SIZE {
            if let Ok(bytes) = fs::read(&resolved) {
                let text = String::from_utf8_lossy(&bytes);
                if fold(&text, case_sensitive).contains(needle.as_ref()) {
                    match_type.push("content");
                }
            }
        }
        if !match_type.is_empty() {
            matches.push(json!({
                "file": relative,
                "match_type": match_type,
                "size": metadata.len(),
            }));
        }
    }

    Ok(json!({
        "query": query,
        "search_type": search_type,
        "case_sensitive": case_sensitive,
        "total_matches": matches.len(),
        "matches": matches,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::registry;
    use crate::tools::InvokeError;
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        context: ToolContext,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            fs::write(root.join("note.txt"), "inside").unwrap();
            fs::write(root.join("Readme.MD"), "Hello World").unwrap();
            fs::write(root.join(".hidden"), "secret").unwrap();
            fs::create_dir(root.join("data")).unwrap();
            fs::write(root.join("data/config.json"), r#"{"greeting": "hello"}"#).unwrap();
            fs::write(root.join("data/blob.bin"), vec![0_u8; 2048]).unwrap();
            let context = ToolContext::new(Arc::new(Sandbox::new(root).unwrap()));
            Self { _dir: dir, context }
        }

        fn call(&self, name: &str, arguments: Value) -> Result<Value, InvokeError> {
            registry().unwrap().invoke(&self.context, name, &arguments)
        }
    }

    #[test]
    fn file_reader_stays_in_sandbox() {
        let fixture = Fixture::new();
        let content = fixture
            .call("file_reader", json!({"file_path": "note.txt"}))
            .unwrap();
        assert_eq!(content, json!("inside"));

        let err = fixture
            .call("file_reader", json!({"file_path": "../../etc/passwd"}))
            .unwrap_err();
        assert!(matches!(err, InvokeError::Execution { .. }));

        let err = fixture
            .call("file_reader", json!({"file_path": "note.txt", "max_size": 2}))
            .unwrap_err();
        assert!(err.to_string().contains("File too large"));
    }

    #[test]
    fn file_info_reports_size_and_kind() {
        let fixture = Fixture::new();
        let info = fixture
            .call("file_info", json!({"file_path": "data/blob.bin"}))
            .unwrap();
        assert_eq!(info["size"], 2048);
        assert_eq!(info["size_human"], "2.0 KB");
        assert_eq!(info["is_file"], true);
        assert!(info["modified"].is_string());

        let dir = fixture.call("file_info", json!({"file_path": "data"})).unwrap();
        assert_eq!(dir["is_directory"], true);

        assert!(fixture.call("file_info", json!({"file_path": "missing.txt"})).is_err());
        assert!(fixture.call("file_info", json!({"file_path": "../x"})).is_err());
    }

    #[test]
    fn list_files_sorts_and_filters() {
        let fixture = Fixture::new();
        let root = fixture.call("list_files", json!({})).unwrap();
        assert_eq!(root["directory"], ".");
        let names: Vec<_> = root["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["Readme.MD", "note.txt"]);
        assert_eq!(root["directories"], json!([{"name": "data", "path": "data"}]));

        let hidden = fixture
            .call("list_files", json!({"include_hidden": true}))
            .unwrap();
        assert_eq!(hidden["total_files"], 3);

        let json_only = fixture
            .call("list_files", json!({"directory": "data", "file_types": [".JSON"]}))
            .unwrap();
        assert_eq!(json_only["total_files"], 1);
        assert_eq!(json_only["files"][0]["path"], "data/config.json");
        assert_eq!(json_only["files"][0]["extension"], ".json");

        assert!(fixture.call("list_files", json!({"directory": "note.txt"})).is_err());
        assert!(fixture.call("list_files", json!({"directory": ".."})).is_err());
    }

    #[test]
    fn search_files_by_name_and_content() {
        let fixture = Fixture::new();
        let by_name = fixture.call("search_files", json!({"query": "CONFIG"})).unwrap();
        assert_eq!(by_name["total_matches"], 1);
        assert_eq!(by_name["matches"][0]["file"], "data/config.json");
        assert_eq!(by_name["matches"][0]["match_type"], json!(["filename"]));

        let by_content = fixture
            .call("search_files", json!({"query": "hello", "search_type": "content"}))
            .unwrap();
        let files: Vec<_> = by_content["matches"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["file"].as_str().unwrap())
            .collect();
        assert_eq!(files, ["Readme.MD", "data/config.json"]);

        let exact = fixture
            .call(
                "search_files",
                json!({"query": "hello", "search_type": "both", "case_sensitive": true, "file_types": [".md"]}),
            )
            .unwrap();
        assert_eq!(exact["total_matches"], 0);
    }

    #[cfg(unix)]
    #[test]
    fn listing_and_search_skip_symlinks_out_of_the_sandbox() {
        let fixture = Fixture::new();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("leak.txt"), "hello").unwrap();
        let root = fixture.context.sandbox().unwrap().root().to_path_buf();
        std::os::unix::fs::symlink(outside.path().join("leak.txt"), root.join("leak.txt")).unwrap();

        let listing = fixture.call("list_files", json!({})).unwrap();
        assert_eq!(listing["total_files"], 2);

        let search = fixture
            .call("search_files", json!({"query": "leak", "search_type": "both"}))
            .unwrap();
        assert_eq!(search["total_matches"], 0);
    }

    #[test]
    fn human_sizes() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(512), "512.0 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(5 * 1024 * 1024 * 1024 * 1024), "5120.0 GB");
    }
}
