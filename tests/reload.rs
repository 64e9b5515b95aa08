//! Integration tests for snapshot publication and live reload.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use mcp_learning_server::config::Config;
use mcp_learning_server::reload::{Registries, ReloadEvent, ReloadWatcher, Reloader};

/// Replaces `name` in `dir` via rename so the loader never sees a partial file.
fn replace_file(dir: &Path, name: &str, contents: &str) {
    let staging = dir.join(format!("{name}.tmp"));
    std::fs::write(&staging, contents).unwrap();
    std::fs::rename(&staging, dir.join(name)).unwrap();
}

fn generation(prefix: &str) -> String {
    let tools: Vec<_> = (1..=4)
        .map(|n| {
            json!({
                "name": format!("{prefix}-{n}"),
                "handler": "echo",
                "description": format!("Echo, generation {prefix}"),
                "parameters": {
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }
            })
        })
        .collect();
    serde_json::to_string(&tools).unwrap()
}

fn config_with_tools(root: &Path) -> Config {
    let tools = root.join("tools");
    let resources = root.join("resources");
    std::fs::create_dir_all(&tools).unwrap();
    std::fs::create_dir_all(&resources).unwrap();
    replace_file(&tools, "tools.json", &generation("old"));

    let mut config = Config::default();
    config.resource_dir = resources;
    config.prompts_dir = root.join("prompts");
    config.tools_dir = Some(tools);
    config
}

#[test]
fn tools_list_never_observes_a_mixed_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_tools(dir.path());
    let tools_dir = config.tools_dir.clone().unwrap();
    let registries = Arc::new(Registries::load(&config).unwrap());
    let reloader = Reloader::new(Arc::clone(&registries), &config);
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registries = Arc::clone(&registries);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut observed = 0_usize;
                while !done.load(Ordering::SeqCst) {
                    let names: Vec<String> = registries
                        .tools
                        .load()
                        .list()
                        .into_iter()
                        .map(|t| t.name)
                        .collect();
                    assert_eq!(names.len(), 4, "{names:?}");
                    let prefix = names[0].split('-').next().unwrap().to_string();
                    assert!(
                        names.iter().all(|n| n.starts_with(&format!("{prefix}-"))),
                        "mixed snapshot: {names:?}"
                    );
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for round in 0..40 {
        let prefix = if round % 2 == 0 { "new" } else { "old" };
        replace_file(&tools_dir, "tools.json", &generation(prefix));
        assert_eq!(reloader.reload_tools().unwrap(), 4);
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
}

#[test]
fn invalid_rebuild_keeps_previous_tools() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_tools(dir.path());
    let tools_dir = config.tools_dir.clone().unwrap();
    let registries = Arc::new(Registries::load(&config).unwrap());
    let reloader = Reloader::new(Arc::clone(&registries), &config);

    // The same name declared in two files.
    replace_file(
        &tools_dir,
        "zz-duplicate.json",
        &json!({"name": "old-1", "handler": "echo"}).to_string(),
    );
    assert!(reloader.reload_tools().is_err());

    let names: Vec<String> = registries
        .tools
        .load()
        .list()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, ["old-1", "old-2", "old-3", "old-4"]);
}

#[test]
fn in_flight_snapshot_survives_a_swap() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_tools(dir.path());
    let tools_dir = config.tools_dir.clone().unwrap();
    let registries = Arc::new(Registries::load(&config).unwrap());
    let reloader = Reloader::new(Arc::clone(&registries), &config);

    let held = registries.tools.load();
    replace_file(&tools_dir, "tools.json", &generation("new"));
    reloader.reload_tools().unwrap();

    let result = held
        .invoke(registries.tool_context(), "old-2", &json!({"message": "still here"}))
        .unwrap();
    assert_eq!(result, json!("still here"));
    assert!(registries.tools.load().get("old-2").is_none());
}

#[test]
fn watcher_reloads_prompts_on_change() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with_tools(dir.path());
    let prompts = dir.path().join("prompts");
    std::fs::create_dir_all(&prompts).unwrap();
    config.prompts_dir.clone_from(&prompts);

    let registries = Arc::new(Registries::load(&config).unwrap());
    assert!(registries.prompts.load().is_empty());

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let reloader = Reloader::new(Arc::clone(&registries), &config).with_events(events_tx);
    let mut watcher = ReloadWatcher::start(reloader, Duration::from_millis(50)).unwrap();
    assert!(watcher.is_running());

    replace_file(
        &prompts,
        "summary.json",
        &json!({"template": "Summarise {{text}}", "parameters": [{"name": "text", "required": true}]})
            .to_string(),
    );

    let deadline = Instant::now() + Duration::from_secs(10);
    while registries.prompts.load().is_empty() {
        assert!(Instant::now() < deadline, "prompt reload not observed");
        std::thread::sleep(Duration::from_millis(25));
    }
    assert!(registries.prompts.load().get("summary").is_some());

    watcher.stop();
    assert!(!watcher.is_running());

    let mut events = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&ReloadEvent::Prompts));
}
