//! Extension points run when items land in rivers and when rivers are built.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::app::{Result, RiverbedError};
use crate::domain::{RiverItem, ServerStats};
use crate::normalizer::ParsedItem;

/// Bundle handed to item-added hooks.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemAddedContext<'a> {
    pub urlfeed: &'a str,
    pub item_from_parser: &'a ParsedItem,
    pub item_from_river: &'a RiverItem,
}

/// Bundle handed to river-built hooks.
#[derive(Debug, Serialize)]
pub struct RiverBuiltContext<'a> {
    pub fname: &'a str,
    pub jsontext: &'a str,
}

pub trait RiverHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_item_added(&self, _ctx: &ItemAddedContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_river_built(&self, _ctx: &RiverBuiltContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Hooks in registration order. A failing hook is logged and the rest still run.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn RiverHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn RiverHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn item_added(&self, ctx: &ItemAddedContext<'_>) {
        for hook in &self.hooks {
            if let Err(e) = hook.on_item_added(ctx) {
                warn!(hook = hook.name(), feed = ctx.urlfeed, "Item-added hook failed: {}", e);
            }
        }
    }

    pub fn river_built(&self, ctx: &RiverBuiltContext<'_>) {
        for hook in &self.hooks {
            if let Err(e) = hook.on_river_built(ctx) {
                warn!(hook = hook.name(), river = ctx.fname, "River-built hook failed: {}", e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    ItemAdded,
    RiverBuilt,
}

/// Runs every executable in a folder with the JSON context on stdin.
///
/// Scripts run in the background; their failures are logged when they exit.
pub struct ScriptFolderHook {
    name: String,
    folder: PathBuf,
    event: HookEvent,
}

impl ScriptFolderHook {
    pub fn new(folder: impl Into<PathBuf>, event: HookEvent) -> Self {
        let folder = folder.into();
        Self {
            name: format!("scripts:{}", folder.display()),
            folder,
            event,
        }
    }

    fn dispatch<T: Serialize>(&self, ctx: &T) -> Result<()> {
        let scripts = executables(&self.folder)?;
        if scripts.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_string(ctx)?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| RiverbedError::Other(format!("no runtime for hook scripts: {}", e)))?;

        for script in scripts {
            let payload = payload.clone();
            handle.spawn(async move {
                match run_script(&script, &payload).await {
                    Ok(()) => debug!(script = %script.display(), "Hook script finished"),
                    Err(e) => warn!(script = %script.display(), "Hook script failed: {}", e),
                }
            });
        }
        Ok(())
    }
}

impl RiverHook for ScriptFolderHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_item_added(&self, ctx: &ItemAddedContext<'_>) -> Result<()> {
        if self.event == HookEvent::ItemAdded {
            self.dispatch(ctx)?;
        }
        Ok(())
    }

    fn on_river_built(&self, ctx: &RiverBuiltContext<'_>) -> Result<()> {
        if self.event == HookEvent::RiverBuilt {
            self.dispatch(ctx)?;
        }
        Ok(())
    }
}

/// Executable files in `folder`, sorted by name. A missing folder has none.
pub fn executables(folder: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut scripts = Vec::new();
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() && is_executable(&metadata) {
            scripts.push(entry.path());
        }
    }
    scripts.sort();
    Ok(scripts)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

async fn run_script(script: &Path, payload: &str) -> Result<()> {
    let mut child = Command::new(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(payload.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(RiverbedError::Other(format!(
            "exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

/// Calls out to whatever embeds the aggregator. All methods default to no-ops.
pub trait HostCallbacks: Send + Sync {
    fn item_added(&self, _item: &RiverItem) {}
    fn river_built(&self, _fname: &str, _jsontext: &str) {}
    fn console_log(&self, _message: &str) {}
    fn stats_changed(&self, _stats: &ServerStats) {}
    fn notify_listeners(&self, _event: &str) {}
}

pub struct NoHostCallbacks;

impl HostCallbacks for NoHostCallbacks {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl RiverHook for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_river_built(&self, ctx: &RiverBuiltContext<'_>) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, ctx.fname));
            if self.fail {
                Err(RiverbedError::Other("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_hooks_run_in_order_despite_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        for (name, fail) in [("first", true), ("second", false)] {
            registry.register(Box::new(Recorder {
                name: name.into(),
                log: log.clone(),
                fail,
            }));
        }

        registry.river_built(&RiverBuiltContext {
            fname: "news.js",
            jsontext: "{}",
        });

        assert_eq!(*log.lock().unwrap(), vec!["first:news.js", "second:news.js"]);
    }

    #[test]
    fn test_item_added_context_shape() {
        let parsed = ParsedItem {
            title: Some("Hello".into()),
            ..Default::default()
        };
        let river = RiverItem {
            title: "Hello".into(),
            id: 3,
            ..Default::default()
        };
        let ctx = ItemAddedContext {
            urlfeed: "http://example.com/rss.xml",
            item_from_parser: &parsed,
            item_from_river: &river,
        };

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["urlfeed"], "http://example.com/rss.xml");
        assert_eq!(json["itemFromParser"]["title"], "Hello");
        assert_eq!(json["itemFromRiver"]["id"], 3);
    }

    #[test]
    fn test_missing_folder_has_no_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = executables(&dir.path().join("absent")).unwrap();
        assert!(scripts.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_only_executables_are_listed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("b.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.path().join("a.txt"), "notes").unwrap();

        assert_eq!(executables(dir.path()).unwrap(), vec![script]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_script_reports_exit_status() {
        assert!(run_script(Path::new("/bin/cat"), "{}").await.is_ok());
        assert!(run_script(Path::new("/bin/false"), "{}").await.is_err());
    }
}
