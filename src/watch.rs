//! Live reload for custom shader files.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use tracing::{error, info, warn};

/// Watches a fragment shader file and reports content changes.
pub struct ShaderWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
    current_source: Option<String>,
}

impl ShaderWatcher {
    /// Create a new shader watcher if a path is provided.
    pub fn new(path: Option<PathBuf>) -> Option<Self> {
        let path = path?;
        let (tx, rx) = channel();

        match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                    warn!("Failed to watch shader file {:?}: {}", path, e);
                    return None;
                }
                info!("Watching shader file {:?} for changes", path);

                let current_source = fs::read_to_string(&path).ok();

                Some(Self {
                    path,
                    _watcher: watcher,
                    rx,
                    current_source,
                })
            }
            Err(e) => {
                warn!("Failed to create shader watcher: {}", e);
                None
            }
        }
    }

    /// Check for changes and return the new source if the content changed.
    pub fn check_for_changes(&mut self) -> Option<String> {
        let mut needs_reload = false;
        while let Ok(res) = self.rx.try_recv() {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                ) {
                    needs_reload = true;
                }
            }
        }

        if needs_reload {
            info!("Shader file changed, reloading...");
            match fs::read_to_string(&self.path) {
                Ok(content) => {
                    if self.current_source.as_deref() != Some(content.as_str()) {
                        self.current_source = Some(content.clone());
                        return Some(content);
                    }
                }
                Err(e) => error!("Failed to read shader file: {}", e),
            }
        }
        None
    }
}
