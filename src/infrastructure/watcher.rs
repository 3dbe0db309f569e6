// File system watching for rebuilds
// Monitors source changes and debounces bursts of events into one signal

use crate::utils::{LibpackError, Logger, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Debounced recursive watcher over a set of paths
pub struct FsWatcher {
    // Dropping the watcher stops event delivery
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<Event>,
    filter: WatchFilter,
    debounce: Duration,
}

impl FsWatcher {
    /// Watch `paths` recursively, skipping anything under `ignored`
    pub fn new(paths: &[PathBuf], ignored: &[PathBuf], debounce: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| LibpackError::Watch(format!("Failed to create watcher: {}", e)))?;

        for path in paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(|e| LibpackError::Watch(format!("Failed to watch {}: {}", path.display(), e)))?;
            } else {
                Logger::warn(&format!("Watch path {} does not exist", path.display()));
            }
        }

        Ok(Self {
            _watcher: watcher,
            events: rx,
            filter: WatchFilter::new(paths, ignored),
            debounce,
        })
    }

    /// Wait for the next relevant change, then absorb the burst that follows it
    ///
    /// Returns `None` once the underlying watcher has shut down.
    pub async fn next_change(&mut self) -> Option<Vec<PathBuf>> {
        let mut changed = HashSet::new();

        while changed.is_empty() {
            let event = self.events.recv().await?;
            self.filter.collect(&event, &mut changed);
        }

        loop {
            match tokio::time::timeout(self.debounce, self.events.recv()).await {
                Ok(Some(event)) => self.filter.collect(&event, &mut changed),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let mut changed: Vec<PathBuf> = changed.into_iter().collect();
        changed.sort();
        for path in &changed {
            Logger::debug(&format!("Changed: {}", path.display()));
        }
        Some(changed)
    }
}

/// Decides which events count as source changes
#[derive(Debug, Clone, Default)]
pub struct WatchFilter {
    roots: Vec<PathBuf>,
    ignored: Vec<PathBuf>,
}

impl WatchFilter {
    pub fn new(roots: &[PathBuf], ignored: &[PathBuf]) -> Self {
        Self {
            roots: with_resolved(roots),
            ignored: with_resolved(ignored),
        }
    }

    fn collect(&self, event: &Event, changed: &mut HashSet<PathBuf>) {
        if self.ignores(event) {
            return;
        }
        changed.extend(event.paths.iter().filter(|path| is_source_file(path)).cloned());
    }

    /// Metadata-only changes, build output and editor or VCS noise never trigger a rebuild
    pub fn ignores(&self, event: &Event) -> bool {
        match &event.kind {
            EventKind::Access(_) | EventKind::Other => true,
            _ => event.paths.iter().any(|path| self.ignores_path(path)),
        }
    }

    fn ignores_path(&self, path: &Path) -> bool {
        if self.ignored.iter().any(|ignored| path.starts_with(ignored)) {
            return true;
        }

        // Directory names only count below the watched root
        let relative = self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        let noisy_dir = relative.components().any(|component| {
            matches!(
                component.as_os_str().to_str(),
                Some(".git" | "node_modules" | "dist")
            )
        });

        let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
        noisy_dir || file_name.ends_with('~') || file_name.ends_with(".swp") || file_name.contains(".tmp")
    }
}

/// Each path as given plus its canonical form, since events report resolved paths
fn with_resolved(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut all = Vec::with_capacity(paths.len() * 2);
    for path in paths {
        all.push(path.clone());
        let resolved = resolve(path);
        if &resolved != path {
            all.push(resolved);
        }
    }
    all
}

/// Canonicalize the longest existing prefix; output dirs may not exist yet
fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => resolve(parent).join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

pub fn is_source_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "css" | "json")
    )
}
