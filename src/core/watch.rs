// Watch mode: per-target rebuild loops exposed as event streams

use crate::core::context::SharedContext;
use crate::core::models::{BuildOptions, BuildReport, Target};
use crate::core::services::{validate_plugins, BuildExecutor, BuildServices};
use crate::core::targets;
use crate::infrastructure::watcher::FsWatcher;
use crate::utils::{LibpackError, Logger, Result};
use futures::stream::{select_all, SelectAll, Stream};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle of one watched target
#[derive(Debug)]
pub enum WatchEvent {
    /// A rebuild cycle began
    Start { output: PathBuf },
    BundleStart { output: PathBuf },
    BundleEnd {
        output: PathBuf,
        duration: Duration,
        report: BuildReport,
    },
    /// The cycle finished, successfully or not; the session keeps watching
    End { output: PathBuf },
    /// The cycle failed; the session keeps watching
    Error { output: PathBuf, error: LibpackError },
    /// The session cannot continue
    Fatal { output: PathBuf, message: String },
}

impl WatchEvent {
    pub fn code(&self) -> &'static str {
        match self {
            WatchEvent::Start { .. } => "START",
            WatchEvent::BundleStart { .. } => "BUNDLE_START",
            WatchEvent::BundleEnd { .. } => "BUNDLE_END",
            WatchEvent::End { .. } => "END",
            WatchEvent::Error { .. } => "ERROR",
            WatchEvent::Fatal { .. } => "FATAL",
        }
    }

    pub fn output(&self) -> &Path {
        match self {
            WatchEvent::Start { output }
            | WatchEvent::BundleStart { output }
            | WatchEvent::BundleEnd { output, .. }
            | WatchEvent::End { output }
            | WatchEvent::Error { output, .. }
            | WatchEvent::Fatal { output, .. } => output,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Directories or files whose changes trigger a rebuild
    pub paths: Vec<PathBuf>,
    /// Never trigger a rebuild; the output dir and target files are always added
    pub ignore: Vec<PathBuf>,
    pub debounce: Duration,
}

impl WatchOptions {
    /// Watch the directory holding the entry module
    pub fn for_input(input: &Path) -> Self {
        let dir = input
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self {
            paths: vec![dir.to_path_buf()],
            ignore: Vec::new(),
            debounce: Duration::from_millis(100),
        }
    }
}

/// A running watch loop for one target
///
/// Dropping the session (or calling [`WatchSession::close`]) stops the loop
/// and releases its file system watcher. A session cannot be restarted.
pub struct WatchSession {
    events: mpsc::UnboundedReceiver<WatchEvent>,
    driver: JoinHandle<()>,
}

impl WatchSession {
    /// Stop watching and wait for the watcher to be released
    pub async fn close(mut self) {
        self.events.close();
        self.driver.abort();
        let _ = (&mut self.driver).await;
    }
}

impl Stream for WatchSession {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl BuildExecutor {
    /// Start a watch session for `target`; must be called inside a tokio runtime
    pub fn watch(&self, target: Target, options: &WatchOptions) -> Result<WatchSession> {
        // Writing the outputs must not look like a source change
        let mut ignored = options.ignore.clone();
        ignored.push(self.options().outdir.clone());
        ignored.push(target.output.clone());

        let watcher = FsWatcher::new(&options.paths, &ignored, options.debounce)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(self.clone(), target, watcher, tx));

        Ok(WatchSession { events: rx, driver })
    }
}

async fn drive(executor: BuildExecutor, target: Target, mut watcher: FsWatcher, tx: mpsc::UnboundedSender<WatchEvent>) {
    let output = target.output.clone();

    loop {
        if tx.send(WatchEvent::Start { output: output.clone() }).is_err() {
            return;
        }
        let _ = tx.send(WatchEvent::BundleStart { output: output.clone() });

        // Each cycle starts from empty side artifacts
        let context = SharedContext::new();
        let started = Instant::now();
        let event = match executor.build(&target, &context).await {
            Ok(report) => WatchEvent::BundleEnd {
                output: output.clone(),
                duration: started.elapsed(),
                report,
            },
            Err(error) => WatchEvent::Error {
                output: output.clone(),
                error,
            },
        };
        let _ = tx.send(event);
        let _ = tx.send(WatchEvent::End { output: output.clone() });

        tokio::select! {
            change = watcher.next_change() => {
                if change.is_none() {
                    let _ = tx.send(WatchEvent::Fatal {
                        output: output.clone(),
                        message: "file watcher stopped".to_string(),
                    });
                    return;
                }
            }
            _ = tx.closed() => return,
        }
    }
}

/// Watch every target at once, merging their lifecycle events
pub fn run_watch(
    options: Arc<BuildOptions>,
    services: BuildServices,
    watch: &WatchOptions,
) -> Result<SelectAll<WatchSession>> {
    let targets = targets::plan(&options)?;
    validate_plugins(&options, &services.registry)?;

    Logger::info(&format!(
        "👀 Watching {} for {} targets",
        watch
            .paths
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
        targets.len()
    ));

    let executor = BuildExecutor::new(options, services);
    let sessions = targets
        .into_iter()
        .map(|target| executor.watch(target, watch))
        .collect::<Result<Vec<_>>>()?;

    Ok(select_all(sessions))
}
