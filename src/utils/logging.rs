use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

pub struct Logger;

impl Logger {
    /// Install the global subscriber; `RUST_LOG` wins over the verbosity flag
    pub fn init(verbose: bool) {
        let default = if verbose { "libpack=debug" } else { "libpack=info" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }

    pub fn build_start(input: &Path, outdir: &Path, targets: usize) {
        info!("📦 Bundling {} into {} ({} targets)", input.display(), outdir.display(), targets);
    }

    pub fn target_waiting(output: &Path) {
        debug!("Waiting - {}", output.display());
    }

    pub fn target_bundling(output: &Path) {
        debug!("Bundling - {}", output.display());
    }

    pub fn target_complete(output: &Path, size: usize, gzipped: Option<usize>) {
        match gzipped {
            Some(gzipped) => debug!(
                "✅ {} {} (gzip {})",
                output.display(),
                format_size(size),
                format_size(gzipped)
            ),
            None => debug!("✅ {} {}", output.display(), format_size(size)),
        }
    }

    pub fn stylesheet_stage(bytes: usize) {
        info!("🎨 Writing extracted stylesheet ({} collected)", format_size(bytes));
    }

    pub fn info(msg: &str) {
        info!("{}", msg);
    }

    pub fn debug(msg: &str) {
        debug!("{}", msg);
    }

    pub fn warn(msg: &str) {
        warn!("⚠️  {}", msg);
    }
}

/// Human readable size, in kilobytes with two decimals
pub fn format_size(bytes: usize) -> String {
    format!("{:.2}kb", bytes as f64 / 1024.0)
}

pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        debug!("⏱️  Starting: {}", name);
        Self {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!("⏱️  Completed: {} in {:.2?}", self.name, self.elapsed());
    }
}
