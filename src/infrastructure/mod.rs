// Infrastructure layer
pub mod bundler;
pub mod file_system;
pub mod processors;
mod scope;
pub mod watcher;

pub use bundler::*;
pub use file_system::*;
pub use processors::*;
pub use watcher::FsWatcher;

use crate::core::plugin::PluginRegistry;
use crate::core::services::BuildServices;
use std::sync::Arc;

/// The oxc/lightningcss/tokio collaborators with the built-in plugins
pub fn default_services() -> BuildServices {
    let fs = Arc::new(TokioFileSystemService);
    BuildServices {
        bundler: Arc::new(OxcBundler::new(fs.clone())),
        fs,
        minifier: Arc::new(OxcMinifier::new()),
        stylesheets: Arc::new(LightningCssMinifier::new()),
        registry: Arc::new(PluginRegistry::with_builtins()),
    }
}
