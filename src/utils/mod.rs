// Shared utilities module
pub mod config_loader;
pub mod diagnostics;
pub mod errors;
pub mod logging;
pub mod ui;

pub use config_loader::*;
pub use diagnostics::*;
pub use errors::*;
pub use logging::*;
pub use ui::*;
