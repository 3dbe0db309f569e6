// Core domain layer
pub mod banner;
pub mod context;
pub mod interfaces;
pub mod models;
pub mod plugin;
pub mod services;
pub mod targets;
pub mod watch;

pub use context::*;
pub use interfaces::*;
pub use models::*;
pub use plugin::*;
pub use services::*;
pub use watch::*;
