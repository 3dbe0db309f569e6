// libpack - multi-format library bundler
// Layered as core (domain), infrastructure (services), plugins and utils

pub mod cli;
pub mod core;
pub mod infrastructure;
pub mod plugins;
pub mod utils;
