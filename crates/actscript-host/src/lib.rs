/// Host runtime for loading and running action scripts
///
/// A game server builds a registry with its own actions plus
/// [`actscript_core::register_builtins`], then hands it to a [`ScriptHost`]
/// that loads the script directory and is ticked from the update loop.
pub mod config;
pub mod host;
pub mod loader;
pub mod logging;
pub mod reload;
pub mod scanner;

pub use actscript_core as core;
pub use config::{ConfigLoadError, HostConfig};
pub use host::{HostError, ScriptHost};
pub use loader::{LoadFailure, LoadReport, load_dir};
pub use logging::init_logging;
pub use reload::{ReloadGeneration, setup_reload_signal};
pub use scanner::{ScanResult, ScriptScanner};
