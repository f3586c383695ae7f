pub mod config;
pub mod indexflow_toml;
pub mod logger;

pub use config::*;
pub use indexflow_toml::apply_toml_str;
pub use logger::{Colors, setup_logging};
