pub mod account;
pub mod config;
pub mod logging;
pub mod paths;

pub use account::{AccountConfig, DEFAULT_PROTOCOL};
pub use config::{
    validate_account, BridgeConfig, Config, ConfigError, LogLevel, LoggingConfig, ValidationError,
};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use paths::{AppDirs, DirsError};

pub const APP_NAME: &str = "wabee";
pub const APP_AUTHOR: &str = "Wabee";
pub const APP_QUALIFIER: &str = "io";
