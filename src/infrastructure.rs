//! Infrastructure layer for configuration, logging and the HTTP client
//! that talks to the valuation service.

pub mod config; // Layered configuration and the config file manager
pub mod http_client; // reqwest-backed valuation client
pub mod logging; // Logging infrastructure

// Re-export commonly used items
pub use config::{AppConfig, ConfigError, ConfigManager};
pub use http_client::{HttpClientConfig, HttpValuationClient};
pub use logging::{init_logging, init_logging_with_config};
