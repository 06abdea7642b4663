//! Configuration Module
//!
//! Configuration loading for the feed client and binary.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, DEFAULT_USER_AGENT, DEFAULT_WS_URL, ExportFormat, ExportSettings,
    FilterSettings, IdentitySettings, PipelineSettings, ServerSettings, WebSocketSettings,
};
