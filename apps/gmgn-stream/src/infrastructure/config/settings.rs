//! Client Configuration Settings
//!
//! Configuration types for the feed client, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::domain::channel::{Channel, ChannelName, DEFAULT_CHAIN};
use crate::domain::subscription::AccessToken;

/// Default feed endpoint.
pub const DEFAULT_WS_URL: &str = "wss://gmgn.ai/ws";

/// Default browser-like user agent for the handshake.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub ping_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = +/-10%).
    pub reconnect_jitter: f64,
    /// Maximum consecutive reconnection attempts (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Session length after which the backoff counter resets.
    pub stability_window: Duration,
    /// Decode errors inside the window that force a reconnect (0 = never).
    pub decode_error_threshold: usize,
    /// Decode error window length.
    pub decode_error_window: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(40),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.1,
            max_reconnect_attempts: 5,
            stability_window: Duration::from_secs(30),
            decode_error_threshold: 50,
            decode_error_window: Duration::from_secs(10),
        }
    }
}

/// Handshake identity settings.
#[derive(Clone)]
pub struct IdentitySettings {
    /// `User-Agent` header.
    pub user_agent: String,
    /// Optional `Cookie` header.
    pub cookie: Option<String>,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cookie: None,
        }
    }
}

impl std::fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("user_agent", &self.user_agent)
            .field("cookie", &self.cookie.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Queue and buffer sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Pipeline queue capacity.
    pub queue_capacity: usize,
    /// Iteration buffer capacity.
    pub event_buffer: usize,
    /// Sequence tokens remembered per channel for duplicate marking.
    pub dedupe_window: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            event_buffer: 1024,
            dedupe_window: 4096,
        }
    }
}

/// Threshold filter and alert settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSettings {
    /// Minimum market cap in USD.
    pub min_market_cap: Option<Decimal>,
    /// Minimum liquidity in USD.
    pub min_liquidity: Option<Decimal>,
    /// Minimum 24h volume in USD.
    pub min_volume_24h: Option<Decimal>,
    /// Minimum holder count.
    pub min_holders: Option<u64>,
    /// Maximum derived risk score.
    pub max_risk_score: Option<f64>,
    /// Cooldown between repeated alerts of one condition.
    pub alert_cooldown: Duration,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            min_market_cap: None,
            min_liquidity: None,
            min_volume_24h: None,
            min_holders: None,
            max_risk_score: None,
            alert_cooldown: Duration::from_secs(300),
        }
    }
}

impl FilterSettings {
    /// Whether any threshold is configured.
    #[must_use]
    pub const fn has_thresholds(&self) -> bool {
        self.min_market_cap.is_some()
            || self.min_liquidity.is_some()
            || self.min_volume_24h.is_some()
            || self.min_holders.is_some()
            || self.max_risk_score.is_some()
    }
}

/// Export file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One JSON record per line.
    Jsonl,
    /// Comma-separated values with a header row.
    Csv,
    /// Local `SQLite` database.
    Sqlite,
}

impl ExportFormat {
    /// Format name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::Csv => "csv",
            Self::Sqlite => "sqlite",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jsonl" | "json" => Ok(Self::Jsonl),
            "csv" => Ok(Self::Csv),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(ConfigError::InvalidValue {
                key: "GMGN_EXPORT_FORMAT".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Export sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    /// Output format; `None` disables export.
    pub format: Option<ExportFormat>,
    /// Output directory.
    pub directory: PathBuf,
    /// Rotate once the current file exceeds this size.
    pub max_file_bytes: u64,
    /// Rotate once the current file is older than this.
    pub max_file_age: Duration,
    /// Compress rotated files with zstd.
    pub compress: bool,
    /// Add export metadata to each record.
    pub include_metadata: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            format: None,
            directory: PathBuf::from("./exports"),
            max_file_bytes: 100 * 1024 * 1024,
            max_file_age: Duration::from_secs(24 * 3600),
            compress: false,
            include_metadata: true,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Feed endpoint.
    pub url: String,
    /// Default token for authenticated channels.
    pub access_token: Option<AccessToken>,
    /// Handshake identity.
    pub identity: IdentitySettings,
    /// Chain used for configured subscriptions.
    pub chain: String,
    /// Channels to subscribe at startup.
    pub channels: Vec<ChannelName>,
    /// Wallets watched on the wallet-trade channel.
    pub wallets: Vec<String>,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Queue and buffer sizes.
    pub pipeline: PipelineSettings,
    /// Filter and alert thresholds.
    pub filter: FilterSettings,
    /// Export sink settings.
    pub export: ExportSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            access_token: None,
            identity: IdentitySettings::default(),
            chain: DEFAULT_CHAIN.to_string(),
            channels: vec![ChannelName::PoolCreation],
            wallets: Vec::new(),
            websocket: WebSocketSettings::default(),
            pipeline: PipelineSettings::default(),
            filter: FilterSettings::default(),
            export: ExportSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel or export format is not recognized, or
    /// wallet trades are requested without any wallet.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let channels = match std::env::var("GMGN_CHANNELS") {
            Ok(raw) if !raw.trim().is_empty() => parse_channels(&raw)?,
            _ => defaults.channels,
        };

        let wallets = std::env::var("GMGN_WALLETS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();

        if channels.contains(&ChannelName::WalletTrade) && wallets.is_empty() {
            return Err(ConfigError::MissingEnvVar("GMGN_WALLETS".to_string()));
        }

        let identity = IdentitySettings {
            user_agent: parse_env_string("GMGN_USER_AGENT")
                .unwrap_or(defaults.identity.user_agent),
            cookie: parse_env_string("GMGN_COOKIE"),
        };

        let ws = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            ping_interval: parse_env_duration_secs("GMGN_PING_INTERVAL_SECS", ws.ping_interval),
            heartbeat_timeout: parse_env_duration_secs(
                "GMGN_PONG_TIMEOUT_SECS",
                ws.heartbeat_timeout,
            ),
            connect_timeout: parse_env_duration_secs(
                "GMGN_CONNECT_TIMEOUT_SECS",
                ws.connect_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "GMGN_RECONNECT_INITIAL_MS",
                ws.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_millis(
                "GMGN_RECONNECT_MAX_MS",
                ws.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "GMGN_RECONNECT_MULTIPLIER",
                ws.reconnect_delay_multiplier,
            ),
            reconnect_jitter: parse_env_f64("GMGN_RECONNECT_JITTER", ws.reconnect_jitter),
            max_reconnect_attempts: parse_env_u32(
                "GMGN_RECONNECT_MAX_ATTEMPTS",
                ws.max_reconnect_attempts,
            ),
            stability_window: parse_env_duration_secs(
                "GMGN_STABILITY_WINDOW_SECS",
                ws.stability_window,
            ),
            decode_error_threshold: parse_env_usize(
                "GMGN_DECODE_ERROR_THRESHOLD",
                ws.decode_error_threshold,
            ),
            decode_error_window: parse_env_duration_secs(
                "GMGN_DECODE_ERROR_WINDOW_SECS",
                ws.decode_error_window,
            ),
        };

        let pipeline = PipelineSettings {
            queue_capacity: parse_env_usize(
                "GMGN_QUEUE_CAPACITY",
                defaults.pipeline.queue_capacity,
            ),
            event_buffer: parse_env_usize("GMGN_EVENT_BUFFER", defaults.pipeline.event_buffer),
            dedupe_window: parse_env_usize("GMGN_DEDUPE_WINDOW", defaults.pipeline.dedupe_window),
        };

        let filter = FilterSettings {
            min_market_cap: parse_env_decimal("GMGN_MIN_MARKET_CAP"),
            min_liquidity: parse_env_decimal("GMGN_MIN_LIQUIDITY"),
            min_volume_24h: parse_env_decimal("GMGN_MIN_VOLUME_24H"),
            min_holders: std::env::var("GMGN_MIN_HOLDERS")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            max_risk_score: std::env::var("GMGN_MAX_RISK_SCORE")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            alert_cooldown: parse_env_duration_secs(
                "GMGN_ALERT_COOLDOWN_SECS",
                defaults.filter.alert_cooldown,
            ),
        };

        let format = match parse_env_string("GMGN_EXPORT_FORMAT") {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };
        let export = ExportSettings {
            format,
            directory: parse_env_string("GMGN_EXPORT_DIR")
                .map_or(defaults.export.directory, PathBuf::from),
            max_file_bytes: std::env::var("GMGN_EXPORT_MAX_FILE_MB")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(defaults.export.max_file_bytes, |mb| mb * 1024 * 1024),
            max_file_age: std::env::var("GMGN_EXPORT_ROTATION_HOURS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(defaults.export.max_file_age, |h| {
                    Duration::from_secs(h * 3600)
                }),
            compress: parse_env_bool("GMGN_EXPORT_COMPRESS", defaults.export.compress),
            include_metadata: parse_env_bool(
                "GMGN_EXPORT_INCLUDE_METADATA",
                defaults.export.include_metadata,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16("GMGN_HEALTH_PORT", defaults.server.health_port),
        };

        Ok(Self {
            url: parse_env_string("GMGN_WS_URL").unwrap_or(defaults.url),
            access_token: parse_env_string("GMGN_ACCESS_TOKEN").and_then(AccessToken::new),
            identity,
            chain: parse_env_string("GMGN_CHAIN").unwrap_or(defaults.chain),
            channels,
            wallets,
            websocket,
            pipeline,
            filter,
            export,
            server,
        })
    }

    /// Channels to subscribe at startup.
    ///
    /// Wallet trades expand into one channel per watched wallet.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .flat_map(|name| match name {
                ChannelName::WalletTrade => self
                    .wallets
                    .iter()
                    .map(|wallet| Channel::wallet_trade(&self.chain, wallet))
                    .collect::<Vec<_>>(),
                other => vec![Channel::on_chain(*other, &self.chain)],
            })
            .collect()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn parse_channels(raw: &str) -> Result<Vec<ChannelName>, ConfigError> {
    parse_list(raw)
        .iter()
        .map(|name| {
            name.parse().map_err(|_| ConfigError::InvalidValue {
                key: "GMGN_CHANNELS".to_string(),
                value: name.clone(),
            })
        })
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| {
            matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
}

fn parse_env_decimal(key: &str) -> Option<Decimal> {
    std::env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(v.trim()).ok())
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
