use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use std::time::Duration;

use crate::matchmaking::MatchmakingSettings;
use crate::ws::KeepAlive;

/// CVR matchmaking and gateway server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "cvr-server", version, about = "CVR matchmaking and gateway server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CVR_PORT", default_value = "3000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CVR_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./cvr.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CVR_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "CVR_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Shared HS256 secret for player tokens. Generated into data_dir when unset.
    #[arg(long, env = "CVR_JWT_SECRET", hide_env_values = true)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Instance lifecycle tuning (loaded from [matchmaking] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub matchmaking: MatchmakingConfig,

    /// Presence-driven rewards (loaded from [economy] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub economy: EconomyConfig,

    /// WebSocket keep-alive (loaded from [gateway] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingConfig {
    /// Seconds an empty instance survives before it is reaped (default: 300)
    #[serde(default = "default_instance_ttl")]
    pub instance_ttl_secs: u64,

    /// Interval in seconds between reaper runs (default: 60)
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    /// Attempts for a roster write that keeps losing races (default: 16)
    #[serde(default = "default_max_update_retries")]
    pub max_update_retries: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            instance_ttl_secs: default_instance_ttl(),
            reaper_interval_secs: default_reaper_interval(),
            max_update_retries: default_max_update_retries(),
        }
    }
}

impl MatchmakingConfig {
    pub fn settings(&self) -> MatchmakingSettings {
        MatchmakingSettings {
            instance_ttl_secs: self.instance_ttl_secs,
            max_update_retries: self.max_update_retries.max(1),
        }
    }
}

fn default_instance_ttl() -> u64 {
    300
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_max_update_retries() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    /// Currency granted on the first connection of each 24h window (default: 50)
    #[serde(default = "default_daily_reward")]
    pub daily_reward: i64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            daily_reward: default_daily_reward(),
        }
    }
}

fn default_daily_reward() -> i64 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds a ping may go unanswered before the socket is dropped (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn keepalive(&self) -> KeepAlive {
        KeepAlive {
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            config: "./cvr.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            matchmaking: MatchmakingConfig::default(),
            economy: EconomyConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CVR_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();
        Self::figment(&config_path, cli).extract()
    }

    fn figment(config_path: &str, cli: Config) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("CVR_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# CVR Server Configuration
# Place this file at ./cvr.toml or specify with --config <path>
# All settings can be overridden via environment variables (CVR_PORT,
# CVR_MATCHMAKING__INSTANCE_TTL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and generated JWT key
# data_dir = "./data"

# Shared HS256 secret used to verify player tokens.
# When unset a random key is generated into data_dir/jwt_secret.
# jwt_secret = ""

# ---- Matchmaking ----
# [matchmaking]

# Seconds an empty, non-persistent instance is kept before it is reaped
# instance_ttl_secs = 300

# Interval in seconds between reaper runs
# reaper_interval_secs = 60

# Attempts for a roster update that keeps conflicting with other writers
# max_update_retries = 16

# ---- Economy ----
# [economy]

# Currency granted on the first connection in each 24 hour window
# daily_reward = 50

# ---- Gateway ----
# [gateway]

# Seconds between WebSocket pings sent to each client
# ping_interval_secs = 30

# Seconds a ping may go unanswered before the connection is closed (1001)
# pong_timeout_secs = 10
"#
    .to_string()
}
