// ============================
// backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Gateway settings are layered with figment: built-in defaults, an optional
//! TOML file, `TALISMAN_GATEWAY_*` environment variables and finally whatever
//! the command line supplied. The BBS's own `talisman.ini` is then read to
//! locate the credential store and the log file.
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use talisman_common::Seclevel;

use crate::error::GatewayError;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TALISMAN_GATEWAY_";

/// Name of the BBS configuration file inside `bbs_path`
pub const INI_FILE_NAME: &str = "talisman.ini";

/// Name of the sqlite user database inside the data path
pub const USER_DB_FILE_NAME: &str = "users.sqlite3";

/// Name of the log file inside the log path
pub const LOG_FILE_NAME: &str = "talisman.log";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// How much of an authentication failure is revealed to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureDisclosure {
    /// One message for every refusal
    #[default]
    Generic,
    /// Name the failure category
    Detailed,
}

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// TCP port to listen on
    pub port: u16,
    /// Address to bind
    #[serde(default = "default_bind_host")]
    pub bind_host: IpAddr,
    /// Minimum security level required for access
    pub seclevel: Seclevel,
    /// BBS directory containing `talisman.ini`
    pub bbs_path: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Log tail polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-line read timeout during login, 0 disables it
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
    /// Failure text policy
    #[serde(default)]
    pub failure_disclosure: FailureDisclosure,
}

fn default_bind_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_login_timeout_secs() -> u64 {
    60
}

/// Values taken from the command line; `None` leaves lower layers untouched
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seclevel: Option<Seclevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbs_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,
}

impl Settings {
    /// Build the figment used to load settings
    pub fn figment(config_file: Option<&Path>, overrides: &SettingsOverrides) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::globals(overrides))
    }

    /// Load and validate settings from all sources
    pub fn load(config_file: Option<&Path>, overrides: &SettingsOverrides) -> Result<Self, GatewayError> {
        if let Some(path) = config_file {
            if !path.exists() {
                return Err(GatewayError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
        }
        let settings: Settings = Self::figment(config_file, overrides).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.port == 0 {
            return Err(GatewayError::Config("port must be non-zero".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(GatewayError::Config("poll_interval_ms must be non-zero".to_string()));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(GatewayError::Config(format!("unknown log level: {}", self.log_level)));
        }
        Ok(())
    }

    /// Socket address to listen on
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Login read timeout, if enabled
    pub fn login_timeout(&self) -> Option<Duration> {
        (self.login_timeout_secs > 0).then(|| Duration::from_secs(self.login_timeout_secs))
    }
}

/// Locations the core needs, resolved from `talisman.ini`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// sqlite credential store
    pub store_path: PathBuf,
    /// log file to stream
    pub log_file: PathBuf,
}

/// Read `talisman.ini` under `bbs_path` and resolve the store and log paths.
///
/// Relative `data path` / `log path` values are taken relative to `bbs_path`.
pub fn resolve_paths(bbs_path: &Path) -> Result<ResolvedPaths, GatewayError> {
    let ini_path = bbs_path.join(INI_FILE_NAME);
    let ini = config::Config::builder()
        .add_source(
            config::File::from(ini_path.as_path())
                .format(config::FileFormat::Ini)
                .required(true),
        )
        .build()?;
    let entries: HashMap<String, config::Value> = ini.try_deserialize()?;

    let data_path = find_ini_value(&entries, "data path")
        .ok_or_else(|| GatewayError::Config(format!("data path not found in {INI_FILE_NAME}")))?;
    let log_path = find_ini_value(&entries, "log path")
        .ok_or_else(|| GatewayError::Config(format!("log path not found in {INI_FILE_NAME}")))?;

    let data_dir = anchor(bbs_path, &data_path);
    let log_dir = anchor(bbs_path, &log_path);

    Ok(ResolvedPaths {
        store_path: data_dir.join(USER_DB_FILE_NAME),
        log_file: log_dir.join(LOG_FILE_NAME),
    })
}

/// Look up `key` at top level or in any section, ignoring case.
fn find_ini_value(entries: &HashMap<String, config::Value>, key: &str) -> Option<String> {
    let mut sections = Vec::new();
    for (name, value) in entries {
        match value.clone().into_table() {
            Ok(table) => sections.push(table),
            Err(_) if name.eq_ignore_ascii_case(key) => {
                if let Ok(text) = value.clone().into_string() {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        return Some(text);
                    }
                }
            }
            Err(_) => {}
        }
    }

    sections.into_iter().find_map(|table| {
        table
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .and_then(|(_, value)| value.into_string().ok())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    })
}

fn anchor(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
