use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub account: AccountConfig,
    pub database: DatabaseConfig,
    pub backend: BackendConfig,
    pub sidecar: SidecarConfig,
    pub realtime: RealtimeConfig,
    pub alerts: AlertConfig,
    pub dispatch: DispatchConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: "~/.wa-bridge/state.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

/// Protocol sidecar owning the actual network connection. The bridge drives
/// it over HTTP and receives its events on the local callback route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    pub url: String,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:4040".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub enabled: bool,
    pub publish_key: Option<String>,
    pub subscribe_key: Option<String>,
    pub channel_prefix: String,
    pub origin: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            publish_key: None,
            subscribe_key: None,
            channel_prefix: "wa".to_string(),
            origin: "https://ps.pndsn.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub crash_report_key: Option<String>,
    pub environment: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            crash_report_key: None,
            environment: "development".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub poll_interval_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8092,
            },
            account: AccountConfig::default(),
            database: DatabaseConfig::default(),
            backend: BackendConfig::default(),
            sidecar: SidecarConfig::default(),
            realtime: RealtimeConfig::default(),
            alerts: AlertConfig::default(),
            dispatch: DispatchConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("WA_BRIDGE_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.wa-bridge/wa-bridge.json"))
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();

    let mut cfg = Config::default();

    if config_path.exists() {
        if let Ok(raw) = fs::read_to_string(&config_path) {
            if let Ok(file_cfg) = serde_json::from_str::<Config>(&raw) {
                cfg = file_cfg;
            }
        }
    }

    // Override from environment
    if let Ok(phone) = env::var("WA_BRIDGE_ACCOUNT") {
        if !phone.trim().is_empty() {
            cfg.account.phone_number = phone;
        }
    }

    if let Ok(url) = env::var("WA_BRIDGE_BACKEND_URL") {
        if !url.trim().is_empty() {
            cfg.backend.base_url = url;
        }
    }

    if let Ok(url) = env::var("WA_BRIDGE_DATABASE_URL") {
        if !url.trim().is_empty() {
            cfg.database.url = Some(url);
        }
    }

    if let Ok(path) = env::var("WA_BRIDGE_SQLITE_PATH") {
        if !path.trim().is_empty() {
            cfg.database.sqlite_path = path;
        }
    }

    if let Ok(url) = env::var("WA_BRIDGE_SIDECAR_URL") {
        if !url.trim().is_empty() {
            cfg.sidecar.url = url;
        }
    }

    if let Ok(key) = env::var("WA_BRIDGE_PUB_KEY") {
        if !key.trim().is_empty() {
            cfg.realtime.publish_key = Some(key);
        }
    }

    if let Ok(key) = env::var("WA_BRIDGE_SUB_KEY") {
        if !key.trim().is_empty() {
            cfg.realtime.subscribe_key = Some(key);
        }
    }

    if let Ok(prefix) = env::var("WA_BRIDGE_PUB_CHANNEL") {
        if !prefix.trim().is_empty() {
            cfg.realtime.channel_prefix = prefix;
        }
    }

    if let Ok(key) = env::var("WA_BRIDGE_CRASH_REPORT_KEY") {
        if !key.trim().is_empty() {
            cfg.alerts.crash_report_key = Some(key);
        }
    }

    if let Ok(tag) = env::var("WA_BRIDGE_ENV") {
        if !tag.trim().is_empty() {
            cfg.alerts.environment = tag;
        }
    }

    cfg
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}", path.to_string_lossy())
}
