//! Server configuration – reads/writes `~/.hydronom/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted server configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port for the HTTP + WebSocket gateway.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Directory holding the date-partitioned telemetry and event logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Token that must appear in the `Authorization` header of API calls.
    #[serde(default = "default_auth_token")]
    pub auth_token: String,

    /// Dashboard origin allowed by CORS.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    /// Upper bound on one live-subscriber send, in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("bind_address", &self.bind_address)
            .field("log_dir", &self.log_dir)
            .field(
                "auth_token",
                if self.auth_token.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("cors_origin", &self.cors_origin)
            .field("send_timeout_ms", &self.send_timeout_ms)
            .finish()
    }
}

fn default_port() -> u16 {
    hydronom_gateway::DEFAULT_PORT
}
fn default_bind_address() -> String {
    hydronom_gateway::DEFAULT_BIND_ADDRESS.to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_auth_token() -> String {
    hydronom_gateway::DEFAULT_AUTH_TOKEN.to_string()
}
fn default_cors_origin() -> String {
    hydronom_gateway::DEFAULT_CORS_ORIGIN.to_string()
}
fn default_send_timeout_ms() -> u64 {
    hydronom_middleware::DEFAULT_SEND_TIMEOUT.as_millis() as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            log_dir: default_log_dir(),
            auth_token: default_auth_token(),
            cors_origin: default_cors_origin(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

/// Path of the config file: `$HYDRONOM_CONFIG` when set, otherwise
/// `~/.hydronom/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("HYDRONOM_CONFIG")
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".hydronom").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `HYDRONOM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HYDRONOM_PORT` | `port` |
/// | `HYDRONOM_BIND_ADDRESS` | `bind_address` |
/// | `HYDRONOM_LOG_DIR` | `log_dir` |
/// | `HYDRONOM_AUTH_TOKEN` | `auth_token` |
/// | `HYDRONOM_CORS_ORIGIN` | `cors_origin` |
/// | `HYDRONOM_SEND_TIMEOUT_MS` | `send_timeout_ms` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HYDRONOM_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Ok(v) = std::env::var("HYDRONOM_BIND_ADDRESS") {
        cfg.bind_address = v;
    }
    if let Ok(v) = std::env::var("HYDRONOM_LOG_DIR") {
        cfg.log_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("HYDRONOM_AUTH_TOKEN") {
        cfg.auth_token = v;
    }
    if let Ok(v) = std::env::var("HYDRONOM_CORS_ORIGIN") {
        cfg.cors_origin = v;
    }
    if let Ok(v) = std::env::var("HYDRONOM_SEND_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.send_timeout_ms = ms;
    }
}

/// Save the config to disk, creating the parent directory if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // The file carries the API token: owner-only read/write on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
