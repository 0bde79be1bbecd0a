//! Configuration system for htun.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HTUN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/htun/config.toml
//!   3. ~/.config/htun/config.toml

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::crypto::{parse_key, Keypair, PublicKey};

/// Smallest MTU every IPv4 host must accept.
pub const MIN_MTU: u16 = 68;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HtunConfig {
    pub server: ServerConfig,
    pub identity: IdentityConfig,
    pub clients: ClientsConfig,
    pub network: NetworkConfig,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds.
    pub listen: SocketAddr,
    /// Path prefix. Handshakes go to `{base_path}/auth`, data to `{base_path}/`.
    pub base_path: String,
    /// Largest accepted data-path request body.
    pub max_body_bytes: usize,
    /// Upper bound on a single handshake request.
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Server static private key, hex. Empty = generate at startup.
    pub private_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientsConfig {
    /// Client static public keys (hex) permitted to handshake.
    pub public_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Tunnel subnet. Leases are handed out from its host range.
    pub subnet: Ipv4Net,
    /// Server's own address inside the subnet. None = first host.
    pub server_ip: Option<Ipv4Addr>,
    pub mtu: u16,
    pub dns_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Sessions idle for this long are evicted and their lease released.
    pub idle_timeout_secs: u64,
    /// How often the sweeper runs.
    pub sweep_interval_secs: u64,
    /// Most packets returned in one data-path response.
    pub max_batch_packets: usize,
    /// Per-client outbound queue depth. Oldest packet dropped on overflow.
    pub queue_depth: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for HtunConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            identity: IdentityConfig::default(),
            clients: ClientsConfig::default(),
            network: NetworkConfig::default(),
            sessions: SessionsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8443)),
            base_path: "/vpn".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
            handshake_timeout_secs: 10,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            private_key: String::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            subnet: Ipv4Net::new(Ipv4Addr::new(192, 168, 4, 0), 24).unwrap_or_default(),
            server_ip: None,
            mtu: 1400,
            dns_port: 53,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            sweep_interval_secs: 5,
            max_batch_packets: 256,
            queue_depth: 512,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl NetworkConfig {
    /// The server's reserved address: configured, or the subnet's first host.
    pub fn server_address(&self) -> Option<Ipv4Addr> {
        self.server_ip.or_else(|| self.subnet.trunc().hosts().next())
    }
}

impl SessionsConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("htun")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HtunConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from `path`, falling back to defaults only if it does not exist.
    /// A file that exists but cannot be read or parsed is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            HtunConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HTUN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write a default config with a fresh server key if none exists.
    /// Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let mut config = HtunConfig::default();
            config.identity.private_key = Keypair::generate().private_hex().to_string();
            let text = toml::to_string_pretty(&config).map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply HTUN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HTUN_SERVER__LISTEN") {
            if let Ok(addr) = v.parse() {
                self.server.listen = addr;
            }
        }
        if let Ok(v) = std::env::var("HTUN_SERVER__BASE_PATH") {
            self.server.base_path = v;
        }
        if let Ok(v) = std::env::var("HTUN_IDENTITY__PRIVATE_KEY") {
            self.identity.private_key = v;
        }
        if let Ok(v) = std::env::var("HTUN_NETWORK__SUBNET") {
            if let Ok(net) = v.parse() {
                self.network.subnet = net;
            }
        }
        if let Ok(v) = std::env::var("HTUN_NETWORK__MTU") {
            if let Ok(mtu) = v.parse() {
                self.network.mtu = mtu;
            }
        }
        if let Ok(v) = std::env::var("HTUN_NETWORK__DNS_PORT") {
            if let Ok(port) = v.parse() {
                self.network.dns_port = port;
            }
        }
        if let Ok(v) = std::env::var("HTUN_SESSIONS__IDLE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.sessions.idle_timeout_secs = secs;
            }
        }
    }

    /// Check the values that cannot be fixed up silently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.identity.private_key.is_empty() {
            parse_key(&self.identity.private_key)
                .map_err(|_| invalid("identity.private_key", "expected 64 hex characters"))?;
        }
        self.client_keys()?;

        let subnet = self.network.subnet;
        if subnet.prefix_len() > 30 {
            return Err(invalid(
                "network.subnet",
                format!("/{} leaves no room for clients", subnet.prefix_len()),
            ));
        }
        if let Some(ip) = self.network.server_ip {
            if !subnet.contains(&ip) {
                return Err(invalid("network.server_ip", format!("{ip} is outside {subnet}")));
            }
            if ip == subnet.network() || ip == subnet.broadcast() {
                return Err(invalid("network.server_ip", format!("{ip} is not a host address")));
            }
        }
        let mtu = self.network.mtu;
        if !(MIN_MTU..=u16::MAX - 2).contains(&mtu) {
            return Err(invalid("network.mtu", format!("{mtu} out of range")));
        }
        if self.sessions.idle_timeout_secs == 0 {
            return Err(invalid("sessions.idle_timeout_secs", "must be positive"));
        }
        if !self.server.base_path.starts_with('/') {
            return Err(invalid("server.base_path", "must start with '/'"));
        }
        Ok(())
    }

    /// Parsed client keys. Any malformed entry is an error.
    pub fn client_keys(&self) -> Result<Vec<PublicKey>, ConfigError> {
        self.clients
            .public_keys
            .iter()
            .map(|k| {
                parse_key(k).map_err(|_| invalid("clients.public_keys", format!("bad key {k:?}")))
            })
            .collect()
    }

    /// Server keypair from config, or a fresh one when none is configured.
    pub fn server_keypair(&self) -> Result<Keypair, ConfigError> {
        if self.identity.private_key.is_empty() {
            return Ok(Keypair::generate());
        }
        Keypair::from_hex(&self.identity.private_key)
            .map_err(|_| invalid("identity.private_key", "expected 64 hex characters"))
    }
}
