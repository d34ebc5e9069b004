use std::collections::BTreeMap;

use serde::Deserialize;

use crate::protocol::constants::auth_plugin::{CACHING_SHA2_PASSWORD, MYSQL_NATIVE_PASSWORD};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Enables SO_REUSEADDR on the listener
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// TLS is offered only when a certificate is configured
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Named backend integrations, addressable as `{user}_{integration}`
    #[serde(default)]
    pub integrations: BTreeMap<String, IntegrationConfig>,
    #[serde(default)]
    pub backend: BackendConfig,
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Answer to `SELECT @@version`
    #[serde(default = "default_version")]
    pub version: String,
    /// Answer to `SELECT @@version_comment`
    #[serde(default = "default_version_comment")]
    pub version_comment: String,
    /// Server version string in the handshake greeting
    #[serde(default = "default_greeting_version")]
    pub greeting_version: String,
    /// Prometheus `/metrics` listener; disabled when unset
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    47335
}

fn default_version() -> String {
    "0.1".to_string()
}

fn default_version_comment() -> String {
    "(MindsDB)".to_string()
}

fn default_greeting_version() -> String {
    "5.7.1-MindsDB-1.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            version: default_version(),
            version_comment: default_version_comment(),
            greeting_version: default_greeting_version(),
            metrics_addr: None,
        }
    }
}

impl ServerConfig {
    /// Get the address string (host:port)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Auth method offered in the greeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    MysqlNativePassword,
    CachingSha2Password,
}

impl AuthMethod {
    pub fn plugin_name(&self) -> &'static str {
        match self {
            AuthMethod::MysqlNativePassword => MYSQL_NATIVE_PASSWORD,
            AuthMethod::CachingSha2Password => CACHING_SHA2_PASSWORD,
        }
    }
}

/// The single credential pair accepted by the proxy
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub default_method: AuthMethod,
}

fn default_user() -> String {
    "mindsdb".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            password: String::new(),
            default_method: AuthMethod::default(),
        }
    }
}

// ============================================================================
// TLS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub certificate_path: String,
    /// PEM private key; defaults to the certificate file
    #[serde(default)]
    pub key_path: Option<String>,
}

impl TlsConfig {
    pub fn key_path(&self) -> &str {
        self.key_path.as_deref().unwrap_or(&self.certificate_path)
    }
}

// ============================================================================
// Integrations / backend
// ============================================================================

/// A named backend data source the session can be bound to
#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationConfig {
    #[serde(rename = "type", default = "default_integration_type")]
    pub kind: String,
    #[serde(default = "default_integration_enabled")]
    pub enabled: bool,
}

fn default_integration_type() -> String {
    "mysql".to_string()
}

fn default_integration_enabled() -> bool {
    true
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            kind: default_integration_type(),
            enabled: default_integration_enabled(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    /// External data sources registered at startup
    #[serde(default)]
    pub datasources: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            tls: None,
            integrations: BTreeMap::new(),
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    /// Whether `name` is a configured, enabled integration
    pub fn has_integration(&self, name: &str) -> bool {
        self.integrations
            .get(name)
            .map(|i| i.enabled)
            .unwrap_or(false)
    }
}
