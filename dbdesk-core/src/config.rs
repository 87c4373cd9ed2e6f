//! Connection configuration.
//!
//! `ConnectionConfig` is the immutable record a caller hands to
//! `DatabaseDriver::connect`. It is serialized in camelCase so the same
//! record can cross an IPC boundary or be loaded from a JSON file.

use crate::error::DbDeskError;
use crate::models::DatabaseType;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Password holder that zeroes its memory on drop and never prints itself.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Exposes the secret for handing to a native client.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// TLS negotiation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// Plaintext only
    #[default]
    Disable,
    /// TLS required; certificate checks follow `reject_unauthorized`
    Require,
    /// TLS with CA verification
    VerifyCa,
    /// TLS with CA and hostname verification plus optional client identity
    VerifyFull,
    /// Try TLS first and fall back to plaintext once
    Prefer,
}

impl std::str::FromStr for SslMode {
    type Err = DbDeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable" | "disabled" | "off" => Ok(Self::Disable),
            "require" | "required" => Ok(Self::Require),
            "verify-ca" | "verify_ca" => Ok(Self::VerifyCa),
            "verify-full" | "verify_full" | "verify-identity" => Ok(Self::VerifyFull),
            "prefer" | "preferred" => Ok(Self::Prefer),
            other => Err(DbDeskError::configuration(format!(
                "Unknown SSL mode '{}'",
                other
            ))),
        }
    }
}

/// SSL/TLS settings attached to a connection.
///
/// `ca`, `cert` and `key` hold either PEM text or a path to a PEM file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslConfig {
    /// Negotiation mode
    pub mode: SslMode,
    /// Certificate authority bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    /// Client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    /// Client private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Whether invalid server certificates are rejected (defaults to true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_unauthorized: Option<bool>,
}

/// Configuration for one connection attempt.
///
/// # Example
/// ```rust
/// use dbdesk_core::{ConnectionConfig, DatabaseType};
///
/// let config = ConnectionConfig::new(DatabaseType::PostgreSql)
///     .with_host("localhost")
///     .with_database("app")
///     .with_username("admin");
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.effective_port(), Some(5432));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Caller-assigned identity
    #[serde(default)]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Backend type tag
    #[serde(rename = "type")]
    pub database_type: DatabaseType,
    /// Server host
    #[serde(default)]
    pub host: Option<String>,
    /// Server port (backend default when absent)
    #[serde(default)]
    pub port: Option<u16>,
    /// Database, schema, or logical database index
    #[serde(default)]
    pub database: Option<String>,
    /// Login name
    #[serde(default)]
    pub username: Option<String>,
    /// Login password
    #[serde(default)]
    pub password: Option<Secret>,
    /// Database file for the embedded engine
    #[serde(default)]
    pub file_path: Option<String>,
    /// Legacy TLS toggle, equivalent to `require` when no mode is set
    #[serde(default)]
    pub ssl: Option<bool>,
    /// Detailed TLS settings
    #[serde(default)]
    pub ssl_config: Option<SslConfig>,
    /// Connect timeout in seconds
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Username and password are never shown
        match (&self.file_path, &self.host) {
            (Some(path), _) if self.database_type == DatabaseType::Sqlite => {
                write!(f, "{}({})", self.database_type, path)
            }
            (_, host) => write!(
                f,
                "{}({}{}{})",
                self.database_type,
                host.as_deref().unwrap_or("localhost"),
                self.effective_port()
                    .map_or_else(String::new, |p| format!(":{}", p)),
                self.database
                    .as_ref()
                    .map_or_else(String::new, |db| format!("/{}", db))
            ),
        }
    }
}

/// Default connect timeout when the config does not specify one.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

impl ConnectionConfig {
    /// Creates a config for the given backend with everything else unset.
    pub fn new(database_type: DatabaseType) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            database_type,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            file_path: None,
            ssl: None,
            ssl_config: None,
            connect_timeout_secs: None,
        }
    }

    /// Builder method to set host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Builder method to set port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder method to set database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Builder method to set username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Builder method to set password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password));
        self
    }

    /// Builder method to set the embedded database file.
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Builder method to set TLS settings.
    pub fn with_ssl_config(mut self, ssl_config: SslConfig) -> Self {
        self.ssl_config = Some(ssl_config);
        self
    }

    /// Host to dial, defaulting to localhost.
    pub fn host_or_default(&self) -> &str {
        self.host
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or("localhost")
    }

    /// Port to dial, falling back to the backend's well-known port.
    pub fn effective_port(&self) -> Option<u16> {
        if let Some(port) = self.port {
            return Some(port);
        }
        match self.database_type {
            DatabaseType::Sqlite => None,
            DatabaseType::MySql => Some(3306),
            DatabaseType::PostgreSql => Some(5432),
            DatabaseType::ClickHouse => {
                if crate::tls::TlsPlan::resolve(self).uses_tls() {
                    Some(8443)
                } else {
                    Some(8123)
                }
            }
            DatabaseType::MongoDb => Some(27017),
            DatabaseType::Redis => Some(6379),
        }
    }

    /// Password text, empty when none was supplied.
    pub fn password_str(&self) -> &str {
        self.password.as_ref().map_or("", Secret::expose)
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    /// Validates the fields each backend needs.
    ///
    /// # Errors
    /// Returns a configuration error describing the first missing or invalid field.
    pub fn validate(&self) -> crate::Result<()> {
        if self.port == Some(0) {
            return Err(DbDeskError::configuration("port must be greater than 0"));
        }

        match self.database_type {
            DatabaseType::Sqlite => {
                let has_path = self
                    .file_path
                    .as_deref()
                    .or(self.database.as_deref())
                    .is_some_and(|p| !p.trim().is_empty());
                if !has_path {
                    return Err(DbDeskError::configuration(
                        "SQLite connections require a file path",
                    ));
                }
            }
            _ => {
                if self.host.as_deref().is_some_and(|h| h.trim().is_empty()) {
                    return Err(DbDeskError::configuration("host cannot be empty"));
                }
            }
        }

        if self.connect_timeout_secs == Some(0) {
            return Err(DbDeskError::configuration(
                "connect timeout must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserializes_camel_case() {
        let json = r#"{
            "id": "c1",
            "name": "local pg",
            "type": "postgresql",
            "host": "db.internal",
            "port": 6543,
            "database": "app",
            "username": "admin",
            "password": "hunter2",
            "sslConfig": { "mode": "verify-full", "ca": "/etc/ca.pem", "rejectUnauthorized": true }
        }"#;
        let config: ConnectionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.database_type, DatabaseType::PostgreSql);
        assert_eq!(config.port, Some(6543));
        assert_eq!(config.password_str(), "hunter2");
        let ssl = config.ssl_config.unwrap();
        assert_eq!(ssl.mode, SslMode::VerifyFull);
        assert_eq!(ssl.ca.as_deref(), Some("/etc/ca.pem"));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(
            ConnectionConfig::new(DatabaseType::MySql).effective_port(),
            Some(3306)
        );
        assert_eq!(
            ConnectionConfig::new(DatabaseType::Redis).effective_port(),
            Some(6379)
        );
        assert_eq!(
            ConnectionConfig::new(DatabaseType::ClickHouse).effective_port(),
            Some(8123)
        );
        assert_eq!(ConnectionConfig::new(DatabaseType::Sqlite).effective_port(), None);
        assert_eq!(
            ConnectionConfig::new(DatabaseType::MongoDb)
                .with_port(27018)
                .effective_port(),
            Some(27018)
        );
    }

    #[test]
    fn test_clickhouse_tls_port() {
        let mut config = ConnectionConfig::new(DatabaseType::ClickHouse);
        config.ssl = Some(true);
        assert_eq!(config.effective_port(), Some(8443));
    }

    #[test]
    fn test_validation() {
        assert!(ConnectionConfig::new(DatabaseType::Sqlite).validate().is_err());
        assert!(
            ConnectionConfig::new(DatabaseType::Sqlite)
                .with_file_path("/tmp/app.db")
                .validate()
                .is_ok()
        );
        assert!(
            ConnectionConfig::new(DatabaseType::MySql)
                .with_host("")
                .validate()
                .is_err()
        );
        assert!(
            ConnectionConfig::new(DatabaseType::MySql)
                .with_port(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_display_hides_credentials() {
        let config = ConnectionConfig::new(DatabaseType::MySql)
            .with_host("example.com")
            .with_database("shop")
            .with_username("root")
            .with_password("s3cret");
        let display = config.to_string();
        assert!(display.contains("example.com:3306/shop"));
        assert!(!display.contains("root"));
        assert!(!display.contains("s3cret"));
        assert!(!format!("{:?}", config).contains("s3cret"));
    }

    #[test]
    fn test_ssl_mode_from_str() {
        assert_eq!("prefer".parse::<SslMode>().unwrap(), SslMode::Prefer);
        assert_eq!("verify-ca".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
        assert!("sometimes".parse::<SslMode>().is_err());
    }
}
