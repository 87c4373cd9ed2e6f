//! Redis client construction and the connection handshake.

use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use crate::tls::{self, TlsParams, TlsPlan};
use redis::aio::MultiplexedConnection;
use redis::{ClientTlsConfig, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, TlsCertificates};
use tracing::debug;

/// A live multiplexed connection and the logical database it selected.
#[derive(Clone)]
pub(crate) struct Session {
    pub(crate) connection: MultiplexedConnection,
    pub(crate) db: i64,
    pub(crate) endpoint: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("db", &self.db)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Logical database index from the config's database field.
///
/// Accepts `"3"` or `"db3"`; anything else selects database 0.
pub(crate) fn database_index(database: Option<&str>) -> i64 {
    database
        .map(str::trim)
        .map(|d| d.strip_prefix("db").unwrap_or(d))
        .and_then(|d| d.parse::<i64>().ok())
        .filter(|index| *index >= 0)
        .unwrap_or(0)
}

/// Connection info for one attempt.
pub(crate) fn connection_info(config: &ConnectionConfig, params: Option<&TlsParams>) -> ConnectionInfo {
    let host = config.host_or_default().to_string();
    let port = config.effective_port().unwrap_or(6379);
    let addr = match params {
        Some(params) => ConnectionAddr::TcpTls {
            host,
            port,
            insecure: !params.verify_certificate,
            tls_params: None,
        },
        None => ConnectionAddr::Tcp(host, port),
    };
    ConnectionInfo {
        addr,
        redis: RedisConnectionInfo {
            db: database_index(config.database.as_deref()),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config
                .password
                .as_ref()
                .filter(|p| !p.is_empty())
                .map(|p| p.expose().to_string()),
            ..Default::default()
        },
    }
}

/// CA and client identity bytes, when any were supplied.
///
/// # Errors
/// Returns a TLS error if a PEM source cannot be read.
pub(crate) fn certificates(params: &TlsParams) -> Result<Option<TlsCertificates>> {
    let root_cert = params.ca.as_deref().map(tls::load_pem).transpose()?;
    let client_tls = match (params.cert.as_deref(), params.key.as_deref()) {
        (Some(cert), Some(key)) => Some(ClientTlsConfig {
            client_cert: tls::load_pem(cert)?,
            client_key: tls::load_pem(key)?,
        }),
        _ => None,
    };
    if root_cert.is_none() && client_tls.is_none() {
        return Ok(None);
    }
    Ok(Some(TlsCertificates {
        client_tls,
        root_cert,
    }))
}

fn build_client(config: &ConnectionConfig, params: Option<&TlsParams>) -> Result<redis::Client> {
    let info = connection_info(config, params);
    let certs = params.map(certificates).transpose()?.flatten();
    let client = match certs {
        Some(certs) => redis::Client::build_with_tls(info, certs),
        None => redis::Client::open(info),
    };
    client.map_err(|e| DbDeskError::connection_failed("Invalid Redis connection settings", e))
}

fn endpoint(config: &ConnectionConfig) -> String {
    format!(
        "{}:{}",
        config.host_or_default(),
        config.effective_port().unwrap_or(6379)
    )
}

/// Connects according to the config's TLS plan and verifies with `PING`.
///
/// # Errors
/// Returns the last attempt's error when no connection could be made.
pub(crate) async fn open(config: &ConnectionConfig) -> Result<Session> {
    let plan = TlsPlan::resolve(config);
    let endpoint = endpoint(config);
    let endpoint = endpoint.as_str();
    tls::connect_with_plan(&plan, |params| async move {
        let client = build_client(config, params.as_ref())?;
        let mut connection = tokio::time::timeout(
            config.connect_timeout(),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            DbDeskError::connection_failed(
                format!("Timed out connecting to Redis at {}", endpoint),
                std::io::Error::from(std::io::ErrorKind::TimedOut),
            )
        })?
        .map_err(|e| {
            DbDeskError::connection_failed(format!("Failed to connect to Redis at {}", endpoint), e)
        })?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| DbDeskError::connection_failed("Redis rejected the connection", e))?;
        debug!("Redis handshake complete for {}: {}", endpoint, pong);
        Ok(Session {
            connection,
            db: database_index(config.database.as_deref()),
            endpoint: endpoint.to_string(),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;

    #[test]
    fn test_database_index() {
        assert_eq!(database_index(None), 0);
        assert_eq!(database_index(Some("3")), 3);
        assert_eq!(database_index(Some("db12")), 12);
        assert_eq!(database_index(Some("cache")), 0);
        assert_eq!(database_index(Some("-1")), 0);
    }

    #[test]
    fn test_connection_info_carries_credentials_and_db() {
        let config = ConnectionConfig::new(DatabaseType::Redis)
            .with_host("cache.internal")
            .with_database("db2")
            .with_username("app")
            .with_password("pw");
        let info = connection_info(&config, None);
        assert!(matches!(info.addr, ConnectionAddr::Tcp(ref host, 6379) if host == "cache.internal"));
        assert_eq!(info.redis.db, 2);
        assert_eq!(info.redis.username.as_deref(), Some("app"));
        assert_eq!(info.redis.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_tls_address_follows_verification() {
        let config = ConnectionConfig::new(DatabaseType::Redis).with_host("cache.internal");
        let params = TlsParams {
            verify_certificate: false,
            ..Default::default()
        };
        let info = connection_info(&config, Some(&params));
        assert!(matches!(info.addr, ConnectionAddr::TcpTls { insecure: true, .. }));
        assert!(certificates(&params).unwrap().is_none());

        let missing = TlsParams {
            ca: Some("/nonexistent/redis-ca.pem".to_string()),
            ..params
        };
        assert!(matches!(certificates(&missing), Err(DbDeskError::Tls { .. })));
    }
}
