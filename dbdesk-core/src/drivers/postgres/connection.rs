//! PostgreSQL connection setup, TLS mapping and cancellation.
//!
//! The backend PID of the single pooled connection is captured on every
//! (re)connect. Cancellation signals it with `pg_cancel_backend` from a
//! short-lived helper connection.

use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use crate::tls::{self, TlsParams, TlsPlan};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Connection, PgConnection, PgPool};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// A live PostgreSQL session.
pub(crate) struct Session {
    pub(crate) pool: PgPool,
    pub(crate) options: PgConnectOptions,
    pub(crate) backend_pid: Arc<AtomicI32>,
}

/// Native SSL mode for a TLS attempt.
pub(crate) fn ssl_mode(params: Option<&TlsParams>) -> PgSslMode {
    match params {
        None => PgSslMode::Disable,
        Some(p) if !p.verify_certificate => PgSslMode::Require,
        Some(p) if !p.verify_hostname => PgSslMode::VerifyCa,
        Some(_) => PgSslMode::VerifyFull,
    }
}

/// Builds connect options for one attempt.
///
/// # Errors
/// Returns a TLS error if certificate material cannot be read.
pub(crate) fn connect_options(
    config: &ConnectionConfig,
    params: Option<&TlsParams>,
) -> Result<PgConnectOptions> {
    let mut options = PgConnectOptions::new()
        .host(config.host_or_default())
        .port(config.effective_port().unwrap_or(5432))
        .username(config.username.as_deref().unwrap_or("postgres"))
        .database(
            config
                .database
                .as_deref()
                .filter(|d| !d.is_empty())
                .unwrap_or("postgres"),
        )
        .application_name("dbdesk")
        .ssl_mode(ssl_mode(params));

    if !config.password_str().is_empty() {
        options = options.password(config.password_str());
    }
    if let Some(params) = params {
        if let Some(ca) = params.ca.as_deref() {
            options = options.ssl_root_cert_from_pem(tls::load_pem(ca)?);
        }
        if let (Some(cert), Some(key)) = (params.cert.as_deref(), params.key.as_deref()) {
            options = options
                .ssl_client_cert_from_pem(tls::load_pem(cert)?)
                .ssl_client_key_from_pem(tls::load_pem(key)?);
        }
    }
    Ok(options)
}

async fn open_pool(
    options: PgConnectOptions,
    timeout: Duration,
    backend_pid: Arc<AtomicI32>,
) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(timeout)
        .idle_timeout(None)
        .max_lifetime(None)
        .after_connect(move |conn, _meta| {
            let backend_pid = Arc::clone(&backend_pid);
            Box::pin(async move {
                let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
                    .fetch_one(&mut *conn)
                    .await?;
                backend_pid.store(pid, Ordering::SeqCst);
                Ok(())
            })
        })
        .connect_with(options)
        .await
        .map_err(|e| DbDeskError::connection_failed("Failed to connect to PostgreSQL", e))
}

/// Connects according to the config's TLS plan.
///
/// # Errors
/// Returns the last attempt's error when no connection could be made.
pub(crate) async fn open(config: &ConnectionConfig) -> Result<Session> {
    let plan = TlsPlan::resolve(config);
    let backend_pid = Arc::new(AtomicI32::new(0));
    let timeout = config.connect_timeout();

    let (pool, options) = tls::connect_with_plan(&plan, |params| {
        let backend_pid = Arc::clone(&backend_pid);
        async move {
            let options = connect_options(config, params.as_ref())?;
            let pool = open_pool(options.clone(), timeout, backend_pid).await?;
            Ok((pool, options))
        }
    })
    .await?;

    Ok(Session {
        pool,
        options,
        backend_pid,
    })
}

/// Signals `pg_cancel_backend(pid)` over a helper connection.
///
/// The helper is closed whether or not the signal was delivered.
pub(crate) async fn cancel_backend(options: &PgConnectOptions, pid: i32) -> bool {
    if pid == 0 {
        return false;
    }
    let mut helper = match PgConnection::connect_with(options).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Could not open PostgreSQL cancel connection: {}", e);
            return false;
        }
    };
    let cancelled = sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
        .bind(pid)
        .fetch_one(&mut helper)
        .await
        .unwrap_or(false);
    if let Err(e) = helper.close().await {
        debug!("Closing PostgreSQL cancel connection failed: {}", e);
    }
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SslConfig, SslMode};
    use crate::models::DatabaseType;

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(ssl_mode(None), PgSslMode::Disable));
        assert!(matches!(
            ssl_mode(Some(&TlsParams::default())),
            PgSslMode::Require
        ));
        let ca_only = TlsParams {
            verify_certificate: true,
            ..Default::default()
        };
        assert!(matches!(ssl_mode(Some(&ca_only)), PgSslMode::VerifyCa));
        let full = TlsParams {
            verify_certificate: true,
            verify_hostname: true,
            ..Default::default()
        };
        assert!(matches!(ssl_mode(Some(&full)), PgSslMode::VerifyFull));
    }

    #[test]
    fn test_verify_full_with_missing_client_key_file() {
        let config = ConnectionConfig::new(DatabaseType::PostgreSql).with_ssl_config(SslConfig {
            mode: SslMode::VerifyFull,
            cert: Some("-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n".to_string()),
            key: Some("/nonexistent/client.key".to_string()),
            ..Default::default()
        });
        let plan = TlsPlan::resolve(&config);
        assert!(matches!(
            connect_options(&config, plan.params()),
            Err(DbDeskError::Tls { .. })
        ));
    }

    #[test]
    fn test_defaults_for_user_and_database() {
        let config = ConnectionConfig::new(DatabaseType::PostgreSql);
        let options = connect_options(&config, None).unwrap();
        assert_eq!(options.get_username(), "postgres");
        assert_eq!(options.get_database(), Some("postgres"));
        assert_eq!(options.get_port(), 5432);
    }

    #[tokio::test]
    async fn test_cancel_without_session_is_noop() {
        let options = PgConnectOptions::new().host("127.0.0.1").port(1);
        assert!(!cancel_backend(&options, 0).await);
    }
}
