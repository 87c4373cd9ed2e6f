//! MySQL connection setup, TLS mapping and cancellation.
//!
//! The driver owns a pool capped at one connection so session state such as
//! `USE db` carries across calls. The server-side connection id is captured
//! every time the pool (re)connects; `KILL QUERY` targets it from a
//! short-lived helper connection.

use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use crate::tls::{self, TlsParams, TlsPlan};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::{Connection, MySqlConnection, MySqlPool};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// A live MySQL session.
pub(crate) struct Session {
    pub(crate) pool: MySqlPool,
    /// Options the pool dialed with, reused for the cancel helper
    pub(crate) options: MySqlConnectOptions,
    pub(crate) connection_id: Arc<AtomicU64>,
}

/// Native SSL mode for a TLS attempt.
pub(crate) fn ssl_mode(params: Option<&TlsParams>) -> MySqlSslMode {
    match params {
        None => MySqlSslMode::Disabled,
        Some(p) if !p.verify_certificate => MySqlSslMode::Required,
        Some(p) if !p.verify_hostname => MySqlSslMode::VerifyCa,
        Some(_) => MySqlSslMode::VerifyIdentity,
    }
}

/// Builds connect options for one attempt.
///
/// # Errors
/// Returns a TLS error if certificate material cannot be read.
pub(crate) fn connect_options(
    config: &ConnectionConfig,
    params: Option<&TlsParams>,
) -> Result<MySqlConnectOptions> {
    let mut options = MySqlConnectOptions::new()
        .host(config.host_or_default())
        .port(config.effective_port().unwrap_or(3306))
        .username(config.username.as_deref().unwrap_or("root"))
        .charset("utf8mb4")
        .ssl_mode(ssl_mode(params));

    if !config.password_str().is_empty() {
        options = options.password(config.password_str());
    }
    if let Some(database) = config.database.as_deref().filter(|d| !d.is_empty()) {
        options = options.database(database);
    }
    if let Some(params) = params {
        if let Some(ca) = params.ca.as_deref() {
            options = options.ssl_ca_from_pem(tls::load_pem(ca)?);
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
    options: MySqlConnectOptions,
    timeout: Duration,
    connection_id: Arc<AtomicU64>,
) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(timeout)
        .idle_timeout(None)
        .max_lifetime(None)
        .after_connect(move |conn, _meta| {
            let connection_id = Arc::clone(&connection_id);
            Box::pin(async move {
                let id: u64 = sqlx::query_scalar("SELECT CONNECTION_ID()")
                    .fetch_one(&mut *conn)
                    .await?;
                connection_id.store(id, Ordering::SeqCst);
                Ok(())
            })
        })
        .connect_with(options)
        .await
        .map_err(|e| DbDeskError::connection_failed("Failed to connect to MySQL", e))
}

/// Connects according to the config's TLS plan.
///
/// # Errors
/// Returns the last attempt's error when no connection could be made.
pub(crate) async fn open(config: &ConnectionConfig) -> Result<Session> {
    let plan = TlsPlan::resolve(config);
    let connection_id = Arc::new(AtomicU64::new(0));
    let timeout = config.connect_timeout();

    let (pool, options) = tls::connect_with_plan(&plan, |params| {
        let connection_id = Arc::clone(&connection_id);
        async move {
            let options = connect_options(config, params.as_ref())?;
            let pool = open_pool(options.clone(), timeout, connection_id).await?;
            Ok((pool, options))
        }
    })
    .await?;

    Ok(Session {
        pool,
        options,
        connection_id,
    })
}

/// Sends `KILL QUERY` for `connection_id` over a helper connection.
///
/// The helper is closed whether or not the kill succeeded.
pub(crate) async fn kill_query(options: &MySqlConnectOptions, connection_id: u64) -> bool {
    if connection_id == 0 {
        return false;
    }
    let mut helper = match MySqlConnection::connect_with(options).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Could not open MySQL cancel connection: {}", e);
            return false;
        }
    };
    let killed = sqlx::query(&format!("KILL QUERY {}", connection_id))
        .execute(&mut helper)
        .await
        .is_ok();
    if let Err(e) = helper.close().await {
        debug!("Closing MySQL cancel connection failed: {}", e);
    }
    killed
}
