//! Tests for the Redis driver that need no server.

use super::{RedisDriver, database_count, parse_info};
use crate::config::{ConnectionConfig, SslConfig, SslMode};
use crate::drivers::DatabaseDriver;
use crate::error::DbDeskError;
use crate::models::{DataOptions, DatabaseType, IndexDefinition, Row, ViewDefinition};

fn unreachable_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::new(DatabaseType::Redis)
        .with_host("127.0.0.1")
        .with_port(1)
        .with_password("s3cr3t");
    config.connect_timeout_secs = Some(2);
    config
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_connect_to_unreachable_server_fails() {
    let mut driver = RedisDriver::new();
    let error = driver.connect(&unreachable_config()).await.unwrap_err();
    assert!(matches!(error, DbDeskError::Connection { .. }));
    assert!(!driver.is_connected());
    assert!(!error.detailed_message().contains("s3cr3t"));
}

#[tokio::test]
async fn test_prefer_falls_back_and_reports_plaintext_error() {
    let config = unreachable_config().with_ssl_config(SslConfig {
        mode: SslMode::Prefer,
        ..Default::default()
    });
    let mut driver = RedisDriver::new();
    let error = driver.connect(&config).await.unwrap_err();
    assert!(matches!(error, DbDeskError::Connection { .. }));
    assert!(!driver.is_connected());
}

#[tokio::test]
async fn test_unreadable_ca_is_a_tls_error() {
    let config = unreachable_config().with_ssl_config(SslConfig {
        mode: SslMode::VerifyFull,
        ca: Some("/nonexistent/redis-ca.pem".to_string()),
        ..Default::default()
    });
    let mut driver = RedisDriver::new();
    assert!(matches!(
        driver.connect(&config).await,
        Err(DbDeskError::Tls { .. })
    ));
    assert!(!driver.is_connected());
}

#[tokio::test]
async fn test_disconnected_driver_degrades_gracefully() {
    let driver = RedisDriver::new();
    assert!(!driver.ping().await);
    assert!(!driver.cancel_query().await);
    assert!(matches!(driver.server_info().await, Err(DbDeskError::NotConnected)));
    assert!(matches!(driver.get_databases().await, Err(DbDeskError::NotConnected)));
    assert!(matches!(driver.get_columns("user:*").await, Err(DbDeskError::NotConnected)));

    let result = driver.execute("GET greeting", &[]).await;
    assert_eq!(result.error.as_deref(), Some("Not connected to database"));

    let data = driver.get_table_data("user:*", &DataOptions::default()).await;
    assert!(data.is_error());
    assert_eq!(data.row_count, 0);

    let op = driver.insert_row("user:*", &Row::new()).await;
    assert_eq!(op.error.as_deref(), Some("Not connected to database"));
    let op = driver.create_index("user:*", &IndexDefinition::default()).await;
    assert_eq!(op.error.as_deref(), Some("Not connected to database"));
    let op = driver.drop_table("user:*").await;
    assert!(!op.success);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let mut driver = RedisDriver::new();
    driver.disconnect().await;
    driver.disconnect().await;
    assert!(!driver.is_connected());
}

// =============================================================================
// Capabilities
// =============================================================================

#[tokio::test]
async fn test_relational_families_are_unsupported() {
    let driver = RedisDriver::new();
    assert_eq!(
        driver.get_users().await.unwrap_err().to_string(),
        "User management is not supported for Redis"
    );
    assert!(matches!(
        driver.get_sequences().await,
        Err(DbDeskError::UnsupportedFeature { .. })
    ));
    let op = driver.create_view(&ViewDefinition::default()).await;
    assert!(!op.success);
}

#[test]
fn test_data_types_are_key_types() {
    let driver = RedisDriver::new();
    assert_eq!(
        driver.get_data_types(),
        vec!["string", "list", "set", "zset", "hash", "stream"]
    );
    assert_eq!(driver.database_type(), DatabaseType::Redis);
}

// =============================================================================
// Server replies
// =============================================================================

#[test]
fn test_info_parsing_skips_headers() {
    let text = "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n\r\nos:Linux 6.1 x86_64\r\n";
    let info = parse_info(text);
    assert_eq!(
        info,
        vec![
            ("redis_version", "7.2.4"),
            ("redis_mode", "standalone"),
            ("os", "Linux 6.1 x86_64"),
        ]
    );
}

#[test]
fn test_database_count_reply() {
    let reply = vec!["databases".to_string(), "32".to_string()];
    assert_eq!(database_count(&reply), Some(32));
    assert_eq!(database_count(&[]), None);
    assert_eq!(database_count(&["databases".to_string(), "0".to_string()]), None);
}
