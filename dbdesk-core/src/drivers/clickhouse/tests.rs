//! Tests for the ClickHouse driver that need no server.

use super::ClickHouseDriver;
use crate::config::{ConnectionConfig, SslConfig, SslMode};
use crate::drivers::DatabaseDriver;
use crate::error::DbDeskError;
use crate::models::{DataOptions, DatabaseType, ForeignKeyDefinition};

fn unreachable_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::new(DatabaseType::ClickHouse)
        .with_host("127.0.0.1")
        .with_port(1)
        .with_username("default")
        .with_password("s3cr3t");
    config.connect_timeout_secs = Some(2);
    config
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_connect_to_unreachable_server_fails() {
    let mut driver = ClickHouseDriver::new();
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
    let mut driver = ClickHouseDriver::new();
    let error = driver.connect(&config).await.unwrap_err();
    assert!(matches!(error, DbDeskError::Connection { .. }));
    assert!(!driver.is_connected());
}

#[tokio::test]
async fn test_unreadable_ca_is_a_tls_error() {
    let config = unreachable_config().with_ssl_config(SslConfig {
        mode: SslMode::VerifyFull,
        ca: Some("/nonexistent/clickhouse-ca.pem".to_string()),
        ..Default::default()
    });
    let mut driver = ClickHouseDriver::new();
    assert!(matches!(
        driver.connect(&config).await,
        Err(DbDeskError::Tls { .. })
    ));
}

#[tokio::test]
async fn test_disconnected_driver_degrades_gracefully() {
    let driver = ClickHouseDriver::new();
    assert!(!driver.ping().await);
    assert!(!driver.cancel_query().await);
    assert!(matches!(driver.server_info().await, Err(DbDeskError::NotConnected)));
    assert!(matches!(
        driver.get_foreign_keys("events").await,
        Err(DbDeskError::NotConnected)
    ));

    let result = driver.execute("SELECT 1", &[]).await;
    assert_eq!(result.error.as_deref(), Some("Not connected to database"));
    assert!(driver.get_table_data("events", &DataOptions::default()).await.is_error());

    let op = driver
        .add_foreign_key("events", &ForeignKeyDefinition::default())
        .await;
    assert_eq!(op.error.as_deref(), Some("Not connected to database"));
}

// =============================================================================
// Capabilities
// =============================================================================

#[tokio::test]
async fn test_relational_only_families_are_unsupported() {
    let driver = ClickHouseDriver::new();
    assert_eq!(
        driver.get_triggers(None).await.unwrap_err().to_string(),
        "Triggers is not supported for ClickHouse"
    );
    assert!(matches!(
        driver.get_routines().await,
        Err(DbDeskError::UnsupportedFeature { .. })
    ));
    assert!(matches!(
        driver.get_sequences().await,
        Err(DbDeskError::UnsupportedFeature { .. })
    ));
}

#[test]
fn test_data_types_cover_common_families() {
    let types = ClickHouseDriver::new().get_data_types();
    for expected in ["UInt64", "String", "DateTime64", "LowCardinality", "Nullable", "Decimal"] {
        assert!(types.iter().any(|t| t == expected), "missing {}", expected);
    }
}
