//! ClickHouse HTTP interface client.
//!
//! Every statement is one POST with the SQL as body. Each request carries a
//! `query_id` and a cancellation token; [`HttpClient::cancel_all`] aborts the
//! local requests and returns the ids so the server side can be killed too.

use crate::config::{ConnectionConfig, Secret};
use crate::error::{DbDeskError, Result};
use crate::models::{QueryColumn, Row};
use crate::sql::leading_keyword;
use crate::tls::{self, TlsParams};
use regex::Regex;
use reqwest::{Certificate, Client, Identity, Url};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const HTTP_PORT: u16 = 8123;
const HTTPS_PORT: u16 = 8443;

/// Statements answered with a result set.
const RESULT_SET_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXISTS", "EXPLAIN"];

static FORMAT_CLAUSE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)\bFORMAT\s+[A-Za-z][A-Za-z0-9]*\s*$").ok());

/// Whether `FORMAT JSON` should be appended to a statement.
pub(crate) fn wants_json(sql: &str) -> bool {
    RESULT_SET_KEYWORDS.contains(&leading_keyword(sql).as_str()) && !has_format_clause(sql)
}

pub(crate) fn has_format_clause(sql: &str) -> bool {
    FORMAT_CLAUSE
        .as_ref()
        .is_some_and(|re| re.is_match(sql.trim_end().trim_end_matches(';')))
}

/// Appends `FORMAT JSON` to a statement.
pub(crate) fn with_json_format(sql: &str) -> String {
    format!("{}\nFORMAT JSON", sql.trim_end().trim_end_matches(';'))
}

/// Replaces `?` placeholders outside literals and identifiers with
/// escaped values.
///
/// # Errors
/// Returns a query error when placeholder and value counts differ.
pub(crate) fn inline_params(sql: &str, params: &[Value]) -> Result<String> {
    let dialect = crate::sql::Dialect::ClickHouse;
    let mut out = String::with_capacity(sql.len());
    let mut values = params.iter();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == '\\' {
                    out.extend(chars.next());
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' => {
                    let value = values.next().ok_or_else(|| {
                        DbDeskError::query(format!(
                            "Statement has more placeholders than the {} values given",
                            params.len()
                        ))
                    })?;
                    out.push_str(&dialect.literal(value));
                }
                _ => out.push(c),
            },
        }
    }
    if values.next().is_some() {
        return Err(DbDeskError::query(format!(
            "{} values given for fewer placeholders",
            params.len()
        )));
    }
    Ok(out)
}

/// `written_rows` from the `X-ClickHouse-Summary` header.
///
/// The server encodes counters as strings.
pub(crate) fn written_rows(summary: &str) -> u64 {
    let Ok(parsed) = serde_json::from_str::<HashMap<String, Value>>(summary) else {
        return 0;
    };
    match parsed.get("written_rows") {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

#[derive(Debug, Deserialize)]
struct JsonColumn {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
}

#[derive(Debug, Deserialize)]
struct JsonResult {
    #[serde(default)]
    meta: Vec<JsonColumn>,
    #[serde(default)]
    data: Vec<Row>,
}

/// Parses a `FORMAT JSON` body into columns and rows.
///
/// # Errors
/// Returns a serialization error for a body that is not `FORMAT JSON`.
pub(crate) fn parse_result_set(body: &str) -> Result<(Vec<QueryColumn>, Vec<Row>)> {
    let parsed: JsonResult =
        serde_json::from_str(body).map_err(|source| DbDeskError::Serialization {
            context: "ClickHouse JSON result".to_string(),
            source,
        })?;
    let columns = parsed
        .meta
        .into_iter()
        .map(|c| QueryColumn::new(c.name, c.data_type))
        .collect();
    Ok((columns, parsed.data))
}

/// Raw outcome of one HTTP round trip.
#[derive(Debug)]
pub(crate) struct Response {
    pub(crate) body: String,
    pub(crate) written_rows: u64,
}

pub(crate) struct HttpClient {
    client: Client,
    base_url: Url,
    username: String,
    password: Secret,
    database: Option<String>,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("database", &self.database)
            .finish()
    }
}

impl HttpClient {
    /// Builds a client for one attempt of the TLS plan.
    ///
    /// # Errors
    /// Returns a TLS error for unreadable certificate material and a
    /// configuration error for an unusable host.
    pub(crate) fn build(config: &ConnectionConfig, params: Option<&TlsParams>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(concat!("dbdesk/", env!("CARGO_PKG_VERSION")));

        if let Some(params) = params {
            if !params.verify_certificate {
                builder = builder.danger_accept_invalid_certs(true);
            }
            if let Some(ca) = params.ca.as_deref() {
                let certificate = Certificate::from_pem(&tls::load_pem(ca)?)
                    .map_err(|e| DbDeskError::tls(format!("Invalid CA certificate: {}", e)))?;
                builder = builder.add_root_certificate(certificate);
            }
            if let (Some(cert), Some(key)) = (params.cert.as_deref(), params.key.as_deref()) {
                let mut pem = tls::load_pem(cert)?;
                pem.push(b'\n');
                pem.extend(tls::load_pem(key)?);
                let identity = Identity::from_pem(&pem)
                    .map_err(|e| DbDeskError::tls(format!("Invalid client certificate: {}", e)))?;
                builder = builder.identity(identity);
            }
        }
        let client = builder
            .build()
            .map_err(|e| DbDeskError::connection_failed("Failed to build ClickHouse HTTP client", e))?;

        let (scheme, default_port) = if params.is_some() {
            ("https", HTTPS_PORT)
        } else {
            ("http", HTTP_PORT)
        };
        let base_url = Url::parse(&format!(
            "{}://{}:{}/",
            scheme,
            config.host_or_default(),
            config.port.unwrap_or(default_port)
        ))
        .map_err(|e| DbDeskError::configuration(format!("Invalid ClickHouse host: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            username: config
                .username
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "default".to_string()),
            password: config.password.clone().unwrap_or_default(),
            database: config.database.clone().filter(|d| !d.is_empty()),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn register(&self, query_id: &str, token: CancellationToken) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(query_id.to_string(), token);
        }
    }

    fn unregister(&self, query_id: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(query_id);
        }
    }

    /// Cancels every in-flight request and returns their query ids.
    pub(crate) fn cancel_all(&self) -> Vec<String> {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return Vec::new();
        };
        in_flight
            .drain()
            .map(|(query_id, token)| {
                token.cancel();
                query_id
            })
            .collect()
    }

    /// Sends one statement.
    ///
    /// # Errors
    /// Returns a connection error for transport failures, a query error
    /// carrying the server's message for non-success statuses, and a query
    /// error when the request was cancelled.
    pub(crate) async fn send(&self, sql: &str) -> Result<Response> {
        let query_id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        self.register(&query_id, token.clone());
        trace!("ClickHouse query {}: {}", query_id, sql);

        let mut query: Vec<(&str, &str)> = vec![
            ("query_id", query_id.as_str()),
            ("output_format_json_quote_64bit_integers", "0"),
            ("wait_end_of_query", "1"),
        ];
        if let Some(database) = self.database.as_deref() {
            query.push(("database", database));
        }
        let request = self
            .client
            .post(self.base_url.clone())
            .query(&query)
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", self.password.expose())
            .body(sql.to_string());

        let outcome = tokio::select! {
            result = Self::round_trip(request) => result,
            () = token.cancelled() => {
                debug!("ClickHouse query {} cancelled", query_id);
                Err(DbDeskError::query("Query cancelled"))
            }
        };
        self.unregister(&query_id);
        outcome
    }

    async fn round_trip(request: reqwest::RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| DbDeskError::connection_failed("ClickHouse request failed", e))?;
        let status = response.status();
        let written_rows = response
            .headers()
            .get("X-ClickHouse-Summary")
            .and_then(|v| v.to_str().ok())
            .map_or(0, written_rows);
        let body = response
            .text()
            .await
            .map_err(|e| DbDeskError::connection_failed("Reading ClickHouse response failed", e))?;
        if !status.is_success() {
            let message = body.trim();
            return Err(DbDeskError::query(if message.is_empty() {
                format!("ClickHouse returned HTTP {}", status)
            } else {
                message.to_string()
            }));
        }
        Ok(Response { body, written_rows })
    }

    /// Runs a result-set statement and returns its rows.
    ///
    /// # Errors
    /// Returns the request error or a serialization error for the body.
    pub(crate) async fn rows(&self, sql: &str) -> Result<Vec<Row>> {
        let response = self.send(&with_json_format(sql)).await?;
        Ok(parse_result_set(&response.body)?.1)
    }
}

/// String field of a result row; numbers are rendered.
pub(crate) fn text(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Unsigned field of a result row, accepting quoted numbers.
pub(crate) fn unsigned(row: &Row, key: &str) -> Option<u64> {
    match row.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;
    use serde_json::json;

    #[test]
    fn test_json_format_detection() {
        assert!(wants_json("SELECT 1"));
        assert!(wants_json("  show tables"));
        assert!(wants_json("EXISTS TABLE t"));
        assert!(!wants_json("SELECT 1 FORMAT TabSeparated"));
        assert!(!wants_json("select * from t format JSONEachRow;"));
        assert!(!wants_json("INSERT INTO t VALUES (1)"));
        assert!(!wants_json("ALTER TABLE t DELETE WHERE 1"));
        assert_eq!(with_json_format("SELECT 1;"), "SELECT 1\nFORMAT JSON");
    }

    #[test]
    fn test_inline_params_skips_literals() {
        let sql = inline_params(
            "SELECT * FROM t WHERE a = ? AND b = '?' AND c = ?",
            &[json!(1), json!("it's")],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = 1 AND b = '?' AND c = 'it\\'s'");
    }

    #[test]
    fn test_inline_params_count_mismatch() {
        assert!(inline_params("SELECT ?", &[]).is_err());
        assert!(inline_params("SELECT 1", &[json!(1)]).is_err());
        assert_eq!(inline_params("SELECT 1", &[]).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_written_rows_from_summary() {
        assert_eq!(
            written_rows(r#"{"read_rows":"0","read_bytes":"0","written_rows":"3","written_bytes":"24"}"#),
            3
        );
        assert_eq!(written_rows(r#"{"written_rows":5}"#), 5);
        assert_eq!(written_rows("not json"), 0);
    }

    #[test]
    fn test_parse_result_set() {
        let body = r#"{
            "meta": [{"name": "id", "type": "UInt64"}, {"name": "name", "type": "Nullable(String)"}],
            "data": [{"id": 1, "name": "a"}, {"id": 2, "name": null}],
            "rows": 2,
            "statistics": {"elapsed": 0.001, "rows_read": 2, "bytes_read": 10}
        }"#;
        let (columns, rows) = parse_result_set(body).unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].data_type, "Nullable(String)");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("name"), Some(&Value::Null));
        assert!(parse_result_set("Ok.\n").is_err());
    }

    #[test]
    fn test_build_picks_scheme_and_port() {
        let config = ConnectionConfig::new(DatabaseType::ClickHouse).with_host("ch.internal");
        let client = HttpClient::build(&config, None).unwrap();
        assert_eq!(client.base_url().as_str(), "http://ch.internal:8123/");

        let client = HttpClient::build(&config, Some(&TlsParams::default())).unwrap();
        assert_eq!(client.base_url().as_str(), "https://ch.internal:8443/");

        let config = config.with_port(9000);
        let client = HttpClient::build(&config, None).unwrap();
        assert_eq!(client.base_url().as_str(), "http://ch.internal:9000/");
    }

    #[test]
    fn test_cancel_all_drains_in_flight() {
        let config = ConnectionConfig::new(DatabaseType::ClickHouse);
        let client = HttpClient::build(&config, None).unwrap();
        let token = CancellationToken::new();
        client.register("q1", token.clone());
        assert_eq!(client.cancel_all(), vec!["q1".to_string()]);
        assert!(token.is_cancelled());
        assert!(client.cancel_all().is_empty());
    }
}
