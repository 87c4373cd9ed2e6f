//! Data model shared by every driver.
//!
//! All structures are plain data and serialize to JSON-safe shapes: rows are
//! `serde_json` maps, never native handles or wire-format wrapper objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Embedded relational engine
    Sqlite,
    /// Client-server relational engine
    #[serde(rename = "mysql")]
    MySql,
    /// Client-server relational engine
    #[serde(rename = "postgresql", alias = "postgres")]
    PostgreSql,
    /// Columnar analytical engine
    #[serde(rename = "clickhouse")]
    ClickHouse,
    /// Document store
    #[serde(rename = "mongodb")]
    MongoDb,
    /// Key-value store
    Redis,
}

impl DatabaseType {
    /// Every supported backend, in display order.
    pub const ALL: [Self; 6] = [
        Self::Sqlite,
        Self::MySql,
        Self::PostgreSql,
        Self::ClickHouse,
        Self::MongoDb,
        Self::Redis,
    ];

    /// Stable lowercase tag used in configs and on the command line.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::ClickHouse => "clickhouse",
            Self::MongoDb => "mongodb",
            Self::Redis => "redis",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => write!(f, "SQLite"),
            Self::MySql => write!(f, "MySQL"),
            Self::PostgreSql => write!(f, "PostgreSQL"),
            Self::ClickHouse => write!(f, "ClickHouse"),
            Self::MongoDb => write!(f, "MongoDB"),
            Self::Redis => write!(f, "Redis"),
        }
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = crate::error::DbDeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSql),
            "clickhouse" => Ok(Self::ClickHouse),
            "mongodb" | "mongo" => Ok(Self::MongoDb),
            "redis" => Ok(Self::Redis),
            other => Err(crate::error::DbDeskError::configuration(format!(
                "Unknown database type '{}'",
                other
            ))),
        }
    }
}

/// Column metadata as reported by introspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Backend-normalized type name
    #[serde(rename = "type")]
    pub data_type: String,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Part of the primary key
    pub primary_key: bool,
    /// Generated by the engine on insert
    pub auto_increment: bool,
    /// Covered by a single-column unique constraint
    pub unique: bool,
    /// Character length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Numeric precision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Numeric scale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    /// Default expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Column comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Index metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    /// Index name
    pub name: String,
    /// Indexed columns, in key order
    pub columns: Vec<String>,
    /// Enforces uniqueness
    pub unique: bool,
    /// Backs the primary key
    pub primary: bool,
    /// Backend-specific kind (BTREE, HASH, FULLTEXT, 2dsphere, minmax, ...)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub index_type: Option<String>,
}

/// Foreign key metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyInfo {
    /// Constraint name
    pub name: String,
    /// Referencing columns
    pub columns: Vec<String>,
    /// Referenced table
    pub referenced_table: String,
    /// Referenced columns
    pub referenced_columns: Vec<String>,
    /// ON UPDATE action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_update: Option<String>,
    /// ON DELETE action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
}

/// Kind of table-like object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Base table, collection, or key group
    #[default]
    Table,
    /// View
    View,
}

/// Table-like object listed by `get_tables`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    /// Table name (schema-qualified where the backend needs it)
    pub name: String,
    /// Table or view
    #[serde(rename = "type")]
    pub kind: TableKind,
    /// Estimated row count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Estimated size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Table comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TableInfo {
    /// Creates a table entry with no statistics.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a view entry with no statistics.
    pub fn view(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::View,
            ..Default::default()
        }
    }
}

/// Column of a query result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryColumn {
    /// Column name
    pub name: String,
    /// Display type name
    #[serde(rename = "type")]
    pub data_type: String,
    /// Column belongs to the source table's primary key
    pub primary_key: bool,
}

impl QueryColumn {
    /// Creates a column with a type and no key flag.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            primary_key: false,
        }
    }
}

/// A single result row.
pub type Row = Map<String, Value>;

/// Result of `execute` and `get_table_data`.
///
/// `row_count` always equals `rows.len()`; error results carry no rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Ordered result columns
    pub columns: Vec<QueryColumn>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Number of rows returned
    pub row_count: usize,
    /// Rows changed by a mutating statement
    pub affected_rows: u64,
    /// Wall-clock execution time
    pub execution_time_ms: u64,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Builds a successful result from columns and rows.
    pub fn with_rows(columns: Vec<QueryColumn>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            ..Default::default()
        }
    }

    /// Builds a successful result with no result set.
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Default::default()
        }
    }

    /// Builds an error result with empty rows.
    pub fn from_error(error: impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Stamps the elapsed time since `start`.
    pub fn timed(mut self, start: std::time::Instant) -> Self {
        self.execution_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Whether the result carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Filter operator for data browsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    /// `=`
    #[serde(rename = "=")]
    Equal,
    /// `!=`
    #[serde(rename = "!=", alias = "<>")]
    NotEqual,
    /// `>`
    #[serde(rename = ">")]
    GreaterThan,
    /// `<`
    #[serde(rename = "<")]
    LessThan,
    /// `>=`
    #[serde(rename = ">=")]
    GreaterOrEqual,
    /// `<=`
    #[serde(rename = "<=")]
    LessOrEqual,
    /// Pattern match with `%` wildcards
    #[serde(rename = "LIKE")]
    Like,
    /// Negated pattern match
    #[serde(rename = "NOT LIKE")]
    NotLike,
    /// Set membership
    #[serde(rename = "IN")]
    In,
    /// Negated set membership
    #[serde(rename = "NOT IN")]
    NotIn,
    /// Null check
    #[serde(rename = "IS NULL")]
    IsNull,
    /// Negated null check
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

impl FilterOperator {
    /// SQL spelling of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }
}

/// One data-browsing filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Column to test
    pub column: String,
    /// Comparison
    pub operator: FilterOperator,
    /// Operand; absent for null checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Filter {
    /// Creates a filter.
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: Option<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    /// Ascending
    #[default]
    #[serde(alias = "asc")]
    Asc,
    /// Descending
    #[serde(alias = "desc")]
    Desc,
}

impl SortDirection {
    /// SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Paging, sorting, and filtering for `get_table_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataOptions {
    /// Filters combined with AND
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Sort column
    #[serde(default)]
    pub sort_column: Option<String>,
    /// Sort direction
    #[serde(default)]
    pub sort_direction: SortDirection,
    /// Page size (backend default when absent)
    #[serde(default)]
    pub limit: Option<u64>,
    /// Rows to skip
    #[serde(default)]
    pub offset: Option<u64>,
}

impl DataOptions {
    /// Page size, falling back to `default`.
    pub fn limit_or(&self, default: u64) -> u64 {
        self.limit.filter(|l| *l > 0).unwrap_or(default)
    }

    /// Offset, defaulting to zero.
    pub fn offset_or_zero(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

/// Outcome of a schema or row mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaOperationResult {
    /// Whether the mutation succeeded
    pub success: bool,
    /// The native statement(s) issued, for audit/display
    pub sql: String,
    /// Rows affected, where meaningful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SchemaOperationResult {
    /// Successful mutation.
    pub fn ok(sql: impl Into<String>) -> Self {
        Self {
            success: true,
            sql: sql.into(),
            ..Default::default()
        }
    }

    /// Successful mutation with a row count.
    pub fn ok_with_rows(sql: impl Into<String>, affected_rows: u64) -> Self {
        Self {
            success: true,
            sql: sql.into(),
            affected_rows: Some(affected_rows),
            error: None,
        }
    }

    /// Failed mutation.
    pub fn failed(sql: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            sql: sql.into(),
            affected_rows: None,
            error: Some(error.to_string()),
        }
    }

    /// Mutation that has no meaning for this backend.
    pub fn unsupported(feature: &str, database_type: DatabaseType) -> Self {
        Self::failed(
            String::new(),
            crate::error::DbDeskError::unsupported_feature(feature, database_type.to_string()),
        )
    }

    /// Mutation attempted without a live connection.
    pub fn not_connected() -> Self {
        Self::failed(String::new(), crate::error::DbDeskError::NotConnected)
    }
}

/// Column specification for `add_column`, `modify_column`, and `create_table`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// Native type name
    #[serde(rename = "type")]
    pub data_type: String,
    /// Character length, e.g. VARCHAR(255)
    #[serde(default)]
    pub length: Option<u32>,
    /// Numeric precision
    #[serde(default)]
    pub precision: Option<u32>,
    /// Numeric scale
    #[serde(default)]
    pub scale: Option<u32>,
    /// Whether NULL is allowed
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Default expression, emitted verbatim
    #[serde(default)]
    pub default_value: Option<String>,
    /// Single-column unique constraint
    #[serde(default)]
    pub unique: bool,
    /// Engine-generated value
    #[serde(default)]
    pub auto_increment: bool,
    /// Primary key member (used by `create_table`)
    #[serde(default)]
    pub primary_key: bool,
    /// Column comment
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ColumnDefinition {
    /// Creates a nullable column of the given type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            ..Default::default()
        }
    }

    /// Type with its length or precision/scale suffix.
    pub fn full_type(&self) -> String {
        let base = self.data_type.trim();
        if base.contains('(') {
            return base.to_string();
        }
        match (self.length, self.precision, self.scale) {
            (Some(length), _, _) => format!("{}({})", base, length),
            (None, Some(precision), Some(scale)) => format!("{}({}, {})", base, precision, scale),
            (None, Some(precision), None) => format!("{}({})", base, precision),
            _ => base.to_string(),
        }
    }
}

/// Index specification for `create_index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    /// Index name
    pub name: String,
    /// Indexed columns
    pub columns: Vec<String>,
    /// Unique index
    #[serde(default)]
    pub unique: bool,
    /// Backend-specific index kind (BTREE, HASH, FULLTEXT, minmax, 2dsphere...)
    #[serde(rename = "type", default)]
    pub index_type: Option<String>,
}

/// Foreign key specification for `add_foreign_key` and `create_table`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDefinition {
    /// Constraint name
    #[serde(default)]
    pub name: String,
    /// Referencing columns
    pub columns: Vec<String>,
    /// Referenced table
    pub referenced_table: String,
    /// Referenced columns
    pub referenced_columns: Vec<String>,
    /// ON UPDATE action; omitted when unset
    #[serde(default)]
    pub on_update: Option<String>,
    /// ON DELETE action; omitted when unset
    #[serde(default)]
    pub on_delete: Option<String>,
}

impl From<&ForeignKeyInfo> for ForeignKeyDefinition {
    fn from(info: &ForeignKeyInfo) -> Self {
        Self {
            name: info.name.clone(),
            columns: info.columns.clone(),
            referenced_table: info.referenced_table.clone(),
            referenced_columns: info.referenced_columns.clone(),
            on_update: info.on_update.clone(),
            on_delete: info.on_delete.clone(),
        }
    }
}

/// Table specification for `create_table`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    /// Table name
    pub name: String,
    /// Columns in order
    pub columns: Vec<ColumnDefinition>,
    /// Indexes created after the table
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    /// Foreign keys declared inline
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    /// Table-level `UNIQUE (a, b, ...)` constraints
    #[serde(default)]
    pub unique_constraints: Vec<Vec<String>>,
    /// Storage engine (MySQL engine or ClickHouse table engine)
    #[serde(default)]
    pub engine: Option<String>,
    /// Default character set (MySQL)
    #[serde(default)]
    pub charset: Option<String>,
    /// Default collation (MySQL)
    #[serde(default)]
    pub collation: Option<String>,
    /// Table comment
    #[serde(default)]
    pub comment: Option<String>,
}

impl TableDefinition {
    /// Names of the primary key columns, in declaration order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// View specification for `create_view`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDefinition {
    /// View name
    pub name: String,
    /// Defining query (SQL, or a JSON `{viewOn, pipeline}` for MongoDB)
    pub definition: String,
    /// Use CREATE OR REPLACE where supported
    #[serde(default)]
    pub replace: bool,
    /// Use CREATE ... IF NOT EXISTS where supported
    #[serde(default)]
    pub if_not_exists: bool,
}

/// Server metadata gathered by `server_info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server version string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Additional backend-specific facts
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

/// Outcome of `test_connection`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    /// Connected and answered
    pub success: bool,
    /// Round trip in milliseconds
    pub latency_ms: u64,
    /// Server version, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// Metadata gathered from the server
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

/// Routine kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoutineKind {
    /// Stored procedure
    Procedure,
    /// Stored function
    Function,
}

impl RoutineKind {
    /// SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Procedure => "PROCEDURE",
            Self::Function => "FUNCTION",
        }
    }
}

/// Stored routine metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineInfo {
    /// Routine name
    pub name: String,
    /// Procedure or function
    pub kind: RoutineKind,
    /// Owning schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Return type for functions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Argument signature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Trigger metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    /// Trigger name
    pub name: String,
    /// Table the trigger fires on
    pub table: String,
    /// BEFORE / AFTER / INSTEAD OF
    pub timing: String,
    /// INSERT / UPDATE / DELETE
    pub event: String,
    /// Full definition where available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

/// Trigger specification for `create_trigger`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDefinition {
    /// Trigger name
    pub name: String,
    /// Table to attach to
    pub table: String,
    /// BEFORE / AFTER / INSTEAD OF
    pub timing: String,
    /// INSERT / UPDATE / DELETE
    pub event: String,
    /// Statement body (SQLite/MySQL) or function call (PostgreSQL)
    pub body: String,
}

/// Database user metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// User or role name
    pub name: String,
    /// Host restriction (MySQL) or owning database (MongoDB)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Granted roles or notable attributes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// User specification for `create_user`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinition {
    /// User name
    pub name: String,
    /// Password
    #[serde(default)]
    pub password: Option<crate::config::Secret>,
    /// Host restriction (MySQL)
    #[serde(default)]
    pub host: Option<String>,
    /// Roles to grant where supported
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Sequence metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceInfo {
    /// Sequence name
    pub name: String,
    /// Owning schema
    pub schema: String,
    /// Data type
    pub data_type: String,
    /// Start value
    pub start_value: String,
    /// Increment
    pub increment: String,
}

/// Partition metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    /// Partition name or id
    pub name: String,
    /// Partitioning method or expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Bound / description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Row estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

/// Scheduled event metadata (MySQL).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    /// Event name
    pub name: String,
    /// ONE TIME or RECURRING
    pub event_type: String,
    /// Schedule description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// ENABLED / DISABLED
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_database_type_serde_tags() {
        assert_eq!(serde_json::to_string(&DatabaseType::PostgreSql).unwrap(), "\"postgresql\"");
        assert_eq!(
            serde_json::from_str::<DatabaseType>("\"postgres\"").unwrap(),
            DatabaseType::PostgreSql
        );
        assert_eq!(
            serde_json::from_str::<DatabaseType>("\"clickhouse\"").unwrap(),
            DatabaseType::ClickHouse
        );
        for ty in DatabaseType::ALL {
            assert_eq!(ty.tag().parse::<DatabaseType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_filter_deserializes_operator_spelling() {
        let filter: Filter =
            serde_json::from_value(json!({"column": "age", "operator": ">", "value": 18})).unwrap();
        assert_eq!(filter.operator, FilterOperator::GreaterThan);
        let filter: Filter =
            serde_json::from_value(json!({"column": "x", "operator": "IS NOT NULL"})).unwrap();
        assert_eq!(filter.operator, FilterOperator::IsNotNull);
        assert!(filter.value.is_none());
    }

    #[test]
    fn test_query_result_error_shape() {
        let result = QueryResult::from_error("boom");
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 0);
        assert_eq!(result.affected_rows, 0);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_query_result_row_count_matches_rows() {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(1));
        let result = QueryResult::with_rows(vec![QueryColumn::new("id", "INTEGER")], vec![row]);
        assert_eq!(result.row_count, result.rows.len());
    }

    #[test]
    fn test_column_definition_full_type() {
        let mut column = ColumnDefinition::new("name", "VARCHAR");
        column.length = Some(255);
        assert_eq!(column.full_type(), "VARCHAR(255)");

        let mut column = ColumnDefinition::new("price", "DECIMAL");
        column.precision = Some(10);
        column.scale = Some(2);
        assert_eq!(column.full_type(), "DECIMAL(10, 2)");

        let column = ColumnDefinition::new("raw", "numeric(4,1)");
        assert_eq!(column.full_type(), "numeric(4,1)");
    }

    #[test]
    fn test_column_definition_defaults_nullable() {
        let column: ColumnDefinition =
            serde_json::from_value(json!({"name": "a", "type": "TEXT"})).unwrap();
        assert!(column.nullable);
        assert!(!column.primary_key);
    }

    #[test]
    fn test_unsupported_operation_result() {
        let result = SchemaOperationResult::unsupported("Foreign keys", DatabaseType::Redis);
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Foreign keys is not supported for Redis")
        );
    }
}
