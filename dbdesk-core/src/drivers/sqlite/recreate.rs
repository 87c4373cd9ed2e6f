//! Table recreation for schema changes SQLite cannot make in place.
//!
//! SQLite cannot retype a column, change nullability or uniqueness, or add or
//! drop foreign keys with ALTER TABLE. Those changes rebuild the table:
//!
//! snapshot → begin → create temp → copy → drop original → rename → reindex →
//! commit (or rollback)
//!
//! The statement list is computed up front by [`RecreatePlan::build`] and run
//! by [`run_plan`], which owns the single rollback path.

use crate::error::{DbDeskError, Result};
use crate::models::{
    ColumnDefinition, ColumnInfo, ForeignKeyDefinition, ForeignKeyInfo, IndexDefinition,
    IndexInfo, TableDefinition,
};
use crate::sql::{Dialect, ddl};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::pool::PoolConnection;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const AUTOINDEX_PREFIX: &str = "sqlite_autoindex_";

/// Introspected shape of a table before modification.
#[derive(Debug, Clone, Default)]
pub(crate) struct TableSnapshot {
    pub(crate) name: String,
    pub(crate) columns: Vec<ColumnInfo>,
    pub(crate) indexes: Vec<IndexInfo>,
    /// CREATE INDEX text of explicit indexes, by index name
    pub(crate) index_sql: BTreeMap<String, String>,
    pub(crate) foreign_keys: Vec<ForeignKeyInfo>,
    pub(crate) triggers: Vec<String>,
}

impl TableSnapshot {
    /// Reads columns, indexes, foreign keys and triggers.
    pub(crate) async fn capture(pool: &SqlitePool, table: &str) -> Result<Self> {
        Ok(Self {
            name: table.to_string(),
            columns: super::schema::get_columns(pool, table).await?,
            indexes: super::schema::get_indexes(pool, table).await?,
            index_sql: super::schema::index_sql(pool, table).await?,
            foreign_keys: super::schema::get_foreign_keys(pool, table).await?,
            triggers: super::schema::trigger_sql(pool, table).await?,
        })
    }
}

/// The requested change.
#[derive(Debug, Clone)]
pub(crate) enum Modification {
    AddColumn(ColumnDefinition),
    ModifyColumn {
        old_name: String,
        column: ColumnDefinition,
    },
    DropColumn(String),
    RenameColumn {
        old_name: String,
        new_name: String,
    },
    AddForeignKey(ForeignKeyDefinition),
    DropForeignKey(String),
}

fn definition_from(column: &ColumnInfo) -> ColumnDefinition {
    ColumnDefinition {
        name: column.name.clone(),
        data_type: column.data_type.clone(),
        length: column.length,
        precision: column.precision,
        scale: column.scale,
        nullable: column.nullable,
        default_value: column.default_value.clone(),
        unique: column.unique,
        auto_increment: column.auto_increment,
        primary_key: column.primary_key,
        comment: column.comment.clone(),
    }
}

/// Ordered statements rebuilding one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecreatePlan {
    pub(crate) statements: Vec<String>,
}

impl RecreatePlan {
    /// Computes the rebuild for `modification` applied to `snapshot`.
    pub(crate) fn build(snapshot: &TableSnapshot, modification: &Modification) -> Result<Self> {
        let dialect = Dialect::Sqlite;
        let table = snapshot.name.as_str();
        let temp_name = format!("{}__dbdesk_rebuild", table);

        // (new column definition, source column in the original table)
        let mut columns: Vec<(ColumnDefinition, Option<String>)> = snapshot
            .columns
            .iter()
            .map(|c| (definition_from(c), Some(c.name.clone())))
            .collect();
        let mut foreign_keys: Vec<ForeignKeyDefinition> = snapshot
            .foreign_keys
            .iter()
            .map(|fk| {
                let mut def = ForeignKeyDefinition::from(fk);
                def.name.clear();
                def
            })
            .collect();
        let mut renamed: Option<(String, String)> = None;
        let mut dropped: Option<String> = None;

        let position = |name: &str| columns_position(&snapshot.columns, name);

        match modification {
            Modification::AddColumn(column) => {
                if position(&column.name).is_some() {
                    return Err(DbDeskError::query(format!(
                        "duplicate column name: {}",
                        column.name
                    )));
                }
                columns.push((column.clone(), None));
            }
            Modification::ModifyColumn { old_name, column } => {
                let index = position(old_name).ok_or_else(|| no_such_column(old_name))?;
                let mut replacement = column.clone();
                // Key membership is a table property, not part of the column edit
                replacement.primary_key = snapshot.columns[index].primary_key;
                columns[index].0 = replacement;
                if old_name != &column.name {
                    renamed = Some((old_name.clone(), column.name.clone()));
                }
            }
            Modification::DropColumn(name) => {
                let index = position(name).ok_or_else(|| no_such_column(name))?;
                if columns.len() == 1 {
                    return Err(DbDeskError::query("cannot drop the only column of a table"));
                }
                columns.remove(index);
                foreign_keys.retain(|fk| !fk.columns.iter().any(|c| c == name));
                dropped = Some(name.clone());
            }
            Modification::RenameColumn { old_name, new_name } => {
                let index = position(old_name).ok_or_else(|| no_such_column(old_name))?;
                columns[index].0.name = new_name.clone();
                renamed = Some((old_name.clone(), new_name.clone()));
            }
            Modification::AddForeignKey(fk) => {
                for column in &fk.columns {
                    if position(column).is_none() {
                        return Err(no_such_column(column));
                    }
                }
                foreign_keys.push(fk.clone());
            }
            Modification::DropForeignKey(name) => {
                let before = foreign_keys.len();
                let kept: Vec<ForeignKeyDefinition> = snapshot
                    .foreign_keys
                    .iter()
                    .zip(foreign_keys)
                    .filter(|(info, _)| &info.name != name)
                    .map(|(_, def)| def)
                    .collect();
                if kept.len() == before {
                    return Err(DbDeskError::query(format!("no such foreign key: {}", name)));
                }
                foreign_keys = kept;
            }
        }

        let rename_column = |name: &str| -> String {
            match &renamed {
                Some((old, new)) if old == name => new.clone(),
                _ => name.to_string(),
            }
        };
        for fk in &mut foreign_keys {
            fk.columns = fk.columns.iter().map(|c| rename_column(c)).collect();
        }

        // Single-column UNIQUE constraints travel with the column definition
        let unique_constraints: Vec<Vec<String>> = snapshot
            .indexes
            .iter()
            .filter(|i| i.unique && !i.primary && i.columns.len() > 1)
            .filter(|i| i.name.starts_with(AUTOINDEX_PREFIX))
            .filter(|i| {
                let survives = dropped.as_ref().is_none_or(|d| !i.columns.contains(d));
                if !survives {
                    debug!("Dropping UNIQUE constraint {} with its column", i.name);
                }
                survives
            })
            .map(|i| i.columns.iter().map(|c| rename_column(c)).collect())
            .collect();

        let definition = TableDefinition {
            name: temp_name.clone(),
            columns: columns.iter().map(|(c, _)| c.clone()).collect(),
            foreign_keys,
            unique_constraints,
            ..Default::default()
        };

        let copied: Vec<&(ColumnDefinition, Option<String>)> =
            columns.iter().filter(|(_, source)| source.is_some()).collect();
        let target_list = copied
            .iter()
            .map(|(c, _)| dialect.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let source_list = copied
            .iter()
            .filter_map(|(_, source)| source.as_deref())
            .map(|s| dialect.quote_ident(s))
            .collect::<Vec<_>>()
            .join(", ");

        let mut statements = vec![
            ddl::create_table(dialect, &definition),
            format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                dialect.quote_ident(&temp_name),
                target_list,
                source_list,
                dialect.quote_ident(table)
            ),
            format!("DROP TABLE {}", dialect.quote_ident(table)),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                dialect.quote_ident(&temp_name),
                dialect.quote_ident(table)
            ),
        ];

        for index in &snapshot.indexes {
            if index.primary || index.name.starts_with(AUTOINDEX_PREFIX) {
                continue;
            }
            let original = snapshot.index_sql.get(&index.name);
            if let Some(dropped) = &dropped {
                let on_dropped = match original {
                    Some(sql) => references_column(sql, dropped),
                    None => index.columns.iter().any(|c| c == dropped),
                };
                if on_dropped {
                    debug!("Skipping index {} on dropped column {}", index.name, dropped);
                    continue;
                }
            }
            let statement = match (original, &renamed) {
                (Some(sql), Some((old, new))) => rename_in_index(sql, old, new),
                (Some(sql), None) => sql.clone(),
                (None, _) => ddl::create_index(
                    dialect,
                    table,
                    &IndexDefinition {
                        name: index.name.clone(),
                        columns: index.columns.iter().map(|c| rename_column(c)).collect(),
                        unique: index.unique,
                        index_type: None,
                    },
                ),
            };
            statements.push(statement);
        }
        statements.extend(snapshot.triggers.iter().cloned());

        Ok(Self { statements })
    }

    /// Statements joined for display.
    pub(crate) fn to_sql(&self) -> String {
        self.statements.join(";\n")
    }
}

/// Rewrites the identifiers after the first unquoted `(` of a CREATE INDEX
/// statement, which covers the indexed terms and any WHERE clause.
///
/// String literals and everything before the column list (index and table
/// names) are copied untouched.
fn map_index_identifiers(sql: &str, mut visit: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_body = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        match ch {
            '\'' => {
                let mut end = sql.len();
                while let Some((i, c)) = chars.next() {
                    if c == '\'' {
                        if chars.peek().is_some_and(|&(_, n)| n == '\'') {
                            chars.next();
                            continue;
                        }
                        end = i + 1;
                        break;
                    }
                }
                out.push_str(&sql[start..end]);
            }
            '"' | '`' | '[' => {
                let close = if ch == '[' { ']' } else { ch };
                let mut name = String::new();
                let mut end = sql.len();
                while let Some((i, c)) = chars.next() {
                    if c == close {
                        if close != ']' && chars.peek().is_some_and(|&(_, n)| n == close) {
                            chars.next();
                            name.push(c);
                            continue;
                        }
                        end = i + 1;
                        break;
                    }
                    name.push(c);
                }
                match in_body.then(|| visit(&name)).flatten() {
                    Some(replacement) => out.push_str(&replacement),
                    None => out.push_str(&sql[start..end]),
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, n)) = chars.peek() {
                    if !(n.is_ascii_alphanumeric() || n == '_' || n == '$') {
                        break;
                    }
                    end = i + n.len_utf8();
                    chars.next();
                }
                let word = &sql[start..end];
                match in_body.then(|| visit(word)).flatten() {
                    Some(replacement) => out.push_str(&replacement),
                    None => out.push_str(word),
                }
            }
            '(' => {
                in_body = true;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Whether an index definition mentions `column` in its terms or predicate.
fn references_column(sql: &str, column: &str) -> bool {
    let mut found = false;
    map_index_identifiers(sql, |name| {
        found |= name.eq_ignore_ascii_case(column);
        None
    });
    found
}

/// Index definition with `old` renamed to `new`, keeping every other term.
fn rename_in_index(sql: &str, old: &str, new: &str) -> String {
    map_index_identifiers(sql, |name| {
        name.eq_ignore_ascii_case(old)
            .then(|| Dialect::Sqlite.quote_ident(new))
    })
}

fn columns_position(columns: &[ColumnInfo], name: &str) -> Option<usize> {
    columns.iter().position(|c| c.name == name)
}

fn no_such_column(name: &str) -> DbDeskError {
    DbDeskError::query(format!("no such column: {}", name))
}

/// Whether an in-place ALTER failure should fall back to recreation.
pub(crate) fn needs_recreate(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("no such column") || lowered.contains("syntax error")
}

/// Transaction primitives a plan runs against.
#[async_trait]
pub(crate) trait PlanExecutor: Send {
    async fn begin(&mut self) -> Result<()>;
    async fn exec(&mut self, sql: &str) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}

/// Runs a plan in one transaction.
///
/// On any failure the transaction is rolled back and the original error is
/// returned; a failing rollback is only logged.
pub(crate) async fn run_plan<E: PlanExecutor + ?Sized>(
    executor: &mut E,
    plan: &RecreatePlan,
) -> Result<()> {
    executor.begin().await?;

    let mut outcome = Ok(());
    for statement in &plan.statements {
        debug!("Recreate step: {}", statement);
        if let Err(e) = executor.exec(statement).await {
            outcome = Err(e);
            break;
        }
    }
    if outcome.is_ok() {
        outcome = executor.commit().await;
    }

    if let Err(original) = outcome {
        if let Err(rollback_error) = executor.rollback().await {
            warn!("Rollback after failed table rebuild also failed: {}", rollback_error);
        }
        return Err(original);
    }
    Ok(())
}

/// Runs plans on one pooled SQLite connection.
///
/// Foreign key enforcement is switched off for the rebuild and legacy ALTER
/// semantics are switched on so views referencing the table survive the
/// rename; both are restored when the executor is finished.
pub(crate) struct SqliteExecutor {
    connection: PoolConnection<sqlx::Sqlite>,
}

impl SqliteExecutor {
    pub(crate) async fn acquire(pool: &SqlitePool) -> Result<Self> {
        let mut connection = pool.acquire().await?;
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *connection)
            .await?;
        sqlx::query("PRAGMA legacy_alter_table = ON")
            .execute(&mut *connection)
            .await?;
        Ok(Self { connection })
    }

    pub(crate) async fn finish(mut self) {
        for pragma in ["PRAGMA legacy_alter_table = OFF", "PRAGMA foreign_keys = ON"] {
            if let Err(e) = sqlx::query(pragma).execute(&mut *self.connection).await {
                warn!("Failed to restore '{}': {}", pragma, e);
            }
        }
    }
}

#[async_trait]
impl PlanExecutor for SqliteExecutor {
    async fn begin(&mut self) -> Result<()> {
        self.exec("BEGIN").await
    }

    async fn exec(&mut self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *self.connection).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.exec("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.exec("ROLLBACK").await
    }
}
