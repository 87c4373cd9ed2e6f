//! Command-line front end for the dbdesk driver layer.
//!
//! Opens one connection per invocation, runs a single operation and prints
//! the result as JSON on stdout. Logs go to stderr.
//!
//! # Security
//! - The password comes from `DBDESK_PASSWORD` or the config file and is
//!   hidden from `--help`
//! - Connection strings are redacted before they are logged

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dbdesk_core::{
    ConnectionConfig, DataOptions, DatabaseDriver, DatabaseType, Filter, SortDirection, SslMode,
    create_driver, error::redact_database_url, logging::init_logging, test_connection,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "dbdesk")]
#[command(about = "Run driver operations against a database")]
#[command(version)]
#[command(long_about = "
dbdesk - one driver contract, six backends

Connects with the settings from --config or the connection flags, runs one
operation and prints the result as JSON.

SUPPORTED DATABASES:
- SQLite (--type sqlite --file path.db)
- MySQL, PostgreSQL
- ClickHouse (HTTP interface)
- MongoDB (shell commands such as db.users.find({}))
- Redis (raw commands such as HGETALL user:1)

EXAMPLES:
  dbdesk --type sqlite --file app.db tables
  DBDESK_PASSWORD=secret dbdesk --type postgresql --host db --user app exec 'SELECT 1'
  dbdesk --config conn.json data users --limit 20 --sort created_at --desc
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Connect, report server metadata and latency, disconnect
    Test,
    /// Run a command or SQL batch
    Exec {
        /// Command text in the backend's native language
        command: String,
    },
    /// List databases on the server
    Databases,
    /// List tables and views (key patterns for Redis)
    Tables,
    /// Describe the columns of a table
    Columns {
        /// Table, collection or key pattern
        table: String,
    },
    /// Print the DDL of a table
    Ddl {
        /// Table or collection
        table: String,
    },
    /// Browse rows of a table
    Data(DataArgs),
}

#[derive(Args)]
pub struct DataArgs {
    /// Table, collection or key pattern
    pub table: String,

    /// Rows per page (backend default when absent)
    #[arg(long)]
    pub limit: Option<u64>,

    /// Rows to skip
    #[arg(long)]
    pub offset: Option<u64>,

    /// Column to sort by
    #[arg(long)]
    pub sort: Option<String>,

    /// Sort descending
    #[arg(long, requires = "sort")]
    pub desc: bool,

    /// Filter as JSON, e.g. '{"column":"age","operator":">","value":30}'
    #[arg(long = "filter")]
    pub filters: Vec<String>,
}

#[derive(Args)]
pub struct ConnectionArgs {
    /// Connection config as a JSON file
    #[arg(long, conflicts_with_all = ["database_type", "host", "file"])]
    pub config: Option<PathBuf>,

    /// Backend type
    #[arg(long = "type", value_enum)]
    pub database_type: Option<Backend>,

    /// Server host or connection string
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Database, schema or logical database index
    #[arg(long)]
    pub database: Option<String>,

    /// Login name
    #[arg(long)]
    pub user: Option<String>,

    /// Database file for SQLite
    #[arg(long)]
    pub file: Option<String>,

    /// TLS mode
    #[arg(long, value_enum)]
    pub ssl_mode: Option<TlsMode>,

    /// CA certificate (PEM text or file path)
    #[arg(long)]
    pub ssl_ca: Option<String>,

    /// Skip certificate validation under `require`
    #[arg(long)]
    pub insecure: bool,

    /// Connect timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Password
    #[arg(long, env = "DBDESK_PASSWORD", hide_env_values = true, hide = true)]
    pub password: Option<String>,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all logs except errors")]
    pub quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Backend {
    Sqlite,
    Mysql,
    #[value(alias = "postgres")]
    Postgresql,
    Clickhouse,
    Mongodb,
    Redis,
}

impl From<Backend> for DatabaseType {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Sqlite => Self::Sqlite,
            Backend::Mysql => Self::MySql,
            Backend::Postgresql => Self::PostgreSql,
            Backend::Clickhouse => Self::ClickHouse,
            Backend::Mongodb => Self::MongoDb,
            Backend::Redis => Self::Redis,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TlsMode {
    Disable,
    Require,
    VerifyCa,
    VerifyFull,
    Prefer,
}

impl From<TlsMode> for SslMode {
    fn from(mode: TlsMode) -> Self {
        match mode {
            TlsMode::Disable => Self::Disable,
            TlsMode::Require => Self::Require,
            TlsMode::VerifyCa => Self::VerifyCa,
            TlsMode::VerifyFull => Self::VerifyFull,
            TlsMode::Prefer => Self::Prefer,
        }
    }
}

/// Reads a connection config from a JSON file.
fn load_config(path: &Path) -> anyhow::Result<ConnectionConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ConnectionConfig = serde_json::from_str(&text)
        .with_context(|| format!("Invalid connection config in {}", path.display()))?;
    Ok(config)
}

/// Builds the connection config from a file or from flags.
fn build_config(args: &ConnectionArgs) -> anyhow::Result<ConnectionConfig> {
    let mut config = match (&args.config, args.database_type) {
        (Some(path), _) => load_config(path)?,
        (None, Some(backend)) => ConnectionConfig::new(backend.into()),
        (None, None) => bail!("Either --config or --type is required"),
    };

    if let Some(host) = &args.host {
        config = config.with_host(host);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if let Some(database) = &args.database {
        config = config.with_database(database);
    }
    if let Some(user) = &args.user {
        config = config.with_username(user);
    }
    if let Some(file) = &args.file {
        config = config.with_file_path(file);
    }
    if let Some(password) = &args.password {
        config = config.with_password(password);
    }
    if let Some(timeout) = args.timeout {
        config.connect_timeout_secs = Some(timeout);
    }
    if args.ssl_mode.is_some() || args.ssl_ca.is_some() || args.insecure {
        let mut ssl = config.ssl_config.clone().unwrap_or_default();
        if let Some(mode) = args.ssl_mode {
            ssl.mode = mode.into();
        }
        if let Some(ca) = &args.ssl_ca {
            ssl.ca = Some(ca.clone());
        }
        if args.insecure {
            ssl.reject_unauthorized = Some(false);
        }
        config = config.with_ssl_config(ssl);
    }
    Ok(config)
}

fn data_options(args: &DataArgs) -> anyhow::Result<DataOptions> {
    let filters = args
        .filters
        .iter()
        .map(|raw| {
            serde_json::from_str::<Filter>(raw).with_context(|| format!("Invalid filter: {}", raw))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(DataOptions {
        filters,
        sort_column: args.sort.clone(),
        sort_direction: if args.desc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        },
        limit: args.limit,
        offset: args.offset,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs one operation on a connected driver. Returns whether it succeeded.
async fn run(driver: &dyn DatabaseDriver, command: &Command) -> anyhow::Result<bool> {
    match command {
        Command::Test => {
            print_json(&driver.server_info().await?)?;
            Ok(true)
        }
        Command::Exec { command } => {
            let result = driver.execute(command, &[]).await;
            print_json(&result)?;
            Ok(!result.is_error())
        }
        Command::Databases => {
            print_json(&driver.get_databases().await?)?;
            Ok(true)
        }
        Command::Tables => {
            print_json(&driver.get_tables().await?)?;
            Ok(true)
        }
        Command::Columns { table } => {
            print_json(&driver.get_columns(table).await?)?;
            Ok(true)
        }
        Command::Ddl { table } => {
            println!("{}", driver.get_table_ddl(table).await?);
            Ok(true)
        }
        Command::Data(args) => {
            let options = data_options(args)?;
            let result = driver.get_table_data(&args.table, &options).await;
            print_json(&result)?;
            Ok(!result.is_error())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    let config = build_config(&cli.connection)?;
    if let Some(host) = &config.host {
        debug!("Target host: {}", redact_database_url(host));
    }

    if let Command::Test = cli.command {
        info!("Testing connection to {}", config);
        let result = test_connection(&config).await?;
        print_json(&result)?;
        return Ok(());
    }

    let mut driver = create_driver(config.database_type)?;
    driver.connect(&config).await?;
    let outcome = run(driver.as_ref(), &cli.command).await;
    driver.disconnect().await;

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("dbdesk").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_config_from_flags() {
        let cli = parse(&[
            "--type", "postgres", "--host", "db", "--port", "6543", "--user", "app",
            "--ssl-mode", "verify-full", "tables",
        ]);
        let config = build_config(&cli.connection).unwrap();
        assert_eq!(config.database_type, DatabaseType::PostgreSql);
        assert_eq!(config.host.as_deref(), Some("db"));
        assert_eq!(config.port, Some(6543));
        assert_eq!(config.username.as_deref(), Some("app"));
        assert_eq!(config.ssl_config.unwrap().mode, SslMode::VerifyFull);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"type":"sqlite","filePath":"/tmp/app.db","connectTimeoutSecs":3}"#,
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let cli = parse(&["--config", &path, "--database", "main", "test"]);
        let config = build_config(&cli.connection).unwrap();
        assert_eq!(config.database_type, DatabaseType::Sqlite);
        assert_eq!(config.file_path.as_deref(), Some("/tmp/app.db"));
        assert_eq!(config.database.as_deref(), Some("main"));
        assert_eq!(config.connect_timeout_secs, Some(3));
    }

    #[test]
    fn test_missing_backend_is_an_error() {
        let cli = parse(&["tables"]);
        assert!(build_config(&cli.connection).is_err());
    }

    #[test]
    fn test_data_options_from_flags() {
        let cli = parse(&[
            "--type", "redis", "data", "user:*", "--limit", "5", "--sort", "key", "--desc",
            "--filter", r#"{"column":"type","operator":"=","value":"hash"}"#,
        ]);
        let Command::Data(args) = &cli.command else {
            panic!("expected data command");
        };
        let options = data_options(args).unwrap();
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.sort_direction, SortDirection::Desc);
        assert_eq!(options.filters.len(), 1);
        assert_eq!(options.filters[0].column, "type");
    }

    #[test]
    fn test_bad_filter_is_rejected() {
        let cli = parse(&["--type", "sqlite", "data", "t", "--filter", "age > 3"]);
        let Command::Data(args) = &cli.command else {
            panic!("expected data command");
        };
        assert!(data_options(args).is_err());
    }
}
