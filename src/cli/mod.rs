// CLI Layer
// ユーザー入力の受付とコマンドルーティング

pub mod commands;

use crate::core::config::{HashCheck, ProviderKind};
use crate::core::naming::{APP_NAME, DEFAULT_SCRIPTS_DIR};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// 出力フォーマット
#[derive(Clone, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output (default)
    #[default]
    Text,
    /// Structured JSON output
    Json,
}

/// db-migrate - SQL change script deployment
///
/// Applies versioned SQL scripts to a database exactly once, in order,
/// and records each applied script in a journal table.
#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(author = "db-migrate Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy versioned SQL change scripts to a database")]
#[command(long_about = "db-migrate - SQL change script deployment

Applies every script in the scripts directory that has not been applied yet,
in order, and records each one in the migration_journal table.
Scripts that were already applied are never run again.

Supported databases: SQL Server, PostgreSQL, SQLite")]
#[command(after_help = "EXAMPLES:
  # SQL Server (default provider)
  db-migrate \"Server=localhost;Database=app;User Id=sa;Password=...\"

  # PostgreSQL, creating the database first if it does not exist
  db-migrate \"Host=localhost;Database=app;Username=postgres;Password=...\" -p postgres --ensure-db-exists

  # SQLite with a custom scripts directory
  db-migrate app.db -p sqlite -s db/scripts")]
pub struct Cli {
    /// Connection string for the target database
    #[arg(value_name = "CONNECTION_STRING")]
    pub connection_string: String,

    /// Database provider (mssql, postgres, sqlite)
    #[arg(short, long, value_name = "PROVIDER", default_value = "mssql")]
    pub provider: ProviderKind,

    /// Directory containing the change scripts
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_SCRIPTS_DIR)]
    pub scripts: PathBuf,

    /// Create the target database if it does not exist
    #[arg(long)]
    pub ensure_db_exists: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verify applied scripts have not changed (off, warn, strict)
    #[arg(long, value_name = "MODE")]
    pub hash_check: Option<HashCheck>,

    /// Run scripts without wrapping each one in a transaction
    #[arg(long)]
    pub no_transaction: bool,

    /// Output format (text or json)
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}
