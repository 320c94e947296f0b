// migrateコマンドハンドラー
//
// スクリプトディレクトリの未適用スクリプトをデータベースに適用します。
// - 設定ファイルの読み込みとコマンドライン引数による上書き
// - 必要に応じたデータベースの作成（--ensure-db-exists）
// - マイグレーションの実行と結果の表示

use crate::cli::commands::{render_output, CommandOutput};
use crate::cli::OutputFormat;
use crate::core::config::{HashCheck, MigratorConfig, ProviderKind, TransactionMode};
use crate::core::error::ConnectionFailedError;
use crate::core::migration::DatabaseUpgradeResult;
use crate::core::naming::CONFIG_FILE;
use crate::services::migrator::Migrator;
use anyhow::{anyhow, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CONNECTION_HINT: &str = "Please check the connection string for errors or use the --ensure-db-exists flag to create the db.";

/// migrateコマンドの出力構造体
#[derive(Debug, Clone, Serialize)]
pub struct MigrateOutput {
    /// 成功したかどうか
    pub successful: bool,
    /// プロバイダー種別
    pub provider: ProviderKind,
    /// この実行でデータベースを作成したかどうか
    pub database_created: bool,
    /// 適用されたスクリプト数
    pub applied_count: usize,
    /// 適用されたスクリプト（適用順）
    pub scripts_applied: Vec<String>,
    /// 警告メッセージ
    pub warnings: Vec<String>,
    /// エラーメッセージ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrateOutput {
    /// 実行結果から出力を作成
    pub fn from_result(
        provider: ProviderKind,
        database_created: bool,
        result: &DatabaseUpgradeResult,
    ) -> Self {
        let warnings = result
            .warnings
            .iter()
            .map(|w| w.format())
            .chain(result.drift.iter().map(|d| format!("Warning: {}", d)))
            .collect();

        Self {
            successful: result.successful,
            provider,
            database_created,
            applied_count: result.applied_count(),
            scripts_applied: result
                .scripts_applied
                .iter()
                .map(|id| id.to_string())
                .collect(),
            warnings,
            error: result.error.as_ref().map(|e| e.to_string()),
        }
    }
}

impl CommandOutput for MigrateOutput {
    fn to_text(&self) -> String {
        let mut lines = Vec::new();

        if self.database_created {
            lines.push("Created database.".to_string());
        }

        for warning in &self.warnings {
            lines.push(warning.yellow().to_string());
        }

        if self.successful {
            lines.push("Success!".green().bold().to_string());
        } else {
            lines.push("Failed!".red().bold().to_string());
        }

        if self.scripts_applied.is_empty() {
            if self.successful {
                lines.push("No new scripts need to be executed. Database is up to date.".to_string());
            }
        } else {
            lines.push(format!("Applied {} script(s):", self.applied_count));
            for script in &self.scripts_applied {
                lines.push(format!("  {}", script.cyan()));
            }
        }

        lines.join("\n")
    }
}

/// migrateコマンドの入力パラメータ
#[derive(Debug, Clone)]
pub struct MigrateCommand {
    /// 作業ディレクトリ（設定ファイルとスクリプトディレクトリの基準）
    pub project_path: PathBuf,
    /// 接続文字列
    pub connection_string: String,
    /// プロバイダー種別
    pub provider: ProviderKind,
    /// スクリプトディレクトリ
    pub scripts_path: PathBuf,
    /// カスタム設定ファイルパス
    pub config_path: Option<PathBuf>,
    /// データベースが存在しなければ作成する
    pub ensure_db_exists: bool,
    /// 内容ハッシュ検証ポリシー（設定ファイルより優先）
    pub hash_check: Option<HashCheck>,
    /// トランザクションを使用しない
    pub no_transaction: bool,
    /// 出力フォーマット
    pub format: OutputFormat,
    /// キャンセルトークン（Ctrl-C）
    pub cancellation: Option<CancellationToken>,
}

/// migrateコマンドハンドラー
#[derive(Debug, Default)]
pub struct MigrateCommandHandler {}

impl MigrateCommandHandler {
    /// 新しいMigrateCommandHandlerを作成
    pub fn new() -> Self {
        Self {}
    }

    /// migrateコマンドを実行
    ///
    /// # Arguments
    ///
    /// * `command` - migrateコマンドのパラメータ
    ///
    /// # Returns
    ///
    /// 成功時は適用結果の表示文字列、失敗時はエラー
    pub async fn execute(&self, command: &MigrateCommand) -> Result<String> {
        let config = self.load_config(command)?;
        debug!(?config, "Resolved migrator config");

        let mut migrator =
            Migrator::new(command.provider, command.connection_string.as_str()).with_config(config);
        if let Some(token) = &command.cancellation {
            migrator = migrator.with_cancellation(token.clone());
        }

        let mut database_created = false;
        if command.ensure_db_exists {
            database_created = migrator
                .ensure_database_exists()
                .await
                .map_err(|e| connection_failure(e, command.ensure_db_exists))?;
            if database_created {
                info!("Created database");
            }
        }

        let scripts_path = resolve_path(&command.project_path, &command.scripts_path);
        debug!(scripts = %scripts_path.display(), "Resolved scripts directory");

        let result = migrator
            .migrate(&scripts_path)
            .await
            .map_err(|e| connection_failure(e, command.ensure_db_exists))?;

        let output = MigrateOutput::from_result(command.provider, database_created, &result);
        let rendered = render_output(&output, &command.format)?;

        match &result.error {
            None => Ok(rendered),
            Some(error) => {
                match command.format {
                    OutputFormat::Json => println!("{}", rendered),
                    OutputFormat::Text => eprintln!("{}", rendered),
                }
                Err(anyhow!("Migration failed: {}", error))
            }
        }
    }

    /// 設定ファイルを読み込み、コマンドライン引数で上書きする
    ///
    /// 設定ファイルが指定されていない場合は作業ディレクトリの `.db-migrate.yaml` を探し、
    /// 見つからなければ既定値を使用します。
    pub fn load_config(&self, command: &MigrateCommand) -> Result<MigratorConfig> {
        let path = match &command.config_path {
            Some(path) => Some(resolve_path(&command.project_path, path)),
            None => {
                let default_path = command.project_path.join(CONFIG_FILE);
                default_path.exists().then_some(default_path)
            }
        };

        let mut config = match path {
            Some(path) => MigratorConfig::from_file(&path)?,
            None => MigratorConfig::default(),
        };

        if let Some(hash_check) = command.hash_check {
            config.hash_check = hash_check;
        }
        if command.no_transaction {
            config.transaction = TransactionMode::None;
        }

        Ok(config)
    }
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn connection_failure(error: ConnectionFailedError, ensure_db_exists: bool) -> anyhow::Error {
    if ensure_db_exists {
        anyhow!("{}", error)
    } else {
        anyhow!("{}\n{}", error, CONNECTION_HINT)
    }
}
