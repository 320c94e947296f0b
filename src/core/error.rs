// エラー型定義
//
// マイグレーションエンジン全体で使用されるエラー型を提供します。
// thiserrorを使用して、ConnectionFailedError, MigrationError, DatabaseError などを定義します。

use crate::core::config::ProviderKind;
use crate::core::script::ScriptId;
use thiserror::Error;

/// 接続失敗エラー
///
/// サーバーに到達できない、認証が拒否された、データベースが存在しない場合に
/// `connect` / `migrate` / `ensure_database_exists` から返されます。
#[derive(Debug, Clone, Error)]
#[error("Failed to connect to {provider} database: {message} (cause: {cause})")]
pub struct ConnectionFailedError {
    /// プロバイダー種別
    pub provider: ProviderKind,
    /// エラーメッセージ
    pub message: String,
    /// ドライバーが返したエラー原因
    pub cause: String,
    /// 対象データベースが存在しない可能性が高いかどうか
    pub missing_database: bool,
}

impl ConnectionFailedError {
    pub fn new(provider: ProviderKind, message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            provider,
            message: message.into(),
            cause: cause.into(),
            missing_database: false,
        }
    }

    /// データベース未作成が原因であることを示す
    pub fn with_missing_database(mut self, missing: bool) -> Self {
        self.missing_database = missing;
        self
    }

    /// `--ensure-db-exists` による作成を提案すべきかどうか
    pub fn suggests_provisioning(&self) -> bool {
        self.missing_database
    }
}

/// スクリプト実行エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Script '{script_id}' failed at batch {batch_index}: {cause}")]
pub struct ScriptExecutionError {
    /// 失敗したスクリプト
    pub script_id: ScriptId,
    /// 失敗したバッチの位置（0始まり）
    pub batch_index: usize,
    /// ドライバーが返したエラー原因
    pub cause: String,
}

impl ScriptExecutionError {
    pub fn new(script_id: ScriptId, batch_index: usize, cause: impl Into<String>) -> Self {
        Self {
            script_id,
            batch_index,
            cause: cause.into(),
        }
    }
}

/// 適用済みスクリプトの削除警告
///
/// ジャーナルに記録されているが、スクリプトディレクトリに存在しない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingScriptWarning {
    pub script_id: ScriptId,
}

impl MissingScriptWarning {
    pub fn new(script_id: ScriptId) -> Self {
        Self { script_id }
    }

    pub fn format(&self) -> String {
        format!(
            "Warning: script '{}' is recorded in the journal but no longer exists in the scripts directory",
            self.script_id
        )
    }
}

/// スクリプトの内容変更（ドリフト）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Script '{script_id}' has changed since it was applied (recorded hash: {recorded_hash}, current hash: {current_hash})")]
pub struct ScriptDriftError {
    pub script_id: ScriptId,
    pub recorded_hash: String,
    pub current_hash: String,
}

/// マイグレーションエラー
///
/// `DatabaseUpgradeResult.error` として報告される致命的なエラー。
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    /// スクリプトディレクトリが存在しない、または読めない
    #[error("Scripts directory not found or not readable: {path} (cause: {cause})")]
    SourceNotFound {
        /// ディレクトリパス
        path: String,
        /// エラー原因
        cause: String,
    },

    /// スクリプトファイルを読めない、またはUTF-8でない
    #[error("Failed to read script: {path} (cause: {cause})")]
    InvalidScript {
        /// ファイルパス
        path: String,
        /// エラー原因
        cause: String,
    },

    /// ジャーナルテーブルの作成に失敗
    #[error("Failed to initialize the migration journal: {cause}")]
    JournalInit {
        /// エラー原因
        cause: String,
    },

    /// ジャーナルの読み込みに失敗
    #[error("Failed to read the migration journal: {cause}")]
    JournalRead {
        /// エラー原因
        cause: String,
    },

    /// ジャーナルへの書き込みに失敗
    #[error("Failed to record script '{script_id}' in the migration journal: {cause}")]
    JournalWrite {
        /// 記録しようとしたスクリプト
        script_id: ScriptId,
        /// エラー原因
        cause: String,
    },

    /// スクリプト適用後のコミットに失敗
    #[error("Failed to commit script '{script_id}': {cause}")]
    Commit {
        /// コミットしようとしたスクリプト
        script_id: ScriptId,
        /// エラー原因
        cause: String,
    },

    /// プランの整合性エラー（重複した識別子など）
    #[error("Migration plan is inconsistent for script '{script_id}': {message}")]
    PlanConsistency {
        /// 対象スクリプト
        script_id: ScriptId,
        /// エラーメッセージ
        message: String,
    },

    /// 厳格モードでのドリフト検出
    #[error(transparent)]
    ScriptDrift(ScriptDriftError),

    /// スクリプトの実行に失敗
    #[error("{error}")]
    ScriptExecution {
        /// 実行エラー
        error: ScriptExecutionError,
        /// このエラーより前に適用されたスクリプト
        applied_before: Vec<ScriptId>,
        /// 失敗の記録自体が失敗した場合のエラー
        journal_error: Option<String>,
    },

    /// アドバイザリロックの取得に失敗
    #[error("Failed to acquire the migration lock: {cause}")]
    Lock {
        /// エラー原因
        cause: String,
    },

    /// キャンセルされた（スクリプト間で停止）
    #[error("Migration was cancelled after {} script(s) were applied", .applied_before.len())]
    Cancelled {
        /// キャンセル前に適用されたスクリプト
        applied_before: Vec<ScriptId>,
    },
}

impl MigrationError {
    /// 失敗したスクリプトの識別子（スクリプトに紐づくエラーのみ）
    pub fn script_id(&self) -> Option<&ScriptId> {
        match self {
            MigrationError::JournalWrite { script_id, .. }
            | MigrationError::Commit { script_id, .. }
            | MigrationError::PlanConsistency { script_id, .. } => Some(script_id),
            MigrationError::ScriptDrift(drift) => Some(&drift.script_id),
            MigrationError::ScriptExecution { error, .. } => Some(&error.script_id),
            _ => None,
        }
    }

    /// スクリプト実行エラーかどうか
    pub fn is_script_execution(&self) -> bool {
        matches!(self, MigrationError::ScriptExecution { .. })
    }

    /// プラン整合性エラーかどうか
    pub fn is_plan_consistency(&self) -> bool {
        matches!(self, MigrationError::PlanConsistency { .. })
    }

    /// ソース未検出エラーかどうか
    pub fn is_source_not_found(&self) -> bool {
        matches!(self, MigrationError::SourceNotFound { .. })
    }

    /// キャンセルかどうか
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrationError::Cancelled { .. })
    }
}

/// データベースエラー
///
/// プロバイダーが返す低レベルのエラー。ジャーナルストアが MigrationError に変換します。
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection error
    #[error("Database connection error: {message} (cause: {cause})")]
    Connection {
        /// エラーメッセージ
        message: String,
        /// エラー原因
        cause: String,
    },

    /// Query execution error
    #[error("Query execution error: {message}")]
    Query {
        /// エラーメッセージ
        message: String,
        /// 失敗したSQL
        sql: Option<String>,
    },

    /// Transaction error
    #[error("Transaction error: {message}")]
    Transaction {
        /// エラーメッセージ
        message: String,
    },

    /// Unique constraint violation
    #[error("Unique constraint violation: {message}")]
    UniqueViolation {
        /// エラーメッセージ
        message: String,
    },
}

impl DatabaseError {
    /// 接続エラーかどうか
    pub fn is_connection(&self) -> bool {
        matches!(self, DatabaseError::Connection { .. })
    }

    /// クエリエラーかどうか
    pub fn is_query(&self) -> bool {
        matches!(self, DatabaseError::Query { .. })
    }

    /// トランザクションエラーかどうか
    pub fn is_transaction(&self) -> bool {
        matches!(self, DatabaseError::Transaction { .. })
    }

    /// 一意制約違反かどうか
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DatabaseError::UniqueViolation { .. })
    }
}
