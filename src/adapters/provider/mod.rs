// データベースプロバイダー
//
// 接続、アドバイザリロック、スクリプト実行、ジャーナルの読み書きといった
// 方言固有の処理を DatabaseProvider トレイトで抽象化します。
// プロバイダーは ProviderKind で明示的に選択されます。

pub mod mssql;
pub mod postgres;
pub mod sqlite;

pub use mssql::MsSqlProvider;
pub use postgres::PostgresProvider;
pub use sqlite::SqliteProvider;

use crate::adapters::batch_splitter::split_batches;
use crate::adapters::journal_sql::JournalSqlGenerator;
use crate::core::config::ProviderKind;
use crate::core::error::{ConnectionFailedError, DatabaseError, ScriptExecutionError};
use crate::core::journal::JournalEntry;
use crate::core::script::ScriptUnit;
use async_trait::async_trait;
use tracing::debug;

/// データベースプロバイダー
///
/// 1つの接続（セッション）を保持し、マイグレーション実行中はその接続だけを使う。
/// アドバイザリロックはセッションに紐づくため、接続が切れればサーバー側で解放される。
#[async_trait]
pub trait DatabaseProvider: Send {
    /// プロバイダー種別
    fn kind(&self) -> ProviderKind;

    /// バッチ区切り（`GO`）をサポートするかどうか
    fn supports_batch_separator(&self) -> bool {
        false
    }

    /// マイグレーション実行用のアドバイザリロックを取得（取得できるまで待つ）
    async fn acquire_lock(&mut self) -> Result<(), DatabaseError>;

    /// アドバイザリロックを解放
    async fn release_lock(&mut self) -> Result<(), DatabaseError>;

    /// 1つのバッチを実行
    async fn execute_batch(&mut self, sql: &str) -> Result<(), DatabaseError>;

    /// 結果を返さない単一の制御文（DDL、トランザクション制御）を実行
    async fn execute_statement(&mut self, sql: &str) -> Result<(), DatabaseError>;

    /// ジャーナルを読み込む
    async fn fetch_journal(&mut self, sql: &str) -> Result<Vec<JournalEntry>, DatabaseError>;

    /// ジャーナルに1件記録する
    ///
    /// 一意制約違反は `DatabaseError::UniqueViolation` として返すこと。
    async fn insert_journal(&mut self, sql: &str, entry: &JournalEntry)
        -> Result<(), DatabaseError>;

    /// スクリプトを実行
    ///
    /// バッチ区切りをサポートする場合はバッチごとに順に実行し、
    /// 最初に失敗したバッチの位置を返します。
    async fn execute(&mut self, script: &ScriptUnit) -> Result<(), ScriptExecutionError> {
        let batches = if script.content.trim().is_empty() {
            Vec::new()
        } else if self.supports_batch_separator() {
            split_batches(&script.content)
        } else {
            vec![script.content.clone()]
        };

        debug!(script = %script.id, batches = batches.len(), "Executing script");

        for (index, batch) in batches.iter().enumerate() {
            self.execute_batch(batch)
                .await
                .map_err(|e| ScriptExecutionError::new(script.id.clone(), index, e.to_string()))?;
        }

        Ok(())
    }

    /// トランザクションを開始
    async fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        let sql = JournalSqlGenerator::new(self.kind()).generate_begin_transaction_sql();
        self.execute_statement(&sql)
            .await
            .map_err(|e| DatabaseError::Transaction {
                message: format!("Failed to begin transaction: {}", e),
            })
    }

    /// トランザクションをコミット
    async fn commit_transaction(&mut self) -> Result<(), DatabaseError> {
        let sql = JournalSqlGenerator::new(self.kind()).generate_commit_transaction_sql();
        self.execute_statement(&sql)
            .await
            .map_err(|e| DatabaseError::Transaction {
                message: format!("Failed to commit transaction: {}", e),
            })
    }

    /// トランザクションをロールバック
    async fn rollback_transaction(&mut self) -> Result<(), DatabaseError> {
        let sql = JournalSqlGenerator::new(self.kind()).generate_rollback_transaction_sql();
        self.execute_statement(&sql)
            .await
            .map_err(|e| DatabaseError::Transaction {
                message: format!("Failed to roll back transaction: {}", e),
            })
    }
}

impl ProviderKind {
    /// 接続文字列でデータベースに接続
    pub async fn connect(
        self,
        connection_string: &str,
    ) -> Result<Box<dyn DatabaseProvider>, ConnectionFailedError> {
        match self {
            ProviderKind::MsSql => Ok(Box::new(MsSqlProvider::connect(connection_string).await?)),
            ProviderKind::Postgres => {
                Ok(Box::new(PostgresProvider::connect(connection_string).await?))
            }
            ProviderKind::Sqlite => Ok(Box::new(SqliteProvider::connect(connection_string).await?)),
        }
    }

    /// 対象データベースが存在しなければ作成する
    ///
    /// # Returns
    ///
    /// 新たに作成した場合は true
    pub async fn ensure_database_exists(
        self,
        connection_string: &str,
    ) -> Result<bool, ConnectionFailedError> {
        match self {
            ProviderKind::MsSql => MsSqlProvider::ensure_database_exists(connection_string).await,
            ProviderKind::Postgres => {
                PostgresProvider::ensure_database_exists(connection_string).await
            }
            ProviderKind::Sqlite => SqliteProvider::ensure_database_exists(connection_string).await,
        }
    }
}

/// 識別子をダブルクォートで囲む（PostgreSQL / SQLite）
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// 識別子を角括弧で囲む（SQL Server）
pub(crate) fn quote_bracket_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! テスト用のインメモリプロバイダー

    use super::*;
    use std::collections::HashSet;

    /// 実行内容を記録するプロバイダー
    ///
    /// `fail_on` に含まれる内容のバッチは失敗する。ジャーナルはメモリ上に保持し、
    /// トランザクション中の記録はコミット時に確定、ロールバック時に破棄する。
    #[derive(Debug, Default)]
    pub struct RecordingProvider {
        pub kind: Option<ProviderKind>,
        pub fail_on: HashSet<String>,
        pub executed: Vec<String>,
        pub journal: Vec<JournalEntry>,
        pub pending: Vec<JournalEntry>,
        pub in_transaction: bool,
        pub lock_held: bool,
        pub lock_acquisitions: usize,
        pub fail_journal_writes: bool,
        pub fail_lock: bool,
        pub fail_commit: bool,
        pub statements: Vec<String>,
    }

    impl RecordingProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_on(batch: &str) -> Self {
            let mut provider = Self::new();
            provider.fail_on.insert(batch.to_string());
            provider
        }
    }

    #[async_trait]
    impl DatabaseProvider for RecordingProvider {
        fn kind(&self) -> ProviderKind {
            self.kind.unwrap_or(ProviderKind::Sqlite)
        }

        fn supports_batch_separator(&self) -> bool {
            self.kind() == ProviderKind::MsSql
        }

        async fn acquire_lock(&mut self) -> Result<(), DatabaseError> {
            if self.fail_lock {
                return Err(DatabaseError::Query {
                    message: "lock timeout".to_string(),
                    sql: None,
                });
            }
            self.lock_held = true;
            self.lock_acquisitions += 1;
            Ok(())
        }

        async fn release_lock(&mut self) -> Result<(), DatabaseError> {
            self.lock_held = false;
            Ok(())
        }

        async fn execute_batch(&mut self, sql: &str) -> Result<(), DatabaseError> {
            self.executed.push(sql.to_string());
            if self.fail_on.contains(sql) {
                return Err(DatabaseError::Query {
                    message: format!("failed: {}", sql),
                    sql: Some(sql.to_string()),
                });
            }
            Ok(())
        }

        async fn execute_statement(&mut self, sql: &str) -> Result<(), DatabaseError> {
            self.statements.push(sql.to_string());
            match sql {
                "BEGIN" | "BEGIN TRANSACTION" => self.in_transaction = true,
                "COMMIT" | "COMMIT TRANSACTION" if self.fail_commit => {
                    self.in_transaction = false;
                    self.pending.clear();
                    return Err(DatabaseError::Query {
                        message: "connection reset during commit".to_string(),
                        sql: Some(sql.to_string()),
                    });
                }
                "COMMIT" | "COMMIT TRANSACTION" => {
                    self.in_transaction = false;
                    self.journal.append(&mut self.pending);
                }
                s if s.contains("ROLLBACK") => {
                    self.in_transaction = false;
                    self.pending.clear();
                }
                _ => {}
            }
            Ok(())
        }

        async fn fetch_journal(&mut self, _sql: &str) -> Result<Vec<JournalEntry>, DatabaseError> {
            Ok(self.journal.clone())
        }

        async fn insert_journal(
            &mut self,
            _sql: &str,
            entry: &JournalEntry,
        ) -> Result<(), DatabaseError> {
            if self.fail_journal_writes {
                return Err(DatabaseError::Query {
                    message: "journal is read-only".to_string(),
                    sql: None,
                });
            }

            let duplicate = entry.success
                && self
                    .journal
                    .iter()
                    .chain(self.pending.iter())
                    .any(|e| e.success && e.script_id == entry.script_id);
            if duplicate {
                return Err(DatabaseError::UniqueViolation {
                    message: format!("duplicate script_id {}", entry.script_id),
                });
            }

            if self.in_transaction {
                self.pending.push(entry.clone());
            } else {
                self.journal.push(entry.clone());
            }
            Ok(())
        }
    }
}
