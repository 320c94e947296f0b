// マイグレーションエグゼキューター
//
// プランのスクリプトを順に実行し、成功したスクリプトをジャーナルに記録します。
// 最初の失敗で停止し、以降のスクリプトは実行しません。

use crate::adapters::provider::DatabaseProvider;
use crate::core::config::TransactionMode;
use crate::core::error::{MigrationError, ScriptExecutionError};
use crate::core::journal::JournalEntry;
use crate::core::migration::MigrationPlan;
use crate::core::script::{ScriptId, ScriptUnit};
use crate::services::journal_store::JournalStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 実行結果
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// この実行で適用されたスクリプト（適用順）
    pub scripts_applied: Vec<ScriptId>,
    /// 停止の原因となったエラー
    pub error: Option<MigrationError>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// マイグレーションエグゼキューター
#[derive(Debug, Clone)]
pub struct MigrationExecutor {
    journal: JournalStore,
    transaction: TransactionMode,
    cancellation: Option<CancellationToken>,
}

impl MigrationExecutor {
    /// 新しいMigrationExecutorを作成
    pub fn new(journal: JournalStore) -> Self {
        Self {
            journal,
            transaction: TransactionMode::default(),
            cancellation: None,
        }
    }

    /// トランザクションモードを設定
    pub fn with_transaction_mode(mut self, transaction: TransactionMode) -> Self {
        self.transaction = transaction;
        self
    }

    /// キャンセルトークンを設定
    ///
    /// キャンセルはスクリプトの間でのみ確認される。実行中のスクリプトは中断しない。
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// プランを適用
    ///
    /// # Arguments
    ///
    /// * `plan` - 適用するプラン
    /// * `provider` - ロックを保持している接続
    ///
    /// # Returns
    ///
    /// 適用されたスクリプトと、停止した場合はその原因
    pub async fn apply(
        &self,
        plan: &MigrationPlan,
        provider: &mut dyn DatabaseProvider,
    ) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::default();

        for script in plan.scripts() {
            if self.is_cancelled() {
                warn!(
                    applied = outcome.scripts_applied.len(),
                    "Cancellation requested, stopping before '{}'", script.id
                );
                outcome.error = Some(MigrationError::Cancelled {
                    applied_before: outcome.scripts_applied.clone(),
                });
                return outcome;
            }

            info!("Executing script {}", script.id);

            match self
                .apply_script(script, provider, &outcome.scripts_applied)
                .await
            {
                Ok(()) => outcome.scripts_applied.push(script.id.clone()),
                Err(error) => {
                    outcome.error = Some(error);
                    return outcome;
                }
            }
        }

        outcome
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// 1つのスクリプトを実行して記録
    async fn apply_script(
        &self,
        script: &ScriptUnit,
        provider: &mut dyn DatabaseProvider,
        applied_before: &[ScriptId],
    ) -> Result<(), MigrationError> {
        let transactional = self.transaction == TransactionMode::PerScript;

        if transactional {
            provider.begin_transaction().await.map_err(|e| {
                MigrationError::ScriptExecution {
                    error: ScriptExecutionError::new(script.id.clone(), 0, e.to_string()),
                    applied_before: applied_before.to_vec(),
                    journal_error: None,
                }
            })?;
        }

        if let Err(error) = provider.execute(script).await {
            warn!("Script {} failed: {}", script.id, error.cause);

            if transactional {
                if let Err(e) = provider.rollback_transaction().await {
                    warn!("Failed to roll back after script {}: {}", script.id, e);
                }
            }

            // 失敗の記録はベストエフォート。スクリプトのエラーを優先して報告する
            let journal_error = self
                .journal
                .record(provider, &JournalEntry::failed(script))
                .await
                .err()
                .map(|e| e.to_string());

            return Err(MigrationError::ScriptExecution {
                error,
                applied_before: applied_before.to_vec(),
                journal_error,
            });
        }

        if let Err(error) = self
            .journal
            .record(provider, &JournalEntry::succeeded(script))
            .await
        {
            if transactional {
                if let Err(e) = provider.rollback_transaction().await {
                    warn!("Failed to roll back after script {}: {}", script.id, e);
                }
            }
            return Err(error);
        }

        if transactional {
            provider
                .commit_transaction()
                .await
                .map_err(|e| MigrationError::Commit {
                    script_id: script.id.clone(),
                    cause: e.to_string(),
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::provider::test_support::RecordingProvider;
    use crate::core::config::ProviderKind;

    fn executor() -> MigrationExecutor {
        MigrationExecutor::new(JournalStore::new(ProviderKind::Sqlite))
    }

    fn plan(scripts: &[(&str, &str)]) -> MigrationPlan {
        MigrationPlan::new(
            scripts
                .iter()
                .map(|(name, sql)| ScriptUnit::new(*name, *sql))
                .collect(),
        )
    }

    fn recorded(provider: &RecordingProvider) -> Vec<(String, bool)> {
        provider
            .journal
            .iter()
            .map(|e| (e.script_id.to_string(), e.success))
            .collect()
    }

    #[tokio::test]
    async fn test_apply_all_in_order() {
        let mut provider = RecordingProvider::new();
        let plan = plan(&[("001_a.sql", "SELECT 1"), ("002_b.sql", "SELECT 2")]);

        let outcome = executor().apply(&plan, &mut provider).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.scripts_applied, plan.ids());
        assert_eq!(provider.executed, vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(
            recorded(&provider),
            vec![
                ("001_a.sql".to_string(), true),
                ("002_b.sql".to_string(), true)
            ]
        );
        assert!(!provider.in_transaction);
    }

    #[tokio::test]
    async fn test_apply_stops_at_first_failure() {
        let mut provider = RecordingProvider::failing_on("SELECT 2");
        let plan = plan(&[
            ("001_a.sql", "SELECT 1"),
            ("002_b.sql", "SELECT 2"),
            ("003_c.sql", "SELECT 3"),
        ]);

        let outcome = executor().apply(&plan, &mut provider).await;

        assert_eq!(outcome.scripts_applied, vec![ScriptId::new("001_a.sql")]);
        assert_eq!(provider.executed, vec!["SELECT 1", "SELECT 2"]);

        match outcome.error.unwrap() {
            MigrationError::ScriptExecution {
                error,
                applied_before,
                journal_error,
            } => {
                assert_eq!(error.script_id, ScriptId::new("002_b.sql"));
                assert_eq!(applied_before, vec![ScriptId::new("001_a.sql")]);
                assert!(journal_error.is_none());
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // 失敗も記録されるが、適用済みとしては扱われない
        assert_eq!(
            recorded(&provider),
            vec![
                ("001_a.sql".to_string(), true),
                ("002_b.sql".to_string(), false)
            ]
        );
        assert!(provider.statements.iter().any(|s| s == "ROLLBACK"));
    }

    #[tokio::test]
    async fn test_failure_journal_error_is_kept_separately() {
        let mut provider = RecordingProvider::failing_on("SELECT 1");
        provider.fail_journal_writes = true;
        let plan = plan(&[("001_a.sql", "SELECT 1")]);

        let outcome = executor().apply(&plan, &mut provider).await;

        match outcome.error.unwrap() {
            MigrationError::ScriptExecution {
                error,
                journal_error,
                ..
            } => {
                assert_eq!(error.script_id, ScriptId::new("001_a.sql"));
                assert!(journal_error.unwrap().contains("read-only"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_journal_write_failure_halts_and_rolls_back() {
        let mut provider = RecordingProvider::new();
        provider.fail_journal_writes = true;
        let plan = plan(&[("001_a.sql", "SELECT 1"), ("002_b.sql", "SELECT 2")]);

        let outcome = executor().apply(&plan, &mut provider).await;

        assert!(outcome.scripts_applied.is_empty());
        assert!(matches!(
            outcome.error,
            Some(MigrationError::JournalWrite { .. })
        ));
        assert_eq!(provider.executed, vec!["SELECT 1"]);
        assert!(provider.statements.iter().any(|s| s == "ROLLBACK"));
    }

    #[tokio::test]
    async fn test_commit_failure_is_not_reported_as_journal_write() {
        let mut provider = RecordingProvider::new();
        provider.fail_commit = true;
        let plan = plan(&[("001_a.sql", "SELECT 1"), ("002_b.sql", "SELECT 2")]);

        let outcome = executor().apply(&plan, &mut provider).await;

        assert!(outcome.scripts_applied.is_empty());
        let error = outcome.error.unwrap();
        assert!(matches!(error, MigrationError::Commit { .. }));
        assert_eq!(error.script_id(), Some(&ScriptId::new("001_a.sql")));
        assert!(error.to_string().contains("commit"));
        assert_eq!(provider.executed, vec!["SELECT 1"]);
        assert!(provider.journal.is_empty());
    }

    #[tokio::test]
    async fn test_without_transactions() {
        let mut provider = RecordingProvider::new();
        let plan = plan(&[("001_a.sql", "SELECT 1")]);

        let outcome = executor()
            .with_transaction_mode(TransactionMode::None)
            .apply(&plan, &mut provider)
            .await;

        assert!(outcome.is_success());
        assert!(provider.statements.is_empty());
        assert_eq!(recorded(&provider), vec![("001_a.sql".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut provider = RecordingProvider::new();
        let token = CancellationToken::new();
        token.cancel();
        let plan = plan(&[("001_a.sql", "SELECT 1")]);

        let outcome = executor()
            .with_cancellation(token)
            .apply(&plan, &mut provider)
            .await;

        assert!(outcome.error.unwrap().is_cancelled());
        assert!(provider.executed.is_empty());
        assert!(provider.journal.is_empty());
    }

    #[tokio::test]
    async fn test_empty_plan() {
        let mut provider = RecordingProvider::new();

        let outcome = executor()
            .apply(&MigrationPlan::default(), &mut provider)
            .await;

        assert!(outcome.is_success());
        assert!(outcome.scripts_applied.is_empty());
    }
}
