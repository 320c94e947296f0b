// マイグレーター
//
// 接続、ロック、ジャーナル初期化、列挙、プランニング、適用を一連の流れとして実行し、
// DatabaseUpgradeResult を組み立てる公開エントリポイント。

use crate::adapters::provider::DatabaseProvider;
use crate::adapters::script_source::{FileSystemScriptSource, ScriptSource};
use crate::core::config::{MigratorConfig, ProviderKind};
use crate::core::error::{ConnectionFailedError, MigrationError};
use crate::core::migration::{DatabaseUpgradeResult, MigrationState};
use crate::core::script::ScriptId;
use crate::services::executor::MigrationExecutor;
use crate::services::journal_store::JournalStore;
use crate::services::planner::MigrationPlanner;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// マイグレーター
#[derive(Debug, Clone)]
pub struct Migrator {
    provider: ProviderKind,
    connection_string: String,
    config: MigratorConfig,
    cancellation: Option<CancellationToken>,
}

impl Migrator {
    /// 新しいMigratorを作成
    ///
    /// # Arguments
    ///
    /// * `provider` - 対象データベースの種別
    /// * `connection_string` - 接続文字列
    pub fn new(provider: ProviderKind, connection_string: impl Into<String>) -> Self {
        Self {
            provider,
            connection_string: connection_string.into(),
            config: MigratorConfig::default(),
            cancellation: None,
        }
    }

    /// 設定を適用
    pub fn with_config(mut self, config: MigratorConfig) -> Self {
        self.config = config;
        self
    }

    /// キャンセルトークンを設定
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// 対象データベースが存在しなければ作成
    ///
    /// `migrate()` とは独立して呼び出せます。
    ///
    /// # Returns
    ///
    /// 新たに作成した場合は true
    pub async fn ensure_database_exists(&self) -> Result<bool, ConnectionFailedError> {
        self.provider
            .ensure_database_exists(&self.connection_string)
            .await
    }

    /// スクリプトディレクトリの未適用スクリプトを適用
    ///
    /// 接続失敗のみ `Err` を返し、それ以外の失敗は結果の `error` に格納されます。
    ///
    /// # Arguments
    ///
    /// * `scripts_path` - スクリプトディレクトリ
    pub async fn migrate(
        &self,
        scripts_path: impl AsRef<Path>,
    ) -> Result<DatabaseUpgradeResult, ConnectionFailedError> {
        info!(provider = %self.provider, "Connecting to database");
        let mut provider = self.provider.connect(&self.connection_string).await?;

        Ok(self
            .migrate_with(provider.as_mut(), scripts_path.as_ref())
            .await)
    }

    /// 接続済みのプロバイダーでマイグレーションを実行
    pub async fn migrate_with(
        &self,
        provider: &mut dyn DatabaseProvider,
        scripts_path: &Path,
    ) -> DatabaseUpgradeResult {
        let mut run = RunState::default();
        run.advance(MigrationState::Preparing);

        debug!("Acquiring migration lock");
        if let Err(e) = provider.acquire_lock().await {
            return run.fail(
                Vec::new(),
                MigrationError::Lock {
                    cause: e.to_string(),
                },
            );
        }

        let result = self.run_locked(provider, scripts_path, &mut run).await;

        // どの経路でもロックを解放する
        if let Err(e) = provider.release_lock().await {
            warn!("Failed to release the migration lock: {}", e);
        }

        if result.successful {
            info!(applied = result.applied_count(), "Migration completed");
        } else if let Some(error) = &result.error {
            warn!(applied = result.applied_count(), "Migration failed: {}", error);
        }

        result
    }

    async fn run_locked(
        &self,
        provider: &mut dyn DatabaseProvider,
        scripts_path: &Path,
        run: &mut RunState,
    ) -> DatabaseUpgradeResult {
        let journal = JournalStore::new(provider.kind());
        if let Err(e) = journal.ensure_schema(provider).await {
            return run.fail(Vec::new(), e);
        }

        run.advance(MigrationState::Planning);

        let source =
            FileSystemScriptSource::new(scripts_path, self.config.extensions.clone());
        let candidates = match source.enumerate() {
            Ok(candidates) => candidates,
            Err(e) => return run.fail(Vec::new(), e),
        };

        let applied = match journal.list_applied(provider).await {
            Ok(applied) => applied,
            Err(e) => return run.fail(Vec::new(), e),
        };

        let outcome = match MigrationPlanner::new(self.config.hash_check).plan(&candidates, &applied)
        {
            Ok(outcome) => outcome,
            Err(e) => return run.fail(Vec::new(), e),
        };

        for warning in &outcome.warnings {
            warn!("{}", warning.format());
        }

        if outcome.plan.is_empty() {
            info!("No new scripts need to be executed");
        } else {
            info!(count = outcome.plan.len(), "Beginning database upgrade");
        }

        run.advance(MigrationState::Applying);

        let mut executor =
            MigrationExecutor::new(journal).with_transaction_mode(self.config.transaction);
        if let Some(token) = &self.cancellation {
            executor = executor.with_cancellation(token.clone());
        }

        let execution = executor.apply(&outcome.plan, provider).await;

        let result = match execution.error {
            None => {
                run.advance(MigrationState::Completed);
                DatabaseUpgradeResult::success(execution.scripts_applied)
            }
            Some(error) => run.fail(execution.scripts_applied, error),
        };

        result.with_warnings(outcome.warnings).with_drift(outcome.drift)
    }
}

/// 実行中の状態遷移を追跡
#[derive(Debug, Default)]
struct RunState {
    state: MigrationState,
}

impl RunState {
    fn advance(&mut self, next: MigrationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Migration state changed");
        self.state = next;
    }

    fn fail(&mut self, applied: Vec<ScriptId>, error: MigrationError) -> DatabaseUpgradeResult {
        self.advance(MigrationState::Failed);
        DatabaseUpgradeResult::failure(applied, error)
    }
}
