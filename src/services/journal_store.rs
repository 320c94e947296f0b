// ジャーナルストア
//
// 適用済みスクリプトの記録をデータベース上のジャーナルテーブルで管理します。
// すべての操作は呼び出し元がロックと共に保持している単一の接続で行います。

use crate::adapters::journal_sql::JournalSqlGenerator;
use crate::adapters::provider::DatabaseProvider;
use crate::core::config::ProviderKind;
use crate::core::error::{DatabaseError, MigrationError};
use crate::core::journal::{AppliedScripts, JournalEntry};
use tracing::debug;

/// ジャーナルストア
#[derive(Debug, Clone, Copy)]
pub struct JournalStore {
    sql: JournalSqlGenerator,
}

impl JournalStore {
    /// 新しいJournalStoreを作成
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            sql: JournalSqlGenerator::new(provider),
        }
    }

    /// ジャーナルテーブルが存在しなければ作成
    ///
    /// 何度呼んでも結果は同じ（冪等）。
    pub async fn ensure_schema(
        &self,
        provider: &mut dyn DatabaseProvider,
    ) -> Result<(), MigrationError> {
        for statement in self.sql.generate_ensure_schema_sql() {
            provider
                .execute_statement(&statement)
                .await
                .map_err(|e| MigrationError::JournalInit {
                    cause: e.to_string(),
                })?;
        }

        debug!(provider = %self.sql.provider(), "Journal schema is ready");
        Ok(())
    }

    /// 適用済みスクリプトを取得
    ///
    /// 1つのSELECTで読み込むため、読み込み時点の一貫したスナップショットになる。
    /// 失敗エントリは含まない。
    pub async fn list_applied(
        &self,
        provider: &mut dyn DatabaseProvider,
    ) -> Result<AppliedScripts, MigrationError> {
        let entries = provider
            .fetch_journal(&self.sql.generate_list_sql())
            .await
            .map_err(|e| MigrationError::JournalRead {
                cause: e.to_string(),
            })?;

        let applied = AppliedScripts::from_entries(entries);
        debug!(count = applied.len(), "Loaded applied scripts from journal");
        Ok(applied)
    }

    /// ジャーナルにエントリを1件記録
    ///
    /// 同じスクリプトの成功エントリが既にある場合は `PlanConsistency` を返す。
    pub async fn record(
        &self,
        provider: &mut dyn DatabaseProvider,
        entry: &JournalEntry,
    ) -> Result<(), MigrationError> {
        provider
            .insert_journal(&self.sql.generate_record_sql(), entry)
            .await
            .map_err(|e| match e {
                DatabaseError::UniqueViolation { message } => MigrationError::PlanConsistency {
                    script_id: entry.script_id.clone(),
                    message: format!("script is already recorded as applied ({})", message),
                },
                other => MigrationError::JournalWrite {
                    script_id: entry.script_id.clone(),
                    cause: other.to_string(),
                },
            })?;

        debug!(
            script = %entry.script_id,
            success = entry.success,
            "Recorded journal entry"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::provider::test_support::RecordingProvider;
    use crate::core::script::{ScriptId, ScriptUnit};

    #[tokio::test]
    async fn test_ensure_schema_runs_all_statements() {
        let mut provider = RecordingProvider::new();
        let store = JournalStore::new(ProviderKind::Sqlite);

        store.ensure_schema(&mut provider).await.unwrap();

        assert_eq!(provider.statements.len(), 2);
        assert!(provider.statements[0].contains("migration_journal"));
    }

    #[tokio::test]
    async fn test_list_applied_ignores_failed_entries() {
        let mut provider = RecordingProvider::new();
        let store = JournalStore::new(ProviderKind::Sqlite);
        let ok = ScriptUnit::new("001_a.sql", "SELECT 1");
        let bad = ScriptUnit::new("002_b.sql", "SELEC 2");

        store
            .record(&mut provider, &JournalEntry::succeeded(&ok))
            .await
            .unwrap();
        store
            .record(&mut provider, &JournalEntry::failed(&bad))
            .await
            .unwrap();

        let applied = store.list_applied(&mut provider).await.unwrap();
        assert!(applied.contains(&ScriptId::new("001_a.sql")));
        assert!(!applied.contains(&ScriptId::new("002_b.sql")));
        assert_eq!(applied.recorded_hash(&ok.id), ok.content_hash.as_deref());
    }

    #[tokio::test]
    async fn test_record_duplicate_success_is_plan_consistency() {
        let mut provider = RecordingProvider::new();
        let store = JournalStore::new(ProviderKind::Sqlite);
        let script = ScriptUnit::new("001_a.sql", "SELECT 1");

        store
            .record(&mut provider, &JournalEntry::succeeded(&script))
            .await
            .unwrap();
        let error = store
            .record(&mut provider, &JournalEntry::succeeded(&script))
            .await
            .unwrap_err();

        assert!(error.is_plan_consistency());
        assert_eq!(error.script_id(), Some(&script.id));
    }

    #[tokio::test]
    async fn test_record_failure_is_journal_write() {
        let mut provider = RecordingProvider::new();
        provider.fail_journal_writes = true;
        let store = JournalStore::new(ProviderKind::Sqlite);
        let script = ScriptUnit::new("001_a.sql", "SELECT 1");

        let error = store
            .record(&mut provider, &JournalEntry::succeeded(&script))
            .await
            .unwrap_err();

        assert!(matches!(error, MigrationError::JournalWrite { .. }));
    }
}
