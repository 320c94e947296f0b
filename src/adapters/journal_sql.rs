// ジャーナルSQLジェネレーター
//
// ジャーナルテーブルのDDL、記録用INSERT、読み込み用SELECT、
// トランザクション制御SQLをプロバイダーごとに生成します。

use crate::core::config::ProviderKind;
use crate::core::naming::{JOURNAL_SUCCESS_INDEX, JOURNAL_TABLE};

/// ジャーナルSQLジェネレーター
#[derive(Debug, Clone, Copy)]
pub struct JournalSqlGenerator {
    provider: ProviderKind,
}

impl JournalSqlGenerator {
    /// 新しいJournalSqlGeneratorを作成
    pub fn new(provider: ProviderKind) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// ジャーナルテーブルと成功エントリ用の一意インデックスを作成するSQLを生成
    ///
    /// いずれの文も対象が既に存在する場合は何もしない。
    ///
    /// # Returns
    ///
    /// 実行順のSQL文のリスト
    pub fn generate_ensure_schema_sql(&self) -> Vec<String> {
        match self.provider {
            ProviderKind::Postgres => vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS {table} (
    script_id VARCHAR(255) NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL,
    success BOOLEAN NOT NULL,
    content_hash VARCHAR(64) NULL,
    PRIMARY KEY (script_id, applied_at)
)"#,
                    table = JOURNAL_TABLE
                ),
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table} (script_id) WHERE success",
                    index = JOURNAL_SUCCESS_INDEX,
                    table = JOURNAL_TABLE
                ),
            ],
            ProviderKind::MsSql => vec![
                format!(
                    r#"IF OBJECT_ID(N'dbo.{table}', N'U') IS NULL
CREATE TABLE dbo.{table} (
    script_id NVARCHAR(255) NOT NULL,
    applied_at DATETIMEOFFSET NOT NULL,
    success BIT NOT NULL,
    content_hash NVARCHAR(64) NULL,
    CONSTRAINT pk_{table} PRIMARY KEY (script_id, applied_at)
)"#,
                    table = JOURNAL_TABLE
                ),
                format!(
                    r#"IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = N'{index}' AND object_id = OBJECT_ID(N'dbo.{table}'))
CREATE UNIQUE INDEX {index} ON dbo.{table} (script_id) WHERE success = 1"#,
                    index = JOURNAL_SUCCESS_INDEX,
                    table = JOURNAL_TABLE
                ),
            ],
            ProviderKind::Sqlite => vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS {table} (
    script_id TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    success INTEGER NOT NULL,
    content_hash TEXT NULL,
    PRIMARY KEY (script_id, applied_at)
)"#,
                    table = JOURNAL_TABLE
                ),
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table} (script_id) WHERE success = 1",
                    index = JOURNAL_SUCCESS_INDEX,
                    table = JOURNAL_TABLE
                ),
            ],
        }
    }

    /// ジャーナル記録のINSERT SQLを生成
    ///
    /// パラメータは (script_id, applied_at, success, content_hash) の順にバインドする。
    pub fn generate_record_sql(&self) -> String {
        let table = self.qualified_table();
        let placeholders = match self.provider {
            ProviderKind::Postgres => "$1, $2, $3, $4",
            ProviderKind::MsSql => "@P1, @P2, @P3, @P4",
            ProviderKind::Sqlite => "?1, ?2, ?3, ?4",
        };
        format!(
            "INSERT INTO {} (script_id, applied_at, success, content_hash) VALUES ({})",
            table, placeholders
        )
    }

    /// ジャーナル読み込みのSELECT SQLを生成
    ///
    /// 列は (script_id, applied_at, success, content_hash) の順。
    pub fn generate_list_sql(&self) -> String {
        format!(
            "SELECT script_id, applied_at, success, content_hash FROM {} ORDER BY applied_at, script_id",
            self.qualified_table()
        )
    }

    /// トランザクション開始SQLを生成
    pub fn generate_begin_transaction_sql(&self) -> String {
        match self.provider {
            ProviderKind::MsSql => "BEGIN TRANSACTION".to_string(),
            ProviderKind::Postgres | ProviderKind::Sqlite => "BEGIN".to_string(),
        }
    }

    /// トランザクションコミットSQLを生成
    pub fn generate_commit_transaction_sql(&self) -> String {
        match self.provider {
            ProviderKind::MsSql => "COMMIT TRANSACTION".to_string(),
            ProviderKind::Postgres | ProviderKind::Sqlite => "COMMIT".to_string(),
        }
    }

    /// トランザクションロールバックSQLを生成
    ///
    /// SQL Server ではエラーによって既にロールバック済みの場合があるため
    /// `@@TRANCOUNT` を確認する。
    pub fn generate_rollback_transaction_sql(&self) -> String {
        match self.provider {
            ProviderKind::MsSql => "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION".to_string(),
            ProviderKind::Postgres | ProviderKind::Sqlite => "ROLLBACK".to_string(),
        }
    }

    fn qualified_table(&self) -> String {
        match self.provider {
            ProviderKind::MsSql => format!("dbo.{}", JOURNAL_TABLE),
            ProviderKind::Postgres | ProviderKind::Sqlite => JOURNAL_TABLE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_sql_postgres() {
        let sql = JournalSqlGenerator::new(ProviderKind::Postgres).generate_ensure_schema_sql();

        assert_eq!(sql.len(), 2);
        assert!(sql[0].contains("CREATE TABLE IF NOT EXISTS migration_journal"));
        assert!(sql[0].contains("TIMESTAMPTZ"));
        assert!(sql[0].contains("PRIMARY KEY (script_id, applied_at)"));
        assert!(sql[1].contains("CREATE UNIQUE INDEX IF NOT EXISTS ux_migration_journal_success"));
        assert!(sql[1].ends_with("WHERE success"));
    }

    #[test]
    fn test_ensure_schema_sql_mssql() {
        let sql = JournalSqlGenerator::new(ProviderKind::MsSql).generate_ensure_schema_sql();

        assert!(sql[0].starts_with("IF OBJECT_ID(N'dbo.migration_journal', N'U') IS NULL"));
        assert!(sql[0].contains("DATETIMEOFFSET"));
        assert!(sql[0].contains("BIT"));
        assert!(sql[1].contains("sys.indexes"));
        assert!(sql[1].contains("WHERE success = 1"));
    }

    #[test]
    fn test_ensure_schema_sql_sqlite() {
        let sql = JournalSqlGenerator::new(ProviderKind::Sqlite).generate_ensure_schema_sql();

        assert!(sql[0].contains("CREATE TABLE IF NOT EXISTS migration_journal"));
        assert!(sql[1].contains("WHERE success = 1"));
    }

    #[test]
    fn test_record_sql_placeholders() {
        let pg = JournalSqlGenerator::new(ProviderKind::Postgres).generate_record_sql();
        assert!(pg.contains("INSERT INTO migration_journal"));
        assert!(pg.contains("$1, $2, $3, $4"));

        let mssql = JournalSqlGenerator::new(ProviderKind::MsSql).generate_record_sql();
        assert!(mssql.contains("INSERT INTO dbo.migration_journal"));
        assert!(mssql.contains("@P1, @P2, @P3, @P4"));

        let sqlite = JournalSqlGenerator::new(ProviderKind::Sqlite).generate_record_sql();
        assert!(sqlite.contains("?1, ?2, ?3, ?4"));
    }

    #[test]
    fn test_list_sql_column_order() {
        for provider in ProviderKind::ALL {
            let sql = JournalSqlGenerator::new(provider).generate_list_sql();
            assert!(sql.starts_with("SELECT script_id, applied_at, success, content_hash FROM"));
            assert!(sql.contains("ORDER BY applied_at, script_id"));
        }
    }

    #[test]
    fn test_transaction_sql() {
        let pg = JournalSqlGenerator::new(ProviderKind::Postgres);
        assert_eq!(pg.generate_begin_transaction_sql(), "BEGIN");
        assert_eq!(pg.generate_commit_transaction_sql(), "COMMIT");
        assert_eq!(pg.generate_rollback_transaction_sql(), "ROLLBACK");

        let mssql = JournalSqlGenerator::new(ProviderKind::MsSql);
        assert_eq!(mssql.generate_begin_transaction_sql(), "BEGIN TRANSACTION");
        assert_eq!(mssql.generate_commit_transaction_sql(), "COMMIT TRANSACTION");
        assert!(mssql
            .generate_rollback_transaction_sql()
            .contains("@@TRANCOUNT"));
    }
}
