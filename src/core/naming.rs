// 命名ポリシー
//
// アプリケーション名、ジャーナルテーブル名、ロックキーなど
// バージョン間で変えてはならない名前の単一ソースを提供します。

/// 現行アプリケーション名
pub const APP_NAME: &str = "db-migrate";

/// 既定の設定ファイル名
pub const CONFIG_FILE: &str = ".db-migrate.yaml";

/// 既定のスクリプトディレクトリ
pub const DEFAULT_SCRIPTS_DIR: &str = "scripts";

/// 既定で対象とするスクリプト拡張子
pub const DEFAULT_SCRIPT_EXTENSION: &str = ".sql";

/// ジャーナルテーブル名
///
/// 既存データベースとの互換性のため変更しないこと。
pub const JOURNAL_TABLE: &str = "migration_journal";

/// 成功エントリの一意性を保証する部分インデックス名
pub const JOURNAL_SUCCESS_INDEX: &str = "ux_migration_journal_success";

/// PostgreSQLのアドバイザリロックキー
///
/// "db-migrate" の先頭8バイトをビッグエンディアンで詰めた固定値。
pub const POSTGRES_LOCK_KEY: i64 = 0x6462_2d6d_6967_7261;

/// SQL Serverのアプリケーションロックのリソース名
pub const MSSQL_LOCK_RESOURCE: &str = "db-migrate:migration_journal";
