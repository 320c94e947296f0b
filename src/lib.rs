// db-migrateライブラリのエントリーポイント
//
// モジュール構造:
// - cli: CLIレイヤー（ユーザー入力の受付とコマンドルーティング）
// - core: ドメインモデル（スクリプト、ジャーナル、実行結果、エラー、設定）
// - adapters: データベースとファイルシステムへのアクセスを抽象化
// - services: 列挙、プランニング、適用を組み合わせるマイグレーションエンジン

pub mod adapters;
pub mod cli;
pub mod core;
pub mod services;

pub use crate::core::config::{HashCheck, MigratorConfig, ProviderKind, TransactionMode};
pub use crate::core::migration::DatabaseUpgradeResult;
pub use crate::services::migrator::Migrator;
