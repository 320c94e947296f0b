// Adapters
// データベースとファイルシステムへのアクセスを抽象化

pub mod batch_splitter;
pub mod connection_string;
pub mod journal_sql;
pub mod provider;
pub mod script_source;
