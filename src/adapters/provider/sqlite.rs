// SQLiteプロバイダー
//
// SQLxの単一接続（SqliteConnection）でスクリプトを実行します。
// ロックはファイルロック（EXCLUSIVE locking mode）で代用します。

use super::postgres::query_error;
use super::DatabaseProvider;
use crate::adapters::connection_string::ConnectionString;
use crate::core::config::ProviderKind;
use crate::core::error::{ConnectionFailedError, DatabaseError};
use crate::core::journal::JournalEntry;
use crate::core::script::ScriptId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// SQLITE_BUSY
const SQLITE_BUSY: i32 = 5;

/// SQLITE_CANTOPEN
const SQLITE_CANTOPEN: i32 = 14;

/// ロック待ちの再試行間隔（busy_timeout の待機に加えて挟む）
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(200);

const ACQUIRE_LOCK_SQL: &str = "PRAGMA locking_mode = EXCLUSIVE; BEGIN EXCLUSIVE; COMMIT;";

// NORMALに戻した後、次のアクセスでファイルロックが解放される
const RELEASE_LOCK_SQL: &str = "PRAGMA locking_mode = NORMAL; SELECT 1 FROM sqlite_master LIMIT 1;";

/// SQLiteプロバイダー
pub struct SqliteProvider {
    conn: SqliteConnection,
}

impl SqliteProvider {
    /// 接続文字列を接続オプションに変換
    ///
    /// `sqlite://` URL、`sqlite::memory:`、ファイルパス、
    /// `Data Source=app.db` 形式のキー・値接続文字列を受け付けます。
    pub fn parse_options(
        connection_string: &str,
    ) -> Result<SqliteConnectOptions, ConnectionFailedError> {
        let trimmed = connection_string.trim();

        if let Some(cs) = ConnectionString::parse(trimmed) {
            let filename = cs
                .get(&["Data Source", "DataSource", "Filename"])
                .ok_or_else(|| {
                    ConnectionFailedError::new(
                        ProviderKind::Sqlite,
                        "Invalid connection string",
                        "expected a 'Data Source' key",
                    )
                })?;
            return Ok(SqliteConnectOptions::new().filename(filename));
        }

        SqliteConnectOptions::from_str(trimmed).map_err(|e| {
            ConnectionFailedError::new(
                ProviderKind::Sqlite,
                "Invalid connection string",
                e.to_string(),
            )
        })
    }

    /// データベースに接続
    ///
    /// ファイルが存在しない場合は作成せずに接続失敗とします。
    pub async fn connect(connection_string: &str) -> Result<Self, ConnectionFailedError> {
        let options = Self::parse_options(connection_string)?;
        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(connection_error)?;

        debug!(filename = %options.get_filename().display(), "Opened SQLite database");

        Ok(Self { conn })
    }

    /// データベースファイルが存在しなければ作成
    pub async fn ensure_database_exists(
        connection_string: &str,
    ) -> Result<bool, ConnectionFailedError> {
        let options = Self::parse_options(connection_string)?.create_if_missing(true);
        let filename = options.get_filename().to_path_buf();

        if is_in_memory(connection_string) || filename.exists() {
            debug!(filename = %filename.display(), "Database already exists");
            return Ok(false);
        }

        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(connection_error)?;
        let _ = conn.close().await;

        info!(filename = %filename.display(), "Created database");
        Ok(true)
    }

    /// ビジー時の待機時間を変更
    ///
    /// ロック取得は待機時間を超えても再試行を続けるため、
    /// この値は1回あたりの待ち時間のみを決めます。
    pub async fn set_busy_timeout(&mut self, timeout: Duration) -> Result<(), DatabaseError> {
        self.execute_batch(&format!("PRAGMA busy_timeout = {}", timeout.as_millis()))
            .await
    }
}

#[async_trait]
impl DatabaseProvider for SqliteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sqlite
    }

    async fn acquire_lock(&mut self) -> Result<(), DatabaseError> {
        // 他のセッションが保持している間は解放されるまで待ち続ける
        loop {
            match sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(ACQUIRE_LOCK_SQL)).await {
                Ok(_) => return Ok(()),
                Err(e) if is_busy(&e) => {
                    debug!("Migration lock is held by another session, waiting");
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(query_error(e, ACQUIRE_LOCK_SQL)),
            }
        }
    }

    async fn release_lock(&mut self) -> Result<(), DatabaseError> {
        self.execute_batch(RELEASE_LOCK_SQL).await
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), DatabaseError> {
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql))
            .await
            .map(|_| ())
            .map_err(|e| query_error(e, sql))
    }

    async fn execute_statement(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.execute_batch(sql).await
    }

    async fn fetch_journal(&mut self, sql: &str) -> Result<Vec<JournalEntry>, DatabaseError> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql))?;

        rows.iter()
            .map(|row| {
                Ok(JournalEntry {
                    script_id: ScriptId::new(row.try_get::<String, _>(0)?),
                    applied_at: row.try_get::<DateTime<Utc>, _>(1)?,
                    success: row.try_get::<bool, _>(2)?,
                    content_hash: row.try_get::<Option<String>, _>(3)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| query_error(e, sql))
    }

    async fn insert_journal(
        &mut self,
        sql: &str,
        entry: &JournalEntry,
    ) -> Result<(), DatabaseError> {
        sqlx::query(sql)
            .bind(entry.script_id.as_str())
            .bind(entry.applied_at)
            .bind(entry.success)
            .bind(entry.content_hash.as_deref())
            .execute(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(|e| query_error(e, sql))
    }
}

fn is_in_memory(connection_string: &str) -> bool {
    let lower = connection_string.to_ascii_lowercase();
    lower.contains(":memory:") || lower.contains("mode=memory")
}

fn extended_code(error: &sqlx::Error) -> Option<i32> {
    match error {
        sqlx::Error::Database(db) => db.code().and_then(|code| code.parse::<i32>().ok()),
        _ => None,
    }
}

fn is_busy(error: &sqlx::Error) -> bool {
    extended_code(error).is_some_and(|code| code & 0xff == SQLITE_BUSY)
}

fn connection_error(error: sqlx::Error) -> ConnectionFailedError {
    let missing_database = extended_code(&error).is_some_and(|code| code & 0xff == SQLITE_CANTOPEN);
    ConnectionFailedError::new(
        ProviderKind::Sqlite,
        "Could not open the database",
        error.to_string(),
    )
    .with_missing_database(missing_database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_parse_data_source() {
        let options = SqliteProvider::parse_options("Data Source=/tmp/app.db").unwrap();
        assert_eq!(options.get_filename(), Path::new("/tmp/app.db"));
    }

    #[test]
    fn test_parse_url_and_path() {
        let options = SqliteProvider::parse_options("sqlite://app.db").unwrap();
        assert_eq!(options.get_filename(), Path::new("app.db"));

        let options = SqliteProvider::parse_options("app.db").unwrap();
        assert_eq!(options.get_filename(), Path::new("app.db"));
    }

    #[test]
    fn test_parse_key_value_without_data_source() {
        let error = SqliteProvider::parse_options("Mode=ReadOnly").unwrap_err();
        assert_eq!(error.provider, ProviderKind::Sqlite);
    }

    #[test]
    fn test_is_in_memory() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("Data Source=:memory:"));
        assert!(!is_in_memory("sqlite://app.db"));
    }

    #[tokio::test]
    async fn test_ensure_database_exists_in_memory_is_noop() {
        assert!(!SqliteProvider::ensure_database_exists("sqlite::memory:")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_connect_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.db");

        let result = SqliteProvider::connect(&path.display().to_string()).await;

        let error = result.err().unwrap();
        assert_eq!(error.provider, ProviderKind::Sqlite);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_ensure_database_exists_creates_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.db");
        let cs = path.display().to_string();

        assert!(SqliteProvider::ensure_database_exists(&cs).await.unwrap());
        assert!(path.exists());
        assert!(!SqliteProvider::ensure_database_exists(&cs).await.unwrap());
        assert!(SqliteProvider::connect(&cs).await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let cs = temp_dir.path().join("app.db").display().to_string();
        SqliteProvider::ensure_database_exists(&cs).await.unwrap();

        let mut provider = SqliteProvider::connect(&cs).await.unwrap();
        provider.acquire_lock().await.unwrap();
        provider.execute_batch("CREATE TABLE t (id INTEGER)").await.unwrap();
        provider.release_lock().await.unwrap();

        // 解放後は別の接続から書き込める
        let mut other = SqliteProvider::connect(&cs).await.unwrap();
        other.execute_batch("INSERT INTO t VALUES (1)").await.unwrap();
    }

    #[tokio::test]
    async fn test_second_session_waits_for_lock_past_busy_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let cs = temp_dir.path().join("app.db").display().to_string();
        SqliteProvider::ensure_database_exists(&cs).await.unwrap();

        let mut holder = SqliteProvider::connect(&cs).await.unwrap();
        holder.acquire_lock().await.unwrap();

        let mut waiter = SqliteProvider::connect(&cs).await.unwrap();
        waiter
            .set_busy_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        let waiting = tokio::spawn(async move {
            waiter.acquire_lock().await.map(|_| waiter)
        });

        // busy_timeout を何度も超えても待ち続けている
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!waiting.is_finished());

        holder.release_lock().await.unwrap();

        let mut waiter = tokio::time::timeout(Duration::from_secs(10), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        waiter.execute_batch("CREATE TABLE t (id INTEGER)").await.unwrap();
        waiter.release_lock().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_statement_is_query_error() {
        let mut provider = SqliteProvider::connect("sqlite::memory:").await.unwrap();

        let error = provider.execute_batch("SELEC 1").await.unwrap_err();
        assert!(error.is_query());
    }
}
