// SQL Serverプロバイダー
//
// tiberius（TDS）の単一接続でスクリプトを実行します。
// スクリプトは `GO` 区切りでバッチに分割され、バッチごとに送信されます。
// ロックはセッション所有のアプリケーションロック（sp_getapplock）を使用します。

use super::{quote_bracket_identifier, DatabaseProvider};
use crate::adapters::connection_string::ConnectionString;
use crate::core::config::ProviderKind;
use crate::core::error::{ConnectionFailedError, DatabaseError};
use crate::core::journal::JournalEntry;
use crate::core::naming::MSSQL_LOCK_RESOURCE;
use crate::core::script::ScriptId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tiberius::{Client, Config, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

type MsSqlClient = Client<Compat<TcpStream>>;

/// データベースを開けない（Cannot open database requested by the login）
const CANNOT_OPEN_DATABASE: u32 = 4060;

/// 一意インデックス違反 / 一意制約違反
const UNIQUE_VIOLATIONS: [u32; 2] = [2601, 2627];

const DATABASE_KEYS: [&str; 2] = ["Database", "Initial Catalog"];

const MAINTENANCE_DATABASE: &str = "master";

const ACQUIRE_LOCK_SQL: &str = "DECLARE @result INT; \
EXEC @result = sp_getapplock @Resource = @P1, @LockMode = 'Exclusive', @LockOwner = 'Session', @LockTimeout = -1; \
SELECT @result;";

const RELEASE_LOCK_SQL: &str = "EXEC sp_releaseapplock @Resource = @P1, @LockOwner = 'Session';";

/// SQL Serverプロバイダー
pub struct MsSqlProvider {
    client: MsSqlClient,
}

impl MsSqlProvider {
    /// ADO.NET形式の接続文字列を接続設定に変換
    pub fn parse_config(connection_string: &str) -> Result<Config, ConnectionFailedError> {
        Config::from_ado_string(connection_string.trim()).map_err(|e| {
            ConnectionFailedError::new(ProviderKind::MsSql, "Invalid connection string", e.to_string())
        })
    }

    /// データベースに接続
    pub async fn connect(connection_string: &str) -> Result<Self, ConnectionFailedError> {
        let config = Self::parse_config(connection_string)?;
        let client = open_client(config).await?;
        debug!("Connected to SQL Server");
        Ok(Self { client })
    }

    /// 対象データベースが存在しなければ作成
    ///
    /// `master` に接続し `DB_ID()` で存在を確認します。
    pub async fn ensure_database_exists(
        connection_string: &str,
    ) -> Result<bool, ConnectionFailedError> {
        let cs = ConnectionString::parse(connection_string).ok_or_else(|| {
            ConnectionFailedError::new(
                ProviderKind::MsSql,
                "Invalid connection string",
                "expected key=value pairs",
            )
        })?;
        let database = cs
            .get(&DATABASE_KEYS)
            .map(str::to_string)
            .ok_or_else(|| {
                ConnectionFailedError::new(
                    ProviderKind::MsSql,
                    "The connection string does not name a database",
                    "missing database name",
                )
            })?;

        let admin = cs.with_value(&DATABASE_KEYS, MAINTENANCE_DATABASE);
        let mut client = open_client(Self::parse_config(&admin.to_string())?).await?;

        let row = client
            .query("SELECT DB_ID(@P1)", &[&database.as_str()])
            .await
            .map_err(|e| connection_error("Could not query DB_ID", e))?
            .into_row()
            .await
            .map_err(|e| connection_error("Could not query DB_ID", e))?;

        let existing: Option<i32> = match row {
            Some(row) => row
                .try_get::<i32, _>(0)
                .map_err(|e| connection_error("Could not read DB_ID", e))?,
            None => None,
        };

        if existing.is_some() {
            debug!(database = %database, "Database already exists");
            return Ok(false);
        }

        let sql = format!("CREATE DATABASE {}", quote_bracket_identifier(&database));
        client
            .simple_query(sql)
            .await
            .map_err(|e| connection_error("Could not create the database", e))?
            .into_results()
            .await
            .map_err(|e| connection_error("Could not create the database", e))?;

        info!(database = %database, "Created database");
        Ok(true)
    }
}

#[async_trait]
impl DatabaseProvider for MsSqlProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MsSql
    }

    fn supports_batch_separator(&self) -> bool {
        true
    }

    async fn acquire_lock(&mut self) -> Result<(), DatabaseError> {
        let row = self
            .client
            .query(ACQUIRE_LOCK_SQL, &[&MSSQL_LOCK_RESOURCE])
            .await
            .map_err(|e| query_error(e, ACQUIRE_LOCK_SQL))?
            .into_row()
            .await
            .map_err(|e| query_error(e, ACQUIRE_LOCK_SQL))?;

        let code = row
            .map(|r| r.try_get::<i32, _>(0))
            .transpose()
            .map_err(|e| query_error(e, ACQUIRE_LOCK_SQL))?
            .flatten();

        // 0: 即時取得, 1: 待機後に取得, 負値: 失敗
        match code {
            Some(code) if code >= 0 => Ok(()),
            other => Err(DatabaseError::Query {
                message: format!("sp_getapplock returned {:?}", other),
                sql: Some(ACQUIRE_LOCK_SQL.to_string()),
            }),
        }
    }

    async fn release_lock(&mut self) -> Result<(), DatabaseError> {
        self.client
            .execute(RELEASE_LOCK_SQL, &[&MSSQL_LOCK_RESOURCE])
            .await
            .map(|_| ())
            .map_err(|e| query_error(e, RELEASE_LOCK_SQL))
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.client
            .simple_query(sql)
            .await
            .map_err(|e| query_error(e, sql))?
            .into_results()
            .await
            .map(|_| ())
            .map_err(|e| query_error(e, sql))
    }

    // トランザクション制御はsp_executesqlの外で実行する必要がある
    async fn execute_statement(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.execute_batch(sql).await
    }

    async fn fetch_journal(&mut self, sql: &str) -> Result<Vec<JournalEntry>, DatabaseError> {
        let rows = self
            .client
            .query(sql, &[])
            .await
            .map_err(|e| query_error(e, sql))?
            .into_first_result()
            .await
            .map_err(|e| query_error(e, sql))?;

        rows.iter()
            .map(read_entry)
            .collect::<Result<Vec<_>, tiberius::error::Error>>()
            .map_err(|e| query_error(e, sql))
    }

    async fn insert_journal(
        &mut self,
        sql: &str,
        entry: &JournalEntry,
    ) -> Result<(), DatabaseError> {
        self.client
            .execute(
                sql,
                &[
                    &entry.script_id.as_str(),
                    &entry.applied_at,
                    &entry.success,
                    &entry.content_hash.as_deref(),
                ],
            )
            .await
            .map(|_| ())
            .map_err(|e| query_error(e, sql))
    }
}

fn read_entry(row: &Row) -> Result<JournalEntry, tiberius::error::Error> {
    let missing = |column: &str| {
        tiberius::error::Error::Conversion(format!("journal column '{}' is NULL", column).into())
    };

    let script_id = row
        .try_get::<&str, _>(0)?
        .ok_or_else(|| missing("script_id"))?;
    let applied_at = row
        .try_get::<DateTime<Utc>, _>(1)?
        .ok_or_else(|| missing("applied_at"))?;
    let success = row
        .try_get::<bool, _>(2)?
        .ok_or_else(|| missing("success"))?;
    let content_hash = row.try_get::<&str, _>(3)?.map(str::to_string);

    Ok(JournalEntry {
        script_id: ScriptId::new(script_id),
        applied_at,
        content_hash,
        success,
    })
}

/// TCP接続を確立しTDSクライアントを作成
///
/// Azure SQLのゲートウェイによるリダイレクトに1回だけ追従します。
async fn open_client(config: Config) -> Result<MsSqlClient, ConnectionFailedError> {
    let client = match connect_tcp(config.clone()).await {
        Err(tiberius::error::Error::Routing { host, port }) => {
            debug!(host = %host, port, "Following SQL Server redirect");
            let mut config = config;
            config.host(&host);
            config.port(port);
            connect_tcp(config).await
        }
        other => other,
    };

    client.map_err(|e| connection_error("Could not connect to the database", e))
}

async fn connect_tcp(config: Config) -> Result<MsSqlClient, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Client::connect(config, tcp.compat_write()).await
}

fn server_code(error: &tiberius::error::Error) -> Option<u32> {
    match error {
        tiberius::error::Error::Server(token) => Some(token.code()),
        _ => None,
    }
}

fn connection_error(message: &str, error: tiberius::error::Error) -> ConnectionFailedError {
    let missing_database = server_code(&error) == Some(CANNOT_OPEN_DATABASE);
    ConnectionFailedError::new(ProviderKind::MsSql, message, error.to_string())
        .with_missing_database(missing_database)
}

fn query_error(error: tiberius::error::Error, sql: &str) -> DatabaseError {
    if server_code(&error).is_some_and(|code| UNIQUE_VIOLATIONS.contains(&code)) {
        return DatabaseError::UniqueViolation {
            message: error.to_string(),
        };
    }

    match error {
        tiberius::error::Error::Io { .. } => DatabaseError::Connection {
            message: "Lost connection to the database".to_string(),
            cause: error.to_string(),
        },
        _ => DatabaseError::Query {
            message: error.to_string(),
            sql: Some(sql.to_string()),
        },
    }
}
