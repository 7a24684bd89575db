//! Live schema catalog over a MySQL connection pool

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Opts, Pool, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::common::{FlashbackError, LogFileEntry, Result, SchemaCatalog};

/// Server error code for an unknown system variable.
const ER_UNKNOWN_SYSTEM_VARIABLE: u16 = 1193;

/// MySQL connection settings
///
/// Debug output redacts the password.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub host: String,
    /// Port (default: 3306)
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Default database of the session (optional)
    pub database: Option<String>,
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .finish()
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: None,
            database: None,
        }
    }
}

impl ConnectionOptions {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Connection URL with user and password percent-encoded.
    pub fn url(&self) -> Result<String> {
        let invalid = |what: &str| FlashbackError::config(format!("invalid MySQL {}", what));

        let mut url = url::Url::parse(&format!("mysql://{}:{}/", self.host, self.port))
            .map_err(|e| FlashbackError::config(format!("invalid MySQL host: {}", e)))?;
        url.set_username(&self.user).map_err(|_| invalid("user"))?;
        url.set_password(self.password.as_deref())
            .map_err(|_| invalid("password"))?;
        if let Some(database) = &self.database {
            url.set_path(database);
        }
        Ok(url.to_string())
    }
}

/// [`SchemaCatalog`] backed by `INFORMATION_SCHEMA` and server variables.
pub struct MySqlCatalog {
    pool: Pool,
    options: ConnectionOptions,
}

impl MySqlCatalog {
    /// Create the pool and verify the server is reachable.
    pub async fn connect(options: ConnectionOptions) -> Result<Self> {
        let opts = Opts::from_url(&options.url()?)
            .map_err(|e| FlashbackError::config(format!("invalid MySQL URL: {}", e)))?;
        let pool = Pool::new(opts);

        let mut conn = pool.get_conn().await.map_err(|e| {
            FlashbackError::connection(format!(
                "cannot connect to {}:{}: {}",
                options.host, options.port, e
            ))
        })?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| FlashbackError::connection(format!("ping failed: {}", e)))?;
        drop(conn);

        info!(
            "Connected to MySQL at {}:{} as {}",
            options.host, options.port, options.user
        );
        Ok(Self { pool, options })
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Close all pooled connections.
    pub async fn disconnect(self) -> Result<()> {
        self.pool
            .disconnect()
            .await
            .map_err(|e| FlashbackError::connection(format!("disconnect failed: {}", e)))
    }

    async fn conn(&self) -> Result<mysql_async::Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| FlashbackError::connection(e.to_string()))
    }
}

fn catalog_error(what: &str, e: mysql_async::Error) -> FlashbackError {
    FlashbackError::catalog(format!("{}: {}", what, e))
}

/// Parse one `SHOW BINARY LOGS` row (`Log_name`, `File_size`, ...).
fn log_file_entry(row: &Row) -> Result<LogFileEntry> {
    let name = row
        .get_opt::<String, _>(0)
        .and_then(|v| v.ok())
        .ok_or_else(|| FlashbackError::catalog("SHOW BINARY LOGS row without Log_name"))?;
    let size = row
        .get_opt::<u64, _>(1)
        .and_then(|v| v.ok())
        .ok_or_else(|| FlashbackError::catalog("SHOW BINARY LOGS row without File_size"))?;
    Ok(LogFileEntry::new(name, size))
}

/// Directory of `log_bin_basename`.
fn basename_directory(basename: &str) -> Result<PathBuf> {
    match Path::new(basename).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.to_path_buf()),
        _ => Err(FlashbackError::catalog(format!(
            "cannot derive binlog directory from log_bin_basename '{}'",
            basename
        ))),
    }
}

#[async_trait]
impl SchemaCatalog for MySqlCatalog {
    async fn columns_of(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT COLUMN_NAME
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;
        let mut conn = self.conn().await?;
        let columns: Vec<String> = conn
            .exec(query, (schema, table))
            .await
            .map_err(|e| catalog_error("column query failed", e))?;
        debug!(
            "Fetched {} column names for {}.{}",
            columns.len(),
            schema,
            table
        );
        Ok(columns)
    }

    async fn list_log_files(&self) -> Result<Vec<LogFileEntry>> {
        let mut conn = self.conn().await?;
        let rows: Vec<Row> = conn
            .query("SHOW BINARY LOGS")
            .await
            .map_err(|e| catalog_error("SHOW BINARY LOGS failed", e))?;
        rows.iter().map(log_file_entry).collect()
    }

    async fn gtid_enabled(&self) -> Result<bool> {
        let mut conn = self.conn().await?;
        match conn
            .query_first::<String, _>("SELECT @@GLOBAL.GTID_MODE")
            .await
        {
            Ok(mode) => Ok(mode.is_some_and(|m| m.eq_ignore_ascii_case("ON"))),
            // MariaDB has no gtid_mode
            Err(mysql_async::Error::Server(e)) if e.code == ER_UNKNOWN_SYSTEM_VARIABLE => {
                debug!("gtid_mode not available: {}", e.message);
                Ok(false)
            }
            Err(e) => Err(catalog_error("GTID mode query failed", e)),
        }
    }

    async fn binlog_directory(&self) -> Result<PathBuf> {
        let mut conn = self.conn().await?;
        let basename: Option<String> = conn
            .query_first("SELECT @@GLOBAL.log_bin_basename")
            .await
            .map_err(|e| catalog_error("log_bin_basename query failed", e))?;
        match basename {
            Some(basename) => basename_directory(&basename),
            None => Err(FlashbackError::catalog(
                "log_bin_basename is not set; binary logging may be disabled",
            )),
        }
    }
}
