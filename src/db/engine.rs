//! Engines: one sqlx connection pool per bind.
//!
//! This module uses database-specific pools (MySqlPool, PgPool, SqlitePool)
//! rather than `AnyPool` so every backend keeps full type support. Pools are
//! created lazily: no connection is opened until a session first needs one.

use crate::config::EngineOptions;
use crate::db::connection::DbTransaction;
use crate::error::{Error, Result};
use crate::models::BindKey;
use serde::{Deserialize, Serialize};
use sqlx::pool::PoolOptions;
use sqlx::{
    Database, MySqlPool, PgPool, SqlitePool, mysql::MySqlConnectOptions,
    postgres::PgConnectOptions, sqlite::SqliteConnectOptions,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// SQL dialects understood by the statement and DDL renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl Dialect {
    /// Detect the dialect from a URL scheme.
    ///
    /// Only the family part of the scheme is considered, so
    /// `postgresql+asyncpg://` is PostgreSQL.
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split_once(':').map(|(s, _)| s)?;
        let family = scheme.split('+').next().unwrap_or(scheme);
        match family.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Bind parameter placeholder for the 1-based position `idx`.
    pub fn placeholder(&self, idx: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${}", idx),
            Self::MySQL | Self::SQLite => "?".to_string(),
        }
    }

    /// Quote an identifier.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Self::MySQL => format!("`{}`", ident.replace('`', "``")),
            Self::PostgreSQL | Self::SQLite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Which facade an engine is created for. Decides the URL scheme rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Sync,
    Async,
}

impl Mode {
    fn prefix_map(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Sync => &[("postgres", "postgresql")],
            Self::Async => &[
                ("sqlite", "sqlite+aiosqlite"),
                ("mysql", "mysql+aiomysql"),
                ("postgres", "postgresql+asyncpg"),
                ("postgresql", "postgresql+asyncpg"),
            ],
        }
    }
}

/// Rewrite a generic URL scheme to the one the mode's driver family uses.
///
/// Only `scheme://` URLs are rewritten; anything else passes through.
pub fn fix_url(url: &str, mode: Mode) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    mode.prefix_map()
        .iter()
        .find(|(prefix, _)| *prefix == scheme)
        .map(|(_, updated)| format!("{}://{}", updated, rest))
        .unwrap_or_else(|| url.to_string())
}

/// Replace the (possibly driver-qualified) scheme with a plain one.
fn driver_url(url: &str, scheme: &str) -> String {
    match url.split_once("://") {
        Some((_, rest)) => format!("{}://{}", scheme, rest),
        None => url.to_string(),
    }
}

/// Mask the password in a URL for logging.
pub fn mask_url(url: &str) -> String {
    let authority_start = url.find("://").map(|p| p + 3).unwrap_or(0);
    // Credentials end at the first `@` after the scheme.
    if let Some(at_pos) = url[authority_start..].find('@').map(|p| authority_start + p) {
        if let Some(colon_pos) = url[authority_start..at_pos].rfind(':') {
            let colon_pos = authority_start + colon_pos;
            return format!("{}****{}", &url[..colon_pos + 1], &url[at_pos..]);
        }
    }
    url.to_string()
}

/// Where an SQLite URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    /// Private in-memory database.
    Memory,
    File(PathBuf),
}

/// Resolve an SQLite URL.
///
/// `sqlite://` and `sqlite://:memory:` are in-memory, `sqlite:///rel.db` is
/// relative, `sqlite:////abs/path.db` is absolute and `sqlite:path.db` is a
/// plain path.
pub fn sqlite_target(url: &str) -> SqliteTarget {
    let rest = url.split_once(':').map(|(_, r)| r).unwrap_or(url);
    let rest = rest.split_once('?').map(|(p, _)| p).unwrap_or(rest);

    let path = if let Some(abs) = rest.strip_prefix("////") {
        format!("/{}", abs)
    } else if let Some(rel) = rest.strip_prefix("///") {
        rel.to_string()
    } else if let Some(rel) = rest.strip_prefix("//") {
        rel.to_string()
    } else {
        rest.to_string()
    };

    if path.is_empty() || path == ":memory:" {
        SqliteTarget::Memory
    } else {
        SqliteTarget::File(PathBuf::from(path))
    }
}

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::MySql(pool) => pool.is_closed(),
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::SQLite(pool) => pool.is_closed(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            DbPool::MySql(_) => Dialect::MySQL,
            DbPool::Postgres(_) => Dialect::PostgreSQL,
            DbPool::SQLite(_) => Dialect::SQLite,
        }
    }

    /// Acquire a connection and start a transaction on it.
    pub async fn begin(&self) -> Result<DbTransaction> {
        Ok(match self {
            DbPool::MySql(pool) => DbTransaction::MySql(pool.begin().await?),
            DbPool::Postgres(pool) => DbTransaction::Postgres(pool.begin().await?),
            DbPool::SQLite(pool) => DbTransaction::SQLite(pool.begin().await?),
        })
    }
}

#[derive(Debug)]
struct EngineInner {
    bind: BindKey,
    url: String,
    options: EngineOptions,
    pool: DbPool,
}

/// A connection pool for one bind. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Engine(Arc<EngineInner>);

impl Engine {
    pub fn new(bind: BindKey, url: impl Into<String>, options: EngineOptions, pool: DbPool) -> Self {
        Self(Arc::new(EngineInner {
            bind,
            url: url.into(),
            options,
            pool,
        }))
    }

    pub fn bind(&self) -> &BindKey {
        &self.0.bind
    }

    /// The URL after scheme rewriting, without engine option parameters.
    pub fn url(&self) -> &str {
        &self.0.url
    }

    pub fn dialect(&self) -> Dialect {
        self.0.pool.dialect()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.0.options
    }

    pub fn pool(&self) -> &DbPool {
        &self.0.pool
    }

    pub fn echo(&self) -> bool {
        self.0.options.echo_or_default()
    }

    pub fn autocommit(&self) -> bool {
        self.0.options.autocommit_or_default()
    }

    /// Whether two handles refer to the same engine.
    pub fn ptr_eq(a: &Engine, b: &Engine) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Close the pool. Sessions holding connections finish first.
    pub async fn close(&self) {
        info!(bind = %self.0.bind, "Closing engine");
        self.0.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.0.pool.is_closed()
    }
}

/// Apply the driver parameters left in an SQLite URL's query string.
///
/// Engine options are already stripped; anything else not understood here is
/// rejected rather than dropped.
fn apply_sqlite_params(
    mut connect: SqliteConnectOptions,
    url: &str,
) -> Result<SqliteConnectOptions> {
    let Some((_, query)) = url.split_once('?') else {
        return Ok(connect);
    };
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        connect = match (key.to_ascii_lowercase().as_str(), value.as_ref()) {
            ("mode", "ro") => connect.read_only(true),
            ("mode", "rw") => connect.create_if_missing(false),
            ("mode", "rwc") => connect.create_if_missing(true),
            ("cache", "shared") => connect.shared_cache(true),
            ("cache", "private") => connect.shared_cache(false),
            ("immutable", "true" | "1") => connect.immutable(true),
            ("immutable", "false" | "0") => connect.immutable(false),
            ("vfs", vfs) => connect.vfs(vfs.to_string()),
            _ => {
                return Err(Error::config(format!(
                    "Unsupported SQLite URL parameter '{}={}'",
                    key, value
                )));
            }
        };
    }
    Ok(connect)
}

/// Builds engines. Swappable so tests can observe engine creation.
pub trait EngineFactory: Send + Sync + std::fmt::Debug {
    /// Create the engine for `bind`.
    ///
    /// `url` has already been rewritten for the instance's mode and stripped
    /// of engine option parameters. Called inside a tokio runtime context.
    fn create_engine(&self, bind: &BindKey, url: &str, options: &EngineOptions) -> Result<Engine>;
}

/// Default factory: lazily connecting sqlx pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxEngineFactory;

impl SqlxEngineFactory {
    fn pool_options<DB: Database>(options: &EngineOptions, is_sqlite: bool) -> PoolOptions<DB> {
        let mut pool = PoolOptions::<DB>::new()
            .min_connections(options.min_connections_or_default())
            .max_connections(options.max_connections_or_default(is_sqlite))
            .acquire_timeout(options.acquire_timeout())
            .idle_timeout(Some(Duration::from_secs(options.idle_timeout_or_default())))
            .test_before_acquire(options.test_before_acquire_or_default());
        if let Some(secs) = options.max_lifetime_secs {
            pool = pool.max_lifetime(Some(Duration::from_secs(secs)));
        }
        pool
    }

    fn sqlite_pool(url: &str, options: &EngineOptions) -> Result<SqlitePool> {
        let pool = Self::pool_options::<sqlx::Sqlite>(options, true);
        match sqlite_target(url) {
            SqliteTarget::Memory => {
                // The database lives only as long as its single connection.
                let connect = SqliteConnectOptions::from_str("sqlite::memory:")?;
                let connect = apply_sqlite_params(connect, url)?;
                Ok(pool
                    .max_connections(1)
                    .min_connections(0)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_lazy_with(connect))
            }
            SqliteTarget::File(path) => {
                let connect = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .foreign_keys(true);
                let connect = apply_sqlite_params(connect, url)?;
                Ok(pool.connect_lazy_with(connect))
            }
        }
    }

    fn mysql_pool(url: &str, options: &EngineOptions) -> Result<MySqlPool> {
        let connect = MySqlConnectOptions::from_str(&driver_url(url, "mysql"))
            .map_err(|e| Error::config(format!("Invalid MySQL URL: {}", e)))?
            .charset("utf8mb4");
        Ok(Self::pool_options::<sqlx::MySql>(options, false).connect_lazy_with(connect))
    }

    fn postgres_pool(url: &str, options: &EngineOptions) -> Result<PgPool> {
        let connect = PgConnectOptions::from_str(&driver_url(url, "postgres"))
            .map_err(|e| Error::config(format!("Invalid PostgreSQL URL: {}", e)))?;
        Ok(Self::pool_options::<sqlx::Postgres>(options, false).connect_lazy_with(connect))
    }
}

impl EngineFactory for SqlxEngineFactory {
    fn create_engine(&self, bind: &BindKey, url: &str, options: &EngineOptions) -> Result<Engine> {
        options.validate().map_err(Error::config)?;

        let dialect = Dialect::from_url(url).ok_or_else(|| {
            Error::config(format!(
                "Unsupported database URL '{}' for bind {}: expected sqlite, mysql or postgresql",
                mask_url(url),
                bind
            ))
        })?;

        let pool = match dialect {
            Dialect::SQLite => DbPool::SQLite(Self::sqlite_pool(url, options)?),
            Dialect::MySQL => DbPool::MySql(Self::mysql_pool(url, options)?),
            Dialect::PostgreSQL => DbPool::Postgres(Self::postgres_pool(url, options)?),
        };

        info!(
            bind = %bind,
            dialect = %dialect,
            url = %mask_url(url),
            "Created engine"
        );

        Ok(Engine::new(bind.clone(), url, options.clone(), pool))
    }
}
