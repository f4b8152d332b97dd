//! Transactions and statement execution against one engine.

use crate::db::engine::{DbPool, Dialect};
use crate::db::macros::backend_ops;
use crate::error::Result;
use crate::models::{Row, Value};
use sqlx::{MySql, Postgres, Sqlite, Transaction};

backend_ops!(mysql, sqlx::MySql, crate::db::params::bind_mysql_param);
backend_ops!(postgres, sqlx::Postgres, crate::db::params::bind_postgres_param);
backend_ops!(sqlite, sqlx::Sqlite, crate::db::params::bind_sqlite_param);

/// Database-specific transaction.
///
/// Dropping a transaction without committing rolls it back.
#[derive(Debug)]
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    pub fn dialect(&self) -> Dialect {
        match self {
            DbTransaction::MySql(_) => Dialect::MySQL,
            DbTransaction::Postgres(_) => Dialect::PostgreSQL,
            DbTransaction::SQLite(_) => Dialect::SQLite,
        }
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        match self {
            DbTransaction::MySql(tx) => mysql::execute(&mut **tx, sql, params).await,
            DbTransaction::Postgres(tx) => postgres::execute(&mut **tx, sql, params).await,
            DbTransaction::SQLite(tx) => sqlite::execute(&mut **tx, sql, params).await,
        }
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        match self {
            DbTransaction::MySql(tx) => mysql::fetch_all(&mut **tx, sql, params).await,
            DbTransaction::Postgres(tx) => postgres::fetch_all(&mut **tx, sql, params).await,
            DbTransaction::SQLite(tx) => sqlite::fetch_all(&mut **tx, sql, params).await,
        }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> Result<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await?,
            DbTransaction::Postgres(tx) => tx.commit().await?,
            DbTransaction::SQLite(tx) => tx.commit().await?,
        }
        Ok(())
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> Result<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await?,
            DbTransaction::Postgres(tx) => tx.rollback().await?,
            DbTransaction::SQLite(tx) => tx.rollback().await?,
        }
        Ok(())
    }
}

impl DbPool {
    /// Execute directly on the pool; the statement commits on its own.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        match self {
            DbPool::MySql(pool) => mysql::execute(pool, sql, params).await,
            DbPool::Postgres(pool) => postgres::execute(pool, sql, params).await,
            DbPool::SQLite(pool) => sqlite::execute(pool, sql, params).await,
        }
    }

    pub async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        match self {
            DbPool::MySql(pool) => mysql::fetch_all(pool, sql, params).await,
            DbPool::Postgres(pool) => postgres::fetch_all(pool, sql, params).await,
            DbPool::SQLite(pool) => sqlite::fetch_all(pool, sql, params).await,
        }
    }
}
