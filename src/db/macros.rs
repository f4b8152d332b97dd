//! Per-backend statement execution.
//!
//! The three backends share the same execution code and differ only in
//! their database type and parameter binder. `backend_ops!` generates one
//! module per backend so the code stays parallel without being written out
//! three times.

/// Generate a backend module with `execute` and `fetch_all` functions.
///
/// Both functions accept any sqlx executor for the backend: a pool when
/// running in autocommit mode, or `&mut *transaction`.
///
/// # Example
///
/// ```ignore
/// backend_ops!(sqlite, sqlx::Sqlite, bind_sqlite_param);
///
/// let affected = sqlite::execute(&mut *tx, "DELETE FROM user", &[]).await?;
/// ```
macro_rules! backend_ops {
    ($module:ident, $db:ty, $bind:path) => {
        pub(crate) mod $module {
            use $crate::db::types::DecodeRow;
            use $crate::error::Result;
            use $crate::models::{Row, Value};

            /// Execute a statement and return the number of affected rows.
            pub async fn execute<'c, E>(executor: E, sql: &str, params: &[Value]) -> Result<u64>
            where
                E: sqlx::Executor<'c, Database = $db>,
            {
                // Without parameters, run the raw SQL to avoid preparing
                // statements that cannot be prepared (some DDL).
                let result = if params.is_empty() {
                    executor.execute(sql).await?
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = $bind(query, param);
                    }
                    query.execute(executor).await?
                };
                Ok(result.rows_affected())
            }

            /// Run a query and decode every returned row.
            pub async fn fetch_all<'c, E>(
                executor: E,
                sql: &str,
                params: &[Value],
            ) -> Result<Vec<Row>>
            where
                E: sqlx::Executor<'c, Database = $db>,
            {
                let rows = if params.is_empty() {
                    executor.fetch_all(sql).await?
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = $bind(query, param);
                    }
                    query.fetch_all(executor).await?
                };
                Ok(rows.iter().map(DecodeRow::to_row).collect())
            }
        }
    };
}

pub(crate) use backend_ops;
