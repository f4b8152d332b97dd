//! Sessions: units of work over the routed engines.
//!
//! A session resolves each statement to an engine through the [`Router`]
//! and lazily begins one transaction per engine it touches ("autobegin").
//! `commit` and `rollback` finish every open transaction together; the
//! session can be used again afterwards and will begin new transactions.
//!
//! Engines with `autocommit` enabled run statements directly on the pool.

mod blocking;

pub use blocking::Session;
pub(crate) use blocking::run_in_transaction as run_in_blocking_transaction;

use crate::config::SessionOptions;
use crate::db::connection::DbTransaction;
use crate::db::engine::Engine;
use crate::db::engines::Router;
use crate::db::sql_validator::validate_readonly;
use crate::db::statement::{Rendered, Statement, Target};
use crate::error::{Error, Result};
use crate::models::{FromValue, Model, Row};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Apply the session's statement timeout to `future`.
async fn with_timeout<T>(
    timeout: Option<Duration>,
    operation: &str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| Error::timeout(operation, limit.as_secs()))?,
        None => future.await,
    }
}

/// Asynchronous session.
///
/// ```ignore
/// let mut session = db.session()?;
/// session.execute(insert("user").value("name", "susan")).await?;
/// session.commit().await?;
/// ```
#[derive(Debug)]
pub struct AsyncSession {
    router: Arc<Router>,
    options: SessionOptions,
    /// Open transactions, in the order their engines were first used.
    transactions: Vec<(Engine, DbTransaction)>,
}

impl AsyncSession {
    pub(crate) fn new(router: Arc<Router>, options: SessionOptions) -> Self {
        Self {
            router,
            options,
            transactions: Vec::new(),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    /// Whether any transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.transactions.is_empty()
    }

    /// The engine a statement target resolves to. `None` is the default
    /// engine.
    pub fn get_bind(&self, target: Option<&Target>) -> Result<Engine> {
        self.router.resolve(target)
    }

    fn check_read_only(&self, statement: &Statement, engine: &Engine, sql: &str) -> Result<()> {
        if !self.options.read_only {
            return Ok(());
        }
        match statement {
            Statement::Select(_) => Ok(()),
            Statement::Text(_) => validate_readonly(sql, engine.dialect()),
            other => Err(Error::permission(
                other.kind().to_uppercase(),
                "Write statements are not allowed in a read-only session.",
            )),
        }
    }

    /// Resolve, render and vet a statement.
    fn prepare(&self, statement: &Statement) -> Result<(Engine, Rendered)> {
        let engine = self.router.resolve(statement.target().as_ref())?;
        let rendered = statement.render(engine.dialect());
        self.check_read_only(statement, &engine, &rendered.sql)?;

        if engine.echo() {
            info!(
                bind = %engine.bind(),
                sql = %rendered.sql,
                params = ?rendered.params,
                "Executing statement"
            );
        } else {
            debug!(
                bind = %engine.bind(),
                kind = statement.kind(),
                sql = %rendered.sql,
                "Executing statement"
            );
        }
        Ok((engine, rendered))
    }

    /// The open transaction for `engine`, beginning one if needed.
    async fn transaction_for(&mut self, engine: &Engine) -> Result<&mut DbTransaction> {
        let idx = match self
            .transactions
            .iter()
            .position(|(open, _)| Engine::ptr_eq(open, engine))
        {
            Some(idx) => idx,
            None => {
                let tx = engine.pool().begin().await?;
                debug!(bind = %engine.bind(), "Began transaction");
                self.transactions.push((engine.clone(), tx));
                self.transactions.len() - 1
            }
        };
        Ok(&mut self.transactions[idx].1)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&mut self, statement: impl Into<Statement>) -> Result<u64> {
        let statement = statement.into();
        let (engine, rendered) = self.prepare(&statement)?;
        let timeout = self.options.timeout();
        with_timeout(timeout, "execute", async {
            if engine.autocommit() {
                engine.pool().execute(&rendered.sql, &rendered.params).await
            } else {
                self.transaction_for(&engine)
                    .await?
                    .execute(&rendered.sql, &rendered.params)
                    .await
            }
        })
        .await
    }

    /// Run a query and return every row.
    pub async fn fetch_all(&mut self, statement: impl Into<Statement>) -> Result<Vec<Row>> {
        let statement = statement.into();
        let (engine, rendered) = self.prepare(&statement)?;
        let timeout = self.options.timeout();
        with_timeout(timeout, "fetch", async {
            if engine.autocommit() {
                engine.pool().fetch_all(&rendered.sql, &rendered.params).await
            } else {
                self.transaction_for(&engine)
                    .await?
                    .fetch_all(&rendered.sql, &rendered.params)
                    .await
            }
        })
        .await
    }

    /// The first row. No rows is `sqlx::Error::RowNotFound`.
    pub async fn fetch_one(&mut self, statement: impl Into<Statement>) -> Result<Row> {
        self.fetch_optional(statement)
            .await?
            .ok_or(Error::Driver(sqlx::Error::RowNotFound))
    }

    pub async fn fetch_optional(&mut self, statement: impl Into<Statement>) -> Result<Option<Row>> {
        Ok(self.fetch_all(statement).await?.into_iter().next())
    }

    /// First column of the first row, if there is a row.
    pub async fn scalar<T: FromValue>(&mut self, statement: impl Into<Statement>) -> Result<Option<T>> {
        match self.fetch_optional(statement).await? {
            Some(row) => Ok(Some(row.get_at(0)?)),
            None => Ok(None),
        }
    }

    /// Rows decoded as models.
    pub async fn scalars<M: Model>(&mut self, statement: impl Into<Statement>) -> Result<Vec<M>> {
        self.fetch_all(statement)
            .await?
            .iter()
            .map(M::from_row)
            .collect()
    }

    /// Insert a model into its table.
    pub async fn add<M: Model>(&mut self, model: &M) -> Result<u64> {
        self.execute(M::insert().values(model.to_values())).await
    }

    pub async fn add_all<'m, M, I>(&mut self, models: I) -> Result<u64>
    where
        M: Model + 'm,
        I: IntoIterator<Item = &'m M>,
    {
        let mut affected = 0;
        for model in models {
            affected += self.add(model).await?;
        }
        Ok(affected)
    }

    /// Commit every open transaction.
    ///
    /// Commits run engine by engine. If one fails, the remaining
    /// transactions are rolled back and the failure is returned.
    pub async fn commit(&mut self) -> Result<()> {
        let mut pending = std::mem::take(&mut self.transactions).into_iter();
        while let Some((engine, tx)) = pending.next() {
            if let Err(err) = tx.commit().await {
                warn!(bind = %engine.bind(), error = %err, "Commit failed");
                for (other, tx) in pending {
                    if let Err(e) = tx.rollback().await {
                        warn!(bind = %other.bind(), error = %e, "Rollback after failed commit failed");
                    }
                }
                return Err(err);
            }
            debug!(bind = %engine.bind(), "Committed transaction");
        }
        Ok(())
    }

    /// Roll back every open transaction. Every rollback is attempted; the
    /// first failure is returned.
    pub async fn rollback(&mut self) -> Result<()> {
        let mut first_error = None;
        for (engine, tx) in std::mem::take(&mut self.transactions) {
            match tx.rollback().await {
                Ok(()) => debug!(bind = %engine.bind(), "Rolled back transaction"),
                Err(err) => {
                    warn!(bind = %engine.bind(), error = %err, "Rollback failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release connections, discarding uncommitted work.
    pub async fn close(&mut self) -> Result<()> {
        if self.in_transaction() {
            self.rollback().await?;
        }
        Ok(())
    }
}

/// Run `f` in a session that commits on success and rolls back on error.
///
/// The caller's error is returned unchanged. A failed rollback after an
/// error is logged, not returned.
pub(crate) async fn run_in_transaction<F, T, E>(mut session: AsyncSession, f: F) -> std::result::Result<T, E>
where
    F: AsyncFnOnce(&mut AsyncSession) -> std::result::Result<T, E>,
    E: From<Error>,
{
    match f(&mut session).await {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = session.close().await {
                warn!(error = %rollback_err, "Rollback after error in transactional scope failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineOptions, Options};
    use crate::db::engine::{Mode, SqlxEngineFactory};
    use crate::db::engines::EngineRegistry;
    use crate::db::registry::Registry;
    use crate::db::statement::{insert, select, text};
    use crate::models::{BindKey, EntityDef};

    struct Fixture {
        engines: EngineRegistry,
        registry: Registry,
    }

    impl Fixture {
        fn new(options: Options) -> Self {
            Self {
                engines: EngineRegistry::new(&options, Mode::Async, Arc::new(SqlxEngineFactory)),
                registry: Registry::new(),
            }
        }

        fn session(&self, options: SessionOptions) -> AsyncSession {
            AsyncSession::new(self.engines.router(&self.registry).unwrap(), options)
        }

        async fn raw(&self, key: &BindKey, sql: &str) {
            let engine = self.engines.get_engine(key).unwrap().unwrap();
            engine.pool().execute(sql, &[]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_autobegin_and_commit() {
        let fx = Fixture::new(Options::new().url("sqlite://"));
        fx.raw(&BindKey::Default, "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await;

        let mut session = fx.session(SessionOptions::default());
        assert!(!session.in_transaction());
        session.execute(insert("t").value("name", "a")).await.unwrap();
        assert!(session.in_transaction());
        session.commit().await.unwrap();
        assert!(!session.in_transaction());

        let count: Option<i64> = session.scalar(select("t").count()).await.unwrap();
        assert_eq!(count, Some(1));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let fx = Fixture::new(Options::new().url("sqlite://"));
        fx.raw(&BindKey::Default, "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await;

        let mut session = fx.session(SessionOptions::default());
        session.execute(insert("t").value("name", "a")).await.unwrap();
        session.rollback().await.unwrap();
        let rows = session.fetch_all(select("t")).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_one_transaction_per_engine() {
        let reg_fx = Fixture::new(Options::new().url("sqlite://").bind("x", "sqlite://"));
        reg_fx
            .registry
            .register(EntityDef::new("Remote").bind("x"))
            .unwrap();
        reg_fx.raw(&BindKey::Default, "CREATE TABLE local (id INTEGER)").await;
        reg_fx.raw(&BindKey::named("x"), "CREATE TABLE remote (id INTEGER)").await;

        let mut session = reg_fx.session(SessionOptions::default());
        session.execute(insert("local").value("id", 1)).await.unwrap();
        session.execute(insert("remote").value("id", 2)).await.unwrap();
        session.execute(insert("remote").value("id", 3)).await.unwrap();
        assert_eq!(session.transactions.len(), 2);
        session.commit().await.unwrap();

        let remote = session.fetch_all(select("remote")).await.unwrap();
        assert_eq!(remote.len(), 2);
        let local = session.fetch_all(select("local")).await.unwrap();
        assert_eq!(local.len(), 1);
    }

    #[tokio::test]
    async fn test_read_only_session() {
        let fx = Fixture::new(Options::new().url("sqlite://"));
        fx.raw(&BindKey::Default, "CREATE TABLE t (id INTEGER)").await;

        let mut session = fx.session(SessionOptions::default().read_only(true));
        assert!(session.fetch_all(select("t")).await.is_ok());
        assert!(session.fetch_all(text("SELECT * FROM t")).await.is_ok());

        let err = session.execute(insert("t").value("id", 1)).await.unwrap_err();
        assert!(matches!(err, Error::Permission { .. }));
        let err = session.execute(text("DELETE FROM t")).await.unwrap_err();
        assert!(matches!(err, Error::Permission { .. }));
    }

    #[tokio::test]
    async fn test_autocommit_engine_skips_transactions() {
        let options = Options::new().url("sqlite://").engine_options(EngineOptions {
            autocommit: Some(true),
            ..Default::default()
        });
        let fx = Fixture::new(options);
        fx.raw(&BindKey::Default, "CREATE TABLE t (id INTEGER)").await;

        let mut session = fx.session(SessionOptions::default());
        session.execute(insert("t").value("id", 1)).await.unwrap();
        assert!(!session.in_transaction());
        session.rollback().await.unwrap();
        assert_eq!(session.fetch_all(select("t")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_one_without_rows() {
        let fx = Fixture::new(Options::new().url("sqlite://"));
        fx.raw(&BindKey::Default, "CREATE TABLE t (id INTEGER)").await;
        let mut session = fx.session(SessionOptions::default());
        let err = session.fetch_one(select("t")).await.unwrap_err();
        assert!(matches!(err.as_driver(), Some(sqlx::Error::RowNotFound)));
        assert!(session.fetch_optional(select("t")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_driver_error_is_untranslated() {
        let fx = Fixture::new(Options::new().url("sqlite://"));
        let mut session = fx.session(SessionOptions::default());
        let err = session.fetch_all(select("missing")).await.unwrap_err();
        assert!(matches!(err, Error::Driver(sqlx::Error::Database(_))));
        assert!(err.is_missing_table());
    }

    #[tokio::test]
    async fn test_run_in_transaction_returns_original_error() {
        #[derive(Debug)]
        enum AppError {
            Db(Error),
            Rejected(&'static str),
        }
        impl From<Error> for AppError {
            fn from(e: Error) -> Self {
                AppError::Db(e)
            }
        }

        let fx = Fixture::new(Options::new().url("sqlite://"));
        fx.raw(&BindKey::Default, "CREATE TABLE t (id INTEGER)").await;

        let result: std::result::Result<(), AppError> =
            run_in_transaction(fx.session(SessionOptions::default()), async |s: &mut AsyncSession| {
                s.execute(insert("t").value("id", 1)).await?;
                Err(AppError::Rejected("nope"))
            })
            .await;
        assert!(matches!(result, Err(AppError::Rejected("nope"))));

        let mut session = fx.session(SessionOptions::default());
        assert!(session.fetch_all(select("t")).await.unwrap().is_empty());
        if let Err(AppError::Db(e)) = result {
            panic!("unexpected database error: {}", e);
        }
    }
}
