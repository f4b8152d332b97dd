use super::AsyncSession;
use crate::config::SessionOptions;
use crate::db::bridge::Blocking;
use crate::db::engine::Engine;
use crate::db::statement::{Statement, Target};
use crate::error::Result;
use crate::models::{FromValue, Model, Row};
use std::sync::Arc;
use tracing::warn;

/// Blocking session, returned by `Alchemical::session`.
///
/// Same semantics as [`AsyncSession`], driven on the instance's blocking
/// executor. Must not be used from inside an async context.
#[derive(Debug)]
pub struct Session {
    inner: AsyncSession,
    blocking: Arc<Blocking>,
}

impl Session {
    pub(crate) fn new(inner: AsyncSession, blocking: Arc<Blocking>) -> Self {
        Self { inner, blocking }
    }

    pub fn options(&self) -> &SessionOptions {
        self.inner.options()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    pub fn get_bind(&self, target: Option<&Target>) -> Result<Engine> {
        self.inner.get_bind(target)
    }

    pub fn execute(&mut self, statement: impl Into<Statement>) -> Result<u64> {
        self.blocking.block_on(self.inner.execute(statement))?
    }

    pub fn fetch_all(&mut self, statement: impl Into<Statement>) -> Result<Vec<Row>> {
        self.blocking.block_on(self.inner.fetch_all(statement))?
    }

    pub fn fetch_one(&mut self, statement: impl Into<Statement>) -> Result<Row> {
        self.blocking.block_on(self.inner.fetch_one(statement))?
    }

    pub fn fetch_optional(&mut self, statement: impl Into<Statement>) -> Result<Option<Row>> {
        self.blocking.block_on(self.inner.fetch_optional(statement))?
    }

    pub fn scalar<T: FromValue>(&mut self, statement: impl Into<Statement>) -> Result<Option<T>> {
        self.blocking.block_on(self.inner.scalar(statement))?
    }

    pub fn scalars<M: Model>(&mut self, statement: impl Into<Statement>) -> Result<Vec<M>> {
        self.blocking.block_on(self.inner.scalars(statement))?
    }

    pub fn add<M: Model>(&mut self, model: &M) -> Result<u64> {
        self.blocking.block_on(self.inner.add(model))?
    }

    pub fn add_all<'m, M, I>(&mut self, models: I) -> Result<u64>
    where
        M: Model + 'm,
        I: IntoIterator<Item = &'m M>,
    {
        self.blocking.block_on(self.inner.add_all(models))?
    }

    pub fn commit(&mut self) -> Result<()> {
        self.blocking.block_on(self.inner.commit())?
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.blocking.block_on(self.inner.rollback())?
    }

    pub fn close(&mut self) -> Result<()> {
        self.blocking.block_on(self.inner.close())?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Returning connections to their pools needs the runtime.
        if self.inner.in_transaction() {
            if let Err(e) = self.close() {
                warn!(error = %e, "Failed to close session on drop");
            }
        }
    }
}

/// Run `f` in a blocking session that commits on success and rolls back on
/// error, returning the caller's error unchanged.
pub(crate) fn run_in_transaction<F, T, E>(mut session: Session, f: F) -> std::result::Result<T, E>
where
    F: FnOnce(&mut Session) -> std::result::Result<T, E>,
    E: From<crate::error::Error>,
{
    match f(&mut session) {
        Ok(value) => {
            session.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = session.close() {
                warn!(error = %rollback_err, "Rollback after error in transactional scope failed");
            }
            Err(err)
        }
    }
}
