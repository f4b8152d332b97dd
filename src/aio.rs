//! Asynchronous database instance.

use crate::alchemical::Alchemical;
use crate::config::{NamingConvention, Options};
use crate::core::Core;
use crate::db::bridge::run_blocking;
use crate::db::engine::{Engine, EngineFactory, Mode, SqlxEngineFactory};
use crate::db::registry::{MetaData, Registry, Table};
use crate::error::{Error, Result};
use crate::models::{BindKey, Entity, EntityDef};
use crate::session::{AsyncSession, run_in_transaction};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;

fn current_handle() -> Result<Handle> {
    Handle::try_current()
        .map_err(|_| Error::bridge("AsyncAlchemical must be used inside a tokio runtime"))
}

/// A database instance for async code.
///
/// Engines are created with the async driver URL forms
/// (`sqlite+aiosqlite`, `mysql+aiomysql`, `postgresql+asyncpg`). Bulk
/// schema operations run the blocking implementation on tokio's blocking
/// pool through a shadow [`Alchemical`] that shares this instance's registry
/// and engines.
///
/// ```ignore
/// let db = AsyncAlchemical::with_options(Options::new().url("sqlite://"))?;
/// db.register::<User>()?;
/// db.create_all().await?;
///
/// db.begin(async |session| {
///     session.add(&User::new("susan")).await?;
///     Ok::<_, Error>(())
/// })
/// .await?;
/// ```
#[derive(Debug)]
pub struct AsyncAlchemical {
    core: Option<Arc<Core>>,
    registry: Arc<Registry>,
    factory: Arc<dyn EngineFactory>,
    /// Built on first bridged call, reset by `initialize`.
    shadow: OnceLock<Arc<Alchemical>>,
}

impl Default for AsyncAlchemical {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncAlchemical {
    pub fn new() -> Self {
        Self {
            core: None,
            registry: Arc::new(Registry::new()),
            factory: Arc::new(SqlxEngineFactory),
            shadow: OnceLock::new(),
        }
    }

    pub fn with_options(options: Options) -> Result<Self> {
        let mut db = Self::new();
        db.initialize(options)?;
        Ok(db)
    }

    pub fn with_engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Complete (or redo) initialization. Engines, routing and the bridged
    /// shadow of a previous initialization are discarded.
    pub fn initialize(&mut self, options: Options) -> Result<()> {
        if let Some(registry) = &options.registry {
            self.registry = Arc::clone(registry);
        }
        let core = Core::new(
            &options,
            Arc::clone(&self.registry),
            Mode::Async,
            Arc::clone(&self.factory),
        )?;
        self.core = Some(Arc::new(core));
        self.shadow = OnceLock::new();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.core.is_some()
    }

    pub fn is_async(&self) -> bool {
        true
    }

    fn core(&self) -> Result<&Arc<Core>> {
        self.core.as_ref().ok_or(Error::NotInitialized)
    }

    pub fn naming_convention(&self) -> Result<&NamingConvention> {
        Ok(&self.core()?.naming)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn register<E: Entity>(&self) -> Result<Arc<Table>> {
        self.registry.register_entity::<E>()
    }

    pub fn register_entity(&self, def: EntityDef) -> Result<Arc<Table>> {
        self.registry.register(def)
    }

    pub fn metadata(&self, bind: impl Into<BindKey>) -> Option<MetaData> {
        self.registry.metadata(&bind.into())
    }

    /// The engine for a bind, creating all engines on first use. Must be
    /// called inside a tokio runtime.
    pub fn get_engine(&self, bind: impl Into<BindKey>) -> Result<Option<Engine>> {
        let core = self.core()?;
        current_handle()?;
        core.engines.get_engine(&bind.into())
    }

    pub fn bind_names(&self) -> Vec<String> {
        self.core
            .as_ref()
            .map(|core| core.engines.bind_names())
            .unwrap_or_default()
    }

    pub fn session(&self) -> Result<AsyncSession> {
        let core = self.core()?;
        current_handle()?;
        Ok(AsyncSession::new(core.router()?, core.session_options.clone()))
    }

    /// Run `f` in a transaction: commit when it returns `Ok`, roll back and
    /// return its error unchanged otherwise.
    pub async fn begin<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: AsyncFnOnce(&mut AsyncSession) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let session = self.session()?;
        run_in_transaction(session, f).await
    }

    /// The blocking shadow instance, created once per initialization.
    pub(crate) fn shadow(&self) -> Result<Arc<Alchemical>> {
        let core = self.core()?;
        if let Some(shadow) = self.shadow.get() {
            return Ok(Arc::clone(shadow));
        }
        let handle = current_handle()?;
        let shadow = self.shadow.get_or_init(|| {
            Arc::new(Alchemical::shadow(
                Arc::clone(core),
                Arc::clone(&self.factory),
                handle,
            ))
        });
        Ok(Arc::clone(shadow))
    }

    /// Run blocking code against the shadow instance on tokio's blocking
    /// pool. The shadow re-enters this runtime for every statement, so `f`
    /// may use sessions and schema operations freely.
    pub async fn run_sync<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Alchemical) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shadow = self.shadow()?;
        run_blocking(move || f(&shadow)).await
    }

    pub async fn create_all(&self) -> Result<()> {
        self.run_sync(|db| db.create_all()).await
    }

    pub async fn drop_all(&self) -> Result<()> {
        self.run_sync(|db| db.drop_all()).await
    }

    pub async fn close_all(&self) -> Result<()> {
        self.core()?.engines.close_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::statement::{insert, select};
    use crate::models::Column;

    #[tokio::test]
    async fn test_is_async_and_uninitialized() {
        let db = AsyncAlchemical::new();
        assert!(db.is_async());
        assert!(matches!(db.session(), Err(Error::NotInitialized)));
        assert!(matches!(db.create_all().await, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn test_shadow_is_reused_and_shares_engines() {
        let db = AsyncAlchemical::with_options(Options::new().url("sqlite://")).unwrap();
        let a = db.shadow().unwrap();
        let b = db.shadow().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(a.registry(), db.registry()));

        let engine = db.get_engine(BindKey::Default).unwrap().unwrap();
        let shadow_engine = db
            .run_sync(|shadow| shadow.get_engine(BindKey::Default))
            .await
            .unwrap()
            .unwrap();
        assert!(Engine::ptr_eq(&engine, &shadow_engine));
    }

    #[tokio::test]
    async fn test_reinitialize_resets_shadow() {
        let mut db = AsyncAlchemical::with_options(Options::new().url("sqlite://")).unwrap();
        let before = db.shadow().unwrap();
        db.initialize(Options::new().url("sqlite://")).unwrap();
        let after = db.shadow().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_create_all_through_bridge() {
        let db = AsyncAlchemical::with_options(Options::new().url("sqlite://")).unwrap();
        db.register_entity(
            EntityDef::new("Item")
                .column(Column::integer("id").primary_key())
                .column(Column::text("name")),
        )
        .unwrap();
        db.create_all().await.unwrap();

        db.begin(async |s: &mut AsyncSession| s.execute(insert("item").value("name", "a")).await)
            .await
            .unwrap();
        let mut session = db.session().unwrap();
        assert_eq!(session.fetch_all(select("item")).await.unwrap().len(), 1);
    }
}
