//! Blocking database instance.

use crate::config::{NamingConvention, Options};
use crate::core::Core;
use crate::db::bridge::Blocking;
use crate::db::engine::{Engine, EngineFactory, Mode, SqlxEngineFactory};
use crate::db::registry::{MetaData, Registry, Table};
use crate::db::schema::{self, SchemaInspector};
use crate::error::{Error, Result};
use crate::models::{BindKey, Entity, EntityDef};
use crate::session::{AsyncSession, Session, run_in_blocking_transaction};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

/// A database instance managing one default database and any number of
/// named binds, for blocking code.
///
/// ```ignore
/// let db = Alchemical::with_options(
///     Options::new().url("sqlite:///app.db").bind("users", "sqlite:///users.db"),
/// )?;
/// db.register::<User>()?;
/// db.create_all()?;
///
/// db.begin(|session| {
///     session.add(&User::new("susan"))?;
///     Ok::<_, Error>(())
/// })?;
/// ```
///
/// Instances can also be built in two phases: [`Alchemical::new`], register
/// entities, then [`Alchemical::initialize`].
///
/// Operations block the calling thread on a private runtime and must not be
/// called from async code; use [`AsyncAlchemical`](crate::AsyncAlchemical)
/// there.
#[derive(Debug)]
pub struct Alchemical {
    // Dropped before `blocking` so pools go away while the runtime exists.
    core: Option<Arc<Core>>,
    registry: Arc<Registry>,
    factory: Arc<dyn EngineFactory>,
    blocking: Arc<Blocking>,
}

impl Default for Alchemical {
    fn default() -> Self {
        Self::new()
    }
}

impl Alchemical {
    /// An uninitialized instance with a fresh registry.
    pub fn new() -> Self {
        Self {
            core: None,
            registry: Arc::new(Registry::new()),
            factory: Arc::new(SqlxEngineFactory),
            blocking: Arc::new(Blocking::owned()),
        }
    }

    /// Create and initialize in one step.
    pub fn with_options(options: Options) -> Result<Self> {
        let mut db = Self::new();
        db.initialize(options)?;
        Ok(db)
    }

    /// Use a custom engine factory for engines created from now on.
    pub fn with_engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Blocking view over an async instance's state, driven through `handle`.
    pub(crate) fn shadow(core: Arc<Core>, factory: Arc<dyn EngineFactory>, handle: Handle) -> Self {
        Self {
            registry: Arc::clone(&core.registry),
            core: Some(core),
            factory,
            blocking: Arc::new(Blocking::handle(handle)),
        }
    }

    /// Complete (or redo) initialization.
    ///
    /// Re-initializing replaces the configuration and discards engines and
    /// routing built for the previous one. Sessions already open keep using
    /// the old engines until they are dropped.
    pub fn initialize(&mut self, options: Options) -> Result<()> {
        if let Some(registry) = &options.registry {
            self.registry = Arc::clone(registry);
        }
        let core = Core::new(
            &options,
            Arc::clone(&self.registry),
            Mode::Sync,
            Arc::clone(&self.factory),
        )?;
        self.core = Some(Arc::new(core));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.core.is_some()
    }

    pub fn is_async(&self) -> bool {
        false
    }

    fn core(&self) -> Result<&Arc<Core>> {
        self.core.as_ref().ok_or(Error::NotInitialized)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register an entity type on its bind.
    pub fn register<E: Entity>(&self) -> Result<Arc<Table>> {
        self.registry.register_entity::<E>()
    }

    pub fn register_entity(&self, def: EntityDef) -> Result<Arc<Table>> {
        self.registry.register(def)
    }

    /// Tables registered on a bind.
    pub fn metadata(&self, bind: impl Into<BindKey>) -> Option<MetaData> {
        self.registry.metadata(&bind.into())
    }

    /// The engine for a bind, creating all engines on first use.
    ///
    /// `Ok(None)` when the bind has no URL, such as the default bind of a
    /// binds-only configuration.
    pub fn get_engine(&self, bind: impl Into<BindKey>) -> Result<Option<Engine>> {
        let core = self.core()?;
        let _guard = self.blocking.enter()?;
        core.engines.get_engine(&bind.into())
    }

    /// Names of the named binds with an engine.
    pub fn bind_names(&self) -> Vec<String> {
        self.core
            .as_ref()
            .map(|core| core.engines.bind_names())
            .unwrap_or_default()
    }

    /// A new session over the routed engines.
    pub fn session(&self) -> Result<Session> {
        let core = self.core()?;
        let router = {
            let _guard = self.blocking.enter()?;
            core.router()?
        };
        Ok(Session::new(
            AsyncSession::new(router, core.session_options.clone()),
            Arc::clone(&self.blocking),
        ))
    }

    /// Run `f` in a transaction: commit when it returns `Ok`, roll back and
    /// return its error unchanged otherwise.
    pub fn begin<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Session) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let session = self.session()?;
        run_in_blocking_transaction(session, f)
    }

    /// Create every registered table on its bind. Existing tables are left
    /// untouched.
    pub fn create_all(&self) -> Result<()> {
        let core = self.core()?;
        self.blocking.block_on(async {
            for (engine, tables) in core.schema_targets()? {
                schema::create_tables(&engine, &tables, &core.naming).await?;
            }
            Ok::<_, Error>(())
        })??;
        info!("create_all finished");
        Ok(())
    }

    /// Drop every registered table from its bind.
    pub fn drop_all(&self) -> Result<()> {
        let core = self.core()?;
        self.blocking.block_on(async {
            for (engine, tables) in core.schema_targets()? {
                schema::drop_tables(&engine, &tables, &core.naming).await?;
            }
            Ok::<_, Error>(())
        })??;
        info!("drop_all finished");
        Ok(())
    }

    /// Close every engine's pool.
    pub fn close_all(&self) -> Result<()> {
        let core = self.core()?;
        self.blocking.block_on(core.engines.close_all())
    }

    /// Tables that currently exist in a bind's database, `Ok(None)` when the
    /// bind has no engine.
    pub fn existing_tables(&self, bind: impl Into<BindKey>) -> Result<Option<Vec<String>>> {
        let Some(engine) = self.get_engine(bind)? else {
            return Ok(None);
        };
        let tables = self
            .blocking
            .block_on(SchemaInspector::list_tables(engine.pool()))??;
        Ok(Some(tables))
    }

    pub(crate) fn blocking(&self) -> &Blocking {
        &self.blocking
    }

    /// Naming convention applied to DDL.
    pub fn naming_convention(&self) -> Result<&NamingConvention> {
        Ok(&self.core()?.naming)
    }
}
