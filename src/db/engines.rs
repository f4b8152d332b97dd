//! Engine registry and table router.
//!
//! Engines for every configured bind are created together, once, on first
//! use. The first caller takes the mutex, re-checks, and builds the whole
//! set; every later call is a lock-free read of the `OnceLock`.
//!
//! The router maps each named-bind table to its bind's engine. Tables of the
//! default bind are not in the map and fall through to the default engine.
//! It is rebuilt wholesale whenever the registry has changed since the last
//! build.

use crate::config::{EngineOptions, EngineOptionsSource, Options, extract_engine_options};
use crate::db::engine::{Engine, EngineFactory, Mode, fix_url};
use crate::db::registry::Registry;
use crate::db::statement::Target;
use crate::error::{Error, Result};
use crate::models::BindKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use tracing::{debug, info};

/// Live engines, in configuration order (default first).
#[derive(Debug, Default)]
pub struct EngineSet {
    engines: Vec<(BindKey, Engine)>,
}

impl EngineSet {
    pub fn get(&self, key: &BindKey) -> Option<&Engine> {
        self.engines
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, engine)| engine)
    }

    pub fn default_engine(&self) -> Option<&Engine> {
        self.get(&BindKey::Default)
    }

    /// Names of non-default binds with an engine, in configuration order.
    pub fn bind_names(&self) -> Vec<String> {
        self.engines
            .iter()
            .filter_map(|(key, _)| key.name().map(String::from))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BindKey, &Engine)> {
        self.engines.iter().map(|(k, e)| (k, e))
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

/// Lazily created engines for one initialization of a database instance.
#[derive(Debug)]
pub struct EngineRegistry {
    mode: Mode,
    /// Raw URLs per bind, in configuration order.
    urls: Vec<(BindKey, String)>,
    engine_options: Option<EngineOptionsSource>,
    factory: Arc<dyn EngineFactory>,
    lock: Mutex<()>,
    engines: OnceLock<Arc<EngineSet>>,
    router: RwLock<Option<Arc<Router>>>,
}

impl EngineRegistry {
    pub fn new(options: &Options, mode: Mode, factory: Arc<dyn EngineFactory>) -> Self {
        let urls = options
            .bind_keys()
            .into_iter()
            .filter_map(|key| {
                let url = options.url_for(&key)?.to_string();
                Some((key, url))
            })
            .collect();
        Self {
            mode,
            urls,
            engine_options: options.engine_options.clone(),
            factory,
            lock: Mutex::new(()),
            engines: OnceLock::new(),
            router: RwLock::new(None),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Configured bind keys, in configuration order.
    pub fn configured_binds(&self) -> Vec<BindKey> {
        self.urls.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Whether engines have been created.
    pub fn is_created(&self) -> bool {
        self.engines.get().is_some()
    }

    /// Effective engine options for a bind: explicit options, then URL
    /// parameters, then defaults.
    fn options_for(&self, key: &BindKey, url_options: &EngineOptions) -> EngineOptions {
        let explicit = self
            .engine_options
            .as_ref()
            .map(|source| source.for_bind(key))
            .unwrap_or_default();
        let defaults = EngineOptions {
            autocommit: Some(false),
            ..Default::default()
        };
        explicit.merged_over(url_options).merged_over(&defaults)
    }

    fn create_engines(&self) -> Result<EngineSet> {
        let mut engines = Vec::with_capacity(self.urls.len());
        for (key, raw_url) in &self.urls {
            let (url, url_options) = extract_engine_options(raw_url);
            let url = fix_url(&url, self.mode);
            let options = self.options_for(key, &url_options);
            let engine = self.factory.create_engine(key, &url, &options)?;
            engines.push((key.clone(), engine));
        }
        info!(
            engines = engines.len(),
            mode = ?self.mode,
            "Engines created"
        );
        Ok(EngineSet { engines })
    }

    /// All engines, created on first call.
    ///
    /// Must be called inside a tokio runtime context the first time, since
    /// pools start background maintenance on creation.
    pub fn engines(&self) -> Result<Arc<EngineSet>> {
        if let Some(set) = self.engines.get() {
            return Ok(Arc::clone(set));
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have finished while we waited for the lock.
        if let Some(set) = self.engines.get() {
            return Ok(Arc::clone(set));
        }

        let set = Arc::new(self.create_engines()?);
        // Cannot fail: writers are serialized by the mutex.
        let _ = self.engines.set(Arc::clone(&set));
        Ok(set)
    }

    /// The engine for a bind, or `None` when the bind has no URL.
    pub fn get_engine(&self, key: &BindKey) -> Result<Option<Engine>> {
        Ok(self.engines()?.get(key).cloned())
    }

    /// Non-default binds with a live engine. Empty until engines exist.
    pub fn bind_names(&self) -> Vec<String> {
        self.engines
            .get()
            .map(|set| set.bind_names())
            .unwrap_or_default()
    }

    /// The router for the current registry contents.
    pub fn router(&self, registry: &Registry) -> Result<Arc<Router>> {
        let engines = self.engines()?;
        let generation = registry.generation();

        {
            let cached = self.router.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(router) = cached.as_ref() {
                if router.generation == generation {
                    return Ok(Arc::clone(router));
                }
            }
        }

        let mut cached = self.router.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(router) = cached.as_ref() {
            if router.generation == generation {
                return Ok(Arc::clone(router));
            }
        }
        let router = Arc::new(Router::build(&engines, registry, generation));
        *cached = Some(Arc::clone(&router));
        Ok(router)
    }

    /// Close every created engine.
    pub async fn close_all(&self) {
        if let Some(set) = self.engines.get() {
            for (_, engine) in set.iter() {
                engine.close().await;
            }
        }
    }
}

/// Table name to engine map used by sessions.
#[derive(Debug, Clone)]
pub struct Router {
    generation: u64,
    default: Option<Engine>,
    binds: HashMap<BindKey, Engine>,
    tables: HashMap<String, Engine>,
    /// Tables registered on a bind that has no engine.
    unbound: HashMap<String, BindKey>,
}

impl Router {
    pub fn build(engines: &EngineSet, registry: &Registry, generation: u64) -> Self {
        let mut tables = HashMap::new();
        let mut unbound = HashMap::new();

        for metadata in registry.metadatas() {
            let bind = metadata.bind();
            match (bind, engines.get(bind)) {
                // Default-bind tables fall through to the default engine.
                (BindKey::Default, _) => {
                    if engines.default_engine().is_none() {
                        for table in metadata.tables() {
                            unbound.insert(table.name.clone(), bind.clone());
                        }
                    }
                }
                (BindKey::Named(_), Some(engine)) => {
                    for table in metadata.tables() {
                        tables.insert(table.name.clone(), engine.clone());
                    }
                }
                (BindKey::Named(_), None) => {
                    for table in metadata.tables() {
                        unbound.insert(table.name.clone(), bind.clone());
                    }
                }
            }
        }

        debug!(
            routed_tables = tables.len(),
            unbound_tables = unbound.len(),
            generation,
            "Router built"
        );

        Self {
            generation,
            default: engines.default_engine().cloned(),
            binds: engines
                .iter()
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect(),
            tables,
            unbound,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn default_engine(&self) -> Option<&Engine> {
        self.default.as_ref()
    }

    pub fn engine_for_bind(&self, key: &BindKey) -> Option<&Engine> {
        self.binds.get(key)
    }

    /// The engine that owns `table`. Unknown tables go to the default engine.
    pub fn engine_for_table(&self, table: &str) -> Option<&Engine> {
        if self.unbound.contains_key(table) {
            return None;
        }
        self.tables.get(table).or(self.default.as_ref())
    }

    /// Whether `table` is explicitly mapped to a named bind.
    pub fn is_routed(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Resolve a statement target to an engine.
    pub fn resolve(&self, target: Option<&Target>) -> Result<Engine> {
        match target {
            None => self
                .default
                .clone()
                .ok_or_else(|| Error::unbound("the default bind")),
            Some(Target::Table(table)) => self.engine_for_table(table).cloned().ok_or_else(|| {
                match self.unbound.get(table) {
                    Some(bind) => Error::unbound(format!("table '{}' (bind {})", table, bind)),
                    None => Error::unbound(format!("table '{}'", table)),
                }
            }),
            Some(Target::Bind(key)) => self
                .engine_for_bind(key)
                .cloned()
                .ok_or_else(|| Error::unbound(format!("bind {}", key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::engine::SqlxEngineFactory;
    use crate::models::EntityDef;

    fn registry(options: &Options) -> EngineRegistry {
        EngineRegistry::new(options, Mode::Sync, Arc::new(SqlxEngineFactory))
    }

    #[tokio::test]
    async fn test_engines_created_once() {
        let engines = registry(&Options::new().url("sqlite://").bind("x", "sqlite://"));
        assert!(!engines.is_created());
        assert!(engines.bind_names().is_empty());

        let first = engines.get_engine(&BindKey::Default).unwrap().unwrap();
        let second = engines.get_engine(&BindKey::Default).unwrap().unwrap();
        assert!(Engine::ptr_eq(&first, &second));
        assert_eq!(engines.bind_names(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_default_is_none() {
        let engines = registry(&Options::new().bind("one", "sqlite://"));
        assert!(engines.get_engine(&BindKey::Default).unwrap().is_none());
        assert!(engines.get_engine(&BindKey::named("one")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_url_options_merged_under_explicit() {
        let options = Options::new()
            .url("sqlite://?max_connections=1&echo=true")
            .engine_options(EngineOptions {
                echo: Some(false),
                ..Default::default()
            });
        let engines = registry(&options);
        let engine = engines.get_engine(&BindKey::Default).unwrap().unwrap();
        assert_eq!(engine.options().echo, Some(false));
        assert_eq!(engine.options().max_connections, Some(1));
        assert_eq!(engine.options().autocommit, Some(false));
        assert_eq!(engine.url(), "sqlite://");
    }

    #[tokio::test]
    async fn test_async_mode_rewrites_url() {
        let engines = EngineRegistry::new(
            &Options::new().url("sqlite://"),
            Mode::Async,
            Arc::new(SqlxEngineFactory),
        );
        let engine = engines.get_engine(&BindKey::Default).unwrap().unwrap();
        assert_eq!(engine.url(), "sqlite+aiosqlite://");
    }

    #[tokio::test]
    async fn test_router_excludes_default_tables() {
        let reg = Registry::new();
        reg.register(EntityDef::new("A")).unwrap();
        reg.register(EntityDef::new("B").bind("x")).unwrap();

        let engines = registry(&Options::new().url("sqlite://").bind("x", "sqlite://"));
        let router = engines.router(&reg).unwrap();

        assert!(router.is_routed("b"));
        assert!(!router.is_routed("a"));

        let default = engines.get_engine(&BindKey::Default).unwrap().unwrap();
        let x = engines.get_engine(&BindKey::named("x")).unwrap().unwrap();
        assert!(Engine::ptr_eq(router.engine_for_table("a").unwrap(), &default));
        assert!(Engine::ptr_eq(router.engine_for_table("b").unwrap(), &x));
    }

    #[tokio::test]
    async fn test_router_rebuilt_after_registration() {
        let reg = Registry::new();
        let engines = registry(&Options::new().url("sqlite://").bind("x", "sqlite://"));
        let before = engines.router(&reg).unwrap();
        assert!(!before.is_routed("late"));

        reg.register(EntityDef::new("Late").bind("x")).unwrap();
        let after = engines.router(&reg).unwrap();
        assert!(after.is_routed("late"));
        assert!(!Arc::ptr_eq(&before, &after));

        // Unchanged registry reuses the cached router.
        let again = engines.router(&reg).unwrap();
        assert!(Arc::ptr_eq(&after, &again));
    }

    #[tokio::test]
    async fn test_unconfigured_bind_is_unbound() {
        let reg = Registry::new();
        reg.register(EntityDef::new("Orphan").bind("missing")).unwrap();
        let engines = registry(&Options::new().url("sqlite://"));
        let router = engines.router(&reg).unwrap();

        let err = router
            .resolve(Some(&Target::Table("orphan".to_string())))
            .unwrap_err();
        assert!(matches!(err, Error::Unbound { .. }));
        // Tables the registry does not know go to the default engine.
        assert!(router.resolve(Some(&Target::Table("raw".to_string()))).is_ok());
    }

    #[tokio::test]
    async fn test_default_tables_without_default_engine_are_unbound() {
        let reg = Registry::new();
        reg.register(EntityDef::new("Plain")).unwrap();
        let engines = registry(&Options::new().bind("one", "sqlite://"));
        let router = engines.router(&reg).unwrap();
        assert!(router.resolve(Some(&Target::Table("plain".to_string()))).is_err());
        assert!(router.resolve(None).is_err());
        assert!(
            router
                .resolve(Some(&Target::Bind(BindKey::named("one"))))
                .is_ok()
        );
    }
}
