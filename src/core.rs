//! State of one initialization, shared by a facade and its shadow.

use crate::config::{NamingConvention, Options, SessionOptions};
use crate::db::engine::{Engine, EngineFactory, Mode};
use crate::db::engines::{EngineRegistry, Router};
use crate::db::registry::{Registry, Table};
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub(crate) struct Core {
    pub(crate) registry: Arc<Registry>,
    pub(crate) naming: NamingConvention,
    pub(crate) session_options: SessionOptions,
    pub(crate) engines: EngineRegistry,
}

impl Core {
    pub(crate) fn new(
        options: &Options,
        registry: Arc<Registry>,
        mode: Mode,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        options.validate()?;
        let engines = EngineRegistry::new(options, mode, factory);
        info!(
            mode = ?mode,
            default = options.url.is_some(),
            binds = options.binds.len(),
            "Database instance initialized"
        );
        Ok(Self {
            registry,
            naming: options.naming_convention.clone().unwrap_or_default(),
            session_options: options.session_options.clone(),
            engines,
        })
    }

    pub(crate) fn router(&self) -> Result<Arc<Router>> {
        self.engines.router(&self.registry)
    }

    /// Engine and tables for every bind a schema operation touches: the
    /// default bind when it has an engine, then each configured named bind
    /// in configuration order. Binds without tables are skipped.
    pub(crate) fn schema_targets(&self) -> Result<Vec<(Engine, Vec<Arc<Table>>)>> {
        let engines = self.engines.engines()?;
        let mut targets = Vec::new();
        for key in self.engines.configured_binds() {
            let Some(engine) = engines.get(&key) else {
                continue;
            };
            let tables = self.registry.tables_for_bind(&key);
            if !tables.is_empty() {
                targets.push((engine.clone(), tables));
            }
        }
        Ok(targets)
    }
}

