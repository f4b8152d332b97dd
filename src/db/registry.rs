//! Entity registry.
//!
//! Tracks every registered entity, the bind it belongs to, and one
//! [`MetaData`] collection per bind so schema operations can be scoped to a
//! single bind's tables.
//!
//! # Invariants
//!
//! - An entity is assigned to exactly one bind, fixed by its first
//!   registration. Re-registering with the same bind is a no-op; a different
//!   bind is a [`Error::Conflict`].
//! - A table name belongs to exactly one entity, so one table never appears
//!   in two collections.
//! - Tables keep registration order inside their collection, which is the
//!   order `create_all` creates them in.

use crate::error::{Error, Result};
use crate::models::{BindKey, CheckConstraint, Column, Entity, EntityDef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A registered table: the resolved form of an [`EntityDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Name of the entity that declared this table.
    pub entity: String,
    /// Table name, derived once at registration when not given explicitly.
    pub name: String,
    pub bind: BindKey,
    pub columns: Vec<Column>,
    pub checks: Vec<CheckConstraint>,
}

impl Table {
    fn from_def(def: EntityDef) -> Self {
        let name = def.table_name();
        Self {
            entity: def.type_name,
            name,
            bind: def.bind,
            columns: def.columns,
            checks: def.checks,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }
}

/// The tables assigned to one bind.
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    bind: BindKey,
    tables: Vec<Arc<Table>>,
}

impl MetaData {
    fn new(bind: BindKey) -> Self {
        Self {
            bind,
            tables: Vec::new(),
        }
    }

    pub fn bind(&self) -> &BindKey {
        &self.bind
    }

    /// Tables in registration order.
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    /// One collection per bind, in first-seen order.
    metadatas: Vec<MetaData>,
    /// Entity name -> registered table.
    entities: HashMap<String, Arc<Table>>,
    /// Table name -> owning entity name.
    table_owners: HashMap<String, String>,
}

impl RegistryState {
    fn metadata_mut(&mut self, bind: &BindKey) -> &mut MetaData {
        let idx = match self.metadatas.iter().position(|m| &m.bind == bind) {
            Some(idx) => idx,
            None => {
                debug!(bind = %bind, "Creating metadata collection");
                self.metadatas.push(MetaData::new(bind.clone()));
                self.metadatas.len() - 1
            }
        };
        &mut self.metadatas[idx]
    }
}

/// Registry of entities and their per-bind metadata collections.
///
/// Owned by one database instance (and shared with its bridged shadow).
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
    /// Bumped on every change so routers can detect they are stale.
    generation: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity declaration.
    ///
    /// Returns the registered table. Registering the same entity again with
    /// the same bind returns the existing table unchanged.
    pub fn register(&self, def: EntityDef) -> Result<Arc<Table>> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = state.entities.get(&def.type_name) {
            if existing.bind == def.bind {
                return Ok(Arc::clone(existing));
            }
            return Err(Error::conflict(
                &def.type_name,
                format!(
                    "already assigned to bind {}, cannot reassign to bind {}",
                    existing.bind, def.bind
                ),
            ));
        }

        let table = Arc::new(Table::from_def(def));

        if let Some(owner) = state.table_owners.get(&table.name) {
            return Err(Error::conflict(
                &table.entity,
                format!("table '{}' is already declared by '{}'", table.name, owner),
            ));
        }

        state
            .table_owners
            .insert(table.name.clone(), table.entity.clone());
        state
            .entities
            .insert(table.entity.clone(), Arc::clone(&table));
        state
            .metadata_mut(&table.bind)
            .tables
            .push(Arc::clone(&table));
        self.generation.fetch_add(1, Ordering::AcqRel);

        debug!(
            entity = %table.entity,
            table = %table.name,
            bind = %table.bind,
            "Registered entity"
        );

        Ok(table)
    }

    /// Register an [`Entity`] type.
    pub fn register_entity<E: Entity>(&self) -> Result<Arc<Table>> {
        self.register(E::definition())
    }

    /// Tables assigned to a bind, in registration order.
    pub fn tables_for_bind(&self, bind: &BindKey) -> Vec<Arc<Table>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .metadatas
            .iter()
            .find(|m| &m.bind == bind)
            .map(|m| m.tables.clone())
            .unwrap_or_default()
    }

    /// Snapshot of one bind's collection.
    pub fn metadata(&self, bind: &BindKey) -> Option<MetaData> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.metadatas.iter().find(|m| &m.bind == bind).cloned()
    }

    /// Snapshot of every collection, in first-seen order.
    pub fn metadatas(&self) -> Vec<MetaData> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.metadatas.clone()
    }

    pub fn bind_keys(&self) -> Vec<BindKey> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.metadatas.iter().map(|m| m.bind.clone()).collect()
    }

    /// Look up a registered entity by name.
    ///
    /// Entities declared through [`EntityDef::of`] are named by their full
    /// type path.
    pub fn entity(&self, name: &str) -> Option<Arc<Table>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entities.get(name).cloned()
    }

    /// Look up a registered table by table name.
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let owner = state.table_owners.get(name)?;
        state.entities.get(owner).cloned()
    }

    /// Remove every collection and entity registration.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = RegistryState::default();
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!("Registry cleared");
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
