//! Database layer.
//!
//! This module provides:
//! - The entity registry and per-bind metadata
//! - Engines (one sqlx pool per bind) and their lazy registry
//! - Table routing
//! - Statement builders and rendering
//! - DDL rendering and introspection
//! - Database dispatch macros, parameter binding and row decoding
//! - The blocking bridge used by the sync facade

pub(crate) mod bridge;
pub mod connection;
pub mod engine;
pub mod engines;
#[macro_use]
pub(crate) mod macros;
pub(crate) mod params;
pub mod registry;
pub mod schema;
pub mod sql_validator;
pub mod statement;
pub mod types;

pub use connection::DbTransaction;
pub use engine::{Dialect, DbPool, Engine, EngineFactory, Mode, SqlxEngineFactory, fix_url};
pub use engines::{EngineRegistry, EngineSet, Router};
pub use registry::{MetaData, Registry, Table};
pub use schema::{SchemaInspector, SchemaRenderer};
pub use statement::{
    Condition, Delete, Insert, Op, Rendered, Select, Statement, Target, Text, Update, delete,
    insert, select, text, update,
};
