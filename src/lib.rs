//! Alchemical
//!
//! One handle over several databases. A default database and any number of
//! named binds are configured by URL; entities declare which bind they live
//! on, and sessions route each statement to the right engine. A blocking
//! facade ([`Alchemical`]) and an async one ([`AsyncAlchemical`]) share the
//! same registry, routing and schema machinery (SQLite, PostgreSQL, MySQL).

pub mod adapters;
pub mod aio;
pub mod alchemical;
pub mod config;
mod core;
pub mod db;
pub mod error;
pub mod models;
pub mod session;

pub use aio::AsyncAlchemical;
pub use alchemical::Alchemical;
pub use config::{EngineOptions, NamingConvention, Options, SessionOptions};
pub use db::{
    Dialect, Engine, EngineFactory, MetaData, Registry, Table, delete, insert, select, text,
    update,
};
pub use error::{Error, Result};
pub use models::{BindKey, Column, ColumnType, Entity, EntityDef, FromValue, Model, Row, Value};
pub use session::{AsyncSession, Session};
