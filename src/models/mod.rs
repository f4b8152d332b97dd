//! Data models for alchemical.
//!
//! This module re-exports the entity declaration types and the value/row
//! types shared by statements and sessions.

pub mod entity;
pub mod value;

// Re-export commonly used types
pub use entity::{
    BindKey, CheckConstraint, Column, ColumnType, Entity, EntityDef, ForeignKey, Model,
    derive_table_name,
};
pub use value::{FromValue, Row, Value};
