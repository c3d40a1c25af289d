//! Core types and traits for RowModel.
//!
//! This crate provides the row-level data model of the ORM:
//!
//! - `Row` for entity-bound records with change tracking and lazy relations
//! - `Entity` and `Registry` traits for the schema and persistence seam
//! - `Value` and `FieldMap` for ordered field data
//! - `Scope` for the where-clause triples handed to persistence primitives

pub mod changes;
pub mod config;
pub mod entity;
pub mod error;
pub mod row;
pub mod scope;
pub mod store;
pub mod value;

pub use changes::ChangeLog;
pub use config::SaveOptions;
pub use entity::{Entity, EntityRef, Getter, Registry, RelationKind, Selection};
pub use error::{
    Error, Result, RowError, RowErrorKind, StorageError, StorageErrorKind, TypeError,
};
pub use row::{Access, Row, Slot};
pub use scope::{Condition, Scope, quote_ident};
pub use store::{FieldMap, Record};
pub use value::{FromValue, Value};
