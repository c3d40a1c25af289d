//! RowModel - dynamic-field rows for a lightweight ORM.
//!
//! RowModel provides the row-level data model of an ORM:
//!
//! - Rows bound to an entity, starting from the entity's defaults
//! - Dirty-field tracking for minimal update payloads
//! - Lazy computed fields and relation traversal, cached on the row
//! - Foreign-key assignment between related rows
//! - Cycle-safe flattening of nested rows into JSON
//! - Save, delete and reload delegated to the entity
//!
//! # Quick Start
//!
//! ```ignore
//! use rowmodel::prelude::*;
//!
//! let store = MemoryStore::new();
//! store.define(EntityDef::new("author").field("name", ""))?;
//! store.define(EntityDef::new("post").field("title", "").field("author_id", Value::Null))?;
//!
//! let mut author = store.create("author", Some(record! { "name" => "Ann" }))?;
//! author.save(SaveOptions::default())?;
//!
//! let mut post = store.create("post", None)?;
//! post.set_value("title", "Hello");
//! post.set_relation(&[&author])?;
//! post.save(SaveOptions::default())?;
//!
//! let name = post.fetch("author")?;
//! println!("{}", post.to_json(false));
//! ```

pub use rowmodel_core::{
    Access, ChangeLog, Condition, Entity, EntityRef, Error, FieldMap, FromValue, Getter, Record,
    Registry, RelationKind, Result, Row, RowError, RowErrorKind, SaveOptions, Scope, Selection,
    Slot, StorageError, StorageErrorKind, TypeError, Value, quote_ident,
};
pub use rowmodel_memory::{EntityDef, MemoryEntity, MemoryStore, StoreConfig};

/// Build a [`Record`] from `name => value` pairs, keeping their order.
///
/// ```ignore
/// let seed = record! { "id" => 7_i64, "title" => "Hello" };
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $(
            record.insert($name, $crate::Value::from($value));
        )+
        record
    }};
}

pub mod prelude {
    pub use crate::{
        // Rows
        Access,
        // Entities
        Entity,
        EntityDef,
        EntityRef,
        Error,
        MemoryStore,
        Record,
        Registry,
        RelationKind,
        Result,
        Row,
        SaveOptions,
        Scope,
        Slot,
        StoreConfig,
        Value,
        // Macros
        record,
    };
}
