//! Entity declarations.

use rowmodel_core::{Getter, Record, Result, Row, Slot, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Declaration of an entity before it is registered with a store.
///
/// ```ignore
/// let post = EntityDef::new("post")
///     .field("id", Value::Null)
///     .field("title", "")
///     .field("author_id", Value::Null)
///     .getter("slug", |row| {
///         let title: String = row.get_as("title")?;
///         Ok(Slot::Value(title.to_lowercase().replace(' ', "-").into()))
///     });
/// store.define(post)?;
/// ```
#[derive(Clone)]
pub struct EntityDef {
    pub(crate) name: String,
    pub(crate) defaults: Record,
    pub(crate) primary_key: Option<String>,
    pub(crate) foreign_key: Option<String>,
    pub(crate) getters: HashMap<String, Getter>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: Record::new(),
            primary_key: None,
            foreign_key: None,
            getters: HashMap::new(),
        }
    }

    /// Declare a field with its default value.
    pub fn field(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.defaults.insert(name, default.into());
        self
    }

    /// Declare several fields defaulting to NULL.
    pub fn fields<I, K>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        for name in names {
            self.defaults.insert(name, Value::Null);
        }
        self
    }

    /// Use `name` as the identity field instead of the store default.
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    /// Use `name` as the foreign key other entities point at this one with.
    pub fn foreign_key(mut self, name: impl Into<String>) -> Self {
        self.foreign_key = Some(name.into());
        self
    }

    /// Register a computed field.
    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Row) -> Result<Slot> + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut getters: Vec<&str> = self.getters.keys().map(String::as_str).collect();
        getters.sort_unstable();
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("fields", &self.defaults.names())
            .field("primary_key", &self.primary_key)
            .field("foreign_key", &self.foreign_key)
            .field("getters", &getters)
            .finish()
    }
}
