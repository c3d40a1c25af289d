//! The entity registry of one in-memory database.

use crate::config::StoreConfig;
use crate::def::EntityDef;
use crate::entity::MemoryEntity;
use rowmodel_core::{
    Entity, EntityRef, Error, Record, Registry, Result, Row, Scope, StorageError,
    StorageErrorKind, Value,
};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// A registry of [`MemoryEntity`] values sharing one [`StoreConfig`].
///
/// Entities keep a weak handle back to the store to resolve related
/// entities by name, so the store is always handed out as an `Arc`.
#[derive(Debug)]
pub struct MemoryStore {
    config: StoreConfig,
    entities: RwLock<Vec<Arc<MemoryEntity>>>,
    this: Weak<MemoryStore>,
}

impl MemoryStore {
    /// Create an empty store with the default configuration.
    pub fn new() -> Arc<Self> {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store.
    pub fn with_config(config: StoreConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            entities: RwLock::new(Vec::new()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Register an entity.
    ///
    /// Fails with a constraint error if the name is already taken.
    #[tracing::instrument(level = "debug", skip(self, def), fields(entity = %def.name()))]
    pub fn define(&self, def: EntityDef) -> Result<EntityRef> {
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if entities.iter().any(|e| e.name() == def.name()) {
            return Err(Error::Storage(StorageError::new(
                StorageErrorKind::Constraint,
                def.name(),
                "entity is already defined",
            )));
        }

        let entity = Arc::new(MemoryEntity::from_def(def, &self.config, self.this.clone()));
        tracing::debug!(fields = entity.fields().len(), "Defined entity");
        entities.push(Arc::clone(&entity));
        Ok(entity as EntityRef)
    }

    /// The concrete entity registered under `name`.
    pub fn memory_entity(&self, name: &str) -> Option<Arc<MemoryEntity>> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.name() == name)
            .cloned()
    }

    fn require(&self, name: &str) -> Result<Arc<MemoryEntity>> {
        self.memory_entity(name).ok_or_else(|| {
            Error::Storage(StorageError::new(
                StorageErrorKind::NotFound,
                name,
                "entity is not defined",
            ))
        })
    }

    /// Build a new row of `name` from its defaults and an optional seed.
    ///
    /// The row is not persisted until saved.
    pub fn create(&self, name: &str, seed: Option<Record>) -> Result<Row> {
        let entity: EntityRef = self.require(name)?;
        Ok(Row::new(entity, seed))
    }

    /// Load the row of `name` with the given identity.
    pub fn find(&self, name: &str, id: impl Into<Value>) -> Result<Option<Row>> {
        let entity = self.require(name)?;
        let scope = Scope::by_identity(entity.primary_key(), id.into());
        let record = entity.select_one(&scope)?;
        let entity: EntityRef = entity;
        Ok(record.map(|record| Row::new(entity, Some(record))))
    }

    /// Load every stored row of `name`, in insertion order.
    pub fn all(&self, name: &str) -> Result<Vec<Row>> {
        let entity = self.require(name)?;
        let records = entity.records();
        let entity: EntityRef = entity;
        Ok(records
            .into_iter()
            .map(|record| Row::new(Arc::clone(&entity), Some(record)))
            .collect())
    }
}

impl Registry for MemoryStore {
    fn entity(&self, name: &str) -> Option<EntityRef> {
        self.memory_entity(name).map(|e| e as EntityRef)
    }

    fn entity_names(&self) -> Vec<String> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }
}
