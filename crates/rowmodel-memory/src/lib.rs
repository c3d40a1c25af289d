//! In-memory entity backend for RowModel.
//!
//! `MemoryStore` is a registry of `MemoryEntity` values. Each entity keeps
//! its records in insertion order and derives relations from field naming:
//! an entity declaring `author_id` has one `author`, `author` has many of
//! it in return, and a `post_tag` entity declaring `post_id` and `tag_id`
//! links `post` and `tag` many-to-many.

pub mod config;
pub mod def;
pub mod entity;
pub mod store;

pub use config::StoreConfig;
pub use def::EntityDef;
pub use entity::MemoryEntity;
pub use store::MemoryStore;
