//! Store-wide naming and identity conventions.

/// Configuration for a [`MemoryStore`](crate::MemoryStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Identity field used by entities that do not name their own
    pub primary_key: String,
    /// Appended to an entity name to form its foreign key
    pub foreign_key_suffix: String,
    /// First identity handed out to inserts without one
    pub first_id: i64,
    /// Look for `{a}_{b}` bridge entities when classifying relations
    pub detect_bridges: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            primary_key: "id".to_string(),
            foreign_key_suffix: "_id".to_string(),
            first_id: 1,
            detect_bridges: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default identity field name.
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    /// Set the foreign key suffix.
    pub fn foreign_key_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.foreign_key_suffix = suffix.into();
        self
    }

    /// Set the first generated identity.
    pub fn first_id(mut self, id: i64) -> Self {
        self.first_id = id;
        self
    }

    /// Enable or disable many-to-many bridge detection.
    pub fn detect_bridges(mut self, enabled: bool) -> Self {
        self.detect_bridges = enabled;
        self
    }

    /// Foreign key name for an entity.
    pub fn foreign_key_for(&self, entity: &str) -> String {
        format!("{}{}", entity, self.foreign_key_suffix)
    }

    /// Name of the bridge entity linking `a` and `b`, independent of order.
    pub fn bridge_name(a: &str, b: &str) -> String {
        if a <= b {
            format!("{}_{}", a, b)
        } else {
            format!("{}_{}", b, a)
        }
    }
}
