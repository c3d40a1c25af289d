//! Options for row persistence.

/// Options controlling [`Row::save`](crate::Row::save).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// On insert, let the entity resolve identity collisions instead of failing
    pub handle_duplications: bool,
    /// On update, write only fields assigned since the last save or reload
    pub only_changed_values: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            handle_duplications: false,
            only_changed_values: true,
        }
    }
}

impl SaveOptions {
    /// Create options with the defaults: strict inserts, minimal updates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set duplicate handling for inserts.
    pub fn handle_duplications(mut self, value: bool) -> Self {
        self.handle_duplications = value;
        self
    }

    /// Set whether updates are restricted to dirty fields.
    pub fn only_changed_values(mut self, value: bool) -> Self {
        self.only_changed_values = value;
        self
    }
}
