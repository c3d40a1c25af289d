//! Where-clause scopes handed to an entity's persistence primitives.
//!
//! A scope is the `(where expression, where params, limit)` triple that
//! `update`, `delete` and relation selection receive. It is kept as a list
//! of equality conditions so that non-SQL backends can evaluate it
//! directly; `to_sql` renders the SQL form for SQL backends and diagnostics.

use crate::store::Record;
use crate::value::Value;

/// A single `field = value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub value: Value,
}

/// Conjunction of equality conditions plus an optional row limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub conditions: Vec<Condition>,
    pub limit: Option<usize>,
}

impl Scope {
    /// An unrestricted scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// The scope of exactly one record identified by `field = value`.
    pub fn by_identity(field: &str, value: Value) -> Self {
        Self::new().where_eq(field, value).with_limit(1)
    }

    /// Add a `field = value` condition.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Limit the number of affected or returned records.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether the scope has neither conditions nor a limit.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.limit.is_none()
    }

    /// Combine two scopes: conditions of both, `other`'s limit if it has one.
    pub fn merge(&self, other: &Scope) -> Scope {
        let mut conditions = self.conditions.clone();
        conditions.extend(other.conditions.iter().cloned());
        Scope {
            conditions,
            limit: other.limit.or(self.limit),
        }
    }

    /// Whether a record satisfies every condition.
    ///
    /// A condition on a field the record lacks never matches.
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| {
            record
                .get(&c.field)
                .is_some_and(|value| value.loosely_eq(&c.value))
        })
    }

    /// Render as a SQL where expression with positional parameters.
    ///
    /// The limit is not part of the expression; callers append it.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        if self.conditions.is_empty() {
            return ("1 = 1".to_string(), Vec::new());
        }
        let expr = self
            .conditions
            .iter()
            .map(|c| format!("{} = ?", quote_ident(&c.field)))
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = self.conditions.iter().map(|c| c.value.clone()).collect();
        (expr, params)
    }
}

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them.
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
