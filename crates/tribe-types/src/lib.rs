//! # tribe-types
//!
//! Shared domain types for the tribe sharing subsystem: typed identifiers,
//! the shareable resource model, ownership and share records.
//!
//! Enable the `sql` feature to bind these types directly as `rusqlite`
//! parameters and read them back from rows.

pub mod ids;
pub mod resource;
pub mod sharing;
#[cfg(feature = "sql")]
mod sql;

pub use ids::{GroupId, ResourceId, ShareId, UserId};
pub use resource::{Resource, ResourceKind, Visibility};
pub use sharing::{Owner, OwnerOrigin, Principal, PrincipalKind, Share};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Largest timestamp the store can hold (SQLite integers are signed).
pub const MAX_TIMESTAMP: Timestamp = i64::MAX as u64;

/// Error returned when a stored enum label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Soft-delete state shared by every persisted entity.
///
/// Rows are never physically removed; a deleted row keeps the time it was
/// tombstoned and is absent from all read paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RowState {
    Active,
    Deleted { at: Timestamp },
}

impl RowState {
    /// Build the state from a nullable `deleted_at` column.
    pub fn from_deleted_at(deleted_at: Option<Timestamp>) -> Self {
        match deleted_at {
            None => RowState::Active,
            Some(at) => RowState::Deleted { at },
        }
    }

    pub fn deleted_at(&self) -> Option<Timestamp> {
        match self {
            RowState::Active => None,
            RowState::Deleted { at } => Some(*at),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RowState::Active)
    }
}
