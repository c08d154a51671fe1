use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The other end of a directed interest edge, as seen from one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Counterpart {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Result of an idempotent edge insert.
///
/// `reverse_existed` is observed under the same pair lock as the insert, so
/// of two racing inserts exactly one sees the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddEdgeOutcome {
    pub created: bool,
    pub reverse_existed: bool,
}

impl AddEdgeOutcome {
    pub fn already_exists(&self) -> bool {
        !self.created
    }

    /// True only for the insert that completed the pair.
    pub fn completes_match(&self) -> bool {
        self.created && self.reverse_existed
    }
}

/// Result of an edge delete, with the reverse edge observed under the pair lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveEdgeOutcome {
    pub removed: bool,
    pub reverse_existed: bool,
}

impl RemoveEdgeOutcome {
    /// True only for the delete that turned a match back into a one-sided flick.
    pub fn breaks_match(&self) -> bool {
        self.removed && self.reverse_existed
    }
}
