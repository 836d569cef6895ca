//! Ancestry comparison between two commits.
//!
//! The relation is derived from the two history ranges `a..b` and `b..a`:
//!
//! | `a..b`    | `b..a`    | relation         |
//! |-----------|-----------|------------------|
//! | empty     | empty     | `Equal`          |
//! | non-empty | empty     | `StrictlyBefore` |
//! | empty     | non-empty | `StrictlyAfter`  |
//! | non-empty | non-empty | `Incomparable`   |
//!
//! This is a partial order. Callers needing a minimum must treat
//! `Incomparable` as a divergence, not pick a side.

use gitdeploy_state::{RepoResult, Repository, Revision};
use serde::Serialize;

/// How `a` relates to `b` in the history DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AncestryRelation {
    Equal,
    /// `a` is a proper ancestor of `b`.
    StrictlyBefore,
    /// `b` is a proper ancestor of `a`.
    StrictlyAfter,
    /// Neither reaches the other.
    Incomparable,
}

impl AncestryRelation {
    /// The relation of `b` to `a`.
    pub fn reversed(self) -> Self {
        match self {
            AncestryRelation::StrictlyBefore => AncestryRelation::StrictlyAfter,
            AncestryRelation::StrictlyAfter => AncestryRelation::StrictlyBefore,
            other => other,
        }
    }
}

/// Compares revisions using history range queries on a [`Repository`].
pub struct AncestryComparator<'a> {
    repo: &'a dyn Repository,
}

impl<'a> AncestryComparator<'a> {
    pub fn new(repo: &'a dyn Repository) -> Self {
        Self { repo }
    }

    pub async fn compare(&self, a: &Revision, b: &Revision) -> RepoResult<AncestryRelation> {
        if a == b {
            return Ok(AncestryRelation::Equal);
        }
        let (forward, backward) = tokio::join!(
            self.repo.history_range(Some(a), b),
            self.repo.history_range(Some(b), a),
        );
        let relation = match (forward?.is_empty(), backward?.is_empty()) {
            (true, true) => AncestryRelation::Equal,
            (false, true) => AncestryRelation::StrictlyBefore,
            (true, false) => AncestryRelation::StrictlyAfter,
            (false, false) => AncestryRelation::Incomparable,
        };
        Ok(relation)
    }
}
