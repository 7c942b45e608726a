//! Last-writer-wins conflict resolution
//!
//! The resolver is a pure function of the incoming change and the current
//! entity. It performs no I/O; the applier acts on its decision.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;
use crate::models::{ConflictResolution, Entity, SyncAction, SyncChange};

/// How a delete competes with existing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// A delete removes the entity regardless of timestamps
    AlwaysWins,
    /// A delete must be strictly newer than the stored entity, like an update
    LastWriterWins,
}

/// Deletes win unconditionally, unlike updates. Kept as a named policy so
/// the asymmetry stays visible and can be switched per deployment.
pub const DEFAULT_DELETE_POLICY: DeletePolicy = DeletePolicy::AlwaysWins;

impl Default for DeletePolicy {
    fn default() -> Self {
        DEFAULT_DELETE_POLICY
    }
}

impl FromStr for DeletePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always_wins" => Ok(Self::AlwaysWins),
            "last_writer_wins" => Ok(Self::LastWriterWins),
            other => Err(Error::InvalidInput(format!("Unknown delete policy: {other}"))),
        }
    }
}

/// Which write a decision requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    /// Insert a new entity at version 1
    Create,
    /// Overwrite the current entity at `version + 1`
    Update,
    /// Remove the current entity
    Delete,
}

/// Outcome of resolving one change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Write the change; no conflict to report
    Apply(Write),
    /// Report a conflict. `ClientWins` also overwrites the entity.
    Conflict(ConflictResolution),
    /// Nothing to write (delete of an absent entity)
    Noop,
}

impl Decision {
    /// The write this decision performs, if any
    pub const fn write(self) -> Option<Write> {
        match self {
            Self::Apply(write) => Some(write),
            Self::Conflict(ConflictResolution::ClientWins) => Some(Write::Update),
            Self::Conflict(_) | Self::Noop => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictResolver {
    delete_policy: DeletePolicy,
}

impl ConflictResolver {
    pub const fn new(delete_policy: DeletePolicy) -> Self {
        Self { delete_policy }
    }

    pub const fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    /// Decide what to do with `change` given the stored entity.
    ///
    /// The client wins only when its timestamp is strictly greater than the
    /// stored `modified`; ties go to the server.
    pub fn resolve(&self, change: &SyncChange, current: Option<&Entity>) -> Decision {
        let Some(current) = current else {
            return match change.action {
                SyncAction::Created | SyncAction::Updated => Decision::Apply(Write::Create),
                SyncAction::Deleted => Decision::Noop,
            };
        };

        let client_newer = change.timestamp > current.meta().modified;
        match change.action {
            SyncAction::Created if client_newer => {
                Decision::Conflict(ConflictResolution::ClientWins)
            }
            SyncAction::Created => Decision::Conflict(ConflictResolution::ServerWins),
            SyncAction::Updated if client_newer => Decision::Apply(Write::Update),
            SyncAction::Updated => Decision::Conflict(ConflictResolution::ServerWins),
            SyncAction::Deleted => match self.delete_policy {
                DeletePolicy::AlwaysWins => Decision::Apply(Write::Delete),
                DeletePolicy::LastWriterWins if client_newer => Decision::Apply(Write::Delete),
                DeletePolicy::LastWriterWins => {
                    Decision::Conflict(ConflictResolution::ServerWins)
                }
            },
        }
    }
}
