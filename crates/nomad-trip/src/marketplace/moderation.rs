//! Approve/reject review workflow shared by companies, drivers, and affiliations.
//!
//! ```text
//! waiting  ──▶ approved | rejected
//! approved ──▶ rejected
//! rejected ──▶ approved
//! ```
//!
//! There are no self-loops and nothing returns to `waiting` through moderation;
//! owner edits reset to `waiting` outside of this machine.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use super::domain::{Affiliation, Company, Driver, Moderation, ModerationStatus};

/// Errors raised when a requested status change is not allowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModerationError {
    #[error("status cannot change from {current} to {requested}")]
    InvalidTransition {
        current: ModerationStatus,
        requested: ModerationStatus,
    },
    #[error("a rejection reason is required")]
    MissingReason,
}

/// Body of every moderation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusChange {
    pub status: ModerationStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl StatusChange {
    pub fn approve() -> Self {
        Self {
            status: ModerationStatus::Approved,
            rejection_reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            status: ModerationStatus::Rejected,
            rejection_reason: Some(reason.into()),
        }
    }
}

pub fn can_transition(current: ModerationStatus, requested: ModerationStatus) -> bool {
    use ModerationStatus::*;

    matches!(
        (current, requested),
        (Waiting, Approved) | (Waiting, Rejected) | (Approved, Rejected) | (Rejected, Approved)
    )
}

/// Compute the moderation state that results from `change`.
pub fn transition(current: &Moderation, change: StatusChange) -> Result<Moderation, ModerationError> {
    let from = current.status();
    if !can_transition(from, change.status) {
        return Err(ModerationError::InvalidTransition {
            current: from,
            requested: change.status,
        });
    }

    Ok(match change.status {
        ModerationStatus::Approved => Moderation::Approved,
        ModerationStatus::Waiting => Moderation::Waiting,
        ModerationStatus::Rejected => match change.rejection_reason {
            Some(reason) if !reason.trim().is_empty() => Moderation::Rejected {
                rejection_reason: reason,
            },
            _ => return Err(ModerationError::MissingReason),
        },
    })
}

/// Anything carrying a moderation state and a last-change timestamp.
pub trait Moderated {
    fn moderation(&self) -> &Moderation;
    fn record_moderation(&mut self, moderation: Moderation, at: DateTime<Utc>);
}

/// Apply `change` to `entity`, stamping `at` as its last update.
pub fn moderate<M: Moderated>(
    entity: &mut M,
    change: StatusChange,
    at: DateTime<Utc>,
) -> Result<(), ModerationError> {
    let next = transition(entity.moderation(), change)?;
    entity.record_moderation(next, at);
    Ok(())
}

macro_rules! moderated {
    ($($entity:ty),+) => {
        $(
            impl Moderated for $entity {
                fn moderation(&self) -> &Moderation {
                    &self.moderation
                }

                fn record_moderation(&mut self, moderation: Moderation, at: DateTime<Utc>) {
                    self.moderation = moderation;
                    self.updated_at = at;
                }
            }
        )+
    };
}

moderated!(Company, Driver, Affiliation);
