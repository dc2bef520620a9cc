// SPDX-License-Identifier: MIT
//! Authorization engine — pure decision functions.
//!
//! Every (resource, operation) pair has one function mapping an actor's
//! [`ProjectAccess`] snapshot (plus authorship where relevant) to a
//! [`Decision`]. The functions are side-effect-free and safe to call
//! speculatively, e.g. for UI hints. Denials are returned, never thrown, so
//! call sites must branch on the result explicitly.
//!
//! Deny reasons form a closed set. `NotFound` doubles as "exists but
//! invisible" so read paths never leak existence; `Forbidden` appears only
//! when the actor can already see the resource.

use crate::identity::ActorId;
use crate::membership::ProjectAccess;

// ─── Decisions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Resource absent, or present but invisible to the actor.
    NotFound,
    /// Resource visible but the operation is denied.
    Forbidden,
}

impl Decision {
    pub fn is_allow(self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Convert to a result for `?`-style propagation in mutation handlers.
    pub fn into_result(self) -> Result<(), AccessError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(DenyReason::NotFound) => Err(AccessError::NotFound),
            Decision::Deny(DenyReason::Forbidden) => Err(AccessError::Forbidden),
        }
    }
}

/// A materialized denial, for call sites that propagate with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
}

/// Deny without leaking existence: `Forbidden` when the actor can see the
/// project, `NotFound` when it cannot.
fn deny(access: ProjectAccess) -> Decision {
    if access.can_read() {
        Decision::Deny(DenyReason::Forbidden)
    } else {
        Decision::Deny(DenyReason::NotFound)
    }
}

// ─── Project operations ──────────────────────────────────────────────────────

pub mod project {
    use super::*;

    /// Read or list: owner or any membership.
    pub fn read(access: ProjectAccess) -> Decision {
        if access.can_read() {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::NotFound)
        }
    }

    /// Any authenticated actor may create a project. The storage layer must
    /// create the owner membership atomically with the project row — a
    /// project must never exist without its creator holding owner rights.
    pub fn create() -> Decision {
        Decision::Allow
    }

    /// Update: owner or admin-level membership.
    pub fn update(access: ProjectAccess) -> Decision {
        if access.can_admin() {
            Decision::Allow
        } else {
            super::deny(access)
        }
    }

    /// Add or remove members: same bar as update.
    pub fn manage_members(access: ProjectAccess) -> Decision {
        update(access)
    }

    /// Delete: owner only — admins may not delete.
    pub fn delete(access: ProjectAccess) -> Decision {
        if access.owner_rights() {
            Decision::Allow
        } else {
            super::deny(access)
        }
    }
}

// ─── Task operations ─────────────────────────────────────────────────────────

pub mod task {
    use super::*;

    /// Read or list: any standing on the owning project. List narrowing by
    /// project, status, or assignee is applied after this visibility check,
    /// never instead of it.
    pub fn read(access: ProjectAccess) -> Decision {
        if access.can_read() {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::NotFound)
        }
    }

    pub fn create(access: ProjectAccess) -> Decision {
        read(access)
    }

    /// Update rights are intentionally broad: any member may edit any task.
    pub fn update(access: ProjectAccess) -> Decision {
        read(access)
    }

    /// Delete is stricter than update: owner or admin-level membership.
    pub fn delete(access: ProjectAccess) -> Decision {
        if access.can_admin() {
            Decision::Allow
        } else {
            super::deny(access)
        }
    }
}

// ─── Comment operations ──────────────────────────────────────────────────────

pub mod comment {
    use super::*;

    /// Create: any membership on the parent task's project.
    pub fn create(access: ProjectAccess) -> Decision {
        if access.can_read() {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::NotFound)
        }
    }

    /// Update: author only. Authorship is exclusive — owners and admins get
    /// no override on edits.
    pub fn update(actor: &ActorId, author: &ActorId, access: ProjectAccess) -> Decision {
        if actor == author {
            return Decision::Allow;
        }
        super::deny(access)
    }

    /// Delete: author, project owner, or admin-level member — three
    /// independent sufficient conditions. Authorship is checked first
    /// because it needs no membership lookup.
    pub fn delete(actor: &ActorId, author: &ActorId, access: ProjectAccess) -> Decision {
        if actor == author {
            return Decision::Allow;
        }
        if access.can_admin() {
            return Decision::Allow;
        }
        super::deny(access)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
