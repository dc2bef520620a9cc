//! Project membership: roles, the read-only store contract, and the
//! per-request access snapshot consumed by the authorization engine.
//!
//! Visibility and mutation rights for tasks and comments are always derived
//! transitively through the owning project's membership — no resource
//! carries its own access-control list.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::identity::ActorId;

/// Opaque project id. A project is the root of an authorization and
/// broadcast scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ─── Roles ───────────────────────────────────────────────────────────────────

/// Roles a member can hold on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    /// Owner and Admin may manage the project itself: update it, add and
    /// remove members, delete tasks.
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown role strings are an error, not a silent downgrade — the database
/// is the only source of role values and must stay within the closed set.
#[derive(Debug, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

// ─── Store contract ──────────────────────────────────────────────────────────

/// Read-only view over project ownership and membership, backed by the
/// persistence layer.
#[allow(async_fn_in_trait)]
pub trait MembershipStore {
    /// Whether `actor` is the project's `owner_id`.
    async fn is_owner(&self, project: &ProjectId, actor: &ActorId) -> Result<bool>;

    /// The actor's membership role on the project, if any.
    async fn membership_role(&self, project: &ProjectId, actor: &ActorId)
        -> Result<Option<Role>>;

    /// Every project the actor owns or is a member of.
    async fn projects_for(&self, actor: &ActorId) -> Result<Vec<ProjectId>>;
}

// ─── Access snapshot ─────────────────────────────────────────────────────────

/// Snapshot of one actor's standing on one project, fetched once per request
/// and passed into the pure decision functions.
///
/// Ownership and an owner-role membership row are equally authoritative:
/// either alone grants owner rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectAccess {
    pub is_owner: bool,
    pub role: Option<Role>,
}

impl ProjectAccess {
    /// No standing at all — the project is invisible to the actor.
    pub const NONE: ProjectAccess = ProjectAccess {
        is_owner: false,
        role: None,
    };

    pub async fn load<S: MembershipStore>(
        store: &S,
        project: &ProjectId,
        actor: &ActorId,
    ) -> Result<Self> {
        Ok(Self {
            is_owner: store.is_owner(project, actor).await?,
            role: store.membership_role(project, actor).await?,
        })
    }

    /// Any standing — owner or member of any role.
    pub fn can_read(self) -> bool {
        self.is_owner || self.role.is_some()
    }

    /// Owner, or membership with an admin-level role.
    pub fn can_admin(self) -> bool {
        self.is_owner || self.role.map(Role::is_admin).unwrap_or(false)
    }

    /// Owner rights via either authoritative source.
    pub fn owner_rights(self) -> bool {
        self.is_owner || self.role == Some(Role::Owner)
    }
}
