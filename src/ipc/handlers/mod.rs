//! RPC method handlers.
//!
//! Every mutation handler follows one shape: parse params → load the
//! actor's [`ProjectAccess`] snapshot → branch on the decision function →
//! execute the storage mutation → publish the resulting domain event to its
//! scope. Events fire only after the storage write has returned, and never
//! for a denied or failed mutation.

pub mod comments;
pub mod daemon;
pub mod notifications;
pub mod projects;
pub mod tasks;

use serde_json::Value;

use crate::identity::ActorId;
use crate::membership::{ProjectAccess, ProjectId};
use crate::AppContext;

pub(crate) fn s(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|v| v.as_str()).map(String::from)
}
pub(crate) fn sv<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|v| v.as_str())
}
pub(crate) fn b(v: &Value, key: &str) -> Option<bool> {
    v.get(key).and_then(|v| v.as_bool())
}

/// Missing-parameter error; classified as INVALID_PARAMS at the edge.
pub(crate) fn missing(key: &str) -> anyhow::Error {
    anyhow::anyhow!("missing param: {key}")
}

/// Fetch the actor's standing on a project, once per request. The snapshot
/// feeds the pure decision functions — they never touch storage themselves.
pub(crate) async fn project_access(
    ctx: &AppContext,
    project_id: &str,
    actor: &ActorId,
) -> anyhow::Result<ProjectAccess> {
    let project = ProjectId::new(project_id);
    ProjectAccess::load(ctx.storage.as_ref(), &project, actor).await
}
