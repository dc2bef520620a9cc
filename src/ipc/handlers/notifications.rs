use anyhow::Result;
use serde_json::{json, Value};

use crate::authz::AccessError;
use crate::identity::ActorId;
use crate::AppContext;

use super::{b, missing, sv};

pub async fn list(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let unread_only = b(&params, "unread").unwrap_or(false);
    let notifications = ctx
        .storage
        .list_notifications(actor.as_str(), unread_only)
        .await?;
    Ok(json!({ "notifications": notifications }))
}

pub async fn mark_read(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = sv(&params, "notificationId").ok_or_else(|| missing("notificationId"))?;
    // Scoped to the calling user — someone else's notification id behaves
    // like a missing one.
    if !ctx.storage.mark_notification_read(id, actor.as_str()).await? {
        return Err(AccessError::NotFound.into());
    }
    Ok(json!({ "read": true }))
}

pub async fn mark_all_read(actor: &ActorId, _params: Value, ctx: &AppContext) -> Result<Value> {
    let updated = ctx
        .storage
        .mark_all_notifications_read(actor.as_str())
        .await?;
    Ok(json!({ "updated": updated }))
}
