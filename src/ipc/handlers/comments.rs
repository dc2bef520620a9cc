use anyhow::Result;
use serde_json::{json, Value};
use tracing::info;

use crate::authz::{self, AccessError};
use crate::events::DomainEvent;
use crate::identity::ActorId;
use crate::membership::ProjectId;
use crate::rooms::Channel;
use crate::storage::CommentRow;
use crate::AppContext;

use super::{missing, project_access, sv};

/// The owning project of a comment, reached through its task. Comments have
/// no access rules of their own beyond authorship — everything else derives
/// from the project.
async fn owning_project(ctx: &AppContext, comment: &CommentRow) -> Result<String> {
    let task = ctx
        .storage
        .get_task(&comment.task_id)
        .await?
        .ok_or(AccessError::NotFound)?;
    Ok(task.project_id)
}

pub async fn create(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let task_id = sv(&params, "taskId").ok_or_else(|| missing("taskId"))?;
    let content = sv(&params, "content").ok_or_else(|| missing("content"))?;

    let Some(task) = ctx.storage.get_task(task_id).await? else {
        return Err(AccessError::NotFound.into());
    };
    let access = project_access(ctx, &task.project_id, actor).await?;
    authz::comment::create(access).into_result()?;

    let comment = ctx.storage.create_comment(task_id, actor, content).await?;
    info!(id = %comment.id, task = %task_id, author = %actor, "comment created");

    ctx.dispatcher
        .publish(
            &Channel::Project(ProjectId::new(&task.project_id)),
            &DomainEvent::CommentCreated {
                task_id: task_id.to_string(),
                comment: json!(comment),
            },
        )
        .await;
    Ok(json!({ "comment": comment }))
}

pub async fn update(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = sv(&params, "commentId").ok_or_else(|| missing("commentId"))?;
    let content = sv(&params, "content").ok_or_else(|| missing("content"))?;

    let Some(comment) = ctx.storage.get_comment(id).await? else {
        return Err(AccessError::NotFound.into());
    };
    let project_id = owning_project(ctx, &comment).await?;
    let access = project_access(ctx, &project_id, actor).await?;
    let author = ActorId::new(comment.user_id.clone());
    authz::comment::update(actor, &author, access).into_result()?;

    let comment = ctx.storage.update_comment(id, content).await?;

    ctx.dispatcher
        .publish(
            &Channel::Project(ProjectId::new(project_id)),
            &DomainEvent::CommentUpdated {
                task_id: comment.task_id.clone(),
                comment: json!(comment),
            },
        )
        .await;
    Ok(json!({ "comment": comment }))
}

pub async fn delete(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = sv(&params, "commentId").ok_or_else(|| missing("commentId"))?;

    let Some(comment) = ctx.storage.get_comment(id).await? else {
        return Err(AccessError::NotFound.into());
    };
    let project_id = owning_project(ctx, &comment).await?;
    let access = project_access(ctx, &project_id, actor).await?;
    let author = ActorId::new(comment.user_id.clone());
    authz::comment::delete(actor, &author, access).into_result()?;

    ctx.storage.delete_comment(id).await?;
    info!(id = %id, actor = %actor, "comment deleted");

    ctx.dispatcher
        .publish(
            &Channel::Project(ProjectId::new(project_id)),
            &DomainEvent::CommentDeleted {
                comment_id: id.to_string(),
                task_id: comment.task_id.clone(),
            },
        )
        .await;
    Ok(json!({ "deleted": true }))
}
