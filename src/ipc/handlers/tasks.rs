use anyhow::Result;
use serde_json::{json, Value};
use tracing::info;

use crate::authz::{self, AccessError};
use crate::events::DomainEvent;
use crate::identity::ActorId;
use crate::membership::ProjectId;
use crate::rooms::Channel;
use crate::storage::{TaskFilter, TaskUpdate};
use crate::AppContext;

use super::{missing, project_access, s, sv};

pub async fn list(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    // Narrowing is applied after the visibility filter inside the query —
    // asking for a foreign project yields an empty list, not a leak.
    let filter = TaskFilter {
        project_id: s(&params, "projectId"),
        status: s(&params, "status"),
        assignee_id: s(&params, "assigneeId"),
    };
    let tasks = ctx.storage.list_tasks_for(actor, &filter).await?;
    Ok(json!({ "tasks": tasks }))
}

pub async fn get(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = sv(&params, "taskId").ok_or_else(|| missing("taskId"))?;
    let Some(task) = ctx.storage.get_task(id).await? else {
        return Err(AccessError::NotFound.into());
    };
    let access = project_access(ctx, &task.project_id, actor).await?;
    authz::task::read(access).into_result()?;
    Ok(json!({ "task": task }))
}

pub async fn create(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let project_id = sv(&params, "projectId").ok_or_else(|| missing("projectId"))?;
    let title = sv(&params, "title").ok_or_else(|| missing("title"))?;

    // A nonexistent project and an invisible one look identical here.
    let access = project_access(ctx, project_id, actor).await?;
    authz::task::create(access).into_result()?;

    let task = ctx
        .storage
        .create_task(
            project_id,
            title,
            sv(&params, "description"),
            sv(&params, "status").unwrap_or("todo"),
            sv(&params, "priority").unwrap_or("medium"),
            sv(&params, "assigneeId"),
            sv(&params, "dueDate"),
        )
        .await?;
    info!(id = %task.id, project = %project_id, "task created");

    ctx.dispatcher
        .publish(
            &Channel::Project(ProjectId::new(project_id)),
            &DomainEvent::TaskCreated { task: json!(task) },
        )
        .await;

    if let Some(assignee) = task.assignee_id.as_deref() {
        if assignee != actor.as_str() {
            notify_assignee(ctx, assignee, &task.title).await?;
        }
    }

    Ok(json!({ "task": task }))
}

pub async fn update(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = sv(&params, "taskId").ok_or_else(|| missing("taskId"))?;
    let Some(task) = ctx.storage.get_task(id).await? else {
        return Err(AccessError::NotFound.into());
    };
    let access = project_access(ctx, &task.project_id, actor).await?;
    authz::task::update(access).into_result()?;

    let update = TaskUpdate {
        title: s(&params, "title"),
        description: s(&params, "description"),
        status: s(&params, "status"),
        priority: s(&params, "priority"),
        assignee_id: s(&params, "assigneeId"),
        due_date: s(&params, "dueDate"),
    };
    let previous_assignee = task.assignee_id.clone();
    let task = ctx.storage.update_task(id, &update).await?;

    ctx.dispatcher
        .publish(
            &Channel::Project(ProjectId::new(&task.project_id)),
            &DomainEvent::TaskUpdated { task: json!(task) },
        )
        .await;

    // A freshly assigned user gets a direct notification.
    if let Some(assignee) = task.assignee_id.as_deref() {
        if previous_assignee.as_deref() != Some(assignee) && assignee != actor.as_str() {
            notify_assignee(ctx, assignee, &task.title).await?;
        }
    }

    Ok(json!({ "task": task }))
}

pub async fn delete(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = sv(&params, "taskId").ok_or_else(|| missing("taskId"))?;
    let Some(task) = ctx.storage.get_task(id).await? else {
        return Err(AccessError::NotFound.into());
    };
    let access = project_access(ctx, &task.project_id, actor).await?;
    authz::task::delete(access).into_result()?;

    ctx.storage.delete_task(id).await?;
    info!(id = %id, actor = %actor, "task deleted");

    ctx.dispatcher
        .publish(
            &Channel::Project(ProjectId::new(&task.project_id)),
            &DomainEvent::TaskDeleted {
                task_id: id.to_string(),
                project_id: task.project_id.clone(),
            },
        )
        .await;
    Ok(json!({ "deleted": true }))
}

async fn notify_assignee(ctx: &AppContext, assignee: &str, task_title: &str) -> Result<()> {
    let notification = ctx
        .storage
        .create_notification(
            assignee,
            "taskAssigned",
            &format!("You were assigned: {task_title}"),
            None,
        )
        .await?;
    ctx.dispatcher
        .publish(
            &Channel::Actor(ActorId::new(assignee)),
            &DomainEvent::NotificationCreated {
                notification: json!(notification),
            },
        )
        .await;
    Ok(())
}
