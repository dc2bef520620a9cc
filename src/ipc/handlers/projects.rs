use anyhow::{bail, Result};
use serde_json::{json, Value};
use tracing::info;

use crate::authz::{self, AccessError};
use crate::events::DomainEvent;
use crate::identity::ActorId;
use crate::membership::{ProjectId, Role};
use crate::rooms::{Channel, MembershipChange};
use crate::AppContext;

use super::{missing, project_access, s, sv};

pub async fn list(actor: &ActorId, _params: Value, ctx: &AppContext) -> Result<Value> {
    let projects = ctx.storage.list_projects_for(actor).await?;
    Ok(json!({ "projects": projects }))
}

pub async fn get(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = sv(&params, "projectId").ok_or_else(|| missing("projectId"))?;
    let Some(project) = ctx.storage.get_project(id).await? else {
        // Missing and invisible produce the same outward signal.
        return Err(AccessError::NotFound.into());
    };
    let access = project_access(ctx, id, actor).await?;
    authz::project::read(access).into_result()?;

    let members = ctx.storage.list_members(id).await?;
    Ok(json!({ "project": project, "members": members }))
}

pub async fn create(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let name = sv(&params, "name").ok_or_else(|| missing("name"))?;
    authz::project::create().into_result()?;

    // The owner membership row is written in the same transaction as the
    // project — a project never exists without its creator holding owner
    // rights.
    let project = ctx
        .storage
        .create_project(
            name,
            sv(&params, "description"),
            sv(&params, "color"),
            actor,
        )
        .await?;
    info!(id = %project.id, owner = %actor, "project created");

    let pid = ProjectId::new(project.id.clone());
    // Subscribe the creator's live connections before the event goes out so
    // they see their own project channel from the first message.
    ctx.rooms
        .membership_changed(&pid, actor, MembershipChange::Added)
        .await;
    ctx.dispatcher
        .publish(
            &Channel::Project(pid),
            &DomainEvent::ProjectCreated {
                project: json!(project),
            },
        )
        .await;
    Ok(json!({ "project": project }))
}

pub async fn update(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = sv(&params, "projectId").ok_or_else(|| missing("projectId"))?;
    if ctx.storage.get_project(id).await?.is_none() {
        return Err(AccessError::NotFound.into());
    }
    let access = project_access(ctx, id, actor).await?;
    authz::project::update(access).into_result()?;

    let project = ctx
        .storage
        .update_project(
            id,
            sv(&params, "name"),
            sv(&params, "description"),
            sv(&params, "color"),
        )
        .await?;

    ctx.dispatcher
        .publish(
            &Channel::Project(ProjectId::new(id)),
            &DomainEvent::ProjectUpdated {
                project: json!(project),
            },
        )
        .await;
    Ok(json!({ "project": project }))
}

pub async fn delete(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let id = sv(&params, "projectId").ok_or_else(|| missing("projectId"))?;
    if ctx.storage.get_project(id).await?.is_none() {
        return Err(AccessError::NotFound.into());
    }
    let access = project_access(ctx, id, actor).await?;
    authz::project::delete(access).into_result()?;

    // Capture the audience before the cascade wipes the membership rows.
    let member_ids = ctx.storage.project_member_ids(id).await?;
    ctx.storage.delete_project(id).await?;
    info!(id = %id, actor = %actor, "project deleted");

    let pid = ProjectId::new(id);
    ctx.dispatcher
        .publish(
            &Channel::Project(pid.clone()),
            &DomainEvent::ProjectDeleted {
                project_id: id.to_string(),
            },
        )
        .await;
    // Every membership row died with the project; drop the live
    // subscriptions to match.
    for user_id in member_ids {
        ctx.rooms
            .membership_changed(&pid, &ActorId::new(user_id), MembershipChange::Removed)
            .await;
    }
    Ok(json!({ "deleted": true }))
}

pub async fn add_member(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let project_id = sv(&params, "projectId").ok_or_else(|| missing("projectId"))?;
    let user_id = sv(&params, "userId").ok_or_else(|| missing("userId"))?;
    let role = match s(&params, "role") {
        Some(r) => r.parse::<Role>()?,
        None => Role::Member,
    };

    let Some(project) = ctx.storage.get_project(project_id).await? else {
        return Err(AccessError::NotFound.into());
    };
    let access = project_access(ctx, project_id, actor).await?;
    authz::project::manage_members(access).into_result()?;

    if ctx.storage.get_member(project_id, user_id).await?.is_some() {
        bail!("already a member of this project");
    }

    let member = ctx.storage.add_member(project_id, user_id, role).await?;
    info!(project = %project_id, user = %user_id, role = %role, "member added");

    let pid = ProjectId::new(project_id);
    let added = ActorId::new(user_id);
    ctx.rooms
        .membership_changed(&pid, &added, MembershipChange::Added)
        .await;
    ctx.dispatcher
        .publish(
            &Channel::Project(pid),
            &DomainEvent::MemberAdded {
                project_id: project_id.to_string(),
                member: json!(member),
            },
        )
        .await;

    let notification = ctx
        .storage
        .create_notification(
            user_id,
            "memberAdded",
            &format!("You were added to {}", project.name),
            None,
        )
        .await?;
    ctx.dispatcher
        .publish(
            &Channel::Actor(added),
            &DomainEvent::NotificationCreated {
                notification: json!(notification),
            },
        )
        .await;

    Ok(json!({ "member": member }))
}

pub async fn remove_member(actor: &ActorId, params: Value, ctx: &AppContext) -> Result<Value> {
    let project_id = sv(&params, "projectId").ok_or_else(|| missing("projectId"))?;
    let user_id = sv(&params, "userId").ok_or_else(|| missing("userId"))?;

    let Some(project) = ctx.storage.get_project(project_id).await? else {
        return Err(AccessError::NotFound.into());
    };
    let access = project_access(ctx, project_id, actor).await?;
    authz::project::manage_members(access).into_result()?;

    // The owner cannot be removed while the project exists — only deleting
    // the project releases that membership.
    if project.owner_id == user_id {
        return Err(AccessError::Forbidden.into());
    }

    if !ctx.storage.remove_member(project_id, user_id).await? {
        return Err(AccessError::NotFound.into());
    }
    info!(project = %project_id, user = %user_id, "member removed");

    let pid = ProjectId::new(project_id);
    let removed = ActorId::new(user_id);
    // Unsubscribe first: the removed member must not see this project's
    // events from this point on, this one included.
    ctx.rooms
        .membership_changed(&pid, &removed, MembershipChange::Removed)
        .await;
    ctx.dispatcher
        .publish(
            &Channel::Project(pid),
            &DomainEvent::MemberRemoved {
                project_id: project_id.to_string(),
                user_id: user_id.to_string(),
            },
        )
        .await;

    let notification = ctx
        .storage
        .create_notification(
            user_id,
            "memberRemoved",
            &format!("You were removed from {}", project.name),
            None,
        )
        .await?;
    ctx.dispatcher
        .publish(
            &Channel::Actor(removed),
            &DomainEvent::NotificationCreated {
                notification: json!(notification),
            },
        )
        .await;

    Ok(json!({ "removed": true }))
}
