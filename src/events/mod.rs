// SPDX-License-Identifier: MIT
//! Domain events delivered to live connections.
//!
//! Every successfully committed mutation produces exactly one event. The
//! scope it is published to — a project channel or an actor channel — is
//! chosen by the mutation handler from the mutated resource's owning project
//! or the affected user. On the wire an event is a JSON-RPC notification
//! with a dotted method name, e.g. `task.created`.

use serde_json::{json, Value};

/// What happened, plus the payload the affected clients receive.
///
/// Payloads are the same camelCase view documents the RPC responses use, so
/// a client can apply an event without a follow-up fetch.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    ProjectCreated { project: Value },
    ProjectUpdated { project: Value },
    ProjectDeleted { project_id: String },
    MemberAdded { project_id: String, member: Value },
    MemberRemoved { project_id: String, user_id: String },
    TaskCreated { task: Value },
    TaskUpdated { task: Value },
    TaskDeleted { task_id: String, project_id: String },
    CommentCreated { task_id: String, comment: Value },
    CommentUpdated { task_id: String, comment: Value },
    CommentDeleted { comment_id: String, task_id: String },
    NotificationCreated { notification: Value },
}

impl DomainEvent {
    /// Dotted method name carried in the JSON-RPC notification.
    pub fn method(&self) -> &'static str {
        match self {
            DomainEvent::ProjectCreated { .. } => "project.created",
            DomainEvent::ProjectUpdated { .. } => "project.updated",
            DomainEvent::ProjectDeleted { .. } => "project.deleted",
            DomainEvent::MemberAdded { .. } => "project.memberAdded",
            DomainEvent::MemberRemoved { .. } => "project.memberRemoved",
            DomainEvent::TaskCreated { .. } => "task.created",
            DomainEvent::TaskUpdated { .. } => "task.updated",
            DomainEvent::TaskDeleted { .. } => "task.deleted",
            DomainEvent::CommentCreated { .. } => "comment.created",
            DomainEvent::CommentUpdated { .. } => "comment.updated",
            DomainEvent::CommentDeleted { .. } => "comment.deleted",
            DomainEvent::NotificationCreated { .. } => "notification.created",
        }
    }

    fn params(&self) -> Value {
        match self {
            DomainEvent::ProjectCreated { project }
            | DomainEvent::ProjectUpdated { project } => json!({ "project": project }),
            DomainEvent::ProjectDeleted { project_id } => json!({ "projectId": project_id }),
            DomainEvent::MemberAdded { project_id, member } => {
                json!({ "projectId": project_id, "member": member })
            }
            DomainEvent::MemberRemoved {
                project_id,
                user_id,
            } => json!({ "projectId": project_id, "userId": user_id }),
            DomainEvent::TaskCreated { task } | DomainEvent::TaskUpdated { task } => {
                json!({ "task": task })
            }
            DomainEvent::TaskDeleted {
                task_id,
                project_id,
            } => json!({ "taskId": task_id, "projectId": project_id }),
            DomainEvent::CommentCreated { task_id, comment }
            | DomainEvent::CommentUpdated { task_id, comment } => {
                json!({ "taskId": task_id, "comment": comment })
            }
            DomainEvent::CommentDeleted {
                comment_id,
                task_id,
            } => json!({ "commentId": comment_id, "taskId": task_id }),
            DomainEvent::NotificationCreated { notification } => {
                json!({ "notification": notification })
            }
        }
    }

    /// The complete JSON-RPC notification frame, serialized once per
    /// publish and shared across recipients.
    pub fn to_notification(&self) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": self.method(),
            "params": self.params(),
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_frame_shape() {
        let event = DomainEvent::TaskCreated {
            task: json!({ "id": "t1", "projectId": "p1" }),
        };
        let frame: Value = serde_json::from_str(&event.to_notification()).unwrap();
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["method"], "task.created");
        assert_eq!(frame["params"]["task"]["id"], "t1");
        // Notifications carry no id — clients must not reply.
        assert!(frame.get("id").is_none());
    }

    #[test]
    fn method_names_are_dotted_and_stable() {
        let cases = [
            (
                DomainEvent::ProjectDeleted {
                    project_id: "p".into(),
                },
                "project.deleted",
            ),
            (
                DomainEvent::MemberRemoved {
                    project_id: "p".into(),
                    user_id: "u".into(),
                },
                "project.memberRemoved",
            ),
            (
                DomainEvent::NotificationCreated {
                    notification: json!({}),
                },
                "notification.created",
            ),
        ];
        for (event, method) in cases {
            assert_eq!(event.method(), method);
        }
    }
}
