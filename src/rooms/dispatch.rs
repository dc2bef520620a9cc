// SPDX-License-Identifier: MIT
//! Event fan-out: deliver one domain event to every connection currently
//! subscribed to its scope.
//!
//! Delivery is at-most-once per subscribed connection and best-effort — no
//! retry, no persistence. An actor who is offline when an event fires simply
//! misses it. Publish only after the originating mutation has durably
//! committed, and exactly once per committed mutation.

use std::sync::Arc;

use tracing::debug;

use crate::events::DomainEvent;

use super::{Channel, RoomRegistry};

/// Best-effort fan-out over the room registry.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<RoomRegistry>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `event` to every connection subscribed to `scope`. Returns
    /// the number of connections that accepted the frame.
    ///
    /// A recipient whose outbound queue is already closed (socket mid-close)
    /// is skipped — one dead connection never blocks the rest of the scope.
    pub async fn publish(&self, scope: &Channel, event: &DomainEvent) -> usize {
        let frame = event.to_notification();
        let targets = self.registry.subscribers(scope).await;
        let mut delivered = 0;
        for (conn, sender) in targets {
            if sender.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(conn = %conn, scope = %scope, "skipping closed connection");
            }
        }
        debug!(scope = %scope, method = event.method(), delivered, "event published");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ActorId;
    use crate::membership::ProjectId;
    use crate::rooms::ConnectionId;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn task_event() -> DomainEvent {
        DomainEvent::TaskCreated {
            task: json!({ "id": "t1" }),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscribed_connection() {
        let registry = Arc::new(RoomRegistry::new());
        let dispatcher = EventDispatcher::new(registry.clone());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry
            .connect(
                ConnectionId::generate(),
                ActorId::from("alice"),
                tx1,
                &[ProjectId::from("p1")],
            )
            .await;
        registry
            .connect(
                ConnectionId::generate(),
                ActorId::from("bob"),
                tx2,
                &[ProjectId::from("p1")],
            )
            .await;

        let scope = Channel::Project(ProjectId::from("p1"));
        let delivered = dispatcher.publish(&scope, &task_event()).await;

        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn publish_to_empty_scope_delivers_nothing() {
        let registry = Arc::new(RoomRegistry::new());
        let dispatcher = EventDispatcher::new(registry);
        let scope = Channel::Project(ProjectId::from("nowhere"));
        assert_eq!(dispatcher.publish(&scope, &task_event()).await, 0);
    }

    #[tokio::test]
    async fn dead_receiver_does_not_block_the_rest() {
        let registry = Arc::new(RoomRegistry::new());
        let dispatcher = EventDispatcher::new(registry.clone());
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry
            .connect(
                ConnectionId::generate(),
                ActorId::from("alice"),
                tx1,
                &[ProjectId::from("p1")],
            )
            .await;
        registry
            .connect(
                ConnectionId::generate(),
                ActorId::from("bob"),
                tx2,
                &[ProjectId::from("p1")],
            )
            .await;
        drop(rx1); // alice's socket died without a disconnect yet

        let scope = Channel::Project(ProjectId::from("p1"));
        let delivered = dispatcher.publish(&scope, &task_event()).await;

        assert_eq!(delivered, 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn actor_scope_reaches_all_of_that_users_connections() {
        let registry = Arc::new(RoomRegistry::new());
        let dispatcher = EventDispatcher::new(registry.clone());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry
            .connect(ConnectionId::generate(), ActorId::from("alice"), tx1, &[])
            .await;
        registry
            .connect(ConnectionId::generate(), ActorId::from("alice"), tx2, &[])
            .await;

        let scope = Channel::Actor(ActorId::from("alice"));
        let event = DomainEvent::NotificationCreated {
            notification: json!({ "id": "n1" }),
        };
        assert_eq!(dispatcher.publish(&scope, &event).await, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
