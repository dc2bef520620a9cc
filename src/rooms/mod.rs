// SPDX-License-Identifier: MIT
//! Room registry — live connections and the channels they may receive.
//!
//! Event visibility is derived from project membership, so each connection
//! subscribes to `actor:<id>` plus one `project:<id>` channel per project
//! its user currently owns or belongs to. Subscription state is recomputed
//! from membership at connect time and patched immediately when membership
//! changes; it is never persisted, so a registry restart is recovered by
//! reconnecting clients re-running [`RoomRegistry::connect`].
//!
//! One registry-wide write lock serializes every mutation, which more than
//! satisfies the per-actor ordering requirement. Publish-time reads take the
//! read lock and therefore always observe a fully applied subscription set —
//! never one mid-update.

pub mod dispatch;

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::identity::ActorId;
use crate::membership::ProjectId;

// ─── Channels ────────────────────────────────────────────────────────────────

/// A named broadcast scope. Channels are derived from membership state,
/// never stored as ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Visible to every current member of the project, owner included.
    Project(ProjectId),
    /// Visible to exactly one user; used for direct notifications.
    Actor(ActorId),
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Project(id) => write!(f, "project:{id}"),
            Channel::Actor(id) => write!(f, "actor:{id}"),
        }
    }
}

// ─── Connections ─────────────────────────────────────────────────────────────

/// Opaque id of one live connection. A user with two open clients holds two
/// distinct connections, each subscribed independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound frame queue for one connection. Unbounded so publishers never
/// block; the connection task drains it into the socket.
pub type FrameSender = mpsc::UnboundedSender<String>;

struct ConnectionEntry {
    actor: ActorId,
    sender: FrameSender,
    channels: HashSet<Channel>,
}

/// Membership delta applied to a live actor's subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Added,
    Removed,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Channel → subscribed connections. Kept in lockstep with each entry's
    /// `channels` set under the same write lock.
    subscribers: HashMap<Channel, HashSet<ConnectionId>>,
    /// Actor → that actor's live connections.
    by_actor: HashMap<ActorId, HashSet<ConnectionId>>,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Registry of live connections and their channel subscriptions.
#[derive(Default)]
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection: subscribe it to its actor channel plus one
    /// project channel per project the actor currently owns or belongs to.
    /// Returns the subscribed set.
    pub async fn connect(
        &self,
        conn: ConnectionId,
        actor: ActorId,
        sender: FrameSender,
        projects: &[ProjectId],
    ) -> Vec<Channel> {
        let mut channels: HashSet<Channel> = HashSet::with_capacity(projects.len() + 1);
        channels.insert(Channel::Actor(actor.clone()));
        for project in projects {
            channels.insert(Channel::Project(project.clone()));
        }

        let mut state = self.state.write().await;
        for channel in &channels {
            state
                .subscribers
                .entry(channel.clone())
                .or_default()
                .insert(conn.clone());
        }
        state
            .by_actor
            .entry(actor.clone())
            .or_default()
            .insert(conn.clone());

        let subscribed: Vec<Channel> = channels.iter().cloned().collect();
        debug!(conn = %conn, actor = %actor, channels = subscribed.len(), "connection registered");
        state.connections.insert(
            conn,
            ConnectionEntry {
                actor,
                sender,
                channels,
            },
        );
        subscribed
    }

    /// Release a connection and all of its subscriptions. Idempotent — a
    /// second call for the same id is a no-op.
    pub async fn disconnect(&self, conn: &ConnectionId) {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.remove(conn) else {
            return;
        };
        for channel in &entry.channels {
            if let Some(set) = state.subscribers.get_mut(channel) {
                set.remove(conn);
                if set.is_empty() {
                    state.subscribers.remove(channel);
                }
            }
        }
        if let Some(set) = state.by_actor.get_mut(&entry.actor) {
            set.remove(conn);
            if set.is_empty() {
                state.by_actor.remove(&entry.actor);
            }
        }
        debug!(conn = %conn, actor = %entry.actor, "connection released");
    }

    /// Apply a membership change to every live connection of `actor`.
    ///
    /// Effective immediately: a removed member stops receiving the project's
    /// events on its next delivered message, with no grace window.
    pub async fn membership_changed(
        &self,
        project: &ProjectId,
        actor: &ActorId,
        change: MembershipChange,
    ) {
        let channel = Channel::Project(project.clone());
        let mut state = self.state.write().await;
        let conns: Vec<ConnectionId> = match state.by_actor.get(actor) {
            Some(set) => set.iter().cloned().collect(),
            None => return,
        };
        for conn in conns {
            match change {
                MembershipChange::Added => {
                    if let Some(entry) = state.connections.get_mut(&conn) {
                        entry.channels.insert(channel.clone());
                    }
                    state
                        .subscribers
                        .entry(channel.clone())
                        .or_default()
                        .insert(conn);
                }
                MembershipChange::Removed => {
                    if let Some(entry) = state.connections.get_mut(&conn) {
                        entry.channels.remove(&channel);
                    }
                    if let Some(set) = state.subscribers.get_mut(&channel) {
                        set.remove(&conn);
                        if set.is_empty() {
                            state.subscribers.remove(&channel);
                        }
                    }
                }
            }
        }
        debug!(project = %project, actor = %actor, ?change, "membership applied to live connections");
    }

    /// Senders currently subscribed to `channel`, snapshotted atomically
    /// under the read lock.
    pub async fn subscribers(&self, channel: &Channel) -> Vec<(ConnectionId, FrameSender)> {
        let state = self.state.read().await;
        match state.subscribers.get(channel) {
            Some(set) => set
                .iter()
                .filter_map(|conn| {
                    state
                        .connections
                        .get(conn)
                        .map(|entry| (conn.clone(), entry.sender.clone()))
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Channels a connection is currently subscribed to.
    pub async fn channels_of(&self, conn: &ConnectionId) -> Vec<Channel> {
        let state = self.state.read().await;
        state
            .connections
            .get(conn)
            .map(|entry| entry.channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_sender() -> (FrameSender, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn connect_subscribes_actor_and_project_channels() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = channel_sender();
        let conn = ConnectionId::generate();
        let channels = registry
            .connect(
                conn.clone(),
                ActorId::from("alice"),
                tx,
                &[ProjectId::from("p1"), ProjectId::from("p2")],
            )
            .await;

        assert_eq!(channels.len(), 3);
        assert!(channels.contains(&Channel::Actor(ActorId::from("alice"))));
        assert!(channels.contains(&Channel::Project(ProjectId::from("p1"))));
        assert!(channels.contains(&Channel::Project(ProjectId::from("p2"))));
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = channel_sender();
        let conn = ConnectionId::generate();
        registry
            .connect(conn.clone(), ActorId::from("alice"), tx, &[])
            .await;

        registry.disconnect(&conn).await;
        let after_first = registry.connection_count().await;
        registry.disconnect(&conn).await;
        let after_second = registry.connection_count().await;

        assert_eq!(after_first, 0);
        assert_eq!(after_first, after_second);
        assert!(registry
            .subscribers(&Channel::Actor(ActorId::from("alice")))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn membership_added_subscribes_every_live_connection() {
        let registry = RoomRegistry::new();
        let (tx1, _rx1) = channel_sender();
        let (tx2, _rx2) = channel_sender();
        let c1 = ConnectionId::generate();
        let c2 = ConnectionId::generate();
        registry
            .connect(c1.clone(), ActorId::from("bob"), tx1, &[])
            .await;
        registry
            .connect(c2.clone(), ActorId::from("bob"), tx2, &[])
            .await;

        registry
            .membership_changed(
                &ProjectId::from("p1"),
                &ActorId::from("bob"),
                MembershipChange::Added,
            )
            .await;

        let project = Channel::Project(ProjectId::from("p1"));
        assert_eq!(registry.subscribers(&project).await.len(), 2);
        assert!(registry.channels_of(&c1).await.contains(&project));
        assert!(registry.channels_of(&c2).await.contains(&project));
    }

    #[tokio::test]
    async fn membership_removed_unsubscribes_immediately() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = channel_sender();
        let conn = ConnectionId::generate();
        registry
            .connect(
                conn.clone(),
                ActorId::from("bob"),
                tx,
                &[ProjectId::from("p1")],
            )
            .await;

        registry
            .membership_changed(
                &ProjectId::from("p1"),
                &ActorId::from("bob"),
                MembershipChange::Removed,
            )
            .await;

        let project = Channel::Project(ProjectId::from("p1"));
        assert!(registry.subscribers(&project).await.is_empty());
        // The connection itself stays open — only the subscription is gone.
        assert_eq!(registry.connection_count().await, 1);
        assert!(registry
            .channels_of(&conn)
            .await
            .contains(&Channel::Actor(ActorId::from("bob"))));
    }

    #[tokio::test]
    async fn membership_change_for_offline_actor_is_a_noop() {
        let registry = RoomRegistry::new();
        registry
            .membership_changed(
                &ProjectId::from("p1"),
                &ActorId::from("ghost"),
                MembershipChange::Added,
            )
            .await;
        assert!(registry
            .subscribers(&Channel::Project(ProjectId::from("p1")))
            .await
            .is_empty());
    }

    #[test]
    fn channel_display_format() {
        assert_eq!(
            Channel::Project(ProjectId::from("p1")).to_string(),
            "project:p1"
        );
        assert_eq!(Channel::Actor(ActorId::from("u1")).to_string(), "actor:u1");
    }
}
