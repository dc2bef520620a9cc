pub mod authz;
pub mod config;
pub mod events;
pub mod identity;
pub mod ipc;
pub mod membership;
pub mod rooms;
pub mod storage;

use std::sync::Arc;

use config::DaemonConfig;
use rooms::dispatch::EventDispatcher;
use rooms::RoomRegistry;
use storage::Storage;

/// Shared application state passed to every RPC handler and connection task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub storage: Arc<Storage>,
    /// Live connections and their channel subscriptions.
    pub rooms: Arc<RoomRegistry>,
    /// Fan-out of domain events over the room registry.
    pub dispatcher: EventDispatcher,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub fn new(config: DaemonConfig, storage: Storage) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            dispatcher: EventDispatcher::new(rooms.clone()),
            rooms,
            started_at: std::time::Instant::now(),
        }
    }
}
