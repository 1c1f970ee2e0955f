use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::battle::player::BattlePlayer;
use crate::battle::Battle;
use crate::ecs::store::{ok_or_log, EntityStore};
use crate::ecs::templates;
use crate::ecs::{ConnectionId, EntityId};
use crate::net::protocol::ServerPacket;

/// Identity of the logged-in user behind a connection
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
}

/// Transient on-screen message with an expiry
struct TimedNotification {
    entity: EntityId,
    close_at: Instant,
}

/// Server-side handle of one client connection
pub struct Connection {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    /// Session entity shared with the client right after accept
    pub session: EntityId,
    user: RwLock<Option<(EntityId, UserProfile)>>,
    battle_player: Mutex<Option<(Arc<Battle>, Arc<BattlePlayer>)>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ServerPacket>>>,
    torn_down: AtomicBool,
    /// Consecutive battles played to completion, feeds desertion decay
    pub battle_series: AtomicU32,
    pub created_at: Instant,
    last_activity: Mutex<Instant>,
    notifications: Mutex<Vec<TimedNotification>>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        session: EntityId,
        outbound: mpsc::UnboundedSender<ServerPacket>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote_addr,
            session,
            user: RwLock::new(None),
            battle_player: Mutex::new(None),
            outbound: Mutex::new(Some(outbound)),
            torn_down: AtomicBool::new(false),
            battle_series: AtomicU32::new(0),
            created_at: now,
            last_activity: Mutex::new(now),
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn login(&self, user_entity: EntityId, profile: UserProfile) {
        *self.user.write() = Some((user_entity, profile));
    }

    pub fn user_entity(&self) -> Option<EntityId> {
        self.user.read().as_ref().map(|(entity, _)| *entity)
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.user.read().as_ref().map(|(_, profile)| profile.clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.user.read().is_some()
    }

    /// Whether this connection currently has a battle membership
    pub fn in_lobby(&self) -> bool {
        self.battle_player.lock().is_some()
    }

    pub fn battle(&self) -> Option<(Arc<Battle>, Arc<BattlePlayer>)> {
        self.battle_player.lock().clone()
    }

    pub fn set_battle(&self, battle: Arc<Battle>, player: Arc<BattlePlayer>) {
        *self.battle_player.lock() = Some((battle, player));
    }

    pub fn clear_battle(&self) {
        *self.battle_player.lock() = None;
    }

    /// Queue an outbound packet; drops silently once the peer is gone
    pub fn push(&self, packet: ServerPacket) {
        if let Some(outbound) = &*self.outbound.lock() {
            let _ = outbound.send(packet);
        }
    }

    /// Drop this handle's outbound sender so the send stage can drain out
    pub fn close_outbound(&self) {
        self.outbound.lock().take();
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_time(&self) -> std::time::Duration {
        self.last_activity.lock().elapsed()
    }

    /// First teardown call wins; later ones are no-ops
    pub fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Show a transient text message to this client for a while
    pub fn display_message(&self, store: &EntityStore, message: &str, ttl: std::time::Duration) {
        let entity = templates::notification(store, message);
        ok_or_log(store.share(entity, self.id), "display_message");
        self.notifications.lock().push(TimedNotification {
            entity,
            close_at: Instant::now() + ttl,
        });
    }

    /// Expire timed notifications; called by the connection sweep
    pub fn tick(&self, store: &EntityStore) {
        let mut notifications = self.notifications.lock();
        let now = Instant::now();
        notifications.retain(|notification| {
            if notification.close_at <= now {
                ok_or_log(store.unshare(notification.entity, self.id), "notification expiry");
                false
            } else {
                true
            }
        });
    }
}

/// All live connections
pub struct ConnectionManager {
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn allocate_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        self.connections.write().insert(connection.id, connection);
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().remove(&id)
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Expire timed notifications on every connection
    pub fn tick_all(&self, store: &EntityStore) {
        for connection in self.all() {
            connection.tick(store);
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
