//! Connection Registry
//!
//! Maps live transport sessions to authenticated identities and tracks the
//! symmetric pairing relation between them. All state lives behind one
//! mutex; every mutation of the pairing relation happens inside that single
//! critical section, and the lock is never held across an await point.
//! Insertion order of connections is the documented matchmaking tie-break.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::ServerEvent;
use crate::types::{Result, SwitchboardError};

/// Opaque identifier for one live transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Authenticated identity attached to a connection at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub username: String,
}

/// Outbound half of a connection's messaging channel. Delivery is
/// best-effort; the queue preserves per-sender order.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct Connection {
    identity: Identity,
    peer: Option<ConnId>,
    sender: EventSender,
    #[allow(dead_code)]
    connected_at: DateTime<Utc>,
}

/// What `attach` did with the new connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The identity had no prior connection
    Fresh,
    /// The identity was already bound; the new connection took over the old
    /// one's place, inheriting its pairing
    Resumed { peer: Option<(ConnId, Identity)> },
}

/// A removed connection, as seen by disconnect cleanup
pub struct RemovedConn {
    pub identity: Identity,
    pub peer: Option<ConnId>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnId, Connection>,
    /// Connection ids in insertion order; drives `claim_or_wait` scans
    order: Vec<ConnId>,
    by_user: HashMap<String, ConnId>,
}

impl RegistryInner {
    fn insert(&mut self, conn: ConnId, connection: Connection) {
        self.by_user
            .insert(connection.identity.id.clone(), conn);
        self.connections.insert(conn, connection);
        self.order.push(conn);
    }
}

/// The shared registry instance, injected into every component that needs it
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a brand-new connection.
    ///
    /// Fails with `DuplicateConnection` if the connection id is already
    /// registered, or if the identity is already bound to a live connection
    /// (identity reconnects go through [`Registry::attach`]).
    pub fn register(&self, conn: ConnId, identity: Identity, sender: EventSender) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock");

        if inner.connections.contains_key(&conn) {
            return Err(SwitchboardError::DuplicateConnection(conn));
        }
        if let Some(existing) = inner.by_user.get(&identity.id) {
            return Err(SwitchboardError::DuplicateConnection(*existing));
        }

        inner.insert(
            conn,
            Connection {
                identity,
                peer: None,
                sender,
                connected_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Register a connection, taking over from any existing connection of
    /// the same identity.
    ///
    /// The takeover preserves the pairing: the counterpart's link is
    /// rewritten to the new connection id. This is the reconnect path for
    /// the grace-period policy, and also covers an identity opening a
    /// second connection while the first is still live.
    pub fn attach(&self, conn: ConnId, identity: Identity, sender: EventSender) -> Result<AttachOutcome> {
        let mut inner = self.inner.lock().expect("registry lock");

        if inner.connections.contains_key(&conn) {
            return Err(SwitchboardError::DuplicateConnection(conn));
        }

        let Some(old) = inner.by_user.get(&identity.id).copied() else {
            inner.insert(
                conn,
                Connection {
                    identity,
                    peer: None,
                    sender,
                    connected_at: Utc::now(),
                },
            );
            return Ok(AttachOutcome::Fresh);
        };

        let old_conn = inner
            .connections
            .remove(&old)
            .expect("registry maps consistent");
        inner.order.retain(|c| *c != old);

        let peer = old_conn.peer;
        if let Some(peer_id) = peer {
            if let Some(peer_conn) = inner.connections.get_mut(&peer_id) {
                peer_conn.peer = Some(conn);
            }
        }

        inner.insert(
            conn,
            Connection {
                identity,
                peer,
                sender,
                connected_at: Utc::now(),
            },
        );

        let peer = peer.and_then(|peer_id| {
            inner
                .connections
                .get(&peer_id)
                .map(|c| (peer_id, c.identity.clone()))
        });
        Ok(AttachOutcome::Resumed { peer })
    }

    /// Identity attached to a connection, if registered
    pub fn lookup(&self, conn: ConnId) -> Option<Identity> {
        let inner = self.inner.lock().expect("registry lock");
        inner.connections.get(&conn).map(|c| c.identity.clone())
    }

    /// Live connection of an identity, if any
    pub fn connection_for_user(&self, user_id: &str) -> Option<ConnId> {
        let inner = self.inner.lock().expect("registry lock");
        inner.by_user.get(user_id).copied()
    }

    /// Current counterpart of a connection, if paired
    pub fn peer_of(&self, conn: ConnId) -> Option<ConnId> {
        let inner = self.inner.lock().expect("registry lock");
        inner.connections.get(&conn).and_then(|c| c.peer)
    }

    /// Establish a symmetric pairing between two registered connections.
    ///
    /// Fails with `AlreadyPaired` if either side already has a partner or
    /// on a self-pair. Returns `Ok(false)` without touching anything if
    /// either connection id is unknown.
    pub fn pair(&self, a: ConnId, b: ConnId) -> Result<bool> {
        let mut inner = self.inner.lock().expect("registry lock");

        if !inner.connections.contains_key(&a) || !inner.connections.contains_key(&b) {
            return Ok(false);
        }
        if a == b {
            return Err(SwitchboardError::AlreadyPaired);
        }
        if inner.connections[&a].peer.is_some() || inner.connections[&b].peer.is_some() {
            return Err(SwitchboardError::AlreadyPaired);
        }

        inner.connections.get_mut(&a).expect("checked above").peer = Some(b);
        inner.connections.get_mut(&b).expect("checked above").peer = Some(a);
        Ok(true)
    }

    /// Remove the pairing on both sides. Returns the freed counterpart, or
    /// `None` if the connection was unknown or unpaired.
    pub fn unpair(&self, conn: ConnId) -> Option<ConnId> {
        let mut inner = self.inner.lock().expect("registry lock");
        Self::unpair_locked(&mut inner, conn)
    }

    fn unpair_locked(inner: &mut RegistryInner, conn: ConnId) -> Option<ConnId> {
        let peer = inner.connections.get_mut(&conn)?.peer.take()?;
        if let Some(peer_conn) = inner.connections.get_mut(&peer) {
            peer_conn.peer = None;
        }
        Some(peer)
    }

    /// Deregister a connection, implicitly unpairing it first. Unknown ids
    /// are a no-op (`None`), so duplicate disconnects are tolerated.
    pub fn remove(&self, conn: ConnId) -> Option<RemovedConn> {
        let mut inner = self.inner.lock().expect("registry lock");

        let peer = Self::unpair_locked(&mut inner, conn);
        let connection = inner.connections.remove(&conn)?;
        inner.order.retain(|c| *c != conn);
        inner.by_user.remove(&connection.identity.id);

        Some(RemovedConn {
            identity: connection.identity,
            peer,
        })
    }

    /// Atomically claim the first free counterpart, or stay waiting.
    ///
    /// Scans registered connections in insertion order for the first
    /// unpaired connection with a different identity and links the two
    /// inside the same critical section, so two concurrent joiners can
    /// never claim the same candidate. Returns the claimed counterpart, or
    /// `None` when the caller is left waiting (also when the caller is
    /// unknown or already paired).
    pub fn claim_or_wait(&self, conn: ConnId) -> Option<(ConnId, Identity)> {
        let mut inner = self.inner.lock().expect("registry lock");

        let me = inner.connections.get(&conn)?;
        if me.peer.is_some() {
            return None;
        }
        let my_user = me.identity.id.clone();

        let candidate = inner.order.iter().copied().find(|c| {
            *c != conn
                && inner
                    .connections
                    .get(c)
                    .is_some_and(|other| other.peer.is_none() && other.identity.id != my_user)
        })?;

        inner.connections.get_mut(&candidate).expect("found above").peer = Some(conn);
        inner.connections.get_mut(&conn).expect("looked up above").peer = Some(candidate);

        let identity = inner.connections[&candidate].identity.clone();
        Some((candidate, identity))
    }

    /// Deliver an event to one connection. Best-effort: an unknown id or a
    /// closed channel is logged and dropped.
    pub fn send_to(&self, conn: ConnId, event: ServerEvent) {
        let sender = {
            let inner = self.inner.lock().expect("registry lock");
            inner.connections.get(&conn).map(|c| c.sender.clone())
        };

        match sender {
            Some(sender) => {
                if sender.send(event).is_err() {
                    debug!("dropping event for {}: channel closed", conn);
                }
            }
            None => debug!("dropping event for unknown connection {}", conn),
        }
    }

    /// Deliver an event to every connection except one
    pub fn broadcast_except(&self, except: ConnId, event: ServerEvent) {
        let senders: Vec<(ConnId, EventSender)> = {
            let inner = self.inner.lock().expect("registry lock");
            inner
                .connections
                .iter()
                .filter(|(conn, _)| **conn != except)
                .map(|(conn, c)| (*conn, c.sender.clone()))
                .collect()
        };

        for (conn, sender) in senders {
            if sender.send(event.clone()).is_err() {
                debug!("dropping broadcast for {}: channel closed", conn);
            }
        }
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock");
        inner.connections.len()
    }
}
