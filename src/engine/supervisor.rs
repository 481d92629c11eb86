//! Disconnect/Reconnect Supervisor
//!
//! On disconnect, either releases the identity immediately or schedules a
//! cancellable deadline (grace-period policy). Each pending deadline is an
//! entry in a DashMap keyed by user id, stamped with a sequence number; the
//! deadline task revalidates its sequence with an atomic remove before it
//! releases anything, so a reconnect or a replacing disconnect can never
//! race a stale timer. At most one pending deadline exists per identity.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::DisconnectPolicy;
use crate::engine::registry::ConnId;
use crate::engine::Engine;
use crate::protocol::{ServerEvent, UserStatus};
use std::sync::Arc;

struct PendingEntry {
    seq: u64,
    conn: ConnId,
}

/// Pending grace-period deadlines, keyed by user id
#[derive(Default)]
pub struct PendingDisconnects {
    pending: DashMap<String, PendingEntry>,
    next_seq: AtomicU64,
}

impl PendingDisconnects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or replace) the pending deadline for an identity and
    /// return its sequence number. Replacing invalidates any timer still
    /// holding the previous sequence.
    pub fn schedule(&self, user_id: String, conn: ConnId) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(user_id, PendingEntry { seq, conn });
        seq
    }

    /// Cancel the pending deadline for a reconnecting identity. Returns the
    /// connection the identity disconnected from, if a deadline was pending.
    pub fn cancel(&self, user_id: &str) -> Option<ConnId> {
        self.pending.remove(user_id).map(|(_, entry)| entry.conn)
    }

    /// Claim a fired deadline. Succeeds only if the entry still carries
    /// `seq`; a canceled or replaced deadline claims nothing.
    pub fn complete(&self, user_id: &str, seq: u64) -> Option<ConnId> {
        self.pending
            .remove_if(user_id, |_, entry| entry.seq == seq)
            .map(|(_, entry)| entry.conn)
    }

    /// Whether an identity currently has a pending deadline
    pub fn is_pending(&self, user_id: &str) -> bool {
        self.pending.contains_key(user_id)
    }
}

impl Engine {
    /// Handle a transport disconnect for a connection.
    ///
    /// Unknown connection ids are tolerated as no-ops, so duplicate
    /// disconnect events are harmless.
    pub async fn disconnect(self: Arc<Self>, conn: ConnId) {
        let Some(identity) = self.registry.lookup(conn) else {
            debug!("disconnect for unknown connection {}", conn);
            return;
        };

        match self.policy {
            DisconnectPolicy::Immediate => {
                self.release(conn).await;
            }
            DisconnectPolicy::Grace => {
                let seq = self.pending.schedule(identity.id.clone(), conn);
                info!(
                    "{} disconnected, holding pairing for {:?} (seq {})",
                    identity.username, self.grace, seq
                );

                let engine = Arc::clone(&self);
                let user_id = identity.id.clone();
                let grace = self.grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    engine.finalize_disconnect(&user_id, seq).await;
                });
            }
        }
    }

    /// Deadline body: runs the release only if this timer still owns the
    /// pending entry.
    pub(crate) async fn finalize_disconnect(&self, user_id: &str, seq: u64) {
        let Some(conn) = self.pending.complete(user_id, seq) else {
            debug!("grace deadline for {} was canceled or superseded", user_id);
            return;
        };
        info!("grace period expired for {}", user_id);
        self.release(conn).await;
    }

    /// Immediate-release behavior: deregister, free and notify the
    /// counterpart, end open calls, persist offline, broadcast departure.
    pub(crate) async fn release(&self, conn: ConnId) {
        let Some(removed) = self.registry.remove(conn) else {
            return;
        };
        let identity = removed.identity;

        if let Some(peer_conn) = removed.peer {
            self.registry.send_to(
                peer_conn,
                ServerEvent::PairDisconnected {
                    message: "Your partner disconnected.".to_string(),
                },
            );

            // Clear the freed counterpart's persisted pairing; it stays
            // registered and becomes claimable again
            if let Some(peer_identity) = self.registry.lookup(peer_conn) {
                match self.directory.find_by_id(&peer_identity.id).await {
                    Ok(Some(mut peer_record)) => {
                        peer_record.paired_with = None;
                        if let Err(e) = self.directory.save(&peer_record).await {
                            warn!("failed to persist unpairing of {}: {}", peer_identity.username, e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("directory unavailable while freeing {}: {}", peer_identity.username, e);
                    }
                }
            }
        }

        // A departed party ends its calls; notify the surviving side
        let ended = self.calls.end_all_for(&identity.id).await;
        for call in ended {
            let other = call.counterpart_of(&identity.id);
            if let Some(other_conn) = self.registry.connection_for_user(other) {
                self.registry.send_to(
                    other_conn,
                    ServerEvent::CallEnded {
                        call_id: call.call_id.clone(),
                    },
                );
            }
        }

        match self.directory.find_by_id(&identity.id).await {
            Ok(Some(mut record)) => {
                record.status = UserStatus::Offline;
                record.connection_id = None;
                record.paired_with = None;
                if let Err(e) = self.directory.save(&record).await {
                    warn!("failed to persist offline status of {}: {}", identity.username, e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("directory unavailable while releasing {}: {}", identity.username, e);
            }
        }

        info!("user {} is now offline", identity.username);
        self.registry.broadcast_except(
            conn,
            ServerEvent::UserDisconnected {
                username: identity.username,
                status: UserStatus::Offline,
            },
        );
    }
}
