//! Matchmaker
//!
//! Admits authenticated connections: reconnects resume their previous
//! place (pairing intact), fresh connections atomically claim the first
//! free counterpart or stay waiting, and everyone else learns about the
//! arrival. All pairing decisions happen inside the registry's critical
//! section; directory writes are awaited outside it.

use tracing::{info, warn};

use crate::engine::registry::{AttachOutcome, ConnId, EventSender, Identity};
use crate::engine::Engine;
use crate::protocol::{ServerEvent, UserStatus};
use crate::store::UserRecord;
use crate::types::Result;

impl Engine {
    /// Admit an authenticated connection into the engine.
    ///
    /// `record` is the directory record that authenticated this connection;
    /// the Identity value derived from it is attached to the connection for
    /// its lifetime.
    pub async fn connect(
        &self,
        conn: ConnId,
        record: UserRecord,
        sender: EventSender,
    ) -> Result<()> {
        let identity = Identity {
            id: record.id.clone(),
            username: record.username.clone(),
        };
        let mut record = record;

        // A reconnect inside the grace window cancels the pending deadline.
        // Whether or not one was pending, attach() atomically takes over
        // any connection still bound to this identity.
        let had_pending = self.pending.cancel(&identity.id).is_some();
        let outcome = self.registry.attach(conn, identity.clone(), sender)?;

        if let AttachOutcome::Resumed { peer } = outcome {
            if had_pending {
                info!("{} reconnected within the grace window", identity.username);
            } else {
                info!("{} replaced its previous connection", identity.username);
            }

            record.status = UserStatus::Online;
            record.connection_id = Some(conn);
            if let Err(e) = self.directory.save(&record).await {
                warn!("failed to persist reconnection of {}: {}", identity.username, e);
                self.notify_server_error(conn);
            }

            // Bring the resumed client back up to date. Peers observe
            // nothing: no presence events, the pairing simply survives.
            if let Some((_, peer_identity)) = peer {
                self.registry.send_to(
                    conn,
                    ServerEvent::PairFound {
                        paired_with: peer_identity.username,
                        paired_with_id: peer_identity.id,
                    },
                );
            }
            self.send_user_list(conn, &identity).await;
            return Ok(());
        }

        info!("user {} connected ({})", identity.username, conn);

        record.status = UserStatus::Online;
        record.connection_id = Some(conn);
        record.paired_with = None;
        if let Err(e) = self.directory.save(&record).await {
            warn!("failed to persist online status of {}: {}", identity.username, e);
            self.notify_server_error(conn);
        }

        // Claim the first free counterpart, in insertion order, or wait
        match self.registry.claim_or_wait(conn) {
            Some((peer_conn, peer_identity)) => {
                info!(
                    "pair created: {} <-> {}",
                    peer_identity.username, identity.username
                );
                self.persist_pairing(&identity.id, &peer_identity.id).await;

                self.registry.send_to(
                    conn,
                    ServerEvent::PairFound {
                        paired_with: peer_identity.username.clone(),
                        paired_with_id: peer_identity.id.clone(),
                    },
                );
                self.registry.send_to(
                    peer_conn,
                    ServerEvent::PairFound {
                        paired_with: identity.username.clone(),
                        paired_with_id: identity.id.clone(),
                    },
                );
            }
            None => {
                info!("user {} is waiting for a pair", identity.username);
            }
        }

        self.send_user_list(conn, &identity).await;

        self.registry.broadcast_except(
            conn,
            ServerEvent::UserConnected {
                username: identity.username.clone(),
                status: UserStatus::Online,
            },
        );

        Ok(())
    }

    /// Send the directory of all other known identities to one connection
    async fn send_user_list(&self, conn: ConnId, identity: &Identity) {
        match self.directory.list_others(&identity.id).await {
            Ok(others) => {
                let list = others.iter().map(UserRecord::summary).collect();
                self.registry.send_to(conn, ServerEvent::UserList(list));
            }
            Err(e) => {
                warn!("directory unavailable for user-list of {}: {}", identity.username, e);
                self.notify_server_error(conn);
            }
        }
    }

    /// Persist a fresh pairing on both directory records, best-effort
    async fn persist_pairing(&self, a: &str, b: &str) {
        for (id, other) in [(a, b), (b, a)] {
            match self.directory.find_by_id(id).await {
                Ok(Some(mut record)) => {
                    record.paired_with = Some(other.to_string());
                    if let Err(e) = self.directory.save(&record).await {
                        warn!("failed to persist pairing of {}: {}", id, e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("directory unavailable while pairing {}: {}", id, e),
            }
        }
    }
}
