//! Pairing & Signaling Relay Engine
//!
//! The engine owns the in-memory matchmaking state and the call state
//! machine, and sees the outside world only through injected collaborators:
//! a [`UserDirectory`], a [`crate::store::CallRepository`], and one event
//! sender per connection. Every event handler catches its own errors and
//! converts them into a `call-error` notification to the originating
//! connection; nothing in here crashes a connection worker or leaks into
//! another connection's state.

pub mod calls;
pub mod matchmaker;
pub mod registry;
pub mod relay;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::DisconnectPolicy;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::store::{CallRepository, UserDirectory};

use calls::CallTracker;
use registry::{ConnId, Registry};
use supervisor::PendingDisconnects;

/// The relay engine. One instance per process, shared by every connection
/// worker.
pub struct Engine {
    pub(crate) registry: Registry,
    pub(crate) directory: Arc<dyn UserDirectory>,
    pub(crate) calls: CallTracker,
    pub(crate) pending: PendingDisconnects,
    pub(crate) policy: DisconnectPolicy,
    pub(crate) grace: Duration,
}

impl Engine {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        call_repo: Arc<dyn CallRepository>,
        policy: DisconnectPolicy,
        grace: Duration,
    ) -> Self {
        Self {
            registry: Registry::new(),
            directory,
            calls: CallTracker::new(call_repo),
            pending: PendingDisconnects::new(),
            policy,
            grace,
        }
    }

    /// The connection registry (presence and pairing state)
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The call session tracker
    pub fn calls(&self) -> &CallTracker {
        &self.calls
    }

    /// Dispatch one event from a connection.
    ///
    /// Errors stop at this boundary: the originating connection gets a
    /// `call-error`, nobody else is affected.
    pub async fn handle_event(&self, conn: ConnId, event: ClientEvent) {
        let result = match event {
            ClientEvent::StartCall {
                call_id,
                target_user_id,
                caller_name,
            } => {
                self.handle_start_call(conn, call_id, target_user_id, caller_name)
                    .await
            }
            ClientEvent::EndCall {
                call_id,
                target_user_id,
            } => self.handle_end_call(conn, call_id, target_user_id).await,
            ClientEvent::Signal {
                signal,
                candidate,
                target_user_id,
            } => {
                self.handle_signal(conn, signal, candidate, target_user_id)
                    .await
            }
        };

        if let Err(err) = result {
            warn!("event from {} failed: {}", conn, err);
            self.registry.send_to(
                conn,
                ServerEvent::CallError {
                    message: err.client_message(),
                },
            );
        }
    }

    /// Report a malformed frame back to its sender only
    pub fn notify_invalid_payload(&self, conn: ConnId, detail: &str) {
        self.registry.send_to(
            conn,
            ServerEvent::CallError {
                message: format!("invalid payload: {}", detail),
            },
        );
    }

    /// Report a generic server error to one connection
    pub(crate) fn notify_server_error(&self, conn: ConnId) {
        self.registry.send_to(
            conn,
            ServerEvent::CallError {
                message: "Internal server error".to_string(),
            },
        );
    }
}
