//! Signal Relay
//!
//! Forwards negotiation payloads between paired connections. The payload is
//! opaque: it is re-enveloped with the sender's identity and forwarded
//! bit-for-bit, absent fields as explicit nulls. Per-sender ordering rides
//! on the counterpart's event queue; there is no cross-connection ordering
//! guarantee.

use serde_json::Value;
use tracing::debug;

use crate::engine::registry::ConnId;
use crate::engine::Engine;
use crate::protocol::ServerEvent;
use crate::types::{Result, SwitchboardError};

impl Engine {
    /// Resolve the connection that should receive traffic from `conn`:
    /// the addressed user's connection when `target_user_id` is given
    /// (identifier-addressed variant), otherwise the paired counterpart.
    pub(crate) fn resolve_counterpart(
        &self,
        conn: ConnId,
        target_user_id: Option<&str>,
    ) -> Option<ConnId> {
        match target_user_id {
            Some(user_id) => self.registry.connection_for_user(user_id),
            None => self.registry.peer_of(conn),
        }
    }

    /// Handle `signal`: relay an offer/answer/ICE payload to the counterpart
    pub(crate) async fn handle_signal(
        &self,
        conn: ConnId,
        signal: Option<Value>,
        candidate: Option<Value>,
        target_user_id: Option<String>,
    ) -> Result<()> {
        let sender = self
            .registry
            .lookup(conn)
            .ok_or_else(|| SwitchboardError::Internal("connection not registered".into()))?;

        let counterpart = self
            .resolve_counterpart(conn, target_user_id.as_deref())
            .ok_or(SwitchboardError::NoPeer)?;
        let receiver = self
            .registry
            .lookup(counterpart)
            .ok_or(SwitchboardError::NoPeer)?;

        debug!("relaying signal from {} to {}", sender.username, receiver.username);

        self.registry.send_to(
            counterpart,
            ServerEvent::Signal {
                sender_id: sender.id.clone(),
                signal: signal.clone(),
                candidate,
            },
        );

        // First successful relay between the parties activates their call
        self.calls
            .mark_signaled(&sender.id, &receiver.id, signal.as_ref())
            .await;

        Ok(())
    }
}
