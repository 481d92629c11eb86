//! Call Session Tracker
//!
//! Per-call state machine: pending -> active -> ended. A call becomes
//! active on the first successfully relayed signal between its two parties;
//! it ends on `end-call` or when either party disconnects for good. The
//! tracker owns the in-memory state and mirrors transitions to the call
//! repository; the mirror is best-effort after creation, the in-memory
//! state stays authoritative.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::registry::ConnId;
use crate::engine::Engine;
use crate::protocol::ServerEvent;
use crate::store::{CallRecord, CallRepository, CallState};
use crate::types::{Result, SwitchboardError};

/// One tracked call
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub status: CallState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// First relayed payload from the caller side, verbatim
    pub offer: Option<Value>,
    /// First relayed payload from the callee side, verbatim
    pub answer: Option<Value>,
}

impl CallSession {
    fn involves(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    /// The party opposite `user_id`
    pub fn counterpart_of(&self, user_id: &str) -> &str {
        if self.caller_id == user_id {
            &self.callee_id
        } else {
            &self.caller_id
        }
    }
}

/// Records call lifecycles keyed by call id
pub struct CallTracker {
    calls: Mutex<HashMap<String, CallSession>>,
    repo: Arc<dyn CallRepository>,
}

impl CallTracker {
    pub fn new(repo: Arc<dyn CallRepository>) -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            repo,
        }
    }

    /// Track a new pending call.
    ///
    /// The in-memory reservation is taken first (so concurrent starts with
    /// the same id serialize), then the repository create is awaited with
    /// no lock held. A repository failure rolls the reservation back and
    /// surfaces `RepositoryUnavailable`; a repository duplicate (e.g. a
    /// call id persisted by an earlier run) surfaces as `DuplicateCall`.
    pub async fn start(&self, call_id: &str, caller_id: &str, callee_id: &str) -> Result<()> {
        {
            let mut calls = self.calls.lock().expect("call tracker lock");
            if calls.contains_key(call_id) {
                return Err(SwitchboardError::DuplicateCall(call_id.to_string()));
            }
            let now = Utc::now();
            calls.insert(
                call_id.to_string(),
                CallSession {
                    call_id: call_id.to_string(),
                    caller_id: caller_id.to_string(),
                    callee_id: callee_id.to_string(),
                    status: CallState::Pending,
                    created_at: now,
                    updated_at: now,
                    offer: None,
                    answer: None,
                },
            );
        }

        let record = CallRecord {
            call_id: call_id.to_string(),
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            status: CallState::Pending,
        };

        match self.repo.create(&record).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.calls
                    .lock()
                    .expect("call tracker lock")
                    .remove(call_id);
                match err {
                    SwitchboardError::DuplicateCall(id) => {
                        Err(SwitchboardError::DuplicateCall(id))
                    }
                    other => Err(SwitchboardError::RepositoryUnavailable(other.to_string())),
                }
            }
        }
    }

    /// Transition a call to ended. Returns the session if this call made
    /// the transition; an unknown or already-ended id is a logged no-op, so
    /// duplicate end signals never fan out twice.
    pub async fn end(&self, call_id: &str) -> Option<CallSession> {
        let ended = {
            let mut calls = self.calls.lock().expect("call tracker lock");
            match calls.get_mut(call_id) {
                Some(call) if call.status != CallState::Ended => {
                    call.status = CallState::Ended;
                    call.updated_at = Utc::now();
                    Some(call.clone())
                }
                Some(_) => {
                    debug!("duplicate end for call {}", call_id);
                    None
                }
                None => {
                    debug!("end for unknown call {}", call_id);
                    None
                }
            }
        };

        if ended.is_some() {
            if let Err(e) = self.repo.update_status(call_id, CallState::Ended).await {
                warn!("failed to mirror ended status for {}: {}", call_id, e);
            }
        }
        ended
    }

    /// End every pending/active call involving an identity. Used when a
    /// party disconnects without reconnecting.
    pub async fn end_all_for(&self, user_id: &str) -> Vec<CallSession> {
        let ended: Vec<CallSession> = {
            let mut calls = self.calls.lock().expect("call tracker lock");
            calls
                .values_mut()
                .filter(|c| c.status != CallState::Ended && c.involves(user_id))
                .map(|c| {
                    c.status = CallState::Ended;
                    c.updated_at = Utc::now();
                    c.clone()
                })
                .collect()
        };

        for call in &ended {
            if let Err(e) = self.repo.update_status(&call.call_id, CallState::Ended).await {
                warn!("failed to mirror ended status for {}: {}", call.call_id, e);
            }
        }
        ended
    }

    /// Note a successfully relayed signal between two identities.
    ///
    /// Any pending call between them becomes active, and the payload is
    /// snapshotted into the sender's empty offer/answer slot. The payload
    /// is stored verbatim; the tracker never looks inside it.
    pub async fn mark_signaled(&self, sender_id: &str, receiver_id: &str, signal: Option<&Value>) {
        struct Mirror {
            call_id: String,
            activated: bool,
            offer: Option<Value>,
            answer: Option<Value>,
        }

        let mirrors: Vec<Mirror> = {
            let mut calls = self.calls.lock().expect("call tracker lock");
            calls
                .values_mut()
                .filter(|c| {
                    c.status != CallState::Ended
                        && ((c.caller_id == sender_id && c.callee_id == receiver_id)
                            || (c.caller_id == receiver_id && c.callee_id == sender_id))
                })
                .map(|c| {
                    let activated = c.status == CallState::Pending;
                    if activated {
                        c.status = CallState::Active;
                    }
                    c.updated_at = Utc::now();

                    let mut mirror = Mirror {
                        call_id: c.call_id.clone(),
                        activated,
                        offer: None,
                        answer: None,
                    };
                    if let Some(signal) = signal {
                        if c.caller_id == sender_id && c.offer.is_none() {
                            c.offer = Some(signal.clone());
                            mirror.offer = c.offer.clone();
                        } else if c.callee_id == sender_id && c.answer.is_none() {
                            c.answer = Some(signal.clone());
                            mirror.answer = c.answer.clone();
                        }
                    }
                    mirror
                })
                .collect()
        };

        for mirror in mirrors {
            if mirror.activated {
                info!("call {} is now active", mirror.call_id);
                if let Err(e) = self
                    .repo
                    .update_status(&mirror.call_id, CallState::Active)
                    .await
                {
                    warn!("failed to mirror active status for {}: {}", mirror.call_id, e);
                }
            }
            if mirror.offer.is_some() || mirror.answer.is_some() {
                if let Err(e) = self
                    .repo
                    .snapshot(
                        &mirror.call_id,
                        mirror.offer.as_ref(),
                        mirror.answer.as_ref(),
                    )
                    .await
                {
                    warn!("failed to mirror snapshot for {}: {}", mirror.call_id, e);
                }
            }
        }
    }

    /// Current session state, for inspection
    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        let calls = self.calls.lock().expect("call tracker lock");
        calls.get(call_id).cloned()
    }
}

impl Engine {
    /// Handle `start-call`: place a call to `target_user_id`
    pub(crate) async fn handle_start_call(
        &self,
        conn: ConnId,
        call_id: String,
        target_user_id: String,
        caller_name: String,
    ) -> Result<()> {
        let caller = self
            .registry
            .lookup(conn)
            .ok_or_else(|| SwitchboardError::Internal("connection not registered".into()))?;

        let target = self
            .directory
            .find_by_id(&target_user_id)
            .await
            .map_err(|e| SwitchboardError::RepositoryUnavailable(e.to_string()))?
            .ok_or(SwitchboardError::CalleeUnreachable)?;

        let callee_conn = self
            .registry
            .connection_for_user(&target.id)
            .ok_or(SwitchboardError::CalleeUnreachable)?;

        self.calls.start(&call_id, &caller.id, &target.id).await?;

        info!(
            "call {} initiated: {} -> {}",
            call_id, caller.username, target.username
        );

        self.registry.send_to(
            callee_conn,
            ServerEvent::IncomingCall {
                call_id: call_id.clone(),
                caller_name,
                caller_id: caller.id,
            },
        );
        self.registry.send_to(
            conn,
            ServerEvent::CallInitiated {
                call_id,
                target_id: target.id,
            },
        );
        Ok(())
    }

    /// Handle `end-call`: terminate a call and notify the counterpart only
    pub(crate) async fn handle_end_call(
        &self,
        conn: ConnId,
        call_id: String,
        target_user_id: Option<String>,
    ) -> Result<()> {
        let counterpart = self
            .resolve_counterpart(conn, target_user_id.as_deref())
            .ok_or(SwitchboardError::NoPeer)?;

        if let Some(call) = self.calls.end(&call_id).await {
            info!(
                "call {} ended between {} and {}",
                call.call_id, call.caller_id, call.callee_id
            );
            // The initiator of the end gets no echo
            self.registry
                .send_to(counterpart, ServerEvent::CallEnded { call_id });
        }
        Ok(())
    }
}
