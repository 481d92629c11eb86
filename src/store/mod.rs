//! Collaborator contracts: user directory and call repository
//!
//! The engine never talks to MongoDB directly; it sees these traits. Both
//! have a Mongo-backed implementation and an in-memory one (dev mode and
//! tests).

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::registry::ConnId;
use crate::protocol::{UserStatus, UserSummary};
use crate::types::Result;

pub use memory::{MemoryCallRepo, MemoryDirectory};
pub use mongo::{MongoCallRepo, MongoDirectory};

/// Lifecycle status of a call
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    #[default]
    Pending,
    Active,
    Ended,
}

/// An identity as the directory knows it
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    /// Stable user identifier (hex ObjectId for the Mongo backend)
    pub id: String,
    pub username: String,
    /// Opaque auth token, unique and stable for the identity's lifetime
    pub token: String,
    /// Live connection, if any. Invariant: `Some` iff status is online.
    pub connection_id: Option<ConnId>,
    pub status: UserStatus,
    /// Identity currently paired with, if any
    pub paired_with: Option<String>,
}

impl UserRecord {
    /// Public projection used in `user-list` and presence broadcasts
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            user_id: self.id.clone(),
            username: self.username.clone(),
            status: self.status,
        }
    }
}

/// Durable store of identities, consulted for authentication, candidate
/// lookup, and presence persistence
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Register a new identity, minting its token. Fails with
    /// `DuplicateUser` if the username is taken.
    async fn insert(&self, username: &str, requested_id: Option<&str>) -> Result<UserRecord>;

    /// Resolve an auth token to an identity
    async fn find_by_token(&self, token: &str) -> Result<Option<UserRecord>>;

    /// Look up an identity by its stable id
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>>;

    /// Any other identity that is online and not already paired
    async fn find_free_online_other(&self, exclude_id: &str) -> Result<Option<UserRecord>>;

    /// All other known identities, for the `user-list` payload
    async fn list_others(&self, exclude_id: &str) -> Result<Vec<UserRecord>>;

    /// Persist the record's presence, connection, and pairing fields
    async fn save(&self, record: &UserRecord) -> Result<()>;
}

/// A call as the repository stores it
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub status: CallState,
}

/// Durable mirror of the call state machine
#[async_trait]
pub trait CallRepository: Send + Sync {
    /// Persist a new pending call. Fails with `DuplicateCall` on a call id
    /// collision.
    async fn create(&self, call: &CallRecord) -> Result<()>;

    /// Mirror a status transition
    async fn update_status(&self, call_id: &str, status: CallState) -> Result<()>;

    /// Store opaque offer/answer snapshots; `None` fields are left untouched
    async fn snapshot(
        &self,
        call_id: &str,
        offer: Option<&Value>,
        answer: Option<&Value>,
    ) -> Result<()>;
}
