//! User document schema
//!
//! Stores identities: username, opaque auth token, last-known presence and
//! pairing. An identity is online iff a live connection id is attached.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::protocol::UserStatus;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Unique username chosen at registration
    pub username: String,

    /// Opaque auth token (UUID v4), unique and stable for the identity
    pub token: String,

    /// Live connection id, if currently connected
    #[serde(default)]
    pub connection_id: Option<String>,

    /// Presence status
    #[serde(default = "default_status")]
    pub status: UserStatus,

    /// The identity this one is currently paired with
    #[serde(default)]
    pub paired_with: Option<ObjectId>,
}

fn default_status() -> UserStatus {
    UserStatus::Offline
}

impl Default for UserDoc {
    fn default() -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            username: String::new(),
            token: String::new(),
            connection_id: None,
            status: UserStatus::Offline,
            paired_with: None,
        }
    }
}

impl UserDoc {
    /// Create a new user document
    pub fn new(id: Option<ObjectId>, username: String, token: String) -> Self {
        Self {
            _id: id,
            metadata: Metadata::new(),
            username,
            token,
            connection_id: None,
            status: UserStatus::Offline,
            paired_with: None,
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on username
            (
                doc! { "username": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("username_unique".to_string())
                        .build(),
                ),
            ),
            // Unique index on token (auth lookups)
            (
                doc! { "token": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("token_unique".to_string())
                        .build(),
                ),
            ),
            // Index for free-candidate queries
            (
                doc! { "status": 1, "paired_with": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_paired_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
