//! Call document schema
//!
//! Mirrors the in-memory call state machine. Offer/answer snapshots are
//! stored opaque so a client can perform a cold reconnect; the relay never
//! parses them.

use bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::store::CallState;

/// Collection name for calls
pub const CALL_COLLECTION: &str = "calls";

/// Call document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CallDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Client-supplied unique call identifier
    pub call_id: String,

    /// Identity that initiated the call
    pub caller_id: String,

    /// Identity being called
    pub callee_id: String,

    /// Lifecycle status
    #[serde(default)]
    pub status: CallState,

    /// First negotiation payload relayed from the caller side, verbatim
    #[serde(default)]
    pub offer: Option<Bson>,

    /// First negotiation payload relayed from the callee side, verbatim
    #[serde(default)]
    pub answer: Option<Bson>,
}

impl CallDoc {
    /// Create a new pending call document
    pub fn new(call_id: String, caller_id: String, callee_id: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            call_id,
            caller_id,
            callee_id,
            status: CallState::Pending,
            offer: None,
            answer: None,
        }
    }
}

impl IntoIndexes for CallDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on the client-supplied call id
            (
                doc! { "call_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("call_id_unique".to_string())
                        .build(),
                ),
            ),
            // Index for per-party lookups
            (
                doc! { "caller_id": 1, "callee_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("call_parties_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for CallDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
