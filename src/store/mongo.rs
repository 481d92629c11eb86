//! Mongo-backed directory and call store

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson};
use serde_json::Value;
use uuid::Uuid;

use crate::db::schemas::{CallDoc, UserDoc, CALL_COLLECTION, USER_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::engine::registry::ConnId;
use crate::store::{CallRecord, CallRepository, CallState, UserDirectory, UserRecord};
use crate::types::{Result, SwitchboardError};

fn parse_oid(id: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id)
        .map_err(|_| SwitchboardError::Internal(format!("malformed user id: {}", id)))
}

fn record_from_doc(doc: UserDoc) -> UserRecord {
    UserRecord {
        id: doc._id.map(|id| id.to_hex()).unwrap_or_default(),
        username: doc.username,
        token: doc.token,
        connection_id: doc
            .connection_id
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(ConnId::from),
        status: doc.status,
        paired_with: doc.paired_with.map(|id| id.to_hex()),
    }
}

fn status_bson(status: impl serde::Serialize) -> Result<Bson> {
    bson::to_bson(&status)
        .map_err(|e| SwitchboardError::Database(format!("status encode failed: {}", e)))
}

/// User directory backed by the `users` collection
#[derive(Clone)]
pub struct MongoDirectory {
    users: MongoCollection<UserDoc>,
}

impl MongoDirectory {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            users: client.collection(USER_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl UserDirectory for MongoDirectory {
    async fn insert(&self, username: &str, requested_id: Option<&str>) -> Result<UserRecord> {
        // A caller-supplied id is honored when it parses; otherwise a
        // fresh one is minted.
        let id = requested_id
            .and_then(|id| ObjectId::parse_str(id).ok())
            .unwrap_or_else(ObjectId::new);

        let doc = UserDoc::new(Some(id), username.to_string(), Uuid::new_v4().to_string());
        let record = record_from_doc(doc.clone());

        match self.users.insert_one(doc).await {
            Ok(_) => Ok(record),
            Err(SwitchboardError::DuplicateKey(_)) => {
                Err(SwitchboardError::DuplicateUser(username.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<UserRecord>> {
        let doc = self.users.find_one(doc! { "token": token }).await?;
        Ok(doc.map(record_from_doc))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        // An id that does not parse cannot exist in this collection
        let Ok(oid) = ObjectId::parse_str(id) else {
            return Ok(None);
        };
        let doc = self.users.find_one(doc! { "_id": oid }).await?;
        Ok(doc.map(record_from_doc))
    }

    async fn find_free_online_other(&self, exclude_id: &str) -> Result<Option<UserRecord>> {
        let oid = parse_oid(exclude_id)?;
        let doc = self
            .users
            .find_one(doc! {
                "status": "online",
                "paired_with": Bson::Null,
                "_id": { "$ne": oid },
            })
            .await?;
        Ok(doc.map(record_from_doc))
    }

    async fn list_others(&self, exclude_id: &str) -> Result<Vec<UserRecord>> {
        let oid = parse_oid(exclude_id)?;
        let docs = self.users.find_many(doc! { "_id": { "$ne": oid } }).await?;
        Ok(docs.into_iter().map(record_from_doc).collect())
    }

    async fn save(&self, record: &UserRecord) -> Result<()> {
        let oid = parse_oid(&record.id)?;
        let paired_with = record
            .paired_with
            .as_deref()
            .map(parse_oid)
            .transpose()?;

        self.users
            .update_one(
                doc! { "_id": oid },
                doc! { "$set": {
                    "connection_id": record.connection_id.map(|c| c.to_string()),
                    "status": status_bson(record.status)?,
                    "paired_with": paired_with,
                }},
            )
            .await?;
        Ok(())
    }
}

/// Call store backed by the `calls` collection
#[derive(Clone)]
pub struct MongoCallRepo {
    calls: MongoCollection<CallDoc>,
}

impl MongoCallRepo {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            calls: client.collection(CALL_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl CallRepository for MongoCallRepo {
    async fn create(&self, call: &CallRecord) -> Result<()> {
        let doc = CallDoc::new(
            call.call_id.clone(),
            call.caller_id.clone(),
            call.callee_id.clone(),
        );

        match self.calls.insert_one(doc).await {
            Ok(_) => Ok(()),
            Err(SwitchboardError::DuplicateKey(_)) => {
                Err(SwitchboardError::DuplicateCall(call.call_id.clone()))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_status(&self, call_id: &str, status: CallState) -> Result<()> {
        self.calls
            .update_one(
                doc! { "call_id": call_id },
                doc! { "$set": { "status": status_bson(status)? } },
            )
            .await?;
        Ok(())
    }

    async fn snapshot(
        &self,
        call_id: &str,
        offer: Option<&Value>,
        answer: Option<&Value>,
    ) -> Result<()> {
        let mut set = bson::Document::new();
        if let Some(offer) = offer {
            let value = bson::to_bson(offer)
                .map_err(|e| SwitchboardError::Database(format!("offer encode failed: {}", e)))?;
            set.insert("offer", value);
        }
        if let Some(answer) = answer {
            let value = bson::to_bson(answer)
                .map_err(|e| SwitchboardError::Database(format!("answer encode failed: {}", e)))?;
            set.insert("answer", value);
        }
        if set.is_empty() {
            return Ok(());
        }

        self.calls
            .update_one(doc! { "call_id": call_id }, doc! { "$set": set })
            .await?;
        Ok(())
    }
}
