//! In-memory directory and call store
//!
//! Used in development mode when MongoDB is unreachable, and by tests.
//! Candidate lookup order is insertion order, matching the registry's
//! matchmaking tie-break.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::UserStatus;
use crate::store::{CallRecord, CallRepository, CallState, UserDirectory, UserRecord};
use crate::types::{Result, SwitchboardError};

/// In-memory user directory
#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<Vec<UserRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn insert(&self, username: &str, requested_id: Option<&str>) -> Result<UserRecord> {
        let mut users = self.users.lock().expect("directory lock");

        if users.iter().any(|u| u.username == username) {
            return Err(SwitchboardError::DuplicateUser(username.to_string()));
        }

        let record = UserRecord {
            id: requested_id
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            username: username.to_string(),
            token: Uuid::new_v4().to_string(),
            connection_id: None,
            status: UserStatus::Offline,
            paired_with: None,
        };

        if users.iter().any(|u| u.id == record.id) {
            return Err(SwitchboardError::DuplicateUser(record.id.clone()));
        }

        users.push(record.clone());
        Ok(record)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<UserRecord>> {
        let users = self.users.lock().expect("directory lock");
        Ok(users.iter().find(|u| u.token == token).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        let users = self.users.lock().expect("directory lock");
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_free_online_other(&self, exclude_id: &str) -> Result<Option<UserRecord>> {
        let users = self.users.lock().expect("directory lock");
        Ok(users
            .iter()
            .find(|u| {
                u.id != exclude_id && u.status == UserStatus::Online && u.paired_with.is_none()
            })
            .cloned())
    }

    async fn list_others(&self, exclude_id: &str) -> Result<Vec<UserRecord>> {
        let users = self.users.lock().expect("directory lock");
        Ok(users.iter().filter(|u| u.id != exclude_id).cloned().collect())
    }

    async fn save(&self, record: &UserRecord) -> Result<()> {
        let mut users = self.users.lock().expect("directory lock");
        match users.iter_mut().find(|u| u.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => users.push(record.clone()),
        }
        Ok(())
    }
}

struct StoredCall {
    record: CallRecord,
    offer: Option<Value>,
    answer: Option<Value>,
}

/// In-memory call store
#[derive(Default)]
pub struct MemoryCallRepo {
    calls: Mutex<HashMap<String, StoredCall>>,
}

impl MemoryCallRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored state of a call, for assertions
    pub fn get(&self, call_id: &str) -> Option<(CallRecord, Option<Value>, Option<Value>)> {
        let calls = self.calls.lock().expect("call store lock");
        calls
            .get(call_id)
            .map(|c| (c.record.clone(), c.offer.clone(), c.answer.clone()))
    }
}

#[async_trait]
impl CallRepository for MemoryCallRepo {
    async fn create(&self, call: &CallRecord) -> Result<()> {
        let mut calls = self.calls.lock().expect("call store lock");
        if calls.contains_key(&call.call_id) {
            return Err(SwitchboardError::DuplicateCall(call.call_id.clone()));
        }
        calls.insert(
            call.call_id.clone(),
            StoredCall {
                record: call.clone(),
                offer: None,
                answer: None,
            },
        );
        Ok(())
    }

    async fn update_status(&self, call_id: &str, status: CallState) -> Result<()> {
        let mut calls = self.calls.lock().expect("call store lock");
        match calls.get_mut(call_id) {
            Some(call) => call.record.status = status,
            None => debug!("status update for unknown call {}", call_id),
        }
        Ok(())
    }

    async fn snapshot(
        &self,
        call_id: &str,
        offer: Option<&Value>,
        answer: Option<&Value>,
    ) -> Result<()> {
        let mut calls = self.calls.lock().expect("call store lock");
        if let Some(call) = calls.get_mut(call_id) {
            if let Some(offer) = offer {
                call.offer = Some(offer.clone());
            }
            if let Some(answer) = answer {
                call.answer = Some(answer.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_rejects_duplicate_username() {
        let dir = MemoryDirectory::new();
        dir.insert("alice", None).await.unwrap();

        let err = dir.insert("alice", None).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::DuplicateUser(_)));
    }

    #[tokio::test]
    async fn test_tokens_are_unique_and_resolvable() {
        let dir = MemoryDirectory::new();
        let alice = dir.insert("alice", None).await.unwrap();
        let bob = dir.insert("bob", None).await.unwrap();
        assert_ne!(alice.token, bob.token);

        let found = dir.find_by_token(&bob.token).await.unwrap().unwrap();
        assert_eq!(found.username, "bob");

        assert!(dir.find_by_token("bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_free_online_other_uses_insertion_order() {
        let dir = MemoryDirectory::new();
        let mut alice = dir.insert("alice", None).await.unwrap();
        let mut bob = dir.insert("bob", None).await.unwrap();
        let carol = dir.insert("carol", None).await.unwrap();

        // Nobody online yet
        assert!(dir
            .find_free_online_other(&carol.id)
            .await
            .unwrap()
            .is_none());

        bob.status = UserStatus::Online;
        dir.save(&bob).await.unwrap();
        alice.status = UserStatus::Online;
        dir.save(&alice).await.unwrap();

        // Alice was inserted first, so she is found first
        let found = dir.find_free_online_other(&carol.id).await.unwrap().unwrap();
        assert_eq!(found.username, "alice");

        // A paired candidate is skipped
        alice.paired_with = Some(carol.id.clone());
        dir.save(&alice).await.unwrap();
        let found = dir.find_free_online_other(&carol.id).await.unwrap().unwrap();
        assert_eq!(found.username, "bob");

        // The excluded identity is never returned
        assert!(dir.find_free_online_other(&bob.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_call_repo_rejects_duplicate_call_id() {
        let repo = MemoryCallRepo::new();
        let call = CallRecord {
            call_id: "c1".into(),
            caller_id: "u1".into(),
            callee_id: "u2".into(),
            status: CallState::Pending,
        };
        repo.create(&call).await.unwrap();

        let err = repo.create(&call).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::DuplicateCall(_)));
    }

    #[tokio::test]
    async fn test_call_repo_snapshot_fills_slots_independently() {
        let repo = MemoryCallRepo::new();
        repo.create(&CallRecord {
            call_id: "c1".into(),
            caller_id: "u1".into(),
            callee_id: "u2".into(),
            status: CallState::Pending,
        })
        .await
        .unwrap();

        let offer = serde_json::json!({"type": "offer", "sdp": "v=0"});
        repo.snapshot("c1", Some(&offer), None).await.unwrap();

        let (record, stored_offer, stored_answer) = repo.get("c1").unwrap();
        assert_eq!(record.status, CallState::Pending);
        assert_eq!(stored_offer, Some(offer));
        assert_eq!(stored_answer, None);
    }
}
