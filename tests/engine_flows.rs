//! Engine integration tests: pairing, calls, and signal relay
//!
//! Drives the relay engine end-to-end with in-memory collaborators and
//! channel-backed connections:
//! - matchmaking (waiting, claiming, concurrent joins)
//! - pairing invariants (symmetry, at most one partner)
//! - call lifecycle (start, end, duplicates, unreachable targets)
//! - signal relay (verbatim forwarding, activation, no-peer errors)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use switchboard::config::DisconnectPolicy;
use switchboard::engine::registry::ConnId;
use switchboard::engine::Engine;
use switchboard::protocol::{ClientEvent, ServerEvent, UserStatus};
use switchboard::store::{CallState, MemoryCallRepo, MemoryDirectory, UserDirectory, UserRecord};

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    engine: Arc<Engine>,
    directory: Arc<MemoryDirectory>,
    call_repo: Arc<MemoryCallRepo>,
}

struct Client {
    conn: ConnId,
    record: UserRecord,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Harness {
    fn new(policy: DisconnectPolicy) -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        let call_repo = Arc::new(MemoryCallRepo::new());
        let engine = Arc::new(Engine::new(
            directory.clone(),
            call_repo.clone(),
            policy,
            Duration::from_secs(10),
        ));
        Self {
            engine,
            directory,
            call_repo,
        }
    }

    async fn register(&self, username: &str) -> UserRecord {
        self.directory.insert(username, None).await.unwrap()
    }

    async fn connect(&self, record: &UserRecord) -> Client {
        let conn = ConnId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.engine.connect(conn, record.clone(), tx).await.unwrap();
        Client {
            conn,
            record: record.clone(),
            rx,
        }
    }

    async fn register_and_connect(&self, username: &str) -> Client {
        let record = self.register(username).await;
        self.connect(&record).await
    }
}

impl Client {
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn expect_event(&mut self) -> ServerEvent {
        self.rx.try_recv().expect("expected a queued event")
    }

    async fn send(&self, harness: &Harness, event: ClientEvent) {
        harness.engine.handle_event(self.conn, event).await;
    }
}

fn signal_event(signal: Option<serde_json::Value>, candidate: Option<serde_json::Value>) -> ClientEvent {
    ClientEvent::Signal {
        signal,
        candidate,
        target_user_id: None,
    }
}

fn start_call(call_id: &str, target: &str, caller_name: &str) -> ClientEvent {
    ClientEvent::StartCall {
        call_id: call_id.to_string(),
        target_user_id: target.to_string(),
        caller_name: caller_name.to_string(),
    }
}

fn end_call(call_id: &str) -> ClientEvent {
    ClientEvent::EndCall {
        call_id: call_id.to_string(),
        target_user_id: None,
    }
}

// =============================================================================
// Matchmaking
// =============================================================================

#[tokio::test]
async fn test_first_joiner_waits_second_joiner_pairs() {
    let harness = Harness::new(DisconnectPolicy::Immediate);

    let mut alice = harness.register_and_connect("alice").await;

    // Alice is waiting: she only receives the (empty) user list
    let events = alice.drain();
    assert_eq!(events, vec![ServerEvent::UserList(vec![])]);
    assert!(harness.engine.registry().peer_of(alice.conn).is_none());

    let mut bob = harness.register_and_connect("bob").await;

    // Bob's connection triggers the pairing; both sides learn about it
    assert_eq!(
        bob.expect_event(),
        ServerEvent::PairFound {
            paired_with: "alice".to_string(),
            paired_with_id: alice.record.id.clone(),
        }
    );
    match bob.expect_event() {
        ServerEvent::UserList(list) => {
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].username, "alice");
            assert_eq!(list[0].status, UserStatus::Online);
        }
        other => panic!("expected user-list, got {:?}", other),
    }

    let alice_events = alice.drain();
    assert_eq!(
        alice_events,
        vec![
            ServerEvent::PairFound {
                paired_with: "bob".to_string(),
                paired_with_id: bob.record.id.clone(),
            },
            ServerEvent::UserConnected {
                username: "bob".to_string(),
                status: UserStatus::Online,
            },
        ]
    );

    // The pairing is symmetric
    assert_eq!(
        harness.engine.registry().peer_of(alice.conn),
        Some(bob.conn)
    );
    assert_eq!(
        harness.engine.registry().peer_of(bob.conn),
        Some(alice.conn)
    );
}

#[tokio::test]
async fn test_concurrent_joiners_never_claim_the_same_candidate() {
    let harness = Harness::new(DisconnectPolicy::Immediate);

    let alice = harness.register_and_connect("alice").await;

    let bob_record = harness.register("bob").await;
    let carol_record = harness.register("carol").await;

    // Bob and carol join concurrently while exactly one free identity exists
    let (bob, carol) = tokio::join!(
        harness.connect(&bob_record),
        harness.connect(&carol_record)
    );

    let registry = harness.engine.registry();
    let alice_peer = registry.peer_of(alice.conn).expect("alice must be paired");

    // Exactly one of the two claimed alice; the other is waiting
    let (winner, loser) = if alice_peer == bob.conn {
        (&bob, &carol)
    } else {
        assert_eq!(alice_peer, carol.conn);
        (&carol, &bob)
    };
    assert_eq!(registry.peer_of(winner.conn), Some(alice.conn));
    assert_eq!(registry.peer_of(loser.conn), None);
}

#[tokio::test]
async fn test_pairing_relation_stays_symmetric_under_concurrent_joins() {
    let harness = Harness::new(DisconnectPolicy::Immediate);

    let mut records = Vec::new();
    for i in 0..10 {
        records.push(harness.register(&format!("user{}", i)).await);
    }

    let mut handles = Vec::new();
    for record in &records {
        handles.push(harness.connect(record));
    }
    let clients = futures_util::future::join_all(handles).await;

    let registry = harness.engine.registry();
    let mut paired = 0;
    for client in &clients {
        if let Some(peer) = registry.peer_of(client.conn) {
            paired += 1;
            // pairs[a] == b implies pairs[b] == a, and never a self-pair
            assert_ne!(peer, client.conn);
            assert_eq!(registry.peer_of(peer), Some(client.conn));
        }
    }
    // An even number of connections with distinct identities pairs fully
    assert_eq!(paired, 10);
}

// =============================================================================
// Calls
// =============================================================================

#[tokio::test]
async fn test_start_call_notifies_both_parties() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    let mut bob = harness.register_and_connect("bob").await;
    alice.drain();
    bob.drain();

    alice
        .send(&harness, start_call("c1", &bob.record.id, "alice"))
        .await;

    assert_eq!(
        bob.drain(),
        vec![ServerEvent::IncomingCall {
            call_id: "c1".to_string(),
            caller_name: "alice".to_string(),
            caller_id: alice.record.id.clone(),
        }]
    );
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::CallInitiated {
            call_id: "c1".to_string(),
            target_id: bob.record.id.clone(),
        }]
    );

    // The call is tracked as pending and mirrored to the repository
    let session = harness.engine.calls().get("c1").unwrap();
    assert_eq!(session.status, CallState::Pending);
    let (record, _, _) = harness.call_repo.get("c1").unwrap();
    assert_eq!(record.caller_id, alice.record.id);
    assert_eq!(record.callee_id, bob.record.id);
}

#[tokio::test]
async fn test_start_call_to_offline_target_degrades_to_call_error() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    let carol = harness.register("carol").await; // never connects
    alice.drain();

    alice
        .send(&harness, start_call("c1", &carol.id, "alice"))
        .await;

    let events = alice.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ServerEvent::CallError { .. }));

    // Nothing was tracked
    assert!(harness.engine.calls().get("c1").is_none());
    assert!(harness.call_repo.get("c1").is_none());
}

#[tokio::test]
async fn test_start_call_to_unknown_target_degrades_to_call_error() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    alice.drain();

    alice
        .send(&harness, start_call("c1", "no-such-user", "alice"))
        .await;

    let events = alice.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ServerEvent::CallError { .. }));
}

#[tokio::test]
async fn test_duplicate_call_id_is_rejected() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    let mut bob = harness.register_and_connect("bob").await;
    alice.drain();
    bob.drain();

    alice
        .send(&harness, start_call("c1", &bob.record.id, "alice"))
        .await;
    alice.drain();
    bob.drain();

    alice
        .send(&harness, start_call("c1", &bob.record.id, "alice"))
        .await;

    let events = alice.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ServerEvent::CallError { .. }));
    // The callee hears nothing the second time
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn test_end_call_notifies_counterpart_only_once() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    let mut bob = harness.register_and_connect("bob").await;
    alice.drain();
    bob.drain();

    alice
        .send(&harness, start_call("c1", &bob.record.id, "alice"))
        .await;
    alice.drain();
    bob.drain();

    alice.send(&harness, end_call("c1")).await;

    // The counterpart is notified; the initiator gets no echo
    assert_eq!(
        bob.drain(),
        vec![ServerEvent::CallEnded {
            call_id: "c1".to_string()
        }]
    );
    assert!(alice.drain().is_empty());
    assert_eq!(
        harness.engine.calls().get("c1").unwrap().status,
        CallState::Ended
    );

    // A duplicate end is a no-op with no second notification
    alice.send(&harness, end_call("c1")).await;
    assert!(bob.drain().is_empty());
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn test_end_call_while_unpaired_yields_call_error_only() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    alice.drain();

    alice.send(&harness, end_call("c1")).await;

    let events = alice.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ServerEvent::CallError { .. }));
}

// =============================================================================
// Signal relay
// =============================================================================

#[tokio::test]
async fn test_signal_is_relayed_verbatim_with_null_fields() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    let mut bob = harness.register_and_connect("bob").await;
    alice.drain();
    bob.drain();

    let candidate = serde_json::json!({
        "candidate": "candidate:1 1 UDP 2122252543 192.0.2.1 54400 typ host",
        "sdpMid": "0",
        "sdpMLineIndex": 0
    });
    alice
        .send(&harness, signal_event(None, Some(candidate.clone())))
        .await;

    assert_eq!(
        bob.drain(),
        vec![ServerEvent::Signal {
            sender_id: alice.record.id.clone(),
            signal: None,
            candidate: Some(candidate),
        }]
    );
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn test_signal_without_peer_degrades_to_call_error() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    alice.drain();

    alice
        .send(&harness, signal_event(Some(serde_json::json!({"sdp": "v=0"})), None))
        .await;

    let events = alice.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ServerEvent::CallError { .. }));
}

#[tokio::test]
async fn test_first_relayed_signal_activates_the_call_and_snapshots_offer() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    let mut bob = harness.register_and_connect("bob").await;
    alice.drain();
    bob.drain();

    alice
        .send(&harness, start_call("c1", &bob.record.id, "alice"))
        .await;
    assert_eq!(
        harness.engine.calls().get("c1").unwrap().status,
        CallState::Pending
    );

    let offer = serde_json::json!({"type": "offer", "sdp": "v=0"});
    alice
        .send(&harness, signal_event(Some(offer.clone()), None))
        .await;

    let session = harness.engine.calls().get("c1").unwrap();
    assert_eq!(session.status, CallState::Active);
    assert_eq!(session.offer, Some(offer.clone()));

    let answer = serde_json::json!({"type": "answer", "sdp": "v=0"});
    bob.send(&harness, signal_event(Some(answer.clone()), None))
        .await;

    let session = harness.engine.calls().get("c1").unwrap();
    assert_eq!(session.answer, Some(answer.clone()));

    // The repository mirrors status and both snapshots
    let (record, stored_offer, stored_answer) = harness.call_repo.get("c1").unwrap();
    assert_eq!(record.status, CallState::Active);
    assert_eq!(stored_offer, Some(offer));
    assert_eq!(stored_answer, Some(answer));
}

#[tokio::test]
async fn test_identifier_addressed_signal_reaches_named_user() {
    let harness = Harness::new(DisconnectPolicy::Immediate);
    let mut alice = harness.register_and_connect("alice").await;
    let mut bob = harness.register_and_connect("bob").await;
    let mut carol = harness.register_and_connect("carol").await;
    alice.drain();
    bob.drain();
    carol.drain();

    // Carol is unpaired but addresses bob directly
    carol
        .send(
            &harness,
            ClientEvent::Signal {
                signal: Some(serde_json::json!({"sdp": "v=0"})),
                candidate: None,
                target_user_id: Some(bob.record.id.clone()),
            },
        )
        .await;

    let events = bob.drain();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ServerEvent::Signal { sender_id, .. } => assert_eq!(sender_id, &carol.record.id),
        other => panic!("expected signal, got {:?}", other),
    }
    assert!(alice.drain().is_empty());
}
