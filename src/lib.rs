//! Switchboard - pairing and WebRTC signaling relay
//!
//! Switchboard matches authenticated clients into pairs and relays
//! call-control and WebRTC negotiation traffic (offer/answer/ICE) between
//! the two members of a pair. It never touches media; it only carries
//! opaque negotiation payloads.
//!
//! ## Services
//!
//! - **Registration**: `POST /register` mints an opaque auth token per
//!   username, persisted in MongoDB
//! - **Relay**: `GET /ws?token=...` upgrades into the engine; clients are
//!   paired first-free-first-served and exchange JSON event frames
//! - **Calls**: call lifecycle (pending/active/ended) tracked per call id
//!   and mirrored to the call store
//! - **Presence**: online/offline status with an optional grace window
//!   that lets a dropped client reconnect without its peers noticing
//!
//! ## Wire format
//!
//! Frames are JSON: `{"event": "<name>", "data": {...}}`. Client events:
//! `start-call`, `end-call`, `signal`. Server events: `pair-found`,
//! `pair-disconnected`, `user-list`, `user-connected`, `user-disconnected`,
//! `incoming-call`, `call-initiated`, `call-ended`, `call-error`, `signal`.

pub mod config;
pub mod db;
pub mod engine;
pub mod protocol;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use engine::Engine;
pub use server::{run, AppState};
pub use types::{Result, SwitchboardError};
