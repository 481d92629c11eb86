//! Configuration for Switchboard
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Default number of simultaneously connected clients
pub const DEFAULT_MAX_CLIENTS: usize = 32768;

/// What to do when a client's transport drops
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Free the peer and mark the identity offline immediately
    Immediate,
    /// Keep the pairing alive for a grace window to allow seamless reconnects
    Grace,
}

/// Switchboard - pairing and WebRTC signaling relay
#[derive(Parser, Debug, Clone)]
#[command(name = "switchboard")]
#[command(about = "Pairing and WebRTC signaling relay")]
pub struct Args {
    /// Unique node identifier for this relay instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "switchboard")]
    pub mongodb_db: String,

    /// Enable development mode (falls back to in-memory stores when MongoDB
    /// is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Disconnect handling policy
    #[arg(long, env = "DISCONNECT_POLICY", value_enum, default_value = "grace")]
    pub disconnect_policy: DisconnectPolicy,

    /// Grace window in seconds before a dropped identity is released
    #[arg(long, env = "DISCONNECT_GRACE_SECS", default_value = "10")]
    pub disconnect_grace_secs: u64,

    /// Maximum simultaneously connected clients
    #[arg(long, env = "MAX_CLIENTS")]
    pub max_clients: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Effective client capacity
    pub fn max_clients(&self) -> usize {
        self.max_clients.unwrap_or(DEFAULT_MAX_CLIENTS)
    }

    /// Grace window as a duration
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.disconnect_policy == DisconnectPolicy::Grace && self.disconnect_grace_secs == 0 {
            return Err(
                "DISCONNECT_GRACE_SECS must be greater than zero under the grace policy; \
                 use --disconnect-policy immediate instead"
                    .to_string(),
            );
        }

        if let Some(max) = self.max_clients {
            if max == 0 {
                return Err("MAX_CLIENTS must be greater than zero".to_string());
            }
        }

        Ok(())
    }
}
