//! relaychat-core: group chat relay and client library
//!
//! The relay keeps a registry of connected clients and the groups they
//! belong to, and fans chat frames out to group members through bounded
//! per-client mailboxes. The client half speaks the same ndjson protocol
//! over TCP.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;

pub use client::{ChatExit, ChatSession, ChatView, Inbox, RelayClient};
pub use config::Settings;
pub use error::{RelayError, RelayResult};
pub use protocol::{ChatFrame, FrameKind};
pub use relay::{Relay, Router};
pub use server::RelayServer;
