//! relaychat: terminal client and server binary for the relaychat relay

pub mod app;
pub mod config;
pub mod ui;
