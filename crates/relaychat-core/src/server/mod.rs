//! TCP relay server
//!
//! Accepts client connections and runs one [`session`] per connection
//! against a shared [`Relay`](crate::relay::Relay).

mod listener;
mod session;

pub use listener::RelayServer;
