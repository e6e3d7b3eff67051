//! Accept loop: one session task per connection

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::session;
use crate::config::ServerSettings;
use crate::relay::{Relay, RelayOptions, Router};

/// Relay server that manages client connections
pub struct RelayServer {
    relay: Relay,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Bind the listener and start accepting connections.
    ///
    /// Failing to bind is the only fatal error of the relay.
    pub async fn start(settings: &ServerSettings) -> Result<Self> {
        let listener = TcpListener::bind(&settings.bind)
            .await
            .with_context(|| format!("Failed to bind relay on {}", settings.bind))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read bound address")?;

        let relay = Relay::new(RelayOptions::from(settings));
        let router = Router::new(relay.clone(), settings.delivery_timeout());
        let shutdown = CancellationToken::new();

        // Spawn accept loop
        tokio::spawn(Self::accept_loop(
            listener,
            router,
            settings.max_frame_len,
            shutdown.clone(),
        ));

        tracing::info!("relay listening on {}", local_addr);
        Ok(Self {
            relay,
            local_addr,
            shutdown,
        })
    }

    /// Accept loop for incoming client connections
    async fn accept_loop(
        listener: TcpListener,
        router: Router,
        max_frame_len: usize,
        shutdown: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("connection from {}", peer);
                    tokio::spawn(session::serve(
                        stream,
                        peer,
                        router.clone(),
                        max_frame_len,
                        shutdown.child_token(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("accept error: {}", e);
                }
            }
        }
        tracing::debug!("accept loop stopped");
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The relay state shared by all sessions
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Stop accepting and close every session
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until [`RelayServer::shutdown`] is called
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
