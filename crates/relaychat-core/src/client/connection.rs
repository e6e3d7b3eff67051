//! Client side of a relay connection
//!
//! One TCP connection carries calls and the chat stream. A reader task
//! routes each `Response` to the call waiting on its id and pushes chat
//! frames into the [`Inbox`]; a writer task owns the socket's write half.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::config::ClientSettings;
use crate::error::{RelayError, RelayResult};
use crate::protocol::*;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RelayResult<Reply>>>>>;

/// Outgoing messages buffered ahead of the socket writer
const OUTBOUND_CAPACITY: usize = 64;

/// Chat frames received from the relay, in arrival order.
///
/// `recv` returns `None` once the connection is gone.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<ChatFrame>,
}

impl Inbox {
    pub async fn recv(&mut self) -> Option<ChatFrame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChatFrame> {
        self.rx.try_recv().ok()
    }
}

/// Connection to a relay
pub struct RelayClient {
    outbound: mpsc::Sender<ClientMessage>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    closed: CancellationToken,
}

impl RelayClient {
    /// Connect to the relay named in `settings.server`
    pub async fn connect(settings: &ClientSettings) -> Result<(Self, Inbox)> {
        let stream = TcpStream::connect(&settings.server)
            .await
            .with_context(|| format!("Failed to connect to relay at {}", settings.server))?;
        stream.set_nodelay(true).ok();
        tracing::debug!("connected to {}", settings.server);
        Ok(Self::from_stream(stream, settings))
    }

    /// Wrap an established stream
    pub fn from_stream(stream: TcpStream, settings: &ClientSettings) -> (Self, Inbox) {
        let (read_half, write_half) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbox_tx, inbox_rx) = mpsc::channel(settings.inbox_capacity.max(1));

        tokio::spawn(read_loop(
            FramedRead::new(read_half, LinesCodec::new()),
            pending.clone(),
            inbox_tx,
            closed.clone(),
        ));
        tokio::spawn(write_loop(
            FramedWrite::new(write_half, LinesCodec::new()),
            outbound_rx,
            closed.clone(),
        ));

        let client = Self {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: settings.request_timeout(),
            closed,
        };
        (client, Inbox { rx: inbox_rx })
    }

    /// Whether the connection has gone away
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close the connection; pending calls fail with `TransportFailure`
    pub fn close(&self) {
        self.closed.cancel();
    }

    async fn call(&self, call: Call) -> RelayResult<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        // The reader fails pending calls after marking the connection closed,
        // so a call registered after that sweep has to notice by itself.
        if self.is_closed() {
            self.pending.lock().remove(&id);
            return Err(RelayError::transport("connection closed"));
        }
        if self
            .outbound
            .send(ClientMessage::Request { id, call })
            .await
            .is_err()
        {
            self.pending.lock().remove(&id);
            return Err(RelayError::transport("connection closed"));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::transport("connection closed")),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(RelayError::transport(format!(
                    "no reply within {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    /// Register `name`; returns the relay's connection id
    pub async fn register(&self, name: &str) -> RelayResult<String> {
        match self
            .call(Call::Register {
                name: name.to_string(),
            })
            .await?
        {
            Reply::Registered { connection_id } => Ok(connection_id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn unregister(&self, name: &str) -> RelayResult<()> {
        self.call(Call::UnRegister {
            name: name.to_string(),
        })
        .await
        .and_then(expect_done)
    }

    /// Create `group` with `client` as its first member
    pub async fn create_group(&self, client: &str, group: &str) -> RelayResult<()> {
        self.call(Call::CreateGroup {
            client: client.to_string(),
            group: group.to_string(),
        })
        .await
        .and_then(expect_done)
    }

    /// Join `group`; `false` means the client was already a member
    pub async fn join_group(&self, client: &str, group: &str) -> RelayResult<bool> {
        match self
            .call(Call::JoinGroup {
                client: client.to_string(),
                group: group.to_string(),
            })
            .await?
        {
            Reply::Joined { joined, .. } => Ok(joined),
            other => Err(unexpected(other)),
        }
    }

    pub async fn leave_group(&self, client: &str, group: &str) -> RelayResult<()> {
        self.call(Call::LeaveGroup {
            client: client.to_string(),
            group: group.to_string(),
        })
        .await
        .and_then(expect_done)
    }

    pub async fn group_list(&self) -> RelayResult<Vec<String>> {
        match self.call(Call::GetGroupList).await? {
            Reply::Groups { groups } => Ok(groups),
            other => Err(unexpected(other)),
        }
    }

    pub async fn client_list(&self) -> RelayResult<Vec<String>> {
        match self.call(Call::GetClientList).await? {
            Reply::Clients { clients } => Ok(clients),
            other => Err(unexpected(other)),
        }
    }

    pub async fn group_members(&self, group: &str) -> RelayResult<Vec<String>> {
        match self
            .call(Call::GetGroupMembers {
                group: group.to_string(),
            })
            .await?
        {
            Reply::Members { members, .. } => Ok(members),
            other => Err(unexpected(other)),
        }
    }

    /// Open the chat stream for `group`; frames for it start arriving in
    /// the inbox after this returns
    pub async fn route_chat(&self, client: &str, group: &str) -> RelayResult<()> {
        match self
            .call(Call::RouteChat {
                client: client.to_string(),
                group: group.to_string(),
            })
            .await?
        {
            Reply::ChatOpened { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Send a chat frame on the open chat stream
    pub async fn send_frame(&self, frame: ChatFrame) -> RelayResult<()> {
        if self.is_closed() {
            return Err(RelayError::transport("connection closed"));
        }
        self.outbound
            .send(ClientMessage::Chat { frame })
            .await
            .map_err(|_| RelayError::transport("connection closed"))
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

fn unexpected(reply: Reply) -> RelayError {
    RelayError::protocol(format!("unexpected reply: {:?}", reply))
}

fn expect_done(reply: Reply) -> RelayResult<()> {
    match reply {
        Reply::Done => Ok(()),
        other => Err(unexpected(other)),
    }
}

async fn read_loop(
    mut frames: FramedRead<OwnedReadHalf, LinesCodec>,
    pending: Pending,
    inbox: mpsc::Sender<ChatFrame>,
    closed: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = frames.next() => next,
        };
        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::debug!("relay read error: {}", e);
                break;
            }
            None => break, // EOF
        };

        match decode::<ServerMessage>(&line) {
            Ok(ServerMessage::Response { id, result }) => {
                if let Some(tx) = pending.lock().remove(&id) {
                    let _ = tx.send(result);
                } else {
                    tracing::debug!("reply for unknown request {}", id);
                }
            }
            Ok(ServerMessage::Chat { frame }) => {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    sent = inbox.send(frame) => {
                        if sent.is_err() {
                            tracing::debug!("inbox dropped, discarding chat frame");
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("ignoring undecodable frame from relay: {}", e);
            }
        }
    }

    closed.cancel();
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(RelayError::transport("connection closed")));
    }
    tracing::debug!("relay connection reader stopped");
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
    mut outbound: mpsc::Receiver<ClientMessage>,
    closed: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = closed.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let line = match encode(&msg) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("failed to encode outgoing message: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(line).await {
            tracing::debug!("relay write error: {}", e);
            closed.cancel();
            break;
        }
    }
}
