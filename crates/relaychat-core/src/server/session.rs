//! One client connection on the relay.
//!
//! The connection task is the outbound drain: it reads frames from the peer
//! one at a time, answers calls and hands chat frames to the router. While a
//! chat is open, a second task drains the client's mailbox onto the
//! connection. While no chat is open that task reads the mailbox and drops
//! what it finds, so senders never wait on a client that is not listening.
//! A writer task owns the socket's write half; both drains reach it through
//! the `wire` channel.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::error::{RelayError, RelayResult};
use crate::protocol::*;
use crate::relay::{Mailbox, Router};

/// Outgoing messages buffered ahead of the socket writer
const WIRE_CAPACITY: usize = 64;

/// Where the connection's mailbox currently is
enum ChatState {
    /// No client registered on this connection
    Unregistered,
    /// Registered, no chat open; frames are read and dropped
    Idle {
        stop: CancellationToken,
        drain: JoinHandle<Mailbox>,
    },
    /// Nothing reads the mailbox; only between a `RouteChat` check and its
    /// acknowledgement going out
    Held(Mailbox),
    /// The inbound drain owns the mailbox and hands it back when it ends
    Chatting {
        group: String,
        stop: CancellationToken,
        drain: JoinHandle<Mailbox>,
    },
}

struct Session {
    id: String,
    peer: SocketAddr,
    router: Router,
    wire: mpsc::Sender<ServerMessage>,
    name: Option<String>,
    chat: ChatState,
}

/// Serve one connection until the peer goes away or the relay shuts down
pub(super) async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    max_frame_len: usize,
    cancel: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, LinesCodec::new_with_max_length(max_frame_len));

    let (wire, wire_rx) = mpsc::channel::<ServerMessage>(WIRE_CAPACITY);
    let writer = tokio::spawn(write_loop(
        FramedWrite::new(write_half, LinesCodec::new()),
        wire_rx,
        cancel.clone(),
    ));

    let mut session = Session {
        id: uuid::Uuid::new_v4().to_string(),
        peer,
        router,
        wire,
        name: None,
        chat: ChatState::Unregistered,
    };

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            None => break, // EOF
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = session.handle_line(&line).await {
                    tracing::debug!(peer = %peer, "session ended: {}", e);
                    break;
                }
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::warn!(peer = %peer, "frame longer than {} bytes, closing", max_frame_len);
                break;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                tracing::debug!(peer = %peer, "read error: {}", e);
                break;
            }
        }
    }

    session.close().await;
    // Dropping the session drops the last wire sender and ends the writer
    drop(session);
    let _ = writer.await;
    tracing::debug!(peer = %peer, "connection closed");
}

/// Socket writer: everything the relay sends goes through here
async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
    mut wire: mpsc::Receiver<ServerMessage>,
    cancel: CancellationToken,
) {
    while let Some(msg) = wire.recv().await {
        let line = match encode(&msg) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("failed to encode outgoing message: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(line).await {
            tracing::debug!("write error: {}", e);
            cancel.cancel();
            break;
        }
    }
}

/// Inbound drain: forward the mailbox to the connection.
///
/// Stops after forwarding the owner's own departure notice for `group`,
/// when told to stop, or when the mailbox or the connection closes. Frames
/// for other groups are discarded.
async fn drain_mailbox(
    mut mailbox: Mailbox,
    group: String,
    wire: mpsc::Sender<ServerMessage>,
    stop: CancellationToken,
) -> Mailbox {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = mailbox.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if frame.receiver != group {
            tracing::debug!(
                client = mailbox.owner(),
                group = %frame.receiver,
                "discarding frame outside the open chat"
            );
            continue;
        }

        let departed = frame.is_departure_of(mailbox.owner(), &group);
        if wire.send(ServerMessage::Chat { frame }).await.is_err() {
            break;
        }
        if departed {
            break;
        }
    }
    mailbox
}

/// Idle drain: nothing is listening, so every frame is dropped
async fn discard_mailbox(mut mailbox: Mailbox, stop: CancellationToken) -> Mailbox {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = mailbox.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        tracing::trace!(
            client = mailbox.owner(),
            group = %frame.receiver,
            "discarding frame while no chat is open"
        );
    }
    mailbox
}

impl Session {
    fn chat_group(&self) -> Option<&str> {
        match &self.chat {
            ChatState::Chatting { group, .. } => Some(group.as_str()),
            _ => None,
        }
    }

    async fn send(&self, msg: ServerMessage) -> RelayResult<()> {
        self.wire
            .send(msg)
            .await
            .map_err(|_| RelayError::transport("connection writer closed"))
    }

    /// Handle one line from the peer. An error ends the session.
    async fn handle_line(&mut self, line: &str) -> RelayResult<()> {
        let msg: ClientMessage = match decode(line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(peer = %self.peer, "ignoring undecodable frame: {}", e);
                return Ok(());
            }
        };

        match msg {
            ClientMessage::Request { id, call } => {
                let result = self.handle_call(call).await;
                let fatal = matches!(&result, Err(e) if !e.is_recoverable());
                let opened = match &result {
                    Ok(Reply::ChatOpened { group }) => Some(group.clone()),
                    _ => None,
                };

                // The acknowledgement goes out before the first chat frame
                self.send(ServerMessage::Response { id, result }).await?;
                if let Some(group) = opened {
                    self.open_chat(group);
                }
                if fatal {
                    return Err(RelayError::transport("session state lost"));
                }
                Ok(())
            }
            ClientMessage::Chat { frame } => self.route(frame).await,
        }
    }

    /// A connection acts only for the client it registered
    fn check_identity(&self, call: &Call) -> RelayResult<()> {
        let Some(actor) = call.acting_client() else {
            return Ok(());
        };
        match &self.name {
            Some(name) if name == actor => Ok(()),
            Some(name) => Err(RelayError::protocol(format!(
                "connection is registered as {}, not {}",
                name, actor
            ))),
            None => Err(RelayError::protocol("register before acting as a client")),
        }
    }

    async fn handle_call(&mut self, call: Call) -> RelayResult<Reply> {
        self.check_identity(&call)?;
        let relay = self.router.relay().clone();

        match call {
            Call::Register { name } => {
                if let Some(current) = &self.name {
                    return Err(RelayError::protocol(format!(
                        "connection already registered as {}",
                        current
                    )));
                }
                let mailbox = relay.register(&name)?;
                tracing::debug!(peer = %self.peer, client = %name, "session registered");
                self.name = Some(name);
                self.park(mailbox);
                Ok(Reply::Registered {
                    connection_id: self.id.clone(),
                })
            }
            Call::UnRegister { name } => {
                let mailbox = self.take_mailbox().await?;
                if let Err(e) = relay.unregister(&name) {
                    if let Some(mailbox) = mailbox {
                        self.park(mailbox);
                    }
                    return Err(e);
                }
                self.name = None;
                Ok(Reply::Done)
            }
            Call::CreateGroup { client, group } => {
                relay.create_group(&client, &group)?;
                Ok(Reply::Done)
            }
            Call::JoinGroup { client, group } => {
                let joined = relay.join_group(&client, &group)?;
                Ok(Reply::Joined { group, joined })
            }
            Call::LeaveGroup { client, group } => {
                if self.chat_group() == Some(group.as_str()) {
                    self.finish_chat(true).await?;
                }
                relay.leave_group(&client, &group)?;
                Ok(Reply::Done)
            }
            Call::GetGroupList => Ok(Reply::Groups {
                groups: relay.list_groups(),
            }),
            Call::GetClientList => Ok(Reply::Clients {
                clients: relay.list_clients(),
            }),
            Call::GetGroupMembers { group } => {
                let members = relay.list_members(&group)?;
                Ok(Reply::Members { group, members })
            }
            Call::RouteChat { client, group } => {
                if !relay.list_members(&group)?.contains(&client) {
                    return Err(RelayError::NotAMember { client, group });
                }
                // One chat at a time per connection. Whatever queued up
                // before this point belongs to no open chat.
                let Some(mut mailbox) = self.take_mailbox().await? else {
                    return Err(RelayError::protocol("register before opening a chat"));
                };
                let dropped = mailbox.clear();
                if dropped > 0 {
                    tracing::debug!(client = %client, dropped, "dropped frames queued before the chat opened");
                }
                self.chat = ChatState::Held(mailbox);
                Ok(Reply::ChatOpened { group })
            }
        }
    }

    /// Start the idle drain on `mailbox`
    fn park(&mut self, mailbox: Mailbox) {
        let stop = CancellationToken::new();
        let drain = tokio::spawn(discard_mailbox(mailbox, stop.clone()));
        self.chat = ChatState::Idle { stop, drain };
    }

    /// Stop whichever drain holds the mailbox and take it back. The session
    /// is left `Unregistered` until the caller decides what comes next.
    async fn take_mailbox(&mut self) -> RelayResult<Option<Mailbox>> {
        let (stop, drain) = match std::mem::replace(&mut self.chat, ChatState::Unregistered) {
            ChatState::Unregistered => return Ok(None),
            ChatState::Held(mailbox) => return Ok(Some(mailbox)),
            ChatState::Idle { stop, drain } | ChatState::Chatting { stop, drain, .. } => {
                (stop, drain)
            }
        };
        stop.cancel();
        drain.await.map(Some).map_err(|e| {
            tracing::error!(peer = %self.peer, "mailbox drain failed: {}", e);
            RelayError::transport(format!("mailbox drain failed: {}", e))
        })
    }

    /// Start the inbound drain for `group`
    fn open_chat(&mut self, group: String) {
        let mailbox = match std::mem::replace(&mut self.chat, ChatState::Unregistered) {
            ChatState::Held(mailbox) => mailbox,
            other => {
                self.chat = other;
                tracing::warn!(peer = %self.peer, group = %group, "chat opened without a held mailbox");
                return;
            }
        };

        let stop = CancellationToken::new();
        let drain = tokio::spawn(drain_mailbox(
            mailbox,
            group.clone(),
            self.wire.clone(),
            stop.clone(),
        ));
        tracing::debug!(peer = %self.peer, group = %group, "chat opened");
        self.chat = ChatState::Chatting { group, stop, drain };
    }

    /// Wait for the inbound drain to end and park its mailbox, so that
    /// frames arriving after the chat closed are dropped.
    ///
    /// With `cancel` the drain is told to stop now; without it the caller
    /// knows the drain will stop on its own (its departure notice is queued).
    async fn finish_chat(&mut self, cancel: bool) -> RelayResult<()> {
        match std::mem::replace(&mut self.chat, ChatState::Unregistered) {
            ChatState::Chatting { group, stop, drain } => {
                if cancel {
                    stop.cancel();
                }
                match drain.await {
                    Ok(mailbox) => {
                        tracing::debug!(peer = %self.peer, group = %group, "chat closed");
                        self.park(mailbox);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(peer = %self.peer, "inbound drain failed: {}", e);
                        Err(RelayError::transport(format!("inbound drain failed: {}", e)))
                    }
                }
            }
            other => {
                self.chat = other;
                Ok(())
            }
        }
    }

    /// Hand a chat frame from the peer to the router
    async fn route(&mut self, frame: ChatFrame) -> RelayResult<()> {
        let (name, group) = match (&self.name, self.chat_group()) {
            (Some(name), Some(group)) => (name.clone(), group.to_string()),
            _ => {
                tracing::warn!(peer = %self.peer, "dropping chat frame outside an open chat");
                return Ok(());
            }
        };
        if frame.sender != name || frame.receiver != group {
            tracing::warn!(
                peer = %self.peer,
                sender = %frame.sender,
                receiver = %frame.receiver,
                "dropping chat frame not matching the open chat"
            );
            return Ok(());
        }

        let departing = frame.kind == FrameKind::Left;
        match self.router.broadcast(frame).await {
            Ok(report) => {
                if departing {
                    // The drain ends by itself after forwarding our own
                    // notice, unless the notice never made it into the mailbox.
                    let lost = report.failed_for(&name);
                    self.finish_chat(lost).await?;
                }
            }
            Err(e) => {
                tracing::warn!(client = %name, group = %group, "broadcast rejected: {}", e);
                if departing {
                    self.finish_chat(true).await?;
                }
            }
        }
        Ok(())
    }

    /// Tear the session down. A client still registered here vanished
    /// without saying goodbye: unregister it and tell its groups.
    async fn close(&mut self) {
        if let Err(e) = self.take_mailbox().await {
            tracing::debug!(peer = %self.peer, "{}", e);
        }

        let Some(name) = self.name.take() else {
            return;
        };
        match self.router.relay().unregister(&name) {
            Ok(departure) => {
                tracing::info!(
                    client = %name,
                    peer = %self.peer,
                    groups = departure.left.len(),
                    "client dropped without unregistering"
                );
                for group in departure.remaining() {
                    self.router.announce_departure(group, &name).await;
                }
            }
            Err(e) => {
                tracing::debug!(client = %name, "cleanup skipped: {}", e);
            }
        }
    }
}
