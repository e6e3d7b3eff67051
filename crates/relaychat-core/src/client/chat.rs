//! Client side of an open chat.
//!
//! Two activities run while chatting: an inbound drain task that renders
//! frames arriving for the group, and the outbound loop in
//! [`ChatSession::run`] that turns input lines into frames or commands.
//! Leaving goes through a barrier: the departure notice is sent, the drain
//! keeps rendering until the relay echoes that notice back, and only then is
//! the group left. Nothing sent to the group before the notice is lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::command::Command;
use super::connection::{Inbox, RelayClient};
use crate::error::RelayError;
use crate::protocol::ChatFrame;

/// Where chat output goes
pub trait ChatView: Send + Sync {
    /// A message or join/leave notice from another member
    fn frame(&self, frame: &ChatFrame);
    fn members(&self, group: &str, members: &[String]);
    fn help(&self);
    fn error(&self, error: &RelayError);
}

/// Why a chat ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatExit {
    /// `!leave`: the group was left, the connection is still registered
    Left,
    /// `!exit` or end of input
    Exited,
    /// Interrupt signal
    Interrupted,
    /// The connection to the relay is gone
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainEnd {
    /// Saw our own departure notice
    Departed,
    /// The inbox closed
    Closed,
    Stopped,
}

type DrainHandle = JoinHandle<(Inbox, DrainEnd)>;

async fn drain_inbox(
    mut inbox: Inbox,
    name: String,
    group: String,
    view: Arc<dyn ChatView>,
    stop: CancellationToken,
) -> (Inbox, DrainEnd) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => return (inbox, DrainEnd::Stopped),
            frame = inbox.recv() => match frame {
                Some(frame) => frame,
                None => return (inbox, DrainEnd::Closed),
            },
        };
        if frame.receiver != group {
            tracing::debug!(group = %frame.receiver, "dropping frame for another group");
            continue;
        }
        if frame.is_departure_of(&name, &group) {
            return (inbox, DrainEnd::Departed);
        }
        view.frame(&frame);
    }
}

fn settle(joined: Result<(Inbox, DrainEnd), JoinError>) -> (DrainEnd, Option<Inbox>) {
    match joined {
        Ok((inbox, end)) => (end, Some(inbox)),
        Err(e) => {
            tracing::error!("chat drain task failed: {}", e);
            (DrainEnd::Closed, None)
        }
    }
}

/// An open chat stream for one group
pub struct ChatSession<'a> {
    client: &'a RelayClient,
    name: &'a str,
    group: &'a str,
    view: Arc<dyn ChatView>,
    barrier_timeout: Duration,
}

impl<'a> ChatSession<'a> {
    /// Open the chat stream for `group` and announce ourselves.
    ///
    /// `barrier_timeout` bounds the wait for our own departure notice when
    /// the chat ends.
    pub async fn open(
        client: &'a RelayClient,
        name: &'a str,
        group: &'a str,
        view: Arc<dyn ChatView>,
        barrier_timeout: Duration,
    ) -> Result<Self, RelayError> {
        client.route_chat(name, group).await?;
        client.send_frame(ChatFrame::joined(name, group)).await?;
        tracing::info!(group, "chat opened");
        Ok(Self {
            client,
            name,
            group,
            view,
            barrier_timeout,
        })
    }

    /// Chat until a command, end of input, an interrupt or a lost
    /// connection ends it.
    ///
    /// Returns the inbox for the next chat; `None` only if the drain task
    /// panicked.
    pub async fn run(
        self,
        inbox: Inbox,
        input: &mut mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> (ChatExit, Option<Inbox>) {
        let stop = CancellationToken::new();
        let mut drain: DrainHandle = tokio::spawn(drain_inbox(
            inbox,
            self.name.to_string(),
            self.group.to_string(),
            self.view.clone(),
            stop.clone(),
        ));

        let mut drained = None;
        let exit = loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break ChatExit::Interrupted,
                joined = &mut drain => {
                    drained = Some(joined);
                    break ChatExit::Disconnected;
                }
                line = input.recv() => line,
            };
            let Some(line) = line else {
                break ChatExit::Exited;
            };

            match Command::parse(&line) {
                Command::Empty => {}
                Command::Help => self.view.help(),
                Command::Exit => break ChatExit::Exited,
                Command::Leave => break ChatExit::Left,
                Command::Members => match self.client.group_members(self.group).await {
                    Ok(members) => self.view.members(self.group, &members),
                    Err(e) => {
                        self.view.error(&e);
                        if !e.is_recoverable() {
                            break ChatExit::Disconnected;
                        }
                    }
                },
                Command::Say(text) => {
                    let frame = ChatFrame::message(self.name, self.group, text);
                    if let Err(e) = self.client.send_frame(frame).await {
                        self.view.error(&e);
                        break ChatExit::Disconnected;
                    }
                }
            }
        };

        let (end, inbox) = match drained {
            Some(joined) => settle(joined),
            None => self.depart(exit, drain, stop).await,
        };
        let mut exit = match end {
            DrainEnd::Closed => ChatExit::Disconnected,
            _ => exit,
        };

        if exit == ChatExit::Left {
            if let Err(e) = self.client.leave_group(self.name, self.group).await {
                self.view.error(&e);
                if !e.is_recoverable() {
                    exit = ChatExit::Disconnected;
                }
            }
        }
        tracing::info!(group = self.group, ?exit, "chat closed");
        (exit, inbox)
    }

    /// Send our departure notice and wait for it to come back through the
    /// drain, so every frame queued ahead of it gets rendered.
    async fn depart(
        &self,
        exit: ChatExit,
        mut drain: DrainHandle,
        stop: CancellationToken,
    ) -> (DrainEnd, Option<Inbox>) {
        let sent = exit != ChatExit::Disconnected
            && self
                .client
                .send_frame(ChatFrame::left(self.name, self.group))
                .await
                .is_ok();
        if !sent {
            stop.cancel();
            let (_, inbox) = settle(drain.await);
            return (DrainEnd::Closed, inbox);
        }

        match tokio::time::timeout(self.barrier_timeout, &mut drain).await {
            Ok(joined) => settle(joined),
            Err(_) => {
                tracing::warn!(
                    group = self.group,
                    "departure notice not echoed within {:?}",
                    self.barrier_timeout
                );
                stop.cancel();
                settle(drain.await)
            }
        }
    }
}
