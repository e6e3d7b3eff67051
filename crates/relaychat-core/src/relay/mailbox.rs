//! Per-client bounded mailboxes.
//!
//! The relay keeps the sending half next to the client record; the session
//! that registered the client owns the receiving half and drains it onto the
//! connection.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::error::{RelayError, RelayResult};
use crate::protocol::ChatFrame;

/// Create a mailbox pair for `owner`
pub(crate) fn mailbox(owner: &str, capacity: usize) -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MailboxSender {
            owner: owner.to_string(),
            tx,
        },
        Mailbox {
            owner: owner.to_string(),
            rx,
        },
    )
}

/// Writing half of a mailbox, held by the relay
#[derive(Clone)]
pub(crate) struct MailboxSender {
    owner: String,
    tx: mpsc::Sender<ChatFrame>,
}

impl MailboxSender {
    pub(crate) fn owner(&self) -> &str {
        &self.owner
    }

    /// Queue a frame, waiting at most `timeout` for room.
    pub(crate) async fn deliver(&self, frame: ChatFrame, timeout: Duration) -> RelayResult<()> {
        match self.tx.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(RelayError::MailboxFull {
                client: self.owner.clone(),
            }),
            Err(SendTimeoutError::Closed(_)) => Err(RelayError::ClientNotFound {
                name: self.owner.clone(),
            }),
        }
    }
}

/// Reading half of a client's mailbox.
///
/// `recv` returns `None` once the client has been unregistered and every
/// pending frame has been taken.
#[derive(Debug)]
pub struct Mailbox {
    owner: String,
    rx: mpsc::Receiver<ChatFrame>,
}

impl Mailbox {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Wait for the next frame
    pub async fn recv(&mut self) -> Option<ChatFrame> {
        self.rx.recv().await
    }

    /// Take the next frame if one is already queued
    pub fn try_recv(&mut self) -> Option<ChatFrame> {
        self.rx.try_recv().ok()
    }

    /// Number of frames waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drop every frame already queued, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
