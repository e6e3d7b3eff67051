//! Broadcast engine: fans a frame out to the mailboxes of a group.
//!
//! Recipients are resolved under the read lock as one snapshot and the lock
//! is released before any delivery awaits. Each recipient is attempted
//! concurrently with its own timeout, so one full mailbox cannot stall the
//! rest of the group.

use std::time::Duration;

use futures_util::future::join_all;

use super::{MailboxSender, Relay};
use crate::error::{RelayError, RelayResult};
use crate::protocol::{ChatFrame, FrameKind};

/// A recipient the frame could not be delivered to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub recipient: String,
    pub error: RelayError,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose mailbox accepted the frame
    pub delivered: Vec<String>,
    /// Recipients that timed out or vanished mid-broadcast
    pub failed: Vec<DeliveryFailure>,
}

impl BroadcastReport {
    /// Number of mailboxes the frame was addressed to
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_for(&self, recipient: &str) -> bool {
        self.failed.iter().any(|f| f.recipient == recipient)
    }
}

impl Relay {
    /// Resolve the mailboxes a frame for `group` goes to.
    fn recipients(
        &self,
        group: &str,
        sender: &str,
        include_sender: bool,
        sender_must_be_member: bool,
    ) -> RelayResult<Vec<MailboxSender>> {
        let state = self.state.read();
        let entry = state.group(group)?;
        if sender_must_be_member && !entry.members.contains(sender) {
            return Err(RelayError::NotAMember {
                client: sender.to_string(),
                group: group.to_string(),
            });
        }

        Ok(entry
            .members
            .iter()
            .filter(|member| include_sender || member.as_str() != sender)
            .filter_map(|member| state.clients.get(member))
            .map(|client| client.mailbox.clone())
            .collect())
    }
}

/// Delivers chat frames to group members
#[derive(Debug, Clone)]
pub struct Router {
    relay: Relay,
    delivery_timeout: Duration,
}

impl Router {
    pub fn new(relay: Relay, delivery_timeout: Duration) -> Self {
        Self {
            relay,
            delivery_timeout,
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Deliver `frame` to every member of `frame.receiver` except its sender.
    ///
    /// A departure notice also goes to its author, queued behind whatever was
    /// already in that mailbox. The sender must be a member of the group.
    pub async fn broadcast(&self, frame: ChatFrame) -> RelayResult<BroadcastReport> {
        let include_sender = frame.kind == FrameKind::Left;
        let recipients =
            self.relay
                .recipients(&frame.receiver, &frame.sender, include_sender, true)?;
        Ok(self.fan_out(frame, recipients).await)
    }

    /// Tell the remaining members of `group` that `name` is gone.
    ///
    /// Used when a client vanished without sending its own notice; `name` is
    /// normally no longer a member at this point.
    pub async fn announce_departure(&self, group: &str, name: &str) -> BroadcastReport {
        match self.relay.recipients(group, name, false, false) {
            Ok(recipients) => self.fan_out(ChatFrame::left(name, group), recipients).await,
            Err(e) => {
                tracing::debug!(group, client = name, "no one to notify: {}", e);
                BroadcastReport::default()
            }
        }
    }

    async fn fan_out(&self, frame: ChatFrame, recipients: Vec<MailboxSender>) -> BroadcastReport {
        let timeout = self.delivery_timeout;
        let attempts = recipients.iter().map(|mailbox| {
            let frame = frame.clone();
            async move { (mailbox.owner(), mailbox.deliver(frame, timeout).await) }
        });

        let mut report = BroadcastReport::default();
        for (recipient, result) in join_all(attempts).await {
            match result {
                Ok(()) => report.delivered.push(recipient.to_string()),
                Err(error) => {
                    tracing::warn!(
                        group = %frame.receiver,
                        sender = %frame.sender,
                        recipient,
                        "delivery failed: {}",
                        error
                    );
                    report.failed.push(DeliveryFailure {
                        recipient: recipient.to_string(),
                        error,
                    });
                }
            }
        }
        report
    }
}
