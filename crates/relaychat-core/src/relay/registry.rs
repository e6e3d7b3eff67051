//! Client registration: who is on the relay.

use super::mailbox::{mailbox, Mailbox};
use super::{ClientEntry, Relay};
use crate::error::{RelayError, RelayResult};

/// What unregistering a client took down with it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Departure {
    /// The client that was removed
    pub name: String,
    /// Groups the client was a member of, in name order
    pub left: Vec<String>,
    /// Subset of `left` destroyed because the client was the last member
    pub dissolved: Vec<String>,
}

impl Departure {
    /// Groups that still exist and had the client as a member
    pub fn remaining(&self) -> impl Iterator<Item = &str> {
        self.left
            .iter()
            .filter(|g| !self.dissolved.contains(g))
            .map(String::as_str)
    }
}

/// Check a client name against the naming rules
pub(crate) fn validate_client_name(name: &str, min_len: usize) -> RelayResult<()> {
    let invalid = |reason: &str| RelayError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim() != name {
        return Err(invalid("leading or trailing whitespace"));
    }
    if name.chars().count() < min_len {
        return Err(invalid(&format!("must be at least {} characters", min_len)));
    }
    if name.starts_with('!') {
        return Err(invalid("names starting with '!' are reserved for commands"));
    }
    Ok(())
}

impl Relay {
    /// Register a new client and hand back the receiving end of its mailbox.
    pub fn register(&self, name: &str) -> RelayResult<Mailbox> {
        validate_client_name(name, self.options.min_name_len)?;

        let mut state = self.state.write();
        if state.clients.contains_key(name) {
            return Err(RelayError::NameConflict {
                name: name.to_string(),
            });
        }

        let (tx, rx) = mailbox(name, self.options.mailbox_capacity);
        state.clients.insert(
            name.to_string(),
            ClientEntry {
                mailbox: tx,
                groups: Default::default(),
            },
        );
        tracing::info!(client = name, clients = state.clients.len(), "client registered");
        Ok(rx)
    }

    /// Remove a client, leaving every group it belonged to.
    ///
    /// Group membership and the client record go away under the same write
    /// lock. Dropping the record closes the client's mailbox.
    pub fn unregister(&self, name: &str) -> RelayResult<Departure> {
        let mut state = self.state.write();
        let groups: Vec<String> = state.client(name)?.groups.iter().cloned().collect();

        let mut dissolved = Vec::new();
        for group in &groups {
            if state.detach(name, group) {
                dissolved.push(group.clone());
            }
        }
        state.clients.remove(name);

        tracing::info!(
            client = name,
            left = groups.len(),
            dissolved = dissolved.len(),
            "client unregistered"
        );
        Ok(Departure {
            name: name.to_string(),
            left: groups,
            dissolved,
        })
    }

    /// Point-in-time check; the client may be gone by the time the caller acts
    pub fn exists(&self, name: &str) -> bool {
        self.state.read().clients.contains_key(name)
    }

    /// Names of all registered clients, sorted
    pub fn list_clients(&self) -> Vec<String> {
        let state = self.state.read();
        let mut names: Vec<String> = state.clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn client_count(&self) -> usize {
        self.state.read().clients.len()
    }
}
