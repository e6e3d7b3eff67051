//! In-memory relay state: registered clients, groups and the membership
//! graph between them.
//!
//! All state lives behind one `RwLock`. Every mutation of the graph takes the
//! write lock and updates the client side and the group side of an edge in the
//! same critical section, so readers never see a half-applied change.

mod mailbox;
mod membership;
mod registry;
mod router;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ServerSettings;
use crate::error::{RelayError, RelayResult};

pub use mailbox::Mailbox;
pub(crate) use mailbox::MailboxSender;
pub use registry::Departure;
pub use router::{BroadcastReport, DeliveryFailure, Router};

/// Limits applied by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Capacity of each client mailbox
    pub mailbox_capacity: usize,
    /// Shortest accepted client name
    pub min_name_len: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: 100,
            min_name_len: 3,
        }
    }
}

impl From<&ServerSettings> for RelayOptions {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            mailbox_capacity: settings.mailbox_capacity,
            min_name_len: settings.min_name_len,
        }
    }
}

/// A registered client
struct ClientEntry {
    mailbox: MailboxSender,
    groups: BTreeSet<String>,
}

/// A live group; never empty while it is in the map
#[derive(Default)]
struct GroupEntry {
    members: BTreeSet<String>,
}

#[derive(Default)]
struct RelayState {
    clients: HashMap<String, ClientEntry>,
    groups: BTreeMap<String, GroupEntry>,
}

impl RelayState {
    fn client(&self, name: &str) -> RelayResult<&ClientEntry> {
        self.clients
            .get(name)
            .ok_or_else(|| RelayError::ClientNotFound {
                name: name.to_string(),
            })
    }

    fn group(&self, name: &str) -> RelayResult<&GroupEntry> {
        self.groups
            .get(name)
            .ok_or_else(|| RelayError::GroupNotFound {
                name: name.to_string(),
            })
    }

    /// Add the edge on both sides. Returns false if it already existed.
    fn attach(&mut self, client: &str, group: &str) -> bool {
        let added = self
            .groups
            .entry(group.to_string())
            .or_default()
            .members
            .insert(client.to_string());
        if let Some(entry) = self.clients.get_mut(client) {
            entry.groups.insert(group.to_string());
        }
        added
    }

    /// Remove the edge on both sides and drop the group if it emptied.
    ///
    /// Returns true when the group was dissolved.
    fn detach(&mut self, client: &str, group: &str) -> bool {
        if let Some(entry) = self.clients.get_mut(client) {
            entry.groups.remove(group);
        }
        let Some(entry) = self.groups.get_mut(group) else {
            return false;
        };
        entry.members.remove(client);
        if entry.members.is_empty() {
            self.groups.remove(group);
            return true;
        }
        false
    }
}

/// Shared handle to the relay state.
///
/// Cheap to clone; every clone sees the same clients and groups.
#[derive(Clone)]
pub struct Relay {
    state: Arc<RwLock<RelayState>>,
    options: RelayOptions,
}

impl Relay {
    pub fn new(options: RelayOptions) -> Self {
        Self {
            state: Arc::new(RwLock::new(RelayState::default())),
            options,
        }
    }

    pub fn options(&self) -> RelayOptions {
        self.options
    }

    /// Take a consistent copy of the whole membership graph
    pub fn snapshot(&self) -> RelaySnapshot {
        let state = self.state.read();
        RelaySnapshot {
            clients: state
                .clients
                .iter()
                .map(|(name, entry)| (name.clone(), entry.groups.clone()))
                .collect(),
            groups: state
                .groups
                .iter()
                .map(|(name, entry)| (name.clone(), entry.members.clone()))
                .collect(),
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayOptions::default())
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Relay")
            .field("clients", &state.clients.len())
            .field("groups", &state.groups.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Owned copy of the membership graph, taken under one read lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySnapshot {
    /// Client name -> groups it belongs to
    pub clients: BTreeMap<String, BTreeSet<String>>,
    /// Group name -> member names
    pub groups: BTreeMap<String, BTreeSet<String>>,
}

impl RelaySnapshot {
    /// Check the graph invariants: symmetric edges and no empty groups.
    pub fn is_consistent(&self) -> bool {
        let groups_ok = self.groups.iter().all(|(group, members)| {
            !members.is_empty()
                && members.iter().all(|m| {
                    self.clients
                        .get(m)
                        .is_some_and(|groups| groups.contains(group))
                })
        });
        let clients_ok = self.clients.iter().all(|(client, groups)| {
            groups.iter().all(|g| {
                self.groups
                    .get(g)
                    .is_some_and(|members| members.contains(client))
            })
        });
        groups_ok && clients_ok
    }
}
