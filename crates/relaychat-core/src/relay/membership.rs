//! Group membership: creating groups and moving clients in and out of them.

use super::Relay;
use crate::error::{RelayError, RelayResult};

/// Check a group name against the naming rules
pub(crate) fn validate_group_name(name: &str) -> RelayResult<()> {
    let invalid = |reason: &str| RelayError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.trim() != name {
        return Err(invalid("leading or trailing whitespace"));
    }
    if name.starts_with('!') {
        return Err(invalid("names starting with '!' are reserved for commands"));
    }
    Ok(())
}

impl Relay {
    /// Create a group with `creator` as its first member.
    ///
    /// Creation and the creator's join happen in one step, so an empty
    /// group is never visible.
    pub fn create_group(&self, creator: &str, group: &str) -> RelayResult<()> {
        validate_group_name(group)?;

        let mut state = self.state.write();
        state.client(creator)?;
        if state.groups.contains_key(group) {
            return Err(RelayError::NameConflict {
                name: group.to_string(),
            });
        }
        state.attach(creator, group);
        tracing::info!(group, creator, "group created");
        Ok(())
    }

    /// Add `client` to `group`.
    ///
    /// Joining a group twice is a no-op that returns `Ok(false)`.
    pub fn join_group(&self, client: &str, group: &str) -> RelayResult<bool> {
        let mut state = self.state.write();
        state.client(client)?;
        state.group(group)?;
        let added = state.attach(client, group);
        if added {
            tracing::info!(group, client, "joined group");
        }
        Ok(added)
    }

    /// Remove `client` from `group`.
    ///
    /// Returns true when the client was the last member and the group was
    /// destroyed along with the edge.
    pub fn leave_group(&self, client: &str, group: &str) -> RelayResult<bool> {
        let mut state = self.state.write();
        let is_member = state.client(client)?.groups.contains(group);
        state.group(group)?;
        if !is_member {
            return Err(RelayError::NotAMember {
                client: client.to_string(),
                group: group.to_string(),
            });
        }

        let dissolved = state.detach(client, group);
        tracing::info!(group, client, dissolved, "left group");
        Ok(dissolved)
    }

    /// Names of all groups, sorted
    pub fn list_groups(&self) -> Vec<String> {
        self.state.read().groups.keys().cloned().collect()
    }

    /// Members of `group`, sorted
    pub fn list_members(&self, group: &str) -> RelayResult<Vec<String>> {
        let state = self.state.read();
        Ok(state.group(group)?.members.iter().cloned().collect())
    }

    /// Groups `client` belongs to, sorted
    pub fn groups_of(&self, client: &str) -> RelayResult<Vec<String>> {
        let state = self.state.read();
        Ok(state.client(client)?.groups.iter().cloned().collect())
    }

    pub fn is_member(&self, client: &str, group: &str) -> bool {
        self.state
            .read()
            .groups
            .get(group)
            .is_some_and(|g| g.members.contains(client))
    }

    pub fn group_count(&self) -> usize {
        self.state.read().groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn relay_with(names: &[&str]) -> Relay {
        let relay = Relay::default();
        for name in names {
            // Mailboxes are dropped; these tests never route.
            relay.register(name).unwrap();
        }
        relay
    }

    #[test]
    fn test_create_group_joins_creator() {
        let relay = relay_with(&["alice"]);
        relay.create_group("alice", "g1").unwrap();
        assert_eq!(relay.list_members("g1").unwrap(), vec!["alice"]);
        assert_eq!(relay.groups_of("alice").unwrap(), vec!["g1"]);
    }

    #[test]
    fn test_create_group_name_conflict() {
        let relay = relay_with(&["alice", "bob"]);
        relay.create_group("alice", "g1").unwrap();
        assert_eq!(
            relay.create_group("bob", "g1").unwrap_err(),
            RelayError::NameConflict {
                name: "g1".to_string()
            }
        );
        assert_eq!(relay.list_members("g1").unwrap(), vec!["alice"]);
    }

    #[test]
    fn test_create_group_requires_registered_creator() {
        let relay = Relay::default();
        assert!(matches!(
            relay.create_group("ghost", "g1").unwrap_err(),
            RelayError::ClientNotFound { .. }
        ));
        assert!(relay.list_groups().is_empty());
    }

    #[test]
    fn test_group_name_rules() {
        let relay = relay_with(&["alice"]);
        for bad in ["", " g1", "!back"] {
            assert!(matches!(
                relay.create_group("alice", bad).unwrap_err(),
                RelayError::InvalidName { .. }
            ));
        }
    }

    #[test]
    fn test_join_unknown_group_or_client() {
        let relay = relay_with(&["alice"]);
        assert!(matches!(
            relay.join_group("alice", "nope").unwrap_err(),
            RelayError::GroupNotFound { .. }
        ));
        relay.create_group("alice", "g1").unwrap();
        assert!(matches!(
            relay.join_group("ghost", "g1").unwrap_err(),
            RelayError::ClientNotFound { .. }
        ));
    }

    #[test]
    fn test_join_twice_is_noop() {
        let relay = relay_with(&["alice", "bob"]);
        relay.create_group("alice", "g1").unwrap();
        assert!(relay.join_group("bob", "g1").unwrap());
        assert!(!relay.join_group("bob", "g1").unwrap());
        assert_eq!(relay.list_members("g1").unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_join_then_leave_restores_snapshot() {
        let relay = relay_with(&["alice", "bob"]);
        relay.create_group("alice", "g1").unwrap();
        let before = relay.snapshot();

        relay.join_group("bob", "g1").unwrap();
        assert_ne!(relay.snapshot(), before);
        relay.leave_group("bob", "g1").unwrap();
        assert_eq!(relay.snapshot(), before);
    }

    #[test]
    fn test_last_member_leaving_destroys_group() {
        let relay = relay_with(&["alice"]);
        relay.create_group("alice", "g1").unwrap();
        assert!(relay.leave_group("alice", "g1").unwrap());
        assert!(relay.list_groups().is_empty());
        assert!(matches!(
            relay.list_members("g1").unwrap_err(),
            RelayError::GroupNotFound { .. }
        ));
        // The name is free again
        relay.create_group("alice", "g1").unwrap();
    }

    #[test]
    fn test_leave_scenario() {
        let relay = relay_with(&["alice", "bob"]);
        relay.create_group("alice", "g1").unwrap();
        relay.join_group("bob", "g1").unwrap();

        assert!(!relay.leave_group("bob", "g1").unwrap());
        assert_eq!(relay.list_members("g1").unwrap(), vec!["alice"]);

        assert!(relay.leave_group("alice", "g1").unwrap());
        assert!(relay.list_groups().is_empty());
    }

    #[test]
    fn test_leave_not_a_member() {
        let relay = relay_with(&["alice", "bob"]);
        relay.create_group("alice", "g1").unwrap();
        assert_eq!(
            relay.leave_group("bob", "g1").unwrap_err(),
            RelayError::NotAMember {
                client: "bob".to_string(),
                group: "g1".to_string()
            }
        );
        assert!(matches!(
            relay.leave_group("bob", "g2").unwrap_err(),
            RelayError::GroupNotFound { .. }
        ));
    }

    #[test]
    fn test_is_member_and_counts() {
        let relay = relay_with(&["alice", "bob"]);
        relay.create_group("alice", "g1").unwrap();
        assert!(relay.is_member("alice", "g1"));
        assert!(!relay.is_member("bob", "g1"));
        assert!(!relay.is_member("alice", "g2"));
        assert_eq!(relay.group_count(), 1);
    }
}
