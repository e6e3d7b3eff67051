use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use relaychat_core::error::RelayError;
use relaychat_core::relay::{Mailbox, Relay};

const CLIENTS: [&str; 4] = ["ann", "bob", "cat", "dan"];
const GROUPS: [&str; 3] = ["g0", "g1", "g2"];

#[derive(Debug, Clone)]
enum Op {
    Register(usize),
    Unregister(usize),
    Create(usize, usize),
    Join(usize, usize),
    Leave(usize, usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let client = 0..CLIENTS.len();
    let group = 0..GROUPS.len();
    prop_oneof![
        client.clone().prop_map(Op::Register),
        client.clone().prop_map(Op::Unregister),
        (client.clone(), group.clone()).prop_map(|(c, g)| Op::Create(c, g)),
        (client.clone(), group.clone()).prop_map(|(c, g)| Op::Join(c, g)),
        (client, group).prop_map(|(c, g)| Op::Leave(c, g)),
    ]
}

/// Apply `op`, keeping the mailboxes of registered clients alive
fn apply(relay: &Relay, mailboxes: &mut HashMap<&'static str, Mailbox>, op: &Op) {
    match *op {
        Op::Register(c) => {
            let name = CLIENTS[c];
            match relay.register(name) {
                Ok(mailbox) => {
                    assert!(mailboxes.insert(name, mailbox).is_none());
                }
                Err(e) => {
                    assert!(matches!(e, RelayError::NameConflict { .. }));
                    assert!(mailboxes.contains_key(name));
                }
            }
        }
        Op::Unregister(c) => {
            let name = CLIENTS[c];
            let removed = relay.unregister(name).is_ok();
            assert_eq!(removed, mailboxes.remove(name).is_some());
        }
        Op::Create(c, g) => {
            let _ = relay.create_group(CLIENTS[c], GROUPS[g]);
        }
        Op::Join(c, g) => {
            let _ = relay.join_group(CLIENTS[c], GROUPS[g]);
        }
        Op::Leave(c, g) => {
            let _ = relay.leave_group(CLIENTS[c], GROUPS[g]);
        }
    }
}

proptest! {
    /// Registered names stay unique and match the clients we think exist.
    #[test]
    fn names_never_duplicate(ops in prop::collection::vec(arb_op(), 0..64)) {
        let relay = Relay::default();
        let mut mailboxes = HashMap::new();
        for op in &ops {
            apply(&relay, &mut mailboxes, op);
            let names = relay.list_clients();
            let unique: BTreeSet<&String> = names.iter().collect();
            prop_assert_eq!(unique.len(), names.len());
            prop_assert_eq!(names.len(), mailboxes.len());
        }
    }

    /// No group is ever observable without members, and both sides of
    /// every membership edge agree.
    #[test]
    fn graph_stays_consistent(ops in prop::collection::vec(arb_op(), 0..64)) {
        let relay = Relay::default();
        let mut mailboxes = HashMap::new();
        for op in &ops {
            apply(&relay, &mut mailboxes, op);
            let snapshot = relay.snapshot();
            prop_assert!(snapshot.is_consistent(), "inconsistent after {:?}: {:?}", op, snapshot);
            for group in relay.list_groups() {
                prop_assert!(!relay.list_members(&group).unwrap().is_empty());
            }
        }
    }

    /// A join followed by a leave puts the graph back the way it was.
    #[test]
    fn join_then_leave_restores(ops in prop::collection::vec(arb_op(), 0..32), c in 0..CLIENTS.len(), g in 0..GROUPS.len()) {
        let relay = Relay::default();
        let mut mailboxes = HashMap::new();
        for op in &ops {
            apply(&relay, &mut mailboxes, op);
        }

        let (client, group) = (CLIENTS[c], GROUPS[g]);
        let before = relay.snapshot();
        if relay.join_group(client, group) == Ok(true) {
            relay.leave_group(client, group).unwrap();
            prop_assert_eq!(relay.snapshot(), before);
        }
    }
}
