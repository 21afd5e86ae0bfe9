//! Property-based store invariant tests.
//!
//! Uses proptest to verify:
//! 1. A replaced `MessageStore` is always sorted ascending with unique ids.
//! 2. Inserting any delivery sequence twice yields the same store as once.
//! 3. `upsert_and_promote` keeps the touched conversation at the front and
//!    preserves the relative order of everyone else.
//! 4. Unread counters never underflow under arbitrary delta sequences.

use proptest::prelude::*;

use convosync::store::{ConversationStore, MessageStore};
use convosync_proto::message::{Message, MessageId, Participant, Timestamp, UserId};

// --- Strategies ---

/// Small id pool so collisions actually happen.
fn arb_message(ids: std::ops::Range<u32>) -> impl Strategy<Value = Message> {
    (ids, 0u64..10_000, "[a-z]{0,16}").prop_map(|(id, at, content)| Message {
        id: MessageId::new(format!("m{id}")),
        content,
        sender: Participant::new(UserId::new("u1"), "Pat"),
        receiver: UserId::new("admin"),
        attachments: Vec::new(),
        read: false,
        created_at: Timestamp::from_millis(at),
        read_at: None,
    })
}

fn arb_messages() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(arb_message(0..40), 0..60)
}

fn is_sorted_unique(messages: &[Message]) -> bool {
    messages.windows(2).all(|pair| {
        let ordered = pair[0].created_at < pair[1].created_at
            || (pair[0].created_at == pair[1].created_at
                && pair[0].id.as_str() <= pair[1].id.as_str());
        ordered && pair[0].id != pair[1].id
    })
}

proptest! {
    #[test]
    fn replace_always_yields_sorted_unique_store(messages in arb_messages()) {
        let mut store = MessageStore::new();
        store.replace(messages.clone());

        prop_assert!(is_sorted_unique(store.messages()));

        let unique: std::collections::HashSet<_> =
            messages.iter().map(|m| m.id.clone()).collect();
        prop_assert_eq!(store.len(), unique.len());
    }

    #[test]
    fn double_delivery_changes_nothing(messages in arb_messages()) {
        let mut once = MessageStore::new();
        for msg in &messages {
            once.insert_if_absent(msg.clone());
        }

        let mut twice = MessageStore::new();
        for msg in messages.iter().chain(messages.iter()) {
            twice.insert_if_absent(msg.clone());
        }

        prop_assert_eq!(once.messages(), twice.messages());
        prop_assert!(is_sorted_unique(once.messages()));
    }

    #[test]
    fn insertion_order_never_affects_final_order(messages in arb_messages()) {
        // Work with one message per id; the duplicate case is covered by
        // double_delivery_changes_nothing above.
        let mut seen = std::collections::HashSet::new();
        let unique: Vec<Message> = messages
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();

        let mut forward = MessageStore::new();
        for msg in &unique {
            forward.insert_if_absent(msg.clone());
        }

        let mut backward = MessageStore::new();
        for msg in unique.iter().rev() {
            backward.insert_if_absent(msg.clone());
        }

        prop_assert_eq!(forward.messages(), backward.messages());
    }

    #[test]
    fn promotion_preserves_relative_order_of_others(
        keys in prop::collection::hash_set("[a-e]", 1..6),
        touched in "[a-e]",
    ) {
        let mut store = ConversationStore::new();
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            let msg = Message {
                id: MessageId::new(format!("seed-{key}")),
                content: "seed".into(),
                sender: Participant::new(UserId::new(key.clone()), "X"),
                receiver: UserId::new("admin"),
                attachments: Vec::new(),
                read: false,
                created_at: Timestamp::from_millis(i as u64),
                read_at: None,
            };
            store.upsert_and_promote(&UserId::new(key.clone()), msg.sender.clone(), &msg);
        }
        let before: Vec<String> = store
            .summaries()
            .iter()
            .map(|s| s.user.id.as_str().to_string())
            .collect();

        let msg = Message {
            id: MessageId::new("touch"),
            content: "touch".into(),
            sender: Participant::new(UserId::new(touched.clone()), "X"),
            receiver: UserId::new("admin"),
            attachments: Vec::new(),
            read: false,
            created_at: Timestamp::from_millis(99_999),
            read_at: None,
        };
        store.upsert_and_promote(&UserId::new(touched.clone()), msg.sender.clone(), &msg);

        let after: Vec<String> = store
            .summaries()
            .iter()
            .map(|s| s.user.id.as_str().to_string())
            .collect();

        prop_assert_eq!(after[0].clone(), touched.clone());
        let rest: Vec<String> = after.iter().skip(1).cloned().collect();
        let expected: Vec<String> = before.iter().filter(|k| **k != touched).cloned().collect();
        prop_assert_eq!(rest, expected);
    }

    #[test]
    fn unread_counter_never_underflows(deltas in prop::collection::vec(-3i64..4, 0..50)) {
        let mut store = ConversationStore::new();
        let msg = Message {
            id: MessageId::new("seed"),
            content: "seed".into(),
            sender: Participant::new(UserId::new("u1"), "Pat"),
            receiver: UserId::new("admin"),
            attachments: Vec::new(),
            read: false,
            created_at: Timestamp::from_millis(0),
            read_at: None,
        };
        store.upsert_and_promote(&UserId::new("u1"), msg.sender.clone(), &msg);

        let mut expected: i64 = 0;
        for delta in deltas {
            store.adjust_unread(&UserId::new("u1"), delta);
            expected = (expected + delta).max(0);
        }
        prop_assert_eq!(
            i64::from(store.get(&UserId::new("u1")).unwrap().unread_count),
            expected
        );
    }
}
