//! # Chat Store
//!
//! A persistent, case-insensitive, indexed chat repository with many-to-many
//! topic associations and recency-ordered multi-topic queries (spec §4.1).
//!
//! [`ChatStore`] is a trait so the server protocol engine can be exercised
//! against a lightweight in-memory store in unit tests without paying for
//! SQLite, while [`sqlite::SqliteChatStore`] is the persistent implementation
//! used in production.

pub mod sqlite;

pub use sqlite::SqliteChatStore;

use crate::error::StoreError;
use std::ops::ControlFlow;

/// One stored chat message, as returned by [`ChatStore::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: i64,
    pub user: String,
    pub room: String,
    pub message: String,
    pub created_at_millis: i64,
    /// Distinct topics in first-occurrence (insertion) order.
    pub topics: Vec<String>,
}

/// The persistent chat repository abstraction (spec §4.1/§9 "Store").
pub trait ChatStore: Send + Sync {
    /// Atomically insert one message and its deduplicated topic set.
    /// `topics` need not be pre-deduplicated or lower-cased; the store does
    /// both, preserving first-occurrence order.
    fn add(
        &self,
        user: &str,
        room: &str,
        topics: &[String],
        message: &str,
    ) -> Result<(), StoreError>;

    /// Number of messages whose room matches `room` case-insensitively.
    fn count_room(&self, room: &str) -> Result<usize, StoreError>;

    /// Number of messages associated with `topic` case-insensitively.
    fn count_topic(&self, topic: &str) -> Result<usize, StoreError>;

    /// Stream up to `limit` messages in `room` carrying every topic in
    /// `topics` (AND), most recent first, invoking `sink` once per match.
    /// Iteration halts early if `sink` returns [`ControlFlow::Break`].
    fn query(
        &self,
        room: &str,
        topics: &[String],
        limit: usize,
        sink: &mut dyn FnMut(ChatRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError>;

    /// The most recent error message, if any store operation has failed.
    fn last_error(&self) -> Option<String>;
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use std::ops::ControlFlow;

    fn collect_query(
        store: &dyn ChatStore,
        room: &str,
        topics: &[String],
        limit: usize,
    ) -> Vec<ChatRecord> {
        let mut out = Vec::new();
        store
            .query(room, topics, limit, &mut |r| {
                out.push(r);
                ControlFlow::Continue(())
            })
            .unwrap();
        out
    }

    fn topics(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    /// Law 1: query returns the sublist of ADDed messages matching room and
    /// all requested topics, most recent first.
    #[test]
    fn query_returns_matching_messages_most_recent_first() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        store
            .add("@zdu", "Sysprog", &topics(&["db", "sqlite"]), "first")
            .unwrap();
        store
            .add("@amit", "Sysprog", &topics(&["db"]), "second")
            .unwrap();
        store
            .add("@zdu", "other-room", &topics(&["db"]), "third")
            .unwrap();

        let results = collect_query(&store, "sysprog", &topics(&["db"]), 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].message, "second");
        assert_eq!(results[1].message, "first");
    }

    /// Law 2: repeated topics in a query are equivalent to the topic once.
    #[test]
    fn repeated_query_topic_is_idempotent() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        store
            .add("@zdu", "sysprog", &topics(&["db"]), "hello")
            .unwrap();

        let once = collect_query(&store, "sysprog", &topics(&["db"]), 10);
        let repeated = collect_query(&store, "sysprog", &topics(&["db", "db", "DB"]), 10);
        assert_eq!(once, repeated);
    }

    /// Law 3: duplicate topics on add are deduplicated, preserving
    /// first-occurrence order.
    #[test]
    fn duplicate_add_topics_are_deduplicated_preserving_order() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        store
            .add("@zdu", "sysprog", &topics(&["db", "sqlite", "db", "SQLite"]), "m")
            .unwrap();

        let results = collect_query(&store, "sysprog", &[], 10);
        assert_eq!(results[0].topics, vec!["db".to_string(), "sqlite".to_string()]);
    }

    /// Law 4: count_room / count_topic match the case-insensitive definition.
    #[test]
    fn counts_are_case_insensitive() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        store.add("@a", "Sysprog", &topics(&["Db"]), "m1").unwrap();
        store.add("@b", "sysprog", &topics(&["DB"]), "m2").unwrap();
        store.add("@c", "other", &topics(&["pipe"]), "m3").unwrap();

        assert_eq!(store.count_room("SYSPROG").unwrap(), 2);
        assert_eq!(store.count_room("sysprog").unwrap(), 2);
        assert_eq!(store.count_topic("db").unwrap(), 2);
        assert_eq!(store.count_topic("DB").unwrap(), 2);
        assert_eq!(store.count_room("nonexistent").unwrap(), 0);
    }

    /// Law 5/8: messages with embedded newlines and surrounding whitespace
    /// are retrievable verbatim.
    #[test]
    fn message_round_trips_verbatim_with_embedded_whitespace() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        let message = "  leading and trailing  \nwith an embedded newline\n";
        store.add("@zdu", "sysprog", &[], message).unwrap();

        let results = collect_query(&store, "sysprog", &[], 10);
        assert_eq!(results[0].message, message);
    }

    #[test]
    fn multi_topic_and_matches_only_messages_with_all_topics() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        store
            .add("@a", "sysprog", &topics(&["unix", "pipe"]), "m1")
            .unwrap();
        store
            .add("@b", "sysprog", &topics(&["unix", "db"]), "m2")
            .unwrap();

        let results = collect_query(&store, "sysprog", &topics(&["unix", "pipe"]), 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "m1");
    }

    #[test]
    fn query_sink_can_stop_early() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .add("@a", "sysprog", &[], &format!("m{i}"))
                .unwrap();
        }
        let mut seen = 0;
        store
            .query("sysprog", &[], 100, &mut |_| {
                seen += 1;
                if seen == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn query_respects_limit() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .add("@a", "sysprog", &[], &format!("m{i}"))
                .unwrap();
        }
        let results = collect_query(&store, "sysprog", &[], 2);
        assert_eq!(results.len(), 2);
    }

    /// Exercises the per-call (uncached) join path for nTopics >= 4.
    /// S1: stored `user`/`room` are lower-cased regardless of the case they
    /// were added with.
    #[test]
    fn add_lower_cases_user_and_room_for_storage() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        store
            .add("@ZDU", "Sysprog", &topics(&["db", "sqlite", "db"]), "sqlite is pretty cool")
            .unwrap();

        let results = collect_query(&store, "sysprog", &topics(&["db"]), 10);
        assert_eq!(results[0].user, "@zdu");
        assert_eq!(results[0].room, "sysprog");
        assert_eq!(results[0].topics, vec!["db".to_string(), "sqlite".to_string()]);
    }

    #[test]
    fn query_with_many_topics_uses_uncached_join() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        let many = topics(&["a", "b", "c", "d", "e"]);
        store.add("@a", "sysprog", &many, "matches").unwrap();
        store
            .add("@b", "sysprog", &topics(&["a", "b", "c", "d"]), "no match")
            .unwrap();

        let results = collect_query(&store, "sysprog", &many, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "matches");
    }
}
