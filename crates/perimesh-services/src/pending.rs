//! In-flight requests, keyed by correlation id.
//!
//! Every entry is removed exactly once: by the matching reply, by the
//! caller giving up, or by the expiry sweep. Whoever removes it owns the
//! continuation; everyone else sees `false` and moves on.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use perimesh_core::MessageKind;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// How a pending request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// RESULT (or LIST) arrived.
    Results(Vec<Value>),
    /// ERROR arrived.
    Failed(String),
    /// Removed by the sweep after its deadline passed.
    Expired,
}

/// The reply kinds a request can be completed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// CALL: completed by RESULT or ERROR.
    Invocation,
    /// DISCOVER: completed by LIST.
    Listing,
}

impl Expect {
    pub fn accepts(self, kind: MessageKind) -> bool {
        match self {
            Expect::Invocation => matches!(kind, MessageKind::Result | MessageKind::Error),
            Expect::Listing => kind == MessageKind::List,
        }
    }
}

struct PendingRequest {
    continuation: oneshot::Sender<Outcome>,
    expects: Expect,
    created_at: Instant,
    deadline: Instant,
}

#[derive(Clone, Default)]
pub struct PendingTable {
    requests: Arc<DashMap<String, PendingRequest>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request. The receiver resolves when the entry is removed.
    pub fn register(
        &self,
        id: &str,
        expects: Expect,
        timeout: Duration,
    ) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        self.requests.insert(
            id.to_string(),
            PendingRequest {
                continuation: tx,
                expects,
                created_at: now,
                deadline: now + timeout,
            },
        );
        rx
    }

    /// Complete a request with a reply of kind `reply`. Returns false if
    /// nothing was waiting on `id` (late or duplicate reply) or the waiting
    /// request expects a different kind of reply, which leaves it pending.
    pub fn resolve(&self, id: &str, reply: MessageKind, outcome: Outcome) -> bool {
        let removed = self
            .requests
            .remove_if(id, |_, pending| pending.expects.accepts(reply));
        if removed.is_none() && self.requests.contains_key(id) {
            tracing::debug!(id, kind = %reply, "reply kind does not match the request, ignored");
        }
        Self::complete(removed, outcome)
    }

    fn complete(removed: Option<(String, PendingRequest)>, outcome: Outcome) -> bool {
        match removed {
            Some((id, pending)) => {
                tracing::trace!(
                    id = %id,
                    waited_ms = pending.created_at.elapsed().as_millis() as u64,
                    "pending request resolved"
                );
                // The caller may already have stopped listening.
                let _ = pending.continuation.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop a request without completing it. Used by a caller that timed out.
    pub fn cancel(&self, id: &str) -> bool {
        self.requests.remove(id).is_some()
    }

    /// Remove every request whose deadline has passed and fail it.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .requests
            .iter()
            .filter(|e| e.value().deadline <= now)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            if Self::complete(self.requests.remove(&id), Outcome::Expired) {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "expired pending requests");
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.requests.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_completes_and_removes() {
        let table = PendingTable::new();
        let rx = table.register("a", Expect::Invocation, Duration::from_secs(1));
        assert!(table.contains("a"));

        assert!(table.resolve("a", MessageKind::Result, Outcome::Results(vec![json!(1)])));
        assert_eq!(rx.await.unwrap(), Outcome::Results(vec![json!(1)]));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn second_resolution_is_a_no_op() {
        let table = PendingTable::new();
        let rx = table.register("a", Expect::Invocation, Duration::from_secs(1));
        assert!(table.resolve("a", MessageKind::Error, Outcome::Failed("first".into())));
        assert!(!table.resolve("a", MessageKind::Result, Outcome::Results(vec![])));
        assert!(!table.cancel("a"));
        assert_eq!(rx.await.unwrap(), Outcome::Failed("first".into()));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let table = PendingTable::new();
        assert!(!table.resolve("ghost", MessageKind::Result, Outcome::Results(vec![])));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_only_removes_expired_entries() {
        let table = PendingTable::new();
        let short = table.register("short", Expect::Invocation, Duration::from_millis(100));
        let _long = table.register("long", Expect::Listing, Duration::from_secs(10));

        assert_eq!(table.sweep_expired(), 0);
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(table.sweep_expired(), 1);

        assert_eq!(short.await.unwrap(), Outcome::Expired);
        assert!(table.contains("long"));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn mismatched_reply_kind_leaves_request_pending() {
        let table = PendingTable::new();
        let call = table.register("c", Expect::Invocation, Duration::from_secs(1));
        let discover = table.register("d", Expect::Listing, Duration::from_secs(1));

        assert!(!table.resolve("c", MessageKind::List, Outcome::Results(vec![json!(10)])));
        assert!(!table.resolve("d", MessageKind::Result, Outcome::Results(vec![])));
        assert!(!table.resolve("d", MessageKind::Error, Outcome::Failed("x".into())));
        assert_eq!(table.len(), 2);

        assert!(table.resolve("c", MessageKind::Error, Outcome::Failed("boom".into())));
        assert!(table.resolve("d", MessageKind::List, Outcome::Results(vec![json!(10)])));
        assert_eq!(call.await.unwrap(), Outcome::Failed("boom".into()));
        assert_eq!(discover.await.unwrap(), Outcome::Results(vec![json!(10)]));
    }

    #[tokio::test]
    async fn cancel_drops_the_continuation() {
        let table = PendingTable::new();
        let rx = table.register("a", Expect::Invocation, Duration::from_secs(1));
        assert!(table.cancel("a"));
        assert!(rx.await.is_err());
    }
}
