//! Pending web-search approvals, keyed by stream id
//!
//! An explicit registry with oneshot semantics instead of ambient global
//! state, so approvals are testable in isolation and cleaned up when a
//! stream ends. At most one approval is pending per stream.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Result of resolving (or failing to resolve) an approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApprovalOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn no_pending() -> Self {
        Self {
            success: false,
            error: Some("No pending web search request for this stream.".to_string()),
        }
    }
}

/// Registry of unresolved approvals
#[derive(Default)]
pub struct ApprovalRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending approval for a stream, returning the receiver
    /// the stream waits on. Replaces any approval already pending for the
    /// same stream (the old receiver sees a closed channel).
    pub fn register(&self, stream_id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(stream_id.to_string(), tx);
        rx
    }

    /// Resolve a pending approval with the operator's decision
    pub fn resolve(&self, stream_id: &str, approved: bool) -> ApprovalOutcome {
        match self.pending.lock().remove(stream_id) {
            Some(tx) => {
                // The waiting stream may have been cancelled already; a
                // dead receiver is not an error worth surfacing.
                let _ = tx.send(approved);
                ApprovalOutcome::ok()
            }
            None => ApprovalOutcome::no_pending(),
        }
    }

    /// Discard a pending approval without resolving it.
    /// Returns false when none existed.
    pub fn discard(&self, stream_id: &str) -> bool {
        self.pending.lock().remove(stream_id).is_some()
    }

    /// Whether a stream has an approval pending
    pub fn has_pending(&self, stream_id: &str) -> bool {
        self.pending.lock().contains_key(stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = ApprovalRegistry::new();
        let rx = registry.register("stream-1");

        let outcome = registry.resolve("stream-1", true);
        assert!(outcome.success);
        assert_eq!(rx.await, Ok(true));
        assert!(!registry.has_pending("stream-1"));
    }

    #[test]
    fn test_resolve_unknown_stream() {
        let registry = ApprovalRegistry::new();
        let outcome = registry.resolve("stream-404", true);
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("No pending web search request for this stream.")
        );
    }

    #[tokio::test]
    async fn test_discard() {
        let registry = ApprovalRegistry::new();
        let rx = registry.register("stream-2");

        assert!(registry.discard("stream-2"));
        assert!(!registry.discard("stream-2"));
        // The waiter sees a closed channel, not a decision.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_register_replaces_existing() {
        let registry = ApprovalRegistry::new();
        let old_rx = registry.register("stream-3");
        let new_rx = registry.register("stream-3");

        registry.resolve("stream-3", false);
        assert!(old_rx.await.is_err());
        assert_eq!(new_rx.await, Ok(false));
    }
}
