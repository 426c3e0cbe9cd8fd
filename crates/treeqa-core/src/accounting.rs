//! Per-episode counters: tokens consumed and subtrees repaired.
//!
//! Both counters only grow. Each question owns its own `Accounting`; nothing
//! here is shared across questions in a batch.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Accounting {
    tokens: AtomicU64,
    fixes: AtomicU64,
    calls: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingSnapshot {
    pub tokens: u64,
    pub fixes: u64,
    pub calls: u64,
}

impl Accounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed model call and its token cost.
    pub fn add_call(&self, tokens: u64) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.fetch_add(tokens, Ordering::SeqCst);
    }

    pub fn record_fix(&self) {
        self.fixes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }

    pub fn fixes(&self) -> u64 {
        self.fixes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> AccountingSnapshot {
        AccountingSnapshot {
            tokens: self.tokens(),
            fixes: self.fixes(),
            calls: self.calls(),
        }
    }
}

impl AccountingSnapshot {
    /// Counter growth since `earlier`.
    pub fn since(&self, earlier: &AccountingSnapshot) -> AccountingSnapshot {
        AccountingSnapshot {
            tokens: self.tokens.saturating_sub(earlier.tokens),
            fixes: self.fixes.saturating_sub(earlier.fixes),
            calls: self.calls.saturating_sub(earlier.calls),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_deltas_between_snapshots() {
        let acc = Accounting::new();
        acc.add_call(120);
        let before = acc.snapshot();
        acc.add_call(30);
        acc.record_fix();
        let delta = acc.snapshot().since(&before);
        assert_eq!(delta, AccountingSnapshot { tokens: 30, fixes: 1, calls: 1 });
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_not_lost() {
        let acc = Arc::new(Accounting::new());
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let acc = Arc::clone(&acc);
            set.spawn(async move { acc.add_call(5) });
        }
        while set.join_next().await.is_some() {}
        assert_eq!(acc.tokens(), 80);
        assert_eq!(acc.calls(), 16);
    }
}
