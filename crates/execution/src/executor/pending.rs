//! Claimed decisions and in-flight transactions.

use dexbot_domain::TxHash;
use dexbot_domain::entities::{DecisionId, PendingTransaction};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct BookState {
    claimed: HashSet<DecisionId>,
    pending: HashMap<TxHash, PendingTransaction>,
}

/// Both sets sit behind one lock; readers get copies.
///
/// A claim lives while its decision is being submitted or is pending. Once
/// the transaction settles the claim goes, and the store's submitted-decision
/// record keeps rejecting repeats.
#[derive(Debug, Default)]
pub struct PendingBook {
    state: Mutex<BookState>,
}

impl PendingBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `decision`. Returns `false` if it was already claimed.
    pub async fn claim(&self, decision: DecisionId) -> bool {
        self.state.lock().await.claimed.insert(decision)
    }

    pub async fn insert(&self, pending: PendingTransaction) {
        let mut state = self.state.lock().await;
        state.claimed.insert(pending.decision_ref);
        state.pending.insert(pending.tx_id, pending);
    }

    /// Drops the claim of a decision that never reached the chain.
    pub async fn release(&self, decision: DecisionId) {
        self.state.lock().await.claimed.remove(&decision);
    }

    pub async fn is_claimed(&self, decision: DecisionId) -> bool {
        self.state.lock().await.claimed.contains(&decision)
    }

    /// Takes a transaction out of the book with its claim. Only one caller
    /// gets it.
    pub async fn take(&self, tx_id: TxHash) -> Option<PendingTransaction> {
        let mut state = self.state.lock().await;
        let pending = state.pending.remove(&tx_id)?;
        state.claimed.remove(&pending.decision_ref);
        Some(pending)
    }

    /// In-flight transactions ordered by nonce.
    pub async fn snapshot(&self) -> Vec<PendingTransaction> {
        let mut pending: Vec<PendingTransaction> =
            self.state.lock().await.pending.values().cloned().collect();
        pending.sort_by_key(|p| p.nonce);
        pending
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_once() {
        let book = PendingBook::new();
        let id = DecisionId::new();
        assert!(book.claim(id).await);
        assert!(!book.claim(id).await);
        assert!(book.claim(DecisionId::new()).await);

        book.release(id).await;
        assert!(!book.is_claimed(id).await);
    }
}
