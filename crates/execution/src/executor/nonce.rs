//! Serialized nonce sequence for one account.

use dexbot_domain::{Address, TradingError, TxHash};
use dexbot_protocols::{ChainClient, RetryPolicy};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Hands out nonces one submission at a time.
///
/// The lock is held from nonce read through submission. The cached value only
/// advances when a submission succeeds and is dropped after a failure so the
/// next submission resyncs from chain.
pub struct NonceManager {
    address: Address,
    chain: Arc<dyn ChainClient>,
    retry: RetryPolicy,
    next: Mutex<Option<u64>>,
}

impl NonceManager {
    pub fn new(address: Address, chain: Arc<dyn ChainClient>, retry: RetryPolicy) -> Self {
        Self {
            address,
            chain,
            retry,
            next: Mutex::new(None),
        }
    }

    /// Runs `submit` with the next nonce inside the account's critical section.
    pub async fn submit_with<F, Fut>(&self, submit: F) -> Result<(u64, TxHash), TradingError>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<TxHash, TradingError>>,
    {
        let mut next = self.next.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => {
                let nonce = self
                    .retry
                    .run("get_nonce", || self.chain.get_nonce(self.address))
                    .await?;
                debug!(account = ?self.address, nonce, "Nonce synced from chain");
                nonce
            }
        };

        match submit(nonce).await {
            Ok(hash) => {
                *next = Some(nonce + 1);
                Ok((nonce, hash))
            }
            Err(e) => {
                warn!(account = ?self.address, nonce, error = %e, "Submission failed, nonce will resync");
                *next = None;
                Err(e)
            }
        }
    }

    /// Cached next nonce, if synced.
    pub async fn peek(&self) -> Option<u64> {
        *self.next.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexbot_protocols::PaperChain;

    #[tokio::test]
    async fn test_advances_only_on_success() {
        let chain = Arc::new(PaperChain::new());
        let nonces = NonceManager::new(Address::repeat_byte(5), chain, RetryPolicy::none());

        let (nonce, _) = nonces
            .submit_with(|n| async move { Ok(TxHash::from_low_u64_be(n + 1)) })
            .await
            .unwrap();
        assert_eq!(nonce, 0);
        assert_eq!(nonces.peek().await, Some(1));

        let err = nonces
            .submit_with(|_| async { Err(TradingError::network("send_swap", "reset")) })
            .await;
        assert!(err.is_err());
        assert_eq!(nonces.peek().await, None);

        // resynced from chain, which never saw a transaction
        let (nonce, _) = nonces
            .submit_with(|n| async move { Ok(TxHash::from_low_u64_be(n + 1)) })
            .await
            .unwrap();
        assert_eq!(nonce, 0);
    }
}
