//! Signing wallet.
//!
//! Transactions are signed with HMAC-SHA256 over the serialized request. The
//! transaction id is the SHA-256 of request and signature, so two requests
//! that differ in any field never share an id.

use crate::chain::{SignedTransaction, TxRequest};
use dexbot_domain::{Address, TradingError, TxHash};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Holds the signing key. The key is wiped from memory on drop.
pub struct Wallet {
    key: Zeroizing<[u8; 32]>,
    address: Address,
}

impl Wallet {
    /// Builds a wallet from a 32-byte hex key, with or without `0x`.
    pub fn from_hex(secret: &str) -> Result<Self, TradingError> {
        let secret = Zeroizing::new(secret.trim().trim_start_matches("0x").to_string());
        let bytes = Zeroizing::new(
            hex::decode(secret.as_bytes())
                .map_err(|e| TradingError::Config(format!("invalid wallet key: {e}")))?,
        );
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            TradingError::Config(format!("wallet key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_key(key))
    }

    /// Fresh random wallet.
    pub fn random() -> Self {
        Self::from_key(rand::random::<[u8; 32]>())
    }

    fn from_key(key: [u8; 32]) -> Self {
        let key = Zeroizing::new(key);
        let digest = Sha256::digest(key.as_slice());
        let address = Address::from_slice(&digest[12..]);
        Self { key, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs `request`. Fails if the request is not from this wallet.
    pub fn sign(&self, request: TxRequest) -> Result<SignedTransaction, TradingError> {
        if request.from != self.address {
            return Err(TradingError::Validation(format!(
                "request from {:?} cannot be signed by {:?}",
                request.from, self.address
            )));
        }
        let encoded = serde_json::to_vec(&request)
            .map_err(|e| TradingError::Validation(format!("unencodable transaction: {e}")))?;

        let mut mac = HmacSha256::new_from_slice(self.key.as_slice())
            .map_err(|e| TradingError::Config(format!("wallet key rejected: {e}")))?;
        mac.update(&encoded);
        let signature = mac.finalize().into_bytes().to_vec();

        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        hasher.update(&signature);
        let hash = TxHash::from_slice(&hasher.finalize());

        Ok(SignedTransaction {
            request,
            signature,
            hash,
        })
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("key", &"<redacted>")
            .finish()
    }
}
