//! Wallet collaborator seam.
//!
//! The wallet owns the user's address and produces the signature presented
//! to the relay. Wallet extensions report a transient "account changed"
//! error while they switch accounts, so address retrieval is retried a
//! bounded number of times.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::Result;
use crate::protocol::Signature;
use crate::room::{Address, RoomId};
use crate::storage::{Credential, Database};

/// Failure reported by the wallet collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The wallet switched accounts mid-request. Transient.
    #[error("account changed")]
    AccountChanged,

    /// The user declined the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// No wallet could be reached.
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}

impl WalletError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, WalletError::AccountChanged)
    }
}

/// Address and signature provider.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// The wallet's current address.
    async fn address(&self) -> std::result::Result<Address, WalletError>;

    /// Sign the room binding for `address`.
    async fn sign(
        &self,
        room: &RoomId,
        address: &Address,
    ) -> std::result::Result<Signature, WalletError>;
}

/// Bounded retry schedule for transient wallet failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Fetch the wallet address, retrying transient failures per `policy`.
pub async fn address_with_retry(
    wallet: &dyn Wallet,
    policy: RetryPolicy,
) -> std::result::Result<Address, WalletError> {
    let mut attempt = 0;
    loop {
        match wallet.address().await {
            Ok(address) => return Ok(address),
            Err(e) if e.is_transient() && attempt < policy.retries => {
                attempt += 1;
                tracing::warn!(
                    attempt = attempt,
                    retries = policy.retries,
                    "Wallet account changed, retrying address lookup"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Credential for `room`, reusing the cached signature when it was made by
/// the same address.
pub async fn credential(
    wallet: &dyn Wallet,
    db: &Database,
    room: &RoomId,
    address: &Address,
) -> Result<Credential> {
    if let Some(cached) = db.cached_credential(room)? {
        if &cached.address == address {
            tracing::debug!(room = %room, "Reusing cached room credential");
            return Ok(cached);
        }
        tracing::info!(room = %room, "Cached credential belongs to another address, re-signing");
    }

    let signature = wallet.sign(room, address).await?;
    let credential = Credential {
        address: address.clone(),
        signature,
    };
    db.store_credential(room, &credential)?;
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct FlakyWallet {
        failures: Mutex<u32>,
        address_calls: Mutex<u32>,
        sign_calls: Mutex<u32>,
        error: WalletError,
    }

    impl FlakyWallet {
        fn new(failures: u32, error: WalletError) -> Self {
            Self {
                failures: Mutex::new(failures),
                address_calls: Mutex::new(0),
                sign_calls: Mutex::new(0),
                error,
            }
        }
    }

    #[async_trait]
    impl Wallet for FlakyWallet {
        async fn address(&self) -> std::result::Result<Address, WalletError> {
            *self.address_calls.lock() += 1;
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(self.error.clone());
            }
            Ok(Address::new("addr1alice"))
        }

        async fn sign(
            &self,
            room: &RoomId,
            address: &Address,
        ) -> std::result::Result<Signature, WalletError> {
            *self.sign_calls.lock() += 1;
            Ok(json!(format!("signed:{room}:{address}")))
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            retries: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_account_change() {
        let wallet = FlakyWallet::new(2, WalletError::AccountChanged);
        let address = address_with_retry(&wallet, fast()).await.unwrap();
        assert_eq!(address, Address::new("addr1alice"));
        assert_eq!(*wallet.address_calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let wallet = FlakyWallet::new(10, WalletError::AccountChanged);
        let err = address_with_retry(&wallet, fast()).await.unwrap_err();
        assert_eq!(err, WalletError::AccountChanged);
        // first attempt plus three retries
        assert_eq!(*wallet.address_calls.lock(), 4);
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let wallet = FlakyWallet::new(1, WalletError::Rejected("user said no".into()));
        let err = address_with_retry(&wallet, fast()).await.unwrap_err();
        assert!(matches!(err, WalletError::Rejected(_)));
        assert_eq!(*wallet.address_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_credential_is_cached_per_room() {
        let db = Database::open(None).unwrap();
        let wallet = FlakyWallet::new(0, WalletError::AccountChanged);
        let room = RoomId::between("addr1alice", "addr1bob").unwrap();
        let alice = Address::new("addr1alice");

        let first = credential(&wallet, &db, &room, &alice).await.unwrap();
        let second = credential(&wallet, &db, &room, &alice).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(*wallet.sign_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_credential_resigns_for_new_address() {
        let db = Database::open(None).unwrap();
        let wallet = FlakyWallet::new(0, WalletError::AccountChanged);
        let room = RoomId::between("addr1alice", "addr1bob").unwrap();

        credential(&wallet, &db, &room, &Address::new("addr1alice"))
            .await
            .unwrap();
        let bob = credential(&wallet, &db, &room, &Address::new("addr1bob"))
            .await
            .unwrap();
        assert_eq!(bob.address, Address::new("addr1bob"));
        assert_eq!(*wallet.sign_calls.lock(), 2);
    }
}
