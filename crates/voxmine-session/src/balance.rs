//! Wallet validation and the balance lookup seam.
//!
//! Voxmine does not talk to a chain itself. Whatever knows how much a
//! wallet has staked plugs in through [`BalanceLookup`]; the server only
//! needs a non-negative number back.

use std::collections::HashMap;
use std::future::Future;

use crate::SessionError;

/// Every wallet reference starts with this.
pub const WALLET_PREFIX: &str = "0x";

/// Total length of a wallet reference, prefix included.
pub const WALLET_LENGTH: usize = 42;

/// Checks the shape of a wallet reference. Ownership is not verified.
pub fn validate_wallet(wallet: &str) -> Result<(), SessionError> {
    if wallet.len() == WALLET_LENGTH && wallet.starts_with(WALLET_PREFIX) {
        Ok(())
    } else {
        Err(SessionError::InvalidWallet(wallet.to_string()))
    }
}

/// Resolves a wallet to its current stake.
///
/// Called once per login attempt, outside any lock. Implementations may
/// take as long as they need; other sessions keep playing meanwhile.
pub trait BalanceLookup: Send + Sync + 'static {
    fn stake_of(
        &self,
        wallet: &str,
    ) -> impl Future<Output = Result<f64, SessionError>> + Send;
}

/// A fixed table of stakes with a fallback for unknown wallets.
#[derive(Debug, Clone, Default)]
pub struct StaticBalanceLookup {
    default: f64,
    balances: HashMap<String, f64>,
}

impl StaticBalanceLookup {
    /// Every wallet not in the table has `default` staked.
    pub fn new(default: f64) -> Self {
        Self {
            default,
            balances: HashMap::new(),
        }
    }

    pub fn with_balance(mut self, wallet: impl Into<String>, stake: f64) -> Self {
        self.balances.insert(wallet.into(), stake);
        self
    }
}

impl BalanceLookup for StaticBalanceLookup {
    async fn stake_of(&self, wallet: &str) -> Result<f64, SessionError> {
        Ok(self.balances.get(wallet).copied().unwrap_or(self.default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(fill: char) -> String {
        format!("0x{}", fill.to_string().repeat(40))
    }

    #[test]
    fn test_validate_wallet_accepts_prefixed_42_chars() {
        assert!(validate_wallet(&wallet('a')).is_ok());
    }

    #[test]
    fn test_validate_wallet_rejects_bad_shapes() {
        assert!(validate_wallet("").is_err());
        assert!(validate_wallet("0x1234").is_err());
        assert!(validate_wallet(&format!("1x{}", "a".repeat(40))).is_err());
        assert!(validate_wallet(&format!("0x{}", "a".repeat(41))).is_err());
    }

    #[tokio::test]
    async fn test_static_lookup_uses_table_then_default() {
        let lookup = StaticBalanceLookup::new(5.0).with_balance(wallet('b'), 2500.0);
        assert_eq!(lookup.stake_of(&wallet('b')).await.unwrap(), 2500.0);
        assert_eq!(lookup.stake_of(&wallet('c')).await.unwrap(), 5.0);
    }
}
