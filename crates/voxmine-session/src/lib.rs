//! Player sessions for Voxmine.
//!
//! A [`PlayerSession`] is the server's record of one connected player:
//! identity, tier, position, earnings, and anti-cheat state. It is owned
//! by exactly one party at a time (the gatekeeper while pending, then a
//! room) and moves between them by value.
//!
//! The crate also holds the stake-to-tier mapping and the
//! [`BalanceLookup`] seam to whatever knows a wallet's stake.

mod balance;
mod error;
mod session;
mod tier;

pub use balance::{BalanceLookup, StaticBalanceLookup, WALLET_LENGTH, WALLET_PREFIX, validate_wallet};
pub use error::SessionError;
pub use session::{
    Outbound, PendingInput, PlayerReceiver, PlayerSender, PlayerSession, SessionConfig,
    SessionPhase, outbound_channel,
};
pub use tier::TierThresholds;
