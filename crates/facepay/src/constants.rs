use std::time::Duration;

use crate::amount::{Amount, Currency};
use crate::identity::AccountAddress;
use crate::reward::RewardRate;

/// Length of the biometric observation window.
pub const DEFAULT_BIOMETRIC_WINDOW_SECS: u64 = 5;

/// Longest biometric window a session accepts.
pub const MAX_BIOMETRIC_WINDOW_SECS: u64 = 300;

/// Bound on a single recognition oracle call.
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 10;

/// Bound on a single proximity or security check.
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 10;

/// Bound on the sponsored transfer call.
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 30;

/// Minimum oracle confidence for a candidate to count as a match.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.85;

/// Message shown while the terminal waits for a customer.
pub const READY_MESSAGE: &str = "Ready to scan customer";

/// Runtime configuration of one terminal session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Merchant account every attempt pays into.
    pub payee: AccountAddress,
    pub currency: Currency,
    pub biometric_window: Duration,
    pub oracle_timeout: Duration,
    pub check_timeout: Duration,
    pub transfer_timeout: Duration,
    pub reward_rate: RewardRate,
    /// Per-attempt ceiling. `None` disables the limit.
    pub max_payment_amount: Option<Amount>,
}

impl SessionConfig {
    /// Defaults for everything but the merchant address.
    pub fn new(payee: AccountAddress) -> Self {
        Self {
            payee,
            currency: Currency::Usdc,
            biometric_window: Duration::from_secs(DEFAULT_BIOMETRIC_WINDOW_SECS),
            oracle_timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
            check_timeout: Duration::from_secs(DEFAULT_CHECK_TIMEOUT_SECS),
            transfer_timeout: Duration::from_secs(DEFAULT_TRANSFER_TIMEOUT_SECS),
            reward_rate: RewardRate::ONE,
            max_payment_amount: None,
        }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    /// Capped at [`MAX_BIOMETRIC_WINDOW_SECS`].
    pub fn with_biometric_window(mut self, window: Duration) -> Self {
        self.biometric_window = window.min(Duration::from_secs(MAX_BIOMETRIC_WINDOW_SECS));
        self
    }

    pub fn with_reward_rate(mut self, rate: RewardRate) -> Self {
        self.reward_rate = rate;
        self
    }

    pub fn with_max_payment_amount(mut self, max: Amount) -> Self {
        self.max_payment_amount = Some(max);
        self
    }
}
