//! Pre-flight risk gate
//!
//! Pure check run before any external call that moves value. The position limit is
//! evaluated first so an oversized request is rejected regardless of fees.

use ethers::types::U256;

use crate::config::{ConfigError, RiskConfig};
use crate::error::{LeverageError, Result};
use crate::fees::mul_bps_floor;
use crate::types::FeeEstimate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskGate {
    max_position_bps: u32,
}

impl RiskGate {
    pub fn new(config: &RiskConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            max_position_bps: config.max_position_bps()?,
        })
    }

    pub fn max_position_bps(&self) -> u32 {
        self.max_position_bps
    }

    /// Largest amount allowed against `balance`: `floor(balance × ratio)`.
    ///
    /// For integer amounts `amount <= floor(balance × ratio)` is exactly
    /// `amount <= balance × ratio`.
    pub fn position_limit(&self, balance: U256) -> U256 {
        mul_bps_floor(balance, self.max_position_bps)
    }

    /// Position limit alone; needs no fee estimate.
    pub fn check_limit(&self, balance: U256, amount: U256) -> Result<()> {
        let limit = self.position_limit(balance);
        if amount > limit {
            return Err(LeverageError::AmountExceedsLimit {
                amount,
                limit,
                balance,
            });
        }
        Ok(())
    }

    pub fn check(&self, balance: U256, amount: U256, fees: &FeeEstimate) -> Result<()> {
        self.check_limit(balance, amount)?;

        match fees.required_balance(amount) {
            Some(required) if required <= balance => Ok(()),
            Some(required) => Err(LeverageError::InsufficientFunds {
                required,
                available: balance,
            }),
            None => Err(LeverageError::InsufficientFunds {
                required: U256::MAX,
                available: balance,
            }),
        }
    }
}
