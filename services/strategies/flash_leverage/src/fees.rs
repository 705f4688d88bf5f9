//! # Fee Estimation - Protocol Premium and Execution Cost
//!
//! ## Purpose
//!
//! Computes the two costs a prospective flash loan must cover before it is requested:
//! the lending protocol premium and the execution cost of the whole operation, priced
//! from an injected gas price feed.
//!
//! ## Architecture Role
//!
//! ```text
//! PriceOracle.latest_round_data()  →  [Round Validation]  →  [Unit Conversion]  →  FeeEstimate
//!          ↓                                ↓                        ↓
//! Gas price in quoted unit        Positive answer          × oracle_scale (gwei → wei)
//! Update timestamp                Completed round          × gas_estimate
//! Round ids                       Freshness window         floor(amount × bps / 10000)
//! ```
//!
//! Oracle queries are read-only and retried on transient failures. A reading that is
//! non-positive, incomplete, carried over from an earlier round, or older than the
//! configured window is rejected as `OracleUnavailable` rather than priced.

use ethers::types::U256;
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::config::{FeeConfig, BPS_DENOMINATOR};
use crate::error::{LeverageError, Result};
use crate::interfaces::{PriceOracle, ProtocolError};
use crate::retry::{retry_read, RetryPolicy};
use crate::types::{FeeEstimate, RoundData};

/// `floor(value * bps / 10000)` without intermediate overflow.
pub fn mul_bps_floor(value: U256, bps: u32) -> U256 {
    let denominator = U256::from(BPS_DENOMINATOR);
    let bps = U256::from(bps);
    let quotient = value / denominator;
    let remainder = value % denominator;
    // bps <= 10000 keeps quotient * bps <= value
    quotient * bps + remainder * bps / denominator
}

/// Lending protocol premium for `amount`, floored.
pub fn protocol_fee(amount: U256, premium_bps: u32) -> U256 {
    mul_bps_floor(amount, premium_bps)
}

pub struct FeeEstimator {
    oracle: Arc<dyn PriceOracle>,
    clock: Arc<dyn Clock>,
    premium_bps: u32,
    gas_estimate: u64,
    oracle_scale: u64,
    max_age_secs: u64,
    read_policy: RetryPolicy,
}

impl FeeEstimator {
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn Clock>,
        config: &FeeConfig,
        read_policy: RetryPolicy,
    ) -> Self {
        Self {
            oracle,
            clock,
            premium_bps: config.premium_bps,
            gas_estimate: config.gas_estimate,
            oracle_scale: config.oracle_scale,
            max_age_secs: config.max_oracle_age_secs,
            read_policy,
        }
    }

    pub fn premium_bps(&self) -> u32 {
        self.premium_bps
    }

    /// Fetch the latest gas price and price a loan of `amount`.
    pub async fn estimate(&self, amount: U256) -> Result<FeeEstimate> {
        let oracle = self.oracle.clone();
        let round = retry_read("latest_round_data", self.read_policy, || {
            let oracle = oracle.clone();
            async move { oracle.latest_round_data().await }
        })
        .await
        .map_err(oracle_error)?;

        self.estimate_with_round(amount, &round)
    }

    /// Price a loan of `amount` against an already fetched round.
    pub fn estimate_with_round(&self, amount: U256, round: &RoundData) -> Result<FeeEstimate> {
        let gas_price = self.validated_gas_price(round)?;
        let execution_cost = gas_price
            .checked_mul(U256::from(self.oracle_scale))
            .and_then(|wei| wei.checked_mul(U256::from(self.gas_estimate)))
            .ok_or_else(|| LeverageError::OracleUnavailable {
                reason: format!("gas price {} overflows execution cost", gas_price),
            })?;

        let estimate = FeeEstimate {
            protocol_fee: protocol_fee(amount, self.premium_bps),
            execution_cost,
        };

        debug!(
            "{} Fee estimate for {}: protocol_fee={} execution_cost={} ({} × {} × {} gas)",
            crate::logging::LogEmoji::GAS,
            amount,
            estimate.protocol_fee,
            estimate.execution_cost,
            gas_price,
            self.oracle_scale,
            self.gas_estimate
        );

        Ok(estimate)
    }

    /// Gas price in the oracle's quoted unit, if the round is usable.
    fn validated_gas_price(&self, round: &RoundData) -> Result<U256> {
        if !round.answer.is_positive() {
            return Err(LeverageError::OracleUnavailable {
                reason: format!("non-positive answer {} in round {}", round.answer, round.round_id),
            });
        }
        if round.updated_at == 0 {
            return Err(LeverageError::OracleUnavailable {
                reason: format!("round {} is incomplete", round.round_id),
            });
        }
        if round.answered_in_round < round.round_id {
            return Err(LeverageError::OracleUnavailable {
                reason: format!(
                    "answer carried over from round {} into round {}",
                    round.answered_in_round, round.round_id
                ),
            });
        }

        let now = self.clock.now_secs();
        if round.updated_at > now {
            return Err(LeverageError::OracleUnavailable {
                reason: format!(
                    "round {} updated at {} is ahead of local time {}",
                    round.round_id, round.updated_at, now
                ),
            });
        }
        let age = now - round.updated_at;
        if age > self.max_age_secs {
            return Err(LeverageError::OracleUnavailable {
                reason: format!(
                    "stale reading: updated {}s ago (max {}s)",
                    age, self.max_age_secs
                ),
            });
        }

        Ok(round.answer.into_raw())
    }
}

fn oracle_error(err: ProtocolError) -> LeverageError {
    match err {
        ProtocolError::Timeout {
            operation,
            timeout_ms,
        } => LeverageError::Timeout {
            operation,
            timeout_ms,
        },
        other => LeverageError::OracleUnavailable {
            reason: other.to_string(),
        },
    }
}
