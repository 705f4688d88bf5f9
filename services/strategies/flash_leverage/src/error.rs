//! Error types for the flash leverage strategy
//!
//! Pre-flight rejections (`AmountExceedsLimit`, `InsufficientFunds`, `InvalidAmount`,
//! `OperationInFlight`) never touch external state. Callback failures
//! (`InvestmentFailed`, `BorrowingFailed`, `RepaymentFailed`) are only surfaced after
//! every applied effect has been compensated.

use ethers::types::{Address, U256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeverageError {
    #[error("amount {amount} exceeds position limit {limit} (balance {balance})")]
    AmountExceedsLimit {
        amount: U256,
        limit: U256,
        balance: U256,
    },

    #[error("insufficient funds: need {required} (amount + protocol fee + execution cost), have {available}")]
    InsufficientFunds { required: U256, available: U256 },

    #[error("invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("operation already in flight for asset {asset:?} on pool {pool:?}")]
    OperationInFlight { asset: Address, pool: Address },

    #[error("unauthorized callback: {reason}")]
    Unauthorized { reason: String },

    #[error("investment failed: {reason}")]
    InvestmentFailed { reason: String },

    #[error("borrowing failed: {reason}")]
    BorrowingFailed { reason: String },

    #[error("repayment approval failed: {reason}")]
    RepaymentFailed { reason: String },

    #[error("price oracle unavailable: {reason}")]
    OracleUnavailable { reason: String },

    #[error("ledger query failed: {reason}")]
    Ledger { reason: String },

    /// The outcome of the timed out call is unknown. Never retried for `flash_loan`.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("flash loan rejected by lending pool: {reason}")]
    LoanRejected { reason: String },

    #[error("rollback incomplete after '{original}': {} compensation(s) failed: {}", .failures.len(), .failures.join("; "))]
    CompensationFailed {
        original: Box<LeverageError>,
        failures: Vec<String>,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl LeverageError {
    /// Bare reason string for the failure, without the variant prefix.
    ///
    /// Upstream protocol reasons (e.g. a router reverting with `"slippage"`) come back
    /// unchanged so callers can match on them.
    pub fn reason(&self) -> String {
        match self {
            Self::InvalidAmount { reason }
            | Self::Unauthorized { reason }
            | Self::InvestmentFailed { reason }
            | Self::BorrowingFailed { reason }
            | Self::RepaymentFailed { reason }
            | Self::OracleUnavailable { reason }
            | Self::Ledger { reason }
            | Self::LoanRejected { reason } => reason.clone(),
            Self::CompensationFailed { original, .. } => original.reason(),
            Self::Configuration { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Rejections raised before any external call that moves value.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::AmountExceedsLimit { .. }
                | Self::InsufficientFunds { .. }
                | Self::InvalidAmount { .. }
                | Self::OperationInFlight { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LeverageError>;
