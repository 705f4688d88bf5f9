//! # External Collaborators - Protocol Boundary Traits
//!
//! ## Purpose
//!
//! Declares the lending pool, liquidity router, price oracle and asset ledger the
//! engine orchestrates. Implementations live outside this crate (RPC-backed contract
//! bindings in production, in-memory fakes in tests) and are injected at construction
//! through [`Collaborators`].
//!
//! ## Architecture Role
//!
//! ```text
//! LoanInitiator ──flash_loan──▶ LendingPool ──execute_operation──▶ CallbackExecutor
//!       │                                                               │
//!       ├── AssetLedger (balance)                 AssetLedger (approve/allowance)
//!       └── PriceOracle (gas price)               LiquidityRouter (add_liquidity/borrow)
//! ```
//!
//! Every method is a blocking call into an external system. The engine bounds each
//! one with a timeout; only the read-only queries are ever retried.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::error::LeverageError;
use crate::types::{DebtMode, RoundData};

/// Failure reported by an external protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The protocol rejected the call, optionally with its own reason string
    #[error("reverted: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Reverted { reason: Option<String> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The flash loan receiver failed; the lending pool undid the loan
    #[error("flash loan callback failed: {0}")]
    Callback(Box<LeverageError>),
}

impl ProtocolError {
    pub fn reverted(reason: impl Into<String>) -> Self {
        Self::Reverted {
            reason: Some(reason.into()),
        }
    }

    /// Protocol-reported reason, when the protocol gave one.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Reverted { reason } => reason.as_deref(),
            _ => None,
        }
    }

    /// Transient failures worth retrying for read-only queries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

/// Arguments of `LendingPool::flash_loan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLoanCall {
    pub receiver: Address,
    pub assets: Vec<Address>,
    pub amounts: Vec<U256>,
    pub modes: Vec<DebtMode>,
    pub on_behalf_of: Address,
    pub params: Bytes,
    pub referral_code: u16,
}

/// Arguments the lending pool passes back to the receiver once funds are granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLoanCallback {
    pub assets: Vec<Address>,
    pub amounts: Vec<U256>,
    pub premiums: Vec<U256>,
    pub initiator: Address,
    pub params: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLiquidityParams {
    pub token_a: Address,
    pub token_b: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount_desired: U256,
    pub amount_min: U256,
    pub amount_max: U256,
    pub recipient: Address,
    pub deadline: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiquidityReceipt {
    pub amount_a: U256,
    pub amount_b: U256,
    pub liquidity: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowParams {
    pub token_a: Address,
    pub token_b: Address,
    pub pool: Address,
    pub liquidity: U256,
    pub amount_requested: U256,
    pub amount_min: U256,
    pub recipient: Address,
    pub deadline: u64,
}

/// Amounts received from `borrow`, in `(token_a, token_b)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BorrowReceipt {
    pub amount0: U256,
    pub amount1: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveLiquidityParams {
    pub token_a: Address,
    pub token_b: Address,
    pub pool: Address,
    pub liquidity: U256,
    pub recipient: Address,
    pub deadline: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepayParams {
    pub token_a: Address,
    pub token_b: Address,
    pub pool: Address,
    pub amount0: U256,
    pub amount1: U256,
    pub deadline: u64,
}

/// Receiver side of a flash loan. Implemented by `CallbackExecutor`.
#[async_trait]
pub trait FlashLoanReceiver: Send + Sync {
    /// Returns `Ok(true)` once `amount + premium` is approved for pull-back.
    async fn execute_operation(
        &self,
        caller: Address,
        callback: FlashLoanCallback,
    ) -> Result<bool, LeverageError>;
}

#[async_trait]
pub trait LendingPool: Send + Sync {
    /// Grants the loan, invokes `receiver` synchronously, then pulls back amount + premium.
    ///
    /// A `false` or failed callback undoes the loan and surfaces as
    /// [`ProtocolError::Callback`].
    async fn flash_loan(
        &self,
        receiver: &dyn FlashLoanReceiver,
        call: FlashLoanCall,
    ) -> Result<(), ProtocolError>;
}

#[async_trait]
pub trait LiquidityRouter: Send + Sync {
    async fn add_liquidity(
        &self,
        params: AddLiquidityParams,
    ) -> Result<LiquidityReceipt, ProtocolError>;

    async fn borrow(&self, params: BorrowParams) -> Result<BorrowReceipt, ProtocolError>;

    /// Compensation for `borrow`: returns the borrowed amounts and releases the collateral.
    async fn repay(&self, params: RepayParams) -> Result<(), ProtocolError>;

    /// Compensation for `add_liquidity`: burns the position and returns the deposit.
    async fn remove_liquidity(
        &self,
        params: RemoveLiquidityParams,
    ) -> Result<LiquidityReceipt, ProtocolError>;
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn latest_round_data(&self) -> Result<RoundData, ProtocolError>;
}

/// Fungible token ledger as seen from the engine account.
#[async_trait]
pub trait AssetLedger: Send + Sync {
    async fn balance_of(&self, token: Address, account: Address) -> Result<U256, ProtocolError>;

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ProtocolError>;

    /// Sets the engine account's allowance for `spender` to exactly `amount`.
    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<bool, ProtocolError>;
}

/// Dependencies injected into the engine at construction time.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn AssetLedger>,
    pub lending_pool: Arc<dyn LendingPool>,
    pub router: Arc<dyn LiquidityRouter>,
    pub oracle: Arc<dyn PriceOracle>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new(
        ledger: Arc<dyn AssetLedger>,
        lending_pool: Arc<dyn LendingPool>,
        router: Arc<dyn LiquidityRouter>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            ledger,
            lending_pool,
            router,
            oracle,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
