//! Core value types shared by the risk gate, initiator and callback executor

use ethers::types::{Address, I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Debt mode requested for each flash-loaned asset.
///
/// `None` means the loan must be repaid inside the same operation. The other modes
/// would leave an open debt position and are never requested by this strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebtMode {
    None = 0,
    Stable = 1,
    Variable = 2,
}

impl DebtMode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Single-asset loan request. Immutable once submitted to the lending pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRequest {
    pub asset: Address,
    pub amount: U256,
    pub debt_mode: DebtMode,
}

impl LoanRequest {
    pub fn repay_in_full(asset: Address, amount: U256) -> Self {
        Self {
            asset,
            amount,
            debt_mode: DebtMode::None,
        }
    }
}

/// Fees for one prospective loan, recomputed on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeEstimate {
    /// Lending protocol premium, `floor(amount * premium_bps / 10000)`
    pub protocol_fee: U256,
    /// Gas price (base units) times the gas estimate for the whole operation
    pub execution_cost: U256,
}

impl FeeEstimate {
    /// `amount + protocol_fee + execution_cost`, or `None` on overflow.
    pub fn required_balance(&self, amount: U256) -> Option<U256> {
        amount
            .checked_add(self.protocol_fee)?
            .checked_add(self.execution_cost)
    }
}

/// Liquidity position produced by the invest stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub liquidity: U256,
    /// Pool tokens credited by this deposit; earlier holdings are excluded
    pub pool_tokens: U256,
}

/// Loan taken against the liquidity position, sized to repay the flash loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateralLoan {
    /// Amount of the flash-loaned asset received
    pub borrowed: U256,
    /// Amount of the paired token received alongside
    pub paired: U256,
    /// Total owed against the position
    pub debt: U256,
}

/// Callback execution stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Entered,
    Authorized,
    Invested,
    Leveraged,
    Repaid,
    Completed,
    Aborted,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Aborted)
    }

    /// The only stage reachable from `self` on success.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Entered => Some(Stage::Authorized),
            Stage::Authorized => Some(Stage::Invested),
            Stage::Invested => Some(Stage::Leveraged),
            Stage::Leveraged => Some(Stage::Repaid),
            Stage::Repaid => Some(Stage::Completed),
            Stage::Completed | Stage::Aborted => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Entered => "entered",
            Stage::Authorized => "authorized",
            Stage::Invested => "invested",
            Stage::Leveraged => "leveraged",
            Stage::Repaid => "repaid",
            Stage::Completed => "completed",
            Stage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Per-invocation callback state. Created on entry, dropped on return.
#[derive(Debug)]
pub struct OperationContext {
    pub initiator: Address,
    pub caller: Address,
    stage: Stage,
    /// Last stage reached before an abort
    aborted_from: Option<Stage>,
}

impl OperationContext {
    pub fn enter(initiator: Address, caller: Address) -> Self {
        Self {
            initiator,
            caller,
            stage: Stage::Entered,
            aborted_from: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn aborted_from(&self) -> Option<Stage> {
        self.aborted_from
    }

    /// Move to the next stage. Returns false (and stays put) on an out-of-order transition.
    #[must_use]
    pub fn advance(&mut self, to: Stage) -> bool {
        if self.stage.next() == Some(to) {
            self.stage = to;
            true
        } else {
            false
        }
    }

    pub fn abort(&mut self) {
        if !self.stage.is_terminal() {
            self.aborted_from = Some(self.stage);
            self.stage = Stage::Aborted;
        }
    }
}

/// Latest reading of a price feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundData {
    pub round_id: u128,
    pub answer: I256,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: u128,
}

/// Summary of one completed operation, returned by `LoanInitiator::initiate`.
#[derive(Debug, Clone)]
pub struct OperationReport {
    pub request: LoanRequest,
    pub fees: FeeEstimate,
    pub balance_before: U256,
    pub duration_ms: u64,
}
