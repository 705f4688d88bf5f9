//! Compensation log for the callback stages
//!
//! Every effect applied against an external system is recorded as it happens. On
//! abort the log is drained newest-first, so each compensation runs against the
//! state its forward action left behind.

use ethers::types::{Address, U256};

use crate::interfaces::BorrowReceipt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Allowance granted to `spender`; compensated by restoring `previous`
    Approval {
        token: Address,
        spender: Address,
        previous: U256,
    },
    /// Liquidity deposited; compensated by removing the position
    Liquidity { liquidity: U256 },
    /// Collateral loan drawn; compensated by repaying the received amounts
    CollateralLoan { receipt: BorrowReceipt },
}

impl Effect {
    pub fn describe(&self) -> String {
        match self {
            Effect::Approval { token, spender, .. } => {
                format!("approval of {:?} to {:?}", token, spender)
            }
            Effect::Liquidity { liquidity } => format!("liquidity position of {}", liquidity),
            Effect::CollateralLoan { receipt } => {
                format!("collateral loan of ({}, {})", receipt.amount0, receipt.amount1)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct CompensationLog {
    effects: Vec<Effect>,
}

impl CompensationLog {
    pub fn record(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Effects in the order they must be undone.
    pub fn into_unwind_order(self) -> impl Iterator<Item = Effect> {
        self.effects.into_iter().rev()
    }
}
