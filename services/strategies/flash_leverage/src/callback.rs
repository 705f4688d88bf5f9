//! # Flash Loan Callback Executor - Atomic Stage Sequencing
//!
//! ## Purpose
//!
//! Runs once the lending pool has granted the flash loan: authorizes the call, deploys
//! the borrowed funds into a liquidity position, borrows against that position, and
//! approves `amount + premium` for pull-back. Either every stage completes or every
//! effect already applied is compensated before the failure is reported.
//!
//! ## Architecture Role
//!
//! ```text
//! Entered ──▶ Authorized ──▶ Invested ──▶ Leveraged ──▶ Repaid ──▶ Completed
//!    │             │             │             │
//!    └─────────────┴─────────────┴─────────────┴──▶ Aborted ──▶ [Compensation]
//!                                                                 revoke approvals
//!                                                                 repay collateral loan
//!                                                                 remove liquidity
//! ```
//!
//! | Stage      | Effects recorded                                   | Failure            |
//! |------------|----------------------------------------------------|--------------------|
//! | Authorized | none                                               | `Unauthorized`     |
//! | Invested   | asset approval to router, liquidity position       | `InvestmentFailed` |
//! | Leveraged  | pool-token approval to router, collateral loan     | `BorrowingFailed`  |
//! | Repaid     | asset approval to lending pool                     | `RepaymentFailed`  |
//!
//! Stage outputs are bound from explicit `Result`s in the enclosing stage; an upstream
//! revert reason is carried through unchanged.
//!
//! A router call that times out may still have landed. Before the stage fails, the
//! engine re-reads its balances and records whatever was credited, so compensation
//! covers late effects too.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::clock::Clock;
use crate::config::{ExecutionConfig, ResolvedAddresses};
use crate::error::{LeverageError, Result};
use crate::interfaces::{
    AddLiquidityParams, AssetLedger, BorrowParams, BorrowReceipt, Collaborators,
    FlashLoanCallback, FlashLoanReceiver, LiquidityRouter, ProtocolError, RemoveLiquidityParams,
    RepayParams,
};
use crate::retry::bounded;
use crate::saga::{CompensationLog, Effect};
use crate::stats::EngineStats;
use crate::types::{CollateralLoan, OperationContext, Position, Stage};
use crate::{log_error, log_rollback, log_stage, log_success};

pub struct CallbackExecutor {
    addresses: ResolvedAddresses,
    execution: ExecutionConfig,
    ledger: Arc<dyn AssetLedger>,
    router: Arc<dyn LiquidityRouter>,
    clock: Arc<dyn Clock>,
    stats: Arc<EngineStats>,
    entered: AtomicU64,
}

/// Upstream reason when the protocol gave one, else the stage's generic message.
fn stage_reason(err: &ProtocolError, generic: &str) -> String {
    match err {
        ProtocolError::Reverted {
            reason: Some(reason),
        } => reason.clone(),
        ProtocolError::Reverted { reason: None } => generic.to_string(),
        other => format!("{} ({})", generic, other),
    }
}

/// Enforce stage order: a skipped transition is a sequencing bug.
fn advance(ctx: &mut OperationContext, to: Stage) {
    let from = ctx.stage();
    let moved = ctx.advance(to);
    debug_assert!(moved, "stage transition {} -> {} out of order", from, to);
    if !moved {
        log_error!("Stage transition {} -> {} out of order", from, to);
    }
}

impl CallbackExecutor {
    pub fn new(
        addresses: ResolvedAddresses,
        execution: ExecutionConfig,
        collaborators: &Collaborators,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            addresses,
            execution,
            ledger: collaborators.ledger.clone(),
            router: collaborators.router.clone(),
            clock: collaborators.clock.clone(),
            stats,
            entered: AtomicU64::new(0),
        }
    }

    /// Number of authorized callbacks entered so far.
    pub fn callbacks_entered(&self) -> u64 {
        self.entered.load(Ordering::SeqCst)
    }

    /// Address the lending pool must report as initiator.
    pub fn account(&self) -> Address {
        self.addresses.account
    }

    fn deadline(&self) -> u64 {
        self.clock
            .now_secs()
            .saturating_add(self.execution.deadline_offset_secs)
    }

    /// Entered → Authorized. Returns `(amount, amount + premium)`.
    fn authorize(&self, caller: Address, callback: &FlashLoanCallback) -> Result<(U256, U256)> {
        if caller != self.addresses.lending_pool {
            return Err(LeverageError::Unauthorized {
                reason: format!("caller {:?} is not the lending pool", caller),
            });
        }
        if callback.initiator != self.addresses.account {
            return Err(LeverageError::Unauthorized {
                reason: format!("initiator {:?} is not this engine", callback.initiator),
            });
        }
        if callback.assets.len() != 1
            || callback.amounts.len() != 1
            || callback.premiums.len() != 1
        {
            return Err(LeverageError::Unauthorized {
                reason: format!(
                    "expected a single-asset loan, got {} assets / {} amounts / {} premiums",
                    callback.assets.len(),
                    callback.amounts.len(),
                    callback.premiums.len()
                ),
            });
        }
        if callback.assets[0] != self.addresses.asset {
            return Err(LeverageError::Unauthorized {
                reason: format!("unexpected asset {:?}", callback.assets[0]),
            });
        }

        let amount = callback.amounts[0];
        let premium = callback.premiums[0];
        if amount.is_zero() {
            return Err(LeverageError::Unauthorized {
                reason: "zero loan amount".to_string(),
            });
        }
        let repayment = amount
            .checked_add(premium)
            .ok_or_else(|| LeverageError::Unauthorized {
                reason: format!("repayment of {} + {} overflows", amount, premium),
            })?;

        Ok((amount, repayment))
    }

    /// Approve `amount` of `token` to `spender`, recording the prior allowance first.
    ///
    /// The effect is logged before `approve` is sent: a timed out approval may still
    /// land, and restoring the prior allowance is harmless if it did not.
    async fn grant(
        &self,
        log: &mut CompensationLog,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> std::result::Result<(), ProtocolError> {
        let timeout = self.execution.call_timeout();
        let previous = bounded(
            "allowance",
            timeout,
            self.ledger.allowance(token, self.addresses.account, spender),
        )
        .await?;
        log.record(Effect::Approval {
            token,
            spender,
            previous,
        });

        let approved = bounded("approve", timeout, self.ledger.approve(token, spender, amount)).await?;
        if !approved {
            return Err(ProtocolError::reverted(format!(
                "ledger refused approval of {} to {:?}",
                amount, spender
            )));
        }
        Ok(())
    }

    async fn balance(&self, token: Address) -> std::result::Result<U256, ProtocolError> {
        bounded(
            "balance_of",
            self.execution.call_timeout(),
            self.ledger.balance_of(token, self.addresses.account),
        )
        .await
    }

    /// Amount of `token` credited since `before`, after `operation` timed out.
    ///
    /// `None` when nothing arrived or the balance cannot be read; the latter is logged,
    /// since the late effect then escapes compensation.
    async fn late_credit(&self, operation: &str, token: Address, before: U256) -> Option<U256> {
        match self.balance(token).await {
            Ok(after) if after > before => {
                log_rollback!(
                    "{} timed out but landed: {} of {:?} credited, scheduling compensation",
                    operation,
                    after - before,
                    token
                );
                Some(after - before)
            }
            Ok(_) => {
                debug!("{} timed out without crediting {:?}", operation, token);
                None
            }
            Err(e) => {
                log_error!("Cannot tell whether timed out {} landed: {}", operation, e);
                None
            }
        }
    }

    /// Authorized → Invested
    async fn invest(&self, log: &mut CompensationLog, amount: U256) -> Result<Position> {
        let fail = |err: ProtocolError| LeverageError::InvestmentFailed {
            reason: stage_reason(&err, "liquidity provision failed"),
        };
        let timeout = self.execution.call_timeout();
        let addrs = self.addresses;

        self.grant(log, addrs.asset, addrs.router, amount)
            .await
            .map_err(fail)?;

        let pool_tokens_before = self.balance(addrs.pool).await.map_err(fail)?;

        let params = AddLiquidityParams {
            token_a: addrs.asset,
            token_b: addrs.paired_token,
            fee: self.execution.pool_fee,
            tick_lower: self.execution.tick_lower,
            tick_upper: self.execution.tick_upper,
            amount_desired: amount,
            amount_min: self.execution.liquidity_min(),
            amount_max: amount,
            recipient: addrs.account,
            deadline: self.deadline(),
        };
        let receipt = match bounded("add_liquidity", timeout, self.router.add_liquidity(params)).await {
            Ok(receipt) => receipt,
            Err(err) => {
                if matches!(err, ProtocolError::Timeout { .. }) {
                    if let Some(liquidity) = self
                        .late_credit("add_liquidity", addrs.pool, pool_tokens_before)
                        .await
                    {
                        log.record(Effect::Liquidity { liquidity });
                    }
                }
                return Err(fail(err));
            }
        };
        log.record(Effect::Liquidity {
            liquidity: receipt.liquidity,
        });

        if receipt.liquidity.is_zero() {
            return Err(LeverageError::InvestmentFailed {
                reason: "router reported zero liquidity".to_string(),
            });
        }

        let pool_tokens_after = self.balance(addrs.pool).await.map_err(fail)?;
        if pool_tokens_after <= pool_tokens_before {
            return Err(LeverageError::InvestmentFailed {
                reason: format!(
                    "position not credited: pool token balance stayed at {}",
                    pool_tokens_after
                ),
            });
        }
        let pool_tokens = pool_tokens_after - pool_tokens_before;

        log_stage!(
            INVEST,
            "Invested {} ({} + {}) for liquidity {}, pool tokens credited {}",
            amount,
            receipt.amount_a,
            receipt.amount_b,
            receipt.liquidity,
            pool_tokens
        );

        Ok(Position {
            liquidity: receipt.liquidity,
            pool_tokens,
        })
    }

    /// Invested → Leveraged
    async fn leverage(
        &self,
        log: &mut CompensationLog,
        position: &Position,
        repayment: U256,
    ) -> Result<CollateralLoan> {
        let fail = |err: ProtocolError| LeverageError::BorrowingFailed {
            reason: stage_reason(&err, "collateral borrow failed"),
        };
        let addrs = self.addresses;

        // Only this operation's position is pledged
        self.grant(log, addrs.pool, addrs.router, position.pool_tokens)
            .await
            .map_err(fail)?;
        let asset_before = self.balance(addrs.asset).await.map_err(fail)?;

        let params = BorrowParams {
            token_a: addrs.asset,
            token_b: addrs.paired_token,
            pool: addrs.pool,
            liquidity: position.liquidity,
            amount_requested: repayment,
            amount_min: self.execution.borrow_min(),
            recipient: addrs.account,
            deadline: self.deadline(),
        };
        let receipt = match bounded("borrow", self.execution.call_timeout(), self.router.borrow(params)).await {
            Ok(receipt) => receipt,
            Err(err) => {
                if matches!(err, ProtocolError::Timeout { .. }) {
                    if let Some(amount0) = self.late_credit("borrow", addrs.asset, asset_before).await {
                        log.record(Effect::CollateralLoan {
                            receipt: BorrowReceipt {
                                amount0,
                                amount1: U256::zero(),
                            },
                        });
                    }
                }
                return Err(fail(err));
            }
        };
        log.record(Effect::CollateralLoan { receipt });

        let loan = CollateralLoan {
            borrowed: receipt.amount0,
            paired: receipt.amount1,
            debt: repayment,
        };
        if loan.borrowed < repayment {
            return Err(LeverageError::BorrowingFailed {
                reason: format!(
                    "collateral loan of {} is short of repayment {}",
                    loan.borrowed, repayment
                ),
            });
        }

        log_stage!(
            LEVERAGE,
            "Borrowed {} (+{} paired) against liquidity {}",
            loan.borrowed,
            loan.paired,
            position.liquidity
        );

        Ok(loan)
    }

    /// Leveraged → Repaid
    async fn approve_repayment(&self, log: &mut CompensationLog, repayment: U256) -> Result<()> {
        let fail = |err: ProtocolError| LeverageError::RepaymentFailed {
            reason: stage_reason(&err, "repayment approval failed"),
        };
        let addrs = self.addresses;

        let balance = self.balance(addrs.asset).await.map_err(fail)?;
        if balance < repayment {
            return Err(LeverageError::RepaymentFailed {
                reason: format!("balance {} below repayment {}", balance, repayment),
            });
        }

        self.grant(log, addrs.asset, addrs.lending_pool, repayment)
            .await
            .map_err(fail)?;

        log_stage!(REPAY, "Approved {} for pull-back by the lending pool", repayment);
        Ok(())
    }

    async fn run_stages(
        &self,
        ctx: &mut OperationContext,
        log: &mut CompensationLog,
        amount: U256,
        repayment: U256,
    ) -> Result<()> {
        let position = self.invest(log, amount).await?;
        advance(ctx, Stage::Invested);

        let loan = self.leverage(log, &position, repayment).await?;
        advance(ctx, Stage::Leveraged);
        debug!("Collateral loan debt {} recorded against position", loan.debt);

        self.approve_repayment(log, repayment).await?;
        advance(ctx, Stage::Repaid);
        Ok(())
    }

    /// Undo every recorded effect, newest first. Returns the compensations that failed.
    async fn compensate(&self, log: CompensationLog) -> Vec<String> {
        let mut failures = Vec::new();
        let timeout = self.execution.call_timeout();
        let addrs = self.addresses;

        for effect in log.into_unwind_order() {
            let description = effect.describe();
            let outcome = match effect {
                Effect::Approval {
                    token,
                    spender,
                    previous,
                } => match bounded("approve", timeout, self.ledger.approve(token, spender, previous)).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(ProtocolError::reverted("ledger refused allowance restore")),
                    Err(e) => Err(e),
                },
                Effect::CollateralLoan { receipt } => {
                    let params = RepayParams {
                        token_a: addrs.asset,
                        token_b: addrs.paired_token,
                        pool: addrs.pool,
                        amount0: receipt.amount0,
                        amount1: receipt.amount1,
                        deadline: self.deadline(),
                    };
                    bounded("repay", timeout, self.router.repay(params)).await
                }
                Effect::Liquidity { liquidity } => {
                    let params = RemoveLiquidityParams {
                        token_a: addrs.asset,
                        token_b: addrs.paired_token,
                        pool: addrs.pool,
                        liquidity,
                        recipient: addrs.account,
                        deadline: self.deadline(),
                    };
                    bounded("remove_liquidity", timeout, self.router.remove_liquidity(params))
                        .await
                        .map(|_| ())
                }
            };

            match outcome {
                Ok(()) => {
                    self.stats.record_compensation(true);
                    log_rollback!("Compensated {}", description);
                }
                Err(e) => {
                    self.stats.record_compensation(false);
                    log_error!("Compensation of {} failed: {}", description, e);
                    failures.push(format!("{}: {}", description, e));
                }
            }
        }

        failures
    }
}

#[async_trait]
impl FlashLoanReceiver for CallbackExecutor {
    async fn execute_operation(
        &self,
        caller: Address,
        callback: FlashLoanCallback,
    ) -> Result<bool> {
        let started = Instant::now();
        let mut ctx = OperationContext::enter(callback.initiator, caller);
        log_stage!(LOAN, "Flash loan callback entered by {:?}", caller);

        let (amount, repayment) = match self.authorize(caller, &callback) {
            Ok(sizes) => sizes,
            Err(err) => {
                ctx.abort();
                self.stats.record_aborted();
                log_error!("Callback rejected: {}", err);
                return Err(err);
            }
        };
        advance(&mut ctx, Stage::Authorized);
        self.entered.fetch_add(1, Ordering::SeqCst);

        let mut log = CompensationLog::default();
        match self.run_stages(&mut ctx, &mut log, amount, repayment).await {
            Ok(()) => {
                advance(&mut ctx, Stage::Completed);
                self.stats.record_completed();
                log_success!(
                    "Callback completed in {}ms: {} borrowed, {} approved for repayment",
                    started.elapsed().as_millis(),
                    amount,
                    repayment
                );
                Ok(true)
            }
            Err(err) => {
                let failed_at = ctx.stage();
                ctx.abort();
                self.stats.record_aborted();
                log_error!(
                    "Callback aborted after stage {}: {}; unwinding {} effect(s)",
                    failed_at,
                    err,
                    log.len()
                );

                let failures = self.compensate(log).await;
                if failures.is_empty() {
                    Err(err)
                } else {
                    Err(LeverageError::CompensationFailed {
                        original: Box::new(err),
                        failures,
                    })
                }
            }
        }
    }
}
