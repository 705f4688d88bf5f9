//! # Loan Initiator - Pre-flight Gating and Flash Loan Submission
//!
//! ## Purpose
//!
//! Entry point of the engine. Sizes a prospective flash loan against the current
//! balance, protocol premium and execution cost, and only when the risk gate passes
//! hands control to the lending pool, which runs the callback before returning.
//!
//! ## Architecture Role
//!
//! ```text
//! initiate(amount)
//!     │
//!     ├─ [In-flight guard]    one operation per (asset, pool), fail fast
//!     ├─ [Balance read]       AssetLedger.balance_of, retried
//!     ├─ [Position limit]     RiskGate, before any oracle query
//!     ├─ [Fee estimate]       PriceOracle gas price, retried
//!     ├─ [Risk gate]          affordability; pure
//!     └─ [Flash loan]         LendingPool.flash_loan → CallbackExecutor, never retried
//! ```
//!
//! Pre-flight rejections return before any value-moving call. The loan timeout only
//! bounds the wait for the pool to enter the callback; once entered, the callback runs
//! to completion so its compensation is never cut short. A loan that times out before
//! the callback is reported as ambiguous and left to the operator: retrying could
//! duplicate a loan.

use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::callback::CallbackExecutor;
use crate::config::{ExecutionConfig, FlashLeverageConfig, ResolvedAddresses};
use crate::error::{LeverageError, Result};
use crate::fees::FeeEstimator;
use crate::guard::InFlightRegistry;
use crate::interfaces::{AssetLedger, Collaborators, FlashLoanCall, LendingPool, ProtocolError};
use crate::retry::retry_read;
use crate::risk::RiskGate;
use crate::stats::{EngineMetrics, EngineStats};
use crate::types::{FeeEstimate, LoanRequest, OperationReport};
use crate::{log_error, log_stage, log_success};

pub struct LoanInitiator {
    addresses: ResolvedAddresses,
    execution: ExecutionConfig,
    ledger: Arc<dyn AssetLedger>,
    lending_pool: Arc<dyn LendingPool>,
    fees: FeeEstimator,
    gate: RiskGate,
    receiver: Arc<CallbackExecutor>,
    in_flight: Arc<InFlightRegistry>,
    stats: Arc<EngineStats>,
}

impl LoanInitiator {
    /// Validate `config` and wire the engine to its collaborators.
    pub fn new(config: &FlashLeverageConfig, collaborators: Collaborators) -> Result<Self> {
        let addresses = config.validate()?;
        let gate = RiskGate::new(&config.risk)?;
        let stats = Arc::new(EngineStats::default());

        let fees = FeeEstimator::new(
            collaborators.oracle.clone(),
            collaborators.clock.clone(),
            &config.fees,
            config.execution.read_policy(),
        );
        let receiver = Arc::new(CallbackExecutor::new(
            addresses,
            config.execution.clone(),
            &collaborators,
            stats.clone(),
        ));

        log_success!(
            "Flash leverage engine ready: asset={:?} pool={:?} lending_pool={:?} limit={}bps",
            addresses.asset,
            addresses.pool,
            addresses.lending_pool,
            gate.max_position_bps()
        );

        Ok(Self {
            addresses,
            execution: config.execution.clone(),
            ledger: collaborators.ledger,
            lending_pool: collaborators.lending_pool,
            fees,
            gate,
            receiver,
            in_flight: InFlightRegistry::new(),
            stats,
        })
    }

    pub fn addresses(&self) -> &ResolvedAddresses {
        &self.addresses
    }

    /// Callback handler the lending pool invokes with the granted funds.
    pub fn receiver(&self) -> Arc<CallbackExecutor> {
        self.receiver.clone()
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.stats.snapshot()
    }

    /// Whether an operation currently holds the engine's (asset, pool) scope.
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .is_held(self.addresses.asset, self.addresses.pool)
    }

    /// Current balance of the flash-loaned asset held by the engine account.
    pub async fn available_balance(&self) -> Result<U256> {
        let ledger = self.ledger.clone();
        let (asset, account) = (self.addresses.asset, self.addresses.account);
        retry_read("balance_of", self.execution.read_policy(), || {
            let ledger = ledger.clone();
            async move { ledger.balance_of(asset, account).await }
        })
        .await
        .map_err(|err| match err {
            ProtocolError::Timeout {
                operation,
                timeout_ms,
            } => LeverageError::Timeout {
                operation,
                timeout_ms,
            },
            other => LeverageError::Ledger {
                reason: other.to_string(),
            },
        })
    }

    /// Read-only pre-flight: balance, fees and risk gate, without requesting a loan.
    pub async fn preflight(&self, amount: U256) -> Result<(U256, FeeEstimate)> {
        if amount.is_zero() {
            return Err(LeverageError::InvalidAmount {
                reason: "loan amount must be positive".to_string(),
            });
        }

        let balance = self.available_balance().await?;
        // Oversized requests never reach the oracle
        self.gate.check_limit(balance, amount)?;
        let fees = self.fees.estimate(amount).await?;
        self.gate.check(balance, amount, &fees)?;

        log_stage!(
            GATE,
            "Pre-flight passed: amount={} balance={} limit={} protocol_fee={} execution_cost={}",
            amount,
            balance,
            self.gate.position_limit(balance),
            fees.protocol_fee,
            fees.execution_cost
        );
        Ok((balance, fees))
    }

    /// Run one complete leveraged operation for `amount` of the configured asset.
    pub async fn initiate(&self, amount: U256) -> Result<OperationReport> {
        let started = Instant::now();
        self.stats.record_attempt();

        let _guard = match self
            .in_flight
            .try_acquire(self.addresses.asset, self.addresses.pool)
        {
            Ok(guard) => guard,
            Err(err) => {
                self.stats.record_rejection();
                log_error!("{}", err);
                return Err(err);
            }
        };

        let (balance, fees) = match self.preflight(amount).await {
            Ok(checked) => checked,
            Err(err) => {
                self.stats.record_rejection();
                log_error!("Pre-flight rejected loan of {}: {}", amount, err);
                return Err(err);
            }
        };

        let request = LoanRequest::repay_in_full(self.addresses.asset, amount);
        let call = self.build_call(&request);

        log_stage!(
            LOAN,
            "Requesting flash loan of {} {:?} from {:?}",
            amount,
            request.asset,
            self.addresses.lending_pool
        );

        let outcome = self.submit(call).await;

        match outcome {
            Ok(()) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                log_success!("Flash leverage operation for {} completed in {}ms", amount, duration_ms);
                Ok(OperationReport {
                    request,
                    fees,
                    balance_before: balance,
                    duration_ms,
                })
            }
            Err(err) => {
                let err = match err {
                    ProtocolError::Callback(inner) => *inner,
                    ProtocolError::Timeout {
                        operation,
                        timeout_ms,
                    } => LeverageError::Timeout {
                        operation,
                        timeout_ms,
                    },
                    other => LeverageError::LoanRejected {
                        reason: other.to_string(),
                    },
                };
                log_error!("Flash leverage operation for {} failed: {}", amount, err);
                Err(err)
            }
        }
    }

    /// Submit the loan; the timeout is abandoned once the callback has been entered.
    async fn submit(&self, call: FlashLoanCall) -> std::result::Result<(), ProtocolError> {
        let loan_timeout = self.execution.loan_timeout();
        let entered_before = self.receiver.callbacks_entered();
        let mut loan = self.lending_pool.flash_loan(self.receiver.as_ref(), call);

        tokio::select! {
            outcome = &mut loan => outcome,
            _ = tokio::time::sleep(loan_timeout) => {
                if self.receiver.callbacks_entered() > entered_before {
                    warn!(
                        "Flash loan exceeded {}ms inside the callback, awaiting completion",
                        loan_timeout.as_millis()
                    );
                    loan.await
                } else {
                    Err(ProtocolError::Timeout {
                        operation: "flash_loan",
                        timeout_ms: loan_timeout.as_millis() as u64,
                    })
                }
            }
        }
    }

    fn build_call(&self, request: &LoanRequest) -> FlashLoanCall {
        let receiver: Address = self.addresses.account;
        FlashLoanCall {
            receiver,
            assets: vec![request.asset],
            amounts: vec![request.amount],
            modes: vec![request.debt_mode],
            on_behalf_of: receiver,
            params: Bytes::default(),
            referral_code: 0,
        }
    }
}
