//! In-memory collaborators for engine integration tests
//!
//! The fakes share one `FakeLedger`, so every transfer, approval and allowance the
//! engine causes is observable from the test.

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, I256, U256};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use flash_leverage::config::AddressConfig;
use flash_leverage::{
    protocol_fee, AddLiquidityParams, AssetLedger, BorrowParams, BorrowReceipt, Collaborators,
    FlashLeverageConfig, FlashLoanCall, FlashLoanCallback, FlashLoanReceiver, LendingPool,
    LiquidityReceipt, LiquidityRouter, LoanInitiator, ManualClock, PriceOracle, ProtocolError,
    RemoveLiquidityParams, RepayParams, RoundData,
};

pub const NOW: u64 = 1_700_000_000;
pub const RESERVE: u64 = 10_000_000;

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn asset() -> Address {
    addr(0x11)
}
pub fn paired_token() -> Address {
    addr(0x22)
}
pub fn lending_pool() -> Address {
    addr(0x33)
}
pub fn router() -> Address {
    addr(0x44)
}
pub fn pool_token() -> Address {
    addr(0x55)
}
pub fn oracle() -> Address {
    addr(0x66)
}
pub fn account() -> Address {
    addr(0x77)
}

fn reverted(reason: &str) -> ProtocolError {
    ProtocolError::reverted(reason)
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    BalanceOf { token: Address, account: Address },
    Allowance { token: Address, spender: Address },
    Approve { token: Address, spender: Address, amount: U256 },
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    calls: Vec<LedgerCall>,
    refuse_grants_to: HashSet<Address>,
    late_grants_to: HashMap<Address, Duration>,
}

/// ERC20-style ledger for several tokens. `approve` acts for `owner`.
pub struct FakeLedger {
    owner: Address,
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn mint(&self, token: Address, holder: Address, amount: U256) {
        let mut state = self.state.lock();
        *state.balances.entry((token, holder)).or_default() += amount;
    }

    pub fn burn(&self, token: Address, holder: Address, amount: U256) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        let balance = state.balances.entry((token, holder)).or_default();
        if *balance < amount {
            return Err(reverted("burn amount exceeds balance"));
        }
        *balance -= amount;
        Ok(())
    }

    pub fn balance(&self, token: Address, holder: Address) -> U256 {
        self.state
            .lock()
            .balances
            .get(&(token, holder))
            .copied()
            .unwrap_or_default()
    }

    pub fn allowance_of(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.state
            .lock()
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.state
            .lock()
            .allowances
            .insert((token, owner, spender), amount);
    }

    pub fn transfer(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        let from_balance = state.balances.entry((token, from)).or_default();
        if *from_balance < amount {
            return Err(reverted("transfer amount exceeds balance"));
        }
        *from_balance -= amount;
        *state.balances.entry((token, to)).or_default() += amount;
        Ok(())
    }

    /// Spend `spender`'s allowance over `owner`'s balance.
    pub fn transfer_from(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), ProtocolError> {
        {
            let mut state = self.state.lock();
            let allowance = state.allowances.entry((token, owner, spender)).or_default();
            if *allowance < amount {
                return Err(reverted("insufficient allowance"));
            }
            *allowance -= amount;
        }
        self.transfer(token, owner, to, amount)
    }

    /// Refuse non-zero approvals to `spender`; resets to zero still succeed.
    pub fn refuse_grants_to(&self, spender: Address) {
        self.state.lock().refuse_grants_to.insert(spender);
    }

    /// Apply non-zero approvals to `spender`, then answer only after `delay`.
    pub fn reply_late_to_grants(&self, spender: Address, delay: Duration) {
        self.state.lock().late_grants_to.insert(spender, delay);
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().calls.clone()
    }

    pub fn approvals(&self) -> Vec<LedgerCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, LedgerCall::Approve { .. }))
            .collect()
    }
}

#[async_trait]
impl AssetLedger for FakeLedger {
    async fn balance_of(&self, token: Address, account: Address) -> Result<U256, ProtocolError> {
        self.state
            .lock()
            .calls
            .push(LedgerCall::BalanceOf { token, account });
        Ok(self.balance(token, account))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ProtocolError> {
        self.state
            .lock()
            .calls
            .push(LedgerCall::Allowance { token, spender });
        Ok(self.allowance_of(token, owner, spender))
    }

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<bool, ProtocolError> {
        let late = {
            let mut state = self.state.lock();
            state.calls.push(LedgerCall::Approve {
                token,
                spender,
                amount,
            });
            if !amount.is_zero() && state.refuse_grants_to.contains(&spender) {
                return Ok(false);
            }
            state.allowances.insert((token, self.owner, spender), amount);
            if amount.is_zero() {
                None
            } else {
                state.late_grants_to.get(&spender).copied()
            }
        };
        if let Some(delay) = late {
            tokio::time::sleep(delay).await;
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RouterState {
    add_failure: Option<Option<String>>,
    borrow_failure: Option<String>,
    remove_failure: Option<String>,
    repay_failure: Option<String>,
    borrow_shortfall: U256,
    zero_liquidity: bool,
    collateral: U256,
    calls: Vec<&'static str>,
    last_add: Option<AddLiquidityParams>,
    last_borrow: Option<BorrowParams>,
    slow_by: Option<Duration>,
    late: HashMap<&'static str, Duration>,
}

/// Concentrated-liquidity router minting pool tokens 1:1 with the deposit and
/// lending the flash-loaned asset from its own reserve.
pub struct FakeRouter {
    ledger: Arc<FakeLedger>,
    state: Mutex<RouterState>,
}

impl FakeRouter {
    pub fn new(ledger: Arc<FakeLedger>) -> Self {
        ledger.mint(asset(), router(), U256::from(RESERVE));
        Self {
            ledger,
            state: Mutex::new(RouterState::default()),
        }
    }

    /// `Some(reason)` reverts with that reason, `None` reverts silently.
    pub fn fail_add_liquidity(&self, reason: Option<&str>) {
        self.state.lock().add_failure = Some(reason.map(str::to_string));
    }

    pub fn fail_borrow(&self, reason: &str) {
        self.state.lock().borrow_failure = Some(reason.to_string());
    }

    pub fn fail_remove_liquidity(&self, reason: &str) {
        self.state.lock().remove_failure = Some(reason.to_string());
    }

    pub fn fail_repay(&self, reason: &str) {
        self.state.lock().repay_failure = Some(reason.to_string());
    }

    pub fn lend_short_by(&self, shortfall: u64) {
        self.state.lock().borrow_shortfall = U256::from(shortfall);
    }

    pub fn report_zero_liquidity(&self) {
        self.state.lock().zero_liquidity = true;
    }

    /// Delay `add_liquidity` and `borrow` by `delay` before they act.
    pub fn slow_calls(&self, delay: Duration) {
        self.state.lock().slow_by = Some(delay);
    }

    /// Let `call` land, then answer only after `delay`.
    pub fn reply_late(&self, call: &'static str, delay: Duration) {
        self.state.lock().late.insert(call, delay);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn last_add(&self) -> Option<AddLiquidityParams> {
        self.state.lock().last_add.clone()
    }

    pub fn last_borrow(&self) -> Option<BorrowParams> {
        self.state.lock().last_borrow.clone()
    }
}

#[async_trait]
impl LiquidityRouter for FakeRouter {
    async fn add_liquidity(
        &self,
        params: AddLiquidityParams,
    ) -> Result<LiquidityReceipt, ProtocolError> {
        let (failure, zero_liquidity, slow_by, late) = {
            let mut state = self.state.lock();
            state.calls.push("add_liquidity");
            state.last_add = Some(params.clone());
            (
                state.add_failure.clone(),
                state.zero_liquidity,
                state.slow_by,
                state.late.get("add_liquidity").copied(),
            )
        };
        if let Some(delay) = slow_by {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = failure {
            return Err(ProtocolError::Reverted { reason });
        }

        if zero_liquidity {
            return Ok(LiquidityReceipt {
                amount_a: U256::zero(),
                amount_b: U256::zero(),
                liquidity: U256::zero(),
            });
        }
        self.ledger.transfer_from(
            params.token_a,
            account(),
            router(),
            router(),
            params.amount_desired,
        )?;
        self.ledger
            .mint(pool_token(), params.recipient, params.amount_desired);
        if let Some(delay) = late {
            tokio::time::sleep(delay).await;
        }

        Ok(LiquidityReceipt {
            amount_a: params.amount_desired,
            amount_b: U256::zero(),
            liquidity: params.amount_desired,
        })
    }

    async fn borrow(&self, params: BorrowParams) -> Result<BorrowReceipt, ProtocolError> {
        let (failure, shortfall, slow_by, late) = {
            let mut state = self.state.lock();
            state.calls.push("borrow");
            state.last_borrow = Some(params.clone());
            (
                state.borrow_failure.clone(),
                state.borrow_shortfall,
                state.slow_by,
                state.late.get("borrow").copied(),
            )
        };
        if let Some(delay) = slow_by {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = failure {
            return Err(reverted(&reason));
        }

        self.ledger
            .transfer_from(params.pool, account(), router(), router(), params.liquidity)?;
        self.state.lock().collateral = params.liquidity;

        let lent = params.amount_requested - shortfall;
        self.ledger
            .transfer(params.token_a, router(), params.recipient, lent)?;
        if let Some(delay) = late {
            tokio::time::sleep(delay).await;
        }

        Ok(BorrowReceipt {
            amount0: lent,
            amount1: U256::zero(),
        })
    }

    async fn repay(&self, params: RepayParams) -> Result<(), ProtocolError> {
        let (failure, collateral) = {
            let mut state = self.state.lock();
            state.calls.push("repay");
            (state.repay_failure.clone(), state.collateral)
        };
        if let Some(reason) = failure {
            return Err(reverted(&reason));
        }

        self.ledger
            .transfer(params.token_a, account(), router(), params.amount0)?;
        self.ledger
            .transfer(params.pool, router(), account(), collateral)?;
        self.state.lock().collateral = U256::zero();
        Ok(())
    }

    async fn remove_liquidity(
        &self,
        params: RemoveLiquidityParams,
    ) -> Result<LiquidityReceipt, ProtocolError> {
        let failure = {
            let mut state = self.state.lock();
            state.calls.push("remove_liquidity");
            state.remove_failure.clone()
        };
        if let Some(reason) = failure {
            return Err(reverted(&reason));
        }

        self.ledger
            .burn(params.pool, params.recipient, params.liquidity)?;
        self.ledger
            .transfer(params.token_a, router(), params.recipient, params.liquidity)?;

        Ok(LiquidityReceipt {
            amount_a: params.liquidity,
            amount_b: U256::zero(),
            liquidity: params.liquidity,
        })
    }
}

// ---------------------------------------------------------------------------
// Lending pool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PoolState {
    calls: Vec<FlashLoanCall>,
    initiator_override: Option<Address>,
    stall: bool,
    hold: Option<(Arc<Notify>, Arc<Notify>)>,
}

/// Flash lender: grants, calls back as `lending_pool()`, pulls back amount + premium.
pub struct FakeLendingPool {
    ledger: Arc<FakeLedger>,
    premium_bps: u32,
    state: Mutex<PoolState>,
}

impl FakeLendingPool {
    pub fn new(ledger: Arc<FakeLedger>) -> Self {
        ledger.mint(asset(), lending_pool(), U256::from(RESERVE));
        Self {
            ledger,
            premium_bps: 9,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn report_initiator(&self, initiator: Address) {
        self.state.lock().initiator_override = Some(initiator);
    }

    /// Never answer: exercises the loan timeout.
    pub fn stall(&self) {
        self.state.lock().stall = true;
    }

    /// Signal `entered` once the loan is requested, then wait for `release`.
    pub fn hold(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.state.lock().hold = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn calls(&self) -> Vec<FlashLoanCall> {
        self.state.lock().calls.clone()
    }

    pub fn reserve(&self) -> U256 {
        self.ledger.balance(asset(), lending_pool())
    }

    fn undo(&self, receiver: Address, amount: U256) {
        // Best effort: the receiver's compensation has restored the asset by now
        let _ = self.ledger.transfer(asset(), receiver, lending_pool(), amount);
    }
}

#[async_trait]
impl LendingPool for FakeLendingPool {
    async fn flash_loan(
        &self,
        receiver: &dyn FlashLoanReceiver,
        call: FlashLoanCall,
    ) -> Result<(), ProtocolError> {
        let (stall, hold, initiator) = {
            let mut state = self.state.lock();
            state.calls.push(call.clone());
            (
                state.stall,
                state.hold.clone(),
                state.initiator_override.unwrap_or(call.receiver),
            )
        };

        if stall {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }

        let amount = call.amounts[0];
        let premium = protocol_fee(amount, self.premium_bps);
        self.ledger
            .transfer(call.assets[0], lending_pool(), call.receiver, amount)?;

        let callback = FlashLoanCallback {
            assets: call.assets.clone(),
            amounts: call.amounts.clone(),
            premiums: vec![premium],
            initiator,
            params: call.params.clone(),
        };

        match receiver.execute_operation(lending_pool(), callback).await {
            Ok(true) => {
                let repayment = amount + premium;
                if let Err(e) = self.ledger.transfer_from(
                    call.assets[0],
                    call.receiver,
                    lending_pool(),
                    lending_pool(),
                    repayment,
                ) {
                    self.undo(call.receiver, amount);
                    return Err(e);
                }
                Ok(())
            }
            Ok(false) => {
                self.undo(call.receiver, amount);
                Err(reverted("flash loan callback returned false"))
            }
            Err(e) => {
                self.undo(call.receiver, amount);
                Err(ProtocolError::Callback(Box::new(e)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

pub struct FakeOracle {
    round: Mutex<RoundData>,
    calls: AtomicU32,
}

impl FakeOracle {
    pub fn new(gas_price: u64) -> Self {
        Self {
            round: Mutex::new(RoundData {
                round_id: 7,
                answer: I256::from_raw(U256::from(gas_price)),
                started_at: NOW,
                updated_at: NOW,
                answered_in_round: 7,
            }),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_gas_price(&self, gas_price: u64) {
        self.round.lock().answer = I256::from_raw(U256::from(gas_price));
    }

    pub fn set_updated_at(&self, updated_at: u64) {
        self.round.lock().updated_at = updated_at;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PriceOracle for FakeOracle {
    async fn latest_round_data(&self) -> Result<RoundData, ProtocolError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(*self.round.lock())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn test_config() -> FlashLeverageConfig {
    let mut config = FlashLeverageConfig {
        addresses: AddressConfig {
            asset: format!("{:?}", asset()),
            paired_token: format!("{:?}", paired_token()),
            lending_pool: format!("{:?}", lending_pool()),
            router: format!("{:?}", router()),
            pool: format!("{:?}", pool_token()),
            oracle: format!("{:?}", oracle()),
            account: format!("{:?}", account()),
        },
        ..Default::default()
    };
    // Gas price quoted in base units, 100 gas: execution cost == 100 * price
    config.fees.oracle_scale = 1;
    config.fees.gas_estimate = 100;
    config.execution.call_timeout_ms = 1_000;
    config.execution.loan_timeout_ms = 5_000;
    config.execution.retry_backoff_ms = 1;
    config
}

pub struct Harness {
    pub ledger: Arc<FakeLedger>,
    pub router: Arc<FakeRouter>,
    pub pool: Arc<FakeLendingPool>,
    pub oracle: Arc<FakeOracle>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<LoanInitiator>,
}

impl Harness {
    /// Engine account funded with `balance` of the asset, gas price 1.
    pub fn new(balance: u64) -> Self {
        Self::with_config(balance, test_config())
    }

    pub fn with_config(balance: u64, config: FlashLeverageConfig) -> Self {
        let ledger = Arc::new(FakeLedger::new(account()));
        ledger.mint(asset(), account(), U256::from(balance));

        let router = Arc::new(FakeRouter::new(ledger.clone()));
        let pool = Arc::new(FakeLendingPool::new(ledger.clone()));
        let oracle = Arc::new(FakeOracle::new(1));
        let clock = Arc::new(ManualClock::new(NOW));

        let collaborators = Collaborators::new(
            ledger.clone(),
            pool.clone(),
            router.clone(),
            oracle.clone(),
        )
        .with_clock(clock.clone());
        let engine = Arc::new(
            LoanInitiator::new(&config, collaborators).expect("test config must be valid"),
        );

        Self {
            ledger,
            router,
            pool,
            oracle,
            clock,
            engine,
        }
    }

    pub fn asset_balance(&self, holder: Address) -> U256 {
        self.ledger.balance(asset(), holder)
    }

    pub fn pool_tokens(&self, holder: Address) -> U256 {
        self.ledger.balance(pool_token(), holder)
    }

    /// Every allowance the engine account could have granted during an operation.
    pub fn engine_allowances(&self) -> Vec<U256> {
        vec![
            self.ledger.allowance_of(asset(), account(), router()),
            self.ledger.allowance_of(pool_token(), account(), router()),
            self.ledger.allowance_of(asset(), account(), lending_pool()),
        ]
    }
}
