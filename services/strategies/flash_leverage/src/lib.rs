//! # Flash Leverage Strategy - Atomic Borrow, Invest, Leverage, Repay
//!
//! ## Purpose
//!
//! Executes a leveraged yield operation in a single all-or-nothing step: take an
//! uncollateralized flash loan, deploy it into a liquidity position, pledge that
//! position for a second loan, and repay the flash loan plus premium from it. If any
//! stage fails, every effect of the stages before it is compensated before the
//! failure is reported.
//!
//! ## Integration Points
//!
//! - **Lending Pool**: grants the flash loan and invokes the callback synchronously
//! - **Liquidity Router**: liquidity provision and borrowing against the position
//! - **Price Oracle**: gas price feed for execution cost estimation
//! - **Asset Ledger**: balances, allowances and approvals for the engine account
//! - **Configuration**: all protocol addresses injected and validated at startup
//!
//! ## Architecture Role
//!
//! ```mermaid
//! graph LR
//!     Caller --> Initiator[LoanInitiator]
//!     Initiator --> Gate[RiskGate]
//!     Gate --> Fees[FeeEstimator]
//!     Fees --> Oracle[PriceOracle]
//!     Initiator --> Pool[LendingPool]
//!     Pool --> Callback[CallbackExecutor]
//!     Callback --> Router[LiquidityRouter]
//!     Callback --> Ledger[AssetLedger]
//!     Callback --> Saga[Compensation Log]
//! ```
//!
//! ## Component Overview
//!
//! - [`fees::FeeEstimator`]: protocol premium and gas-priced execution cost
//! - [`risk::RiskGate`]: position limit and affordability, pure
//! - [`initiator::LoanInitiator`]: pre-flight, in-flight guard, flash loan submission
//! - [`callback::CallbackExecutor`]: stage machine with compensation on abort
//!
//! ```rust,no_run
//! # use flash_leverage::{Collaborators, FlashLeverageConfig, LoanInitiator};
//! # use ethers::types::U256;
//! # async fn run(collaborators: Collaborators) -> flash_leverage::Result<()> {
//! let config = FlashLeverageConfig::from_file("flash_leverage.toml")?;
//! let engine = LoanInitiator::new(&config, collaborators)?;
//! let report = engine.initiate(U256::from(500_000u64)).await?;
//! println!("repaid {} + {}", report.request.amount, report.fees.protocol_fee);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod clock;
pub mod config;
pub mod error;
pub mod fees;
pub mod guard;
pub mod initiator;
pub mod interfaces;
pub mod logging;
pub mod retry;
pub mod risk;
pub mod saga;
pub mod stats;
pub mod types;

pub use callback::CallbackExecutor;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FlashLeverageConfig, ResolvedAddresses};
pub use error::{LeverageError, Result};
pub use fees::{protocol_fee, FeeEstimator};
pub use initiator::LoanInitiator;
pub use interfaces::{
    AddLiquidityParams, AssetLedger, BorrowParams, BorrowReceipt, Collaborators,
    FlashLoanCall, FlashLoanCallback, FlashLoanReceiver, LendingPool, LiquidityReceipt,
    LiquidityRouter, PriceOracle, ProtocolError, RemoveLiquidityParams, RepayParams,
};
pub use risk::RiskGate;
pub use stats::EngineMetrics;
pub use types::{
    CollateralLoan, DebtMode, FeeEstimate, LoanRequest, OperationContext, OperationReport,
    Position, RoundData, Stage,
};
