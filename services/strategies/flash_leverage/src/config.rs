//! # Flash Leverage Configuration - Injected Protocol Wiring
//!
//! ## Purpose
//!
//! Runtime parameters for the flash leverage engine with no protocol addresses baked
//! into code. Supports JSON or TOML files, `FLASH_LEVERAGE_*` environment overrides,
//! and validation at startup so a malformed address or a mistyped checksum never
//! reaches the engine.
//!
//! ## Integration Points
//!
//! - **Input Sources**: JSON/TOML configuration files, environment variables
//! - **Output Destinations**: `LoanInitiator`, `CallbackExecutor`, `FeeEstimator`, `RiskGate`
//! - **Validation**: EIP-55 checksum, non-zero and distinct addresses, numeric ranges
//!
//! ## Architecture Role
//!
//! ```text
//! Config File / Env  →  [FlashLeverageConfig::validate]  →  ResolvedAddresses
//!        ↓                         ↓                               ↓
//! Protocol addresses       Checksum verification          Engine construction
//! Fee / gas parameters     Range checks                   Fee estimation
//! Slippage minimums        Ratio precision                Callback stage params
//! Timeouts / retries       Distinctness                   External call bounds
//! ```

use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::error::LeverageError;
use crate::retry::RetryPolicy;

/// Basis point denominator used for premiums and position ratios
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Lending protocol premium: 9 bps (0.09%)
pub const DEFAULT_PREMIUM_BPS: u32 = 9;

/// Oracle quotes gas price in gwei; the ledger's base unit is wei
pub const DEFAULT_ORACLE_SCALE: u64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

impl From<ConfigError> for LeverageError {
    fn from(err: ConfigError) -> Self {
        LeverageError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Complete configuration for the flash leverage strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashLeverageConfig {
    /// Protocol identities
    pub addresses: AddressConfig,
    /// Protocol fee and execution cost parameters
    pub fees: FeeConfig,
    /// Pre-flight limits
    pub risk: RiskConfig,
    /// Callback stage and external call parameters
    pub execution: ExecutionConfig,
}

/// Protocol addresses, kept as strings until validated.
///
/// Defaults are empty: every address must be supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressConfig {
    /// Asset borrowed through the flash loan
    pub asset: String,
    /// Second token of the liquidity pool
    pub paired_token: String,
    pub lending_pool: String,
    pub router: String,
    /// Liquidity pool whose position token is pledged as collateral
    pub pool: String,
    /// Gas price feed
    pub oracle: String,
    /// Engine account: flash loan receiver and initiator
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Flash loan premium in basis points
    pub premium_bps: u32,
    /// Gas units for the whole operation (loan + invest + leverage + repay)
    pub gas_estimate: u64,
    /// Multiplier from the oracle's quoted unit to the ledger base unit
    pub oracle_scale: u64,
    /// Oracle readings older than this are rejected
    pub max_oracle_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Largest loan as a fraction of the available balance (e.g. 0.67)
    pub max_position_ratio: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Pool fee tier (hundredths of a bip, 3000 = 0.3%)
    pub pool_fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    /// Minimum deposit accepted by `add_liquidity`
    pub liquidity_amount_min: u128,
    /// Minimum amount accepted from `borrow`
    pub borrow_amount_min: u128,
    /// Deadline for router calls, seconds after the stage starts
    pub deadline_offset_secs: u64,
    /// Timeout for every single external call
    pub call_timeout_ms: u64,
    /// Timeout for the lending pool to enter the callback; a running callback is not cut short
    pub loan_timeout_ms: u64,
    /// Attempts for read-only queries (balance, oracle)
    pub read_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl FeeConfig {
    /// Range checks for the fee parameters alone
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.premium_bps > BPS_DENOMINATOR {
            return Err(ConfigError::invalid(
                "fees.premium_bps",
                "must be <= 10000 (100%)",
            ));
        }
        if self.gas_estimate == 0 {
            return Err(ConfigError::invalid("fees.gas_estimate", "must be positive"));
        }
        if self.oracle_scale == 0 {
            return Err(ConfigError::invalid("fees.oracle_scale", "must be positive"));
        }
        if self.max_oracle_age_secs == 0 {
            return Err(ConfigError::invalid(
                "fees.max_oracle_age_secs",
                "must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            premium_bps: DEFAULT_PREMIUM_BPS,
            gas_estimate: 650_000,
            oracle_scale: DEFAULT_ORACLE_SCALE,
            max_oracle_age_secs: 3_600,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_ratio: dec!(0.67),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            pool_fee: 3_000,
            tick_lower: -887_220,
            tick_upper: 887_220,
            liquidity_amount_min: 0,
            borrow_amount_min: 0,
            deadline_offset_secs: 0,
            call_timeout_ms: 15_000,
            loan_timeout_ms: 120_000,
            read_attempts: 3,
            retry_backoff_ms: 250,
        }
    }
}

/// Validated protocol addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddresses {
    pub asset: Address,
    pub paired_token: Address,
    pub lending_pool: Address,
    pub router: Address,
    pub pool: Address,
    pub oracle: Address,
    pub account: Address,
}

/// Parse an address, rejecting zero and mixed-case strings that fail EIP-55.
pub fn parse_address(field: &'static str, raw: &str) -> Result<Address, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::invalid(field, "address is required"));
    }
    let hex = trimmed.strip_prefix("0x").ok_or_else(|| {
        ConfigError::invalid(field, format!("'{}' must start with 0x", trimmed))
    })?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::invalid(
            field,
            format!("'{}' is not a 20-byte hex address", trimmed),
        ));
    }

    let address: Address = hex
        .parse()
        .map_err(|e| ConfigError::invalid(field, format!("'{}': {}", trimmed, e)))?;
    if address.is_zero() {
        return Err(ConfigError::invalid(field, "zero address"));
    }

    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        let expected = to_checksum(&address, None);
        if expected != trimmed {
            return Err(ConfigError::invalid(
                field,
                format!("'{}' fails checksum (expected {})", trimmed, expected),
            ));
        }
    }

    Ok(address)
}

impl AddressConfig {
    pub fn resolve(&self) -> Result<ResolvedAddresses, ConfigError> {
        let resolved = ResolvedAddresses {
            asset: parse_address("addresses.asset", &self.asset)?,
            paired_token: parse_address("addresses.paired_token", &self.paired_token)?,
            lending_pool: parse_address("addresses.lending_pool", &self.lending_pool)?,
            router: parse_address("addresses.router", &self.router)?,
            pool: parse_address("addresses.pool", &self.pool)?,
            oracle: parse_address("addresses.oracle", &self.oracle)?,
            account: parse_address("addresses.account", &self.account)?,
        };

        let named = [
            ("asset", resolved.asset),
            ("paired_token", resolved.paired_token),
            ("lending_pool", resolved.lending_pool),
            ("router", resolved.router),
            ("pool", resolved.pool),
            ("oracle", resolved.oracle),
            ("account", resolved.account),
        ];
        for (i, (name_a, addr_a)) in named.iter().enumerate() {
            for (name_b, addr_b) in &named[i + 1..] {
                if addr_a == addr_b {
                    return Err(ConfigError::invalid(
                        "addresses",
                        format!("{} and {} share address {:?}", name_a, name_b, addr_a),
                    ));
                }
            }
        }

        Ok(resolved)
    }
}

impl RiskConfig {
    /// Position ratio in basis points, exact.
    pub fn max_position_bps(&self) -> Result<u32, ConfigError> {
        let ratio = self.max_position_ratio;
        if ratio <= Decimal::ZERO || ratio > Decimal::ONE {
            return Err(ConfigError::invalid(
                "risk.max_position_ratio",
                format!("{} must be in (0, 1]", ratio),
            ));
        }
        let scaled = ratio * Decimal::from(BPS_DENOMINATOR);
        if scaled.fract() != Decimal::ZERO {
            return Err(ConfigError::invalid(
                "risk.max_position_ratio",
                format!("{} has more than 4 decimal places", ratio),
            ));
        }
        scaled.to_u32().ok_or_else(|| {
            ConfigError::invalid("risk.max_position_ratio", format!("{} out of range", ratio))
        })
    }
}

impl ExecutionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn loan_timeout(&self) -> Duration {
        Duration::from_millis(self.loan_timeout_ms)
    }

    pub fn read_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.read_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            call_timeout: self.call_timeout(),
        }
    }

    pub fn liquidity_min(&self) -> U256 {
        U256::from(self.liquidity_amount_min)
    }

    pub fn borrow_min(&self) -> U256 {
        U256::from(self.borrow_amount_min)
    }
}

impl FlashLeverageConfig {
    /// Load configuration from a `.json` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        if is_toml {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: display,
                message: e.to_string(),
            })
        } else {
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: display,
                message: e.to_string(),
            })
        }
    }

    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Override fields with `FLASH_LEVERAGE_*` environment variables when present
    pub fn apply_env_overrides(&mut self) {
        let addresses = [
            ("FLASH_LEVERAGE_ASSET", &mut self.addresses.asset),
            ("FLASH_LEVERAGE_PAIRED_TOKEN", &mut self.addresses.paired_token),
            ("FLASH_LEVERAGE_LENDING_POOL", &mut self.addresses.lending_pool),
            ("FLASH_LEVERAGE_ROUTER", &mut self.addresses.router),
            ("FLASH_LEVERAGE_POOL", &mut self.addresses.pool),
            ("FLASH_LEVERAGE_ORACLE", &mut self.addresses.oracle),
            ("FLASH_LEVERAGE_ACCOUNT", &mut self.addresses.account),
        ];
        for (var, field) in addresses {
            if let Ok(value) = std::env::var(var) {
                *field = value;
            }
        }

        if let Ok(gas) = std::env::var("FLASH_LEVERAGE_GAS_ESTIMATE") {
            if let Ok(value) = gas.parse::<u64>() {
                self.fees.gas_estimate = value;
            }
        }

        if let Ok(ratio) = std::env::var("FLASH_LEVERAGE_MAX_POSITION_RATIO") {
            if let Ok(value) = ratio.parse::<Decimal>() {
                self.risk.max_position_ratio = value;
            }
        }

        if let Ok(timeout) = std::env::var("FLASH_LEVERAGE_CALL_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.execution.call_timeout_ms = value;
            }
        }

        if let Ok(timeout) = std::env::var("FLASH_LEVERAGE_LOAN_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.execution.loan_timeout_ms = value;
            }
        }
    }

    /// Save configuration to a JSON file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Validate all parameters, returning the resolved addresses
    pub fn validate(&self) -> Result<ResolvedAddresses, ConfigError> {
        let addresses = self.addresses.resolve()?;
        self.fees.validate()?;
        self.risk.max_position_bps()?;

        if self.execution.tick_lower >= self.execution.tick_upper {
            return Err(ConfigError::invalid(
                "execution.tick_lower",
                "must be below tick_upper",
            ));
        }
        if self.execution.call_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "execution.call_timeout_ms",
                "must be positive",
            ));
        }
        if self.execution.loan_timeout_ms < self.execution.call_timeout_ms {
            return Err(ConfigError::invalid(
                "execution.loan_timeout_ms",
                "must be at least call_timeout_ms",
            ));
        }
        if self.execution.read_attempts == 0 {
            return Err(ConfigError::invalid(
                "execution.read_attempts",
                "must be at least 1",
            ));
        }

        Ok(addresses)
    }
}
