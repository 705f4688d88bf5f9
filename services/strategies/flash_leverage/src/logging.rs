//! Standardized emoji logging for flash leverage modules
//!
//! Provides consistent emoji usage across the pre-flight gate, initiator and
//! callback stages, plus subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Standard emoji set for flash leverage logging
pub struct LogEmoji;

impl LogEmoji {
    // Status indicators
    pub const SUCCESS: &'static str = "✅"; // Operation succeeded
    pub const ERROR: &'static str = "❌"; // Operation failed
    pub const WARNING: &'static str = "⚠️"; // Warning or caution

    // Module-specific
    pub const GATE: &'static str = "🛡️"; // Pre-flight risk checks
    pub const LOAN: &'static str = "⚡"; // Flash loan request / callback entry
    pub const INVEST: &'static str = "➕"; // Liquidity provision
    pub const LEVERAGE: &'static str = "🏦"; // Collateral loan
    pub const REPAY: &'static str = "💰"; // Repayment approval
    pub const ROLLBACK: &'static str = "↩️"; // Compensation
    pub const GAS: &'static str = "⛽"; // Gas price/costs
    pub const CLOCK: &'static str = "⏱️"; // Timing/latency
}

// Convenience macros for standardized logging
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::SUCCESS, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!("{} {}", $crate::logging::LogEmoji::ERROR, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_stage {
    ($emoji:ident, $($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::$emoji, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_rollback {
    ($($arg:tt)*) => {
        tracing::warn!("{} {}", $crate::logging::LogEmoji::ROLLBACK, format!($($arg)*))
    };
}

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        // Already installed (tests, embedding binaries)
        tracing::debug!("tracing subscriber not installed: {}", e);
    }
}
