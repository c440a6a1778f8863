use bond_common::ReasonCode;
use bond_engine::{EngineConfig, RedemptionMode};
use clap::Parser;
use std::net::SocketAddr;

/// Server configuration, from flags or the environment (a `.env` file is honoured)
#[derive(Debug, Clone, Parser)]
#[command(name = "bondd", version, about = "Bond contracts and points ledger service")]
pub struct ApiConfig {
    /// Address to listen on
    #[arg(long, env = "BOND_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Offset from UTC, in minutes, for users who have not set a timezone
    #[arg(
        long,
        env = "BOND_DEFAULT_UTC_OFFSET_MINUTES",
        default_value_t = 0,
        allow_hyphen_values = true
    )]
    pub default_utc_offset_minutes: i32,

    /// Reject redemptions that exceed the current balance
    #[arg(long, env = "BOND_REQUIRE_SUFFICIENT_BALANCE")]
    pub require_sufficient_balance: bool,

    /// Points awarded per daily check-in
    #[arg(long, env = "BOND_CHECK_IN_POINTS", default_value_t = 1)]
    pub check_in_points: i64,

    /// Reason codes that count towards a streak
    #[arg(
        long,
        env = "BOND_STREAK_REASONS",
        value_delimiter = ',',
        default_value = "daily_check_in,task_completed"
    )]
    pub streak_reasons: Vec<String>,
}

impl ApiConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            streak_reasons: self
                .streak_reasons
                .iter()
                .map(|reason| reason.trim())
                .filter(|reason| !reason.is_empty())
                .map(ReasonCode::from)
                .collect(),
            default_utc_offset_minutes: self.default_utc_offset_minutes,
            redemption: if self.require_sufficient_balance {
                RedemptionMode::RequireSufficientBalance
            } else {
                RedemptionMode::AllowOverdraft
            },
            check_in_points: self.check_in_points,
            ..EngineConfig::default()
        }
    }
}
