use bond_common::{BondError, BondResult, ReasonCode};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

/// Widest offset any civil timezone uses
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// How redemptions that exceed the current balance are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionMode {
    /// Record the redemption; the negative balance is reported, not prevented
    AllowOverdraft,
    /// Reject redemptions the balance cannot cover
    RequireSufficientBalance,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reason codes that count towards a streak
    pub streak_reasons: Vec<ReasonCode>,

    /// Offset used for users without a stored preference
    pub default_utc_offset_minutes: i32,

    pub redemption: RedemptionMode,

    /// Points awarded for a daily check-in
    pub check_in_points: i64,

    /// Cap on activity entries returned per read
    pub activity_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            streak_reasons: vec![ReasonCode::DailyCheckIn, ReasonCode::TaskCompleted],
            default_utc_offset_minutes: 0,
            redemption: RedemptionMode::AllowOverdraft,
            check_in_points: 1,
            activity_page_size: 100,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> BondResult<()> {
        offset_from_minutes(self.default_utc_offset_minutes)?;
        if self.check_in_points <= 0 {
            return Err(BondError::invalid_input("check_in_points must be positive"));
        }
        if self.activity_page_size == 0 {
            return Err(BondError::invalid_input("activity_page_size must be positive"));
        }
        Ok(())
    }

    pub fn default_offset(&self) -> BondResult<FixedOffset> {
        offset_from_minutes(self.default_utc_offset_minutes)
    }
}

/// Convert minutes east of UTC into a [`FixedOffset`], rejecting impossible values
pub fn offset_from_minutes(minutes: i32) -> BondResult<FixedOffset> {
    if !(-MAX_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&minutes) {
        return Err(BondError::invalid_input(format!(
            "utc offset {} minutes is outside ±{} minutes",
            minutes, MAX_UTC_OFFSET_MINUTES
        )));
    }
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| BondError::invalid_input(format!("invalid utc offset {}", minutes)))
}
