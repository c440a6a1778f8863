//! Point-awarding flows, balances, streaks and the user's timezone.

use bond_common::{
    ActivityEventType, BondError, BondId, BondResult, LedgerEntry, ReasonCode, UserId,
    UserPreferences,
};
use bond_storage::StoreTransaction;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::activity::Outbox;
use crate::config::offset_from_minutes;
use crate::engine::BondEngine;
use crate::ledger::{BalanceReport, EntryRequest};

/// A ledger write together with the balance after it
#[derive(Debug, Clone, Serialize)]
pub struct PointsAward {
    pub entry: LedgerEntry,
    pub balance: i64,
    /// False when an idempotency key replayed an earlier entry
    pub newly_recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakReport {
    pub user_id: UserId,
    pub current: u32,
    pub longest: u32,
    /// Today in the user's timezone
    pub today: NaiveDate,
    pub utc_offset_minutes: i32,
}

/// Largest points value a single award, cost or adjustment may carry
pub const MAX_POINTS_PER_ENTRY: i64 = 1_000_000_000;

fn require_positive(points: i64, what: &str) -> BondResult<()> {
    if points <= 0 {
        return Err(BondError::invalid_input(format!(
            "{} must be positive, got {}",
            what, points
        )));
    }
    require_bounded(points, what)
}

fn require_bounded(points: i64, what: &str) -> BondResult<()> {
    if points.unsigned_abs() > MAX_POINTS_PER_ENTRY.unsigned_abs() {
        return Err(BondError::invalid_input(format!(
            "{} of {} exceeds {} points",
            what, points, MAX_POINTS_PER_ENTRY
        )));
    }
    Ok(())
}

fn require_ref(reference: &str, what: &str) -> BondResult<()> {
    if reference.trim().is_empty() {
        return Err(BondError::invalid_input(format!("{} must not be empty", what)));
    }
    Ok(())
}

impl BondEngine {
    /// Append a ledger entry for an active member and log the matching activity.
    /// Nothing new is logged when the entry's idempotency key replays.
    async fn award(
        &self,
        tx: &mut dyn StoreTransaction,
        outbox: &mut Outbox,
        actor: &UserId,
        request: EntryRequest,
        event_type: ActivityEventType,
        payload: serde_json::Value,
    ) -> BondResult<PointsAward> {
        let outcome = self.ledger.record_with(tx, request).await?;
        if outcome.newly_recorded {
            if let Some(bond_id) = outcome.entry.bond_id {
                self.emitter
                    .record(
                        tx,
                        outbox,
                        &bond_id,
                        actor,
                        event_type,
                        payload,
                        Some(format!("ledger:{}", outcome.entry.id)),
                    )
                    .await?;
            }
        }
        let balance = self.ledger.balance(tx, &outcome.entry.user_id).await?;
        Ok(PointsAward {
            entry: outcome.entry,
            balance,
            newly_recorded: outcome.newly_recorded,
        })
    }

    async fn require_member_of(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
        user_id: &UserId,
    ) -> BondResult<()> {
        self.membership.require_bond(tx, bond_id).await?;
        self.membership.require_active_member(tx, bond_id, user_id).await
    }

    /// Run one award in its own transaction
    async fn run_award(
        &self,
        bond_id: &BondId,
        actor: &UserId,
        request: EntryRequest,
        event_type: ActivityEventType,
        payload: serde_json::Value,
    ) -> BondResult<PointsAward> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result: BondResult<_> = async {
            self.require_member_of(tx.as_mut(), bond_id, actor).await?;
            self.award(tx.as_mut(), &mut outbox, actor, request, event_type, payload)
                .await
        }
        .await;
        self.finish(tx, outbox, result).await
    }

    /// Plain ledger append at `at`, without activity or idempotency
    pub async fn record(
        &self,
        user_id: &UserId,
        delta: i64,
        reason: ReasonCode,
        at: DateTime<Utc>,
    ) -> BondResult<LedgerEntry> {
        let mut tx = self.begin().await?;
        let result = self.ledger.record(tx.as_mut(), user_id, delta, reason, at).await;
        self.finish(tx, Outbox::new(), result).await
    }

    /// Award points for a task. Completing the same task again awards nothing.
    pub async fn complete_task(
        &self,
        bond_id: &BondId,
        user_id: &UserId,
        task_ref: &str,
        points: i64,
    ) -> BondResult<PointsAward> {
        require_ref(task_ref, "task reference")?;
        require_positive(points, "task points")?;
        let request = EntryRequest::new(user_id.clone(), points, ReasonCode::TaskCompleted)
            .in_bond(*bond_id)
            .with_idempotency_key(format!("task:{}", task_ref));
        self.run_award(
            bond_id,
            user_id,
            request,
            ActivityEventType::TaskCompleted,
            json!({ "task_ref": task_ref, "points": points }),
        )
        .await
    }

    pub async fn unlock_achievement(
        &self,
        bond_id: &BondId,
        user_id: &UserId,
        achievement_ref: &str,
        points: i64,
    ) -> BondResult<PointsAward> {
        require_ref(achievement_ref, "achievement reference")?;
        require_positive(points, "achievement points")?;
        let request = EntryRequest::new(user_id.clone(), points, ReasonCode::AchievementUnlocked)
            .in_bond(*bond_id)
            .with_idempotency_key(format!("achievement:{}", achievement_ref));
        self.run_award(
            bond_id,
            user_id,
            request,
            ActivityEventType::AchievementUnlocked,
            json!({ "achievement_ref": achievement_ref, "points": points }),
        )
        .await
    }

    /// Spend points on a reward, subject to the configured redemption policy.
    ///
    /// A repeated `idempotency_key` returns the original redemption even if the
    /// balance has changed since.
    pub async fn redeem_reward(
        &self,
        bond_id: &BondId,
        user_id: &UserId,
        reward_ref: &str,
        cost: i64,
        idempotency_key: Option<&str>,
    ) -> BondResult<PointsAward> {
        require_ref(reward_ref, "reward reference")?;
        require_positive(cost, "reward cost")?;

        let mut request = EntryRequest::new(user_id.clone(), -cost, ReasonCode::RewardRedeemed)
            .in_bond(*bond_id)
            .with_note(format!("reward {}", reward_ref));
        if let Some(key) = idempotency_key {
            require_ref(key, "idempotency key")?;
            request = request.with_idempotency_key(format!("reward:{}:{}", reward_ref, key.trim()));
        }

        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result: BondResult<_> = async {
            self.require_member_of(tx.as_mut(), bond_id, user_id).await?;

            let replayed = match &request.idempotency_key {
                Some(key) => tx.find_ledger_entry(user_id, key).await?.is_some(),
                None => false,
            };
            if !replayed {
                let balance = self.ledger.balance(tx.as_mut(), user_id).await?;
                self.policy.check(user_id, balance, cost)?;
            }

            self.award(
                tx.as_mut(),
                &mut outbox,
                user_id,
                request,
                ActivityEventType::RewardRedeemed,
                json!({ "reward_ref": reward_ref, "cost": cost }),
            )
            .await
        }
        .await;
        self.finish(tx, outbox, result).await
    }

    /// Daily check-in, at most once per local calendar day
    pub async fn check_in(&self, bond_id: &BondId, user_id: &UserId) -> BondResult<PointsAward> {
        let mut tx = self.begin().await?;
        let result: BondResult<_> = async {
            self.require_member_of(tx.as_mut(), bond_id, user_id).await?;
            let offset = self.offset_for(tx.as_mut(), user_id).await?;
            let today = self.today_in(offset);
            let request = EntryRequest::new(
                user_id.clone(),
                self.config.check_in_points,
                ReasonCode::DailyCheckIn,
            )
            .in_bond(*bond_id)
            .with_idempotency_key(format!("check-in:{}", today));

            let outcome = self.ledger.record_with(tx.as_mut(), request).await?;
            let balance = self.ledger.balance(tx.as_mut(), user_id).await?;
            Ok(PointsAward {
                entry: outcome.entry,
                balance,
                newly_recorded: outcome.newly_recorded,
            })
        }
        .await;
        self.finish(tx, Outbox::new(), result).await
    }

    /// Manual correction of another member's points by a co-member
    pub async fn adjust_points(
        &self,
        bond_id: &BondId,
        admin: &UserId,
        target: &UserId,
        delta: i64,
        note: Option<&str>,
    ) -> BondResult<PointsAward> {
        if delta == 0 {
            return Err(BondError::invalid_input("adjustment must not be zero"));
        }
        require_bounded(delta, "adjustment")?;
        if admin == target {
            return Err(BondError::unauthorized(format!(
                "{} cannot adjust their own points",
                admin
            )));
        }

        let mut request = EntryRequest::new(target.clone(), delta, ReasonCode::ManualAdjustment)
            .in_bond(*bond_id);
        if let Some(note) = note {
            request = request.with_note(note);
        }

        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result: BondResult<_> = async {
            self.require_member_of(tx.as_mut(), bond_id, admin).await?;
            self.membership
                .require_active_member(tx.as_mut(), bond_id, target)
                .await?;
            info!("{} adjusting {} by {:+} points", admin, target, delta);
            self.award(
                tx.as_mut(),
                &mut outbox,
                admin,
                request,
                ActivityEventType::PointsAdjusted,
                json!({ "user_id": target, "delta": delta, "note": note }),
            )
            .await
        }
        .await;
        self.finish(tx, outbox, result).await
    }

    // --- Reads ---

    pub async fn balance(&self, user_id: &UserId) -> BondResult<i64> {
        let mut tx = self.begin().await?;
        let result = self.ledger.balance(tx.as_mut(), user_id).await;
        self.finish_read(tx, result).await
    }

    /// Balance folded from the full ledger, bypassing the materialized sum
    pub async fn recompute_balance(&self, user_id: &UserId) -> BondResult<i64> {
        let mut tx = self.begin().await?;
        let result = self.ledger.recompute_balance(tx.as_mut(), user_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn balance_report(&self, user_id: &UserId) -> BondResult<BalanceReport> {
        let mut tx = self.begin().await?;
        let result = self.ledger.balance_report(tx.as_mut(), user_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn ledger_history(&self, user_id: &UserId) -> BondResult<Vec<LedgerEntry>> {
        let mut tx = self.begin().await?;
        let result = self.ledger.history(tx.as_mut(), user_id).await;
        self.finish_read(tx, result).await
    }

    /// Streak ending today in the user's timezone, using the configured qualifying reasons
    pub async fn current_streak(&self, user_id: &UserId) -> BondResult<u32> {
        let reasons = self.config.streak_reasons.clone();
        self.current_streak_for(user_id, &reasons).await
    }

    pub async fn current_streak_for(
        &self,
        user_id: &UserId,
        qualifying: &[ReasonCode],
    ) -> BondResult<u32> {
        let mut tx = self.begin().await?;
        let result: BondResult<_> = async {
            let offset = self.offset_for(tx.as_mut(), user_id).await?;
            let today = self.today_in(offset);
            self.ledger
                .current_streak(tx.as_mut(), user_id, qualifying, today, offset)
                .await
        }
        .await;
        self.finish_read(tx, result).await
    }

    pub async fn longest_streak(&self, user_id: &UserId) -> BondResult<u32> {
        let mut tx = self.begin().await?;
        let result: BondResult<_> = async {
            let offset = self.offset_for(tx.as_mut(), user_id).await?;
            self.ledger
                .longest_streak(tx.as_mut(), user_id, &self.config.streak_reasons, offset)
                .await
        }
        .await;
        self.finish_read(tx, result).await
    }

    pub async fn streak_report(&self, user_id: &UserId) -> BondResult<StreakReport> {
        let mut tx = self.begin().await?;
        let result: BondResult<_> = async {
            let offset = self.offset_for(tx.as_mut(), user_id).await?;
            let today = self.today_in(offset);
            let reasons = &self.config.streak_reasons;
            let current = self
                .ledger
                .current_streak(tx.as_mut(), user_id, reasons, today, offset)
                .await?;
            let longest = self
                .ledger
                .longest_streak(tx.as_mut(), user_id, reasons, offset)
                .await?;
            Ok(StreakReport {
                user_id: user_id.clone(),
                current,
                longest,
                today,
                utc_offset_minutes: offset.local_minus_utc() / 60,
            })
        }
        .await;
        self.finish_read(tx, result).await
    }

    // --- Timezone ---

    pub async fn set_utc_offset(&self, user_id: &UserId, minutes: i32) -> BondResult<UserPreferences> {
        offset_from_minutes(minutes)?;
        let preferences = UserPreferences {
            user_id: user_id.clone(),
            utc_offset_minutes: minutes,
            updated_at: self.clock.now(),
        };

        let mut tx = self.begin().await?;
        let result = tx
            .put_preferences(preferences.clone())
            .await
            .map(|_| preferences)
            .map_err(BondError::from);
        if result.is_ok() {
            info!("{} set utc offset to {} minutes", user_id, minutes);
        }
        self.finish(tx, Outbox::new(), result).await
    }

    /// Stored preference, or the configured default
    pub(crate) async fn offset_for(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
    ) -> BondResult<FixedOffset> {
        match tx.get_preferences(user_id).await? {
            Some(preferences) => offset_from_minutes(preferences.utc_offset_minutes),
            None => self.config.default_offset(),
        }
    }

    fn today_in(&self, offset: FixedOffset) -> NaiveDate {
        self.clock.now().with_timezone(&offset).date_naive()
    }
}
