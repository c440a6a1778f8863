/*!
# Points Ledger

Balances and streaks are folds over a user's append-only ledger entries. The
store keeps a materialized running sum next to the log; [`LedgerAccumulator::recompute_balance`]
folds the log from scratch and must always agree with it.

Streak arithmetic is kept in pure functions that take "today" explicitly.
*/

use bond_common::{
    BondError, BondId, BondResult, Clock, LedgerEntry, LedgerEntryId, ReasonCode, UserId,
};
use bond_storage::StoreTransaction;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Parameters for one ledger append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRequest {
    pub user_id: UserId,
    pub bond_id: Option<BondId>,
    pub delta: i64,
    pub reason: ReasonCode,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
}

impl EntryRequest {
    pub fn new(user_id: UserId, delta: i64, reason: ReasonCode) -> Self {
        Self {
            user_id,
            bond_id: None,
            delta,
            reason,
            note: None,
            idempotency_key: None,
        }
    }

    pub fn in_bond(mut self, bond_id: BondId) -> Self {
        self.bond_id = Some(bond_id);
        self
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_idempotency_key<S: Into<String>>(mut self, key: S) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub entry: LedgerEntry,
    /// False when an entry with the same idempotency key already existed
    pub newly_recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    pub user_id: UserId,
    pub balance: i64,
    pub overdrawn: bool,
}

#[derive(Debug, Clone)]
pub struct LedgerAccumulator {
    clock: Arc<dyn Clock>,
}

impl LedgerAccumulator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Append one entry at `at`. The running balance is not validated here.
    pub async fn record(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
        delta: i64,
        reason: ReasonCode,
        at: DateTime<Utc>,
    ) -> BondResult<LedgerEntry> {
        let entry = LedgerEntry {
            id: LedgerEntryId::generate(),
            user_id: user_id.clone(),
            bond_id: None,
            delta,
            reason,
            note: None,
            idempotency_key: None,
            created_at: at,
        };
        tx.append_ledger_entry(entry.clone()).await?;
        info!("Recorded {:+} points for {} ({})", delta, user_id, entry.reason);
        Ok(entry)
    }

    /// Append unless the request's idempotency key was already used by this user
    pub async fn record_with(
        &self,
        tx: &mut dyn StoreTransaction,
        request: EntryRequest,
    ) -> BondResult<RecordOutcome> {
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = tx.find_ledger_entry(&request.user_id, key).await? {
                debug!("Ledger key {} already used by {}", key, request.user_id);
                return Ok(RecordOutcome {
                    entry: existing,
                    newly_recorded: false,
                });
            }
        }

        let entry = LedgerEntry {
            id: LedgerEntryId::generate(),
            user_id: request.user_id,
            bond_id: request.bond_id,
            delta: request.delta,
            reason: request.reason,
            note: request.note,
            idempotency_key: request.idempotency_key,
            created_at: self.clock.now(),
        };
        tx.append_ledger_entry(entry.clone()).await?;
        info!(
            "Recorded {:+} points for {} ({})",
            entry.delta, entry.user_id, entry.reason
        );
        Ok(RecordOutcome {
            entry,
            newly_recorded: true,
        })
    }

    /// Materialized balance
    pub async fn balance(&self, tx: &mut dyn StoreTransaction, user_id: &UserId) -> BondResult<i64> {
        Ok(tx.ledger_sum(user_id).await?)
    }

    /// Balance folded from the full log
    pub async fn recompute_balance(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
    ) -> BondResult<i64> {
        let entries = tx.ledger_entries(user_id).await?;
        sum_deltas(&entries).ok_or_else(|| {
            BondError::invalid_state(format!("ledger sum for {} is out of range", user_id))
        })
    }

    pub async fn balance_report(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
    ) -> BondResult<BalanceReport> {
        let balance = self.balance(tx, user_id).await?;
        Ok(BalanceReport {
            user_id: user_id.clone(),
            balance,
            overdrawn: balance < 0,
        })
    }

    /// Newest first
    pub async fn history(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
    ) -> BondResult<Vec<LedgerEntry>> {
        let mut entries = tx.ledger_entries(user_id).await?;
        entries.reverse();
        Ok(entries)
    }

    pub async fn current_streak(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
        qualifying: &[ReasonCode],
        today: NaiveDate,
        offset: FixedOffset,
    ) -> BondResult<u32> {
        let entries = tx.ledger_entries(user_id).await?;
        let dates = qualifying_dates(&entries, qualifying, offset);
        Ok(streak_ending_at(&dates, today))
    }

    pub async fn longest_streak(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
        qualifying: &[ReasonCode],
        offset: FixedOffset,
    ) -> BondResult<u32> {
        let entries = tx.ledger_entries(user_id).await?;
        Ok(longest_run(&qualifying_dates(&entries, qualifying, offset)))
    }
}

pub fn sum_deltas(entries: &[LedgerEntry]) -> Option<i64> {
    entries
        .iter()
        .try_fold(0i64, |sum, e| sum.checked_add(e.delta))
}

/// Distinct local calendar dates with at least one qualifying entry
pub fn qualifying_dates(
    entries: &[LedgerEntry],
    qualifying: &[ReasonCode],
    offset: FixedOffset,
) -> BTreeSet<NaiveDate> {
    entries
        .iter()
        .filter(|e| qualifying.contains(&e.reason))
        .map(|e| e.created_at.with_timezone(&offset).date_naive())
        .collect()
}

/// Consecutive days ending today, or ending yesterday when today has no entry yet
pub fn streak_ending_at(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let start = if dates.contains(&today) {
        Some(today)
    } else {
        today.pred_opt()
    };

    let mut streak = 0;
    let mut day = start;
    while let Some(d) = day.filter(|d| dates.contains(d)) {
        streak += 1;
        day = d.pred_opt();
    }
    streak
}

/// Length of the longest run of consecutive days
pub fn longest_run(dates: &BTreeSet<NaiveDate>) -> u32 {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<NaiveDate> = None;
    for &date in dates {
        current = match previous.and_then(|p| p.succ_opt()) {
            Some(next) if next == date => current + 1,
            _ => 1,
        };
        longest = longest.max(current);
        previous = Some(date);
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dates(days: &[NaiveDate]) -> BTreeSet<NaiveDate> {
        days.iter().copied().collect()
    }

    #[test]
    fn test_streak_counts_through_today() {
        let today = day(2024, 5, 10);
        let set = dates(&[today - Duration::days(2), today - Duration::days(1), today]);
        assert_eq!(streak_ending_at(&set, today), 3);
    }

    #[test]
    fn test_streak_starts_yesterday_when_today_missing() {
        let today = day(2024, 5, 10);
        let set = dates(&[today - Duration::days(3), today - Duration::days(1)]);
        assert_eq!(streak_ending_at(&set, today), 1);
    }

    #[test]
    fn test_streak_broken_before_yesterday() {
        let today = day(2024, 5, 10);
        let set = dates(&[today - Duration::days(2), today - Duration::days(3)]);
        assert_eq!(streak_ending_at(&set, today), 0);
        assert_eq!(streak_ending_at(&BTreeSet::new(), today), 0);
    }

    #[test]
    fn test_future_dates_do_not_count() {
        let today = day(2024, 5, 10);
        let set = dates(&[today + Duration::days(1)]);
        assert_eq!(streak_ending_at(&set, today), 0);
    }

    #[test]
    fn test_longest_run() {
        let set = dates(&[
            day(2024, 2, 27),
            day(2024, 2, 28),
            day(2024, 2, 29),
            day(2024, 3, 1),
            day(2024, 3, 5),
        ]);
        assert_eq!(longest_run(&set), 4);
        assert_eq!(longest_run(&BTreeSet::new()), 0);
    }

    #[test]
    fn test_qualifying_dates_use_local_offset() {
        let entry = |reason: ReasonCode, at: DateTime<Utc>| LedgerEntry {
            id: LedgerEntryId::generate(),
            user_id: UserId::new("u"),
            bond_id: None,
            delta: 1,
            reason,
            note: None,
            idempotency_key: None,
            created_at: at,
        };
        // 02:00 UTC on the 11th is still the 10th five hours west
        let late = Utc.with_ymd_and_hms(2024, 5, 11, 2, 0, 0).unwrap();
        let entries = vec![
            entry(ReasonCode::DailyCheckIn, late),
            entry(ReasonCode::RewardRedeemed, late),
        ];

        let west = FixedOffset::west_opt(5 * 3600).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let qualifying = [ReasonCode::DailyCheckIn];

        assert_eq!(qualifying_dates(&entries, &qualifying, west), dates(&[day(2024, 5, 10)]));
        assert_eq!(qualifying_dates(&entries, &qualifying, utc), dates(&[day(2024, 5, 11)]));
        assert!(qualifying_dates(&entries, &[ReasonCode::TaskCompleted], utc).is_empty());
    }

    #[test]
    fn test_sum_deltas() {
        let make = |delta| LedgerEntry {
            id: LedgerEntryId::generate(),
            user_id: UserId::new("u"),
            bond_id: None,
            delta,
            reason: ReasonCode::ManualAdjustment,
            note: None,
            idempotency_key: None,
            created_at: Utc::now(),
        };
        assert_eq!(sum_deltas(&[make(10), make(-5), make(20)]), Some(25));
        assert_eq!(sum_deltas(&[]), Some(0));
        assert_eq!(sum_deltas(&[make(i64::MAX), make(1)]), None);
        assert_eq!(sum_deltas(&[make(i64::MIN), make(-1)]), None);
    }
}
