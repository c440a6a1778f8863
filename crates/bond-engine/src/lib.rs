/*!
# Bond Engine

Contract co-signature and points ledger engine.

## Components
- [`MembershipResolver`]: who is an active member of a bond
- [`QuorumTracker`]: signature submission and the one-way transition to `active`
- [`LedgerAccumulator`]: balances and streaks folded from the append-only ledger
- [`ActivityEmitter`]: audit trail entries and best-effort notification fan-out

[`BondEngine`] wires them to a [`bond_storage::RecordStore`] and runs every
operation as a single store transaction.
*/

pub mod activity;
pub mod config;
pub mod contracts;
pub mod engine;
pub mod ledger;
pub mod membership;
pub mod points;
pub mod policy;
pub mod quorum;

pub use activity::{ActivityEmitter, EmitOutcome, Outbox};
pub use config::{offset_from_minutes, EngineConfig, RedemptionMode};
pub use contracts::{ContractService, ContractView};
pub use engine::{BondEngine, LeaveOutcome, SignOutcome};
pub use ledger::{BalanceReport, EntryRequest, LedgerAccumulator, RecordOutcome};
pub use membership::MembershipResolver;
pub use points::{PointsAward, StreakReport, MAX_POINTS_PER_ENTRY};
pub use policy::{policy_for, AllowOverdraft, RedemptionPolicy, RequireSufficientBalance};
pub use quorum::{QuorumOutcome, QuorumState, QuorumTracker};
