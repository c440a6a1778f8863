/*!
# Record Models

Persisted records for bonds, contracts, signatures, memberships, the points
ledger, the activity log and notifications.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{
    ActivityId, BondId, ContractId, LedgerEntryId, MembershipId, NotificationId, UserId,
};

/// A multi-party relationship group that owns contracts and shared records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub id: BondId,
    pub name: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Contract lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    PendingSignature,
    Active,
    Void,
}

impl ContractStatus {
    /// Allowed moves: draft → pending_signature → active, and pending_signature → void
    pub fn can_transition_to(self, next: ContractStatus) -> bool {
        matches!(
            (self, next),
            (ContractStatus::Draft, ContractStatus::PendingSignature)
                | (ContractStatus::PendingSignature, ContractStatus::Active)
                | (ContractStatus::PendingSignature, ContractStatus::Void)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ContractStatus::Active | ContractStatus::Void)
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContractStatus::Draft => "draft",
            ContractStatus::PendingSignature => "pending_signature",
            ContractStatus::Active => "active",
            ContractStatus::Void => "void",
        };
        f.write_str(s)
    }
}

/// A contract owned by a bond, signed by its active members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub bond_id: BondId,
    pub title: String,
    pub terms: String,
    pub created_by: UserId,
    pub status: ContractStatus,
    /// Optimistic concurrency token, bumped by the store on every update
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
}

impl Contract {
    pub fn draft(
        bond_id: BondId,
        created_by: UserId,
        title: String,
        terms: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ContractId::generate(),
            bond_id,
            title,
            terms,
            created_by,
            status: ContractStatus::Draft,
            version: 0,
            created_at: at,
            updated_at: at,
            activated_at: None,
            voided_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Unsigned,
    Signed,
}

/// One signer's signature on one contract. Unique per (contract, signer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub contract_id: ContractId,
    pub signer_id: UserId,
    pub status: SignatureStatus,
    pub payload: Option<serde_json::Value>,
    /// Set on first signing, never changed afterwards
    pub signed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Signature {
    pub fn unsigned(contract_id: ContractId, signer_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            contract_id,
            signer_id,
            status: SignatureStatus::Unsigned,
            payload: None,
            signed_at: None,
            updated_at: at,
        }
    }

    /// Mark as signed. A repeat signature replaces the payload only.
    pub fn sign(&mut self, payload: Option<serde_json::Value>, at: DateTime<Utc>) {
        self.status = SignatureStatus::Signed;
        self.payload = payload;
        self.updated_at = at;
        if self.signed_at.is_none() {
            self.signed_at = Some(at);
        }
    }

    pub fn is_signed(&self) -> bool {
        self.status == SignatureStatus::Signed
    }
}

/// A membership row. A user may have many rows for a bond over time but at most one active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondMembership {
    pub id: MembershipId,
    pub bond_id: BondId,
    pub user_id: UserId,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl BondMembership {
    pub fn new(bond_id: BondId, user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            id: MembershipId::generate(),
            bond_id,
            user_id,
            is_active: true,
            joined_at: at,
            left_at: None,
        }
    }

    /// Returns false when the row was already inactive
    pub fn deactivate(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.left_at = Some(at);
        true
    }
}

/// Why a ledger entry was written
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReasonCode {
    TaskCompleted,
    DailyCheckIn,
    RewardRedeemed,
    AchievementUnlocked,
    ManualAdjustment,
    Custom(String),
}

impl ReasonCode {
    pub fn as_str(&self) -> &str {
        match self {
            ReasonCode::TaskCompleted => "task_completed",
            ReasonCode::DailyCheckIn => "daily_check_in",
            ReasonCode::RewardRedeemed => "reward_redeemed",
            ReasonCode::AchievementUnlocked => "achievement_unlocked",
            ReasonCode::ManualAdjustment => "manual_adjustment",
            ReasonCode::Custom(code) => code,
        }
    }
}

impl From<String> for ReasonCode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "task_completed" => ReasonCode::TaskCompleted,
            "daily_check_in" => ReasonCode::DailyCheckIn,
            "reward_redeemed" => ReasonCode::RewardRedeemed,
            "achievement_unlocked" => ReasonCode::AchievementUnlocked,
            "manual_adjustment" => ReasonCode::ManualAdjustment,
            _ => ReasonCode::Custom(value),
        }
    }
}

impl From<&str> for ReasonCode {
    fn from(value: &str) -> Self {
        ReasonCode::from(value.to_string())
    }
}

impl From<ReasonCode> for String {
    fn from(value: ReasonCode) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable point delta. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    /// Bond the points were earned or spent in, if any
    pub bond_id: Option<BondId>,
    pub delta: i64,
    pub reason: ReasonCode,
    pub note: Option<String>,
    /// Unique per user; a replayed key never appends twice
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Types of activity recorded in a bond's audit trail
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityEventType {
    MemberJoined,
    MemberLeft,
    ContractCreated,
    SignaturesRequested,
    SignatureSubmitted,
    ContractActivated,
    ContractVoided,
    TaskCompleted,
    RewardRedeemed,
    AchievementUnlocked,
    PointsAdjusted,
    Custom(String),
}

impl ActivityEventType {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityEventType::MemberJoined => "member_joined",
            ActivityEventType::MemberLeft => "member_left",
            ActivityEventType::ContractCreated => "contract_created",
            ActivityEventType::SignaturesRequested => "signatures_requested",
            ActivityEventType::SignatureSubmitted => "signature_submitted",
            ActivityEventType::ContractActivated => "contract_activated",
            ActivityEventType::ContractVoided => "contract_voided",
            ActivityEventType::TaskCompleted => "task_completed",
            ActivityEventType::RewardRedeemed => "reward_redeemed",
            ActivityEventType::AchievementUnlocked => "achievement_unlocked",
            ActivityEventType::PointsAdjusted => "points_adjusted",
            ActivityEventType::Custom(name) => name,
        }
    }

    /// Short human-readable summary used as notification text
    pub fn describe(&self) -> String {
        match self {
            ActivityEventType::MemberJoined => "A member joined the bond".to_string(),
            ActivityEventType::MemberLeft => "A member left the bond".to_string(),
            ActivityEventType::ContractCreated => "A new contract was drafted".to_string(),
            ActivityEventType::SignaturesRequested => "A contract is awaiting your signature".to_string(),
            ActivityEventType::SignatureSubmitted => "A contract was signed".to_string(),
            ActivityEventType::ContractActivated => "A contract is now active".to_string(),
            ActivityEventType::ContractVoided => "A contract was voided".to_string(),
            ActivityEventType::TaskCompleted => "A task was completed".to_string(),
            ActivityEventType::RewardRedeemed => "A reward was redeemed".to_string(),
            ActivityEventType::AchievementUnlocked => "An achievement was unlocked".to_string(),
            ActivityEventType::PointsAdjusted => "Points were adjusted".to_string(),
            ActivityEventType::Custom(name) => format!("New activity: {}", name),
        }
    }
}

impl From<String> for ActivityEventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "member_joined" => ActivityEventType::MemberJoined,
            "member_left" => ActivityEventType::MemberLeft,
            "contract_created" => ActivityEventType::ContractCreated,
            "signatures_requested" => ActivityEventType::SignaturesRequested,
            "signature_submitted" => ActivityEventType::SignatureSubmitted,
            "contract_activated" => ActivityEventType::ContractActivated,
            "contract_voided" => ActivityEventType::ContractVoided,
            "task_completed" => ActivityEventType::TaskCompleted,
            "reward_redeemed" => ActivityEventType::RewardRedeemed,
            "achievement_unlocked" => ActivityEventType::AchievementUnlocked,
            "points_adjusted" => ActivityEventType::PointsAdjusted,
            _ => ActivityEventType::Custom(value),
        }
    }
}

impl From<ActivityEventType> for String {
    fn from(value: ActivityEventType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ActivityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit trail entry for a bond
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: ActivityId,
    pub bond_id: BondId,
    pub actor_id: UserId,
    pub event_type: ActivityEventType,
    pub payload: serde_json::Value,
    /// Unique per bond; re-emitting with the same key records nothing new
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// User-facing notification derived from an activity entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub bond_id: BondId,
    pub activity_id: ActivityId,
    pub event_type: ActivityEventType,
    pub message: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn for_activity(entry: &ActivityLogEntry, recipient_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId::generate(),
            recipient_id,
            bond_id: entry.bond_id,
            activity_id: entry.id,
            event_type: entry.event_type.clone(),
            message: entry.event_type.describe(),
            read_at: None,
            created_at: at,
        }
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Per-user settings that influence derived reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: UserId,
    /// Offset from UTC used to bucket entries into calendar days
    pub utc_offset_minutes: i32,
    pub updated_at: DateTime<Utc>,
}
