/*!
# Bond Storage

Abstract record store for the bond engine plus a serializable in-memory backend.

## Architectural Tenets
- Every unit of work runs inside one [`StoreTransaction`]; nothing is visible to
  other transactions until `commit`
- Typed access per collection instead of stringly-typed queries
- Ledger and activity collections are append-only; the trait exposes no update
  or delete for them
- Backends surface failures; they never retry
*/

use async_trait::async_trait;
use bond_common::{
    ActivityId, ActivityLogEntry, Bond, BondId, BondMembership, Contract, ContractId,
    LedgerEntry, Notification, NotificationId, Signature, UserId, UserPreferences,
};
use std::fmt;

pub mod error;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

/// Named record collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Bonds,
    Contracts,
    Signatures,
    Memberships,
    LedgerEntries,
    ActivityLog,
    Notifications,
    UserPreferences,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collection::Bonds => "bonds",
            Collection::Contracts => "contracts",
            Collection::Signatures => "signatures",
            Collection::Memberships => "bond_memberships",
            Collection::LedgerEntries => "ledger_entries",
            Collection::ActivityLog => "activity_log",
            Collection::Notifications => "notifications",
            Collection::UserPreferences => "user_preferences",
        };
        f.write_str(name)
    }
}

/// Entry point to a backing store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Start a serializable unit of work
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>>;

    /// Cheap liveness probe
    async fn ping(&self) -> StorageResult<()>;
}

/// A unit of work against the store.
///
/// Reads observe the transaction's own earlier writes. Dropping a transaction
/// without calling `commit` discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    // --- Bonds ---
    async fn get_bond(&mut self, id: &BondId) -> StorageResult<Option<Bond>>;
    async fn insert_bond(&mut self, bond: Bond) -> StorageResult<()>;

    // --- Contracts ---
    async fn get_contract(&mut self, id: &ContractId) -> StorageResult<Option<Contract>>;
    async fn insert_contract(&mut self, contract: Contract) -> StorageResult<()>;

    /// Compare-and-swap on `version`. Returns the stored record with its new version.
    async fn update_contract(
        &mut self,
        contract: Contract,
        expected_version: u64,
    ) -> StorageResult<Contract>;

    /// Deletes the contract together with its signatures
    async fn delete_contract(&mut self, id: &ContractId) -> StorageResult<()>;
    async fn list_contracts(&mut self, bond_id: &BondId) -> StorageResult<Vec<Contract>>;

    // --- Signatures ---
    async fn get_signature(
        &mut self,
        contract_id: &ContractId,
        signer_id: &UserId,
    ) -> StorageResult<Option<Signature>>;

    /// Insert or replace the row keyed by (contract, signer)
    async fn upsert_signature(&mut self, signature: Signature) -> StorageResult<()>;
    async fn list_signatures(&mut self, contract_id: &ContractId) -> StorageResult<Vec<Signature>>;

    // --- Memberships ---
    /// All rows for a bond, active and inactive
    async fn list_memberships(&mut self, bond_id: &BondId) -> StorageResult<Vec<BondMembership>>;
    async fn memberships_for_user(&mut self, user_id: &UserId) -> StorageResult<Vec<BondMembership>>;
    async fn insert_membership(&mut self, membership: BondMembership) -> StorageResult<()>;
    async fn update_membership(&mut self, membership: BondMembership) -> StorageResult<()>;

    // --- Ledger ---
    async fn append_ledger_entry(&mut self, entry: LedgerEntry) -> StorageResult<()>;
    async fn find_ledger_entry(
        &mut self,
        user_id: &UserId,
        idempotency_key: &str,
    ) -> StorageResult<Option<LedgerEntry>>;

    /// Entries in append order
    async fn ledger_entries(&mut self, user_id: &UserId) -> StorageResult<Vec<LedgerEntry>>;

    /// Materialized running sum, maintained with every append
    async fn ledger_sum(&mut self, user_id: &UserId) -> StorageResult<i64>;

    // --- Activity log ---
    async fn append_activity(&mut self, entry: ActivityLogEntry) -> StorageResult<()>;
    async fn find_activity(
        &mut self,
        bond_id: &BondId,
        idempotency_key: &str,
    ) -> StorageResult<Option<ActivityLogEntry>>;

    /// Entries in append order
    async fn list_activity(&mut self, bond_id: &BondId) -> StorageResult<Vec<ActivityLogEntry>>;

    // --- Notifications ---
    async fn insert_notification(&mut self, notification: Notification) -> StorageResult<()>;
    async fn notification_exists(
        &mut self,
        activity_id: &ActivityId,
        recipient_id: &UserId,
    ) -> StorageResult<bool>;
    async fn get_notification(&mut self, id: &NotificationId) -> StorageResult<Option<Notification>>;
    async fn update_notification(&mut self, notification: Notification) -> StorageResult<()>;
    async fn notifications_for(&mut self, recipient_id: &UserId) -> StorageResult<Vec<Notification>>;

    // --- User preferences ---
    async fn get_preferences(&mut self, user_id: &UserId) -> StorageResult<Option<UserPreferences>>;
    async fn put_preferences(&mut self, preferences: UserPreferences) -> StorageResult<()>;

    // --- Lifecycle ---
    async fn commit(self: Box<Self>) -> StorageResult<()>;
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}
