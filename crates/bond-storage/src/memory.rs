use async_trait::async_trait;
use bond_common::{
    ActivityId, ActivityLogEntry, Bond, BondId, BondMembership, Contract, ContractId,
    LedgerEntry, Notification, NotificationId, Signature, UserId, UserPreferences,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::{Collection, RecordStore, StorageError, StorageResult, StoreTransaction};

#[derive(Debug, Clone, Default)]
struct Tables {
    bonds: HashMap<BondId, Bond>,
    contracts: HashMap<ContractId, Contract>,
    signatures: BTreeMap<(ContractId, UserId), Signature>,
    memberships: Vec<BondMembership>,
    ledger: Vec<LedgerEntry>,
    ledger_keys: HashSet<(UserId, String)>,
    balances: HashMap<UserId, i64>,
    activity: Vec<ActivityLogEntry>,
    activity_keys: HashSet<(BondId, String)>,
    notifications: Vec<Notification>,
    notification_index: HashSet<(ActivityId, UserId)>,
    preferences: HashMap<UserId, UserPreferences>,
}

/// Failure switches used to exercise error paths
#[derive(Debug, Default)]
struct FaultInjector {
    unavailable: AtomicBool,
    failing_writes: Mutex<HashMap<Collection, u32>>,
    failing_commits: AtomicU32,
}

impl FaultInjector {
    fn check_write(&self, collection: Collection) -> StorageResult<()> {
        let mut failing = self
            .failing_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match failing.get_mut(&collection) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StorageError::Unavailable(format!(
                    "injected write failure on {}",
                    collection
                )))
            }
            _ => Ok(()),
        }
    }

    fn check_commit(&self) -> StorageResult<()> {
        let consumed = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(StorageError::Unavailable("injected commit failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

/// Thread-safe, async in-memory implementation of [`RecordStore`].
///
/// Transactions are serialized: `begin` waits for exclusive access and the
/// transaction works on a private copy that replaces the shared tables on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<AsyncMutex<Tables>>,
    faults: Arc<FaultInjector>,
}

impl MemoryStore {
    /// Create a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `begin` and `ping` fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` writes to `collection`
    pub fn fail_writes(&self, collection: Collection, count: u32) {
        let mut failing = self
            .faults
            .failing_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        failing.insert(collection, count);
    }

    /// Fail the next `count` commits
    pub fn fail_commits(&self, count: u32) {
        self.faults.failing_commits.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        self.check_available()?;
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn ping(&self) -> StorageResult<()> {
        self.check_available()
    }
}

/// A transaction over [`MemoryStore`]
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    faults: Arc<FaultInjector>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get_bond(&mut self, id: &BondId) -> StorageResult<Option<Bond>> {
        Ok(self.working.bonds.get(id).cloned())
    }

    async fn insert_bond(&mut self, bond: Bond) -> StorageResult<()> {
        self.faults.check_write(Collection::Bonds)?;
        if self.working.bonds.contains_key(&bond.id) {
            return Err(StorageError::Duplicate(format!("bond {}", bond.id)));
        }
        self.working.bonds.insert(bond.id, bond);
        Ok(())
    }

    async fn get_contract(&mut self, id: &ContractId) -> StorageResult<Option<Contract>> {
        Ok(self.working.contracts.get(id).cloned())
    }

    async fn insert_contract(&mut self, contract: Contract) -> StorageResult<()> {
        self.faults.check_write(Collection::Contracts)?;
        if self.working.contracts.contains_key(&contract.id) {
            return Err(StorageError::Duplicate(format!("contract {}", contract.id)));
        }
        self.working.contracts.insert(contract.id, contract);
        Ok(())
    }

    async fn update_contract(
        &mut self,
        mut contract: Contract,
        expected_version: u64,
    ) -> StorageResult<Contract> {
        self.faults.check_write(Collection::Contracts)?;
        let stored = self
            .working
            .contracts
            .get_mut(&contract.id)
            .ok_or_else(|| StorageError::Missing(format!("contract {}", contract.id)))?;

        if stored.version != expected_version {
            return Err(StorageError::Conflict(format!(
                "contract {} is at version {}, expected {}",
                contract.id, stored.version, expected_version
            )));
        }

        contract.version = expected_version + 1;
        *stored = contract.clone();
        Ok(contract)
    }

    async fn delete_contract(&mut self, id: &ContractId) -> StorageResult<()> {
        self.faults.check_write(Collection::Contracts)?;
        if self.working.contracts.remove(id).is_none() {
            return Err(StorageError::Missing(format!("contract {}", id)));
        }
        self.working.signatures.retain(|(contract_id, _), _| contract_id != id);
        Ok(())
    }

    async fn list_contracts(&mut self, bond_id: &BondId) -> StorageResult<Vec<Contract>> {
        let mut contracts: Vec<Contract> = self
            .working
            .contracts
            .values()
            .filter(|c| &c.bond_id == bond_id)
            .cloned()
            .collect();
        contracts.sort_by_key(|c| c.created_at);
        Ok(contracts)
    }

    async fn get_signature(
        &mut self,
        contract_id: &ContractId,
        signer_id: &UserId,
    ) -> StorageResult<Option<Signature>> {
        Ok(self
            .working
            .signatures
            .get(&(*contract_id, signer_id.clone()))
            .cloned())
    }

    async fn upsert_signature(&mut self, signature: Signature) -> StorageResult<()> {
        self.faults.check_write(Collection::Signatures)?;
        if !self.working.contracts.contains_key(&signature.contract_id) {
            return Err(StorageError::Missing(format!("contract {}", signature.contract_id)));
        }
        let key = (signature.contract_id, signature.signer_id.clone());
        self.working.signatures.insert(key, signature);
        Ok(())
    }

    async fn list_signatures(&mut self, contract_id: &ContractId) -> StorageResult<Vec<Signature>> {
        Ok(self
            .working
            .signatures
            .iter()
            .filter(|((id, _), _)| id == contract_id)
            .map(|(_, sig)| sig.clone())
            .collect())
    }

    async fn list_memberships(&mut self, bond_id: &BondId) -> StorageResult<Vec<BondMembership>> {
        Ok(self
            .working
            .memberships
            .iter()
            .filter(|m| &m.bond_id == bond_id)
            .cloned()
            .collect())
    }

    async fn memberships_for_user(&mut self, user_id: &UserId) -> StorageResult<Vec<BondMembership>> {
        Ok(self
            .working
            .memberships
            .iter()
            .filter(|m| &m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_membership(&mut self, membership: BondMembership) -> StorageResult<()> {
        self.faults.check_write(Collection::Memberships)?;
        if self.working.memberships.iter().any(|m| m.id == membership.id) {
            return Err(StorageError::Duplicate(format!("membership {}", membership.id)));
        }
        self.working.memberships.push(membership);
        Ok(())
    }

    async fn update_membership(&mut self, membership: BondMembership) -> StorageResult<()> {
        self.faults.check_write(Collection::Memberships)?;
        let row = self
            .working
            .memberships
            .iter_mut()
            .find(|m| m.id == membership.id)
            .ok_or_else(|| StorageError::Missing(format!("membership {}", membership.id)))?;
        *row = membership;
        Ok(())
    }

    async fn append_ledger_entry(&mut self, entry: LedgerEntry) -> StorageResult<()> {
        self.faults.check_write(Collection::LedgerEntries)?;
        let current = self.working.balances.get(&entry.user_id).copied().unwrap_or(0);
        let balance = current.checked_add(entry.delta).ok_or_else(|| {
            StorageError::Overflow(format!(
                "balance {} of {} cannot absorb {}",
                current, entry.user_id, entry.delta
            ))
        })?;
        if let Some(key) = &entry.idempotency_key {
            let index_key = (entry.user_id.clone(), key.clone());
            if self.working.ledger_keys.contains(&index_key) {
                return Err(StorageError::Duplicate(format!(
                    "ledger key {} for {}",
                    key, entry.user_id
                )));
            }
            self.working.ledger_keys.insert(index_key);
        }

        self.working.balances.insert(entry.user_id.clone(), balance);
        self.working.ledger.push(entry);
        Ok(())
    }

    async fn find_ledger_entry(
        &mut self,
        user_id: &UserId,
        idempotency_key: &str,
    ) -> StorageResult<Option<LedgerEntry>> {
        Ok(self
            .working
            .ledger
            .iter()
            .find(|e| &e.user_id == user_id && e.idempotency_key.as_deref() == Some(idempotency_key))
            .cloned())
    }

    async fn ledger_entries(&mut self, user_id: &UserId) -> StorageResult<Vec<LedgerEntry>> {
        Ok(self
            .working
            .ledger
            .iter()
            .filter(|e| &e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn ledger_sum(&mut self, user_id: &UserId) -> StorageResult<i64> {
        Ok(self.working.balances.get(user_id).copied().unwrap_or(0))
    }

    async fn append_activity(&mut self, entry: ActivityLogEntry) -> StorageResult<()> {
        self.faults.check_write(Collection::ActivityLog)?;
        if let Some(key) = &entry.idempotency_key {
            let index_key = (entry.bond_id, key.clone());
            if self.working.activity_keys.contains(&index_key) {
                return Err(StorageError::Duplicate(format!(
                    "activity key {} in bond {}",
                    key, entry.bond_id
                )));
            }
            self.working.activity_keys.insert(index_key);
        }
        self.working.activity.push(entry);
        Ok(())
    }

    async fn find_activity(
        &mut self,
        bond_id: &BondId,
        idempotency_key: &str,
    ) -> StorageResult<Option<ActivityLogEntry>> {
        Ok(self
            .working
            .activity
            .iter()
            .find(|e| &e.bond_id == bond_id && e.idempotency_key.as_deref() == Some(idempotency_key))
            .cloned())
    }

    async fn list_activity(&mut self, bond_id: &BondId) -> StorageResult<Vec<ActivityLogEntry>> {
        Ok(self
            .working
            .activity
            .iter()
            .filter(|e| &e.bond_id == bond_id)
            .cloned()
            .collect())
    }

    async fn insert_notification(&mut self, notification: Notification) -> StorageResult<()> {
        self.faults.check_write(Collection::Notifications)?;
        let index_key = (notification.activity_id, notification.recipient_id.clone());
        if self.working.notification_index.contains(&index_key) {
            return Err(StorageError::Duplicate(format!(
                "notification for activity {} to {}",
                notification.activity_id, notification.recipient_id
            )));
        }
        self.working.notification_index.insert(index_key);
        self.working.notifications.push(notification);
        Ok(())
    }

    async fn notification_exists(
        &mut self,
        activity_id: &ActivityId,
        recipient_id: &UserId,
    ) -> StorageResult<bool> {
        Ok(self
            .working
            .notification_index
            .contains(&(*activity_id, recipient_id.clone())))
    }

    async fn get_notification(&mut self, id: &NotificationId) -> StorageResult<Option<Notification>> {
        Ok(self.working.notifications.iter().find(|n| &n.id == id).cloned())
    }

    async fn update_notification(&mut self, notification: Notification) -> StorageResult<()> {
        self.faults.check_write(Collection::Notifications)?;
        let row = self
            .working
            .notifications
            .iter_mut()
            .find(|n| n.id == notification.id)
            .ok_or_else(|| StorageError::Missing(format!("notification {}", notification.id)))?;
        *row = notification;
        Ok(())
    }

    async fn notifications_for(&mut self, recipient_id: &UserId) -> StorageResult<Vec<Notification>> {
        Ok(self
            .working
            .notifications
            .iter()
            .filter(|n| &n.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    async fn get_preferences(&mut self, user_id: &UserId) -> StorageResult<Option<UserPreferences>> {
        Ok(self.working.preferences.get(user_id).cloned())
    }

    async fn put_preferences(&mut self, preferences: UserPreferences) -> StorageResult<()> {
        self.faults.check_write(Collection::UserPreferences)?;
        self.working
            .preferences
            .insert(preferences.user_id.clone(), preferences);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.faults.check_commit()?;
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        debug!("memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        debug!("memory transaction rolled back");
        Ok(())
    }
}
