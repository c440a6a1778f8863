/*!
# Bond Engine

Facade over the components. Each public operation runs as one store
transaction: the components do their reads and writes against it, the
transaction commits, and only then are recorded activity entries fanned out
to notifications.
*/

use bond_common::{
    ActivityEventType, ActivityLogEntry, Bond, BondError, BondId, BondMembership, BondResult,
    Clock, Contract, ContractId, ContractStatus, Notification, NotificationId, Signature,
    SystemClock, UserId,
};
use bond_storage::{RecordStore, StoreTransaction};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::activity::{ActivityEmitter, EmitOutcome, Outbox};
use crate::config::EngineConfig;
use crate::contracts::{ContractService, ContractView};
use crate::ledger::LedgerAccumulator;
use crate::membership::MembershipResolver;
use crate::policy::{policy_for, RedemptionPolicy};
use crate::quorum::{QuorumOutcome, QuorumTracker};

/// Result of a leave
#[derive(Debug, Clone, Serialize)]
pub struct LeaveOutcome {
    /// False when the user had no active membership
    pub left: bool,
    /// Pending contracts whose quorum completed because of the departure
    pub activated: Vec<ContractId>,
}

/// Result of a signature submission followed by quorum evaluation
#[derive(Debug, Clone, Serialize)]
pub struct SignOutcome {
    pub signature: Signature,
    pub contract: Contract,
    pub activated: bool,
}

#[derive(Clone)]
pub struct BondEngine {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
    pub(crate) policy: Arc<dyn RedemptionPolicy>,
    pub(crate) membership: MembershipResolver,
    pub(crate) emitter: ActivityEmitter,
    pub(crate) quorum: QuorumTracker,
    pub(crate) contracts: ContractService,
    pub(crate) ledger: LedgerAccumulator,
}

impl BondEngine {
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> BondResult<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn RecordStore>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> BondResult<Self> {
        config.validate()?;

        let membership = MembershipResolver::new(clock.clone());
        let emitter = ActivityEmitter::new(clock.clone(), membership.clone());
        let quorum = QuorumTracker::new(clock.clone(), membership.clone(), emitter.clone());
        let contracts =
            ContractService::new(clock.clone(), membership.clone(), emitter.clone(), quorum.clone());
        let ledger = LedgerAccumulator::new(clock.clone());

        Ok(Self {
            policy: policy_for(config.redemption),
            store,
            clock,
            config,
            membership,
            emitter,
            quorum,
            contracts,
            ledger,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn ping(&self) -> BondResult<()> {
        Ok(self.store.ping().await?)
    }

    pub(crate) async fn begin(&self) -> BondResult<Box<dyn StoreTransaction>> {
        Ok(self.store.begin().await?)
    }

    /// Commit and fan out on success; roll back on failure
    pub(crate) async fn finish<T>(
        &self,
        tx: Box<dyn StoreTransaction>,
        outbox: Outbox,
        result: BondResult<T>,
    ) -> BondResult<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                if !outbox.is_empty() {
                    self.emitter.flush(self.store.as_ref(), outbox).await;
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed after {}: {}", e, rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Close a read-only transaction
    pub(crate) async fn finish_read<T>(
        &self,
        tx: Box<dyn StoreTransaction>,
        result: BondResult<T>,
    ) -> BondResult<T> {
        if let Err(e) = tx.rollback().await {
            warn!("Failed to release read transaction: {}", e);
        }
        result
    }

    // --- Bonds and membership ---

    pub async fn create_bond(&self, creator: &UserId, name: &str) -> BondResult<Bond> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BondError::invalid_input("bond name must not be empty"));
        }

        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result: BondResult<_> = async {
            let bond = Bond {
                id: BondId::generate(),
                name: name.to_string(),
                created_by: creator.clone(),
                created_at: self.clock.now(),
            };
            tx.insert_bond(bond.clone()).await?;
            let membership = self.membership.join(tx.as_mut(), &bond.id, creator).await?;
            self.emitter
                .record(
                    tx.as_mut(),
                    &mut outbox,
                    &bond.id,
                    creator,
                    ActivityEventType::MemberJoined,
                    json!({ "user_id": creator, "bond_name": bond.name }),
                    Some(format!("member-joined:{}", membership.id)),
                )
                .await?;
            info!("{} created bond {} ({})", creator, bond.id, bond.name);
            Ok(bond)
        }
        .await;
        self.finish(tx, outbox, result).await
    }

    pub async fn get_bond(&self, bond_id: &BondId, viewer: &UserId) -> BondResult<Bond> {
        let mut tx = self.begin().await?;
        let result: BondResult<_> = async {
            let bond = self.membership.require_bond(tx.as_mut(), bond_id).await?;
            self.membership
                .require_active_member(tx.as_mut(), bond_id, viewer)
                .await?;
            Ok(bond)
        }
        .await;
        self.finish_read(tx, result).await
    }

    pub async fn bonds_for_user(&self, user_id: &UserId) -> BondResult<Vec<Bond>> {
        let mut tx = self.begin().await?;
        let result = self.membership.bonds_for_user(tx.as_mut(), user_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn join(&self, bond_id: &BondId, user_id: &UserId) -> BondResult<BondMembership> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result: BondResult<_> = async {
            let membership = self.membership.join(tx.as_mut(), bond_id, user_id).await?;
            self.emitter
                .record(
                    tx.as_mut(),
                    &mut outbox,
                    bond_id,
                    user_id,
                    ActivityEventType::MemberJoined,
                    json!({ "user_id": user_id }),
                    Some(format!("member-joined:{}", membership.id)),
                )
                .await?;
            Ok(membership)
        }
        .await;
        self.finish(tx, outbox, result).await
    }

    /// Deactivate the membership and re-evaluate the bond's pending contracts,
    /// since the departing member is no longer required to sign.
    pub async fn leave(&self, bond_id: &BondId, user_id: &UserId) -> BondResult<LeaveOutcome> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result: BondResult<_> = async {
            let left = self.membership.leave(tx.as_mut(), bond_id, user_id).await?;
            if !left {
                return Ok(LeaveOutcome {
                    left,
                    activated: Vec::new(),
                });
            }

            self.emitter
                .record(
                    tx.as_mut(),
                    &mut outbox,
                    bond_id,
                    user_id,
                    ActivityEventType::MemberLeft,
                    json!({ "user_id": user_id }),
                    None,
                )
                .await?;

            let mut activated = Vec::new();
            for contract in tx.list_contracts(bond_id).await? {
                if contract.status != ContractStatus::PendingSignature {
                    continue;
                }
                let outcome = self
                    .quorum
                    .evaluate_quorum(tx.as_mut(), &mut outbox, &contract.id)
                    .await?;
                if outcome.activated {
                    activated.push(contract.id);
                }
            }
            Ok(LeaveOutcome { left, activated })
        }
        .await;
        self.finish(tx, outbox, result).await
    }

    pub async fn is_active_member(&self, bond_id: &BondId, user_id: &UserId) -> BondResult<bool> {
        let mut tx = self.begin().await?;
        let result = self
            .membership
            .is_active_member(tx.as_mut(), bond_id, user_id)
            .await;
        self.finish_read(tx, result).await
    }

    pub async fn active_members(
        &self,
        bond_id: &BondId,
        viewer: &UserId,
    ) -> BondResult<BTreeSet<UserId>> {
        let mut tx = self.begin().await?;
        let result: BondResult<_> = async {
            self.membership.require_bond(tx.as_mut(), bond_id).await?;
            self.membership
                .require_active_member(tx.as_mut(), bond_id, viewer)
                .await?;
            self.membership.active_members(tx.as_mut(), bond_id).await
        }
        .await;
        self.finish_read(tx, result).await
    }

    pub async fn membership_history(
        &self,
        bond_id: &BondId,
        viewer: &UserId,
    ) -> BondResult<Vec<BondMembership>> {
        let mut tx = self.begin().await?;
        let result: BondResult<_> = async {
            self.membership.require_bond(tx.as_mut(), bond_id).await?;
            self.membership
                .require_active_member(tx.as_mut(), bond_id, viewer)
                .await?;
            self.membership.history(tx.as_mut(), bond_id).await
        }
        .await;
        self.finish_read(tx, result).await
    }

    // --- Contracts ---

    pub async fn create_contract(
        &self,
        bond_id: &BondId,
        creator: &UserId,
        title: &str,
        terms: &str,
    ) -> BondResult<Contract> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result = self
            .contracts
            .create(tx.as_mut(), &mut outbox, bond_id, creator, title, terms)
            .await;
        self.finish(tx, outbox, result).await
    }

    /// Draft a contract and open it for signatures in one step
    pub async fn propose_contract(
        &self,
        bond_id: &BondId,
        creator: &UserId,
        title: &str,
        terms: &str,
    ) -> BondResult<Contract> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result: BondResult<_> = async {
            let draft = self
                .contracts
                .create(tx.as_mut(), &mut outbox, bond_id, creator, title, terms)
                .await?;
            self.contracts
                .request_signatures(tx.as_mut(), &mut outbox, &draft.id, creator)
                .await
        }
        .await;
        self.finish(tx, outbox, result).await
    }

    pub async fn request_signatures(
        &self,
        contract_id: &ContractId,
        actor: &UserId,
    ) -> BondResult<Contract> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result = self
            .contracts
            .request_signatures(tx.as_mut(), &mut outbox, contract_id, actor)
            .await;
        self.finish(tx, outbox, result).await
    }

    /// Record the signature, then evaluate quorum from the committed rows.
    ///
    /// The two steps commit separately. If evaluation fails the signature stays
    /// recorded and a later [`BondEngine::evaluate_quorum`] completes the transition.
    pub async fn submit_signature(
        &self,
        contract_id: &ContractId,
        signer_id: &UserId,
        payload: Option<serde_json::Value>,
    ) -> BondResult<SignOutcome> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result = self
            .quorum
            .submit_signature(tx.as_mut(), &mut outbox, contract_id, signer_id, payload)
            .await;
        let signature = self.finish(tx, outbox, result).await?;

        let outcome = self.evaluate_quorum(contract_id).await?;
        Ok(SignOutcome {
            signature,
            contract: outcome.contract,
            activated: outcome.activated,
        })
    }

    pub async fn evaluate_quorum(&self, contract_id: &ContractId) -> BondResult<QuorumOutcome> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result = self
            .quorum
            .evaluate_quorum(tx.as_mut(), &mut outbox, contract_id)
            .await;
        self.finish(tx, outbox, result).await
    }

    /// [`BondEngine::evaluate_quorum`] on behalf of a bond member
    pub async fn evaluate_quorum_as(
        &self,
        contract_id: &ContractId,
        actor: &UserId,
    ) -> BondResult<QuorumOutcome> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result: BondResult<_> = async {
            let contract = tx
                .get_contract(contract_id)
                .await?
                .ok_or_else(|| BondError::not_found(format!("contract {}", contract_id)))?;
            self.membership
                .require_active_member(tx.as_mut(), &contract.bond_id, actor)
                .await?;
            self.quorum
                .evaluate_quorum(tx.as_mut(), &mut outbox, contract_id)
                .await
        }
        .await;
        self.finish(tx, outbox, result).await
    }

    pub async fn void_contract(
        &self,
        contract_id: &ContractId,
        actor: &UserId,
    ) -> BondResult<Contract> {
        let mut tx = self.begin().await?;
        let mut outbox = Outbox::new();
        let result = self
            .contracts
            .void(tx.as_mut(), &mut outbox, contract_id, actor)
            .await;
        self.finish(tx, outbox, result).await
    }

    pub async fn delete_contract(&self, contract_id: &ContractId, actor: &UserId) -> BondResult<()> {
        let mut tx = self.begin().await?;
        let result = self.contracts.delete(tx.as_mut(), contract_id, actor).await;
        self.finish(tx, Outbox::new(), result).await
    }

    pub async fn contract_status(
        &self,
        contract_id: &ContractId,
        viewer: &UserId,
    ) -> BondResult<ContractView> {
        let mut tx = self.begin().await?;
        let result = self.contracts.view(tx.as_mut(), contract_id, viewer).await;
        self.finish_read(tx, result).await
    }

    pub async fn list_contracts(
        &self,
        bond_id: &BondId,
        viewer: &UserId,
    ) -> BondResult<Vec<Contract>> {
        let mut tx = self.begin().await?;
        let result = self.contracts.list(tx.as_mut(), bond_id, viewer).await;
        self.finish_read(tx, result).await
    }

    // --- Activity and notifications ---

    /// Record a custom activity entry for the bond
    pub async fn emit(
        &self,
        bond_id: &BondId,
        actor_id: &UserId,
        event_type: ActivityEventType,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> BondResult<EmitOutcome> {
        self.emitter
            .emit(
                self.store.as_ref(),
                bond_id,
                actor_id,
                event_type,
                payload,
                idempotency_key,
            )
            .await
    }

    /// Newest first, capped at the configured page size
    pub async fn activity_for_bond(
        &self,
        bond_id: &BondId,
        viewer: &UserId,
        limit: Option<usize>,
    ) -> BondResult<Vec<ActivityLogEntry>> {
        let limit = limit
            .unwrap_or(self.config.activity_page_size)
            .min(self.config.activity_page_size);

        let mut tx = self.begin().await?;
        let result: BondResult<_> = async {
            self.membership.require_bond(tx.as_mut(), bond_id).await?;
            self.membership
                .require_active_member(tx.as_mut(), bond_id, viewer)
                .await?;
            self.emitter.recent(tx.as_mut(), bond_id, limit).await
        }
        .await;
        self.finish_read(tx, result).await
    }

    pub async fn notifications_for(
        &self,
        user_id: &UserId,
        unread_only: bool,
    ) -> BondResult<Vec<Notification>> {
        let mut tx = self.begin().await?;
        let result = self
            .emitter
            .notifications_for(tx.as_mut(), user_id, unread_only)
            .await;
        self.finish_read(tx, result).await
    }

    pub async fn mark_notification_read(
        &self,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> BondResult<Notification> {
        let mut tx = self.begin().await?;
        let result = self
            .emitter
            .mark_read(tx.as_mut(), user_id, notification_id)
            .await;
        self.finish(tx, Outbox::new(), result).await
    }
}
