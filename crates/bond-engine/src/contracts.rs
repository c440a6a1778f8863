//! Contract lifecycle: draft, request signatures, void and delete.
//!
//! Every status change is validated against [`ContractStatus::can_transition_to`]
//! and written with the contract's version compare-and-swap.

use bond_common::{
    ActivityEventType, BondError, BondId, BondResult, Clock, Contract, ContractId,
    ContractStatus, Signature, UserId,
};
use bond_storage::StoreTransaction;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::activity::{ActivityEmitter, Outbox};
use crate::membership::MembershipResolver;
use crate::quorum::{QuorumState, QuorumTracker};

/// A contract together with its signature progress
#[derive(Debug, Clone, Serialize)]
pub struct ContractView {
    pub contract: Contract,
    pub signatures: Vec<Signature>,
    pub quorum: QuorumState,
    pub missing: BTreeSet<UserId>,
    pub quorum_satisfied: bool,
}

#[derive(Debug, Clone)]
pub struct ContractService {
    clock: Arc<dyn Clock>,
    membership: MembershipResolver,
    emitter: ActivityEmitter,
    quorum: QuorumTracker,
}

impl ContractService {
    pub fn new(
        clock: Arc<dyn Clock>,
        membership: MembershipResolver,
        emitter: ActivityEmitter,
        quorum: QuorumTracker,
    ) -> Self {
        Self {
            clock,
            membership,
            emitter,
            quorum,
        }
    }

    /// Load a contract the actor may act on
    async fn load_for_member(
        &self,
        tx: &mut dyn StoreTransaction,
        contract_id: &ContractId,
        actor: &UserId,
    ) -> BondResult<Contract> {
        let contract = tx
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| BondError::not_found(format!("contract {}", contract_id)))?;
        self.membership
            .require_active_member(tx, &contract.bond_id, actor)
            .await?;
        Ok(contract)
    }

    async fn transition(
        &self,
        tx: &mut dyn StoreTransaction,
        contract: Contract,
        next: ContractStatus,
    ) -> BondResult<Contract> {
        let old = contract.status;
        if !old.can_transition_to(next) {
            return Err(BondError::invalid_state(format!(
                "contract {} cannot move from {} to {}",
                contract.id, old, next
            )));
        }

        let now = self.clock.now();
        let expected_version = contract.version;
        let mut updated = contract;
        updated.status = next;
        updated.updated_at = now;
        match next {
            ContractStatus::Active => updated.activated_at = Some(now),
            ContractStatus::Void => updated.voided_at = Some(now),
            _ => {}
        }

        let stored = tx.update_contract(updated, expected_version).await?;
        info!("Contract {} state changed: {} -> {}", stored.id, old, stored.status);
        Ok(stored)
    }

    pub async fn create(
        &self,
        tx: &mut dyn StoreTransaction,
        outbox: &mut Outbox,
        bond_id: &BondId,
        creator: &UserId,
        title: &str,
        terms: &str,
    ) -> BondResult<Contract> {
        let title = title.trim();
        if title.is_empty() {
            return Err(BondError::invalid_input("contract title must not be empty"));
        }
        self.membership.require_bond(tx, bond_id).await?;
        self.membership
            .require_active_member(tx, bond_id, creator)
            .await?;

        let contract = Contract::draft(
            *bond_id,
            creator.clone(),
            title.to_string(),
            terms.to_string(),
            self.clock.now(),
        );
        tx.insert_contract(contract.clone()).await?;
        info!("{} drafted contract {} in bond {}", creator, contract.id, bond_id);

        self.emitter
            .record(
                tx,
                outbox,
                bond_id,
                creator,
                ActivityEventType::ContractCreated,
                json!({ "contract_id": contract.id, "title": contract.title }),
                Some(format!("contract-created:{}", contract.id)),
            )
            .await?;
        Ok(contract)
    }

    /// Move a draft to `pending_signature` and open an unsigned row per active member
    pub async fn request_signatures(
        &self,
        tx: &mut dyn StoreTransaction,
        outbox: &mut Outbox,
        contract_id: &ContractId,
        actor: &UserId,
    ) -> BondResult<Contract> {
        let contract = self.load_for_member(tx, contract_id, actor).await?;
        let members = self.membership.active_members(tx, &contract.bond_id).await?;
        if members.is_empty() {
            return Err(BondError::invalid_state(format!(
                "bond {} has no active members to sign",
                contract.bond_id
            )));
        }

        let contract = self
            .transition(tx, contract, ContractStatus::PendingSignature)
            .await?;

        let now = self.clock.now();
        for member in &members {
            if tx.get_signature(contract_id, member).await?.is_none() {
                tx.upsert_signature(Signature::unsigned(*contract_id, member.clone(), now))
                    .await?;
            }
        }

        self.emitter
            .record(
                tx,
                outbox,
                &contract.bond_id,
                actor,
                ActivityEventType::SignaturesRequested,
                json!({
                    "contract_id": contract.id,
                    "title": contract.title,
                    "signers": members,
                }),
                Some(format!("signatures-requested:{}", contract.id)),
            )
            .await?;
        Ok(contract)
    }

    pub async fn void(
        &self,
        tx: &mut dyn StoreTransaction,
        outbox: &mut Outbox,
        contract_id: &ContractId,
        actor: &UserId,
    ) -> BondResult<Contract> {
        let contract = self.load_for_member(tx, contract_id, actor).await?;
        let contract = self.transition(tx, contract, ContractStatus::Void).await?;

        self.emitter
            .record(
                tx,
                outbox,
                &contract.bond_id,
                actor,
                ActivityEventType::ContractVoided,
                json!({ "contract_id": contract.id, "title": contract.title }),
                Some(format!("contract-voided:{}", contract.id)),
            )
            .await?;
        Ok(contract)
    }

    /// Only drafts and voided contracts can be deleted; signatures go with them
    pub async fn delete(
        &self,
        tx: &mut dyn StoreTransaction,
        contract_id: &ContractId,
        actor: &UserId,
    ) -> BondResult<()> {
        let contract = self.load_for_member(tx, contract_id, actor).await?;
        if !matches!(contract.status, ContractStatus::Draft | ContractStatus::Void) {
            return Err(BondError::invalid_state(format!(
                "contract {} is {} and cannot be deleted",
                contract_id, contract.status
            )));
        }
        tx.delete_contract(contract_id).await?;
        info!("{} deleted contract {}", actor, contract_id);
        Ok(())
    }

    pub async fn view(
        &self,
        tx: &mut dyn StoreTransaction,
        contract_id: &ContractId,
        viewer: &UserId,
    ) -> BondResult<ContractView> {
        let contract = self.load_for_member(tx, contract_id, viewer).await?;
        let signatures = tx.list_signatures(contract_id).await?;
        let quorum = self.quorum.quorum_state(tx, &contract).await?;
        Ok(ContractView {
            missing: quorum.missing(),
            quorum_satisfied: quorum.is_satisfied(),
            contract,
            signatures,
            quorum,
        })
    }

    /// Contracts of the bond, oldest first
    pub async fn list(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
        viewer: &UserId,
    ) -> BondResult<Vec<Contract>> {
        self.membership.require_bond(tx, bond_id).await?;
        self.membership
            .require_active_member(tx, bond_id, viewer)
            .await?;
        Ok(tx.list_contracts(bond_id).await?)
    }
}
