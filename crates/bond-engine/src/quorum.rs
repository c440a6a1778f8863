//! Signature quorum tracking
//!
//! A contract in `pending_signature` becomes `active` once every *currently*
//! active member of its bond has a signed signature row. The required set is
//! recomputed on every evaluation, so a member leaving can complete a quorum.

use bond_common::{
    ActivityEventType, BondError, BondResult, Clock, Contract, ContractId, ContractStatus,
    Signature, UserId,
};
use bond_storage::StoreTransaction;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::activity::{ActivityEmitter, Outbox};
use crate::membership::MembershipResolver;

/// Required and signed signer sets at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuorumState {
    pub required: BTreeSet<UserId>,
    pub signed: BTreeSet<UserId>,
}

impl QuorumState {
    /// An empty required set never satisfies quorum
    pub fn is_satisfied(&self) -> bool {
        !self.required.is_empty() && self.required.is_subset(&self.signed)
    }

    pub fn missing(&self) -> BTreeSet<UserId> {
        self.required.difference(&self.signed).cloned().collect()
    }
}

/// Result of one quorum evaluation
#[derive(Debug, Clone)]
pub struct QuorumOutcome {
    pub contract: Contract,
    pub quorum: QuorumState,
    /// True only for the evaluation that performed the transition
    pub activated: bool,
}

#[derive(Debug, Clone)]
pub struct QuorumTracker {
    clock: Arc<dyn Clock>,
    membership: MembershipResolver,
    emitter: ActivityEmitter,
}

impl QuorumTracker {
    pub fn new(clock: Arc<dyn Clock>, membership: MembershipResolver, emitter: ActivityEmitter) -> Self {
        Self {
            clock,
            membership,
            emitter,
        }
    }

    async fn load_contract(
        &self,
        tx: &mut dyn StoreTransaction,
        contract_id: &ContractId,
    ) -> BondResult<Contract> {
        tx.get_contract(contract_id)
            .await?
            .ok_or_else(|| BondError::not_found(format!("contract {}", contract_id)))
    }

    /// Record `signer_id`'s signature. Signing again replaces the payload only.
    pub async fn submit_signature(
        &self,
        tx: &mut dyn StoreTransaction,
        outbox: &mut Outbox,
        contract_id: &ContractId,
        signer_id: &UserId,
        payload: Option<serde_json::Value>,
    ) -> BondResult<Signature> {
        let contract = self.load_contract(tx, contract_id).await?;
        if contract.status != ContractStatus::PendingSignature {
            return Err(BondError::invalid_state(format!(
                "contract {} is {}, signatures are only accepted while pending_signature",
                contract_id, contract.status
            )));
        }
        self.membership
            .require_active_member(tx, &contract.bond_id, signer_id)
            .await?;

        let now = self.clock.now();
        let mut signature = tx
            .get_signature(contract_id, signer_id)
            .await?
            .unwrap_or_else(|| Signature::unsigned(*contract_id, signer_id.clone(), now));
        let resubmission = signature.is_signed();
        signature.sign(payload, now);
        tx.upsert_signature(signature.clone()).await?;

        if resubmission {
            debug!("{} re-signed contract {}", signer_id, contract_id);
        } else {
            info!("{} signed contract {}", signer_id, contract_id);
        }

        self.emitter
            .record(
                tx,
                outbox,
                &contract.bond_id,
                signer_id,
                ActivityEventType::SignatureSubmitted,
                json!({ "contract_id": contract_id, "title": contract.title }),
                Some(format!("signature:{}:{}", contract_id, signer_id)),
            )
            .await?;

        Ok(signature)
    }

    /// Required set is the bond's live active membership; signed set comes from stored rows
    pub async fn quorum_state(
        &self,
        tx: &mut dyn StoreTransaction,
        contract: &Contract,
    ) -> BondResult<QuorumState> {
        let required = self.membership.active_members(tx, &contract.bond_id).await?;
        let signed = tx
            .list_signatures(&contract.id)
            .await?
            .into_iter()
            .filter(Signature::is_signed)
            .map(|s| s.signer_id)
            .collect();
        Ok(QuorumState { required, signed })
    }

    /// Activate the contract if quorum holds. Safe to call any number of times.
    pub async fn evaluate_quorum(
        &self,
        tx: &mut dyn StoreTransaction,
        outbox: &mut Outbox,
        contract_id: &ContractId,
    ) -> BondResult<QuorumOutcome> {
        let contract = self.load_contract(tx, contract_id).await?;
        let quorum = self.quorum_state(tx, &contract).await?;

        if contract.status != ContractStatus::PendingSignature {
            debug!(
                "Contract {} is {}, quorum evaluation is a no-op",
                contract_id, contract.status
            );
            return Ok(QuorumOutcome {
                contract,
                quorum,
                activated: false,
            });
        }

        if !quorum.is_satisfied() {
            debug!(
                "Contract {} still waiting on {} of {} signers",
                contract_id,
                quorum.missing().len(),
                quorum.required.len()
            );
            return Ok(QuorumOutcome {
                contract,
                quorum,
                activated: false,
            });
        }

        let now = self.clock.now();
        let old_status = contract.status;
        let expected_version = contract.version;
        let mut next = contract;
        next.status = ContractStatus::Active;
        next.activated_at = Some(now);
        next.updated_at = now;
        let contract = tx.update_contract(next, expected_version).await?;
        info!(
            "Contract {} state changed: {} -> {}",
            contract.id, old_status, contract.status
        );

        self.emitter
            .record(
                tx,
                outbox,
                &contract.bond_id,
                &contract.created_by,
                ActivityEventType::ContractActivated,
                json!({
                    "contract_id": contract.id,
                    "title": contract.title,
                    "signers": quorum.signed,
                }),
                Some(format!("contract-activated:{}", contract.id)),
            )
            .await?;

        Ok(QuorumOutcome {
            contract,
            quorum,
            activated: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(names: &[&str]) -> BTreeSet<UserId> {
        names.iter().map(|n| UserId::new(*n)).collect()
    }

    #[test]
    fn test_quorum_requires_every_member() {
        let state = QuorumState {
            required: users(&["a", "c"]),
            signed: users(&["a"]),
        };
        assert!(!state.is_satisfied());
        assert_eq!(state.missing(), users(&["c"]));
    }

    #[test]
    fn test_extra_signers_do_not_matter() {
        let state = QuorumState {
            required: users(&["a"]),
            signed: users(&["a", "c"]),
        };
        assert!(state.is_satisfied());
        assert!(state.missing().is_empty());
    }

    #[test]
    fn test_empty_required_set_is_never_satisfied() {
        let state = QuorumState {
            required: BTreeSet::new(),
            signed: users(&["a"]),
        };
        assert!(!state.is_satisfied());
    }
}
