//! Bond membership resolution
//!
//! The single authority for "is X an active member of bond Y" and "who are the
//! active members of bond Y". Both access control and quorum evaluation go
//! through here, always against the transaction's current view.

use bond_common::{Bond, BondError, BondId, BondMembership, BondResult, Clock, UserId};
use bond_storage::StoreTransaction;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct MembershipResolver {
    clock: Arc<dyn Clock>,
}

impl MembershipResolver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub async fn require_bond(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
    ) -> BondResult<Bond> {
        tx.get_bond(bond_id)
            .await?
            .ok_or_else(|| BondError::not_found(format!("bond {}", bond_id)))
    }

    pub async fn is_active_member(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
        user_id: &UserId,
    ) -> BondResult<bool> {
        Ok(tx
            .list_memberships(bond_id)
            .await?
            .iter()
            .any(|m| m.is_active && &m.user_id == user_id))
    }

    /// Fails with `Unauthorized` unless `user_id` is an active member
    pub async fn require_active_member(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
        user_id: &UserId,
    ) -> BondResult<()> {
        if self.is_active_member(tx, bond_id, user_id).await? {
            Ok(())
        } else {
            Err(BondError::not_a_member(bond_id, user_id))
        }
    }

    pub async fn active_members(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
    ) -> BondResult<BTreeSet<UserId>> {
        Ok(tx
            .list_memberships(bond_id)
            .await?
            .into_iter()
            .filter(|m| m.is_active)
            .map(|m| m.user_id)
            .collect())
    }

    /// Add `user_id` to the bond. Earlier inactive rows are kept as history.
    pub async fn join(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
        user_id: &UserId,
    ) -> BondResult<BondMembership> {
        self.require_bond(tx, bond_id).await?;
        if self.is_active_member(tx, bond_id, user_id).await? {
            return Err(BondError::already_member(bond_id, user_id));
        }

        let membership = BondMembership::new(*bond_id, user_id.clone(), self.clock.now());
        tx.insert_membership(membership.clone()).await?;
        info!("{} joined bond {}", user_id, bond_id);
        Ok(membership)
    }

    /// Deactivate the user's active row. Returns false when nothing changed.
    pub async fn leave(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
        user_id: &UserId,
    ) -> BondResult<bool> {
        self.require_bond(tx, bond_id).await?;
        let active = tx
            .list_memberships(bond_id)
            .await?
            .into_iter()
            .find(|m| m.is_active && &m.user_id == user_id);

        let Some(mut membership) = active else {
            debug!("{} has no active membership in bond {}, leave is a no-op", user_id, bond_id);
            return Ok(false);
        };

        membership.deactivate(self.clock.now());
        tx.update_membership(membership).await?;
        info!("{} left bond {}", user_id, bond_id);
        Ok(true)
    }

    /// Every membership row for the bond, oldest first
    pub async fn history(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
    ) -> BondResult<Vec<BondMembership>> {
        let mut rows = tx.list_memberships(bond_id).await?;
        rows.sort_by_key(|m| m.joined_at);
        Ok(rows)
    }

    /// Bonds in which the user currently holds an active membership
    pub async fn bonds_for_user(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
    ) -> BondResult<Vec<Bond>> {
        let bond_ids: BTreeSet<BondId> = tx
            .memberships_for_user(user_id)
            .await?
            .into_iter()
            .filter(|m| m.is_active)
            .map(|m| m.bond_id)
            .collect();

        let mut bonds = Vec::with_capacity(bond_ids.len());
        for bond_id in bond_ids {
            if let Some(bond) = tx.get_bond(&bond_id).await? {
                bonds.push(bond);
            }
        }
        bonds.sort_by_key(|b| b.created_at);
        Ok(bonds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bond_common::{ErrorKind, SystemClock};
    use bond_storage::{MemoryStore, RecordStore};
    use chrono::Utc;

    async fn seeded_bond(tx: &mut dyn StoreTransaction) -> BondId {
        let bond = Bond {
            id: BondId::generate(),
            name: "Pod".to_string(),
            created_by: UserId::new("a"),
            created_at: Utc::now(),
        };
        let id = bond.id;
        tx.insert_bond(bond).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_join_and_double_join() {
        let store = MemoryStore::new();
        let resolver = MembershipResolver::new(Arc::new(SystemClock));
        let mut tx = store.begin().await.unwrap();
        let bond = seeded_bond(tx.as_mut()).await;
        let alice = UserId::new("alice");

        resolver.join(tx.as_mut(), &bond, &alice).await.unwrap();
        assert!(resolver.is_active_member(tx.as_mut(), &bond, &alice).await.unwrap());

        let err = resolver.join(tx.as_mut(), &bond, &alice).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_double_leave_is_noop() {
        let store = MemoryStore::new();
        let resolver = MembershipResolver::new(Arc::new(SystemClock));
        let mut tx = store.begin().await.unwrap();
        let bond = seeded_bond(tx.as_mut()).await;
        let carol = UserId::new("carol");

        resolver.join(tx.as_mut(), &bond, &carol).await.unwrap();
        assert!(resolver.leave(tx.as_mut(), &bond, &carol).await.unwrap());
        assert!(!resolver.leave(tx.as_mut(), &bond, &carol).await.unwrap());
        assert!(!resolver.is_active_member(tx.as_mut(), &bond, &carol).await.unwrap());
        assert!(resolver.active_members(tx.as_mut(), &bond).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_keeps_history() {
        let store = MemoryStore::new();
        let resolver = MembershipResolver::new(Arc::new(SystemClock));
        let mut tx = store.begin().await.unwrap();
        let bond = seeded_bond(tx.as_mut()).await;
        let bob = UserId::new("bob");

        resolver.join(tx.as_mut(), &bond, &bob).await.unwrap();
        resolver.leave(tx.as_mut(), &bond, &bob).await.unwrap();
        resolver.join(tx.as_mut(), &bond, &bob).await.unwrap();

        let history = resolver.history(tx.as_mut(), &bond).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|m| m.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_join_unknown_bond() {
        let store = MemoryStore::new();
        let resolver = MembershipResolver::new(Arc::new(SystemClock));
        let mut tx = store.begin().await.unwrap();
        let err = resolver
            .join(tx.as_mut(), &BondId::generate(), &UserId::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
