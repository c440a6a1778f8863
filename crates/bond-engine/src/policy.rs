/*!
 * Redemption Policy
 *
 * Decides whether a redemption may be written before the ledger is touched.
 * The ledger itself never rejects a negative balance.
 */

use bond_common::{BondError, BondResult, UserId};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::config::RedemptionMode;

/// Checked before a redemption is appended
pub trait RedemptionPolicy: Send + Sync + fmt::Debug {
    fn check(&self, user_id: &UserId, balance: i64, cost: i64) -> BondResult<()>;
}

/// Every redemption goes through; an overdrawn balance is reported on read
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowOverdraft;

impl RedemptionPolicy for AllowOverdraft {
    fn check(&self, user_id: &UserId, balance: i64, cost: i64) -> BondResult<()> {
        if balance < cost {
            warn!(
                "{} redeeming {} with balance {}, account will be overdrawn",
                user_id, cost, balance
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequireSufficientBalance;

impl RedemptionPolicy for RequireSufficientBalance {
    fn check(&self, user_id: &UserId, balance: i64, cost: i64) -> BondResult<()> {
        if balance < cost {
            return Err(BondError::invalid_state(format!(
                "insufficient points: {} has {}, reward costs {}",
                user_id, balance, cost
            )));
        }
        Ok(())
    }
}

pub fn policy_for(mode: RedemptionMode) -> Arc<dyn RedemptionPolicy> {
    match mode {
        RedemptionMode::AllowOverdraft => Arc::new(AllowOverdraft),
        RedemptionMode::RequireSufficientBalance => Arc::new(RequireSufficientBalance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bond_common::ErrorKind;

    #[test]
    fn test_overdraft_is_allowed() {
        assert!(AllowOverdraft.check(&UserId::new("u"), 3, 10).is_ok());
    }

    #[test]
    fn test_sufficient_balance_required() {
        let policy = policy_for(RedemptionMode::RequireSufficientBalance);
        let user = UserId::new("u");
        assert!(policy.check(&user, 10, 10).is_ok());
        let err = policy.check(&user, 9, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
