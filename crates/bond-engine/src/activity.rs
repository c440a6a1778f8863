/*!
# Activity and Notification Emission

Domain transitions are written to the bond's append-only activity log inside the
transaction that performed them. Notification fan-out to co-members happens
afterwards, in its own transaction, and is best-effort: a failure is logged and
never undoes the transition that caused it.
*/

use bond_common::{
    ActivityEventType, ActivityId, ActivityLogEntry, BondError, BondId, BondResult, Clock,
    Notification, NotificationId, UserId,
};
use bond_storage::{RecordStore, StoreTransaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::membership::MembershipResolver;

/// Result of recording an activity entry
#[derive(Debug, Clone)]
pub struct EmitOutcome {
    pub entry: ActivityLogEntry,
    /// False when the idempotency key had already been used
    pub newly_recorded: bool,
}

/// Activity entries recorded in a transaction, awaiting fan-out after commit
#[derive(Debug, Default)]
pub struct Outbox {
    entries: Vec<ActivityLogEntry>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: &EmitOutcome) {
        if outcome.newly_recorded {
            self.entries.push(outcome.entry.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ActivityLogEntry] {
        &self.entries
    }
}

#[derive(Debug, Clone)]
pub struct ActivityEmitter {
    clock: Arc<dyn Clock>,
    membership: MembershipResolver,
}

impl ActivityEmitter {
    pub fn new(clock: Arc<dyn Clock>, membership: MembershipResolver) -> Self {
        Self { clock, membership }
    }

    /// Append one activity entry within `tx`.
    ///
    /// With an idempotency key that was already used in this bond, the earlier
    /// entry is returned and nothing is appended.
    pub async fn record(
        &self,
        tx: &mut dyn StoreTransaction,
        outbox: &mut Outbox,
        bond_id: &BondId,
        actor_id: &UserId,
        event_type: ActivityEventType,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> BondResult<EmitOutcome> {
        if let Some(key) = &idempotency_key {
            if let Some(existing) = tx.find_activity(bond_id, key).await? {
                debug!("Activity key {} already recorded in bond {}", key, bond_id);
                return Ok(EmitOutcome {
                    entry: existing,
                    newly_recorded: false,
                });
            }
        }

        let entry = ActivityLogEntry {
            id: ActivityId::generate(),
            bond_id: *bond_id,
            actor_id: actor_id.clone(),
            event_type,
            payload,
            idempotency_key,
            created_at: self.clock.now(),
        };
        tx.append_activity(entry.clone()).await?;
        debug!("Recorded {} activity in bond {}", entry.event_type, bond_id);

        let outcome = EmitOutcome {
            entry,
            newly_recorded: true,
        };
        outbox.push(&outcome);
        Ok(outcome)
    }

    /// Fan out every entry in the outbox. Returns the number of notifications created.
    pub async fn flush(&self, store: &dyn RecordStore, outbox: Outbox) -> usize {
        let mut created = 0;
        for entry in &outbox.entries {
            created += self.fan_out(store, entry).await;
        }
        created
    }

    /// Create notifications for the entry's recipients; failures are logged and swallowed
    pub async fn fan_out(&self, store: &dyn RecordStore, entry: &ActivityLogEntry) -> usize {
        match self.try_fan_out(store, entry).await {
            Ok(created) => created,
            Err(e) => {
                warn!("Failed to fan out notifications for activity {}: {}", entry.id, e);
                0
            }
        }
    }

    async fn try_fan_out(&self, store: &dyn RecordStore, entry: &ActivityLogEntry) -> BondResult<usize> {
        let mut tx = store.begin().await?;
        let recipients = self
            .membership
            .active_members(tx.as_mut(), &entry.bond_id)
            .await?;

        let mut created = 0;
        for recipient in recipients.into_iter().filter(|r| r != &entry.actor_id) {
            if tx.notification_exists(&entry.id, &recipient).await? {
                continue;
            }
            let notification = Notification::for_activity(entry, recipient.clone(), self.clock.now());
            match tx.insert_notification(notification).await {
                Ok(()) => created += 1,
                Err(e) => warn!("Failed to notify {} of activity {}: {}", recipient, entry.id, e),
            }
        }

        tx.commit().await?;
        if created > 0 {
            debug!("Created {} notifications for activity {}", created, entry.id);
        }
        Ok(created)
    }

    /// Record one entry in its own transaction and fan it out.
    ///
    /// The actor must be an active member of the bond.
    pub async fn emit(
        &self,
        store: &dyn RecordStore,
        bond_id: &BondId,
        actor_id: &UserId,
        event_type: ActivityEventType,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> BondResult<EmitOutcome> {
        let mut tx = store.begin().await?;
        let mut outbox = Outbox::new();

        let recorded: BondResult<EmitOutcome> = async {
            self.membership.require_bond(tx.as_mut(), bond_id).await?;
            self.membership
                .require_active_member(tx.as_mut(), bond_id, actor_id)
                .await?;
            self.record(
                tx.as_mut(),
                &mut outbox,
                bond_id,
                actor_id,
                event_type,
                payload,
                idempotency_key,
            )
            .await
        }
        .await;

        let outcome = match recorded {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed after emit error: {}", rollback_err);
                }
                return Err(e);
            }
        };

        tx.commit().await?;
        self.flush(store, outbox).await;
        Ok(outcome)
    }

    /// Most recent entries first
    pub async fn recent(
        &self,
        tx: &mut dyn StoreTransaction,
        bond_id: &BondId,
        limit: usize,
    ) -> BondResult<Vec<ActivityLogEntry>> {
        let mut entries = tx.list_activity(bond_id).await?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// The user's notifications, newest first
    pub async fn notifications_for(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
        unread_only: bool,
    ) -> BondResult<Vec<Notification>> {
        let mut notifications: Vec<Notification> = tx
            .notifications_for(user_id)
            .await?
            .into_iter()
            .filter(|n| !unread_only || !n.is_read())
            .collect();
        notifications.reverse();
        Ok(notifications)
    }

    /// Marking twice keeps the first read timestamp
    pub async fn mark_read(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> BondResult<Notification> {
        let mut notification = tx
            .get_notification(notification_id)
            .await?
            .filter(|n| &n.recipient_id == user_id)
            .ok_or_else(|| BondError::not_found(format!("notification {}", notification_id)))?;

        if notification.read_at.is_none() {
            notification.read_at = Some(self.clock.now());
            tx.update_notification(notification.clone()).await?;
            info!("{} read notification {}", user_id, notification_id);
        }
        Ok(notification)
    }
}
