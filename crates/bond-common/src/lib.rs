/*!
# Bond Common Types

Shared vocabulary for the bond engine: identifiers, the persisted record models,
the domain error type and the injectable clock.

## Architectural Tenets
- Records are plain data; lifecycle rules live next to the type they guard
- Append-only collections (ledger, activity) expose no mutation helpers
- Time is always read through a [`Clock`] so behaviour is reproducible in tests
*/

pub mod clock;
pub mod error;
pub mod ids;
pub mod models;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BondError, BondResult, ErrorKind};
pub use ids::{
    ActivityId, BondId, ContractId, LedgerEntryId, MembershipId, NotificationId, UserId,
};
pub use models::{
    ActivityEventType, ActivityLogEntry, Bond, BondMembership, Contract, ContractStatus,
    LedgerEntry, Notification, ReasonCode, Signature, SignatureStatus, UserPreferences,
};
