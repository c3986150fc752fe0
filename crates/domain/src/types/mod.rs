//! Domain data types

pub mod calendar;
pub mod credential;
pub mod external;
pub mod sync;

pub use calendar::{Calendar, Event};
pub use credential::{Credential, TokenGrant};
pub use external::{ExternalCalendar, ExternalEvent, ExternalEventPage};
pub use sync::{
    ConflictKind, ConflictRecord, ConflictResolution, ConflictResolutionState, EventMutation,
    ReconcileOutcome, SyncErrorRecord, SyncResult, SyncStatus,
};
