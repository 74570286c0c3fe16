//! Publish run state machine
//!
//! A publish run moves through named stages:
//! PENDING → VERSION_REWRITTEN → ARCHIVE_BUILT → MANIFEST_WRITTEN →
//! ARCHIVE_UPLOADED → COMPLETED, or FAILED from any non-terminal stage.
//!
//! The state is persisted after every transition so an aborted run can be
//! diagnosed and resumed.

mod publish_state;

pub use publish_state::{
    PublishStage, PublishStateData, StateError, SCHEMA_ID, SCHEMA_VERSION, STATE_FILE_NAME,
};

use chrono::{DateTime, Utc};

/// Current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
