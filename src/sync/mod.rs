//! Timetable synchronization: mail → attachment → schedule → store → calendar.

pub mod cache;
pub mod extract;
pub mod gate;
pub mod mail;
pub mod outcome;
pub mod pipeline;
pub mod scheduler;
pub mod store;

pub use outcome::{OutcomeKind, StepOutcome, SyncError};
pub use pipeline::{Collaborators, SyncPipeline, SyncReport};
pub use scheduler::{CycleSummary, PollScheduler};

use crate::data::models::User;
use crate::sync::mail::AttachmentRef;

/// A user paired with the attachment selected for this sync pass.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub user: User,
    pub attachment: AttachmentRef,
}

impl UserInfo {
    pub fn new(user: User, attachment: AttachmentRef) -> Self {
        Self { user, attachment }
    }

    /// The attachment's filename as it appeared in the mailbox.
    pub fn original_filename(&self) -> &str {
        &self.attachment.filename
    }
}
