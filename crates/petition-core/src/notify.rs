use crate::model::{Petition, Rejection};
use chrono::NaiveDate;
use std::sync::Mutex;
use thiserror::Error;

/// Lifecycle notifications handed to the notification collaborator.
///
/// Each event carries a snapshot of the petition as written, so dispatchers
/// never re-read engine state.
#[derive(Debug, Clone)]
pub enum PetitionEvent {
    CreatorValidated { petition: Petition },
    ModerationThresholdReached { petition: Petition },
    PetitionApproved { petition: Petition },
    PetitionRejected { petition: Petition, rejection: Rejection },
    PetitionRestored { petition: Petition },
    DebateScheduled { petition: Petition, date: NaiveDate },
}

impl PetitionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreatorValidated { .. } => "creator_validated",
            Self::ModerationThresholdReached { .. } => "threshold_moderation_reached",
            Self::PetitionApproved { .. } => "petition_approved",
            Self::PetitionRejected { .. } => "petition_rejected",
            Self::PetitionRestored { .. } => "petition_restored",
            Self::DebateScheduled { .. } => "debate_scheduled",
        }
    }
}

#[derive(Debug, Error)]
#[error("notification dispatch failed: {0}")]
pub struct NotifyError(pub String);

/// Dispatch surface for lifecycle notifications.
///
/// Dispatch is fire-and-forget from the engine's perspective: failures are
/// logged and never roll back a state change.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: PetitionEvent) -> Result<(), NotifyError>;
}

/// Discards every event. The default when the hosting application has no
/// notification pipeline wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: PetitionEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Captures events for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<PetitionEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PetitionEvent> {
        self.events.lock().expect("events lock poisoned").clone()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(PetitionEvent::name).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: PetitionEvent) -> Result<(), NotifyError> {
        self.events.lock().expect("events lock poisoned").push(event);
        Ok(())
    }
}
