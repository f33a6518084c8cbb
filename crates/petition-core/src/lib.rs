//! Core petition lifecycle engine.
//!
//! This crate governs how a public petition moves through its life: drafted
//! and pending, validated and sponsored by early supporters, reviewed by
//! moderators, then open for signing, rejected, or hidden, and finally
//! closed. It keeps the running signature count accurate under concurrent
//! signers, detects each population threshold (moderation, referral,
//! debate) exactly once, tracks the debate-scheduling sub-state, and
//! arbitrates the advisory checkout lock moderators use to avoid editing
//! the same petition twice.
//!
//! Rendering, notification delivery, search and rate limiting live outside
//! this crate; the engine talks to them through the narrow [`Notifier`] and
//! storage traits and never produces user-facing text.

#![deny(unsafe_code)]

pub mod clock;
pub mod config;
mod counter;
mod debate;
pub mod engine;
pub mod error;
mod lifecycle;
mod lock;
pub mod model;
pub mod notify;
pub mod reasons;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use counter::CounterOutcome;
pub use engine::PetitionEngine;
pub use error::{PetitionError, Result};
pub use lock::CheckoutOutcome;
pub use model::{
    DebateState, ModeratorId, NewPetition, NewSignature, Petition, PetitionId, PetitionState,
    Rejection, Signature, SignatureId, SignatureState,
};
pub use notify::{NoopNotifier, Notifier, NotifyError, PetitionEvent, RecordingNotifier};
pub use reasons::{RejectionReason, RejectionReasonSet};
pub use storage::memory::InMemoryPetitionStore;
pub use storage::{
    PetitionStorage, PetitionStore, RejectionStore, SignatureStore, StorageError, StorageResult,
    Version, VersionedPetition,
};
