use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-issued numeric petition identifier.
pub type PetitionId = i64;

/// Store-issued numeric signature identifier.
pub type SignatureId = i64;

/// Opaque reference to an acting moderator.
///
/// The engine never interprets the value; it compares holders for lock
/// ownership and records it in the moderation audit trail. Resolving it to
/// an actual user account belongs to the authentication subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModeratorId(String);

impl ModeratorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModeratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Petition lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PetitionState {
    Pending,
    Validated,
    Sponsored,
    Flagged,
    Open,
    Rejected,
    Hidden,
    Closed,
}

impl PetitionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Sponsored => "sponsored",
            Self::Flagged => "flagged",
            Self::Open => "open",
            Self::Rejected => "rejected",
            Self::Hidden => "hidden",
            Self::Closed => "closed",
        }
    }

    /// States still waiting on a moderation decision.
    pub fn in_moderation(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Validated | Self::Sponsored | Self::Flagged
        )
    }

    /// States a moderation decision has already been made for.
    pub fn moderated(self) -> bool {
        matches!(
            self,
            Self::Open | Self::Rejected | Self::Hidden | Self::Closed
        )
    }

    /// States shown on public petition lists.
    pub fn visible(self) -> bool {
        matches!(self, Self::Open | Self::Rejected | Self::Closed)
    }
}

impl fmt::Display for PetitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Debate scheduling sub-states, tracked independently of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateState {
    Pending,
    Awaiting,
    Scheduled,
    Debated,
    NotDebated,
}

impl DebateState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Awaiting => "awaiting",
            Self::Scheduled => "scheduled",
            Self::Debated => "debated",
            Self::NotDebated => "not_debated",
        }
    }

    /// Outcome states survive later threshold and date edits.
    pub fn concluded(self) -> bool {
        matches!(self, Self::Debated | Self::NotDebated)
    }
}

impl fmt::Display for DebateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature validation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureState {
    Pending,
    Validated,
    Invalidated,
}

impl SignatureState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Invalidated => "invalidated",
        }
    }
}

/// A petition row as persisted by the storage backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Petition {
    pub id: PetitionId,
    /// Public reference code, assigned exactly once when the petition first
    /// opens. Never reused, never reassigned.
    pub reference: Option<String>,
    pub state: PetitionState,
    /// Fixed at creation. Petitions that do not collect signatures always
    /// report a visible count of 0, whatever the stored tally says.
    pub collect_signatures: bool,
    pub signature_count: u64,
    pub last_signed_at: Option<DateTime<Utc>>,
    pub moderation_threshold_reached_at: Option<DateTime<Utc>>,
    pub referral_threshold_reached_at: Option<DateTime<Utc>>,
    pub debate_threshold_reached_at: Option<DateTime<Utc>>,
    pub debate_state: DebateState,
    pub scheduled_debate_date: Option<NaiveDate>,
    pub open_at: Option<DateTime<Utc>>,
    /// While open this is the scheduled closing date; after an explicit
    /// close it is the actual close time.
    pub closed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub moderated_by: Option<ModeratorId>,
    /// Whole days between reaching the moderation threshold and the first
    /// moderation decision. Frozen once set.
    pub moderation_lag: Option<i64>,
    pub locked_by: Option<ModeratorId>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Petition {
    /// Build the initial row for a new petition. Identifier assignment is
    /// the storage backend's job.
    pub fn from_new(id: PetitionId, new: &NewPetition) -> Self {
        Self {
            id,
            reference: None,
            state: PetitionState::Pending,
            collect_signatures: new.collect_signatures,
            signature_count: 0,
            last_signed_at: None,
            moderation_threshold_reached_at: None,
            referral_threshold_reached_at: None,
            debate_threshold_reached_at: None,
            debate_state: DebateState::Pending,
            scheduled_debate_date: None,
            open_at: None,
            closed_at: None,
            rejected_at: None,
            moderated_by: None,
            moderation_lag: None,
            locked_by: None,
            locked_at: None,
            created_at: new.created_at,
        }
    }

    /// The count shown to external readers. Petitions that do not collect
    /// signatures always read 0 even though the stored tally may move.
    pub fn visible_signature_count(&self) -> u64 {
        if self.collect_signatures {
            self.signature_count
        } else {
            0
        }
    }

    pub fn has_ever_been_open(&self) -> bool {
        self.open_at.is_some()
    }

    pub fn can_be_signed(&self) -> bool {
        self.state == PetitionState::Open
    }

    /// Whether signing has ended for good. Closed petitions keep accepting
    /// in-flight signatures for 24 hours after the closing time.
    pub fn closed_for_signing(&self, at: DateTime<Utc>) -> bool {
        match self.state {
            PetitionState::Rejected | PetitionState::Hidden => true,
            PetitionState::Closed => match self.closed_at {
                Some(closed_at) => at - closed_at >= chrono::Duration::hours(24),
                None => true,
            },
            _ => false,
        }
    }

    /// Whether the scheduled closing date has passed.
    pub fn past_closing_date(&self, at: DateTime<Utc>) -> bool {
        self.closed_at.map(|deadline| deadline <= at).unwrap_or(false)
    }
}

/// Seed for a new petition row.
#[derive(Debug, Clone)]
pub struct NewPetition {
    pub collect_signatures: bool,
    pub created_at: DateTime<Utc>,
}

/// A signature row as persisted by the storage backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub id: SignatureId,
    pub petition_id: PetitionId,
    pub state: SignatureState,
    /// The petition creator's own signature. Exactly one per petition.
    pub creator: bool,
    /// An early supporter counting toward the moderation threshold.
    pub sponsor: bool,
    pub name: String,
    pub email: String,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Signature {
    pub fn from_new(id: SignatureId, new: &NewSignature) -> Self {
        Self {
            id,
            petition_id: new.petition_id,
            state: SignatureState::Pending,
            creator: new.creator,
            sponsor: new.sponsor,
            name: new.name.clone(),
            email: new.email.clone(),
            validated_at: None,
            created_at: new.created_at,
        }
    }

    pub fn validated(&self) -> bool {
        self.state == SignatureState::Validated
    }
}

/// Seed for a new signature row.
#[derive(Debug, Clone)]
pub struct NewSignature {
    pub petition_id: PetitionId,
    pub creator: bool,
    pub sponsor: bool,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl NewSignature {
    pub fn supporter(
        petition_id: PetitionId,
        name: impl Into<String>,
        email: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            petition_id,
            creator: false,
            sponsor: false,
            name: name.into(),
            email: email.into(),
            created_at,
        }
    }

    pub fn sponsor(
        petition_id: PetitionId,
        name: impl Into<String>,
        email: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sponsor: true,
            ..Self::supporter(petition_id, name, email, created_at)
        }
    }
}

/// The rejection record owned by a rejected or hidden petition.
///
/// One per petition; a later rejection with a different reason replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub petition_id: PetitionId,
    pub code: String,
    pub details: Option<String>,
    pub rejected_at: DateTime<Utc>,
}
