use crate::config::EngineConfig;
use crate::model::{DebateState, Petition, PetitionState};
use chrono::{DateTime, Utc};

/// What a counter pass changed, beyond the count itself. The engine turns
/// these into notifications after the row has been durably written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterOutcome {
    /// The petition left `pending` on its first validated signature.
    pub became_validated: bool,
    pub moderation_threshold_crossed: bool,
    pub referral_threshold_crossed: bool,
    pub debate_threshold_crossed: bool,
}

/// Apply an increment and re-evaluate every threshold in one pass.
///
/// Invariant: the caller writes the mutated petition in the same atomic
/// storage update, so a crossing and its state advancement commit together.
pub(crate) fn apply_increment(
    petition: &mut Petition,
    by: u64,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> CounterOutcome {
    let mut outcome = CounterOutcome::default();

    petition.signature_count = petition.signature_count.saturating_add(by);
    petition.last_signed_at = Some(now);

    // The first validated signature moves a pending petition into the
    // sponsorship phase. Not a threshold event, so the feature flag does
    // not suppress it.
    if petition.state == PetitionState::Pending {
        petition.state = PetitionState::Validated;
        outcome.became_validated = true;
    }

    if config.disable_thresholds_and_debates {
        return outcome;
    }

    let count = petition.signature_count;

    // The moderation crossing only applies while the petition is still in
    // the moderation queue; an already-open petition with a nil timestamp
    // (e.g. created before thresholds were configured) is not backfilled.
    if petition.state.in_moderation()
        && petition.moderation_threshold_reached_at.is_none()
        && count >= config.threshold_for_moderation
    {
        petition.moderation_threshold_reached_at = Some(now);
        if matches!(
            petition.state,
            PetitionState::Pending | PetitionState::Validated
        ) {
            petition.state = PetitionState::Sponsored;
        }
        outcome.moderation_threshold_crossed = true;
    }

    if petition.state == PetitionState::Open
        && petition.referral_threshold_reached_at.is_none()
        && count >= config.threshold_for_referral
    {
        petition.referral_threshold_reached_at = Some(now);
        outcome.referral_threshold_crossed = true;
    }

    if petition.debate_threshold_reached_at.is_none() && count >= config.threshold_for_debate {
        petition.debate_threshold_reached_at = Some(now);
        if petition.debate_state == DebateState::Pending {
            petition.debate_state = DebateState::Awaiting;
        }
        outcome.debate_threshold_crossed = true;
    }

    outcome
}

/// Apply a decrement, clearing any threshold the count drops strictly below.
///
/// Returns false when the tally is already at the creator floor and nothing
/// changed. The stored tally never drops below 1; the floor applies whether
/// or not the petition is collecting signatures, since the visible count is
/// masked separately.
pub(crate) fn apply_decrement(petition: &mut Petition, by: u64, config: &EngineConfig) -> bool {
    if petition.signature_count <= 1 {
        return false;
    }

    petition.signature_count = petition.signature_count.saturating_sub(by).max(1);

    if config.disable_thresholds_and_debates {
        return true;
    }

    let count = petition.signature_count;

    if count < config.threshold_for_moderation {
        petition.moderation_threshold_reached_at = None;
    }

    if count < config.threshold_for_referral {
        petition.referral_threshold_reached_at = None;
    }

    if count < config.threshold_for_debate {
        petition.debate_threshold_reached_at = None;
        if petition.debate_state == DebateState::Awaiting {
            petition.debate_state = DebateState::Pending;
        }
    }

    true
}
