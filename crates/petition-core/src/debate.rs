use crate::model::{DebateState, Petition};
use chrono::NaiveDate;

/// Re-derive the debate sub-state after `scheduled_debate_date` changes.
///
/// Concluded outcomes are sticky: clearing the date never reverts them, a
/// past date never turns `not_debated` into `debated`, and only a fresh
/// future date moves a concluded petition back to `scheduled`.
pub(crate) fn apply_scheduled_date(
    petition: &mut Petition,
    date: Option<NaiveDate>,
    today: NaiveDate,
) {
    petition.scheduled_debate_date = date;

    petition.debate_state = match date {
        Some(scheduled) if scheduled > today => DebateState::Scheduled,
        Some(_) => {
            if petition.debate_state == DebateState::NotDebated {
                DebateState::NotDebated
            } else {
                DebateState::Debated
            }
        }
        None => {
            if petition.debate_state.concluded() {
                petition.debate_state
            } else if petition.debate_threshold_reached_at.is_some() {
                DebateState::Awaiting
            } else {
                DebateState::Pending
            }
        }
    };
}

/// Whether the sweep should promote this petition to `debated`.
pub(crate) fn due_for_debate(petition: &Petition, today: NaiveDate) -> bool {
    petition.debate_state == DebateState::Scheduled
        && petition
            .scheduled_debate_date
            .map(|date| date <= today)
            .unwrap_or(false)
}
