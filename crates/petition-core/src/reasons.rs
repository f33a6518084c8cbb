use crate::model::PetitionState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A configured rejection reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionReason {
    pub code: String,
    pub description: String,
    /// Hidden reasons take the petition off public lists entirely; the rest
    /// leave it visible in the rejected list.
    pub hidden: bool,
}

impl RejectionReason {
    pub fn new(code: impl Into<String>, description: impl Into<String>, hidden: bool) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            hidden,
        }
    }

    /// The lifecycle state a petition rejected for this reason lands in.
    pub fn target_state(&self) -> PetitionState {
        if self.hidden {
            PetitionState::Hidden
        } else {
            PetitionState::Rejected
        }
    }

    /// Whether a petition rejected for this reason stays on public lists.
    pub fn visible_in_lists(&self) -> bool {
        !self.hidden
    }
}

/// Injected lookup table of rejection reasons.
///
/// The reason set is deployment configuration (it ships with the site's
/// locale data), so the engine receives it fully built rather than owning
/// the codes itself.
#[derive(Debug, Clone, Default)]
pub struct RejectionReasonSet {
    reasons: BTreeMap<String, RejectionReason>,
}

impl RejectionReasonSet {
    pub fn new(reasons: impl IntoIterator<Item = RejectionReason>) -> Self {
        Self {
            reasons: reasons
                .into_iter()
                .map(|reason| (reason.code.clone(), reason))
                .collect(),
        }
    }

    /// The reason set used by the standard deployment.
    pub fn standard() -> Self {
        Self::new([
            RejectionReason::new(
                "insufficient",
                "Did not collect enough signatures to be considered",
                false,
            ),
            RejectionReason::new("duplicate", "Duplicate of an existing petition", false),
            RejectionReason::new(
                "irrelevant",
                "Outside the powers of the parliament or government",
                false,
            ),
            RejectionReason::new(
                "no-action",
                "Does not ask for a clear action",
                false,
            ),
            RejectionReason::new("fake-name", "Created under a false name", false),
            RejectionReason::new("libellous", "Defamatory or potentially libellous", true),
            RejectionReason::new("offensive", "Offensive, joke or nonsense content", true),
            RejectionReason::new(
                "not-suitable",
                "Contains material not suitable for publication",
                true,
            ),
        ])
    }

    pub fn get(&self, code: &str) -> Option<&RejectionReason> {
        self.reasons.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.reasons.contains_key(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.reasons.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }
}
