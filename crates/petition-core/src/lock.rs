use crate::model::{ModeratorId, Petition};
use chrono::{DateTime, Utc};

/// Result of a checkout attempt.
///
/// Contention is an expected, recoverable condition, so it is a value the
/// caller can show to the requester rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Acquired,
    HeldByOther { holder: ModeratorId },
}

impl CheckoutOutcome {
    pub fn acquired(&self) -> bool {
        matches!(self, Self::Acquired)
    }
}

/// Claim the lock unless a different moderator already holds it. Re-entrant
/// for the current holder, refreshing `locked_at`.
pub(crate) fn apply_checkout(
    petition: &mut Petition,
    user: &ModeratorId,
    now: DateTime<Utc>,
) -> CheckoutOutcome {
    match &petition.locked_by {
        Some(holder) if holder != user => CheckoutOutcome::HeldByOther {
            holder: holder.clone(),
        },
        _ => {
            petition.locked_by = Some(user.clone());
            petition.locked_at = Some(now);
            CheckoutOutcome::Acquired
        }
    }
}

/// Claim the lock unconditionally, displacing any holder.
pub(crate) fn apply_force_checkout(petition: &mut Petition, user: &ModeratorId, now: DateTime<Utc>) {
    petition.locked_by = Some(user.clone());
    petition.locked_at = Some(now);
}

/// Keep-alive: refresh `locked_at` only for the current holder. Returns
/// whether anything changed.
pub(crate) fn apply_touch(petition: &mut Petition, user: &ModeratorId, now: DateTime<Utc>) -> bool {
    if petition.locked_by.as_ref() == Some(user) {
        petition.locked_at = Some(now);
        true
    } else {
        false
    }
}

/// Release the lock only for the current holder. Returns whether anything
/// changed.
pub(crate) fn apply_release(petition: &mut Petition, user: &ModeratorId) -> bool {
    if petition.locked_by.as_ref() == Some(user) {
        petition.locked_by = None;
        petition.locked_at = None;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewPetition;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 3, 14, 0, 0).unwrap()
    }

    fn petition() -> Petition {
        Petition::from_new(
            3,
            &NewPetition {
                collect_signatures: true,
                created_at: now(),
            },
        )
    }

    #[test]
    fn checkout_acquires_an_unlocked_petition() {
        let mut subject = petition();
        let alice = ModeratorId::new("alice");

        assert!(apply_checkout(&mut subject, &alice, now()).acquired());
        assert_eq!(subject.locked_by, Some(alice));
        assert_eq!(subject.locked_at, Some(now()));
    }

    #[test]
    fn checkout_refreshes_for_the_current_holder() {
        let mut subject = petition();
        let alice = ModeratorId::new("alice");
        apply_checkout(&mut subject, &alice, now());

        let later = now() + chrono::Duration::minutes(30);
        assert!(apply_checkout(&mut subject, &alice, later).acquired());
        assert_eq!(subject.locked_at, Some(later));
    }

    #[test]
    fn checkout_reports_the_other_holder_without_mutating() {
        let mut subject = petition();
        let alice = ModeratorId::new("alice");
        let bob = ModeratorId::new("bob");
        apply_checkout(&mut subject, &alice, now());

        let outcome = apply_checkout(&mut subject, &bob, now() + chrono::Duration::minutes(5));
        assert_eq!(
            outcome,
            CheckoutOutcome::HeldByOther {
                holder: alice.clone()
            }
        );
        assert_eq!(subject.locked_by, Some(alice));
        assert_eq!(subject.locked_at, Some(now()));
    }

    #[test]
    fn force_checkout_displaces_the_holder() {
        let mut subject = petition();
        let alice = ModeratorId::new("alice");
        let bob = ModeratorId::new("bob");
        apply_checkout(&mut subject, &alice, now());

        let later = now() + chrono::Duration::minutes(5);
        apply_force_checkout(&mut subject, &bob, later);
        assert_eq!(subject.locked_by, Some(bob));
        assert_eq!(subject.locked_at, Some(later));
    }

    #[test]
    fn touch_only_refreshes_for_the_holder() {
        let mut subject = petition();
        let alice = ModeratorId::new("alice");
        let bob = ModeratorId::new("bob");

        assert!(!apply_touch(&mut subject, &alice, now()));
        assert!(subject.locked_at.is_none());

        apply_checkout(&mut subject, &alice, now());
        let later = now() + chrono::Duration::minutes(10);
        assert!(!apply_touch(&mut subject, &bob, later));
        assert_eq!(subject.locked_at, Some(now()));
        assert!(apply_touch(&mut subject, &alice, later));
        assert_eq!(subject.locked_at, Some(later));
    }

    #[test]
    fn release_only_clears_for_the_holder() {
        let mut subject = petition();
        let alice = ModeratorId::new("alice");
        let bob = ModeratorId::new("bob");
        apply_checkout(&mut subject, &alice, now());

        assert!(!apply_release(&mut subject, &bob));
        assert_eq!(subject.locked_by, Some(alice.clone()));

        assert!(apply_release(&mut subject, &alice));
        assert!(subject.locked_by.is_none());
        assert!(subject.locked_at.is_none());
    }
}
