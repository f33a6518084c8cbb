//! End-to-end engine behavior against the in-memory reference store.

use chrono::{TimeZone, Utc};
use petition_core::{
    CheckoutOutcome, Clock, DebateState, EngineConfig, FixedClock, InMemoryPetitionStore,
    ModeratorId, NewSignature, PetitionEngine, PetitionError, PetitionId, PetitionState,
    RecordingNotifier, RejectionReasonSet,
};
use std::sync::Arc;

struct Harness {
    engine: Arc<PetitionEngine>,
    clock: Arc<FixedClock>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    harness_with(EngineConfig {
        threshold_for_moderation: 5,
        threshold_for_referral: 10,
        threshold_for_debate: 12,
        petition_duration: chrono::Duration::weeks(2),
        ..EngineConfig::default()
    })
}

fn harness_with(config: EngineConfig) -> Harness {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap(),
    ));
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = Arc::new(PetitionEngine::new(
        Arc::new(InMemoryPetitionStore::new()),
        config,
        RejectionReasonSet::standard(),
        clock.clone(),
        notifier.clone(),
    ));
    Harness {
        engine,
        clock,
        notifier,
    }
}

async fn petition_with_validated_creator(harness: &Harness) -> PetitionId {
    let (petition, _) = harness
        .engine
        .create_petition(true, "Creator", "creator@example.com")
        .await
        .unwrap();
    harness.engine.validate_creator(petition.id).await.unwrap();
    petition.id
}

/// Validate `count` additional supporter signatures one at a time.
async fn validate_supporters(harness: &Harness, petition_id: PetitionId, count: usize) {
    for index in 0..count {
        let signature = harness
            .engine
            .add_signature(NewSignature::supporter(
                petition_id,
                format!("Supporter {index}"),
                format!("supporter{index}@example.com"),
                harness.clock.now(),
            ))
            .await
            .unwrap();
        harness
            .engine
            .validate_signature(signature.id)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn end_to_end_moderation_walk() {
    let harness = harness();
    let (petition, creator) = harness
        .engine
        .create_petition(true, "Creator", "creator@example.com")
        .await
        .unwrap();
    assert_eq!(petition.state, PetitionState::Pending);
    assert_eq!(petition.signature_count, 0);
    assert!(creator.creator);

    // The creator alone does not cross the moderation threshold of 5.
    let after_creator = harness.engine.validate_creator(petition.id).await.unwrap();
    assert_eq!(after_creator.signature_count, 1);
    assert_eq!(after_creator.state, PetitionState::Validated);
    assert!(after_creator.moderation_threshold_reached_at.is_none());

    validate_supporters(&harness, petition.id, 4).await;
    let sponsored = harness.engine.get_petition(petition.id).await.unwrap();
    assert_eq!(sponsored.signature_count, 5);
    assert_eq!(sponsored.state, PetitionState::Sponsored);
    let reached_at = sponsored.moderation_threshold_reached_at.unwrap();

    // A further signature never rewrites the crossing timestamp.
    validate_supporters(&harness, petition.id, 1).await;
    let still_sponsored = harness.engine.get_petition(petition.id).await.unwrap();
    assert_eq!(
        still_sponsored.moderation_threshold_reached_at,
        Some(reached_at)
    );

    let moderator = ModeratorId::new("mod-1");
    let open = harness
        .engine
        .publish(petition.id, &moderator)
        .await
        .unwrap();
    assert_eq!(open.state, PetitionState::Open);
    assert_eq!(open.open_at, Some(harness.clock.now()));
    assert_eq!(open.reference.as_deref(), Some("P-00001"));
    assert_eq!(open.moderated_by, Some(moderator));
    assert_eq!(
        open.closed_at,
        Some(harness.clock.now() + chrono::Duration::weeks(2))
    );

    // Past the closing date, the sweep closes it; the deadline stays as the
    // close time.
    harness.clock.advance(chrono::Duration::weeks(3));
    let closed_count = harness.engine.close_petitions().await.unwrap();
    assert_eq!(closed_count, 1);
    let closed = harness.engine.get_petition(petition.id).await.unwrap();
    assert_eq!(closed.state, PetitionState::Closed);
    assert_eq!(closed.closed_at, Some(open.closed_at.unwrap()));

    assert_eq!(
        harness.notifier.event_names(),
        vec![
            "creator_validated",
            "threshold_moderation_reached",
            "petition_approved",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_all_applied() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = harness.engine.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                // Exhausted retries are transient: the whole request is
                // retried, as a real signing request handler would.
                loop {
                    match engine.increment_signature_count(petition_id, 1).await {
                        Ok(_) => break,
                        Err(err) if err.is_transient() => continue,
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let petition = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(petition.signature_count, 21);
    assert_eq!(petition.state, PetitionState::Sponsored);
    assert!(petition.moderation_threshold_reached_at.is_some());

    // Exactly one crossing event despite 20 concurrent increments.
    let crossings = harness
        .notifier
        .event_names()
        .into_iter()
        .filter(|name| *name == "threshold_moderation_reached")
        .count();
    assert_eq!(crossings, 1);
}

#[tokio::test]
async fn concurrent_rejections_keep_exactly_one_rejection() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;

    let first = harness.engine.clone();
    let second = harness.engine.clone();
    let mod_1 = ModeratorId::new("mod-1");
    let mod_2 = ModeratorId::new("mod-2");
    let (a, b) = tokio::join!(
        first.reject(petition_id, &mod_1, "duplicate", None),
        second.reject(petition_id, &mod_2, "irrelevant", None),
    );
    a.unwrap();
    b.unwrap();

    let rejection = harness
        .engine
        .get_rejection(petition_id)
        .await
        .unwrap()
        .unwrap();
    assert!(["duplicate", "irrelevant"].contains(&rejection.code.as_str()));

    let petition = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(petition.state, PetitionState::Rejected);
    assert!(petition.rejected_at.is_some());
}

#[tokio::test]
async fn rejecting_with_an_unknown_code_mutates_nothing() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;

    let err = harness
        .engine
        .reject(petition_id, &ModeratorId::new("mod-1"), "sensible", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PetitionError::UnknownRejectionCode(_)));

    let petition = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(petition.state, PetitionState::Validated);
    assert!(harness
        .engine
        .get_rejection(petition_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn hidden_rejection_freezes_the_moderation_lag() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 4).await;

    let sponsored = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(sponsored.state, PetitionState::Sponsored);

    harness.clock.advance(chrono::Duration::days(5));
    let hidden = harness
        .engine
        .reject(petition_id, &ModeratorId::new("mod-1"), "libellous", None)
        .await
        .unwrap();

    assert_eq!(hidden.state, PetitionState::Hidden);
    assert_eq!(hidden.rejected_at, Some(harness.clock.now()));
    assert_eq!(hidden.moderation_lag, Some(5));

    let rejection = harness
        .engine
        .get_rejection(petition_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rejection.code, "libellous");
}

#[tokio::test]
async fn restore_resumes_or_closes_by_deadline() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 4).await;

    let moderator = ModeratorId::new("mod-1");
    harness.engine.publish(petition_id, &moderator).await.unwrap();
    harness
        .engine
        .reject(petition_id, &moderator, "duplicate", None)
        .await
        .unwrap();

    // Taken down and republished while still inside its two-week window.
    let restored = harness.engine.restore(petition_id, &moderator).await.unwrap();
    assert_eq!(restored.state, PetitionState::Open);

    harness
        .engine
        .reject(petition_id, &moderator, "duplicate", None)
        .await
        .unwrap();
    harness.clock.advance(chrono::Duration::weeks(3));
    let closed = harness.engine.restore(petition_id, &moderator).await.unwrap();
    assert_eq!(closed.state, PetitionState::Closed);

    // open_at and closed_at survived both round trips.
    assert_eq!(closed.open_at, restored.open_at);
    assert_eq!(closed.closed_at, restored.closed_at);
}

#[tokio::test]
async fn closing_twice_is_an_error_not_a_silent_success() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 4).await;
    harness
        .engine
        .publish(petition_id, &ModeratorId::new("mod-1"))
        .await
        .unwrap();

    harness.engine.close(petition_id).await.unwrap();
    let err = harness.engine.close(petition_id).await.unwrap_err();
    assert!(matches!(
        err,
        PetitionError::InvalidTransition {
            from: PetitionState::Closed,
            ..
        }
    ));
}

#[tokio::test]
async fn lock_round_trip() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    let alice = ModeratorId::new("alice");
    let bob = ModeratorId::new("bob");

    assert!(harness
        .engine
        .checkout(petition_id, &alice)
        .await
        .unwrap()
        .acquired());

    let refused = harness.engine.checkout(petition_id, &bob).await.unwrap();
    assert_eq!(
        refused,
        CheckoutOutcome::HeldByOther {
            holder: alice.clone()
        }
    );
    let petition = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(petition.locked_by, Some(alice.clone()));

    // Releasing as the wrong user is a silent no-op.
    harness.engine.release(petition_id, &bob).await.unwrap();
    let petition = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(petition.locked_by, Some(alice.clone()));

    harness.engine.release(petition_id, &alice).await.unwrap();
    assert!(harness
        .engine
        .checkout(petition_id, &bob)
        .await
        .unwrap()
        .acquired());
}

#[tokio::test]
async fn force_checkout_displaces_and_touch_keeps_alive() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    let alice = ModeratorId::new("alice");
    let bob = ModeratorId::new("bob");

    harness.engine.checkout(petition_id, &alice).await.unwrap();
    let taken = harness
        .engine
        .force_checkout(petition_id, &bob)
        .await
        .unwrap();
    assert_eq!(taken.locked_by, Some(bob.clone()));

    harness.clock.advance(chrono::Duration::minutes(10));
    let touched = harness.engine.touch(petition_id, &bob).await.unwrap();
    assert_eq!(touched.locked_at, Some(harness.clock.now()));

    // A stranger's keep-alive changes nothing.
    harness.clock.advance(chrono::Duration::minutes(10));
    let untouched = harness.engine.touch(petition_id, &alice).await.unwrap();
    assert_eq!(untouched.locked_at, touched.locked_at);
}

#[tokio::test]
async fn debate_scheduling_walk() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 4).await;
    harness
        .engine
        .publish(petition_id, &ModeratorId::new("mod-1"))
        .await
        .unwrap();

    // Below the debate threshold, a future date still schedules a debate.
    let future = harness.clock.today() + chrono::Duration::days(3);
    let scheduled = harness
        .engine
        .set_scheduled_debate_date(petition_id, Some(future))
        .await
        .unwrap();
    assert_eq!(scheduled.debate_state, DebateState::Scheduled);
    assert!(harness
        .notifier
        .event_names()
        .contains(&"debate_scheduled"));

    // The sweep promotes it once the date has passed.
    harness.clock.advance(chrono::Duration::days(4));
    assert_eq!(harness.engine.mark_petitions_as_debated().await.unwrap(), 1);
    let debated = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(debated.debate_state, DebateState::Debated);

    // Running the sweep again finds nothing to do.
    assert_eq!(harness.engine.mark_petitions_as_debated().await.unwrap(), 0);
}

#[tokio::test]
async fn clearing_the_date_respects_the_debate_threshold() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 4).await;
    harness
        .engine
        .publish(petition_id, &ModeratorId::new("mod-1"))
        .await
        .unwrap();
    // Cross the debate threshold of 12.
    validate_supporters(&harness, petition_id, 7).await;

    let awaiting = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(awaiting.debate_state, DebateState::Awaiting);
    assert!(awaiting.debate_threshold_reached_at.is_some());

    let future = harness.clock.today() + chrono::Duration::days(5);
    harness
        .engine
        .set_scheduled_debate_date(petition_id, Some(future))
        .await
        .unwrap();

    let cleared = harness
        .engine
        .set_scheduled_debate_date(petition_id, None)
        .await
        .unwrap();
    assert_eq!(cleared.debate_state, DebateState::Awaiting);
}

#[tokio::test]
async fn invalidation_uncounts_and_clears_crossed_thresholds() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 4).await;
    harness
        .engine
        .publish(petition_id, &ModeratorId::new("mod-1"))
        .await
        .unwrap();

    // Reach the referral threshold of 10 exactly.
    let mut last_signature = None;
    for index in 0..5 {
        let signature = harness
            .engine
            .add_signature(NewSignature::supporter(
                petition_id,
                format!("Late {index}"),
                format!("late{index}@example.com"),
                harness.clock.now(),
            ))
            .await
            .unwrap();
        harness
            .engine
            .validate_signature(signature.id)
            .await
            .unwrap();
        last_signature = Some(signature);
    }

    let referred = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(referred.signature_count, 10);
    assert!(referred.referral_threshold_reached_at.is_some());

    let shrunk = harness
        .engine
        .invalidate_signature(last_signature.unwrap().id)
        .await
        .unwrap();
    assert_eq!(shrunk.signature_count, 9);
    assert!(shrunk.referral_threshold_reached_at.is_none());
}

#[tokio::test]
async fn resync_corrects_counter_drift() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 3).await;

    // Drift the stored tally with raw counter calls the signature rows
    // know nothing about.
    harness
        .engine
        .increment_signature_count(petition_id, 25)
        .await
        .unwrap();
    let drifted = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(drifted.signature_count, 29);

    let corrected = harness
        .engine
        .resync_signature_count(petition_id)
        .await
        .unwrap();
    assert_eq!(corrected.signature_count, 4);

    // Idempotent: a second pass changes nothing.
    let again = harness
        .engine
        .resync_signature_count(petition_id)
        .await
        .unwrap();
    assert_eq!(again.signature_count, 4);
}

#[tokio::test]
async fn paper_petitions_report_zero_but_keep_their_tally() {
    let harness = harness();
    let (petition, _) = harness
        .engine
        .create_petition(false, "Creator", "creator@example.com")
        .await
        .unwrap();

    let validated = harness.engine.validate_creator(petition.id).await.unwrap();
    assert_eq!(validated.signature_count, 1);
    assert_eq!(validated.visible_signature_count(), 0);

    // Paper petitions reach the moderation queue and publish straight to
    // closed, with no closing deadline.
    validate_supporters(&harness, petition.id, 4).await;
    let published = harness
        .engine
        .publish(petition.id, &ModeratorId::new("mod-1"))
        .await
        .unwrap();
    assert_eq!(published.state, PetitionState::Closed);
    assert!(published.closed_at.is_none());
    assert!(published.open_at.is_some());
}

#[tokio::test]
async fn disabled_thresholds_suppress_crossings_entirely() {
    let harness = harness_with(EngineConfig {
        threshold_for_moderation: 5,
        threshold_for_referral: 10,
        threshold_for_debate: 12,
        disable_thresholds_and_debates: true,
        ..EngineConfig::default()
    });
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 19).await;

    let petition = harness.engine.get_petition(petition_id).await.unwrap();
    assert_eq!(petition.signature_count, 20);
    // Still validated: the first-signature step is not a threshold event,
    // but no crossing fired.
    assert_eq!(petition.state, PetitionState::Validated);
    assert!(petition.moderation_threshold_reached_at.is_none());
    assert!(petition.debate_threshold_reached_at.is_none());
    assert_eq!(petition.debate_state, DebateState::Pending);
}

#[tokio::test]
async fn signing_window_closes_24_hours_after_the_deadline() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 4).await;
    harness
        .engine
        .publish(petition_id, &ModeratorId::new("mod-1"))
        .await
        .unwrap();

    let open = harness.engine.get_petition(petition_id).await.unwrap();
    harness.clock.set(open.closed_at.unwrap());
    harness.engine.close_petitions().await.unwrap();

    // Within the grace window an in-flight signature still lands.
    harness.clock.advance(chrono::Duration::hours(23));
    let late = harness
        .engine
        .add_signature(NewSignature::supporter(
            petition_id,
            "Latecomer",
            "late@example.com",
            harness.clock.now(),
        ))
        .await;
    assert!(late.is_ok());

    harness.clock.advance(chrono::Duration::days(2));
    let too_late = harness
        .engine
        .add_signature(NewSignature::supporter(
            petition_id,
            "Straggler",
            "straggler@example.com",
            harness.clock.now(),
        ))
        .await;
    assert!(matches!(
        too_late,
        Err(PetitionError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn validate_creator_is_idempotent() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;

    let again = harness.engine.validate_creator(petition_id).await.unwrap();
    assert_eq!(again.signature_count, 1);

    let creator_events = harness
        .notifier
        .event_names()
        .into_iter()
        .filter(|name| *name == "creator_validated")
        .count();
    assert_eq!(creator_events, 1);
}

#[tokio::test]
async fn sweep_deadline_comparison_is_on_or_before() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 4).await;
    let open = harness
        .engine
        .publish(petition_id, &ModeratorId::new("mod-1"))
        .await
        .unwrap();

    // One second before the deadline: nothing to close.
    harness
        .clock
        .set(open.closed_at.unwrap() - chrono::Duration::seconds(1));
    assert_eq!(harness.engine.close_petitions().await.unwrap(), 0);

    harness.clock.set(open.closed_at.unwrap());
    assert_eq!(harness.engine.close_petitions().await.unwrap(), 1);
}

#[tokio::test]
async fn scheduled_date_on_a_closed_petition_still_tracks_state() {
    // Debate bookkeeping continues after closing: committees debate
    // petitions that have finished collecting signatures.
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;
    validate_supporters(&harness, petition_id, 4).await;
    harness
        .engine
        .publish(petition_id, &ModeratorId::new("mod-1"))
        .await
        .unwrap();
    harness.engine.close(petition_id).await.unwrap();

    let past = harness.clock.today() - chrono::Duration::days(1);
    let debated = harness
        .engine
        .set_scheduled_debate_date(petition_id, Some(past))
        .await
        .unwrap();
    assert_eq!(debated.debate_state, DebateState::Debated);

    let not_reverted = harness
        .engine
        .set_scheduled_debate_date(petition_id, None)
        .await
        .unwrap();
    assert_eq!(not_reverted.debate_state, DebateState::Debated);
}

#[tokio::test]
async fn mark_as_not_debated_is_sticky() {
    let harness = harness();
    let petition_id = petition_with_validated_creator(&harness).await;

    let marked = harness
        .engine
        .mark_as_not_debated(petition_id)
        .await
        .unwrap();
    assert_eq!(marked.debate_state, DebateState::NotDebated);

    // A past date does not flip the recorded outcome.
    let past = harness.clock.today() - chrono::Duration::days(1);
    let unchanged = harness
        .engine
        .set_scheduled_debate_date(petition_id, Some(past))
        .await
        .unwrap();
    assert_eq!(unchanged.debate_state, DebateState::NotDebated);
}
