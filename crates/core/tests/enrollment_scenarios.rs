mod common;

use std::sync::atomic::Ordering;

use faceenroll_core::enrollment::enrollment_error::EnrollmentError;
use faceenroll_core::enrollment::session_state::Phase;
use rstest::rstest;

use common::{rig, Rig};

fn assert_index_matches_captured(r: &Rig) {
    let state = r.session.get_state();
    if matches!(state.phase, Phase::Capturing | Phase::ReadyToFinalize) {
        assert_eq!(state.active_angle_index, state.captured.len());
    }
}

#[test]
fn alice_enrolls_three_angles() {
    let r = rig(15);
    r.session.start(0).unwrap();
    r.session.set_user("alice", None).unwrap();
    for _ in 0..3 {
        r.session.capture_current_angle().unwrap();
        assert_index_matches_captured(&r);
    }
    assert_eq!(r.session.get_state().phase, Phase::ReadyToFinalize);

    let finalized = r.session.finalize().unwrap();
    let profile = &finalized.assembled.profile;
    assert_eq!(profile.name, "alice");
    assert_eq!(profile.photo_count, 3);
    assert_eq!(profile.average_landmarks.as_ref().unwrap().len(), 15);

    let state = r.session.get_state();
    assert_eq!(state.phase, Phase::Finalized);
    let frontal = state
        .captured
        .iter()
        .find(|c| c.angle.name == "frontal")
        .unwrap();
    assert_eq!(finalized.assembled.reference, frontal.image);
    assert!(r.camera.release_count() >= 1);
    assert_eq!(r.store.saved.lock().unwrap().len(), 1);
}

#[test]
fn average_landmarks_is_the_elementwise_mean() {
    let r = rig(3);
    r.session.start(0).unwrap();
    r.session.set_user("alice", None).unwrap();
    for value in [1.0, 3.0, 5.0] {
        r.detector.face(vec![value; 3]);
        r.session.capture_current_angle().unwrap();
    }

    let finalized = r.session.finalize().unwrap();
    assert_eq!(
        finalized.assembled.profile.average_landmarks,
        Some(vec![3.0, 3.0, 3.0])
    );
}

#[test]
fn no_face_leaves_state_unchanged() {
    let r = rig(3);
    r.session.start(0).unwrap();
    r.session.set_user("alice", None).unwrap();
    r.session.capture_current_angle().unwrap();
    let before = r.session.get_state();

    r.detector.no_face();
    assert!(matches!(
        r.session.capture_current_angle(),
        Err(EnrollmentError::NoFaceDetected)
    ));

    let after = r.session.get_state();
    assert_eq!(after.phase, Phase::Capturing);
    assert_eq!(after.active_angle_index, before.active_angle_index);
    assert_eq!(after.captured, before.captured);
}

#[test]
fn retry_then_recapture_replaces_the_angle() {
    let r = rig(3);
    r.session.start(0).unwrap();
    r.session.set_user("alice", None).unwrap();
    r.detector.face(vec![1.0; 3]);
    r.session.capture_current_angle().unwrap();
    let before = r.session.get_state();

    let retaken = r.session.retry_current_angle().unwrap();
    assert_eq!(retaken.name, "frontal");
    assert!(r.session.get_state().captured.is_empty());
    assert_index_matches_captured(&r);

    r.detector.face(vec![2.0; 3]);
    r.session.capture_current_angle().unwrap();

    let after = r.session.get_state();
    assert_eq!(after.active_angle_index, before.active_angle_index);
    assert_eq!(after.captured.len(), before.captured.len());
    assert_eq!(after.captured[0].angle.name, "frontal");
    assert_eq!(after.captured[0].landmarks, vec![2.0; 3]);
}

/// Drives a fresh session into the named phase.
fn session_in(phase: Phase) -> Rig {
    let r = rig(3);
    if phase == Phase::Idle {
        return r;
    }
    r.session.start(0).unwrap();
    if phase == Phase::AwaitingUser {
        return r;
    }
    r.session.set_user("alice", None).unwrap();
    r.session.capture_current_angle().unwrap();
    if phase == Phase::Capturing {
        return r;
    }
    r.session.capture_current_angle().unwrap();
    r.session.capture_current_angle().unwrap();
    assert_eq!(r.session.get_state().phase, Phase::ReadyToFinalize);
    r
}

#[rstest]
#[case(Phase::Idle)]
#[case(Phase::AwaitingUser)]
#[case(Phase::Capturing)]
#[case(Phase::ReadyToFinalize)]
fn cancel_from_any_live_phase(#[case] phase: Phase) {
    let r = session_in(phase);
    r.session.cancel().unwrap();

    let state = r.session.get_state();
    assert_eq!(state.phase, Phase::Cancelled);
    assert!(state.captured.is_empty());
    if phase != Phase::Idle {
        assert!(r.camera.release_count() >= 1);
    }
    assert!(r.store.saved.lock().unwrap().is_empty());
}

#[rstest]
#[case::cancelled(Phase::Cancelled)]
#[case::finalized(Phase::Finalized)]
#[case::failed(Phase::Failed)]
fn every_command_after_terminal_is_session_closed(#[case] terminal: Phase) {
    let r = session_in(Phase::ReadyToFinalize);
    match terminal {
        Phase::Cancelled => r.session.cancel().unwrap(),
        Phase::Failed => {
            r.store.fail.store(true, Ordering::SeqCst);
            assert!(matches!(
                r.session.finalize(),
                Err(EnrollmentError::PersistenceFailed { .. })
            ));
        }
        _ => {
            r.session.finalize().unwrap();
        }
    }
    assert_eq!(r.session.get_state().phase, terminal);
    let before = r.session.get_state();

    let closed = |result: Result<(), EnrollmentError>| {
        assert!(matches!(result, Err(EnrollmentError::SessionClosed(p)) if p == terminal));
    };
    closed(r.session.start(0));
    closed(r.session.set_user("bob", None).map(|_| ()));
    closed(r.session.capture_current_angle().map(|_| ()));
    closed(r.session.retry_current_angle().map(|_| ()));
    closed(r.session.finalize().map(|_| ()));
    closed(r.session.cancel());

    assert_eq!(r.session.get_state(), before);
}

#[test]
fn statuses_follow_every_transition() {
    let r = rig(3);
    r.session.start(0).unwrap();
    r.session.set_user("alice", None).unwrap();
    for _ in 0..3 {
        r.session.capture_current_angle().unwrap();
    }
    r.session.finalize().unwrap();

    let statuses = r.sink.statuses.lock().unwrap();
    let phases: Vec<_> = statuses.iter().map(|s| (s.phase, s.active_angle_index)).collect();
    assert_eq!(
        phases,
        [
            (Phase::AwaitingUser, 0),
            (Phase::Capturing, 0),
            (Phase::Capturing, 1),
            (Phase::Capturing, 2),
            (Phase::ReadyToFinalize, 3),
            (Phase::Finalized, 3),
        ]
    );
    assert!(statuses.iter().all(|s| s.total_angles == 3));
}

#[test]
fn producer_publishes_preview_while_awaiting_user() {
    let r = rig(3);
    r.session.start(0).unwrap();
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while r.sink.frames.load(std::sync::atomic::Ordering::SeqCst) == 0 {
        assert!(std::time::Instant::now() < deadline, "no preview frames");
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    r.session.cancel().unwrap();
}
