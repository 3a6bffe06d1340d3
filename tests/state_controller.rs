use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use buildtree::errors::ControllerError;
use buildtree::result::{ExecutionResult, Failure};
use buildtree::state::{State, StateTransitionController};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Phase {
    Idle,
    Running,
    Done,
}

impl State for Phase {}

fn controller() -> StateTransitionController<Phase> {
    buildtree_test_utils::init_tracing();
    StateTransitionController::new("test controller", Phase::Idle)
}

#[test]
fn transition_moves_to_target_state() {
    let c = controller();
    c.transition(Phase::Idle, Phase::Running, || Ok(())).unwrap();
    assert_eq!(c.current_state(), Phase::Running);
    c.assert_in_state(Phase::Running).unwrap();
    c.assert_in_state_or_later(Phase::Idle).unwrap();
}

#[test]
fn transition_from_wrong_state_is_rejected() {
    let c = controller();
    let err = c.transition(Phase::Running, Phase::Done, || Ok(())).unwrap_err();
    match err {
        ControllerError::WrongState(message) => {
            assert_eq!(
                message,
                "Can only transition Test controller to state Done from state Running however it is currently in state Idle."
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(c.current_state(), Phase::Idle);
    assert!(!c.has_failed());
}

#[test]
fn failed_action_is_sticky_until_finish() {
    let c = controller();
    let err = c
        .transition(Phase::Idle, Phase::Running, || -> anyhow::Result<()> {
            anyhow::bail!("action failed")
        })
        .unwrap_err();
    let failure = err.failure().cloned().expect("failure recorded");
    assert_eq!(c.current_state(), Phase::Idle);
    assert!(c.has_failed());

    match c.in_state(Phase::Idle, || Ok(())) {
        Err(ControllerError::PreviousFailure { cause, .. }) => assert!(cause.same_as(&failure)),
        other => panic!("expected previous failure, got {other:?}"),
    }

    let reported = c.finish(Phase::Done, |result| result).unwrap();
    assert_eq!(reported.failures(), &[failure]);
    assert_eq!(c.current_state(), Phase::Done);
    assert!(!c.has_failed());
}

#[test]
fn finish_when_already_finished_skips_the_transform() {
    let c = controller();
    let calls = AtomicUsize::new(0);
    let finish = || {
        c.finish(Phase::Done, |result| {
            calls.fetch_add(1, Ordering::SeqCst);
            result
        })
        .unwrap()
    };
    assert!(finish().is_success());
    assert!(finish().is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn finish_from_is_restricted_to_the_given_states() {
    let c = controller();
    let err = c
        .finish_from(&[Phase::Running], Phase::Done, |result| result)
        .unwrap_err();
    assert!(matches!(err, ControllerError::WrongState(_)));
    assert_eq!(c.current_state(), Phase::Idle);
}

#[test]
fn lease_is_reentrant_for_the_owning_thread_only() {
    let c = Arc::new(controller());
    let outer = c.acquire().unwrap();
    let inner = c.acquire().unwrap();

    let other = Arc::clone(&c);
    let err = thread::spawn(move || other.acquire().map(|_| ()).unwrap_err())
        .join()
        .unwrap();
    match err {
        ControllerError::ConcurrentTransition(message) => {
            assert_eq!(message, "Another thread is currently transitioning test controller.");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    drop(inner);
    drop(outer);
    let other = Arc::clone(&c);
    thread::spawn(move || other.acquire().map(|_| ()))
        .join()
        .unwrap()
        .unwrap();
}

#[test]
fn concurrent_transition_fails_fast_instead_of_blocking() {
    let c = Arc::new(controller());
    let started = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));

    let worker = {
        let c = Arc::clone(&c);
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            c.in_state(Phase::Idle, || {
                started.wait();
                release.wait();
                Ok(())
            })
        })
    };

    started.wait();
    let err = c.transition(Phase::Idle, Phase::Running, || Ok(())).unwrap_err();
    assert!(matches!(err, ControllerError::ConcurrentTransition(_)));

    // Reads that ignore other threads still work.
    let value = c
        .not_in_state_ignore_other_threads(Phase::Done, || Ok(7))
        .unwrap();
    assert_eq!(value, 7);

    release.wait();
    worker.join().unwrap().unwrap();
    c.transition(Phase::Idle, Phase::Running, || Ok(())).unwrap();
}

#[test]
fn transition_if_not_previously_runs_once_per_history() {
    let c = controller();
    let runs = AtomicUsize::new(0);
    let step = || {
        c.transition_if_not_previously(Phase::Idle, Phase::Running, || {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    step().unwrap();
    step().unwrap();
    c.transition(Phase::Running, Phase::Done, || Ok(())).unwrap();
    step().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(c.current_state(), Phase::Done);
}

#[test]
fn maybe_transition_is_a_no_op_in_the_target_state() {
    let c = controller();
    c.maybe_transition(Phase::Idle, Phase::Running, || Ok(())).unwrap();
    c.maybe_transition(Phase::Idle, Phase::Running, || -> anyhow::Result<()> {
        anyhow::bail!("must not run")
    })
    .unwrap();
    assert_eq!(c.current_state(), Phase::Running);
}

#[test]
fn restart_clears_failure_and_history() {
    let c = controller();
    c.transition(Phase::Idle, Phase::Running, || Ok(())).unwrap();
    let _ = c.transition(Phase::Running, Phase::Done, || -> anyhow::Result<()> {
        anyhow::bail!("broken")
    });
    assert!(c.has_failed());

    c.restart(Phase::Running, Phase::Idle, || Ok(())).unwrap();
    assert!(!c.has_failed());
    assert_eq!(c.current_state(), Phase::Idle);
    assert!(c.assert_in_state_or_later(Phase::Running).is_err());
}

#[test]
fn try_in_state_records_result_failures() {
    let c = controller();
    let boom = Failure::msg("boom");
    let result = c.try_in_state(Phase::Idle, || ExecutionResult::failed(boom.clone()));
    assert_eq!(result.failures(), &[boom.clone()]);
    assert!(c.has_failed());

    let reported = c.finish(Phase::Done, |result| result).unwrap();
    assert_eq!(reported.failures(), &[boom]);
}

#[test]
fn panicking_action_becomes_the_terminal_failure() {
    let c = controller();
    let err = c
        .transition(Phase::Idle, Phase::Running, || -> anyhow::Result<()> { panic!("oops") })
        .unwrap_err();
    assert!(err.to_string().contains("oops"));
    assert!(c.has_failed());
    assert_eq!(c.current_state(), Phase::Idle);
}

#[test]
fn try_transition_reports_failures_in_the_result() {
    let c = controller();
    assert!(c.try_transition(Phase::Idle, Phase::Running, ExecutionResult::success).is_success());
    assert_eq!(c.current_state(), Phase::Running);

    let rejected = c.try_transition(Phase::Idle, Phase::Done, ExecutionResult::success);
    let failure = rejected.get_failure().expect("wrong state is reported");
    assert!(matches!(
        failure.downcast_ref::<ControllerError>(),
        Some(ControllerError::WrongState(_))
    ));
    assert!(!c.has_failed());

    let boom = Failure::msg("boom");
    let failed = c.try_transition(Phase::Running, Phase::Done, || ExecutionResult::failed(boom.clone()));
    assert_eq!(failed.failures(), &[boom.clone()]);
    assert_eq!(c.current_state(), Phase::Running);
    assert!(c.has_failed());
    match c.transition(Phase::Running, Phase::Done, || Ok(())) {
        Err(ControllerError::PreviousFailure { cause, .. }) => assert!(cause.same_as(&boom)),
        other => panic!("expected previous failure, got {other:?}"),
    }
}

#[test]
fn maybe_transition_if_not_currently_transitioning_skips_a_transition_in_progress() {
    let c = controller();
    let nested = AtomicUsize::new(0);
    c.transition(Phase::Idle, Phase::Running, || {
        c.maybe_transition_if_not_currently_transitioning(Phase::Idle, Phase::Running, || {
            nested.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        let err = c
            .maybe_transition(Phase::Idle, Phase::Running, || Ok(()))
            .unwrap_err();
        assert!(matches!(err, ControllerError::WrongState(_)));
        let err = c
            .maybe_transition_if_not_currently_transitioning(Phase::Idle, Phase::Done, || Ok(()))
            .unwrap_err();
        assert!(matches!(err, ControllerError::WrongState(_)));
        Ok(())
    })
    .unwrap();
    assert_eq!(nested.load(Ordering::SeqCst), 0);
    assert_eq!(c.current_state(), Phase::Running);

    c.maybe_transition_if_not_currently_transitioning(Phase::Idle, Phase::Running, || {
        anyhow::bail!("must not run")
    })
    .unwrap();
    c.maybe_transition_if_not_currently_transitioning(Phase::Running, Phase::Done, || Ok(()))
        .unwrap();
    assert_eq!(c.current_state(), Phase::Done);
}

#[test]
fn not_in_state_runs_outside_the_forbidden_state() {
    let c = controller();
    assert_eq!(c.not_in_state(Phase::Done, || Ok(3)).unwrap(), 3);

    let err = c
        .transition(Phase::Idle, Phase::Running, || {
            c.not_in_state(Phase::Done, || Ok(()))
                .map_err(anyhow::Error::from)
        })
        .unwrap_err();
    let failure = err.failure().cloned().expect("nested call failed the transition");
    assert!(
        failure.to_string().contains("and transitioning to Running"),
        "{failure}"
    );

    let c = controller();
    c.transition(Phase::Idle, Phase::Done, || Ok(())).unwrap();
    let err = c.not_in_state(Phase::Done, || Ok(())).unwrap_err();
    match err {
        ControllerError::WrongState(message) => {
            assert_eq!(message, "Test controller should not be in state Done.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn assert_not_in_state_checks_only_the_current_state() {
    let c = controller();
    c.assert_not_in_state(Phase::Running).unwrap();
    match c.assert_not_in_state(Phase::Idle) {
        Err(ControllerError::WrongState(message)) => {
            assert_eq!(message, "Test controller should not be in state Idle.");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let _ = c.transition(Phase::Idle, Phase::Running, || -> anyhow::Result<()> {
        anyhow::bail!("broken")
    });
    assert!(c.has_failed());
    c.assert_not_in_state(Phase::Done).unwrap();
}
