use std::cell::RefCell;

use buildtree::result::{ExecutionResult, Failure, MultipleBuildFailures};

#[test]
fn merging_deduplicates_by_identity_not_message() {
    let boom = Failure::msg("boom");
    let other_boom = Failure::msg("boom");

    let merged = ExecutionResult::<()>::failed(boom.clone())
        .with_failures(ExecutionResult::<()>::failed(boom.clone()))
        .with_failures(ExecutionResult::<()>::failed(other_boom.clone()));

    let failures = merged.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures[0].same_as(&boom));
    assert!(failures[1].same_as(&other_boom));
}

#[test]
fn success_merged_with_failure_becomes_that_failure() {
    let boom = Failure::msg("boom");
    let merged = ExecutionResult::succeeded(42).with_failures(ExecutionResult::<()>::failed(boom.clone()));
    assert!(!merged.is_success());
    assert_eq!(merged.failures(), &[boom]);
    assert!(ExecutionResult::succeeded(1).with_failures(ExecutionResult::success()).is_success());
}

#[test]
fn single_failure_is_rethrown_as_is() {
    let boom = Failure::msg("boom");
    let result = ExecutionResult::<()>::failed(boom.clone());
    let rethrown = result.rethrow().unwrap_err();
    assert!(rethrown.same_as(&boom));
}

#[test]
fn several_failures_are_rethrown_as_an_aggregate() {
    let result = ExecutionResult::maybe_failed(vec![Failure::msg("first"), Failure::msg("second")]);
    let failure = result.get_failure().expect("failed result");
    let aggregate = failure
        .downcast_ref::<MultipleBuildFailures>()
        .expect("aggregate failure");
    assert_eq!(aggregate.failures().len(), 2);
    let message = failure.to_string();
    assert!(message.starts_with("Build completed with 2 failures."), "{message}");
    assert!(message.contains("first"));
    assert!(message.contains("second"));
}

#[test]
fn for_each_visits_every_item_and_collects_failures_in_order() {
    let visited = RefCell::new(Vec::new());
    let result = ExecutionResult::for_each(1..=5, |i| {
        visited.borrow_mut().push(i);
        if i % 2 == 0 {
            anyhow::bail!("item {i} failed");
        }
        Ok(())
    });

    assert_eq!(visited.into_inner(), vec![1, 2, 3, 4, 5]);
    let messages: Vec<String> = result.failures().iter().map(|f| f.to_string()).collect();
    assert_eq!(messages, vec!["item 2 failed", "item 4 failed"]);
}

#[test]
fn maybe_failing_captures_panics() {
    let result = ExecutionResult::maybe_failing(|| panic!("kaboom"));
    let failure = result.get_failure().expect("panic becomes a failure");
    assert!(failure.to_string().contains("kaboom"));
}

#[test]
fn maybe_failing_keeps_an_existing_failure_record() {
    let boom = Failure::msg("boom");
    let carried = boom.clone();
    let result = ExecutionResult::maybe_failing(move || Err(anyhow::Error::new(carried)));
    assert!(result.failures()[0].same_as(&boom));
}

#[test]
fn value_is_returned_or_failure_rethrown() {
    assert_eq!(ExecutionResult::succeeded("v").get_value_or_rethrow().unwrap(), "v");
    let boom = Failure::msg("boom");
    let err = ExecutionResult::<&str>::failed(boom.clone())
        .get_value_or_rethrow()
        .unwrap_err();
    assert!(err.same_as(&boom));
    assert!(ExecutionResult::succeeded(2).map(|v| v * 2).get_value_or_rethrow().unwrap() == 4);
}

#[test]
fn failed_results_always_carry_a_failure() {
    assert!(ExecutionResult::maybe_failed(Vec::new()).is_success());
    assert!(ExecutionResult::for_each(Vec::<u8>::new(), |_| Ok(())).is_success());

    let boom = Failure::msg("boom");
    let merged = ExecutionResult::maybe_failed(vec![boom.clone(), boom.clone()]);
    match &merged {
        ExecutionResult::Failure(failures) => assert_eq!(failures.as_slice(), &[boom.clone()]),
        ExecutionResult::Success(_) => panic!("expected a failed result"),
    }
    let err = merged.get_value_or_rethrow().unwrap_err();
    assert!(err.same_as(&boom));
}
