// src/state/controller.rs

//! Guarded state machine with fail-fast single ownership.
//!
//! Every guarded operation first takes an [`OwnershipLease`]. A lease is
//! reentrant for the thread holding it; any other thread trying to take it
//! fails immediately with [`ControllerError::ConcurrentTransition`] rather
//! than waiting. Actions run with the lease held but without the internal
//! mutex, so an action may call back into the same controller.
//!
//! Once an action fails, the failure is kept as the controller's terminal
//! failure and every later operation fails with
//! [`ControllerError::PreviousFailure`], until [`finish`] or [`restart`]
//! consumes it.
//!
//! [`finish`]: StateTransitionController::finish
//! [`restart`]: StateTransitionController::restart

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::ControllerError;
use crate::result::{ExecutionResult, Failure, catch_failure};

/// A closed, caller-defined set of named states.
pub trait State: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

#[derive(Debug)]
struct CurrentState<T> {
    state: T,
    /// Every state ever reached since construction (or the last restart).
    achieved: HashSet<T>,
    /// Target of the transition in progress, if any.
    target: Option<T>,
    failure: Option<ExecutionResult<()>>,
    owner: Option<ThreadId>,
    depth: usize,
}

impl<T: State> CurrentState<T> {
    fn new(initial: T) -> Self {
        Self {
            state: initial,
            achieved: HashSet::from([initial]),
            target: None,
            failure: None,
            owner: None,
            depth: 0,
        }
    }

    fn record_failure(&mut self, failure: ExecutionResult<()>) {
        self.failure = Some(match self.failure.take() {
            Some(previous) => previous.with_failures(failure),
            None => failure,
        });
    }
}

/// Proof that the current thread owns a controller.
///
/// Dropping the lease releases one level of ownership. A lease stays on the
/// thread that took it:
///
/// ```compile_fail
/// use buildtree::state::{State, StateTransitionController};
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Phase {
///     Idle,
/// }
/// impl State for Phase {}
///
/// let controller = StateTransitionController::new("controller", Phase::Idle);
/// std::thread::scope(|scope| {
///     let lease = controller.acquire().unwrap();
///     scope.spawn(move || drop(lease));
/// });
/// ```
pub struct OwnershipLease<'a, T: State> {
    controller: &'a StateTransitionController<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T: State> Drop for OwnershipLease<'_, T> {
    fn drop(&mut self) {
        let mut current = self.controller.current.lock();
        current.depth = current.depth.saturating_sub(1);
        if current.depth == 0 {
            current.owner = None;
        }
    }
}

pub struct StateTransitionController<T: State> {
    display_name: String,
    current: Mutex<CurrentState<T>>,
}

impl<T: State> fmt::Debug for StateTransitionController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.lock();
        f.debug_struct("StateTransitionController")
            .field("display_name", &self.display_name)
            .field("state", &current.state)
            .field("target", &current.target)
            .field("failed", &current.failure.is_some())
            .finish()
    }
}

impl<T: State> StateTransitionController<T> {
    pub fn new(display_name: impl Into<String>, initial: T) -> Self {
        Self {
            display_name: display_name.into(),
            current: Mutex::new(CurrentState::new(initial)),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Snapshot of the current state. Ignores transitions in progress.
    pub fn current_state(&self) -> T {
        self.current.lock().state
    }

    pub fn has_failed(&self) -> bool {
        self.current.lock().failure.is_some()
    }

    /// Take ownership of this controller for the current thread.
    pub fn acquire(&self) -> Result<OwnershipLease<'_, T>, ControllerError> {
        let me = thread::current().id();
        let mut current = self.current.lock();
        match current.owner {
            Some(owner) if owner != me => {
                return Err(ControllerError::ConcurrentTransition(format!(
                    "Another thread is currently transitioning {}.",
                    self.display_name
                )));
            }
            _ => {
                current.owner = Some(me);
                current.depth += 1;
            }
        }
        Ok(OwnershipLease {
            controller: self,
            _not_send: PhantomData,
        })
    }

    /// Verifies the current state is `expected`.
    ///
    /// Ignores transitions in progress and failures, and gives no guarantee
    /// about the code that follows the call.
    pub fn assert_in_state(&self, expected: T) -> Result<(), ControllerError> {
        let state = self.current_state();
        if state != expected {
            return Err(self.wrong_state(format!(
                "Expected {} to be in state {:?} but is in state {:?}.",
                self.display_name, expected, state
            )));
        }
        Ok(())
    }

    /// Verifies the current state is not `forbidden`. Same caveats as
    /// [`assert_in_state`](Self::assert_in_state).
    pub fn assert_not_in_state(&self, forbidden: T) -> Result<(), ControllerError> {
        if self.current_state() == forbidden {
            return Err(self.wrong_state(format!(
                "{} should not be in state {:?}.",
                self.capitalized_name(),
                forbidden
            )));
        }
        Ok(())
    }

    /// Verifies `expected` has been reached at some point.
    pub fn assert_in_state_or_later(&self, expected: T) -> Result<(), ControllerError> {
        if !self.current.lock().achieved.contains(&expected) {
            return Err(self.wrong_state(format!(
                "{} should be in state {:?} or later.",
                self.capitalized_name(),
                expected
            )));
        }
        Ok(())
    }

    /// Run `supplier` while not in `forbidden`, without taking ownership.
    ///
    /// Other threads may transition the controller while `supplier` runs.
    /// Fails when the controller has failed, is in `forbidden`, or is
    /// transitioning to it. A failure of `supplier` becomes the terminal
    /// failure.
    pub fn not_in_state_ignore_other_threads<S, F>(
        &self,
        forbidden: T,
        supplier: F,
    ) -> Result<S, ControllerError>
    where
        F: FnOnce() -> anyhow::Result<S>,
    {
        {
            let current = self.current.lock();
            self.check_not_failed(&current)?;
            if current.state == forbidden || current.target == Some(forbidden) {
                return Err(self.wrong_state(format!(
                    "{} should not be in state {:?}.",
                    self.capitalized_name(),
                    forbidden
                )));
            }
        }
        catch_failure(supplier).map_err(|failure| self.fail(failure))
    }

    /// Run `action` in state `expected`.
    pub fn in_state<S, F>(&self, expected: T, action: F) -> Result<S, ControllerError>
    where
        F: FnOnce() -> anyhow::Result<S>,
    {
        let _lease = self.acquire()?;
        self.check_in_state(expected)?;
        catch_failure(action).map_err(|failure| self.fail(failure))
    }

    /// Like [`in_state`](Self::in_state), returning failures in the result
    /// instead of as an error. Usage errors are folded into the result too,
    /// but only action failures are recorded on the controller.
    pub fn try_in_state<F>(&self, expected: T, action: F) -> ExecutionResult<()>
    where
        F: FnOnce() -> ExecutionResult<()>,
    {
        let _lease = match self.acquire() {
            Ok(lease) => lease,
            Err(err) => return ExecutionResult::failed(err),
        };
        if let Err(err) = self.check_in_state(expected) {
            return ExecutionResult::failed(err);
        }
        let result = run_result_action(action);
        if !result.is_success() {
            self.current.lock().record_failure(result.as_failure());
        }
        result
    }

    /// Run `action` in any state other than `forbidden`.
    pub fn not_in_state<S, F>(&self, forbidden: T, action: F) -> Result<S, ControllerError>
    where
        F: FnOnce() -> anyhow::Result<S>,
    {
        let _lease = self.acquire()?;
        {
            let current = self.current.lock();
            self.check_not_failed(&current)?;
            if let Some(target) = current.target {
                return Err(self.wrong_state(format!(
                    "{} should not be in state {:?} but is in state {:?} and transitioning to {:?}.",
                    self.capitalized_name(),
                    forbidden,
                    current.state,
                    target
                )));
            }
            if current.state == forbidden {
                return Err(self.wrong_state(format!(
                    "{} should not be in state {:?}.",
                    self.capitalized_name(),
                    forbidden
                )));
            }
        }
        catch_failure(action).map_err(|failure| self.fail(failure))
    }

    /// Transition from `from` to `to`, running `action` in between.
    pub fn transition<S, F>(&self, from: T, to: T, action: F) -> Result<S, ControllerError>
    where
        F: FnOnce() -> anyhow::Result<S>,
    {
        let _lease = self.acquire()?;
        self.do_transition(from, to, action)
    }

    /// Transition from `from` to `to`, returning the action's failures
    /// instead of an error. Usage errors are folded into the result.
    pub fn try_transition<F>(&self, from: T, to: T, action: F) -> ExecutionResult<()>
    where
        F: FnOnce() -> ExecutionResult<()>,
    {
        let _lease = match self.acquire() {
            Ok(lease) => lease,
            Err(err) => return ExecutionResult::failed(err),
        };
        if let Err(err) = self.begin_transition(&[from], to) {
            return ExecutionResult::failed(err);
        }
        let result = run_result_action(action);
        self.end_transition(to, result.as_failure());
        result
    }

    /// Transition unless already in `to`.
    pub fn maybe_transition<F>(&self, from: T, to: T, action: F) -> Result<(), ControllerError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let _lease = self.acquire()?;
        {
            let current = self.current.lock();
            self.check_not_failed(&current)?;
            if let Some(target) = current.target {
                return Err(self.transitioning_error(to, current.state, target, false));
            }
            if current.state == to {
                return Ok(());
            }
        }
        self.do_transition(from, to, action)
    }

    /// Transition unless already in `to` or already transitioning to it.
    pub fn maybe_transition_if_not_currently_transitioning<F>(
        &self,
        from: T,
        to: T,
        action: F,
    ) -> Result<(), ControllerError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let _lease = self.acquire()?;
        {
            let current = self.current.lock();
            self.check_not_failed(&current)?;
            match current.target {
                Some(target) if target == to => return Ok(()),
                Some(target) => {
                    return Err(self.transitioning_error(to, current.state, target, false));
                }
                None if current.state == to => return Ok(()),
                None => {}
            }
        }
        self.do_transition(from, to, action)
    }

    /// Transition unless `to` has been reached at any point in the past.
    pub fn transition_if_not_previously<F>(
        &self,
        from: T,
        to: T,
        action: F,
    ) -> Result<(), ControllerError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let _lease = self.acquire()?;
        {
            let current = self.current.lock();
            self.check_not_failed(&current)?;
            if let Some(target) = current.target {
                return Err(self.transitioning_error(to, current.state, target, true));
            }
            if current.achieved.contains(&to) {
                return Ok(());
            }
        }
        self.do_transition(from, to, action)
    }

    /// Reset to `to` from `from`, ignoring any previous failure.
    ///
    /// The history of reached states is reset to just `to`. A failure of
    /// `action` is returned but not recorded, and the state is unchanged.
    pub fn restart<F>(&self, from: T, to: T, action: F) -> Result<(), ControllerError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let _lease = self.acquire()?;
        {
            let current = self.current.lock();
            self.check_can_transition(&current, &[from], to)?;
        }
        catch_failure(action).map_err(ControllerError::Failed)?;
        let mut current = self.current.lock();
        debug!(controller = %self.display_name, state = ?to, "restarted");
        current.state = to;
        current.achieved = HashSet::from([to]);
        current.failure = None;
        Ok(())
    }

    /// Terminal transition to `to`.
    ///
    /// Always lands in `to` and clears any recorded failure. `transform`
    /// receives the recorded failure (or a success) and produces the final
    /// result. When already in `to` with nothing recorded, returns success
    /// without running `transform`.
    pub fn finish<F>(&self, to: T, transform: F) -> Result<ExecutionResult<()>, ControllerError>
    where
        F: FnOnce(ExecutionResult<()>) -> ExecutionResult<()>,
    {
        self.do_finish(None, to, transform)
    }

    /// Like [`finish`](Self::finish), only allowed from one of `from_states`.
    pub fn finish_from<F>(
        &self,
        from_states: &[T],
        to: T,
        transform: F,
    ) -> Result<ExecutionResult<()>, ControllerError>
    where
        F: FnOnce(ExecutionResult<()>) -> ExecutionResult<()>,
    {
        self.do_finish(Some(from_states), to, transform)
    }

    fn do_finish<F>(
        &self,
        from_states: Option<&[T]>,
        to: T,
        transform: F,
    ) -> Result<ExecutionResult<()>, ControllerError>
    where
        F: FnOnce(ExecutionResult<()>) -> ExecutionResult<()>,
    {
        let _lease = self.acquire()?;
        let previous = {
            let mut current = self.current.lock();
            if let Some(target) = current.target {
                return Err(self.transitioning_error(to, current.state, target, false));
            }
            if current.state == to && current.failure.is_none() {
                return Ok(ExecutionResult::success());
            }
            if let Some(from_states) = from_states {
                self.check_can_transition(&current, from_states, to)?;
            }
            current.target = Some(to);
            current.failure.take().unwrap_or_else(ExecutionResult::success)
        };

        debug!(controller = %self.display_name, state = ?to, "finishing");
        let result = match catch_failure(|| Ok(transform(previous))) {
            Ok(result) => result,
            Err(failure) => ExecutionResult::failed(failure),
        };

        let mut current = self.current.lock();
        current.target = None;
        current.state = to;
        current.achieved.insert(to);
        current.failure = None;
        Ok(result)
    }

    fn do_transition<S, F>(&self, from: T, to: T, action: F) -> Result<S, ControllerError>
    where
        F: FnOnce() -> anyhow::Result<S>,
    {
        self.begin_transition(&[from], to)?;
        match catch_failure(action) {
            Ok(value) => {
                self.end_transition(to, ExecutionResult::success());
                Ok(value)
            }
            Err(failure) => {
                self.end_transition(to, ExecutionResult::failed(failure.clone()));
                Err(ControllerError::Failed(failure))
            }
        }
    }

    fn begin_transition(&self, from_states: &[T], to: T) -> Result<(), ControllerError> {
        let mut current = self.current.lock();
        self.check_not_failed(&current)?;
        self.check_can_transition(&current, from_states, to)?;
        debug!(
            controller = %self.display_name,
            from = ?current.state,
            to = ?to,
            "transitioning"
        );
        current.target = Some(to);
        Ok(())
    }

    fn end_transition(&self, to: T, outcome: ExecutionResult<()>) {
        let mut current = self.current.lock();
        current.target = None;
        if outcome.is_success() {
            current.state = to;
            current.achieved.insert(to);
        } else {
            warn!(controller = %self.display_name, to = ?to, "transition failed");
            current.record_failure(outcome);
        }
    }

    fn check_in_state(&self, expected: T) -> Result<(), ControllerError> {
        let current = self.current.lock();
        self.check_not_failed(&current)?;
        if let Some(target) = current.target {
            return Err(self.wrong_state(format!(
                "Expected {} to be in state {:?} but is in state {:?} and transitioning to {:?}.",
                self.display_name, expected, current.state, target
            )));
        }
        if current.state != expected {
            return Err(self.wrong_state(format!(
                "Expected {} to be in state {:?} but is in state {:?}.",
                self.display_name, expected, current.state
            )));
        }
        Ok(())
    }

    fn check_can_transition(
        &self,
        current: &CurrentState<T>,
        from_states: &[T],
        to: T,
    ) -> Result<(), ControllerError> {
        if let Some(target) = current.target {
            let message = if target == to {
                format!(
                    "Cannot transition {} to state {:?} as already transitioning to this state.",
                    self.display_name, to
                )
            } else {
                format!(
                    "Cannot transition {} to state {:?} as already transitioning to state {:?}.",
                    self.display_name, to, target
                )
            };
            return Err(self.wrong_state(message));
        }
        if !from_states.contains(&current.state) {
            let from = match from_states {
                [single] => format!("state {single:?}"),
                many => format!("states {many:?}"),
            };
            return Err(self.wrong_state(format!(
                "Can only transition {} to state {:?} from {} however it is currently in state {:?}.",
                self.capitalized_name(),
                to,
                from,
                current.state
            )));
        }
        Ok(())
    }

    fn check_not_failed(&self, current: &CurrentState<T>) -> Result<(), ControllerError> {
        match current.failure.as_ref().and_then(ExecutionResult::get_failure) {
            Some(cause) => Err(ControllerError::PreviousFailure {
                display_name: self.display_name.clone(),
                cause,
            }),
            None => Ok(()),
        }
    }

    fn transitioning_error(&self, to: T, state: T, target: T, or_later: bool) -> ControllerError {
        let later = if or_later { " or later" } else { "" };
        self.wrong_state(format!(
            "Expected {} to be in state {:?}{} but is in state {:?} and transitioning to {:?}.",
            self.display_name, to, later, state, target
        ))
    }

    fn fail(&self, failure: Failure) -> ControllerError {
        self.current
            .lock()
            .record_failure(ExecutionResult::failed(failure.clone()));
        ControllerError::Failed(failure)
    }

    fn wrong_state(&self, message: String) -> ControllerError {
        ControllerError::WrongState(message)
    }

    fn capitalized_name(&self) -> String {
        let mut chars = self.display_name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

fn run_result_action<F>(action: F) -> ExecutionResult<()>
where
    F: FnOnce() -> ExecutionResult<()>,
{
    match catch_failure(|| Ok(action())) {
        Ok(result) => result,
        Err(failure) => ExecutionResult::failed(failure),
    }
}
