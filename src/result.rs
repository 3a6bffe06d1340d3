// src/result.rs

//! Success/failure carrier used across controller boundaries.
//!
//! An [`ExecutionResult`] records that an operation completed, possibly with
//! one or more failures, without propagating them immediately. Callers merge
//! results from many operations (e.g. tearing down every build in a tree)
//! and rethrow once at a well-defined boundary.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::errors::{BuildError, ControllerError};

/// A single recorded failure.
///
/// Cheap to clone. Two `Failure`s are equal only when they are the *same*
/// record (identity, not contents), which is what failure de-duplication
/// relies on.
#[derive(Clone)]
pub struct Failure(Arc<anyhow::Error>);

impl Failure {
    pub fn new<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Failure(Arc::new(anyhow::Error::new(err)))
    }

    /// Failure with a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Failure(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }

    /// Whether `other` is the same failure record as `self`.
    pub fn same_as(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Failure describing a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Failure::msg(format!("action panicked: {message}"))
    }
}

/// Wraps an `anyhow::Error`, unwrapping it first if it already carries a
/// `Failure` so the original record (and its identity) is kept.
impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<Failure>() {
            Ok(failure) => return failure,
            Err(err) => err,
        };
        if let Some(ControllerError::Failed(failure)) = err.downcast_ref::<ControllerError>() {
            return failure.clone();
        }
        if let Some(carried) = err.downcast_ref::<BuildError>().and_then(carried_failure) {
            return carried;
        }
        Failure(Arc::new(err))
    }
}

fn carried_failure(err: &BuildError) -> Option<Failure> {
    match err {
        BuildError::Failed(failure) => Some(failure.clone()),
        BuildError::Controller(ControllerError::Failed(failure)) => Some(failure.clone()),
        _ => None,
    }
}

impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Failure {}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Aggregate used when more than one failure has to be reported at once.
#[derive(Error, Debug)]
pub struct MultipleBuildFailures {
    failures: Vec<Failure>,
}

impl MultipleBuildFailures {
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }
}

impl fmt::Display for MultipleBuildFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Build completed with {} failures.", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            write!(f, "\n  {}: {}", i + 1, failure)?;
        }
        Ok(())
    }
}

/// A non-empty, ordered list of failures with no record appearing twice.
///
/// Only built inside this module, so a failed result always carries at
/// least one failure.
#[derive(Debug, Clone)]
pub struct Failures(Vec<Failure>);

impl Failures {
    fn single(failure: Failure) -> Self {
        Failures(vec![failure])
    }

    fn from_merged(merged: Vec<Failure>) -> Option<Self> {
        if merged.is_empty() {
            None
        } else {
            Some(Failures(merged))
        }
    }

    fn merge(&mut self, others: Failures) {
        for failure in others.0 {
            push_unique(&mut self.0, failure);
        }
    }

    /// The single failure as-is, or several wrapped in a
    /// [`MultipleBuildFailures`].
    fn collapse(&self) -> Failure {
        match self.0.as_slice() {
            [single] => single.clone(),
            many => Failure::new(MultipleBuildFailures {
                failures: many.to_vec(),
            }),
        }
    }

    pub fn as_slice(&self) -> &[Failure] {
        &self.0
    }
}

/// Either a value, or a non-empty, ordered, de-duplicated list of failures.
#[derive(Debug, Clone)]
pub enum ExecutionResult<T> {
    Success(T),
    Failure(Failures),
}

impl ExecutionResult<()> {
    pub fn success() -> Self {
        ExecutionResult::Success(())
    }

    /// Success if `failures` is empty, otherwise a failure carrying them.
    pub fn maybe_failed<I>(failures: I) -> Self
    where
        I: IntoIterator<Item = Failure>,
    {
        let mut merged = Vec::new();
        for failure in failures {
            push_unique(&mut merged, failure);
        }
        match Failures::from_merged(merged) {
            Some(failures) => ExecutionResult::Failure(failures),
            None => ExecutionResult::Success(()),
        }
    }

    /// Run `action`, turning any error (or panic) into a failed result.
    pub fn maybe_failing<F>(action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        match catch_failure(action) {
            Ok(()) => ExecutionResult::Success(()),
            Err(failure) => ExecutionResult::Failure(Failures::single(failure)),
        }
    }

    /// Apply `action` to every item, even after some of them fail, and
    /// collect the failures in item order.
    pub fn for_each<I, F>(items: I, mut action: F) -> Self
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> anyhow::Result<()>,
    {
        let mut failures = Vec::new();
        for item in items {
            if let Err(failure) = catch_failure(|| action(item)) {
                push_unique(&mut failures, failure);
            }
        }
        Self::maybe_failed(failures)
    }
}

impl<T> ExecutionResult<T> {
    pub fn succeeded(value: T) -> Self {
        ExecutionResult::Success(value)
    }

    pub fn failed(failure: impl Into<Failure>) -> Self {
        ExecutionResult::Failure(Failures::single(failure.into()))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    pub fn failures(&self) -> &[Failure] {
        match self {
            ExecutionResult::Success(_) => &[],
            ExecutionResult::Failure(failures) => failures.as_slice(),
        }
    }

    /// Merge the failures of `other` into this result.
    ///
    /// Failure lists are combined in order with duplicates (by identity)
    /// removed. A success merged with a failure becomes that failure.
    pub fn with_failures<U>(self, other: ExecutionResult<U>) -> ExecutionResult<T> {
        match (self, other) {
            (this, ExecutionResult::Success(_)) => this,
            (ExecutionResult::Success(_), ExecutionResult::Failure(failures)) => {
                ExecutionResult::Failure(failures)
            }
            (ExecutionResult::Failure(mut failures), ExecutionResult::Failure(others)) => {
                failures.merge(others);
                ExecutionResult::Failure(failures)
            }
        }
    }

    /// A single failure is returned as-is; several are wrapped in a
    /// [`MultipleBuildFailures`].
    pub fn get_failure(&self) -> Option<Failure> {
        match self {
            ExecutionResult::Success(_) => None,
            ExecutionResult::Failure(failures) => Some(failures.collapse()),
        }
    }

    pub fn rethrow(&self) -> Result<(), Failure> {
        match self.get_failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    pub fn get_value_or_rethrow(self) -> Result<T, Failure> {
        match self {
            ExecutionResult::Success(value) => Ok(value),
            ExecutionResult::Failure(failures) => Err(failures.collapse()),
        }
    }

    /// Drop the value, keeping only the outcome.
    pub fn as_failure(&self) -> ExecutionResult<()> {
        match self {
            ExecutionResult::Success(_) => ExecutionResult::Success(()),
            ExecutionResult::Failure(failures) => ExecutionResult::Failure(failures.clone()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExecutionResult<U> {
        match self {
            ExecutionResult::Success(value) => ExecutionResult::Success(f(value)),
            ExecutionResult::Failure(failures) => ExecutionResult::Failure(failures),
        }
    }
}

fn push_unique(failures: &mut Vec<Failure>, failure: Failure) {
    if !failures.iter().any(|f| f.same_as(&failure)) {
        failures.push(failure);
    }
}

/// Run `action`, converting both returned errors and panics into a
/// [`Failure`].
pub(crate) fn catch_failure<S, F>(action: F) -> Result<S, Failure>
where
    F: FnOnce() -> anyhow::Result<S>,
{
    match panic::catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Failure::from(err)),
        Err(payload) => Err(Failure::from_panic(payload)),
    }
}
