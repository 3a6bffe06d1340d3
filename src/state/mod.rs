// src/state/mod.rs

//! Generic guarded state machines.

pub mod controller;

pub use controller::{OwnershipLease, State, StateTransitionController};
