//! Sans-I/O state machines for the PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! They produce `Action` values that tell the caller what to do next.

pub mod action;
pub mod startup;

pub use action::Action;
pub use startup::{BackendKey, StartupState, StartupStateMachine};
