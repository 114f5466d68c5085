#![allow(dead_code)]
//! Shared test utilities for integration tests.
//!
//! # Modules
//!
//! - `fixtures`: Class files built for the redirection scenarios
//! - `helpers`: Instruction inspection and stack simulation
//! - `assertions`: Assertion helpers with better failure messages

pub mod assertions;
pub mod fixtures;
pub mod helpers;

pub use assertions::{assert_borrowed, assert_error_contains, assert_ok, assert_owned};
pub use fixtures::*;
pub use helpers::{code_of, member_name, real_at, real_insns, simulate, Simulation};
