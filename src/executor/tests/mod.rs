//! Tests for the executor
//!
//! Organized by feature area

mod basic_tests;
mod control_flow_tests;
mod helpers;
