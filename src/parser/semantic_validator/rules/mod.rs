//! Validation Rules
//!
//! Each file in this module contains one validation rule:
//!
//! - `nested_await.rs` - Await expressions nested inside other expressions
//! - `loop_control.rs` - `break`/`continue` outside of a loop
//! - `undefined_variable.rs` - Names read before anything binds them

mod loop_control;
mod nested_await;
mod undefined_variable;

pub use loop_control::LoopControlRule;
pub use nested_await::NestedAwaitRule;
pub use undefined_variable::UndefinedVariableRule;
