//! Execution phase enums for statement types
//!
//! A phase records which execution step a frame is currently at, so a
//! statement can be resumed after its frame was left on the stack.

/// Phase for statements that evaluate one expression and finish
/// (expression statements, assignment, return, yield, throw, del)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalPhase {
    Eval,
}

/// Execution phase for Block statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPhase {
    Execute,
}

/// Execution phase for If statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfPhase {
    /// Evaluate the test and push the chosen branch
    Eval,
    /// The branch has been pushed; pop once it completes
    Branch,
}

/// Execution phase for While statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhilePhase {
    /// Evaluate the test before every iteration
    Eval,
}

/// Execution phase for For statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForPhase {
    /// Evaluate the iterable into the frame's item list
    Init,
    /// Bind the next item and push the body
    Iterate,
}

/// Execution phase for Try statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPhase {
    /// Push the try body
    Start,
    /// Executing the try block
    ExecuteTry,
    /// Executing the catch block (error was caught)
    ExecuteCatch,
}
