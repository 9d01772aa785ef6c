pub mod cli;
pub mod codeblock;
pub mod compiler;
pub mod config;
pub mod display;
pub mod execution;
pub mod executor;
pub mod inspect;
pub mod live_view;
pub mod pager;
pub mod parser;
pub mod scope;
pub mod session;
pub mod shell;
pub mod tasks;
pub mod timing;

// Re-export the main entry points
pub use compiler::{compile, CompileError, CompiledUnit};
pub use display::{DisplayTarget, MessageId, PlatformLimits, StatusMarker, UserId};
pub use execution::{Execution, ExecutionOptions, Produced};
pub use executor::{RuntimeError, Val};
pub use live_view::{LiveView, LiveViewHandle, LiveViewOptions};
pub use pager::{Paginator, RenderedPage};
pub use scope::{Scope, ScopeSlot};
pub use session::{InvocationContext, ReplSession, TimeitReport};
