//! Agent process supervision
//!
//! [`AgentRunningContext`] tracks one launch of an agent executable.
//! [`CommandHandler`] starts it, forwards its output, stops it and watches
//! for crashes.

mod context;
mod handler;
mod output;

pub use context::AgentRunningContext;
pub use handler::{CommandHandler, StandardCommandHandler};
pub use output::{OutputSink, TracingOutputSink};

#[cfg(test)]
pub use handler::MockCommandHandler;
