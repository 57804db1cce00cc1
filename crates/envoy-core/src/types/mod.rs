//! Core type definitions for the envoy
//!
//! Agent kinds, process states and the instructions streamed from the
//! controller.

mod agent_types;
mod instruction_types;

pub use agent_types::*;
pub use instruction_types::*;
