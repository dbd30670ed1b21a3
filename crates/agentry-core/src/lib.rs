//! Core domain types and traits for the agentry step runner.
//!
//! This crate contains:
//! - Task identifiers and error types
//! - The process-execution command specification
//! - Execution context handed to steps
//! - Seams for expansions, log sinks and process managers

pub mod command;
pub mod context;
pub mod error;
pub mod expansion;
pub mod id;
pub mod log;
pub mod process;

pub use command::{CommandSpec, STEP_NAME};
pub use context::ExecutionContext;
pub use error::{Error, ExpansionFailure, Result};
pub use id::TaskId;
