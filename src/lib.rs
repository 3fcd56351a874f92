//! Strata - Build Plan Compiler
//!
//! Compiles a declarative build plan into a directed graph of filesystem and
//! environment operations that a low-level build backend can materialize
//! into container image layers. Strata decides nothing about *what* to
//! build; it deterministically turns an already-resolved plan into one
//! executable state description.

pub mod compile;
pub mod error;
pub mod graph;
pub mod plan;
pub mod platform;
pub mod state;

pub use compile::{BuildGraph, CacheStore, CompileOutput};
pub use error::{StrataError, StrataResult};
pub use plan::BuildPlan;
pub use platform::Platform;
pub use state::ExecState;
