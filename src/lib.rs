//! Kelpie: a constraint-driven symbolic interpreter for a procedural
//! intermediate verification language.
//!
//! Given a program and an entry procedure, the engine explores
//! executions, collecting logical constraints along each path; an
//! external solver concretizes the unknowns so every execution ends as a
//! concrete passing run, a concrete failing run with witness values, or
//! an infeasible path. Procedures without bodies execute declaratively,
//! purely by constraint solving against their contracts.

pub mod api;
pub mod diagnostic;
pub mod engine;
pub mod report;
pub mod solver;
pub mod syntax;

pub use api::{execute_program, prepare_source, run_session, SessionOptions, TestCase, Verdict};
pub use syntax::parse_source;
