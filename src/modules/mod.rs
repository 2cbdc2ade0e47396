pub mod abstraction;
pub mod cli;
pub mod completeness;
pub mod config;
pub mod determinism;
pub mod effects;
pub mod eval;
pub mod expr;
pub mod format;
pub mod loader;
pub mod op;
pub mod smt;
pub mod solvers;
pub mod state;
pub mod types;
