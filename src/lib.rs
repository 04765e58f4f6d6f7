//! NATS-driven remote code-judging runner.
//!
//! Accepts submissions (source code, test cases, resource limits) from a
//! queue-group subscription, compiles when the language requires it, runs
//! the program once per test case inside a sandbox backend, and publishes a
//! verdict per test case.

pub mod checker;
pub mod config;
pub mod models;
pub mod nats;
pub mod runner;
pub mod sandbox;
pub mod worker;
