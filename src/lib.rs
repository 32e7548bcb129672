//! Pay Structure Resolution & Payroll Calculation Engine
//!
//! This crate resolves which versioned pay structure template and which
//! worker overrides apply to an employee on a date, evaluates the resulting
//! earnings, taxes and deductions in dependency order, and aggregates them
//! into a paycheck with a full audit trace. Payroll runs compute many
//! employees concurrently and commit annual usage counters atomically.

#![warn(missing_docs)]

pub mod api;
pub mod calculation;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod run;
pub mod store;
