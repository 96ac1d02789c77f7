//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: input structs and view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `sheetsync::db`; we re-export the
//! repository API and commonly used models for convenience.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{FormRecord, NewForm, NewSubmission};
