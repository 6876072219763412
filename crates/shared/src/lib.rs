//! Frontdesk shared types and utilities
//!
//! Domain types, storage errors and database plumbing shared across the workspace.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
