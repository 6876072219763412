//! Frontdesk API Library
//!
//! Realtime support chat and notifications for the hotel back office.

pub mod assistant;
pub mod auth;
pub mod config;
pub mod error;
pub mod notifications;
pub mod realtime;
pub mod routes;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
