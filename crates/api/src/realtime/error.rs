//! Failure taxonomy of the chat core

use frontdesk_shared::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Missing, invalid or expired credentials
    #[error("Authentication failed")]
    Authentication,

    #[error("Access denied: {0}")]
    AccessDenied(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Close on a closed conversation, reopen on an active one
    #[error("{0}")]
    InvalidTransition(&'static str),

    #[error("Dependency failure: {0}")]
    Dependency(#[from] StoreError),
}

impl ChatError {
    /// Text safe to show an end user. Infrastructure details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Authentication => "Invalid or expired token".to_string(),
            Self::AccessDenied(what) => format!("Access denied: {}", what),
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(what) => format!("{} not found", what),
            Self::InvalidTransition(msg) => (*msg).to_string(),
            Self::Dependency(_) => "Something went wrong, please try again".to_string(),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
