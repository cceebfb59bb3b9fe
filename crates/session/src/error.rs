use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid or unknown token")]
    InvalidToken,

    #[error("First-party tokens cannot open sessions")]
    FirstPartyToken,

    #[error("First-party token required")]
    FirstPartyRequired,

    #[error("Unknown or expired session")]
    UnknownSession,

    #[error("Token validation failed: {0}")]
    Validation(#[from] presenti_core::CoreError),
}
