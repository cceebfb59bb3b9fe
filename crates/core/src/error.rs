use thiserror::Error;

/// Core error type shared across the presence crates.
///
/// Invariant violations (double-registering an adapter, using a socket
/// context after close) are deliberately NOT represented here: those are
/// programming errors and panic at the violation site.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("token rejected: {0}")]
    Token(String),

    #[error("link store error: {0}")]
    LinkStore(String),

    #[error("palette extraction failed: {0}")]
    Palette(String),

    #[error("adapter startup failed: {0}")]
    AdapterStartup(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("platform bridge error: {0}")]
    Platform(String),

    #[error("http error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
