//! Error types for capy-apps

/// Catalog and desktop-entry errors
#[derive(Debug, thiserror::Error)]
pub enum AppsError {
    #[error("invalid desktop entry: {0}")]
    Invalid(String),

    #[error("application {0} is already present")]
    AlreadyPresent(String),

    #[error("application {0} not found")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
