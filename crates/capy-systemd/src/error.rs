//! Error types for capy-systemd

/// Service-manager client errors
#[derive(Debug, thiserror::Error)]
pub enum SystemdError {
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),

    #[error("D-Bus fdo error: {0}")]
    Fdo(#[from] zbus::fdo::Error),

    #[error("service manager call timed out")]
    Timeout,

    #[error("invalid transient unit: {0}")]
    InvalidUnit(String),
}
