//! Daemon error taxonomy.
//!
//! Every failure surfaced over the bus maps onto one of these kinds; the
//! kind travels as a short string prefix in the error message. Signals
//! never carry errors.

use capy_apps::AppsError;
use capy_systemd::SystemdError;

#[derive(Debug, thiserror::Error)]
pub enum LaunchdError {
    #[error("invalid desktop entry: {0}")]
    InvalidDesktop(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is already present")]
    AlreadyPresent(String),

    #[error("command line is empty after expansion")]
    EmptyCommand,

    #[error("bad Exec line: {0}")]
    BadExec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("launch rejected: {0}")]
    LaunchRejected(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LaunchdError {
    /// Short error-kind string carried in bus replies.
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchdError::InvalidDesktop(_) => "InvalidDesktop",
            LaunchdError::NotFound(_) => "NotFound",
            LaunchdError::AlreadyPresent(_) => "AlreadyPresent",
            LaunchdError::EmptyCommand => "EmptyCommand",
            LaunchdError::BadExec(_) => "BadExec",
            LaunchdError::Io(_) => "IOError",
            LaunchdError::LaunchRejected(_) => "LaunchRejected",
            LaunchdError::PermissionDenied(_) => "PermissionDenied",
            LaunchdError::Internal(_) => "Internal",
        }
    }
}

impl From<AppsError> for LaunchdError {
    fn from(err: AppsError) -> Self {
        match err {
            AppsError::Invalid(msg) => LaunchdError::InvalidDesktop(msg),
            AppsError::AlreadyPresent(id) => LaunchdError::AlreadyPresent(id),
            AppsError::NotFound(id) => LaunchdError::NotFound(id),
            AppsError::Io(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                LaunchdError::PermissionDenied(err.to_string())
            }
            AppsError::Io(err) => LaunchdError::Io(err),
        }
    }
}

impl From<SystemdError> for LaunchdError {
    fn from(err: SystemdError) -> Self {
        LaunchdError::LaunchRejected(err.to_string())
    }
}

impl From<LaunchdError> for zbus::fdo::Error {
    fn from(err: LaunchdError) -> Self {
        zbus::fdo::Error::Failed(format!("{}: {err}", err.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_io_gets_its_own_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = LaunchdError::from(AppsError::Io(io));
        assert_eq!(err.kind(), "PermissionDenied");
    }

    #[test]
    fn kinds_are_short_strings() {
        assert_eq!(LaunchdError::EmptyCommand.kind(), "EmptyCommand");
        assert_eq!(
            LaunchdError::LaunchRejected("timeout".into()).kind(),
            "LaunchRejected"
        );
    }
}
