use thiserror::Error;

/// Failures surfaced by the session coordinator's public operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a session is already active for this user; force-clear it first")]
    AlreadyActive,

    #[error("no active session")]
    NoActiveSession,

    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("persistence unavailable: {0:#}")]
    PersistenceUnavailable(#[source] anyhow::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
