use thiserror::Error;

/// Closed error taxonomy for the client. Kinds, not exception hierarchies —
/// every component maps its own failures into one of these before it crosses
/// a component boundary (Sync Engine, Auth, Log Shipper).
#[derive(Debug, Error)]
pub enum TomatoError {
    #[error("Please provide a hostname.")]
    NoHostname,

    #[error("Please provide a username and password.")]
    NoCredentials,

    #[error("Request timed out.")]
    RequestsTimeout,

    #[error("Bad response from host.")]
    RequestsError,

    #[error("Access denied.")]
    AccessDenied,

    #[error("Bad response from host (status {status}).")]
    InvalidHttpStatus { status: u16 },

    #[error("Invalid response format from host.")]
    JsonDecodeError,

    #[error("Server database migration '{latest}' is not recognized by this client.")]
    DbMigrationMismatch { latest: String },

    #[error("Local store is unavailable.")]
    StoreUnavailable,

    #[error("Disk is full.")]
    DiskFull,

    #[error("Could not decode audio: {reason}")]
    AudioDecodeError { reason: String },

    #[error("An unexpected error occurred.")]
    Unexpected(String),
}

impl From<reqwest::Error> for TomatoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TomatoError::RequestsTimeout
        } else if let Some(status) = err.status() {
            if status.as_u16() == 403 {
                TomatoError::AccessDenied
            } else {
                TomatoError::InvalidHttpStatus {
                    status: status.as_u16(),
                }
            }
        } else if err.is_decode() {
            TomatoError::JsonDecodeError
        } else {
            TomatoError::RequestsError
        }
    }
}

impl From<sqlx::Error> for TomatoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) if io_err.raw_os_error() == Some(28) => TomatoError::DiskFull,
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => TomatoError::StoreUnavailable,
            other => TomatoError::Unexpected(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TomatoError {
    fn from(err: std::io::Error) -> Self {
        if err.raw_os_error() == Some(28) {
            TomatoError::DiskFull
        } else {
            TomatoError::Unexpected(err.to_string())
        }
    }
}

pub type TomatoResult<T> = Result<T, TomatoError>;
