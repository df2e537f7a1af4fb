use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    /// The outbound channel cannot take work right now.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid job payload: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "CONFIG_ERROR",
            RelayError::Unauthorized(_) => "UNAUTHORIZED",
            RelayError::Database(_) => "DATABASE_ERROR",
            RelayError::Channel { .. } => "CHANNEL_ERROR",
            RelayError::Unavailable(_) => "UNAVAILABLE",
            RelayError::Validation(_) => "VALIDATION_ERROR",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
