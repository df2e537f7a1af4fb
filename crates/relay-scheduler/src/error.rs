use relay_channels::ChannelError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store could not be reached or the blocking task died.
    #[error("Store unavailable: {0}")]
    Store(String),

    /// The job payload does not fit its job type. Never retried.
    #[error("{0}")]
    Validation(String),

    /// The channel rejected or could not take the message.
    #[error("{0}")]
    Dispatch(#[from] ChannelError),

    /// An in-progress job outlived its lease without being resolved.
    #[error("lease expired before resolution")]
    LeaseExpired,

    /// Processing a single job panicked; the tick carried on.
    #[error("job processing panicked: {0}")]
    Panicked(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },
}

impl SchedulerError {
    /// Permanent failures are archived regardless of the retry policy.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SchedulerError::Validation(_))
    }

    /// Message recorded on the job. A transport rejection keeps the
    /// channel's own wording.
    pub fn reason(&self) -> String {
        match self {
            SchedulerError::Dispatch(ChannelError::SendFailed(msg)) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_rejections_keep_the_channel_message() {
        let err = SchedulerError::Dispatch(ChannelError::SendFailed("number is not on whatsapp".into()));
        assert_eq!(err.reason(), "number is not on whatsapp");

        let err = SchedulerError::Dispatch(ChannelError::Timeout { ms: 500 });
        assert_eq!(err.reason(), "Operation timed out after 500ms");
        assert_eq!(SchedulerError::LeaseExpired.reason(), "lease expired before resolution");
    }
}
