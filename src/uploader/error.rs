use super::request::UploadId;
use super::state::UploadStatus;

/// Malformed input, rejected at submission before anything is registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("upload request has no destinations")]
    NoDestinations,

    #[error(transparent)]
    State(#[from] StateError),
}

/// An event the state machine refused to apply. The state is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("upload {0} was already requested")]
    Duplicate(UploadId),

    #[error("upload {0} is unknown")]
    Unknown(UploadId),

    #[error("cannot {event} upload {id} while it is {status}")]
    InvalidTransition {
        id: UploadId,
        event: &'static str,
        status: UploadStatus,
    },
}
