use thiserror::Error;

use cadence_animation::AnimationError;
use cadence_responder::ResponderError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("record '{record}' has no field '{field}'")]
    MissingField { record: String, field: String },

    #[error("field '{field}' is not a {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("field '{field}' out of range: {reason}")]
    OutOfRange { field: String, reason: String },

    #[error(transparent)]
    Animation(#[from] AnimationError),

    #[error(transparent)]
    Responder(#[from] ResponderError),

    #[error("record json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn out_of_range(field: &str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            SyncError::MissingField { .. } | SyncError::WrongType { .. } => "schema",
            SyncError::OutOfRange { .. } => "range",
            SyncError::Animation(e) => e.category(),
            SyncError::Responder(e) => e.category(),
            SyncError::Json(_) => "parse",
        }
    }
}
