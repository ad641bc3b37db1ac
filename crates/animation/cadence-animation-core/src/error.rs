//! Error types for animation definitions, managers and persisted converters

use cadence_message::WireError;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum AnimationError {
    /// No attached instance carries this name
    #[error("Animation instance not found: {name}")]
    InstanceNotFound { name: String },

    /// Name missing from the animation library
    #[error("Unknown animation: {name}")]
    UnknownAnimation { name: String },

    #[error("Unknown channel: {name}")]
    UnknownChannel { name: String },

    #[error("Too many channels: {count} (limit: {max})")]
    TooManyChannels { count: usize, max: usize },

    /// Definition failed validation or did not parse
    #[error("Invalid animation definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl AnimationError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            reason: reason.into(),
        }
    }

    /// Get error category for logging/metrics
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InstanceNotFound { .. } | Self::UnknownAnimation { .. } => "data",
            Self::UnknownChannel { .. } | Self::TooManyChannels { .. } => "channel",
            Self::InvalidDefinition { .. } => "validation",
            Self::Wire(e) => e.category(),
        }
    }
}

impl From<std::io::Error> for AnimationError {
    fn from(err: std::io::Error) -> Self {
        Self::Wire(WireError::Io(err))
    }
}

impl From<serde_json::Error> for AnimationError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDefinition {
            reason: err.to_string(),
        }
    }
}

pub type AnimationResult<T> = Result<T, AnimationError>;
