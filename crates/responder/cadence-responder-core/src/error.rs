use thiserror::Error;

use cadence_message::WireError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResponderError {
    #[error("state index {state} out of range ({count} states)")]
    StateOutOfRange { state: i64, count: usize },

    #[error("command index {command} out of range ({count} commands)")]
    CommandOutOfRange { command: i64, count: usize },

    #[error("wait index {wait} out of range (max {max})")]
    WaitOutOfRange { wait: i64, max: usize },

    #[error("invalid responder definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error(transparent)]
    Wire(#[from] WireError),
}

pub type ResponderResult<T> = Result<T, ResponderError>;

impl ResponderError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ResponderError::StateOutOfRange { .. }
            | ResponderError::CommandOutOfRange { .. }
            | ResponderError::WaitOutOfRange { .. } => "range",
            ResponderError::InvalidDefinition { .. } => "validation",
            ResponderError::Wire(e) => e.category(),
        }
    }
}

impl From<std::io::Error> for ResponderError {
    fn from(e: std::io::Error) -> Self {
        ResponderError::Wire(WireError::Io(e))
    }
}

impl From<serde_json::Error> for ResponderError {
    fn from(e: serde_json::Error) -> Self {
        ResponderError::invalid(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        let e = ResponderError::StateOutOfRange { state: 9, count: 2 };
        assert_eq!(e.category(), "range");
        assert_eq!(e.to_string(), "state index 9 out of range (2 states)");
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(ResponderError::from(io).category(), "io");
    }
}
