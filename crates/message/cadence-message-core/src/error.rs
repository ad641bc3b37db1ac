//! Error type for the binary message codec

/// Failure while decoding a persisted message stream.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum WireError {
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    /// A discriminant byte that names no known variant
    #[error("unknown {kind} tag {tag}")]
    UnknownTag { kind: &'static str, tag: u32 },

    /// A length prefix larger than the decoder accepts
    #[error("{what} count {count} exceeds {max}")]
    CountOutOfRange {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },
}

impl WireError {
    /// Get error category for logging/metrics
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::UnknownTag { .. } | Self::CountOutOfRange { .. } => "malformed",
            Self::InvalidValue { .. } => "validation",
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        let e = WireError::UnknownTag {
            kind: "body",
            tag: 99,
        };
        assert_eq!(e.category(), "malformed");
        assert_eq!(e.to_string(), "unknown body tag 99");
        let io: WireError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert_eq!(io.category(), "io");
    }
}
