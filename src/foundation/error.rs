pub type ReelResult<T> = Result<T, ReelError>;

#[derive(thiserror::Error, Debug)]
pub enum ReelError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("truncated log: expected {expected} frame(s), read {read}{}", last_good(.read))]
    TruncatedLog { expected: u64, read: u64 },

    #[error("malformed frame {index}: {message}")]
    MalformedFrame { index: u64, message: String },

    #[error("encoding failure: {0}")]
    Encoding(String),

    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn last_good(read: &u64) -> String {
    match read.checked_sub(1) {
        Some(last) => format!(" (last good frame index {last})"),
        None => " (no frame was read)".to_string(),
    }
}

impl ReelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_bbox(msg: impl Into<String>) -> Self {
        Self::InvalidBoundingBox(msg.into())
    }

    pub fn malformed(index: u64, msg: impl Into<String>) -> Self {
        Self::MalformedFrame {
            index,
            message: msg.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Index of the last frame that was read successfully before a truncation, if any.
    pub fn last_good_frame(&self) -> Option<u64> {
        match self {
            Self::TruncatedLog { read, .. } => read.checked_sub(1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(ReelError::config("x").to_string().contains("config error:"));
        assert!(
            ReelError::invalid_bbox("x")
                .to_string()
                .contains("invalid bounding box:")
        );
        assert!(
            ReelError::encoding("x")
                .to_string()
                .contains("encoding failure:")
        );
        assert!(ReelError::render("x").to_string().contains("render error:"));
    }

    #[test]
    fn truncated_log_reports_counts_and_last_index() {
        let err = ReelError::TruncatedLog {
            expected: 10,
            read: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 10"));
        assert!(msg.contains("read 7"));
        assert!(msg.contains("last good frame index 6"));
        assert_eq!(err.last_good_frame(), Some(6));

        let empty = ReelError::TruncatedLog {
            expected: 3,
            read: 0,
        };
        assert!(empty.to_string().contains("no frame was read"));
        assert_eq!(empty.last_good_frame(), None);
    }

    #[test]
    fn malformed_frame_carries_index() {
        let err = ReelError::malformed(4, "missing field `vehicles`");
        assert!(err.to_string().contains("malformed frame 4"));
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = ReelError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
