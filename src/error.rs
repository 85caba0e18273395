use thiserror::Error;

/// Errors that callers need to tell apart.
///
/// Internal plumbing uses `anyhow` with context; these variants exist for the
/// cases the API surface must map to distinct responses: missing provider
/// credentials, fact conflicts blocking a write, provider failures that have
/// already exhausted their fallbacks, and corpus I/O.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("Conflicting facts detected ({count}). Use force=true to override.")]
    Conflict { count: usize },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_count_and_override() {
        let err = CoreError::Conflict { count: 3 };
        let msg = err.to_string();
        assert_eq!(
            msg,
            "Conflicting facts detected (3). Use force=true to override."
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
