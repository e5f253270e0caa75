use std::path::PathBuf;

use eashell_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Working directory not found: {}", .0.display())]
    WorkingDirectory(PathBuf),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_working_directory() {
        let err = EngineError::WorkingDirectory(PathBuf::from("/no/such/dir"));
        assert_eq!(err.to_string(), "Working directory not found: /no/such/dir");
    }

    #[test]
    fn display_spawn_keeps_source() {
        let err = EngineError::Spawn {
            program: "sh".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        };
        assert!(err.to_string().starts_with("Failed to start 'sh':"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn core_errors_pass_through() {
        let err = EngineError::from(CoreError::Validation("name".into()));
        assert_eq!(err.to_string(), "Validation failed: name");
    }
}
