//! Error types for turnloop
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in turnloop
#[derive(Debug, Error)]
pub enum TurnloopError {
    /// Caller input was rejected (missing goal, bad target, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A persisted loop record could not be parsed
    #[error("Corrupted loop record {slug}: {reason}")]
    Corruption { slug: String, reason: String },

    /// A required external interpreter or tool is absent
    #[error("Missing dependency: {0}")]
    DependencyMissing(String),

    /// Loop not found in the state directory
    #[error("Loop not found: {0}")]
    LoopNotFound(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Prompt template error
    #[error("Template error: {0}")]
    Template(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TurnloopError {
    /// Build a corruption error for the given slug
    pub fn corruption(slug: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corruption {
            slug: slug.into(),
            reason: reason.into(),
        }
    }

    /// Errors that end the loop (record deleted) rather than being skipped
    pub fn is_fatal_to_loop(&self) -> bool {
        matches!(
            self,
            TurnloopError::Validation(_) | TurnloopError::Corruption { .. } | TurnloopError::DependencyMissing(_)
        )
    }
}

/// Result type alias for turnloop operations
pub type Result<T> = std::result::Result<T, TurnloopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = TurnloopError::Validation("goal is required".to_string());
        assert_eq!(err.to_string(), "Validation error: goal is required");
    }

    #[test]
    fn test_corruption_error() {
        let err = TurnloopError::corruption("src-abc123", "iteration is not a number");
        assert_eq!(
            err.to_string(),
            "Corrupted loop record src-abc123: iteration is not a number"
        );
    }

    #[test]
    fn test_dependency_missing_error() {
        let err = TurnloopError::DependencyMissing("gptdiff-apply not found on PATH".to_string());
        assert_eq!(err.to_string(), "Missing dependency: gptdiff-apply not found on PATH");
    }

    #[test]
    fn test_loop_not_found_error() {
        let err = TurnloopError::LoopNotFound("docs-001".to_string());
        assert_eq!(err.to_string(), "Loop not found: docs-001");
    }

    #[test]
    fn test_fatal_to_loop_classification() {
        assert!(TurnloopError::Validation("x".into()).is_fatal_to_loop());
        assert!(TurnloopError::corruption("s", "r").is_fatal_to_loop());
        assert!(TurnloopError::DependencyMissing("sh".into()).is_fatal_to_loop());
        assert!(!TurnloopError::Storage("locked".into()).is_fatal_to_loop());
        assert!(!TurnloopError::Template("bad".into()).is_fatal_to_loop());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TurnloopError = io_err.into();
        assert!(matches!(err, TurnloopError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: TurnloopError = json_err.into();
        assert!(matches!(err, TurnloopError::Json(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<Vec<u32>>("{not: [a list").unwrap_err();
        let err: TurnloopError = yaml_err.into();
        assert!(matches!(err, TurnloopError::Yaml(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(TurnloopError::Storage("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
