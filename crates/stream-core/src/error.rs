use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duplicate operator: {0}")]
    DuplicateOperator(String),

    #[error("Operator not found: {0}")]
    OperatorNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Unsupported conversion target: {0}")]
    UnsupportedConversion(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Operator '{operator}' failed: {source}")]
    OperatorFailed {
        operator: String,
        #[source]
        source: Box<StreamError>,
    },

    #[error("Stream closed")]
    StreamClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StreamError {
    /// Returns true for errors raised while building a plan or an operator,
    /// as opposed to failures that happen while the plan is running.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            StreamError::Configuration(_)
                | StreamError::DuplicateOperator(_)
                | StreamError::OperatorNotFound(_)
                | StreamError::InvalidOperation(_)
                | StreamError::AttributeNotFound(_)
                | StreamError::TypeMismatch { .. }
                | StreamError::UnsupportedConversion(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_configuration_classification() {
        assert!(StreamError::DuplicateOperator("scan".into()).is_configuration_error());
        assert!(StreamError::UnsupportedConversion("binary".into()).is_configuration_error());
        assert!(!StreamError::Execution("boom".into()).is_configuration_error());
        assert!(!StreamError::StreamClosed.is_configuration_error());
    }

    #[test]
    fn test_operator_failure_keeps_cause() {
        let err = StreamError::OperatorFailed {
            operator: "agg".to_string(),
            source: Box::new(StreamError::Execution("division by zero".into())),
        };

        assert_eq!(
            err.to_string(),
            "Operator 'agg' failed: Execution error: division by zero"
        );
        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), "Execution error: division by zero");
    }
}
