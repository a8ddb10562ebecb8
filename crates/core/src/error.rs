//! Transformation errors.
//!
//! The variants follow how far a failure reaches: a [`TransformerError::Fatal`] error is a
//! deployment defect, a [`TransformerError::Request`] error aborts one request, a
//! [`TransformerError::Data`] error aborts one resource and a [`TransformerError::Mapping`] error
//! aborts the current rule's attempt only.

#[derive(Debug, thiserror::Error)]
pub enum TransformerError {
    #[error("fatal transformer error: {0}")]
    Fatal(String),
    #[error("invalid request: {0}")]
    Request(String),
    #[error("invalid data: {0}")]
    Data(String),
    #[error("mapping failed: {0}")]
    Mapping(String),
    #[error("script failed: {0}")]
    Script(String),
    #[error("invalid metadata: {0}")]
    Metadata(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to deserialize YAML: {0}")]
    InvalidYaml(String),
    #[error("failed to read metadata file: {0}")]
    FileRead(std::io::Error),
}

/// Error classes exposed to callers that decide on logging and retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    Request,
    Data,
    Mapping,
    Script,
    Metadata,
}

impl TransformerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformerError::Fatal(_) | TransformerError::Config(_) => ErrorKind::Fatal,
            TransformerError::Request(_) => ErrorKind::Request,
            TransformerError::Data(_) => ErrorKind::Data,
            TransformerError::Mapping(_) => ErrorKind::Mapping,
            TransformerError::Script(_) => ErrorKind::Script,
            TransformerError::Metadata(_)
            | TransformerError::InvalidYaml(_)
            | TransformerError::FileRead(_) => ErrorKind::Metadata,
        }
    }

    /// True if a later delivery of the same resource may succeed without a configuration change.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Mapping
    }
}

impl From<fhir::FhirError> for TransformerError {
    fn from(err: fhir::FhirError) -> Self {
        TransformerError::Data(err.to_string())
    }
}

/// A value could not be coerced to the declared type of its target field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("value of {field} could not be converted: {message}")]
pub struct ConversionError {
    pub field: String,
    pub message: String,
}

impl ConversionError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<ConversionError> for TransformerError {
    fn from(err: ConversionError) -> Self {
        TransformerError::Mapping(format!(
            "Value of {} could not be converted: {}",
            err.field, err.message
        ))
    }
}

pub type TransformerResult<T> = std::result::Result<T, TransformerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_error_becomes_mapping_error_with_field_and_message() {
        let err: TransformerError = ConversionError::new("\"Weight\"", "not a number: abc").into();
        match err {
            TransformerError::Mapping(msg) => {
                assert!(msg.contains("\"Weight\""));
                assert!(msg.contains("not a number: abc"));
            }
            other => panic!("expected Mapping, got {other:?}"),
        }
    }

    #[test]
    fn only_mapping_errors_are_retryable() {
        assert!(TransformerError::Mapping("x".into()).is_retryable());
        assert!(!TransformerError::Fatal("x".into()).is_retryable());
        assert!(!TransformerError::Request("x".into()).is_retryable());
        assert!(!TransformerError::Data("x".into()).is_retryable());
        assert_eq!(
            TransformerError::InvalidYaml("x".into()).kind(),
            ErrorKind::Metadata
        );
    }

    #[test]
    fn fhir_errors_are_data_errors() {
        let err: TransformerError = fhir::FhirError::InvalidInput("no id".into()).into();
        assert_eq!(err.kind(), ErrorKind::Data);
    }
}
