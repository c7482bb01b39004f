use std::error::Error;
use std::fmt;
use std::io;

pub fn c_err(s: &str) -> QueryError {
    QueryError::ExecutionError(s.to_string())
}

/// Custom error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// IO Errors.
    IOError(String),
    /// Serialization errors, including malformed run files.
    SerializationError(String),
    /// Invalid page size, buffer budget or tuple width.
    ConfigError(String),
    /// Validation errors.
    ValidationError(String),
    /// Execution errors.
    ExecutionError(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                QueryError::ValidationError(s) => format!("Validation Error: {}", s),
                QueryError::ExecutionError(s) => format!("Execution Error: {}", s),
                QueryError::ConfigError(s) => format!("Configuration Error: {}", s),
                QueryError::IOError(s) => s.to_string(),
                QueryError::SerializationError(s) => s.to_string(),
            }
        )
    }
}

impl From<io::Error> for QueryError {
    fn from(error: io::Error) -> Self {
        QueryError::IOError(error.to_string())
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(error: serde_json::Error) -> Self {
        QueryError::SerializationError(format!("JSON Error: {}", error))
    }
}

impl Error for QueryError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err: QueryError = io::Error::new(io::ErrorKind::NotFound, "left-run-1").into();
        assert_eq!(err, QueryError::IOError("left-run-1".to_string()));
    }

    #[test]
    fn test_display() {
        let err = QueryError::ConfigError("page too small".to_string());
        assert_eq!(err.to_string(), "Configuration Error: page too small");
        assert_eq!(
            c_err("boom").to_string(),
            "Execution Error: boom".to_string()
        );
    }
}
