use crate::error::QueryError;
use crate::{PAGE_SIZE, PAGE_SLOTS};
use std::path::PathBuf;

/// Minimum number of buffer pages for a sort or a join: one input page per
/// side (or per merged run) plus one output page.
pub const MIN_BUFFERS: usize = 3;

/// Execution settings handed down by the surrounding system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Page size in bytes.
    pub page_size: usize,
    /// Buffer pages available to each sort or join.
    pub num_buffers: usize,
    /// Root directory under which operators create their temporary run files.
    pub temp_dir: PathBuf,
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig {
            page_size: PAGE_SIZE,
            num_buffers: PAGE_SLOTS,
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl ExecConfig {
    pub fn new(page_size: usize, num_buffers: usize, temp_dir: PathBuf) -> Self {
        ExecConfig {
            page_size,
            num_buffers,
            temp_dir,
        }
    }

    /// Parse a configuration from JSON, filling absent keys with defaults.
    pub fn from_json(json: &str) -> Result<Self, QueryError> {
        let config: ExecConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.page_size == 0 {
            return Err(QueryError::ConfigError(
                "Page size must be greater than zero".to_string(),
            ));
        }
        validate_buffers(self.num_buffers)
    }
}

pub fn validate_buffers(num_buffers: usize) -> Result<(), QueryError> {
    if num_buffers < MIN_BUFFERS {
        warn!(
            "Rejecting buffer budget of {} pages (minimum {})",
            num_buffers, MIN_BUFFERS
        );
        return Err(QueryError::ConfigError(format!(
            "Minimum {} buffers are required, got {}",
            MIN_BUFFERS, num_buffers
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecConfig::default();
        assert_eq!(config.page_size, PAGE_SIZE);
        assert_eq!(config.num_buffers, PAGE_SLOTS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = ExecConfig::from_json(r#"{"page_size": 512}"#).unwrap();
        assert_eq!(config.page_size, 512);
        assert_eq!(config.num_buffers, PAGE_SLOTS);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(matches!(
            ExecConfig::from_json(r#"{"num_buffers": 2}"#),
            Err(QueryError::ConfigError(_))
        ));
        assert!(matches!(
            ExecConfig::from_json(r#"{"page_size": 0}"#),
            Err(QueryError::ConfigError(_))
        ));
        assert!(matches!(
            ExecConfig::from_json("not json"),
            Err(QueryError::SerializationError(_))
        ));
    }
}
