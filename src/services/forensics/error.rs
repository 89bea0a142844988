// Forensics Errors
// A missing backbone or an undecodable image stops an analysis; the rest degrade to neutral findings.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForensicsError {
    #[error("Backbone unavailable: {reason}")]
    BackboneUnavailable { reason: String },
    #[error("Expert computation failed: {0}")]
    ExpertComputation(String),
    #[error("External service error: {0}")]
    ExternalService(String),
    #[error("Contract violation: {0}")]
    ContractViolation(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ForensicsError {
    pub fn backbone(reason: impl ToString) -> Self {
        Self::BackboneUnavailable {
            reason: reason.to_string(),
        }
    }

    /// Whether the whole pipeline must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackboneUnavailable { .. } | Self::InvalidImage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(ForensicsError::backbone("no weights").is_fatal());
        assert!(!ForensicsError::ExpertComputation("nan".into()).is_fatal());
        assert!(!ForensicsError::ContractViolation("range".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = ForensicsError::backbone("file missing");
        assert_eq!(err.to_string(), "Backbone unavailable: file missing");
    }
}
