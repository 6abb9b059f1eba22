use thiserror::Error;

/// Fatal upload failures. Per-identity recording failures are not errors
/// here; they are reported in the upload result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The image could not be decoded or inference failed. Retrying the
    /// same bytes will not help.
    #[error("face extraction failed: {0}")]
    ExtractionFailed(String),
    /// The known-face registry could not be read.
    #[error("known-face registry unavailable: {0}")]
    RegistryUnavailable(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::RegistryUnavailable(_))
    }
}

/// Failures of the known-face registration path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("identity must not be empty")]
    InvalidIdentity,
    #[error("no face found in image")]
    NoFaceFound,
    #[error("face extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_backend_failures_are_retryable() {
        assert!(PipelineError::RegistryUnavailable("db locked".into()).is_retryable());
        assert!(!PipelineError::ExtractionFailed("not an image".into()).is_retryable());
    }
}
