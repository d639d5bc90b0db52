#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The job input is missing a field or carries an out-of-range value.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A workflow template does not match what the request needs
    /// (missing file, malformed JSON, missing required node).
    #[error("Configuration error: {0}")]
    Configuration(String),
}
