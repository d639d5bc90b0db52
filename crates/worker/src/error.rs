use std::error::Error as _;

use talkgen_comfyui::driver::DriverError;
use talkgen_core::error::CoreError;
use talkgen_core::types::ResultFields;

use crate::delivery::DeliveryError;
use crate::input::InputError;

/// Everything that can end a job unsuccessfully.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Execution(#[from] DriverError),

    #[error("Could not fetch generated output: {0}")]
    OutputFetch(String),

    #[error("Output delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Could not create scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
}

impl From<CoreError> for JobError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Input(InputError::Validation(msg)),
            CoreError::Configuration(msg) => Self::Configuration(format!("Configuration error: {msg}")),
        }
    }
}

impl JobError {
    /// Supporting detail for the result's `details` field.
    ///
    /// A missing artifact carries the backend's execution error; other
    /// errors report their underlying cause chain.
    pub fn details(&self) -> Option<String> {
        if let Self::Execution(DriverError::NoArtifact {
            execution_error, ..
        }) = self
        {
            return execution_error.clone();
        }

        let mut causes = Vec::new();
        let mut source = self.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        // The first cause is already interpolated into our own message.
        let rest: Vec<String> = causes.into_iter().skip(1).collect();
        (!rest.is_empty()).then(|| rest.join(": "))
    }

    pub fn into_result(self) -> ResultFields {
        ResultFields::Error {
            details: self.details(),
            error: self.to_string(),
        }
    }
}
