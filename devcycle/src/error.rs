use thiserror::Error;
use tfplug::{Diagnostic, TfplugError};

use crate::api::ApiError;
use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured")]
    NotConfigured,

    #[error("Evaluation client not configured")]
    EvaluationNotConfigured,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Tfplug(#[from] TfplugError),
}

impl ProviderError {
    /// Error diagnostic for a failed operation. Configuration errors keep
    /// their own summary so every adapter reports them the same way.
    pub fn diagnostic(&self, summary: impl Into<String>) -> Diagnostic {
        match self {
            ProviderError::NotConfigured => Diagnostic::error(
                "Provider not configured",
                "No DevCycle management credentials were resolved. Set access_token, \
                 client_id and client_secret, or the DEVCYCLE_CLIENT_ID and \
                 DEVCYCLE_CLIENT_SECRET environment variables.",
            ),
            ProviderError::EvaluationNotConfigured => Diagnostic::error(
                "Provider not configured",
                "Evaluating variables requires server_sdk_token or the \
                 DEVCYCLE_SERVER_TOKEN environment variable.",
            ),
            other => Diagnostic::error(summary, other.to_string()),
        }
    }
}
