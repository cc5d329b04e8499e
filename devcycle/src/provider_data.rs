//! Provider data handed to every resource and data source at configure time

use crate::api::{Client, EvaluationClient};
use crate::error::ProviderError;

#[derive(Clone, Default)]
pub struct DevCycleProviderData {
    /// `None` when no management credentials were resolved
    pub management: Option<Client>,
    /// `None` without a server SDK token
    pub evaluation: Option<EvaluationClient>,
}

impl DevCycleProviderData {
    pub fn new(management: Option<Client>, evaluation: Option<EvaluationClient>) -> Self {
        Self {
            management,
            evaluation,
        }
    }

    pub fn management(&self) -> Result<&Client, ProviderError> {
        self.management.as_ref().ok_or(ProviderError::NotConfigured)
    }

    pub fn evaluation(&self) -> Result<&EvaluationClient, ProviderError> {
        self.evaluation
            .as_ref()
            .ok_or(ProviderError::EvaluationNotConfigured)
    }
}

/// Downcasts the opaque provider data Terraform relays on configure
pub(crate) fn downcast(
    provider_data: Option<std::sync::Arc<dyn std::any::Any + Send + Sync>>,
) -> Option<DevCycleProviderData> {
    provider_data.and_then(|data| data.downcast_ref::<DevCycleProviderData>().cloned())
}
