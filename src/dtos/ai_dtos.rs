use serde::Deserialize;

use crate::services::settings_service::AiProviderConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionRequest {
    #[serde(flatten)]
    pub provider: AiProviderConfig,
}
