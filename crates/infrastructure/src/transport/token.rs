use async_trait::async_trait;
use serde::Deserialize;

use measurement_core::traits::TokenProvider;
use measurement_core::{MeasurementError, Result};

const METADATA_FLAVOR: &str = "Metadata-Flavor";
const SERVICE_ACCOUNT_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default";

/// 固定令牌；未配置时不附加认证
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn identity_token(&self, _audience: &str) -> Result<Option<String>> {
        Ok(self.token.clone())
    }

    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

/// 实例元数据服务器签发的令牌
pub struct MetadataServerTokenProvider {
    endpoint: String,
    http_client: reqwest::Client,
}

impl MetadataServerTokenProvider {
    pub fn new(endpoint: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    async fn fetch(&self, operation: &str, url: &str) -> Result<reqwest::Response> {
        let response = self
            .http_client
            .get(url)
            .header(METADATA_FLAVOR, "Google")
            .send()
            .await
            .map_err(|e| MeasurementError::dependency(operation, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MeasurementError::dependency(
                operation,
                format!("元数据服务器返回 HTTP {status}"),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl TokenProvider for MetadataServerTokenProvider {
    async fn identity_token(&self, audience: &str) -> Result<Option<String>> {
        let identity = format!("{}{}/identity", self.endpoint, SERVICE_ACCOUNT_PATH);
        let mut url = url::Url::parse(&identity)
            .map_err(|e| MeasurementError::Configuration(format!("无效的元数据地址: {e}")))?;
        url.query_pairs_mut().append_pair("audience", audience);

        let token = self
            .fetch("token.identity", url.as_str())
            .await?
            .text()
            .await
            .map_err(|e| MeasurementError::dependency("token.identity", e))?;
        Ok(Some(token.trim().to_string()))
    }

    async fn access_token(&self) -> Result<Option<String>> {
        let url = format!("{}{}/token", self.endpoint, SERVICE_ACCOUNT_PATH);
        let token: AccessTokenResponse = self
            .fetch("token.access", &url)
            .await?
            .json()
            .await
            .map_err(|e| MeasurementError::dependency("token.access", e))?;
        Ok(Some(token.access_token))
    }
}
