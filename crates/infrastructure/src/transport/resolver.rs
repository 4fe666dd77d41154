use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use measurement_core::traits::{ServiceResolver, TokenProvider};
use measurement_core::{MeasurementError, Result};

/// 固定映射或URL模板解析
#[derive(Debug, Clone)]
pub struct StaticServiceResolver {
    urls: HashMap<String, String>,
    template: Option<String>,
}

impl StaticServiceResolver {
    pub fn new(urls: HashMap<String, String>, template: Option<String>) -> Self {
        Self { urls, template }
    }
}

#[async_trait]
impl ServiceResolver for StaticServiceResolver {
    async fn resolve(&self, region: &str) -> Result<String> {
        if let Some(url) = self.urls.get(region) {
            return Ok(url.clone());
        }
        self.template
            .as_ref()
            .map(|template| template.replace("{region}", region))
            .ok_or_else(|| {
                MeasurementError::dependency("resolver.resolve", format!("区域 {region} 未配置执行端地址"))
            })
    }
}

#[derive(Debug, Deserialize)]
struct RunService {
    uri: Option<String>,
}

/// 通过 Cloud Run Admin API 查询各区域执行端服务地址
pub struct CloudRunServiceResolver {
    endpoint: String,
    project_id: String,
    service_name: String,
    tokens: Arc<dyn TokenProvider>,
    http_client: reqwest::Client,
}

impl CloudRunServiceResolver {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        service_name: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            service_name: service_name.into(),
            tokens,
            http_client,
        }
    }
}

#[async_trait]
impl ServiceResolver for CloudRunServiceResolver {
    async fn resolve(&self, region: &str) -> Result<String> {
        let url = format!(
            "{}/v2/projects/{}/locations/{}/services/{}",
            self.endpoint, self.project_id, region, self.service_name
        );
        let mut request = self.http_client.get(&url);
        if let Some(token) = self.tokens.access_token().await? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MeasurementError::dependency("resolver.resolve", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MeasurementError::dependency(
                "resolver.resolve",
                format!("区域 {region} 查询服务失败: HTTP {status}"),
            ));
        }

        let service: RunService = response
            .json()
            .await
            .map_err(|e| MeasurementError::dependency("resolver.resolve", e))?;
        let uri = service.uri.filter(|uri| !uri.is_empty()).ok_or_else(|| {
            MeasurementError::dependency("resolver.resolve", format!("区域 {region} 的服务没有地址"))
        })?;
        debug!("区域 {} 执行端地址: {}", region, uri);
        Ok(uri)
    }
}
