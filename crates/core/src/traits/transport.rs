use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// 分布式追踪请求头，端到端透传
pub const TRACE_CONTEXT_HEADER: &str = "X-Cloud-Trace-Context";

/// 执行端测量接口路径
pub const MEASUREMENTS_PATH: &str = "/api/v1/measurements";

/// 拼接执行端测量接口地址
pub fn measurements_url(service_uri: &str) -> String {
    format!("{}{}", service_uri.trim_end_matches('/'), MEASUREMENTS_PATH)
}

/// 执行端调用请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementInvocation {
    pub id: String,
}

/// 一次对执行端的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub region: String,
    pub url: String,
    pub task_id: String,
    pub bearer_token: Option<String>,
    pub trace_context: Option<String>,
}

/// 解析各区域执行端服务地址
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    async fn resolve(&self, region: &str) -> Result<String>;
}

/// 令牌提供者
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// 面向指定受众的身份令牌，`None` 表示不需要认证
    async fn identity_token(&self, audience: &str) -> Result<Option<String>>;

    /// 访问平台API使用的访问令牌
    async fn access_token(&self) -> Result<Option<String>>;
}

/// 执行端调用
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: &InvocationRequest) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurements_url() {
        assert_eq!(
            measurements_url("https://agent.example.com/"),
            "https://agent.example.com/api/v1/measurements"
        );
        assert_eq!(
            measurements_url("http://127.0.0.1:8081"),
            "http://127.0.0.1:8081/api/v1/measurements"
        );
    }
}
