use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// 外部调度器中作业名称：`projects/{project}/locations/{region}/jobs/{task_id}`
pub fn job_name(project: &str, region: &str, task_id: &str) -> String {
    format!("projects/{project}/locations/{region}/jobs/{task_id}")
}

/// OIDC认证：调度器调用目标时以该服务账号签发身份令牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcToken {
    pub service_account_email: String,
    pub audience: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTarget {
    pub uri: String,
    pub http_method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub oidc_token: Option<OidcToken>,
}

/// 调度器重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub max_retry_duration: Duration,
    pub min_backoff_duration: Duration,
    pub max_backoff_duration: Duration,
    pub max_doublings: u32,
}

impl Default for RetryPolicy {
    /// 不重试；即使重试也在 5s ~ 1h 间指数退避，最多翻倍5次
    fn default() -> Self {
        Self {
            retry_count: 0,
            max_retry_duration: Duration::ZERO,
            min_backoff_duration: Duration::from_secs(5),
            max_backoff_duration: Duration::from_secs(3600),
            max_doublings: 5,
        }
    }
}

/// 周期作业定义
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub http_target: HttpTarget,
    pub schedule: String,
    pub time_zone: String,
    pub retry_policy: RetryPolicy,
    pub attempt_deadline: Duration,
}

/// 外部周期作业调度器接口
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// 创建周期作业
    async fn create_job(&self, job: &JobSpec) -> Result<()>;

    /// 删除周期作业，作业本就不存在时返回 `false`
    async fn delete_job(&self, name: &str) -> Result<bool>;
}
