use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerBackend {
    /// 进程内CRON调度
    Local,
    /// Cloud Scheduler 兼容的REST接口
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    None,
    Static,
    /// 实例元数据服务器
    Metadata,
}

/// 云平台相关配置：项目、调度器、令牌
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub project_id: String,
    pub scheduler: SchedulerBackend,
    pub scheduler_endpoint: String,
    pub run_endpoint: String,
    pub metadata_endpoint: String,
    pub token_source: TokenSource,
    pub static_token: Option<String>,
    /// 调度器签发OIDC令牌使用的服务账号，默认 `deployer@{project}.iam.gserviceaccount.com`
    pub service_account_email: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            project_id: "local-project".to_string(),
            scheduler: SchedulerBackend::Local,
            scheduler_endpoint: "https://cloudscheduler.googleapis.com".to_string(),
            run_endpoint: "https://run.googleapis.com".to_string(),
            metadata_endpoint: "http://metadata.google.internal".to_string(),
            token_source: TokenSource::None,
            static_token: None,
            service_account_email: None,
            request_timeout_seconds: 30,
        }
    }
}

impl PlatformConfig {
    pub fn service_account(&self) -> String {
        self.service_account_email
            .clone()
            .unwrap_or_else(|| format!("deployer@{}.iam.gserviceaccount.com", self.project_id))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(anyhow::anyhow!("项目ID不能为空"));
        }
        for (name, endpoint) in [
            ("scheduler_endpoint", &self.scheduler_endpoint),
            ("run_endpoint", &self.run_endpoint),
            ("metadata_endpoint", &self.metadata_endpoint),
        ] {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(anyhow::anyhow!("{} 必须是HTTP(S)地址: {}", name, endpoint));
            }
        }
        if self.token_source == TokenSource::Static
            && self.static_token.as_deref().is_none_or(str::is_empty)
        {
            return Err(anyhow::anyhow!("token_source 为 static 时必须配置 static_token"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }
        Ok(())
    }
}
