use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::api_observability::validate_bind_address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    /// 固定映射或URL模板
    Static,
    /// 通过 Cloud Run Admin API 查询服务地址
    CloudRun,
}

/// 任务分发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub resolver: ResolverKind,
    /// 执行端服务名
    pub service_name: String,
    /// 区域 → 执行端地址
    pub service_urls: HashMap<String, String>,
    /// 未在 `service_urls` 中的区域使用该模板，`{region}` 会被替换
    pub service_url_template: Option<String>,
    /// 已知区域列表，为空表示不限制
    pub regions: Vec<String>,
    /// 调用执行端的HTTP超时，不应短于执行端的探测超时
    pub invocation_timeout_seconds: u64,
    pub attempt_deadline_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverKind::Static,
            service_name: "measurer".to_string(),
            service_urls: HashMap::new(),
            service_url_template: Some("http://127.0.0.1:8081".to_string()),
            regions: Vec::new(),
            invocation_timeout_seconds: 180,
            attempt_deadline_seconds: 180,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(anyhow::anyhow!("执行端服务名不能为空"));
        }
        if self.resolver == ResolverKind::Static
            && self.service_urls.is_empty()
            && self.service_url_template.is_none()
        {
            return Err(anyhow::anyhow!(
                "静态解析需要配置 service_urls 或 service_url_template"
            ));
        }
        if self.invocation_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("调用超时时间必须大于0"));
        }
        if self.attempt_deadline_seconds == 0 {
            return Err(anyhow::anyhow!("作业执行期限必须大于0"));
        }
        Ok(())
    }

    pub fn is_known_region(&self, region: &str) -> bool {
        self.regions.is_empty() || self.regions.iter().any(|r| r == region)
    }
}

/// 执行端（vantage point）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub enabled: bool,
    /// 本执行端所在区域
    pub region: String,
    pub bind_address: String,
    /// 测量接口的请求超时；超时后已开始的测量仍在后台完成
    pub request_timeout_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub ping_command: Vec<String>,
    pub traceroute_command: Vec<String>,
    pub curl_command: Vec<String>,
    /// 测量结果序号冲突时的最大重试次数
    pub max_sequence_attempts: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: "local".to_string(),
            bind_address: "0.0.0.0:8081".to_string(),
            request_timeout_seconds: 180,
            probe_timeout_seconds: 120,
            ping_command: vec!["ping".to_string(), "-c".to_string(), "1".to_string()],
            traceroute_command: vec!["traceroute".to_string()],
            curl_command: vec![
                "curl".to_string(),
                "-sS".to_string(),
                "-o".to_string(),
                "/dev/null".to_string(),
                "-w".to_string(),
                "time_namelookup: %{time_namelookup}\\ntime_connect: %{time_connect}\\ntime_appconnect: %{time_appconnect}\\ntime_starttransfer: %{time_starttransfer}\\ntime_total: %{time_total}\\n".to_string(),
            ],
            max_sequence_attempts: 10,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.region.trim().is_empty() {
            return Err(anyhow::anyhow!("执行端区域不能为空"));
        }
        validate_bind_address(&self.bind_address)?;
        if self.probe_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("探测超时时间必须大于0"));
        }
        if self.request_timeout_seconds < self.probe_timeout_seconds {
            return Err(anyhow::anyhow!(
                "请求超时时间 ({}s) 不能小于探测超时时间 ({}s)",
                self.request_timeout_seconds,
                self.probe_timeout_seconds
            ));
        }
        for (name, command) in [
            ("ping_command", &self.ping_command),
            ("traceroute_command", &self.traceroute_command),
            ("curl_command", &self.curl_command),
        ] {
            if command.first().is_none_or(|program| program.is_empty()) {
                return Err(anyhow::anyhow!("{} 不能为空", name));
            }
        }
        if self.max_sequence_attempts == 0 {
            return Err(anyhow::anyhow!("序号重试次数必须大于0"));
        }
        Ok(())
    }
}
