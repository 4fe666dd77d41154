use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    dispatcher_agent::{AgentConfig, DispatcherConfig},
    platform::PlatformConfig,
    store::StoreConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub dispatcher: DispatcherConfig,
    pub platform: PlatformConfig,
    pub agent: AgentConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Struct defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: MEASUREMENT_, nesting: `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/measurement.toml",
                "measurement.toml",
                "/etc/measurement/config.toml",
            ];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("MEASUREMENT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate().context("存储配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.dispatcher
            .validate()
            .context("分发配置验证失败")?;
        self.platform.validate().context("平台配置验证失败")?;
        self.agent.validate().context("执行端配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        self.validate_deadlines()?;

        Ok(())
    }

    /// 分发端等待执行端的时间必须覆盖一次完整探测
    fn validate_deadlines(&self) -> Result<()> {
        let probe = self.agent.probe_timeout_seconds;
        if self.dispatcher.invocation_timeout_seconds < probe {
            anyhow::bail!(
                "dispatcher.invocation_timeout_seconds ({}s) 不能小于 agent.probe_timeout_seconds ({}s)",
                self.dispatcher.invocation_timeout_seconds,
                probe
            );
        }
        if self.dispatcher.attempt_deadline_seconds < probe {
            anyhow::bail!(
                "dispatcher.attempt_deadline_seconds ({}s) 不能小于 agent.probe_timeout_seconds ({}s)",
                self.dispatcher.attempt_deadline_seconds,
                probe
            );
        }
        Ok(())
    }
}
