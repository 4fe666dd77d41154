use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

/// 任务元数据存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "sqlite://measurement.db".to_string(),
            max_connections: 5,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == StoreBackend::Sqlite {
            if self.url.is_empty() {
                return Err(anyhow::anyhow!("数据库URL不能为空"));
            }
            if !self.url.starts_with("sqlite:") {
                return Err(anyhow::anyhow!("数据库URL必须是SQLite格式: {}", self.url));
            }
        }
        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }
        Ok(())
    }
}
