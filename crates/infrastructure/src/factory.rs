use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use measurement_core::config::{
    AppConfig, DispatcherConfig, PlatformConfig, ResolverKind, SchedulerBackend, StoreBackend,
    StoreConfig, TokenSource,
};
use measurement_core::traits::{
    AgentInvoker, JobScheduler, ServiceResolver, TaskStore, TokenProvider,
};
use measurement_core::{MeasurementError, Result};

use crate::scheduler::{CloudSchedulerClient, LocalJobScheduler};
use crate::store::{InMemoryTaskStore, SqliteTaskStore};
use crate::transport::{
    CloudRunServiceResolver, HttpAgentInvoker, MetadataServerTokenProvider,
    StaticServiceResolver, StaticTokenProvider,
};

/// 按配置装配的外部依赖
#[derive(Clone)]
pub struct PlatformServices {
    pub store: Arc<dyn TaskStore>,
    pub scheduler: Arc<dyn JobScheduler>,
    /// 本地调度器句柄，关闭时用于终止作业
    pub local_scheduler: Option<Arc<LocalJobScheduler>>,
    pub resolver: Arc<dyn ServiceResolver>,
    pub tokens: Arc<dyn TokenProvider>,
    pub invoker: Arc<dyn AgentInvoker>,
}

pub struct PlatformFactory;

impl PlatformFactory {
    pub async fn create(config: &AppConfig) -> Result<PlatformServices> {
        let http_client = Self::http_client(config.platform.request_timeout_seconds)?;
        let invoker_client = Self::http_client(config.dispatcher.invocation_timeout_seconds)?;

        let store = Self::create_store(&config.store).await?;
        let tokens = Self::create_token_provider(&config.platform, http_client.clone());
        let resolver = Self::create_resolver(
            &config.dispatcher,
            &config.platform,
            tokens.clone(),
            http_client.clone(),
        );

        let (scheduler, local_scheduler): (Arc<dyn JobScheduler>, _) =
            match config.platform.scheduler {
                SchedulerBackend::Local => {
                    info!("使用进程内调度器");
                    let local = Arc::new(LocalJobScheduler::new(
                        tokens.clone(),
                        invoker_client.clone(),
                    ));
                    (local.clone(), Some(local))
                }
                SchedulerBackend::Cloud => {
                    info!("使用云调度器: {}", config.platform.scheduler_endpoint);
                    let cloud = CloudSchedulerClient::new(
                        config.platform.scheduler_endpoint.clone(),
                        tokens.clone(),
                        http_client.clone(),
                    );
                    (Arc::new(cloud), None)
                }
            };

        Ok(PlatformServices {
            store,
            scheduler,
            local_scheduler,
            resolver,
            tokens,
            invoker: Arc::new(HttpAgentInvoker::new(invoker_client)),
        })
    }

    pub fn http_client(timeout_seconds: u64) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| MeasurementError::Configuration(format!("HTTP客户端初始化失败: {e}")))
    }

    pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn TaskStore>> {
        debug!("创建任务存储: {:?}", config.backend);
        match config.backend {
            StoreBackend::Memory => {
                info!("使用内存任务存储");
                Ok(Arc::new(InMemoryTaskStore::new()))
            }
            StoreBackend::Sqlite => {
                info!("使用SQLite任务存储: {}", config.url);
                let store = SqliteTaskStore::connect(&config.url, config.max_connections).await?;
                Ok(Arc::new(store))
            }
        }
    }

    pub fn create_token_provider(
        config: &PlatformConfig,
        http_client: reqwest::Client,
    ) -> Arc<dyn TokenProvider> {
        match config.token_source {
            TokenSource::None => Arc::new(StaticTokenProvider::none()),
            TokenSource::Static => Arc::new(StaticTokenProvider::new(config.static_token.clone())),
            TokenSource::Metadata => Arc::new(MetadataServerTokenProvider::new(
                config.metadata_endpoint.clone(),
                http_client,
            )),
        }
    }

    pub fn create_resolver(
        dispatcher: &DispatcherConfig,
        platform: &PlatformConfig,
        tokens: Arc<dyn TokenProvider>,
        http_client: reqwest::Client,
    ) -> Arc<dyn ServiceResolver> {
        match dispatcher.resolver {
            ResolverKind::Static => Arc::new(StaticServiceResolver::new(
                dispatcher.service_urls.clone(),
                dispatcher.service_url_template.clone(),
            )),
            ResolverKind::CloudRun => Arc::new(CloudRunServiceResolver::new(
                platform.run_endpoint.clone(),
                platform.project_id.clone(),
                dispatcher.service_name.clone(),
                tokens,
                http_client,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config_builds_local_stack() {
        let services = PlatformFactory::create(&AppConfig::default()).await.unwrap();
        assert!(services.local_scheduler.is_some());
        assert!(!services.store.exists("nothing").await.unwrap());
        assert_eq!(
            services.resolver.resolve("us").await.unwrap(),
            "http://127.0.0.1:8081"
        );
        assert_eq!(services.tokens.access_token().await.unwrap(), None);
    }
}
