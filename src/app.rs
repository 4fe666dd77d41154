use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

use measurement_api::{create_app, AppState};
use measurement_core::config::{ApiConfig, AppConfig};
use measurement_dispatcher::{
    reaper_channel, run_reaper, DetachedFailureReceiver, DispatchSettings, Dispatcher,
    RandomTaskIdGenerator, TaskController,
};
use measurement_infrastructure::{PlatformFactory, PlatformServices};
use measurement_worker::{AgentSettings, CompletionTracker, MeasurementAgent, ProbeRegistry};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行任务提交API
    Api,
    /// 仅运行区域执行端
    Agent,
    /// 同一进程内运行API与执行端
    All,
}

impl AppMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppMode::Api => "api",
            AppMode::Agent => "agent",
            AppMode::All => "all",
        }
    }

    fn runs_api(&self) -> bool {
        matches!(self, AppMode::Api | AppMode::All)
    }

    fn runs_agent(&self) -> bool {
        matches!(self, AppMode::Agent | AppMode::All)
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "api" => Ok(AppMode::Api),
            "agent" => Ok(AppMode::Agent),
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    services: PlatformServices,
    controller: Option<Arc<TaskController>>,
    agent: Option<MeasurementAgent>,
    failures: Option<DetachedFailureReceiver>,
    metrics: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {}", mode);

        if mode.runs_api() && !config.api.enabled {
            return Err(anyhow::anyhow!("API模式被禁用，请检查配置"));
        }
        if mode == AppMode::Agent && !config.agent.enabled {
            return Err(anyhow::anyhow!("执行端模式被禁用，请检查配置"));
        }

        let services = PlatformFactory::create(&config)
            .await
            .context("初始化平台依赖失败")?;

        let (controller, failures) = if mode.runs_api() {
            let (controller, failures) = build_controller(&config, &services);
            (Some(Arc::new(controller)), Some(failures))
        } else {
            (None, None)
        };

        let agent = mode
            .runs_agent()
            .then(|| build_agent(&config, &services));

        let metrics = if config.observability.metrics_enabled {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .context("安装Prometheus指标记录器失败")?;
            info!("指标端点已启用: {}", config.observability.metrics_endpoint);
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            config,
            mode,
            services,
            controller,
            agent,
            failures,
            metrics,
        })
    }

    /// 任务提交API的路由
    pub fn api_router(&self) -> Option<Router> {
        let controller = self.controller.clone()?;
        let mut state = AppState::new(&self.config.platform.project_id, self.mode.as_str())
            .with_controller(controller);
        if let Some(handle) = &self.metrics {
            state = state.with_metrics(handle.clone());
        }
        Some(create_app(
            state,
            &self.config.api,
            &self.config.observability,
        ))
    }

    /// 执行端的路由
    pub fn agent_router(&self) -> Option<Router> {
        let agent = self.agent.clone()?;
        let mut state =
            AppState::new(&self.config.platform.project_id, self.mode.as_str()).with_agent(agent);
        if let Some(handle) = &self.metrics {
            state = state.with_metrics(handle.clone());
        }
        // 测量接口使用执行端自己的超时，覆盖一次完整探测
        let api_config = ApiConfig {
            request_timeout_seconds: self.config.agent.request_timeout_seconds,
            ..self.config.api.clone()
        };
        Some(create_app(state, &api_config, &self.config.observability))
    }

    /// 运行直到收到关闭信号
    pub async fn run(mut self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {}", self.mode);

        let reaper = self.failures.take().map(|failures| tokio::spawn(run_reaper(failures)));
        let mut handles = Vec::new();

        if let Some(router) = self.api_router() {
            let address = self.config.api.bind_address.clone();
            let shutdown_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(serve("API服务器", address, router, shutdown_rx)));
        }

        if let Some(router) = self.agent_router() {
            let address = self.config.agent.bind_address.clone();
            let shutdown_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(serve("执行端", address, router, shutdown_rx)));
        }

        let mut result = Ok(());
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("服务运行失败: {:#}", e);
                    result = Err(e);
                }
                Err(e) => {
                    error!("服务任务异常退出: {}", e);
                    result = Err(anyhow::anyhow!("服务任务异常退出: {e}"));
                }
            }
        }

        if let Some(local) = &self.services.local_scheduler {
            local.abort_all().await;
        }
        if let Some(reaper) = reaper {
            reaper.abort();
        }

        info!("所有组件已停止");
        result
    }
}

fn build_controller(
    config: &AppConfig,
    services: &PlatformServices,
) -> (TaskController, DetachedFailureReceiver) {
    let mut settings = DispatchSettings::new(
        &config.platform.project_id,
        config.platform.service_account(),
    );
    settings.attempt_deadline = Duration::from_secs(config.dispatcher.attempt_deadline_seconds);

    let (failure_tx, failures) = reaper_channel();
    let dispatcher = Dispatcher::new(
        services.resolver.clone(),
        services.tokens.clone(),
        services.scheduler.clone(),
        services.invoker.clone(),
        settings,
        failure_tx,
    );
    let controller = TaskController::new(
        services.store.clone(),
        dispatcher,
        Arc::new(RandomTaskIdGenerator),
    );
    (controller, failures)
}

fn build_agent(config: &AppConfig, services: &PlatformServices) -> MeasurementAgent {
    let region = config.agent.region.clone();
    info!("执行端区域: {}", region);

    let completion = CompletionTracker::new(
        services.store.clone(),
        services.scheduler.clone(),
        &config.platform.project_id,
        &region,
    );
    MeasurementAgent::new(
        services.store.clone(),
        ProbeRegistry::from_config(&config.agent),
        completion,
        AgentSettings {
            region,
            max_sequence_attempts: config.agent.max_sequence_attempts,
        },
    )
}

async fn serve(
    name: &'static str,
    address: String,
    router: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("绑定地址失败: {address}"))?;
    info!("{}启动在 http://{}", name, address);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("{}收到关闭信号", name);
        })
        .await
        .with_context(|| format!("{name}运行失败"))?;

    info!("{}已停止", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("api".parse::<AppMode>().unwrap(), AppMode::Api);
        assert_eq!("agent".parse::<AppMode>().unwrap(), AppMode::Agent);
        assert_eq!("all".parse::<AppMode>().unwrap(), AppMode::All);
        assert!("worker".parse::<AppMode>().is_err());
        assert!(AppMode::All.runs_api() && AppMode::All.runs_agent());
        assert!(!AppMode::Agent.runs_api());
    }

    #[tokio::test]
    async fn test_api_mode_builds_only_api_router() {
        let app = Application::new(AppConfig::default(), AppMode::Api)
            .await
            .unwrap();
        assert!(app.api_router().is_some());
        assert!(app.agent_router().is_none());
    }

    #[tokio::test]
    async fn test_all_mode_builds_both_routers() {
        let app = Application::new(AppConfig::default(), AppMode::All)
            .await
            .unwrap();
        assert!(app.api_router().is_some());
        assert!(app.agent_router().is_some());
    }

    #[tokio::test]
    async fn test_agent_mode_requires_enabled_agent() {
        assert!(Application::new(AppConfig::default(), AppMode::Agent)
            .await
            .is_err());
    }
}
