//! 任务分发：向每个区域并发扇出一个分发单元，等待全部完成后汇总结果
//!
//! 成功与失败分别通过两个无界通道收集；所有单元结束（屏障）后才关闭通道并统计。
//! 只要有一个区域成功，分发即视为成功，完整的错误列表总是返回给调用方。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use measurement_core::models::TaskType;
use measurement_core::traits::{
    job_name, measurements_url, AgentInvoker, HttpTarget, InvocationRequest, JobScheduler, JobSpec,
    MeasurementInvocation, OidcToken, RetryPolicy, ServiceResolver, TokenProvider,
};
use measurement_core::{RegionError, Result, TaskMetadata};

/// 分发所需的平台参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub project_id: String,
    pub service_account_email: String,
    pub attempt_deadline: Duration,
    pub retry_policy: RetryPolicy,
}

impl DispatchSettings {
    pub fn new(project_id: impl Into<String>, service_account_email: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            service_account_email: service_account_email.into(),
            attempt_deadline: Duration::from_secs(180),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// 分发汇总结果
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub successes: Vec<String>,
    pub errors: Vec<RegionError>,
}

impl DispatchOutcome {
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn is_success(&self) -> bool {
        !self.successes.is_empty()
    }
}

/// 脱离等待的调用失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedFailure {
    pub task_id: String,
    pub region: String,
    pub message: String,
}

pub type DetachedFailureSender = mpsc::UnboundedSender<DetachedFailure>;
pub type DetachedFailureReceiver = mpsc::UnboundedReceiver<DetachedFailure>;

pub fn reaper_channel() -> (DetachedFailureSender, DetachedFailureReceiver) {
    mpsc::unbounded_channel()
}

/// 后台回收脱离等待的调用错误，直到所有发送端关闭
pub async fn run_reaper(mut failures: DetachedFailureReceiver) {
    while let Some(failure) = failures.recv().await {
        warn!(
            task_id = %failure.task_id,
            region = %failure.region,
            "执行端异步调用失败: {}",
            failure.message
        );
        metrics::counter!(
            "measurement_detached_invocation_failures_total",
            "region" => failure.region
        )
        .increment(1);
    }
    debug!("异步调用错误回收器退出");
}

#[derive(Clone)]
pub struct Dispatcher {
    resolver: Arc<dyn ServiceResolver>,
    tokens: Arc<dyn TokenProvider>,
    scheduler: Arc<dyn JobScheduler>,
    invoker: Arc<dyn AgentInvoker>,
    settings: Arc<DispatchSettings>,
    failures: DetachedFailureSender,
}

impl Dispatcher {
    pub fn new(
        resolver: Arc<dyn ServiceResolver>,
        tokens: Arc<dyn TokenProvider>,
        scheduler: Arc<dyn JobScheduler>,
        invoker: Arc<dyn AgentInvoker>,
        settings: DispatchSettings,
        failures: DetachedFailureSender,
    ) -> Self {
        Self {
            resolver,
            tokens,
            scheduler,
            invoker,
            settings: Arc::new(settings),
            failures,
        }
    }

    pub fn job_name(&self, region: &str, task_id: &str) -> String {
        job_name(&self.settings.project_id, region, task_id)
    }

    /// 向任务的所有区域扇出分发
    pub async fn dispatch(
        &self,
        task: &TaskMetadata,
        trace_context: Option<&str>,
    ) -> DispatchOutcome {
        let (error_tx, mut error_rx) = mpsc::unbounded_channel::<RegionError>();
        let (success_tx, mut success_rx) = mpsc::unbounded_channel::<String>();

        let mut handles = Vec::with_capacity(task.vantage_points.len());
        for region in &task.vantage_points {
            let this = self.clone();
            let unit = DispatchUnit {
                task_id: task.id.clone(),
                task_type: task.task_type,
                cron_expression: task.schedule.cron_expression.clone(),
                region: region.clone(),
                trace_context: trace_context.map(str::to_string),
            };
            let error_tx = error_tx.clone();
            let success_tx = success_tx.clone();
            let handle = tokio::spawn(async move {
                let region = unit.region.clone();
                match this.run_unit(unit).await {
                    Ok(()) => {
                        let _ = success_tx.send(region);
                    }
                    Err(e) => {
                        let _ = error_tx.send(RegionError::new(region, e.to_string()));
                    }
                }
            });
            handles.push((region.clone(), handle));
        }

        for (region, handle) in handles {
            if let Err(e) = handle.await {
                let _ = error_tx.send(RegionError::new(region, format!("分发单元异常终止: {e}")));
            }
        }
        drop(error_tx);
        drop(success_tx);

        let mut outcome = DispatchOutcome::default();
        while let Some(region) = success_rx.recv().await {
            outcome.successes.push(region);
        }
        while let Some(error) = error_rx.recv().await {
            warn!(task_id = %task.id, region = %error.region, "区域分发失败: {}", error.message);
            metrics::counter!("measurement_dispatch_errors_total").increment(1);
            outcome.errors.push(error);
        }

        info!(
            task_id = %task.id,
            "任务分发完成: 成功 {} 个区域，失败 {} 个区域",
            outcome.success_count(),
            outcome.errors.len()
        );
        outcome
    }

    async fn run_unit(&self, unit: DispatchUnit) -> Result<()> {
        let uri = self.resolver.resolve(&unit.region).await?;

        if unit.task_type == TaskType::OneOffAsap {
            let bearer_token = self.tokens.identity_token(&uri).await?;
            let request = InvocationRequest {
                region: unit.region,
                url: measurements_url(&uri),
                task_id: unit.task_id,
                bearer_token,
                trace_context: unit.trace_context,
            };
            self.spawn_detached(request);
        } else {
            let job = self.job_spec(&unit, &uri)?;
            self.scheduler.create_job(&job).await?;
            debug!(task_id = %unit.task_id, region = %unit.region, "已创建周期作业: {}", job.name);
        }
        Ok(())
    }

    /// 不等待执行端完成处理，失败交给回收器
    fn spawn_detached(&self, request: InvocationRequest) {
        let invoker = Arc::clone(&self.invoker);
        let failures = self.failures.clone();
        tokio::spawn(async move {
            if let Err(e) = invoker.invoke(&request).await {
                let _ = failures.send(DetachedFailure {
                    task_id: request.task_id,
                    region: request.region,
                    message: e.to_string(),
                });
            }
        });
    }

    fn job_spec(&self, unit: &DispatchUnit, uri: &str) -> Result<JobSpec> {
        let body = serde_json::to_string(&MeasurementInvocation {
            id: unit.task_id.clone(),
        })?;
        let headers =
            BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]);

        Ok(JobSpec {
            name: self.job_name(&unit.region, &unit.task_id),
            http_target: HttpTarget {
                uri: measurements_url(uri),
                http_method: "POST".to_string(),
                headers,
                body,
                oidc_token: Some(OidcToken {
                    service_account_email: self.settings.service_account_email.clone(),
                    audience: uri.to_string(),
                }),
            },
            schedule: unit.cron_expression.clone(),
            time_zone: "UTC".to_string(),
            retry_policy: self.settings.retry_policy.clone(),
            attempt_deadline: self.settings.attempt_deadline,
        })
    }

    /// 并发删除任务在所有区域的周期作业，返回每个失败区域的错误
    pub async fn delete_jobs(&self, task: &TaskMetadata) -> Vec<RegionError> {
        let mut handles = Vec::with_capacity(task.vantage_points.len());
        for region in &task.vantage_points {
            let scheduler = Arc::clone(&self.scheduler);
            let name = self.job_name(region, &task.id);
            handles.push((
                region.clone(),
                tokio::spawn(async move { scheduler.delete_job(&name).await }),
            ));
        }

        let mut errors = Vec::new();
        for (region, handle) in handles {
            match handle.await {
                Ok(Ok(true)) => debug!(task_id = %task.id, region = %region, "周期作业已删除"),
                Ok(Ok(false)) => debug!(task_id = %task.id, region = %region, "周期作业不存在，视为已删除"),
                Ok(Err(e)) => errors.push(RegionError::new(region, e.to_string())),
                Err(e) => errors.push(RegionError::new(region, format!("删除单元异常终止: {e}"))),
            }
        }
        errors
    }
}

struct DispatchUnit {
    task_id: String,
    task_type: TaskType,
    cron_expression: String,
    region: String,
    trace_context: Option<String>,
}
