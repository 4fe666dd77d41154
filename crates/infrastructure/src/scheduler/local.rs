use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use measurement_core::traits::{HttpTarget, JobScheduler, JobSpec, TokenProvider};
use measurement_core::{CronSchedule, MeasurementError, Result};

struct LocalJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LocalJob {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

/// 进程内CRON调度器
///
/// 每个作业对应一个tokio任务：休眠到下一个触发时间，然后按作业定义发起HTTP调用。
/// 删除作业只停止后续触发，已经发出的调用继续执行到结束。
pub struct LocalJobScheduler {
    jobs: Mutex<HashMap<String, LocalJob>>,
    tokens: Arc<dyn TokenProvider>,
    http_client: reqwest::Client,
}

impl LocalJobScheduler {
    pub fn new(tokens: Arc<dyn TokenProvider>, http_client: reqwest::Client) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            tokens,
            http_client,
        }
    }

    pub async fn job_names(&self) -> Vec<String> {
        let mut jobs = self.jobs.lock().await;
        jobs.retain(|_, job| job.is_live());
        jobs.keys().cloned().collect()
    }

    /// 关闭时停止所有作业
    pub async fn abort_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for (name, job) in jobs.drain() {
            debug!("停止本地作业: {}", name);
            job.cancel.cancel();
        }
    }

    async fn run_job(
        name: String,
        schedule: CronSchedule,
        target: HttpTarget,
        tokens: Arc<dyn TokenProvider>,
        http_client: reqwest::Client,
        cancel: CancellationToken,
    ) {
        let target = Arc::new(target);
        loop {
            let now = Utc::now();
            let Some(next) = schedule.next_execution_time(now) else {
                info!("本地作业 {} 没有后续触发时间，结束", name);
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("本地作业 {} 已停止", name);
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            debug!("触发本地作业: {}", name);
            // 调用与作业循环分离，删除作业不会中断正在进行的测量
            let name = name.clone();
            let target = target.clone();
            let tokens = tokens.clone();
            let http_client = http_client.clone();
            tokio::spawn(async move {
                if let Err(e) = fire(&target, tokens.as_ref(), &http_client).await {
                    warn!("本地作业 {} 调用失败: {}", name, e);
                }
            });
        }
    }
}

async fn fire(
    target: &HttpTarget,
    tokens: &dyn TokenProvider,
    http_client: &reqwest::Client,
) -> Result<()> {
    let method = reqwest::Method::from_bytes(target.http_method.as_bytes())
        .map_err(|e| MeasurementError::Validation(format!("无效的HTTP方法: {e}")))?;
    let mut request = http_client
        .request(method, &target.uri)
        .body(target.body.clone());
    for (key, value) in &target.headers {
        request = request.header(key, value);
    }
    if let Some(oidc) = &target.oidc_token {
        if let Some(token) = tokens.identity_token(&oidc.audience).await? {
            request = request.bearer_auth(token);
        }
    }

    let response = request
        .send()
        .await
        .map_err(|e| MeasurementError::dependency("local_scheduler.fire", e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(MeasurementError::dependency(
            "local_scheduler.fire",
            format!("HTTP {status}"),
        ));
    }
    Ok(())
}

#[async_trait]
impl JobScheduler for LocalJobScheduler {
    async fn create_job(&self, job: &JobSpec) -> Result<()> {
        let schedule = CronSchedule::parse(&job.schedule)?;

        let mut jobs = self.jobs.lock().await;
        if jobs.get(&job.name).is_some_and(LocalJob::is_live) {
            return Err(MeasurementError::Conflict(format!("作业 {}", job.name)));
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::run_job(
            job.name.clone(),
            schedule,
            job.http_target.clone(),
            self.tokens.clone(),
            self.http_client.clone(),
            cancel.clone(),
        ));
        jobs.insert(job.name.clone(), LocalJob { cancel, handle });
        info!("已创建本地作业: {} ({})", job.name, job.schedule);
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<bool> {
        match self.jobs.lock().await.remove(name) {
            Some(job) => {
                let live = job.is_live();
                job.cancel.cancel();
                info!("已删除本地作业: {}", name);
                Ok(live)
            }
            None => {
                debug!("本地作业不存在: {}", name);
                Ok(false)
            }
        }
    }
}

impl Drop for LocalJobScheduler {
    fn drop(&mut self) {
        for (_, job) in self.jobs.get_mut().drain() {
            job.cancel.cancel();
        }
    }
}
