use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use measurement_core::traits::{FieldUpdate, Precondition, TaskStore};
use measurement_core::{MeasurementError, MeasurementResult, Result, TaskMetadata, TaskStatus};

use crate::completion::CompletionTracker;
use crate::executors::ProbeRegistry;

/// 执行端配置
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub region: String,
    /// 结果序号冲突时的最大重试次数
    pub max_sequence_attempts: usize,
}

/// 单次调用的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// 任务已处于终止状态
    AlreadyFinished,
    /// 开始时间尚未到达
    NotYetStarted,
    /// 本区域已完成，无需再次执行
    AlreadyComplete,
    Measured(MeasurementResult),
}

impl AgentOutcome {
    pub fn message(&self) -> Option<&'static str> {
        match self {
            AgentOutcome::AlreadyFinished => Some("The measurement is finished"),
            AgentOutcome::NotYetStarted => Some("The start time is in the future"),
            AgentOutcome::AlreadyComplete => Some("The job is done"),
            AgentOutcome::Measured(_) => None,
        }
    }
}

/// 压测标记，来自调用URL的 `benchmark_id` / `benchmark_sequence` 查询参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BenchmarkTag {
    pub id: i64,
    pub sequence: i64,
}

/// 单次调用的耗时记录（毫秒时间戳），未执行探测时测量时间为空
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkRecord {
    pub beginning_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement_beginning_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement_ending_time: Option<i64>,
    pub ending_time: i64,
}

impl BenchmarkRecord {
    pub fn new(
        beginning: DateTime<Utc>,
        ending: DateTime<Utc>,
        outcome: Option<&AgentOutcome>,
    ) -> Self {
        let measured = match outcome {
            Some(AgentOutcome::Measured(result)) => Some(result),
            _ => None,
        };
        Self {
            beginning_time: beginning.timestamp_millis(),
            measurement_beginning_time: measured
                .map(|r| r.measurement_start_time.timestamp_millis()),
            measurement_ending_time: measured.map(|r| r.measurement_stop_time.timestamp_millis()),
            ending_time: ending.timestamp_millis(),
        }
    }
}

/// 区域执行端：每次调用执行一次探测并记录结果
#[derive(Clone)]
pub struct MeasurementAgent {
    store: Arc<dyn TaskStore>,
    probes: ProbeRegistry,
    completion: CompletionTracker,
    settings: AgentSettings,
}

impl MeasurementAgent {
    pub fn new(
        store: Arc<dyn TaskStore>,
        probes: ProbeRegistry,
        completion: CompletionTracker,
        settings: AgentSettings,
    ) -> Self {
        Self {
            store,
            probes,
            completion,
            settings,
        }
    }

    pub fn region(&self) -> &str {
        &self.settings.region
    }

    /// 处理一次调用
    ///
    /// 执行过程运行在独立的tokio任务中：调用方断开或请求超时后，
    /// 结果写入与完成判定仍会进行到底。
    pub async fn handle(&self, task_id: &str) -> Result<AgentOutcome> {
        self.handle_with_benchmark(task_id, BenchmarkTag::default()).await
    }

    /// 处理一次调用并输出 `component = "benchmark"` 的耗时日志
    pub async fn handle_with_benchmark(
        &self,
        task_id: &str,
        benchmark: BenchmarkTag,
    ) -> Result<AgentOutcome> {
        let beginning = Utc::now();
        let span = info_span!("measurement", task_id = %task_id, region = %self.settings.region);
        let agent = self.clone();
        let owned_id = task_id.to_string();
        let run = tokio::spawn(async move { agent.run_once(&owned_id).await }.instrument(span));

        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(MeasurementError::Internal(format!("测量任务被取消: {e}"))),
        };

        let record = BenchmarkRecord::new(beginning, Utc::now(), outcome.as_ref().ok());
        match serde_json::to_string(&record) {
            Ok(json) => info!(
                component = "benchmark",
                benchmark_id = benchmark.id,
                benchmark_sequence = benchmark.sequence,
                task_id = %task_id,
                "{}",
                json
            ),
            Err(e) => debug!("压测记录序列化失败: {}", e),
        }

        outcome
    }

    async fn run_once(&self, task_id: &str) -> Result<AgentOutcome> {
        let task = self.load(task_id).await?;

        if task.status.is_terminal() {
            debug!("任务已处于 {} 状态，跳过执行", task.status);
            self.completion.remove_region_job(&task).await;
            return Ok(AgentOutcome::AlreadyFinished);
        }

        let now = Utc::now();
        if task.schedule.starts_after(now) {
            debug!("开始时间尚未到达，跳过执行");
            return Ok(AgentOutcome::NotYetStarted);
        }

        if self.completion.evaluate(&task, now).await? {
            info!("本区域已完成，不再执行探测");
            return Ok(AgentOutcome::AlreadyComplete);
        }

        if task.status == TaskStatus::Scheduled {
            let started = self
                .store
                .update_fields_if(
                    task_id,
                    &Precondition::StatusIn(vec![TaskStatus::Scheduled]),
                    &[
                        FieldUpdate::StartTime(now),
                        FieldUpdate::Status(TaskStatus::Running),
                    ],
                )
                .await?;
            if started {
                info!("任务开始执行");
            }
        }

        let measurement_start_time = Utc::now();
        let timer = Instant::now();
        let output = self.probes.run(task.probe, &task.arguments).await;
        metrics::histogram!(
            "measurement_probe_duration_seconds",
            "probe" => task.probe.as_str()
        )
        .record(timer.elapsed().as_secs_f64());
        let output = output.inspect_err(|e| error!("探测执行失败: {}", e))?;

        let result = MeasurementResult {
            measurement_start_time,
            measurement_stop_time: Utc::now(),
            region: self.settings.region.clone(),
            sequence: 0,
            result: output,
        };
        let result = self.record_result(&task, result).await?;
        metrics::counter!("measurement_runs_total", "region" => self.settings.region.clone())
            .increment(1);

        let latest = self.load(task_id).await?;
        self.completion.evaluate(&latest, Utc::now()).await?;

        Ok(AgentOutcome::Measured(result))
    }

    /// 写入结果并推进本区域计数；序号被并发占用时顺延
    async fn record_result(
        &self,
        task: &TaskMetadata,
        mut result: MeasurementResult,
    ) -> Result<MeasurementResult> {
        let region = self.settings.region.clone();
        let mut sequence = task.sequence_of(&region) + 1;

        for attempt in 1..=self.settings.max_sequence_attempts {
            result.sequence = sequence;
            match self.store.insert_result(&task.id, &result).await {
                Ok(()) => {
                    let raised = self
                        .store
                        .update_fields_if(
                            &task.id,
                            &Precondition::SequenceBelow {
                                region: region.clone(),
                                value: sequence,
                            },
                            &[FieldUpdate::Sequence {
                                region: region.clone(),
                                value: sequence,
                            }],
                        )
                        .await?;
                    if !raised {
                        debug!("计数已被并发执行推进到 {} 之后", sequence);
                    }
                    info!("测量结果已记录，序号 {}", sequence);
                    return Ok(result);
                }
                Err(MeasurementError::Conflict(_)) => {
                    let current = self.load(&task.id).await?.sequence_of(&region);
                    warn!("序号 {} 已被占用 (第 {} 次)，当前计数 {}", sequence, attempt, current);
                    sequence = (sequence + 1).max(current + 1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(MeasurementError::Conflict(format!(
            "任务 {} 区域 {} 的结果序号在 {} 次尝试后仍冲突",
            task.id, region, self.settings.max_sequence_attempts
        )))
    }

    async fn load(&self, task_id: &str) -> Result<TaskMetadata> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| MeasurementError::task_not_found(task_id))
    }
}
