use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::{Schedule, TaskType};
use crate::{MeasurementError, Result};

/// 区域 → 已完成执行次数
pub type SequenceCounters = BTreeMap<String, u64>;

/// 探测类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Probe {
    Ping,
    Traceroute,
    Curl,
    Httpstat,
    /// 无法识别的探测类型，执行端视为空操作
    #[serde(other)]
    Unknown,
}

impl Probe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Probe::Ping => "ping",
            Probe::Traceroute => "traceroute",
            Probe::Curl => "curl",
            Probe::Httpstat => "httpstat",
            Probe::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Probe::Unknown)
    }
}

impl std::fmt::Display for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Probe {
    type Err = MeasurementError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ping" => Ok(Probe::Ping),
            "traceroute" => Ok(Probe::Traceroute),
            "curl" => Ok(Probe::Curl),
            "httpstat" => Ok(Probe::Httpstat),
            other => Err(MeasurementError::Validation(format!(
                "不支持的探测类型: {other}，支持: ping, traceroute, curl, httpstat"
            ))),
        }
    }
}

/// httpstat 的参数必须是 http/https URL
pub fn validate_httpstat_arguments(arguments: &str) -> Result<()> {
    let arguments = arguments.trim();
    if arguments.starts_with("http://") || arguments.starts_with("https://") {
        Ok(())
    } else {
        Err(MeasurementError::Validation(
            "参数必须是以 'http://' 或 'https://' 开头的URL".to_string(),
        ))
    }
}

/// 任务状态
///
/// ```text
/// scheduled → running → finished
///     ↓          ↓
///   failed    cancelled
/// ```
///
/// `scheduled` 也可以直接进入 `cancelled`。终止状态之后不再有任何转换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Scheduled,
    Running,
    Finished,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Finished => "finished",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Scheduled, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Finished)
                | (TaskStatus::Scheduled, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Cancelled)
                | (TaskStatus::Scheduled, TaskStatus::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = MeasurementError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(TaskStatus::Scheduled),
            "running" => Ok(TaskStatus::Running),
            "finished" => Ok(TaskStatus::Finished),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(MeasurementError::Serialization(format!(
                "未知的任务状态: {other}"
            ))),
        }
    }
}

/// 客户端提交的任务请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub vantage_points: Vec<String>,
    pub probe: Probe,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub schedule: Schedule,
}

impl CreateTaskRequest {
    /// 校验请求字段，不访问任何外部资源
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.vantage_points.iter().all(|v| v.trim().is_empty()) {
            return Err(MeasurementError::Validation(
                "vantagePoints 不能为空".to_string(),
            ));
        }
        if !self.probe.is_known() {
            return Err(MeasurementError::Validation(
                "不支持的探测类型，支持: ping, traceroute, curl, httpstat".to_string(),
            ));
        }
        if self.probe == Probe::Httpstat {
            validate_httpstat_arguments(&self.arguments)?;
        }
        self.schedule.cron().map_err(|e| MeasurementError::Parse {
            field: crate::errors::ScheduleField::Cron,
            value: self.schedule.cron_expression.clone(),
            message: e.to_string(),
        })?;
        self.schedule.validate(now)
    }
}

/// 任务元数据，任务状态与调度信息的唯一来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub id: String,
    pub vantage_points: Vec<String>,
    pub probe: Probe,
    pub arguments: String,
    pub schedule: Schedule,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub number_of_sequence: SequenceCounters,
}

impl TaskMetadata {
    /// 由请求构建新任务：去重区域、推导类型、计数器清零
    pub fn from_request(id: impl Into<String>, request: CreateTaskRequest) -> Self {
        let mut vantage_points: Vec<String> = Vec::with_capacity(request.vantage_points.len());
        for vp in request.vantage_points {
            let vp = vp.trim().to_string();
            if !vp.is_empty() && !vantage_points.contains(&vp) {
                vantage_points.push(vp);
            }
        }
        let number_of_sequence = vantage_points.iter().map(|vp| (vp.clone(), 0)).collect();
        let task_type = request.schedule.classify();

        Self {
            id: id.into(),
            vantage_points,
            probe: request.probe,
            arguments: request.arguments.trim().to_string(),
            schedule: request.schedule,
            task_type,
            status: TaskStatus::Scheduled,
            number_of_sequence,
        }
    }

    pub fn sequence_of(&self, region: &str) -> u64 {
        self.number_of_sequence.get(region).copied().unwrap_or(0)
    }
}
