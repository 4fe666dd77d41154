use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::cron_utils::{CronSchedule, DEFAULT_CRON_EXPRESSION};
use crate::errors::ScheduleField;
use crate::{MeasurementError, Result};

fn default_cron_expression() -> String {
    DEFAULT_CRON_EXPRESSION.to_string()
}

/// 任务调度时间
///
/// - `start_time`: 为空表示“尽快执行”
/// - `stop_time`: 为空表示一次性任务
/// - `cron_expression`: 5字段CRON表达式，默认每分钟一次
///
/// # 使用示例
///
/// ```rust
/// use measurement_core::models::{Schedule, TaskType};
///
/// let schedule = Schedule::parse("", "", "").unwrap();
/// assert_eq!(schedule.classify(), TaskType::OneOffAsap);
/// assert_eq!(schedule.cron_expression, "* * * * *");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default, deserialize_with = "deserialize_instant")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_instant")]
    pub stop_time: Option<DateTime<Utc>>,
    #[serde(
        default = "default_cron_expression",
        deserialize_with = "deserialize_cron"
    )]
    pub cron_expression: String,
}

/// 接受 `null`、空字符串或RFC3339时间
fn deserialize_instant<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

fn deserialize_cron<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw.as_deref().map(str::trim) {
        None | Some("") => default_cron_expression(),
        Some(value) => value.to_string(),
    })
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            start_time: None,
            stop_time: None,
            cron_expression: default_cron_expression(),
        }
    }
}

impl Schedule {
    /// 解析原始输入，空字符串视为未设置
    pub fn parse(start: &str, stop: &str, cron: &str) -> Result<Self> {
        let start_time = parse_instant(ScheduleField::Start, start)?;
        let stop_time = parse_instant(ScheduleField::Stop, stop)?;

        let cron = cron.trim();
        let cron_expression = if cron.is_empty() {
            default_cron_expression()
        } else {
            cron.to_string()
        };
        CronSchedule::validate_cron_expression(&cron_expression).map_err(|e| {
            MeasurementError::Parse {
                field: ScheduleField::Cron,
                value: cron_expression.clone(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            start_time,
            stop_time,
            cron_expression,
        })
    }

    /// 校验时间窗口：开始/结束时间不能早于当前时间，结束时间不能早于开始时间
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if let Some(start) = self.start_time {
            if start < now {
                return Err(MeasurementError::InvalidSchedule(format!(
                    "开始时间 {} 已经过去",
                    start.to_rfc3339()
                )));
            }
        }
        if let Some(stop) = self.stop_time {
            if stop < now {
                return Err(MeasurementError::InvalidSchedule(format!(
                    "结束时间 {} 已经过去",
                    stop.to_rfc3339()
                )));
            }
        }
        if let (Some(start), Some(stop)) = (self.start_time, self.stop_time) {
            if stop < start {
                return Err(MeasurementError::InvalidSchedule(format!(
                    "结束时间 {} 早于开始时间 {}",
                    stop.to_rfc3339(),
                    start.to_rfc3339()
                )));
            }
        }
        Ok(())
    }

    pub fn classify(&self) -> TaskType {
        TaskType::classify(self.start_time.is_some(), self.stop_time.is_some())
    }

    pub fn cron(&self) -> Result<CronSchedule> {
        CronSchedule::parse(&self.cron_expression)
    }

    pub fn starts_after(&self, now: DateTime<Utc>) -> bool {
        self.start_time.is_some_and(|start| start > now)
    }

    /// 结束时间未设置或已到达
    pub fn window_closed(&self, now: DateTime<Utc>) -> bool {
        self.stop_time.is_none_or(|stop| stop <= now)
    }
}

fn parse_instant(field: ScheduleField, raw: &str) -> Result<Option<DateTime<Utc>>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| MeasurementError::Parse {
            field,
            value: raw.to_string(),
            message: e.to_string(),
        })
}

/// 任务的时间类型，由开始/结束时间是否设置推导
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "one-off_as-soon-as-possible")]
    OneOffAsap,
    #[serde(rename = "one-off_scheduled")]
    OneOffScheduled,
    #[serde(rename = "recurring_as-soon-as-possible")]
    RecurringAsap,
    #[serde(rename = "recurring_scheduled")]
    RecurringScheduled,
}

impl TaskType {
    pub fn classify(has_start: bool, has_stop: bool) -> Self {
        match (has_start, has_stop) {
            (false, false) => TaskType::OneOffAsap,
            (true, false) => TaskType::OneOffScheduled,
            (false, true) => TaskType::RecurringAsap,
            (true, true) => TaskType::RecurringScheduled,
        }
    }

    /// 只有“一次性+尽快执行”的任务不经过外部调度器
    pub fn uses_scheduler(&self) -> bool {
        !matches!(self, TaskType::OneOffAsap)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::OneOffAsap => "one-off_as-soon-as-possible",
            TaskType::OneOffScheduled => "one-off_scheduled",
            TaskType::RecurringAsap => "recurring_as-soon-as-possible",
            TaskType::RecurringScheduled => "recurring_scheduled",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = MeasurementError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one-off_as-soon-as-possible" => Ok(TaskType::OneOffAsap),
            "one-off_scheduled" => Ok(TaskType::OneOffScheduled),
            "recurring_as-soon-as-possible" => Ok(TaskType::RecurringAsap),
            "recurring_scheduled" => Ok(TaskType::RecurringScheduled),
            other => Err(MeasurementError::Serialization(format!(
                "未知的任务类型: {other}"
            ))),
        }
    }
}
