use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// 单个区域（vantage point）上的失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionError {
    pub region: String,
    pub message: String,
}

impl RegionError {
    pub fn new(region: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.region, self.message)
    }
}

/// 调度时间中出错的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleField {
    Start,
    Stop,
    Cron,
}

impl fmt::Display for ScheduleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleField::Start => "start",
            ScheduleField::Stop => "stop",
            ScheduleField::Cron => "cron",
        };
        f.write_str(name)
    }
}

/// 错误分类，决定对外的响应语义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    Dependency,
    PartialFailure,
    Conflict,
    Internal,
}

/// 测量系统错误类型定义
#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("时间字段解析失败 ({field}): {value} - {message}")]
    Parse {
        field: ScheduleField,
        value: String,
        message: String,
    },

    #[error("调度时间无效: {0}")]
    InvalidSchedule(String),

    #[error("无效的任务参数: {0}")]
    Validation(String),

    #[error("任务状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("无法生成唯一任务ID，已尝试 {attempts} 次")]
    IdExhausted { attempts: usize },

    #[error("依赖服务调用失败 ({operation}): {message}")]
    Dependency { operation: String, message: String },

    #[error("部分区域操作失败: {}", join_region_errors(.errors))]
    PartialFailure { errors: Vec<RegionError> },

    #[error("任务已创建, ID: '{id}'，但所有区域分发均失败: {}", join_region_errors(.errors))]
    DispatchFailed { id: String, errors: Vec<RegionError> },

    #[error("记录已存在: {0}")]
    Conflict(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("探测执行错误: {0}")]
    ProbeExecution(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

fn join_region_errors(errors: &[RegionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl MeasurementError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn dependency(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Dependency {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidCron { .. }
            | Self::Parse { .. }
            | Self::InvalidSchedule(_)
            | Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Database(_)
            | Self::Dependency { .. }
            | Self::Network(_)
            | Self::ProbeExecution(_) => ErrorKind::Dependency,
            Self::PartialFailure { .. } | Self::DispatchFailed { .. } => ErrorKind::PartialFailure,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::IdExhausted { .. }
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 校验类错误永远不应重试
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Dependency | ErrorKind::Conflict)
    }
}

impl From<serde_json::Error> for MeasurementError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, MeasurementError>;
