//! # 数据模型
//!
//! 测量任务的核心数据结构：
//!
//! - [`Schedule`] / [`TaskType`]：调度时间窗口与由此推导的任务类型
//! - [`TaskMetadata`] / [`TaskStatus`]：任务记录及其状态机
//! - [`MeasurementResult`]：某区域某一次执行的探测输出
//!
//! 所有时间字段统一使用 `DateTime<Utc>`，线上格式为 camelCase JSON。

pub mod measurement;
pub mod schedule;
pub mod task;

pub use measurement::*;
pub use schedule::*;
pub use task::*;
