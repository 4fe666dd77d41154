pub mod config;
pub mod cron_utils;
pub mod errors;
pub mod models;
pub mod traits;

pub use cron_utils::{CronSchedule, DEFAULT_CRON_EXPRESSION};
pub use errors::*;
pub use models::{
    CreateTaskRequest, MeasurementResult, Probe, Schedule, SequenceCounters, TaskMetadata,
    TaskResults, TaskStatus, TaskType,
};
pub use traits::*;
