//! Test data builders for creating test entities

use chrono::{DateTime, Utc};
use measurement_core::models::{Probe, Schedule, TaskMetadata, TaskStatus};

/// Builder for creating test TaskMetadata entities
pub struct TaskBuilder {
    task: TaskMetadata,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        let schedule = Schedule::default();
        Self {
            task: TaskMetadata {
                id: id.to_string(),
                vantage_points: vec!["us".to_string()],
                probe: Probe::Ping,
                arguments: "127.0.0.1".to_string(),
                task_type: schedule.classify(),
                schedule,
                status: TaskStatus::Scheduled,
                number_of_sequence: [("us".to_string(), 0)].into_iter().collect(),
            },
        }
    }

    /// 设置区域并把计数器重置为0
    pub fn with_vantage_points(mut self, regions: &[&str]) -> Self {
        self.task.vantage_points = regions.iter().map(|r| r.to_string()).collect();
        self.task.number_of_sequence = regions.iter().map(|r| (r.to_string(), 0)).collect();
        self
    }

    pub fn with_probe(mut self, probe: Probe, arguments: &str) -> Self {
        self.task.probe = probe;
        self.task.arguments = arguments.to_string();
        self
    }

    /// 设置时间窗口并重新推导任务类型
    pub fn with_window(
        mut self,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
    ) -> Self {
        self.task.schedule.start_time = start_time;
        self.task.schedule.stop_time = stop_time;
        self.task.task_type = self.task.schedule.classify();
        self
    }

    pub fn with_cron(mut self, cron_expression: &str) -> Self {
        self.task.schedule.cron_expression = cron_expression.to_string();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_sequence(mut self, region: &str, value: u64) -> Self {
        self.task.number_of_sequence.insert(region.to_string(), value);
        self
    }

    pub fn build(self) -> TaskMetadata {
        self.task
    }
}
