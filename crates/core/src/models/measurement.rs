use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskMetadata;

/// 单次测量结果，按 (任务ID, 区域, 序号) 唯一，写入后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementResult {
    pub measurement_start_time: DateTime<Utc>,
    pub measurement_stop_time: DateTime<Utc>,
    pub region: String,
    /// 区域内从1开始的执行序号
    pub sequence: u64,
    pub result: String,
}

/// 区域 → 序号 → 测量结果
pub type RegionResults = BTreeMap<String, BTreeMap<u64, MeasurementResult>>;

/// 任务元数据及其全部测量结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResults {
    #[serde(flatten)]
    pub metadata: TaskMetadata,
    pub results: RegionResults,
}

impl TaskResults {
    pub fn total_results(&self) -> usize {
        self.results.values().map(BTreeMap::len).sum()
    }
}
