use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use measurement_core::models::{MeasurementResult, TaskMetadata};
use measurement_core::traits::{apply_updates, FieldUpdate, Precondition, TaskStore};
use measurement_core::{MeasurementError, Result};

#[derive(Debug, Default)]
struct StoreState {
    tasks: HashMap<String, TaskMetadata>,
    /// 任务ID → 区域 → 序号 → 结果
    results: HashMap<String, BTreeMap<String, BTreeMap<u64, MeasurementResult>>>,
}

/// 内存任务存储，适用于单进程部署与测试
///
/// 所有读写在同一把锁下完成，条件更新天然原子。
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    state: RwLock<StoreState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, id: &str) -> Result<Option<TaskMetadata>> {
        Ok(self.state.read().await.tasks.get(id).cloned())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.state.read().await.tasks.contains_key(id))
    }

    async fn create(&self, task: &TaskMetadata) -> Result<()> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(MeasurementError::Conflict(format!("任务 {}", task.id)));
        }
        state.tasks.insert(task.id.clone(), task.clone());
        debug!("内存存储写入任务: {}", task.id);
        Ok(())
    }

    async fn update_fields(&self, id: &str, updates: &[FieldUpdate]) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| MeasurementError::task_not_found(id))?;
        apply_updates(task, updates);
        Ok(())
    }

    async fn update_fields_if(
        &self,
        id: &str,
        precondition: &Precondition,
        updates: &[FieldUpdate],
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| MeasurementError::task_not_found(id))?;
        if !precondition.holds(task) {
            return Ok(false);
        }
        apply_updates(task, updates);
        Ok(true)
    }

    async fn list_regions(&self, id: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .await
            .results
            .get(id)
            .map(|regions| regions.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_results(&self, id: &str, region: &str) -> Result<Vec<MeasurementResult>> {
        Ok(self
            .state
            .read()
            .await
            .results
            .get(id)
            .and_then(|regions| regions.get(region))
            .map(|by_sequence| by_sequence.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_result(&self, id: &str, result: &MeasurementResult) -> Result<()> {
        let mut state = self.state.write().await;
        let by_sequence = state
            .results
            .entry(id.to_string())
            .or_default()
            .entry(result.region.clone())
            .or_default();
        if by_sequence.contains_key(&result.sequence) {
            return Err(MeasurementError::Conflict(format!(
                "测量结果 {}/{}/{}",
                id, result.region, result.sequence
            )));
        }
        by_sequence.insert(result.sequence, result.clone());
        Ok(())
    }
}
