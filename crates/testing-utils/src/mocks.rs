//! Mock implementations for all store and transport traits
//!
//! In-memory doubles with failure injection, recording every call so tests
//! can assert on what the orchestrator asked its collaborators to do.

use async_trait::async_trait;
use measurement_core::models::{MeasurementResult, TaskMetadata};
use measurement_core::traits::{
    apply_updates, AgentInvoker, FieldUpdate, InvocationRequest, JobScheduler, JobSpec,
    Precondition, ServiceResolver, TaskStore, TokenProvider,
};
use measurement_core::{MeasurementError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

fn injected(operation: &str) -> MeasurementError {
    MeasurementError::dependency(operation, "injected failure")
}

/// 从 `projects/{p}/locations/{region}/jobs/{id}` 中取出区域
pub fn region_of_job(name: &str) -> Option<&str> {
    name.split('/').nth(3)
}

/// Mock implementation of TaskStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockTaskStore {
    tasks: Arc<Mutex<HashMap<String, TaskMetadata>>>,
    results: Arc<Mutex<HashMap<String, BTreeMap<String, BTreeMap<u64, MeasurementResult>>>>>,
    failing_operations: Arc<Mutex<HashSet<String>>>,
    update_log: Arc<Mutex<Vec<(String, Vec<FieldUpdate>)>>>,
}

impl MockTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<TaskMetadata>) -> Self {
        let store = Self::new();
        {
            let mut map = store.tasks.lock().unwrap();
            for task in tasks {
                map.insert(task.id.clone(), task);
            }
        }
        store
    }

    /// 让指定操作（get / exists / create / update / list_regions / list_results / insert_result）失败
    pub fn fail_on(&self, operation: &str) {
        self.failing_operations
            .lock()
            .unwrap()
            .insert(operation.to_string());
    }

    pub fn recover(&self, operation: &str) {
        self.failing_operations.lock().unwrap().remove(operation);
    }

    pub fn task(&self, id: &str) -> Option<TaskMetadata> {
        self.tasks.lock().unwrap().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn results_of(&self, id: &str, region: &str) -> Vec<MeasurementResult> {
        self.results
            .lock()
            .unwrap()
            .get(id)
            .and_then(|regions| regions.get(region))
            .map(|results| results.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 所有成功写入的字段更新，按顺序
    pub fn applied_updates(&self) -> Vec<(String, Vec<FieldUpdate>)> {
        self.update_log.lock().unwrap().clone()
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.failing_operations.lock().unwrap().contains(operation) {
            return Err(injected(&format!("store.{operation}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn get(&self, id: &str) -> Result<Option<TaskMetadata>> {
        self.check("get")?;
        Ok(self.task(id))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.check("exists")?;
        Ok(self.tasks.lock().unwrap().contains_key(id))
    }

    async fn create(&self, task: &TaskMetadata) -> Result<()> {
        self.check("create")?;
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(&task.id) {
            return Err(MeasurementError::Conflict(format!("任务 {}", task.id)));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update_fields(&self, id: &str, updates: &[FieldUpdate]) -> Result<()> {
        self.check("update")?;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| MeasurementError::task_not_found(id))?;
        apply_updates(task, updates);
        self.update_log
            .lock()
            .unwrap()
            .push((id.to_string(), updates.to_vec()));
        Ok(())
    }

    async fn update_fields_if(
        &self,
        id: &str,
        precondition: &Precondition,
        updates: &[FieldUpdate],
    ) -> Result<bool> {
        self.check("update")?;
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| MeasurementError::task_not_found(id))?;
        if !precondition.holds(task) {
            return Ok(false);
        }
        apply_updates(task, updates);
        self.update_log
            .lock()
            .unwrap()
            .push((id.to_string(), updates.to_vec()));
        Ok(true)
    }

    async fn list_regions(&self, id: &str) -> Result<Vec<String>> {
        self.check("list_regions")?;
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(id)
            .map(|regions| regions.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_results(&self, id: &str, region: &str) -> Result<Vec<MeasurementResult>> {
        self.check("list_results")?;
        Ok(self.results_of(id, region))
    }

    async fn insert_result(&self, id: &str, result: &MeasurementResult) -> Result<()> {
        self.check("insert_result")?;
        let mut results = self.results.lock().unwrap();
        let region = results
            .entry(id.to_string())
            .or_default()
            .entry(result.region.clone())
            .or_default();
        if region.contains_key(&result.sequence) {
            return Err(MeasurementError::Conflict(format!(
                "{}/{}/{}",
                id, result.region, result.sequence
            )));
        }
        region.insert(result.sequence, result.clone());
        Ok(())
    }
}

/// Mock implementation of JobScheduler for testing
#[derive(Debug, Clone, Default)]
pub struct MockJobScheduler {
    created: Arc<Mutex<Vec<JobSpec>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    live_jobs: Arc<Mutex<HashSet<String>>>,
    failing_regions: Arc<Mutex<HashSet<String>>>,
}

impl MockJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该区域的创建与删除都返回错误
    pub fn fail_region(&self, region: &str) {
        self.failing_regions
            .lock()
            .unwrap()
            .insert(region.to_string());
    }

    /// 预置一个已存在的作业
    pub fn seed_job(&self, name: &str) {
        self.live_jobs.lock().unwrap().insert(name.to_string());
    }

    pub fn created_jobs(&self) -> Vec<JobSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn live_jobs(&self) -> HashSet<String> {
        self.live_jobs.lock().unwrap().clone()
    }

    fn check(&self, operation: &str, name: &str) -> Result<()> {
        let failing = self.failing_regions.lock().unwrap();
        match region_of_job(name) {
            Some(region) if failing.contains(region) => {
                Err(injected(&format!("scheduler.{operation}")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl JobScheduler for MockJobScheduler {
    async fn create_job(&self, job: &JobSpec) -> Result<()> {
        self.check("create_job", &job.name)?;
        self.created.lock().unwrap().push(job.clone());
        self.live_jobs.lock().unwrap().insert(job.name.clone());
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<bool> {
        self.check("delete_job", name)?;
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(self.live_jobs.lock().unwrap().remove(name))
    }
}

/// Mock implementation of ServiceResolver: `https://{region}.measurer.test`
#[derive(Debug, Clone, Default)]
pub struct MockServiceResolver {
    failing_regions: Arc<Mutex<HashSet<String>>>,
}

impl MockServiceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_region(&self, region: &str) {
        self.failing_regions
            .lock()
            .unwrap()
            .insert(region.to_string());
    }

    pub fn uri_for(region: &str) -> String {
        format!("https://{region}.measurer.test")
    }
}

#[async_trait]
impl ServiceResolver for MockServiceResolver {
    async fn resolve(&self, region: &str) -> Result<String> {
        if self.failing_regions.lock().unwrap().contains(region) {
            return Err(injected("resolver.resolve"));
        }
        Ok(Self::uri_for(region))
    }
}

/// Mock implementation of TokenProvider
#[derive(Debug, Clone, Default)]
pub struct MockTokenProvider {
    failing: Arc<Mutex<bool>>,
}

impl MockTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn identity_token(&self, audience: &str) -> Result<Option<String>> {
        if *self.failing.lock().unwrap() {
            return Err(injected("token.identity"));
        }
        Ok(Some(format!("id-token:{audience}")))
    }

    async fn access_token(&self) -> Result<Option<String>> {
        if *self.failing.lock().unwrap() {
            return Err(injected("token.access"));
        }
        Ok(Some("access-token".to_string()))
    }
}

/// Mock implementation of AgentInvoker
#[derive(Debug, Clone, Default)]
pub struct MockAgentInvoker {
    invocations: Arc<Mutex<Vec<InvocationRequest>>>,
    failing_regions: Arc<Mutex<HashSet<String>>>,
}

impl MockAgentInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_region(&self, region: &str) {
        self.failing_regions
            .lock()
            .unwrap()
            .insert(region.to_string());
    }

    pub fn invocations(&self) -> Vec<InvocationRequest> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentInvoker for MockAgentInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<()> {
        self.invocations.lock().unwrap().push(request.clone());
        if self.failing_regions.lock().unwrap().contains(&request.region) {
            return Err(injected("agent.invoke"));
        }
        Ok(())
    }
}
