use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use measurement_core::traits::{JobScheduler, JobSpec, TokenProvider};
use measurement_core::{MeasurementError, Result};

fn seconds(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// 作业名 `projects/{p}/locations/{r}/jobs/{id}` 的父路径
fn parent_of(name: &str) -> Result<&str> {
    name.rsplit_once("/jobs/")
        .map(|(parent, _)| parent)
        .ok_or_else(|| MeasurementError::Validation(format!("无效的作业名称: {name}")))
}

/// Cloud Scheduler REST 请求体
pub fn job_body(job: &JobSpec) -> Value {
    let target = &job.http_target;
    let mut http_target = json!({
        "uri": target.uri,
        "httpMethod": target.http_method,
        "headers": target.headers,
        "body": STANDARD.encode(target.body.as_bytes()),
    });
    if let Some(oidc) = &target.oidc_token {
        http_target["oidcToken"] = json!({
            "serviceAccountEmail": oidc.service_account_email,
            "audience": oidc.audience,
        });
    }

    let retry = &job.retry_policy;
    json!({
        "name": job.name,
        "schedule": job.schedule,
        "timeZone": job.time_zone,
        "httpTarget": http_target,
        "retryConfig": {
            "retryCount": retry.retry_count,
            "maxRetryDuration": seconds(retry.max_retry_duration),
            "minBackoffDuration": seconds(retry.min_backoff_duration),
            "maxBackoffDuration": seconds(retry.max_backoff_duration),
            "maxDoublings": retry.max_doublings,
        },
        "attemptDeadline": seconds(job.attempt_deadline),
    })
}

/// Cloud Scheduler 兼容的REST客户端
pub struct CloudSchedulerClient {
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
    http_client: reqwest::Client,
}

impl CloudSchedulerClient {
    pub fn new(
        endpoint: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tokens,
            http_client,
        }
    }

    async fn authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(match self.tokens.access_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }
}

#[async_trait]
impl JobScheduler for CloudSchedulerClient {
    async fn create_job(&self, job: &JobSpec) -> Result<()> {
        let url = format!("{}/v1/{}/jobs", self.endpoint, parent_of(&job.name)?);
        let request = self.authorized(self.http_client.post(&url)).await?;

        let response = request
            .json(&job_body(job))
            .send()
            .await
            .map_err(|e| MeasurementError::dependency("scheduler.create_job", e))?;

        let status = response.status();
        if status.is_success() {
            info!("已创建调度作业: {}", job.name);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            error!("创建调度作业失败: {} HTTP {} - {}", job.name, status, body);
            Err(MeasurementError::dependency(
                "scheduler.create_job",
                format!("HTTP {status} - {body}"),
            ))
        }
    }

    async fn delete_job(&self, name: &str) -> Result<bool> {
        let url = format!("{}/v1/{}", self.endpoint, name);
        let request = self.authorized(self.http_client.delete(&url)).await?;

        let response = request
            .send()
            .await
            .map_err(|e| MeasurementError::dependency("scheduler.delete_job", e))?;

        match response.status() {
            status if status.is_success() => {
                info!("已删除调度作业: {}", name);
                Ok(true)
            }
            StatusCode::NOT_FOUND => {
                debug!("调度作业不存在: {}", name);
                Ok(false)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                error!("删除调度作业失败: {} HTTP {} - {}", name, status, body);
                Err(MeasurementError::dependency(
                    "scheduler.delete_job",
                    format!("HTTP {status} - {body}"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use measurement_core::traits::{HttpTarget, OidcToken, RetryPolicy};
    use std::collections::BTreeMap;

    #[test]
    fn test_job_body_shape() {
        let job = JobSpec {
            name: "projects/p/locations/us/jobs/abc".to_string(),
            http_target: HttpTarget {
                uri: "https://us.example/api/v1/measurements".to_string(),
                http_method: "POST".to_string(),
                headers: BTreeMap::from([(
                    "Content-Type".to_string(),
                    "application/json".to_string(),
                )]),
                body: r#"{"id":"abc"}"#.to_string(),
                oidc_token: Some(OidcToken {
                    service_account_email: "sa@p.iam.gserviceaccount.com".to_string(),
                    audience: "https://us.example".to_string(),
                }),
            },
            schedule: "*/5 * * * *".to_string(),
            time_zone: "UTC".to_string(),
            retry_policy: RetryPolicy::default(),
            attempt_deadline: Duration::from_secs(180),
        };

        let body = job_body(&job);
        assert_eq!(body["timeZone"], "UTC");
        assert_eq!(body["attemptDeadline"], "180s");
        assert_eq!(body["retryConfig"]["minBackoffDuration"], "5s");
        assert_eq!(body["retryConfig"]["maxBackoffDuration"], "3600s");
        assert_eq!(body["retryConfig"]["maxDoublings"], 5);
        assert_eq!(body["httpTarget"]["body"], STANDARD.encode(r#"{"id":"abc"}"#));
        assert_eq!(
            body["httpTarget"]["oidcToken"]["audience"],
            "https://us.example"
        );
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(
            parent_of("projects/p/locations/us/jobs/abc").unwrap(),
            "projects/p/locations/us"
        );
        assert!(parent_of("bogus").is_err());
    }
}
