use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use measurement_core::traits::TRACE_CONTEXT_HEADER;

use crate::routes::AppState;

/// 请求携带的追踪上下文
///
/// `header` 为原始 `X-Cloud-Trace-Context` 值，分发时原样透传；
/// `trace` 为日志使用的 `projects/{project}/traces/{traceId}`。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    header: Option<String>,
    trace: Option<String>,
}

impl TraceContext {
    pub fn from_header(project_id: &str, header: Option<&str>) -> Self {
        let header = header.map(str::trim).filter(|h| !h.is_empty());
        let trace = header
            .and_then(|h| h.split('/').next())
            .filter(|id| !id.is_empty())
            .map(|id| format!("projects/{project_id}/traces/{id}"));

        Self {
            header: header.map(str::to_string),
            trace,
        }
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    pub fn trace(&self) -> &str {
        self.trace.as_deref().unwrap_or("")
    }
}

impl FromRequestParts<AppState> for TraceContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(TRACE_CONTEXT_HEADER)
            .and_then(|v| v.to_str().ok());
        Ok(Self::from_header(&state.project_id, header))
    }
}
