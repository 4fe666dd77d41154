//! HTTP耗时分解探测
//!
//! DNS解析、TCP连接、TLS握手分别手动计时，之后在已建立的连接上用hyper
//! 发送请求：收到响应头前为服务端处理时间，读取完响应体为内容传输时间。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::{ACCEPT, CONNECTION, HOST, USER_AGENT};
use hyper::Request;
use hyper_util::rt::TokioIo;
use measurement_core::models::validate_httpstat_arguments;
use measurement_core::{MeasurementError, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, warn};
use url::Url;

use crate::executors::ProbeExecutor;

/// 各阶段耗时
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpStatTimings {
    pub dns_lookup: Duration,
    pub tcp_connection: Duration,
    pub tls_handshake: Duration,
    pub server_processing: Duration,
    pub content_transfer: Duration,
    /// 响应状态码，不计入输出
    pub status: u16,
}
impl HttpStatTimings {
    pub fn render(&self) -> String {
        format!(
            "DNS lookup: {} ms\nTCP connection: {} ms\nTLS handshake: {} ms\nServer processing: {} ms\nContent transfer: {} ms\n",
            self.dns_lookup.as_millis(),
            self.tcp_connection.as_millis(),
            self.tls_handshake.as_millis(),
            self.server_processing.as_millis(),
            self.content_transfer.as_millis(),
        )
    }
}

pub struct HttpStatExecutor {
    timeout: Duration,
}

impl HttpStatExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn measure(&self, arguments: &str) -> Result<HttpStatTimings> {
        validate_httpstat_arguments(arguments)?;
        let url = Url::parse(arguments.trim())
            .map_err(|e| MeasurementError::Validation(format!("无效的URL {arguments}: {e}")))?;

        tokio::time::timeout(self.timeout, measure_url(&url))
            .await
            .map_err(|_| {
                MeasurementError::ProbeExecution(format!(
                    "httpstat 超时 ({}s): {}",
                    self.timeout.as_secs(),
                    url
                ))
            })?
    }
}

#[async_trait]
impl ProbeExecutor for HttpStatExecutor {
    async fn execute(&self, arguments: &str) -> Result<String> {
        Ok(self.measure(arguments).await?.render())
    }

    fn name(&self) -> &str {
        "httpstat"
    }
}

async fn measure_url(url: &Url) -> Result<HttpStatTimings> {
    let host = url
        .host_str()
        .ok_or_else(|| MeasurementError::Validation(format!("URL缺少主机名: {url}")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| MeasurementError::Validation(format!("URL缺少端口: {url}")))?;
    let lookup_name = host.trim_start_matches('[').trim_end_matches(']');

    let mut timings = HttpStatTimings::default();

    let started = Instant::now();
    let addr = lookup_host((lookup_name, port))
        .await
        .map_err(|e| MeasurementError::Network(format!("DNS解析 {host} 失败: {e}")))?
        .next()
        .ok_or_else(|| MeasurementError::Network(format!("DNS解析 {host} 没有结果")))?;
    timings.dns_lookup = started.elapsed();

    let started = Instant::now();
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| MeasurementError::Network(format!("连接 {addr} 失败: {e}")))?;
    timings.tcp_connection = started.elapsed();

    let request = build_request(url, host)?;

    let (status, server_processing, content_transfer) = if url.scheme() == "https" {
        let started = Instant::now();
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| MeasurementError::Network(format!("TLS connector: {e}")))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls = connector
            .connect(lookup_name, tcp)
            .await
            .map_err(|e| MeasurementError::Network(format!("TLS握手失败: {e}")))?;
        timings.tls_handshake = started.elapsed();
        exchange(tls, request).await?
    } else {
        exchange(tcp, request).await?
    };
    timings.status = status;
    timings.server_processing = server_processing;
    timings.content_transfer = content_transfer;

    // 4xx/5xx 仍然输出耗时
    if !(200..400).contains(&status) {
        warn!("httpstat {} 返回状态码 {}", url, status);
    }
    debug!("httpstat {}: {:?}", url, timings);
    Ok(timings)
}

fn build_request(url: &Url, host: &str) -> Result<Request<Empty<Bytes>>> {
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    Request::get(target)
        .header(HOST, host_header)
        .header(USER_AGENT, concat!("measurement-agent/", env!("CARGO_PKG_VERSION")))
        .header(ACCEPT, "*/*")
        .header(CONNECTION, "close")
        .body(Empty::new())
        .map_err(|e| MeasurementError::Validation(format!("无效的请求 {url}: {e}")))
}

/// 返回 (状态码, 服务端处理时间, 内容传输时间)
async fn exchange<S>(
    stream: S,
    request: Request<Empty<Bytes>>,
) -> Result<(u16, Duration, Duration)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| MeasurementError::Network(format!("HTTP握手失败: {e}")))?;
    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            // 部分服务端不发送 close_notify 直接断开
            debug!("HTTP连接结束: {}", e);
        }
    });

    let sent = Instant::now();
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| MeasurementError::Network(format!("读取响应失败: {e}")))?;
    let server_processing = sent.elapsed();
    let status = response.status().as_u16();

    let transfer = Instant::now();
    let mut body = response.into_body();
    while let Some(frame) = body.frame().await {
        frame.map_err(|e| MeasurementError::Network(format!("读取响应体失败: {e}")))?;
    }
    let content_transfer = transfer.elapsed();
    driver.abort();

    Ok((status, server_processing, content_transfer))
}
