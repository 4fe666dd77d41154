use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use measurement_core::config::AgentConfig;
use measurement_core::{MeasurementError, Probe, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::httpstat::HttpStatExecutor;

/// 探测执行器
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// 执行探测并返回文本输出
    async fn execute(&self, arguments: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// 外部命令探测：ping / traceroute / curl
///
/// 参数按空白切分后直接作为argv传入，不经过shell。
/// stdout与stderr按到达顺序合并，超时或被丢弃时子进程会被杀掉。
pub struct CommandExecutor {
    name: String,
    command: Vec<String>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(name: impl Into<String>, command: Vec<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            command,
            timeout,
        }
    }
}

async fn forward_lines<R>(reader: R, lines: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if lines.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("读取探测输出失败: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl ProbeExecutor for CommandExecutor {
    async fn execute(&self, arguments: &str) -> Result<String> {
        let (program, base_args) = self
            .command
            .split_first()
            .ok_or_else(|| MeasurementError::Configuration(format!("{} 命令未配置", self.name)))?;

        let mut cmd = Command::new(program);
        cmd.args(base_args)
            .args(arguments.split_whitespace())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("执行探测命令: {} {:?} {}", program, base_args, arguments);

        let mut child = cmd.spawn().map_err(|e| {
            MeasurementError::ProbeExecution(format!("启动命令 {program} 失败: {e}"))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MeasurementError::ProbeExecution("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MeasurementError::ProbeExecution("无法获取stderr".to_string()))?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_lines(stdout, line_tx.clone()));
        tokio::spawn(forward_lines(stderr, line_tx));

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, async {
            let mut lines = Vec::new();
            while let Some(line) = line_rx.recv().await {
                debug!("{}", line);
                lines.push(line);
            }
            let status = child.wait().await;
            (lines, status)
        })
        .await;

        match outcome {
            Ok((lines, status)) => {
                let status = status.map_err(|e| {
                    MeasurementError::ProbeExecution(format!("等待进程结束失败: {e}"))
                })?;
                if !status.success() {
                    warn!("探测命令 {} 非零退出: {:?}", program, status.code());
                }
                debug!(
                    "探测命令完成: {}，耗时 {}ms",
                    program,
                    started.elapsed().as_millis()
                );
                Ok(lines.join("\n"))
            }
            Err(_) => {
                let _ = child.kill().await;
                Err(MeasurementError::ProbeExecution(format!(
                    "探测命令 {} 超时 ({}s)",
                    program,
                    self.timeout.as_secs()
                )))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 按探测类型选择执行器
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    executors: HashMap<Probe, Arc<dyn ProbeExecutor>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        let timeout = Duration::from_secs(config.probe_timeout_seconds);
        let mut registry = Self::new();
        registry.register(
            Probe::Ping,
            Arc::new(CommandExecutor::new("ping", config.ping_command.clone(), timeout)),
        );
        registry.register(
            Probe::Traceroute,
            Arc::new(CommandExecutor::new(
                "traceroute",
                config.traceroute_command.clone(),
                timeout,
            )),
        );
        registry.register(
            Probe::Curl,
            Arc::new(CommandExecutor::new("curl", config.curl_command.clone(), timeout)),
        );
        registry.register(Probe::Httpstat, Arc::new(HttpStatExecutor::new(timeout)));
        registry
    }

    pub fn register(&mut self, probe: Probe, executor: Arc<dyn ProbeExecutor>) {
        self.executors.insert(probe, executor);
    }

    /// 未注册的探测类型返回空结果
    pub async fn run(&self, probe: Probe, arguments: &str) -> Result<String> {
        match self.executors.get(&probe) {
            Some(executor) => executor.execute(arguments).await,
            None => {
                debug!("探测类型 {} 没有执行器，返回空结果", probe);
                Ok(String::new())
            }
        }
    }
}
