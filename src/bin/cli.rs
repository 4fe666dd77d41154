use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use measurement_core::config::AppConfig;
use measurement_core::models::validate_httpstat_arguments;
use measurement_core::{CreateTaskRequest, Probe, Schedule, DEFAULT_CRON_EXPRESSION};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = CliApp::parse();
    cli.run().await
}

/// CLI应用程序主结构
#[derive(Parser, Debug)]
#[command(name = "measurement-cli")]
#[command(version)]
#[command(about = "分布式网络测量系统 - 命令行客户端")]
#[command(long_about = "发送测量任务，查询任务状态与结果，取消任务")]
struct CliApp {
    #[command(subcommand)]
    command: Commands,

    /// API服务器基础URL
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    api_url: String,

    /// 配置文件路径，用于读取已知区域列表
    #[arg(long)]
    config: Option<String>,

    /// 结果文件的输出目录
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 发送测量任务
    Measure(MeasureArgs),
    /// 管理测量任务
    Manage(ManageArgs),
}

#[derive(Args, Debug, Clone)]
struct MeasureArgs {
    /// 逗号分隔的区域列表，`all` 表示配置中的全部区域
    #[arg(short = 'r', long)]
    regions: String,
    /// 探测类型 (ping, traceroute, curl, httpstat)
    #[arg(short = 'p', long)]
    probe: String,
    /// 探测参数 (例如 google.com)
    #[arg(short = 'a', long)]
    arguments: String,
    /// 开始时间 (RFC3339)，留空表示立即开始
    #[arg(short = 's', long, default_value = "")]
    start: String,
    /// 结束时间 (RFC3339)，留空表示一次性测量
    #[arg(short = 'e', long, default_value = "")]
    stop: String,
    /// UTC下的CRON表达式，一次性测量时忽略
    #[arg(short = 'c', long, default_value = DEFAULT_CRON_EXPRESSION)]
    cron: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ManageAction {
    /// 取消任务
    Cancel,
    /// 获取测量结果
    Results,
    /// 查询任务状态
    Status,
}

#[derive(Args, Debug)]
struct ManageArgs {
    #[arg(short = 'a', long, value_enum)]
    action: ManageAction,
    /// 任务ID
    #[arg(short = 't', long = "task-id")]
    task_id: String,
}

impl CliApp {
    async fn run(self) -> Result<()> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("创建HTTP客户端失败")?;
        let api_url = self.api_url.trim_end_matches('/').to_string();

        match self.command {
            Commands::Measure(args) => {
                let known_regions = load_known_regions(self.config.as_deref())?;
                let request = build_request(&args, &known_regions)?;
                send_task(&client, &api_url, &request).await
            }
            Commands::Manage(args) => {
                let task_id = args.task_id.trim();
                if task_id.is_empty() {
                    return Err(anyhow::anyhow!("任务ID不能为空"));
                }
                match args.action {
                    ManageAction::Status => get_status(&client, &api_url, task_id).await,
                    ManageAction::Cancel => cancel_task(&client, &api_url, task_id).await,
                    ManageAction::Results => {
                        get_results(&client, &api_url, task_id, &self.output_dir).await
                    }
                }
            }
        }
    }
}

fn load_known_regions(config_path: Option<&str>) -> Result<Vec<String>> {
    let config = AppConfig::load(config_path).context("加载配置失败")?;
    Ok(config.dispatcher.regions)
}

/// 本地校验参数并组装任务请求，所有错误一并报告
fn build_request(args: &MeasureArgs, known_regions: &[String]) -> Result<CreateTaskRequest> {
    let mut errors = Vec::new();

    let mut vantage_points: Vec<String> = Vec::new();
    for region in args.regions.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        if region.eq_ignore_ascii_case("all") {
            if known_regions.is_empty() {
                errors.push("配置中没有区域列表，无法使用 'all'".to_string());
            }
            vantage_points = known_regions.to_vec();
            break;
        }
        if !known_regions.is_empty() && !known_regions.iter().any(|r| r == region) {
            warn!("无效的区域，已忽略: '{}'", region);
            continue;
        }
        if !vantage_points.iter().any(|r| r == region) {
            vantage_points.push(region.to_string());
        }
    }
    if vantage_points.is_empty() {
        errors.push(if known_regions.is_empty() {
            "区域列表不能为空".to_string()
        } else {
            format!("没有有效的区域，可选值: [{}]", known_regions.join("|"))
        });
    }

    let probe = match args.probe.parse::<Probe>() {
        Ok(probe) => Some(probe),
        Err(e) => {
            errors.push(e.to_string());
            None
        }
    };

    let arguments = args.arguments.trim().to_string();
    if arguments.is_empty() {
        errors.push("探测参数不能为空".to_string());
    } else if probe == Some(Probe::Httpstat) {
        if let Err(e) = validate_httpstat_arguments(&arguments) {
            errors.push(e.to_string());
        }
    }

    let schedule = match Schedule::parse(&args.start, &args.stop, &args.cron)
        .and_then(|s| s.validate(Utc::now()).map(|_| s))
    {
        Ok(schedule) => Some(schedule),
        Err(e) => {
            errors.push(format!("调度时间解析失败: {e}"));
            None
        }
    };

    match (probe, schedule) {
        (Some(probe), Some(schedule)) if errors.is_empty() => Ok(CreateTaskRequest {
            vantage_points,
            probe,
            arguments,
            schedule,
        }),
        _ => {
            for e in &errors {
                error!("{}", e);
            }
            Err(anyhow::anyhow!("参数校验失败: {}", errors.join("; ")))
        }
    }
}

fn error_message(body: &Value) -> String {
    body["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

async fn read_json(response: reqwest::Response) -> Value {
    response.json().await.unwrap_or(Value::Null)
}

async fn send_task(client: &Client, api_url: &str, request: &CreateTaskRequest) -> Result<()> {
    debug!("发送任务: {}", serde_json::to_string_pretty(request)?);

    let response = client
        .post(format!("{api_url}/api/v1/tasks"))
        .json(request)
        .send()
        .await
        .context("发送任务创建请求失败")?;

    let status = response.status();
    let body = read_json(response).await;
    if status != StatusCode::CREATED {
        return Err(anyhow::anyhow!(
            "创建任务失败 (HTTP {}): {}",
            status.as_u16(),
            error_message(&body)
        ));
    }

    info!("任务ID: {}", body["data"]["id"].as_str().unwrap_or("N/A"));
    if let Some(warnings) = body["data"]["warnings"].as_array() {
        for warning in warnings {
            warn!(
                "区域 {} 分发失败: {}",
                warning["region"].as_str().unwrap_or("?"),
                warning["message"].as_str().unwrap_or("")
            );
        }
    }
    Ok(())
}

async fn get_status(client: &Client, api_url: &str, task_id: &str) -> Result<()> {
    let response = client
        .get(format!("{api_url}/api/v1/tasks/{task_id}/status"))
        .send()
        .await
        .context("无法连接到服务器")?;

    let status = response.status();
    let body = read_json(response).await;
    match status {
        StatusCode::OK => {
            info!("状态: {}", body["data"]["status"].as_str().unwrap_or("unknown"));
            Ok(())
        }
        StatusCode::NOT_FOUND => Err(anyhow::anyhow!("找不到任务: {task_id}")),
        _ => Err(anyhow::anyhow!(
            "查询状态失败 (HTTP {}): {}",
            status.as_u16(),
            error_message(&body)
        )),
    }
}

async fn cancel_task(client: &Client, api_url: &str, task_id: &str) -> Result<()> {
    let response = client
        .delete(format!("{api_url}/api/v1/tasks/{task_id}"))
        .send()
        .await
        .context("无法连接到服务器")?;

    let status = response.status();
    match status {
        StatusCode::NO_CONTENT => {
            info!("任务已取消: {}", task_id);
            Ok(())
        }
        StatusCode::NOT_FOUND => Err(anyhow::anyhow!("找不到任务: {task_id}")),
        StatusCode::BAD_REQUEST => Err(anyhow::anyhow!(
            "任务 {task_id} 既不在运行中也不在等待调度"
        )),
        _ => {
            let body = read_json(response).await;
            Err(anyhow::anyhow!(
                "取消任务失败 (HTTP {}): {}",
                status.as_u16(),
                error_message(&body)
            ))
        }
    }
}

async fn get_results(
    client: &Client,
    api_url: &str,
    task_id: &str,
    output_dir: &std::path::Path,
) -> Result<()> {
    let response = client
        .get(format!("{api_url}/api/v1/tasks/{task_id}/results"))
        .send()
        .await
        .context("无法连接到服务器")?;

    let status = response.status();
    let body = read_json(response).await;
    match status {
        StatusCode::OK => {
            let path = output_dir.join(format!("{task_id}.json"));
            let content = serde_json::to_string_pretty(&body["data"])?;
            std::fs::write(&path, content)
                .with_context(|| format!("写入结果文件失败: {}", path.display()))?;
            info!("结果已保存到 {}", path.display());
            Ok(())
        }
        StatusCode::ACCEPTED => {
            info!("任务 {} 尚未开始执行，暂无结果", task_id);
            Ok(())
        }
        StatusCode::NOT_FOUND => Err(anyhow::anyhow!("找不到任务: {task_id}")),
        _ => Err(anyhow::anyhow!(
            "获取结果失败 (HTTP {}): {}",
            status.as_u16(),
            error_message(&body)
        )),
    }
}
