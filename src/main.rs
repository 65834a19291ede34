use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use orchestrator::{AppConfig, Orchestrator};
use orchestrator_core::init_logging;

#[derive(Parser, Debug)]
#[command(name = "orchestrator")]
#[command(version)]
#[command(about = "进程内Agent编排运行时")]
struct Cli {
    /// 配置文件路径，未指定时依次查找 config/orchestrator.toml 和 orchestrator.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, value_parser = ["json", "pretty"])]
    log_format: Option<String>,

    /// 打印生效的配置后退出
    #[arg(long)]
    print_config: bool,

    /// 状态日志输出间隔（秒），0 表示不输出
    #[arg(long, default_value_t = 60)]
    status_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config.logging.level, &config.logging.format)?;
    info!("启动编排运行时");

    let orchestrator = Orchestrator::new(config)?;
    orchestrator.start().await?;

    let status_interval = Duration::from_secs(cli.status_interval);
    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        _ = report_status(&orchestrator, status_interval) => {}
    }

    info!("收到关闭信号，开始优雅关闭...");
    orchestrator.shutdown().await;
    info!("编排运行时已退出");
    Ok(())
}

/// 周期输出运行状态；间隔为0时永不返回
async fn report_status(orchestrator: &Orchestrator, period: Duration) {
    if period.is_zero() {
        return std::future::pending().await;
    }
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        match serde_json::to_string(&orchestrator.status().await) {
            Ok(status) => info!(status = %status, "运行状态"),
            Err(e) => warn!("序列化运行状态失败: {}", e),
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
