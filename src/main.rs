use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taskqueue::app::{AppMode, Application};
use taskqueue::executors::builtin_registry;
use taskqueue::shutdown::{wait_for_signal, ShutdownManager};
use taskqueue_core::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskqueue")
        .version(env!("CARGO_PKG_VERSION"))
        .about("优先级分层的分布式任务队列")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时按默认路径搜索"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["all", "scheduler"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("check-config")
                .long("check-config")
                .help("校验配置并打印生效值后退出")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认路径>")))?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    if matches.get_flag("check-config") {
        config.validate()?;
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config.observability.log_level, &config.observability.log_format)?;

    let mode: AppMode = matches
        .get_one::<String>("mode")
        .map(|m| m.parse())
        .transpose()?
        .unwrap_or(AppMode::All);

    info!("启动分布式任务队列");
    info!("运行模式: {:?}", mode);

    let grace = Duration::from_secs(config.pool.shutdown_grace_seconds + 5);
    let app = Application::new(config, mode, builtin_registry()).await?;
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = app.run(&shutdown_manager).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_signal().await?;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(grace, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("分布式任务队列已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        _ => return Err(anyhow::anyhow!("不支持的日志格式: {log_format}")),
    }

    Ok(())
}
