use anyhow::Result;
use chrono::Local;
use clap::Parser;
use dirsync_lib::config::AppConfig;
use dirsync_lib::logging::{LogConfig, SizeRotatingWriter};
use dirsync_lib::{run_jobs, Progress, SyncError, SyncJob, SyncResult, SyncReport};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

/// Mirror or append directory trees between local disks and FTP servers
#[derive(Parser, Debug)]
#[command(name = "dirsync", version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "app.json")]
    config: PathBuf,

    /// Only run the named job (can be repeated)
    #[arg(short, long = "job")]
    jobs: Vec<String>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

/// 控制台输出到 stderr，stdout 留给进度行
fn console_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
}

/// 初始化日志系统
fn init_logging(config: &LogConfig) {
    let env_filter = config.env_filter();

    if !config.enabled {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer());
        let _ = tracing::subscriber::set_global_default(subscriber);
        return;
    }

    let log_dir = config.log_dir();
    match SizeRotatingWriter::new(&log_dir, config.max_size_bytes()) {
        Ok(file_writer) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer());
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer());
            let _ = tracing::subscriber::set_global_default(subscriber);
            warn!("无法创建日志文件 {}: {}", log_dir.display(), e);
        }
    }
}

fn stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::from(2);
        }
    };
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    init_logging(&config.log);

    match run(config, &args.jobs).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

/// 执行所有启用的任务，全部成功时返回 true
async fn run(config: AppConfig, selected: &[String]) -> Result<bool> {
    let started = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel::<Progress>();

    let mut jobs = Vec::new();
    let mut results: Vec<(String, SyncResult<SyncReport>)> = Vec::new();
    for job_config in &config.jobs {
        if !selected.is_empty() && !selected.contains(&job_config.name) {
            continue;
        }
        match SyncJob::from_config(job_config, &config.engine) {
            Ok(Some(job)) => jobs.push(job.observe(tx.clone())),
            Ok(None) => {}
            Err(e) => {
                error!("任务配置无效: {}: {}", job_config.name, e);
                results.push((job_config.name.clone(), Err(e)));
            }
        }
    }
    drop(tx);

    if jobs.is_empty() && results.is_empty() {
        warn!("没有可执行的同步任务");
        return Ok(true);
    }

    let printer = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            println!("{}> {}", stamp(), progress);
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消同步任务...");
            interrupt.cancel();
        }
    });

    info!("开始执行 {} 个同步任务", jobs.len());
    results.extend(run_jobs(jobs, cancel).await);
    printer.await?;

    let mut all_ok = true;
    for (name, result) in &results {
        match result {
            Ok(report) => println!(
                "{}> [{}] done: {} added, {} updated, {} deleted, {} unchanged ({:.1}s)",
                stamp(),
                name,
                report.stats.files_added + report.stats.dirs_added,
                report.stats.files_updated,
                report.stats.files_deleted + report.stats.dirs_deleted,
                report.stats.files_skipped,
                report.duration().as_secs_f64()
            ),
            Err(SyncError::Cancelled) => {
                all_ok = false;
                println!("{}> [{}] cancelled", stamp(), name);
            }
            Err(e) => {
                all_ok = false;
                println!("{}> [{}] failed: {}", stamp(), name, e);
            }
        }
    }
    println!(
        "{}> total elapsed: {:.1}s",
        stamp(),
        started.elapsed().as_secs_f64()
    );

    Ok(all_ok)
}
