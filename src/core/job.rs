//! 同步任务

use crate::config::{EngineConfig, Endpoint, JobConfig};
use crate::core::compare::FileComparator;
use crate::core::entity::SyncDir;
use crate::core::filter::IgnoreFilter;
use crate::core::reconciler::{Progress, ReconcileOptions, ReconcileStats, Reconciler};
use crate::error::{SyncError, SyncResult};
use crate::storage::{create_storage, BackendKind, Storage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub job: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: ReconcileStats,
    /// 耗时（毫秒）
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// 一个同步任务：一对根目录加上模式和比较策略
pub struct SyncJob {
    name: String,
    source: Arc<dyn Storage>,
    target: Arc<dyn Storage>,
    options: ReconcileOptions,
    events: Option<mpsc::UnboundedSender<Progress>>,
}

impl SyncJob {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn Storage>,
        target: Arc<dyn Storage>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            options,
            events: None,
        }
    }

    /// 从配置构建任务，被禁用的任务返回 None
    ///
    /// 端点类型与 `type` 声明的后端组合不一致时返回配置错误，此时不做任何 I/O。
    pub fn from_config(config: &JobConfig, engine: &EngineConfig) -> SyncResult<Option<Self>> {
        let name = if config.name.trim().is_empty() {
            format!("{} -> {}", describe(&config.from), describe(&config.to))
        } else {
            config.name.clone()
        };

        if config.disable {
            info!("任务已禁用，跳过: {}", name);
            return Ok(None);
        }

        check_endpoint(&name, "from", &config.from, config.typ.source_kind())?;
        check_endpoint(&name, "to", &config.to, config.typ.target_kind())?;

        let options = ReconcileOptions {
            mode: config.mode,
            comparator: FileComparator::new(config.strategy).with_unsupported(config.on_unsupported_hash),
            filter: IgnoreFilter::new(&config.ignore),
            max_concurrency: engine.max_concurrency,
            max_retries: engine.max_retries,
            retry_base_delay: Duration::from_millis(engine.retry_base_delay_ms),
        };

        let source = create_storage(&config.from)?;
        let target = create_storage(&config.to)?;
        Ok(Some(Self::new(name, source, target, options)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 注册进度观察者
    pub fn observe(mut self, tx: mpsc::UnboundedSender<Progress>) -> Self {
        self.events = Some(tx);
        self
    }

    /// 校验根目录后执行一次协调
    pub async fn start(self, cancel: CancellationToken) -> SyncResult<SyncReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("job", name = %self.name, run = %run_id);
        self.execute(run_id, cancel).instrument(span).await
    }

    async fn execute(self, run_id: Uuid, cancel: CancellationToken) -> SyncResult<SyncReport> {
        let started_at = Utc::now();
        let timer = Instant::now();
        info!(
            "开始同步任务: {} ({} -> {}, {:?}, {:?})",
            self.name,
            self.source.name(),
            self.target.name(),
            self.options.mode,
            self.options.comparator.strategy()
        );

        let source = SyncDir::root(self.source.clone());
        let target = SyncDir::root(self.target.clone());
        validate_root(&source, "source").await?;
        validate_root(&target, "target").await?;

        let reconciler = Reconciler::new(self.name.clone(), self.options, cancel.clone(), self.events);
        let result = reconciler.run(source, target).await;

        if cancel.is_cancelled() {
            warn!("同步任务已取消: {}", self.name);
            return Err(SyncError::Cancelled);
        }

        match result {
            Ok(stats) => {
                let duration_ms = timer.elapsed().as_millis() as u64;
                info!(
                    "同步任务完成: {} - 新增 {}, 更新 {}, 删除 {}, 跳过 {}, 耗时 {}ms",
                    self.name,
                    stats.files_added + stats.dirs_added,
                    stats.files_updated,
                    stats.files_deleted + stats.dirs_deleted,
                    stats.files_skipped,
                    duration_ms
                );
                Ok(SyncReport {
                    job: self.name,
                    run_id,
                    started_at,
                    stats,
                    duration_ms,
                })
            }
            Err(e) => {
                let stats = reconciler.stats();
                error!(
                    "同步任务失败: {} ({} 个条目失败): {}",
                    self.name, stats.failures, e
                );
                Err(e)
            }
        }
    }
}

/// 并发执行多个互不相关的任务，结果顺序与输入一致
pub async fn run_jobs(
    jobs: Vec<SyncJob>,
    cancel: CancellationToken,
) -> Vec<(String, SyncResult<SyncReport>)> {
    let mut tasks = JoinSet::new();
    let mut names = Vec::with_capacity(jobs.len());

    for (index, job) in jobs.into_iter().enumerate() {
        names.push(job.name.clone());
        let token = cancel.child_token();
        tasks.spawn(async move { (index, job.start(token).await) });
    }

    let mut results: Vec<Option<SyncResult<SyncReport>>> = names.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => warn!("任务被中止: {}", e),
        }
    }

    names
        .into_iter()
        .zip(results)
        .map(|(name, result)| (name, result.unwrap_or(Err(SyncError::Cancelled))))
        .collect()
}

async fn validate_root(root: &SyncDir, side: &str) -> SyncResult<()> {
    if root.exists().await? {
        Ok(())
    } else {
        Err(SyncError::Configuration(format!(
            "{} root does not exist or is not a directory: {}",
            side,
            root.full_name()
        )))
    }
}

fn check_endpoint(job: &str, field: &str, endpoint: &Endpoint, expected: BackendKind) -> SyncResult<()> {
    if endpoint.kind() == expected {
        return Ok(());
    }
    let wanted = match expected {
        BackendKind::Local => "a local path",
        BackendKind::Remote => "an FTP endpoint",
    };
    Err(SyncError::Configuration(format!(
        "job {}: `{}` must be {} for this job type",
        job, field, wanted
    )))
}

fn describe(endpoint: &Endpoint) -> String {
    match endpoint {
        Endpoint::Path(path) => path.clone(),
        Endpoint::Ftp(ftp) => format!("ftp://{}:{}{}", ftp.host, ftp.port, ftp.path),
    }
}
