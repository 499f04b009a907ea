//! 应用配置模块

use crate::core::compare::{Strategy, UnsupportedHash};
use crate::core::reconciler::SyncMode;
use crate::logging::LogConfig;
use crate::storage::BackendKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 配置文件根
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl AppConfig {
    /// 从配置文件加载
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("配置文件格式错误: {}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// 引擎调优参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// 单个任务内同时进行的 I/O 操作上限
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 连接类错误的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），按指数退避
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

/// 源和目标的后端组合
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SyncType {
    LocalToLocal,
    LocalToFtp,
    FtpToLocal,
    FtpToFtp,
}

impl SyncType {
    pub fn source_kind(self) -> BackendKind {
        match self {
            SyncType::LocalToLocal | SyncType::LocalToFtp => BackendKind::Local,
            SyncType::FtpToLocal | SyncType::FtpToFtp => BackendKind::Remote,
        }
    }

    pub fn target_kind(self) -> BackendKind {
        match self {
            SyncType::LocalToLocal | SyncType::FtpToLocal => BackendKind::Local,
            SyncType::LocalToFtp | SyncType::FtpToFtp => BackendKind::Remote,
        }
    }
}

/// 同步端点：本地路径字符串或 FTP 连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Path(String),
    Ftp(FtpEndpoint),
}

impl Endpoint {
    pub fn kind(&self) -> BackendKind {
        match self {
            Endpoint::Path(_) => BackendKind::Local,
            Endpoint::Ftp(_) => BackendKind::Remote,
        }
    }
}

/// FTP 连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpEndpoint {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default, alias = "username")]
    pub user: String,
    #[serde(default, alias = "password")]
    pub pass: String,
    #[serde(default = "default_ftp_path")]
    pub path: String,
    /// 保留字段，FTP 客户端不支持自定义编码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

fn default_ftp_port() -> u16 {
    21
}

fn default_ftp_path() -> String {
    "/".to_string()
}

/// 单个同步任务的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub typ: SyncType,
    pub from: Endpoint,
    pub to: Endpoint,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub strategy: Strategy,
    /// 为 true 时整个任务被跳过
    #[serde(default)]
    pub disable: bool,
    /// 忽略规则，按条目名匹配
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub on_unsupported_hash: UnsupportedHash,
}
