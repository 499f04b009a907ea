//! 日志模块 - 提供文件日志和大小管理功能

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "dirsync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用文件日志
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 日志目录，默认位于用户配置目录下
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
            dir: None,
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }

    /// 配置的级别作为默认值，`RUST_LOG` 非空时覆盖
    pub fn env_filter(&self) -> EnvFilter {
        let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
        self.parse_filter(&directives)
    }

    /// 以给定的指令构建过滤器，指令为空时使用配置的级别
    pub fn parse_filter(&self, directives: &str) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(self.tracing_level().into())
            .parse_lossy(directives)
    }

    pub fn max_size_bytes(&self) -> u64 {
        u64::from(self.max_size_mb) * 1024 * 1024
    }

    /// 日志目录
    pub fn log_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .map(|p| p.join("dirsync").join("logs"))
                .unwrap_or_else(|| PathBuf::from(".dirsync/logs"))
        })
    }
}

/// 带大小限制的日志写入器，超限后把当前文件轮转为 `.old`
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let writer = Self::open_file(&file_path, max_size)?;

        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        // 检查现有文件大小，如果超过限制则轮转
        if fs::metadata(file_path).map(|m| m.len() > max_size).unwrap_or(false) {
            Self::rotate_log(file_path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(BufWriter::new(file))
    }

    /// 轮转日志文件为 dirsync.log.old，覆盖旧备份
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)
    }

    fn lock(&self) -> MutexGuard<'_, BufWriter<File>> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 写入后检查大小，必要时轮转并重新打开
    fn rotate_if_needed(&self, guard: &mut BufWriter<File>) -> io::Result<()> {
        let size = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        if size > self.max_size {
            guard.flush()?;
            *guard = Self::open_file(&self.file_path, self.max_size)?;
        }
        Ok(())
    }
}

/// 日志写入器包装
pub struct LogWriter {
    inner: SizeRotatingWriter,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        guard.flush()?;
        self.inner.rotate_if_needed(&mut guard)?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing_falls_back_to_info() {
        let mut config = LogConfig::default();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);

        config.level = "DEBUG".to_string();
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);

        config.level = "verbose".to_string();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_env_directives_override_configured_level() {
        use tracing_subscriber::filter::LevelFilter;

        let config = LogConfig::default();
        assert_eq!(config.parse_filter("").max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(
            config.parse_filter("debug").max_level_hint(),
            Some(LevelFilter::DEBUG)
        );

        let quiet = LogConfig {
            level: "warn".to_string(),
            ..Default::default()
        };
        assert_eq!(quiet.parse_filter("").max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(quiet.parse_filter("trace").max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn test_default_dir_is_under_config_dir() {
        let dir = LogConfig::default().log_dir();
        assert!(dir.ends_with("dirsync/logs"));
        if let Some(base) = dirs::config_dir() {
            assert!(dir.starts_with(base));
        }
    }

    #[test]
    fn test_explicit_dir_wins() {
        let config = LogConfig {
            dir: Some(PathBuf::from("/var/log/dirsync")),
            ..Default::default()
        };
        assert_eq!(config.log_dir(), PathBuf::from("/var/log/dirsync"));
    }

    #[test]
    fn test_writer_rotates_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SizeRotatingWriter::new(dir.path(), 16).unwrap();

        let mut w = writer.make_writer();
        w.write_all(b"0123456789abcdefXYZ\n").unwrap();
        w.write_all(b"next\n").unwrap();

        let backup = dir.path().join("dirsync.log.old");
        assert!(backup.exists());
        assert_eq!(fs::read_to_string(&backup).unwrap(), "0123456789abcdefXYZ\n");
        assert_eq!(fs::read_to_string(writer.file_path()).unwrap(), "next\n");
    }
}
