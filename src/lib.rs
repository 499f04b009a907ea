pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{AppConfig, EngineConfig, Endpoint, FtpEndpoint, JobConfig, SyncType};
pub use core::{run_jobs, Progress, ReconcileStats, Strategy, SyncJob, SyncMode, SyncReport};
pub use error::{SyncError, SyncResult};
