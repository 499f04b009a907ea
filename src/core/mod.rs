pub mod compare;
pub mod diff;
pub mod entity;
pub mod filter;
pub mod job;
pub mod reconciler;
pub mod transfer;

pub use compare::{FileComparator, Strategy, UnsupportedHash};
pub use diff::{keyed_diff, KeyedDiff};
pub use entity::{Listing, SyncDir, SyncFile};
pub use filter::IgnoreFilter;
pub use job::{run_jobs, SyncJob, SyncReport};
pub use reconciler::{Action, Progress, ReconcileOptions, ReconcileStats, Reconciler, SyncMode};
pub use transfer::Route;
