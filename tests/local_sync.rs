use dirsync_lib::config::AppConfig;
use dirsync_lib::core::{FileComparator, ReconcileOptions, Strategy, SyncJob, SyncMode};
use dirsync_lib::storage::{LocalStorage, Storage};
use dirsync_lib::{run_jobs, SyncError};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

fn storage(dir: &Path) -> Arc<dyn Storage> {
    Arc::new(LocalStorage::new(dir.to_str().unwrap()).unwrap())
}

fn options(mode: SyncMode, strategy: Strategy) -> ReconcileOptions {
    ReconcileOptions {
        mode,
        comparator: FileComparator::new(strategy),
        ..Default::default()
    }
}

fn job(src: &Path, dst: &Path, mode: SyncMode, strategy: Strategy) -> SyncJob {
    SyncJob::new("it", storage(src), storage(dst), options(mode, strategy))
}

/// 目录树中全部相对路径
fn tree(root: &Path) -> BTreeSet<String> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| {
            e.unwrap()
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

fn write(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// S = {a.txt(10), dir1/{b.txt}}, T = {a.txt(10, 内容不同), c.txt}
fn scenario() -> (tempfile::TempDir, tempfile::TempDir) {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write(src.path(), "a.txt", b"0123456789");
    write(src.path(), "dir1/b.txt", b"b");
    write(dst.path(), "a.txt", b"abcdefghij");
    write(dst.path(), "c.txt", b"c");
    (src, dst)
}

#[tokio::test]
async fn mirror_with_size_strategy() {
    let (src, dst) = scenario();
    let report = job(src.path(), dst.path(), SyncMode::Mirror, Strategy::Size)
        .start(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tree(dst.path()), tree(src.path()));
    assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"abcdefghij");
    assert_eq!(fs::read(dst.path().join("dir1/b.txt")).unwrap(), b"b");
    assert_eq!(report.stats.files_deleted, 1);
    assert_eq!(report.stats.dirs_added, 1);
}

#[tokio::test]
async fn append_with_size_strategy() {
    let (src, dst) = scenario();
    write(dst.path(), "olddir/x.txt", b"x");
    let before = tree(dst.path());
    job(src.path(), dst.path(), SyncMode::Append, Strategy::Size)
        .start(CancellationToken::new())
        .await
        .unwrap();

    let after = tree(dst.path());
    assert!(before.is_subset(&after));
    assert!(after.contains("c.txt"));
    assert!(after.contains("olddir/x.txt"));
    assert!(after.contains("dir1/b.txt"));
    assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"abcdefghij");
}

#[tokio::test]
async fn hash_strategy_detects_same_size_change() {
    let (src, dst) = scenario();
    let report = job(src.path(), dst.path(), SyncMode::Mirror, Strategy::Hash)
        .start(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.files_updated, 1);
    assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"0123456789");
}

#[tokio::test]
async fn second_mirror_run_is_a_no_op() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write(src.path(), "a.txt", b"a");
    write(src.path(), "x/y/z.txt", b"z");
    write(src.path(), "x/w.bin", &[0u8; 4096]);
    fs::create_dir_all(src.path().join("empty")).unwrap();
    write(dst.path(), "x/old/deep.txt", b"d");

    let first = job(src.path(), dst.path(), SyncMode::Mirror, Strategy::Date)
        .start(CancellationToken::new())
        .await
        .unwrap();
    assert!(first.stats.has_changes());
    assert_eq!(tree(dst.path()), tree(src.path()));

    let second = job(src.path(), dst.path(), SyncMode::Mirror, Strategy::Date)
        .start(CancellationToken::new())
        .await
        .unwrap();
    assert!(!second.stats.has_changes());
    assert_eq!(second.stats.bytes_transferred, 0);
}

#[tokio::test]
async fn jobs_from_config_run_independently() {
    let (src, dst) = scenario();
    let other = tempfile::tempdir().unwrap();
    write(other.path(), "note.txt", b"n");
    let copy = tempfile::tempdir().unwrap();

    let json = serde_json::json!({
        "engine": { "maxConcurrency": 2 },
        "jobs": [
            { "name": "first", "type": "localToLocal",
              "from": src.path(), "to": dst.path(), "strategy": "size" },
            { "name": "second", "type": "localToLocal",
              "from": other.path(), "to": copy.path(), "mode": "append" },
            { "name": "off", "type": "localToLocal",
              "from": "/nonexistent", "to": "/nowhere", "disable": true }
        ]
    });
    let config = AppConfig::from_json(&json.to_string()).unwrap();

    let jobs: Vec<SyncJob> = config
        .jobs
        .iter()
        .filter_map(|j| SyncJob::from_config(j, &config.engine).unwrap())
        .collect();
    assert_eq!(jobs.len(), 2);

    let results = run_jobs(jobs, CancellationToken::new()).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert!(copy.path().join("note.txt").exists());
    assert!(!dst.path().join("c.txt").exists());
}

#[tokio::test]
async fn cancelled_token_stops_the_run() {
    let (src, dst) = scenario();
    let token = CancellationToken::new();
    token.cancel();

    let result = job(src.path(), dst.path(), SyncMode::Mirror, Strategy::Size)
        .start(token)
        .await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(dst.path().join("c.txt").exists());
}
