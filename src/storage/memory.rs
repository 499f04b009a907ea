//! 内存存储，模拟远程类后端（分钟精度、不支持哈希），仅用于测试

use super::{join_path, BackendKind, ByteStream, Entry, Storage, CHUNK_SIZE};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File {
        data: Vec<u8>,
        modified: DateTime<Utc>,
    },
}

/// 注入的故障
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// 始终返回权限错误
    Denied,
    /// 剩余若干次返回连接错误
    Flaky(usize),
}

pub(crate) struct MemoryStorage {
    name: String,
    nodes: Mutex<BTreeMap<String, Node>>,
    faults: Mutex<HashMap<String, Fault>>,
    chunk_size: usize,
    pub(crate) writes: AtomicUsize,
    pub(crate) deletes: AtomicUsize,
    /// 写入时收到的块数
    pub(crate) chunks_written: AtomicUsize,
    /// 写入时见过的最大块
    pub(crate) largest_chunk: AtomicUsize,
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

impl MemoryStorage {
    pub(crate) fn new(name: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), Node::Dir);
        Self {
            name: format!("mem://{}", name),
            nodes: Mutex::new(nodes),
            faults: Mutex::new(HashMap::new()),
            chunk_size: CHUNK_SIZE,
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            chunks_written: AtomicUsize::new(0),
            largest_chunk: AtomicUsize::new(0),
        }
    }

    /// 读取时按给定大小分块
    pub(crate) fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub(crate) fn add_dir(&self, path: &str) {
        let mut nodes = self.nodes.lock().unwrap();
        let mut current = String::new();
        for part in path.split('/').filter(|s| !s.is_empty()) {
            current = join_path(&current, part);
            nodes.entry(current.clone()).or_insert(Node::Dir);
        }
    }

    pub(crate) fn add_file(&self, path: &str, data: &[u8], modified: DateTime<Utc>) {
        self.add_dir(parent_of(path));
        self.nodes.lock().unwrap().insert(
            path.to_string(),
            Node::File {
                data: data.to_vec(),
                modified,
            },
        );
    }

    pub(crate) fn exists(&self, path: &str) -> bool {
        self.nodes.lock().unwrap().contains_key(path)
    }

    pub(crate) fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// 全部路径（不含根）
    pub(crate) fn paths(&self) -> Vec<String> {
        self.nodes
            .lock()
            .unwrap()
            .keys()
            .filter(|k| !k.is_empty())
            .cloned()
            .collect()
    }

    pub(crate) fn deny(&self, path: &str) {
        self.faults
            .lock()
            .unwrap()
            .insert(path.to_string(), Fault::Denied);
    }

    pub(crate) fn flaky(&self, path: &str, times: usize) {
        self.faults
            .lock()
            .unwrap()
            .insert(path.to_string(), Fault::Flaky(times));
    }

    fn check_fault(&self, path: &str) -> SyncResult<()> {
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(path) {
            Some(Fault::Denied) => Err(SyncError::io(
                self.full_name(path),
                io::Error::from(io::ErrorKind::PermissionDenied),
            )),
            Some(Fault::Flaky(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(SyncError::Connectivity {
                    backend: self.name.clone(),
                    message: format!("connection reset on {}", path),
                })
            }
            _ => Ok(()),
        }
    }

    fn not_found(&self, path: &str) -> SyncError {
        SyncError::io(self.full_name(path), io::Error::from(io::ErrorKind::NotFound))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn root_name(&self) -> String {
        "/".to_string()
    }

    fn full_name(&self, path: &str) -> String {
        format!("{}/{}", self.name, path)
    }

    async fn list(&self, path: &str) -> SyncResult<Vec<Entry>> {
        self.check_fault(path)?;
        let nodes = self.nodes.lock().unwrap();
        if !matches!(nodes.get(path), Some(Node::Dir)) {
            return Err(self.not_found(path));
        }

        Ok(nodes
            .iter()
            .filter(|(k, _)| !k.is_empty() && parent_of(k) == path)
            .map(|(k, node)| {
                let name = k.rsplit('/').next().unwrap_or(k).to_string();
                match node {
                    Node::Dir => Entry {
                        name,
                        path: k.clone(),
                        is_dir: true,
                        size: 0,
                        modified: None,
                    },
                    Node::File { data, modified } => Entry {
                        name,
                        path: k.clone(),
                        is_dir: false,
                        size: data.len() as u64,
                        modified: Some(*modified),
                    },
                }
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> SyncResult<Option<Entry>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes.get(path).map(|node| Entry {
            name: path.rsplit('/').next().unwrap_or("").to_string(),
            path: path.to_string(),
            is_dir: matches!(node, Node::Dir),
            size: match node {
                Node::File { data, .. } => data.len() as u64,
                Node::Dir => 0,
            },
            modified: match node {
                Node::File { modified, .. } => Some(*modified),
                Node::Dir => None,
            },
        }))
    }

    async fn read_stream(&self, path: &str) -> SyncResult<ByteStream> {
        self.check_fault(path)?;
        let data = Bytes::from(self.file_data(path).ok_or_else(|| self.not_found(path))?);
        let chunks: Vec<SyncResult<Bytes>> = (0..data.len())
            .step_by(self.chunk_size)
            .map(|start| Ok(data.slice(start..(start + self.chunk_size).min(data.len()))))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn write_stream(&self, path: &str, mut stream: ByteStream) -> SyncResult<u64> {
        self.check_fault(path)?;
        if matches!(self.nodes.lock().unwrap().get(path), Some(Node::Dir)) {
            return Err(SyncError::io(
                self.full_name(path),
                io::Error::from(io::ErrorKind::AlreadyExists),
            ));
        }

        let mut data = Vec::new();
        while let Some(chunk) = stream.try_next().await? {
            self.chunks_written.fetch_add(1, Ordering::SeqCst);
            self.largest_chunk.fetch_max(chunk.len(), Ordering::SeqCst);
            data.extend_from_slice(&chunk);
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.add_file(path, &data, Utc::now());
        Ok(data.len() as u64)
    }

    async fn create_dir(&self, path: &str) -> SyncResult<()> {
        self.check_fault(path)?;
        self.add_dir(path);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> SyncResult<()> {
        self.check_fault(path)?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.nodes.lock().unwrap().remove(path);
        Ok(())
    }

    async fn delete_dir(&self, path: &str) -> SyncResult<()> {
        self.check_fault(path)?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let prefix = format!("{}/", path);
        self.nodes
            .lock()
            .unwrap()
            .retain(|k, _| k != path && !k.starts_with(&prefix));
        Ok(())
    }

    async fn set_modified(&self, path: &str, time: DateTime<Utc>) -> SyncResult<()> {
        if let Some(Node::File { modified, .. }) = self.nodes.lock().unwrap().get_mut(path) {
            *modified = time;
        }
        Ok(())
    }
}
