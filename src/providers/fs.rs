use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tokio::{fs, io::AsyncWriteExt};
use tracing::warn;

use super::{HistoryStore, QueueKind, WorkItem, filter_duplicates};
use crate::Event;

/// Simple filesystem-backed history store writing JSONL per instance.
///
/// Layout under `root`:
/// - `histories/{instance}.jsonl`: one event per line
/// - `orch-queue.jsonl`, `work-queue.jsonl`: ready items
/// - `.locks/{orch,work}/{token}.lock`: items taken with peek-lock and not yet acked
#[derive(Clone)]
pub struct FsHistoryStore {
    root: PathBuf,
    orch_queue_file: PathBuf,
    work_queue_file: PathBuf,
    cap: usize,
    // Serializes read-modify-write of the queue files
    queue_lock: Arc<Mutex<()>>,
    next_token: Arc<AtomicU64>,
}

impl FsHistoryStore {
    /// Create a new store rooted at the given directory path.
    /// If `reset_on_create` is true, delete any existing data under the root first.
    /// Otherwise items left locked by a previous process are returned to their queues.
    pub fn new(root: impl AsRef<Path>, reset_on_create: bool) -> Self {
        let path = root.as_ref().to_path_buf();
        if reset_on_create {
            let _ = std::fs::remove_dir_all(&path);
        }
        let orch_q = path.join("orch-queue.jsonl");
        let work_q = path.join("work-queue.jsonl");
        // best-effort create
        let _ = std::fs::create_dir_all(path.join("histories"));
        let _ = std::fs::OpenOptions::new().create(true).append(true).open(&orch_q);
        let _ = std::fs::OpenOptions::new().create(true).append(true).open(&work_q);
        let store = Self {
            root: path,
            orch_queue_file: orch_q,
            work_queue_file: work_q,
            cap: 1024,
            queue_lock: Arc::new(Mutex::new(())),
            next_token: Arc::new(AtomicU64::new(0)),
        };
        if !reset_on_create {
            for kind in [QueueKind::Orchestrator, QueueKind::Worker] {
                if let Err(e) = store.recover_locks(kind) {
                    warn!(queue = ?kind, error = %e, "failed to recover locked work items");
                }
            }
        }
        store
    }
    /// Create a new store with a custom history cap (useful for tests).
    pub fn new_with_cap(root: impl AsRef<Path>, reset_on_create: bool, cap: usize) -> Self {
        let mut s = Self::new(root, reset_on_create);
        s.cap = cap;
        s
    }
    fn history_dir(&self) -> PathBuf {
        self.root.join("histories")
    }
    fn history_path(&self, instance: &str) -> PathBuf {
        self.history_dir().join(format!("{instance}.jsonl"))
    }
    fn lock_dir(&self, kind: QueueKind) -> PathBuf {
        match kind {
            QueueKind::Orchestrator => self.root.join(".locks/orch"),
            QueueKind::Worker => self.root.join(".locks/work"),
        }
    }
    fn lock_path(&self, kind: QueueKind, token: &str) -> PathBuf {
        self.lock_dir(kind).join(format!("{token}.lock"))
    }
    fn queue_file(&self, kind: QueueKind) -> &PathBuf {
        match kind {
            QueueKind::Orchestrator => &self.orch_queue_file,
            QueueKind::Worker => &self.work_queue_file,
        }
    }

    fn read_queue(&self, kind: QueueKind) -> Vec<WorkItem> {
        let content = std::fs::read_to_string(self.queue_file(kind)).unwrap_or_default();
        content
            .lines()
            .filter_map(|l| serde_json::from_str::<WorkItem>(l).ok())
            .collect()
    }

    /// Rewrite the queue file atomically via a temp file and rename.
    fn write_queue(&self, kind: QueueKind, items: &[WorkItem]) -> Result<(), String> {
        let qf = self.queue_file(kind);
        let tmp = qf.with_extension("jsonl.tmp");
        {
            let mut tf = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(|e| e.to_string())?;
            for it in items {
                let line = serde_json::to_string(it).map_err(|e| e.to_string())?;
                tf.write_all(line.as_bytes()).map_err(|e| e.to_string())?;
                tf.write_all(b"\n").map_err(|e| e.to_string())?;
            }
        }
        std::fs::rename(&tmp, qf).map_err(|e| e.to_string())
    }

    // Move every lock sidecar back to the front of its queue
    fn recover_locks(&self, kind: QueueKind) -> Result<(), String> {
        let dir = self.lock_dir(kind);
        let Ok(rd) = std::fs::read_dir(&dir) else {
            return Ok(());
        };
        let mut recovered = Vec::new();
        for ent in rd.flatten() {
            let path = ent.path();
            let data = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
            if let Ok(item) = serde_json::from_str::<WorkItem>(&data) {
                recovered.push(item);
            }
            std::fs::remove_file(&path).map_err(|e| e.to_string())?;
        }
        if recovered.is_empty() {
            return Ok(());
        }
        let mut items = self.read_queue(kind);
        for item in recovered {
            if !items.contains(&item) {
                items.insert(0, item);
            }
        }
        self.write_queue(kind, &items)
    }

    fn new_token(&self) -> String {
        let now_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        let seq = self.next_token.fetch_add(1, Ordering::Relaxed);
        format!("{now_ns:x}-{pid:x}-{seq:x}")
    }
}

#[async_trait::async_trait]
impl HistoryStore for FsHistoryStore {
    /// Read the entire JSONL file for the instance and deserialize each line.
    async fn read(&self, instance: &str) -> Vec<Event> {
        let data = fs::read_to_string(self.history_path(instance)).await.unwrap_or_default();
        data.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<Event>(line).ok())
            .collect()
    }

    /// Append events with a simple capacity guard; duplicates of recorded completions are skipped.
    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), String> {
        let path = self.history_path(instance);
        // If the file does not exist, treat as error (must call create_instance first)
        if !fs::try_exists(&path).await.map_err(|e| e.to_string())? {
            return Err(format!("instance not found: {instance}"));
        }
        let existing = self.read(instance).await;
        let kept = filter_duplicates(&existing, new_events);
        if existing.len() + kept.len() > self.cap {
            return Err(format!(
                "history cap exceeded (cap={}, have={}, append={})",
                self.cap,
                existing.len(),
                kept.len()
            ));
        }
        let mut buf = Vec::new();
        for ev in &kept {
            let line = serde_json::to_string(ev).map_err(|e| e.to_string())?;
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| e.to_string())?;
        file.write_all(&buf).await.map_err(|e| e.to_string())?;
        file.flush().await.map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Remove the root directory and all contents, then recreate the layout.
    async fn reset(&self) {
        let _ = fs::remove_dir_all(&self.root).await;
        let _ = fs::create_dir_all(self.history_dir()).await;
    }

    async fn list_instances(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Ok(mut rd) = fs::read_dir(self.history_dir()).await {
            while let Ok(Some(ent)) = rd.next_entry().await {
                if let Some(name) = ent.file_name().to_str()
                    && let Some(stem) = name.strip_suffix(".jsonl")
                {
                    out.push(stem.to_string());
                }
            }
        }
        out.sort();
        out
    }

    /// Produce a human-readable dump of all stored histories.
    async fn dump_all_pretty(&self) -> String {
        let mut out = String::new();
        for inst in self.list_instances().await {
            out.push_str(&format!("instance={inst}\n"));
            for ev in self.read(&inst).await {
                out.push_str(&format!("  {ev:#?}\n"));
            }
        }
        out
    }

    async fn create_instance(&self, instance: &str) -> Result<(), String> {
        fs::create_dir_all(self.history_dir()).await.map_err(|e| e.to_string())?;
        // create_new makes the existence check and the creation one step
        fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(self.history_path(instance))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => format!("instance already exists: {instance}"),
                _ => e.to_string(),
            })?;
        Ok(())
    }

    async fn remove_instance(&self, instance: &str) -> Result<(), String> {
        let path = self.history_path(instance);
        if !fs::try_exists(&path).await.map_err(|e| e.to_string())? {
            return Err(format!("instance not found: {instance}"));
        }
        fs::remove_file(&path).await.map_err(|e| e.to_string())
    }

    async fn enqueue_work(&self, kind: QueueKind, item: WorkItem) -> Result<(), String> {
        let _guard = self.queue_lock.lock().await;
        // Idempotent enqueue: load current items and only append if not present
        let mut items = self.read_queue(kind);
        if items.contains(&item) {
            return Ok(());
        }
        items.push(item);
        self.write_queue(kind, &items)
    }

    async fn dequeue_peek_lock(&self, kind: QueueKind) -> Option<(WorkItem, String)> {
        let _guard = self.queue_lock.lock().await;
        // Pop first item but write it to a lock sidecar to keep invisible until ack/abandon
        let mut items = self.read_queue(kind);
        if items.is_empty() {
            return None;
        }
        let first = items.remove(0);
        let token = self.new_token();
        let line = serde_json::to_string(&first).ok()?;
        std::fs::create_dir_all(self.lock_dir(kind)).ok()?;
        // Sidecar first so a crash between the two writes duplicates rather than loses the item
        std::fs::write(self.lock_path(kind, &token), line).ok()?;
        if let Err(e) = self.write_queue(kind, &items) {
            warn!(queue = ?kind, error = %e, "failed to rewrite queue after dequeue");
        }
        Some((first, token))
    }

    async fn ack(&self, kind: QueueKind, token: &str) -> Result<(), String> {
        let path = self.lock_path(kind, token);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn abandon(&self, kind: QueueKind, token: &str) -> Result<(), String> {
        let _guard = self.queue_lock.lock().await;
        // Read locked item and re-enqueue at front, then remove lock
        let path = self.lock_path(kind, token);
        if !path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
        let item: WorkItem = serde_json::from_str(&data).map_err(|e| e.to_string())?;
        let mut items = self.read_queue(kind);
        items.insert(0, item);
        self.write_queue(kind, &items)?;
        std::fs::remove_file(&path).map_err(|e| e.to_string())
    }

    async fn queued_items(&self, kind: QueueKind) -> Vec<WorkItem> {
        let _guard = self.queue_lock.lock().await;
        let mut items = self.read_queue(kind);
        if let Ok(rd) = std::fs::read_dir(self.lock_dir(kind)) {
            for ent in rd.flatten() {
                if let Ok(data) = std::fs::read_to_string(ent.path())
                    && let Ok(item) = serde_json::from_str::<WorkItem>(&data)
                {
                    items.push(item);
                }
            }
        }
        items
    }
}
