use prosearch_core::{ChatMessage, Error, Result, TurnRecord, TurnStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

fn next_thread_id(max: u64) -> Result<u64> {
    max.checked_add(1)
        .ok_or_else(|| Error::Store(format!("thread ids exhausted (highest is {max})")))
}

/// One saved turn as it sits on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTurn {
    pub saved_at_epoch_s: u64,
    #[serde(flatten)]
    pub record: TurnRecord,
}

/// Everything stored for one thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub schema_version: u32,
    pub thread_id: u64,
    pub turns: Vec<StoredTurn>,
}

impl Thread {
    fn new(thread_id: u64) -> Self {
        Self {
            schema_version: 1,
            thread_id,
            turns: Vec::new(),
        }
    }

    /// The conversation so far, as the rephraser wants it.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .flat_map(|t| {
                [
                    ChatMessage::user(t.record.user_message.clone()),
                    ChatMessage::assistant(t.record.assistant_message.clone()),
                ]
            })
            .collect()
    }

    fn push(&mut self, mut record: TurnRecord) {
        record.thread_id = Some(self.thread_id);
        self.turns.push(StoredTurn {
            saved_at_epoch_s: now_epoch_s(),
            record,
        });
    }
}

/// One `thread-<id>.json` file per thread under `root`.
///
/// Writes go through a temp file in the same directory and are renamed into place.
#[derive(Debug, Clone)]
pub struct FsTurnStore {
    root: PathBuf,
    // Serializes id allocation and read-modify-write of thread files.
    lock: Arc<Mutex<()>>,
}

impl FsTurnStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// `PROSEARCH_STORE_DIR`, else `<data dir>/prosearch/threads` as passed by the caller.
    pub fn from_env(default_root: Option<PathBuf>) -> Result<Self> {
        env("PROSEARCH_STORE_DIR")
            .map(PathBuf::from)
            .or(default_root)
            .map(Self::new)
            .ok_or_else(|| {
                Error::NotConfigured("missing PROSEARCH_STORE_DIR (no data dir found)".to_string())
            })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(root: &Path, thread_id: u64) -> PathBuf {
        root.join(format!("thread-{thread_id}.json"))
    }

    fn thread_id_of(name: &str) -> Option<u64> {
        name.strip_prefix("thread-")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    fn max_thread_id(root: &Path) -> Result<u64> {
        let entries = match fs::read_dir(root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Store(e.to_string())),
        };
        Ok(entries
            .filter_map(|e| e.ok())
            .filter_map(|e| Self::thread_id_of(&e.file_name().to_string_lossy()))
            .max()
            .unwrap_or(0))
    }

    fn read_thread(root: &Path, thread_id: u64) -> Result<Option<Thread>> {
        let bytes = match fs::read(Self::path_for(root, thread_id)) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Store(e.to_string())),
        };
        let t: Thread = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Store(format!("thread-{thread_id}.json: {e}")))?;
        Ok(Some(t))
    }

    fn write_thread(root: &Path, thread: &Thread) -> Result<()> {
        fs::create_dir_all(root).map_err(|e| Error::Store(e.to_string()))?;
        let bytes = serde_json::to_vec_pretty(thread).map_err(|e| Error::Store(e.to_string()))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(root).map_err(|e| Error::Store(e.to_string()))?;
        tmp.write_all(&bytes)
            .map_err(|e| Error::Store(e.to_string()))?;
        tmp.persist(Self::path_for(root, thread.thread_id))
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    fn save_blocking(root: &Path, lock: &Mutex<()>, turn: TurnRecord) -> Result<u64> {
        let _g = lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut thread = match turn.thread_id {
            // An unknown id starts that thread rather than failing the turn.
            Some(id) => Self::read_thread(root, id)?.unwrap_or_else(|| Thread::new(id)),
            None => Thread::new(next_thread_id(Self::max_thread_id(root)?)?),
        };
        thread.push(turn);
        Self::write_thread(root, &thread)?;
        Ok(thread.thread_id)
    }

    pub async fn load(&self, thread_id: u64) -> Result<Option<Thread>> {
        let root = self.root.clone();
        let lock = self.lock.clone();
        tokio::task::spawn_blocking(move || {
            let _g = lock.lock().unwrap_or_else(|e| e.into_inner());
            Self::read_thread(&root, thread_id)
        })
        .await
        .map_err(|e| Error::Store(format!("store load join failed: {e}")))?
    }

    /// Can we create and remove a file under the root right now.
    pub fn is_writable(&self) -> bool {
        if fs::create_dir_all(&self.root).is_err() {
            return false;
        }
        tempfile::NamedTempFile::new_in(&self.root).is_ok()
    }
}

#[async_trait::async_trait]
impl TurnStore for FsTurnStore {
    async fn save(&self, turn: TurnRecord) -> Result<u64> {
        let root = self.root.clone();
        let lock = self.lock.clone();
        let id = tokio::task::spawn_blocking(move || Self::save_blocking(&root, &lock, turn))
            .await
            .map_err(|e| Error::Store(format!("store save join failed: {e}")))??;
        debug!(thread_id = id, root = %self.root.display(), "turn saved");
        Ok(id)
    }
}

/// Threads kept in process memory; ids start at 1.
#[derive(Debug, Clone, Default)]
pub struct MemoryTurnStore {
    threads: Arc<Mutex<BTreeMap<u64, Thread>>>,
}

impl MemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread_id: u64) -> Option<Thread> {
        self.threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&thread_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.threads.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl TurnStore for MemoryTurnStore {
    async fn save(&self, turn: TurnRecord) -> Result<u64> {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        let id = match turn.thread_id {
            Some(id) => id,
            None => next_thread_id(threads.keys().next_back().copied().unwrap_or(0))?,
        };
        threads
            .entry(id)
            .or_insert_with(|| Thread::new(id))
            .push(turn);
        Ok(id)
    }
}
