//! File-based session store: one pretty-printed JSON document per session.
//!
//! File names are the hex encoding of the session id, so any caller-chosen
//! id maps to a safe, unique file name and can be recovered from it. Ids too
//! long for that get `h-<sha256>` names instead; the real id is read back
//! from the document.
//!
//! Storage location by default: `~/.colloquy/sessions/`.

use async_trait::async_trait;
use colloquy_core::error::StoreError;
use colloquy_core::session::{Session, SessionStore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A directory of session JSON files with an in-process cache.
///
/// Sessions are loaded lazily on first access and written on every `put`.
/// The cache keeps one shared `Arc<Session>` per id.
pub struct FileSessionStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Session>>>,
}

impl FileSessionStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Default directory: `~/.colloquy/sessions`
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".colloquy").join("sessions")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(id)))
    }

    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        let session = Session::from_json(&content).map_err(|e| StoreError::Corrupted {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        if session.id() != id {
            return Err(StoreError::Corrupted {
                id: id.to_string(),
                reason: format!("file holds session {}", session.id()),
            });
        }
        debug!(session_id = %id, messages = session.message_count(), "Loaded session from disk");
        Ok(Some(session))
    }

    async fn flush(&self, session: &Session) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::Io(format!("Failed to create session directory: {e}"))
        })?;

        let json = session
            .to_json()
            .map_err(|e| StoreError::Io(format!("Failed to serialize session: {e}")))?;

        // Readers only ever see a complete document.
        let path = self.path_for(session.id());
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to write session file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to replace session file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, id: &str) -> Result<Arc<Session>, StoreError> {
        let mut cache = self.cache.lock().await;
        if let Some(session) = cache.get(id) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(
            self.load(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?,
        );
        cache.insert(id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    async fn get_or_create(&self, id: &str) -> Result<Arc<Session>, StoreError> {
        let mut cache = self.cache.lock().await;
        if let Some(session) = cache.get(id) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(match self.load(id).await? {
            Some(s) => s,
            None => Session::new(id),
        });
        cache.insert(id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    async fn put(&self, session: Arc<Session>) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        self.flush(&session).await?;
        cache.insert(session.id().to_string(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut cache = self.cache.lock().await;
        let cached = cache.remove(id).is_some();
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(cached),
            Err(e) => Err(StoreError::Io(format!("Failed to delete session file: {e}"))),
        }
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let cache = self.cache.lock().await;
        let mut ids: Vec<String> = cache.keys().cloned().collect();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ids.sort();
                return Ok(ids);
            }
            Err(e) => return Err(StoreError::Io(format!("Failed to list sessions: {e}"))),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(format!("Failed to list sessions: {e}")))?
        {
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let id = if stem.starts_with(HASHED_PREFIX) {
                read_id(&entry.path()).await
            } else {
                decode_id(stem)
            };
            match id {
                Some(id) if !ids.contains(&id) => ids.push(id),
                Some(_) => {}
                None => warn!(file = %stem, "Skipping unrecognized file in session directory"),
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Longest hex stem used as-is; leaves room for `.json.tmp` under the
/// common 255-byte file name limit.
const MAX_HEX_STEM: usize = 200;

const HASHED_PREFIX: &str = "h-";

fn file_stem(id: &str) -> String {
    let hex = encode_id(id);
    if hex.len() <= MAX_HEX_STEM {
        hex
    } else {
        format!("{HASHED_PREFIX}{}", to_hex(&Sha256::digest(id.as_bytes())))
    }
}

async fn read_id(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    Session::from_json(&content).ok().map(|s| s.id().to_string())
}

fn encode_id(id: &str) -> String {
    to_hex(id.as_bytes())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_id(stem: &str) -> Option<String> {
    if stem.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..stem.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(stem.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
