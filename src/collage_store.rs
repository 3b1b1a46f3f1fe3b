use log::{debug, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::collage_types::{CollageError, CollageResult};

/// Request-scoped collage ids are UUID v4 strings; anything else is never a
/// valid key, which also keeps ids from escaping the store directory.
pub fn new_collage_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn is_valid_collage_id(id: &str) -> bool {
    uuid::Uuid::parse_str(id).is_ok()
}

/// Where finished collages go, keyed by request id.
pub trait CollageStore: Send + Sync {
    fn save(&self, id: &str, png: &[u8]) -> CollageResult<()>;
    fn load(&self, id: &str) -> CollageResult<Option<Vec<u8>>>;
    /// Drop collages stored longer than `max_age` ago, returning how many.
    fn purge_older_than(&self, max_age: Duration) -> CollageResult<usize>;
}

#[derive(Clone, Default)]
pub struct MemoryCollageStore {
    entries: Arc<Mutex<HashMap<String, (SystemTime, Arc<Vec<u8>>)>>>,
}

impl MemoryCollageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_error() -> CollageError {
    CollageError::Storage("Failed to acquire collage store lock".to_string())
}

impl CollageStore for MemoryCollageStore {
    fn save(&self, id: &str, png: &[u8]) -> CollageResult<()> {
        if !is_valid_collage_id(id) {
            return Err(CollageError::Storage(format!("invalid collage id: {}", id)));
        }
        let mut entries = self.entries.lock().map_err(|_| lock_error())?;
        entries.insert(id.to_string(), (SystemTime::now(), Arc::new(png.to_vec())));
        Ok(())
    }

    fn load(&self, id: &str) -> CollageResult<Option<Vec<u8>>> {
        let entries = self.entries.lock().map_err(|_| lock_error())?;
        Ok(entries.get(id).map(|(_, png)| png.as_ref().clone()))
    }

    fn purge_older_than(&self, max_age: Duration) -> CollageResult<usize> {
        let now = SystemTime::now();
        let mut entries = self.entries.lock().map_err(|_| lock_error())?;
        let before = entries.len();
        entries.retain(|_, (stored_at, _)| {
            now.duration_since(*stored_at)
                .map(|age| age <= max_age)
                .unwrap_or(true)
        });
        Ok(before - entries.len())
    }
}

/// Stores each collage as `{dir}/{id}.png`.
#[derive(Debug, Clone)]
pub struct DirectoryCollageStore {
    dir: PathBuf,
}

impl DirectoryCollageStore {
    pub fn new(dir: PathBuf) -> CollageResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> CollageResult<PathBuf> {
        if !is_valid_collage_id(id) {
            return Err(CollageError::Storage(format!("invalid collage id: {}", id)));
        }
        Ok(self.dir.join(format!("{}.png", id)))
    }
}

impl CollageStore for DirectoryCollageStore {
    fn save(&self, id: &str, png: &[u8]) -> CollageResult<()> {
        let path = self.path_for(id)?;
        // Write under a temp name first so readers never see a partial file
        let tmp_path = path.with_extension("png.part");
        std::fs::write(&tmp_path, png)?;
        std::fs::rename(&tmp_path, &path)?;
        debug!("Saved collage to {:?}", path);
        Ok(())
    }

    fn load(&self, id: &str) -> CollageResult<Option<Vec<u8>>> {
        if !is_valid_collage_id(id) {
            return Ok(None);
        }
        let path = self.path_for(id)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn purge_older_than(&self, max_age: Duration) -> CollageResult<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_collage = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".png") || n.ends_with(".png.part"))
                .unwrap_or(false);
            if !is_collage {
                continue;
            }

            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|age| age > max_age)
                .unwrap_or(false);

            if expired {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove expired collage {:?}: {}", path, e),
                }
            }
        }

        Ok(removed)
    }
}
