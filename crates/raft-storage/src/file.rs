//! # file storage
//!
//! why: keep term, vote and log on disk so a server can restart without losing promises it made
//! relations: implements raft_core::Storage
//! what: FileStorage with meta.json and log.json written atomically

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use raft_core::{LogEntry, LogIndex, ServerId, Storage, Term};
use serde::{Deserialize, Serialize};

/// file-based storage implementation using std::fs
///
/// stores raft state in a directory with:
/// - meta.json: term and voted_for
/// - log.json: array of log entries
///
/// every write goes to a temp file that is synced and then renamed over the
/// target, so a crash leaves either the old or the new contents.
pub struct FileStorage {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize, Default)]
struct MetaData {
    term: Term,
    voted_for: Option<ServerId>,
}

impl FileStorage {
    /// create a new filestorage at the given directory, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "opened file storage");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("log.json")
    }

    /// remove all persisted state, as if the disk were wiped
    pub fn clear(&mut self) -> io::Result<()> {
        for path in [self.meta_path(), self.log_path()] {
            match fs::remove_file(&path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
                _ => {}
            }
        }
        Ok(())
    }

    fn write_atomic<T: Serialize>(&self, target: &Path, value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let temp_path = target.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, target)?;

        // the rename lives in the directory entry, which needs its own sync
        if let Ok(dir) = File::open(&self.dir) {
            dir.sync_all()?;
        }
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> io::Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn write_log(&self, log: &[LogEntry]) -> io::Result<()> {
        self.write_atomic(&self.log_path(), &log)
    }
}

impl Storage for FileStorage {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> io::Result<()> {
        self.write_atomic(&self.meta_path(), &MetaData { term, voted_for })
    }

    fn load_term_and_vote(&self) -> io::Result<(Term, Option<ServerId>)> {
        let meta: MetaData = self.read_json(&self.meta_path())?.unwrap_or_default();
        Ok((meta.term, meta.voted_for))
    }

    fn append_entries(&mut self, entries: &[LogEntry]) -> io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        // whole-file rewrite; fine for the log sizes raft sees without compaction
        let mut log = self.load_log()?;
        log.extend(entries.iter().cloned());
        self.write_log(&log)
    }

    fn load_log(&self) -> io::Result<Vec<LogEntry>> {
        Ok(self.read_json(&self.log_path())?.unwrap_or_default())
    }

    fn truncate_log_from(&mut self, from_index: LogIndex) -> io::Result<()> {
        let mut log = self.load_log()?;
        let before = log.len();
        log.retain(|e| e.index < from_index);
        if log.len() == before && self.log_path().exists() {
            return Ok(());
        }
        tracing::debug!(from_index, removed = before - log.len(), "truncated persisted log");
        self.write_log(&log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persists_term_and_vote() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_term_and_vote(7, Some(ServerId(3))).unwrap();
        assert_eq!(storage.load_term_and_vote().unwrap(), (7, Some(ServerId(3))));
    }

    #[test]
    fn survives_restart() {
        let dir = tempdir().unwrap();
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.save_term_and_vote(10, Some(ServerId(1))).unwrap();
            storage
                .append_entries(&[LogEntry::new(10, 1, b"SET a 1".to_vec())])
                .unwrap();
        }

        let storage = FileStorage::new(dir.path()).unwrap();
        assert_eq!(storage.load_term_and_vote().unwrap(), (10, Some(ServerId(1))));
        assert_eq!(storage.load_log().unwrap().len(), 1);
    }

    #[test]
    fn renamed_files_visible_after_reopen() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        for term in 1..=3 {
            storage.save_term_and_vote(term, None).unwrap();
            storage
                .append_entries(&[LogEntry::new(term, term, vec![term as u8])])
                .unwrap();
        }
        drop(storage);

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|name| !name.ends_with(".tmp")), "{:?}", names);

        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(reopened.load_term_and_vote().unwrap(), (3, None));
        assert_eq!(reopened.load_log().unwrap().len(), 3);
    }

    #[test]
    fn corrupt_meta_is_invalid_data() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("meta.json"), "{not json").unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let err = storage.load_term_and_vote().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
