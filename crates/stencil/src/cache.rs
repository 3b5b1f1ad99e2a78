//! Compiled-program caches.
//!
//! A cache stores one [`CompiledProgram`] per source identity together with
//! the time it was written. The executor compares that time against the
//! source's modification time to decide whether a recompile is needed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::CacheError;
use crate::program::CompiledProgram;

/// Storage for compiled programs, keyed by source identity.
pub trait CompiledCache {
    fn exists(&self, identity: &str) -> bool;

    /// When the artifact for `identity` was written.
    fn last_modified(&self, identity: &str) -> Option<SystemTime>;

    fn read(&self, identity: &str) -> Result<CompiledProgram, CacheError>;

    /// Stores `program`, replacing any earlier artifact. Last writer wins.
    fn write(&self, identity: &str, program: &CompiledProgram) -> Result<(), CacheError>;
}

/// True if the artifact for `identity` is missing or not newer than the source.
pub fn is_stale(cache: &dyn CompiledCache, identity: &str, source_modified: SystemTime) -> bool {
    if !cache.exists(identity) {
        return true;
    }
    match cache.last_modified(identity) {
        Some(artifact) => source_modified >= artifact,
        None => true,
    }
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RefCell<HashMap<String, (CompiledProgram, SystemTime)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `program` with an explicit write time.
    pub fn insert_with_mtime(&self, identity: &str, program: CompiledProgram, written: SystemTime) {
        self.entries
            .borrow_mut()
            .insert(identity.to_string(), (program, written));
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl CompiledCache for MemoryCache {
    fn exists(&self, identity: &str) -> bool {
        self.entries.borrow().contains_key(identity)
    }

    fn last_modified(&self, identity: &str) -> Option<SystemTime> {
        self.entries.borrow().get(identity).map(|(_, written)| *written)
    }

    fn read(&self, identity: &str) -> Result<CompiledProgram, CacheError> {
        self.entries
            .borrow()
            .get(identity)
            .map(|(program, _)| program.clone())
            .ok_or_else(|| CacheError::Missing {
                identity: identity.to_string(),
            })
    }

    fn write(&self, identity: &str, program: &CompiledProgram) -> Result<(), CacheError> {
        self.insert_with_mtime(identity, program.clone(), SystemTime::now());
        Ok(())
    }
}

/// On-disk cache: one JSON file per identity, named by the SHA-256 of the
/// identity.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the artifact for `identity`.
    pub fn path_for(&self, identity: &str) -> PathBuf {
        let digest = Sha256::digest(identity.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }

    fn io_error(identity: &str, source: std::io::Error) -> CacheError {
        CacheError::Io {
            identity: identity.to_string(),
            source,
        }
    }
}

impl CompiledCache for FileCache {
    fn exists(&self, identity: &str) -> bool {
        self.path_for(identity).is_file()
    }

    fn last_modified(&self, identity: &str) -> Option<SystemTime> {
        fs::metadata(self.path_for(identity))
            .and_then(|meta| meta.modified())
            .ok()
    }

    fn read(&self, identity: &str) -> Result<CompiledProgram, CacheError> {
        let bytes = fs::read(self.path_for(identity)).map_err(|e| Self::io_error(identity, e))?;
        serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
            identity: identity.to_string(),
            source,
        })
    }

    fn write(&self, identity: &str, program: &CompiledProgram) -> Result<(), CacheError> {
        let json = serde_json::to_vec(program).map_err(|source| CacheError::Corrupt {
            identity: identity.to_string(),
            source,
        })?;

        fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(identity, e))?;
        let mut temp = NamedTempFile::new_in(&self.dir).map_err(|e| Self::io_error(identity, e))?;
        temp.write_all(&json).map_err(|e| Self::io_error(identity, e))?;
        temp.persist(self.path_for(identity))
            .map_err(|e| Self::io_error(identity, e.error))?;

        log::debug!("wrote compiled program for {}", identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::program::Instruction;

    fn program(text: &str) -> CompiledProgram {
        CompiledProgram::new(vec![Instruction::Literal(text.into())])
    }

    #[test]
    fn missing_artifact_is_stale() {
        let cache = MemoryCache::new();
        assert!(is_stale(&cache, "a", SystemTime::now()));
    }

    #[test]
    fn staleness_compares_times() {
        let cache = MemoryCache::new();
        let written = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        cache.insert_with_mtime("a", program("x"), written);

        assert!(!is_stale(&cache, "a", written - Duration::from_secs(1)));
        assert!(is_stale(&cache, "a", written));
        assert!(is_stale(&cache, "a", written + Duration::from_secs(1)));
    }

    #[test]
    fn memory_round_trip() {
        let cache = MemoryCache::new();
        cache.write("a", &program("x")).unwrap();
        assert!(cache.exists("a"));
        assert_eq!(cache.read("a").unwrap(), program("x"));
        assert!(matches!(cache.read("b"), Err(CacheError::Missing { .. })));
    }

    #[test]
    fn file_cache_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("compiled"));
        assert!(!cache.exists("views/home.html"));

        cache.write("views/home.html", &program("hello")).unwrap();
        assert!(cache.exists("views/home.html"));
        assert!(cache.last_modified("views/home.html").is_some());
        assert_eq!(cache.read("views/home.html").unwrap(), program("hello"));

        let name = cache.path_for("views/home.html");
        let file_name = name.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(file_name.len(), 64 + ".json".len());
    }

    #[test]
    fn file_cache_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache.write("a", &program("one")).unwrap();
        cache.write("a", &program("two")).unwrap();
        assert_eq!(cache.read("a").unwrap(), program("two"));
    }

    #[test]
    fn corrupt_artifact_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        fs::write(cache.path_for("a"), b"not json").unwrap();
        assert!(matches!(cache.read("a"), Err(CacheError::Corrupt { .. })));
    }
}
