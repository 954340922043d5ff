//! Persisted index cache with staleness detection
//!
//! The index over the corpus is expensive to build (every record has to be
//! read and validated), so it is persisted next to the records and reused
//! while it is fresh. The cached file is considered stale when:
//! 1. it does not exist
//! 2. it cannot be read or parsed as a list of index entries
//! 3. it parses but holds no entries
//! 4. any file or directory below the corpus root was modified after it
//!
//! A stale index is rebuilt with the [`CorpusScanner`] and written back in a
//! single write. A torn write shows up as a corrupt cache on the next load,
//! which triggers another rebuild.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ConfigError, Result};
use crate::index::{parse_index, render_index, IndexEntry};
use crate::scanner::CorpusScanner;

/// Why a cached index cannot be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    Missing,
    Corrupt(String),
    Modified(PathBuf),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "index file does not exist"),
            Self::Corrupt(reason) => write!(f, "index file is corrupt: {}", reason),
            Self::Modified(path) => write!(f, "{} changed since the index was built", path.display()),
        }
    }
}

/// Outcome of inspecting the persisted index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Fresh(Vec<IndexEntry>),
    Stale(StaleReason),
}

/// Index over one corpus root, loaded at most once until invalidated
#[derive(Debug)]
pub struct IndexCache {
    scanner: CorpusScanner,
    cache_path: PathBuf,
    entries: Option<Vec<IndexEntry>>,
}

impl IndexCache {
    /// Cache persisted at the scanner's index path
    pub fn new(scanner: CorpusScanner) -> Self {
        let cache_path = scanner.index_path().to_path_buf();
        Self {
            scanner,
            cache_path,
            entries: None,
        }
    }

    /// Default scanner and index location for `root`
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self::new(CorpusScanner::new(root))
    }

    /// Persist the index somewhere other than `<root>/index.json`
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.scanner = self.scanner.with_index_path(path.clone());
        self.cache_path = path;
        self.entries = None;
        self
    }

    pub fn scanner(&self) -> &CorpusScanner {
        &self.scanner
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Whether a list is held in memory
    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    /// The index, rebuilding the persisted copy first if it is stale.
    ///
    /// The decision is made once; later calls return the same list until
    /// [`invalidate`](Self::invalidate) is called.
    pub fn load(&mut self) -> Result<&[IndexEntry]> {
        let entries = match self.entries.take() {
            Some(entries) => entries,
            None => match self.state()? {
                CacheState::Fresh(entries) => {
                    debug!(path = %self.cache_path.display(), entries = entries.len(), "Using cached index");
                    entries
                }
                CacheState::Stale(reason) => {
                    info!(path = %self.cache_path.display(), reason = %reason, "Rebuilding device index");
                    self.build()?
                }
            },
        };
        Ok(self.entries.insert(entries).as_slice())
    }

    /// Scan the corpus and rewrite the persisted index regardless of staleness
    pub fn rebuild(&mut self) -> Result<&[IndexEntry]> {
        let entries = self.build()?;
        Ok(self.entries.insert(entries).as_slice())
    }

    /// Drop the in-memory list; the next load re-checks staleness
    pub fn invalidate(&mut self) {
        self.entries = None;
    }

    pub fn reload(&mut self) -> Result<&[IndexEntry]> {
        self.invalidate();
        self.load()
    }

    /// Inspect the persisted index without rebuilding it
    pub fn state(&self) -> Result<CacheState> {
        let metadata = match std::fs::metadata(&self.cache_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CacheState::Stale(StaleReason::Missing));
            }
            Err(e) => return Err(ConfigError::io(&self.cache_path, e)),
        };

        let entries = match self.read_cached() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable index");
                let reason = match e {
                    ConfigError::IndexCorrupt { reason, .. } => reason,
                    other => other.to_string(),
                };
                return Ok(CacheState::Stale(StaleReason::Corrupt(reason)));
            }
        };

        let cache_mtime = metadata
            .modified()
            .map_err(|e| ConfigError::io(&self.cache_path, e))?;
        if let Some(path) = self.modified_since(cache_mtime)? {
            return Ok(CacheState::Stale(StaleReason::Modified(path)));
        }
        Ok(CacheState::Fresh(entries))
    }

    fn read_cached(&self) -> Result<Vec<IndexEntry>> {
        let corrupt = |reason: String| ConfigError::IndexCorrupt {
            path: self.cache_path.clone(),
            reason,
        };
        let content = std::fs::read_to_string(&self.cache_path).map_err(|e| corrupt(e.to_string()))?;
        parse_index(&content).map_err(corrupt)
    }

    /// First entry below the root modified strictly after `since`
    fn modified_since(&self, since: SystemTime) -> Result<Option<PathBuf>> {
        for entry in WalkDir::new(self.scanner.root()).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(self.scanner.root()).to_path_buf();
                ConfigError::io(path, e.into())
            })?;
            if entry.path() == self.cache_path {
                continue;
            }
            let modified = entry
                .metadata()
                .map_err(|e| ConfigError::io(entry.path(), e.into()))?
                .modified()
                .map_err(|e| ConfigError::io(entry.path(), e))?;
            if modified > since {
                debug!(
                    path = %entry.path().display(),
                    modified = %DateTime::<Utc>::from(modified).to_rfc3339(),
                    index_built = %DateTime::<Utc>::from(since).to_rfc3339(),
                    "Corpus changed after index was built"
                );
                return Ok(Some(entry.path().to_path_buf()));
            }
        }
        Ok(None)
    }

    fn build(&self) -> Result<Vec<IndexEntry>> {
        let entries = self.scanner.scan()?;
        self.persist(&entries)?;
        Ok(entries)
    }

    fn persist(&self, entries: &[IndexEntry]) -> Result<()> {
        let content = render_index(entries)?;
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }
        std::fs::write(&self.cache_path, content).map_err(|e| ConfigError::io(&self.cache_path, e))?;
        info!(path = %self.cache_path.display(), entries = entries.len(), "Wrote device index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{JsonFileReader, RecordReader};
    use crate::index::INDEX_HEADER;
    use serde_json::{json, Value};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingReader {
        reads: AtomicUsize,
    }

    impl RecordReader for CountingReader {
        fn read(&self, path: &Path, locator: &str) -> Result<Value> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            JsonFileReader::new().read(path, locator)
        }
    }

    fn record(label: &str) -> String {
        json!({
            "manufacturer": "AEON Labs",
            "manufacturerId": "0x0086",
            "label": label,
            "description": "Test device",
            "devices": [{ "productType": "0x0002", "productId": "0x0064" }],
            "firmwareVersion": { "min": "0.0", "max": "255.255" }
        })
        .to_string()
    }

    fn corpus() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("0x0086")).unwrap();
        fs::write(temp_dir.path().join("0x0086/zw100.json"), record("ZW100")).unwrap();
        temp_dir
    }

    fn cache(root: &Path, reader: &Arc<CountingReader>) -> IndexCache {
        IndexCache::new(CorpusScanner::new(root).with_reader(reader.clone()))
    }

    fn touch(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_missing_cache_is_built_and_persisted() {
        let temp_dir = corpus();
        let reader = Arc::new(CountingReader::default());
        let mut index = cache(temp_dir.path(), &reader);

        assert_eq!(index.state().unwrap(), CacheState::Stale(StaleReason::Missing));
        let entries = index.load().unwrap().to_vec();
        assert_eq!(entries.len(), 1);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);

        let content = fs::read_to_string(temp_dir.path().join("index.json")).unwrap();
        assert!(content.starts_with(INDEX_HEADER));
        assert_eq!(parse_index(&content).unwrap(), entries);
    }

    #[test]
    fn test_fresh_cache_skips_scan() {
        let temp_dir = corpus();
        let reader = Arc::new(CountingReader::default());
        cache(temp_dir.path(), &reader).load().unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);

        // Cache newer than every corpus file
        touch(
            &temp_dir.path().join("index.json"),
            SystemTime::now() + Duration::from_secs(60),
        );

        let mut second = cache(temp_dir.path(), &reader);
        assert!(matches!(second.state().unwrap(), CacheState::Fresh(_)));
        assert_eq!(second.load().unwrap().len(), 1);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_touched_record_triggers_rescan() {
        let temp_dir = corpus();
        let reader = Arc::new(CountingReader::default());
        cache(temp_dir.path(), &reader).load().unwrap();

        let record_path = temp_dir.path().join("0x0086/zw100.json");
        fs::write(&record_path, record("ZW100 Gen5")).unwrap();
        touch(&record_path, SystemTime::now() + Duration::from_secs(120));

        let mut second = cache(temp_dir.path(), &reader);
        assert_eq!(
            second.state().unwrap(),
            CacheState::Stale(StaleReason::Modified(record_path.clone()))
        );
        let entries = second.load().unwrap();
        assert_eq!(entries[0].label, "ZW100 Gen5");
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_new_directory_triggers_rescan() {
        let temp_dir = corpus();
        let reader = Arc::new(CountingReader::default());
        cache(temp_dir.path(), &reader).load().unwrap();

        let dir = temp_dir.path().join("0x0109");
        fs::create_dir_all(&dir).unwrap();
        fs::File::open(&dir)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(120))
            .unwrap();

        let second = cache(temp_dir.path(), &reader);
        assert!(matches!(
            second.state().unwrap(),
            CacheState::Stale(StaleReason::Modified(_))
        ));
    }

    #[test]
    fn test_corrupt_cache_is_rebuilt() {
        let temp_dir = corpus();
        let reader = Arc::new(CountingReader::default());
        fs::write(temp_dir.path().join("index.json"), "// header\n[{ \"truncated\": ").unwrap();

        let mut index = cache(temp_dir.path(), &reader);
        assert!(matches!(
            index.state().unwrap(),
            CacheState::Stale(StaleReason::Corrupt(_))
        ));
        assert_eq!(index.load().unwrap().len(), 1);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_cache_is_stale() {
        let temp_dir = corpus();
        let reader = Arc::new(CountingReader::default());
        let cache_path = temp_dir.path().join("index.json");
        fs::write(&cache_path, "[]").unwrap();
        touch(&cache_path, SystemTime::now() + Duration::from_secs(60));

        let mut index = cache(temp_dir.path(), &reader);
        assert!(matches!(
            index.state().unwrap(),
            CacheState::Stale(StaleReason::Corrupt(_))
        ));
        assert_eq!(index.load().unwrap().len(), 1);
    }

    #[test]
    fn test_load_is_computed_once_until_invalidated() {
        let temp_dir = corpus();
        let reader = Arc::new(CountingReader::default());
        let mut index = cache(temp_dir.path(), &reader);
        assert!(!index.is_loaded());
        index.load().unwrap();
        assert!(index.is_loaded());

        // Even a corpus change is not observed until invalidation
        let record_path = temp_dir.path().join("0x0086/zw100.json");
        fs::write(&record_path, record("Changed")).unwrap();
        touch(&record_path, SystemTime::now() + Duration::from_secs(120));
        assert_eq!(index.load().unwrap()[0].label, "ZW100");
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);

        index.invalidate();
        assert!(!index.is_loaded());
        assert_eq!(index.reload().unwrap()[0].label, "Changed");
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rebuild_forces_scan() {
        let temp_dir = corpus();
        let reader = Arc::new(CountingReader::default());
        let mut index = cache(temp_dir.path(), &reader);
        index.load().unwrap();
        index.rebuild().unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_external_cache_path() {
        let temp_dir = corpus();
        let cache_dir = TempDir::new().unwrap();
        let cache_path = cache_dir.path().join("nested/devices-index.json");
        let mut index = IndexCache::for_root(temp_dir.path()).with_cache_path(&cache_path);
        assert_eq!(index.load().unwrap().len(), 1);
        assert!(cache_path.exists());
        assert!(!temp_dir.path().join("index.json").exists());
    }

    #[test]
    fn test_missing_root_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = IndexCache::for_root(temp_dir.path().join("missing"));
        assert!(matches!(index.load(), Err(ConfigError::CorpusIo { .. })));
    }
}
