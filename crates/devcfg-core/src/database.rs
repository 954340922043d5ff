//! Device database: identity lookups over an indexed corpus
//!
//! Lookups go through the [`IndexCache`] to find the record file for a
//! device, then read and validate that file with the device identity so
//! every conditional section is resolved for it.

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::cache::IndexCache;
use crate::device::DeviceIdentity;
use crate::error::{ConfigError, Result};
use crate::index::IndexEntry;
use crate::record::DeviceRecord;
use crate::validate::Validator;

/// Record lookups with an in-memory cache of index matches
#[derive(Debug)]
pub struct DeviceDatabase {
    cache: IndexCache,
    matches: HashMap<DeviceIdentity, Option<IndexEntry>>,
}

impl DeviceDatabase {
    pub fn new(cache: IndexCache) -> Self {
        Self {
            cache,
            matches: HashMap::new(),
        }
    }

    /// Database over `root` with default scanner settings
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::new(IndexCache::for_root(root))
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    /// All index entries, loading the index if needed
    pub fn entries(&mut self) -> Result<&[IndexEntry]> {
        self.cache.load()
    }

    /// First index entry matching the identity, using the match cache
    pub fn find_entry(&mut self, identity: &DeviceIdentity) -> Result<Option<IndexEntry>> {
        if let Some(cached) = self.matches.get(identity) {
            return Ok(cached.clone());
        }

        let found = self
            .cache
            .load()?
            .iter()
            .find(|entry| entry.matches(identity))
            .cloned();
        match &found {
            Some(entry) => debug!(device = %identity, file = %entry.filename, "Matched device record"),
            None => debug!(device = %identity, "No device record matches"),
        }
        self.matches.insert(identity.clone(), found.clone());
        Ok(found)
    }

    /// The record for a device with every conditional section resolved.
    ///
    /// A record that fails validation yields `None` in permissive mode and an
    /// error in strict mode. Guard evaluation failures always propagate.
    pub fn lookup(&mut self, identity: &DeviceIdentity) -> Result<Option<DeviceRecord>> {
        let Some(entry) = self.find_entry(identity)? else {
            return Ok(None);
        };
        match self.load_record(&entry.filename, Some(identity)) {
            Ok(record) if record.supports(identity.product()) => Ok(Some(record)),
            Ok(_) => {
                warn!(device = %identity, file = %entry.filename, "Indexed record no longer lists device");
                Ok(None)
            }
            Err(ConfigError::Validation(e)) if !self.cache.scanner().mode().is_strict() => {
                warn!(device = %identity, error = %e, "Ignoring invalid device record");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load a record by its index filename, resolved for `identity` if given
    pub fn load_record(&self, filename: &str, identity: Option<&DeviceIdentity>) -> Result<DeviceRecord> {
        let scanner = self.cache.scanner();
        let path = filename
            .split('/')
            .fold(scanner.root().to_path_buf(), |path, part| path.join(part));
        let raw = scanner.reader().read(&path, filename)?;
        Validator::new(filename, scanner.evaluator().as_ref())
            .with_identity(identity)
            .validate(&raw)
    }

    /// Clear the match cache
    pub fn clear_cache(&mut self) {
        self.matches.clear();
    }

    /// Re-check the persisted index and forget previous matches
    pub fn reload(&mut self) -> Result<()> {
        self.matches.clear();
        self.cache.reload()?;
        Ok(())
    }

    /// Rescan the corpus unconditionally and forget previous matches
    pub fn rebuild(&mut self) -> Result<usize> {
        self.matches.clear();
        Ok(self.cache.rebuild()?.len())
    }
}
