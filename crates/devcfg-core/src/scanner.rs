//! Corpus scanning: every record file under a root, validated and flattened
//! into index entries.
//!
//! Record files are `*.json` files anywhere below the root, except the index
//! file itself and anything inside a `templates` directory. Files are visited
//! in relative-path order so the resulting index is deterministic.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ConfigError, Result};
use crate::index::{IndexEntry, INDEX_FILE_NAME};
use crate::predicate::{ExprEvaluator, PredicateEvaluator};
use crate::reader::{JsonFileReader, RecordReader};
use crate::record::DeviceRecord;
use crate::validate::Validator;

/// Directory name excluded from scanning
pub const TEMPLATES_DIR: &str = "templates";

/// How per-record failures are handled during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Log the broken record and keep going
    #[default]
    Permissive,
    /// Abort on the first broken record
    Strict,
}

impl ScanMode {
    /// Strict when the `CI` environment variable is set to anything but `0`/`false`
    pub fn from_env() -> Self {
        match std::env::var("CI") {
            Ok(v) if !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false") => Self::Strict,
            _ => Self::Permissive,
        }
    }

    pub fn is_strict(&self) -> bool {
        *self == Self::Strict
    }
}

pub type SharedReader = Arc<dyn RecordReader + Send + Sync>;
pub type SharedEvaluator = Arc<dyn PredicateEvaluator + Send + Sync>;

/// Walks a record corpus and validates every record in it
#[derive(Clone)]
pub struct CorpusScanner {
    root: PathBuf,
    index_path: PathBuf,
    mode: ScanMode,
    reader: SharedReader,
    evaluator: SharedEvaluator,
}

impl CorpusScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let index_path = root.join(INDEX_FILE_NAME);
        Self {
            root,
            index_path,
            mode: ScanMode::default(),
            reader: Arc::new(JsonFileReader::new()),
            evaluator: Arc::new(ExprEvaluator::new()),
        }
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Exclude a differently-located index file from the scan
    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = path.into();
        self
    }

    pub fn with_reader(mut self, reader: SharedReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_evaluator(mut self, evaluator: SharedEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn reader(&self) -> &SharedReader {
        &self.reader
    }

    pub fn evaluator(&self) -> &SharedEvaluator {
        &self.evaluator
    }

    /// All record files below the root, sorted by relative path
    pub fn record_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                !(entry.depth() > 0
                    && entry.file_type().is_dir()
                    && entry.file_name() == TEMPLATES_DIR)
            });
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                ConfigError::io(path, e.into())
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().map_or(true, |ext| ext != "json")
                || path == self.index_path
            {
                continue;
            }
            files.push(path.to_path_buf());
        }
        files.sort_by_key(|p| self.locator(p));
        Ok(files)
    }

    /// Path relative to the root with `/` separators, used as the record locator
    pub fn locator(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Read and validate one record without resolving it for a device
    pub fn load_file(&self, path: &Path) -> Result<DeviceRecord> {
        let locator = self.locator(path);
        let raw = self.reader.read(path, &locator)?;
        Validator::new(locator, self.evaluator.as_ref()).validate(&raw)
    }

    /// Build the index entries of the whole corpus
    pub fn scan(&self) -> Result<Vec<IndexEntry>> {
        let files = self.record_files()?;
        info!(
            root = %self.root.display(),
            files = files.len(),
            mode = ?self.mode,
            "Scanning device records"
        );

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for path in &files {
            match self.load_file(path) {
                Ok(record) => {
                    debug!(file = %path.display(), devices = record.devices().len(), "Indexed record");
                    entries.extend(IndexEntry::from_record(&record, &self.locator(path)));
                }
                Err(e @ (ConfigError::CorpusIo { .. } | ConfigError::Predicate(_))) => return Err(e),
                Err(e) if self.mode.is_strict() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid device record");
                    skipped += 1;
                }
            }
        }

        info!(
            records = files.len() - skipped,
            skipped,
            entries = entries.len(),
            "Corpus scan complete"
        );
        Ok(entries)
    }

    /// Validate every record and collect all failures instead of stopping
    pub fn lint(&self) -> Result<Vec<ConfigError>> {
        let mut failures = Vec::new();
        for path in self.record_files()? {
            match self.load_file(&path) {
                Ok(_) => {}
                Err(e @ (ConfigError::CorpusIo { .. } | ConfigError::Predicate(_))) => return Err(e),
                Err(e) => failures.push(e),
            }
        }
        Ok(failures)
    }
}

impl std::fmt::Debug for CorpusScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusScanner")
            .field("root", &self.root)
            .field("index_path", &self.index_path)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn record(label: &str, devices: serde_json::Value) -> String {
        json!({
            "manufacturer": "AEON Labs",
            "manufacturerId": "0x0086",
            "label": label,
            "description": "Test device",
            "devices": devices,
            "firmwareVersion": { "min": "0.0", "max": "255.255" }
        })
        .to_string()
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn corpus() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(
            root,
            "0x0086/zw100.json",
            &record(
                "ZW100",
                json!([
                    { "productType": "0x0002", "productId": "0x0064" },
                    { "productType": "0x0102", "productId": "0x0064" },
                    { "productType": "0x0202", "productId": "0x0064" }
                ]),
            ),
        );
        write(
            root,
            "0x0086/nested/zw096.json",
            &record("ZW096", json!([{ "productType": "0x0003", "productId": "0x0060" }])),
        );
        write(root, "templates/master.json", "{ \"not\": \"a record\" }");
        write(root, "0x0086/templates/local.json", "{}");
        write(root, "README.md", "not json");
        write(root, INDEX_FILE_NAME, "[]");
        temp_dir
    }

    #[test]
    fn test_record_files_skip_templates_and_index() {
        let temp_dir = corpus();
        let scanner = CorpusScanner::new(temp_dir.path());
        let files: Vec<_> = scanner
            .record_files()
            .unwrap()
            .iter()
            .map(|p| scanner.locator(p))
            .collect();
        assert_eq!(files, vec!["0x0086/nested/zw096.json", "0x0086/zw100.json"]);
    }

    #[test]
    fn test_one_entry_per_device() {
        let temp_dir = corpus();
        let entries = CorpusScanner::new(temp_dir.path()).scan().unwrap();
        assert_eq!(entries.len(), 4);
        let zw100: Vec<_> = entries.iter().filter(|e| e.label == "ZW100").collect();
        assert_eq!(zw100.len(), 3);
        assert!(zw100.iter().all(|e| e.filename == "0x0086/zw100.json"));
        assert_eq!(
            zw100.iter().map(|e| e.product_type).collect::<Vec<_>>(),
            vec![0x0002, 0x0102, 0x0202]
        );
    }

    #[test]
    fn test_permissive_scan_skips_invalid_records() {
        let temp_dir = corpus();
        write(temp_dir.path(), "0x0086/broken.json", &record("Broken", json!([])));
        write(temp_dir.path(), "0x0086/garbage.json", "{ nope");
        let entries = CorpusScanner::new(temp_dir.path())
            .with_mode(ScanMode::Permissive)
            .scan()
            .unwrap();
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn test_non_utf8_record_is_skipped_not_fatal() {
        let temp_dir = corpus();
        fs::write(
            temp_dir.path().join("0x0086/latin1.json"),
            b"{ \"manufacturer\": \"M\xfcller\" }",
        )
        .unwrap();

        let entries = CorpusScanner::new(temp_dir.path())
            .with_mode(ScanMode::Permissive)
            .scan()
            .unwrap();
        assert_eq!(entries.len(), 4);

        let err = CorpusScanner::new(temp_dir.path())
            .with_mode(ScanMode::Strict)
            .scan()
            .unwrap_err();
        match err {
            ConfigError::Validation(e) => {
                assert_eq!(e.locator, "0x0086/latin1.json");
                assert!(e.message.starts_with("invalid UTF-8"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_strict_scan_fails_on_first_invalid_record() {
        let temp_dir = corpus();
        write(temp_dir.path(), "0x0086/broken.json", &record("Broken", json!([])));
        let err = CorpusScanner::new(temp_dir.path())
            .with_mode(ScanMode::Strict)
            .scan()
            .unwrap_err();
        match err {
            ConfigError::Validation(e) => {
                assert_eq!(e.locator, "0x0086/broken.json");
                assert_eq!(e.path, "devices");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_lint_collects_every_failure() {
        let temp_dir = corpus();
        write(temp_dir.path(), "a.json", &record("A", json!([])));
        write(temp_dir.path(), "b.json", "[]");
        let failures = CorpusScanner::new(temp_dir.path()).lint().unwrap();
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn test_missing_root_is_an_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = CorpusScanner::new(temp_dir.path().join("missing"))
            .scan()
            .unwrap_err();
        assert!(matches!(err, ConfigError::CorpusIo { .. }));
    }
}
