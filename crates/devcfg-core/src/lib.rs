//! devcfg core - device configuration records, validation and indexing
//!
//! This crate provides the building blocks of the device configuration
//! database:
//! - Record validation with conditional variants resolved per device
//! - Corpus scanning into a flat index of (record, device) entries
//! - A persisted index cache that rebuilds itself when the corpus changes
//! - Identity lookups returning fully resolved records

pub mod cache;
pub mod conditional;
pub mod database;
pub mod device;
pub mod error;
pub mod firmware;
pub mod index;
pub mod predicate;
pub mod reader;
pub mod record;
pub mod scanner;
pub mod validate;

pub use cache::{CacheState, IndexCache, StaleReason};
pub use conditional::{Conditional, Variant, CONDITION_KEY};
pub use database::DeviceDatabase;
pub use device::{format_hex_id, parse_hex_id, DeviceIdentity, ProductIds};
pub use error::{ConfigError, PredicateError, Result, ValidationError};
pub use firmware::{FirmwareParseError, FirmwareRange, FirmwareVersion};
pub use index::{IndexEntry, INDEX_FILE_NAME, INDEX_HEADER};
pub use predicate::{EvalFailure, ExprEvaluator, PredicateEvaluator};
pub use reader::{JsonFileReader, RecordReader};
pub use record::{
    AssociationGroup, CommentLevel, CompatConfig, DeviceComment, DeviceMetadata, DeviceRecord,
    ParamInfo, ParamKey, ParamOption,
};
pub use scanner::{CorpusScanner, ScanMode, SharedEvaluator, SharedReader};
pub use validate::{validate, Validator};
