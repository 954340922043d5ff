//! devcfg - Main entry point
//!
//! Command line front-end for building the device index and querying
//! resolved device configuration records.

mod config;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use devcfg_core::{
    format_hex_id, parse_hex_id, CorpusScanner, DeviceDatabase, DeviceIdentity, FirmwareVersion,
    IndexCache, ScanMode, Validator,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::CorpusConfig;

#[derive(Parser, Debug)]
#[command(name = "devcfg")]
#[command(about = "Validate, index and query device configuration records")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "devcfg.toml")]
    config: PathBuf,

    /// Corpus root directory (overrides the configuration file)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Abort on the first invalid record
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the index if it is stale and report its size
    Index {
        /// Rescan even if the persisted index is fresh
        #[arg(long)]
        force: bool,
        /// Print every index entry
        #[arg(long)]
        list: bool,
    },
    /// Print the record of a device, resolved for that device
    Lookup {
        #[arg(value_parser = hex_id)]
        manufacturer: u16,
        #[arg(value_parser = hex_id)]
        product_type: u16,
        #[arg(value_parser = hex_id)]
        product_id: u16,
        /// Firmware version reported by the device, e.g. 1.10
        #[arg(short, long)]
        firmware: Option<FirmwareVersion>,
    },
    /// Validate a single record file and print it
    Show {
        file: PathBuf,
        /// Resolve for a device given as manufacturer:type:id
        #[arg(short, long, value_parser = parse_device)]
        device: Option<DeviceIdentity>,
        #[arg(short, long, requires = "device")]
        firmware: Option<FirmwareVersion>,
    },
    /// Validate every record and report all failures
    Lint,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = config::load_config(&args.config)?;
    if let Some(root) = args.root.clone() {
        config.corpus.root = root;
    }
    if args.strict {
        config.corpus.strict = true;
    }

    // Initialize logging; stdout is reserved for command output
    let level = parse_level(args.log_level.as_deref().unwrap_or(&config.log.level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("devcfg v{}", env!("CARGO_PKG_VERSION"));
    if args.config.exists() {
        info!(path = %args.config.display(), "Loaded configuration");
    } else {
        info!(
            path = %args.config.display(),
            "Configuration file not found, using defaults"
        );
    }

    match args.command {
        Command::Index { force, list } => {
            let mut cache = IndexCache::new(scanner(&config.corpus));
            let cache_path = cache.cache_path().to_path_buf();
            let entries = if force { cache.rebuild()? } else { cache.load()? };
            if list {
                for entry in entries {
                    println!(
                        "{}:{}:{}  {} {}  [{}]  {}",
                        format_hex_id(entry.manufacturer_id),
                        format_hex_id(entry.product_type),
                        format_hex_id(entry.product_id),
                        entry.manufacturer,
                        entry.label,
                        entry.firmware_version,
                        entry.filename
                    );
                }
            }
            println!("{} devices indexed in {}", entries.len(), cache_path.display());
        }
        Command::Lookup {
            manufacturer,
            product_type,
            product_id,
            firmware,
        } => {
            let mut identity = DeviceIdentity::new(manufacturer, product_type, product_id);
            if let Some(version) = firmware {
                identity = identity.with_firmware(version);
            }
            let mut db = DeviceDatabase::new(IndexCache::new(scanner(&config.corpus)));
            match db.lookup(&identity)? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("No device record matches {}", identity),
            }
        }
        Command::Show {
            file,
            device,
            firmware,
        } => {
            let scanner = scanner(&config.corpus);
            let identity = device.map(|d| match firmware {
                Some(version) => d.with_firmware(version),
                None => d,
            });
            let locator = file.display().to_string();
            let raw = scanner.reader().read(&file, &locator)?;
            let record = Validator::new(locator, scanner.evaluator().as_ref())
                .with_identity(identity.as_ref())
                .validate(&raw)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Lint => {
            let scanner = scanner(&config.corpus).with_mode(ScanMode::Strict);
            let files = scanner.record_files()?.len();
            let failures = scanner.lint()?;
            for failure in &failures {
                println!("{}", failure);
            }
            if !failures.is_empty() {
                bail!("{} of {} records failed validation", failures.len(), files);
            }
            println!("{} records OK", files);
        }
        Command::Init { force } => {
            if args.config.exists() && !force {
                bail!("{} already exists, use --force to overwrite", args.config.display());
            }
            config::save_default_config(&args.config)?;
            println!("Wrote {}", args.config.display());
        }
    }

    Ok(())
}

fn scanner(corpus: &CorpusConfig) -> CorpusScanner {
    CorpusScanner::new(corpus.root.clone())
        .with_index_path(corpus.index_path())
        .with_mode(corpus.scan_mode())
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn hex_id(s: &str) -> Result<u16, String> {
    parse_hex_id(s).ok_or_else(|| format!("\"{}\" is not a 4-digit hex id like 0x0086", s))
}

fn parse_device(s: &str) -> Result<DeviceIdentity, String> {
    let ids = s.split(':').map(hex_id).collect::<Result<Vec<_>, _>>()?;
    match ids.as_slice() {
        [manufacturer, product_type, product_id] => {
            Ok(DeviceIdentity::new(*manufacturer, *product_type, *product_id))
        }
        _ => Err(format!("\"{}\" must be manufacturer:productType:productId", s)),
    }
}
