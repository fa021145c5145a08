use crate::artifact::{parse_hex, ArtifactId, ArtifactRecord};
use crate::error::{DeepScanError, Result};
use crate::time;
use crate::types::{MatchKind, SearchConfig};
use chrono_tz::Tz;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Factory-reset deep search
/// Correlates extracted artifact records with every file of a filesystem dump
#[derive(Parser, Debug, Clone)]
#[command(name = "reset-deepscan")]
#[command(version = "0.1.0")]
#[command(about = "Factory-reset deep search over an extracted filesystem", long_about = None)]
pub struct Args {
    /// Root directory of the extracted filesystem
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// JSON file with the reference records
    #[arg(short = 'r', long = "records")]
    pub records: PathBuf,

    /// JSON file with a search configuration; flags override it
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Time tolerance in seconds
    #[arg(short = 't', long = "tolerance")]
    pub tolerance: Option<u64>,

    /// Largest file in MB that gets a full-content scan
    #[arg(long = "max-file-size")]
    pub max_file_size: Option<u64>,

    /// Worker threads (0 = all cores)
    #[arg(short = 'j', long = "threads")]
    pub threads: Option<usize>,

    /// Only scan paths matching this glob (repeatable)
    #[arg(long = "include")]
    pub include: Vec<String>,

    /// Never scan paths matching this glob (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Enabled matchers, comma separated (time,byte,text)
    #[arg(short = 'm', long = "matchers", value_delimiter = ',')]
    pub matchers: Vec<MatchKind>,

    /// Treat text fragments as regular expressions
    #[arg(long = "regex")]
    pub regex: bool,

    /// Case-sensitive text matching
    #[arg(long = "case-sensitive")]
    pub case_sensitive: bool,

    /// Search records without a byte fragment for their little-endian epoch
    #[arg(long = "epoch-bytes")]
    pub epoch_bytes: bool,

    /// Zone for record timestamps without an offset (IANA name)
    #[arg(short = 'z', long = "zone", default_value = "UTC")]
    pub zone: String,

    /// Pretty-print the JSON report
    #[arg(long = "pretty")]
    pub pretty: bool,

    /// Print only the flattened summary
    #[arg(long = "summary-only")]
    pub summary_only: bool,

    /// Debug logging on stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.root.as_os_str().is_empty() {
            return Err("Root path cannot be empty".to_string());
        }

        if self.records.as_os_str().is_empty() {
            return Err("Records path cannot be empty".to_string());
        }

        if self.max_file_size == Some(0) {
            return Err("max-file-size must be greater than 0".to_string());
        }

        if self.max_file_size.is_some() && self.max_file_size_bytes().is_none() {
            return Err("max-file-size is too large".to_string());
        }

        if let Err(e) = time::parse_zone(&self.zone) {
            return Err(e.to_string());
        }

        for pattern in self.include.iter().chain(&self.exclude) {
            if let Err(e) = globset::Glob::new(pattern) {
                return Err(format!("invalid glob '{}': {}", pattern, e));
            }
        }

        Ok(())
    }

    /// Get max file size in bytes; `None` when unset or not representable
    pub fn max_file_size_bytes(&self) -> Option<u64> {
        self.max_file_size.and_then(|mb| mb.checked_mul(1024 * 1024))
    }

    pub fn zone(&self) -> Result<Tz> {
        time::parse_zone(&self.zone)
    }

    /// Apply flag overrides on top of `base`
    pub fn to_config(&self, mut base: SearchConfig) -> SearchConfig {
        if let Some(tolerance) = self.tolerance {
            base.tolerance_secs = tolerance;
        }
        if let Some(bytes) = self.max_file_size_bytes() {
            base.max_full_scan_bytes = bytes;
        }
        if let Some(threads) = self.threads {
            base.concurrency = threads;
        }
        if !self.include.is_empty() {
            base.include_globs = self.include.clone();
        }
        if !self.exclude.is_empty() {
            base.exclude_globs.extend(self.exclude.iter().cloned());
        }
        if !self.matchers.is_empty() {
            let mut matchers = self.matchers.clone();
            matchers.sort();
            matchers.dedup();
            base.enabled_matchers = matchers;
        }
        base.text_is_regex |= self.regex;
        base.text_case_sensitive |= self.case_sensitive;
        base.derive_epoch_fragment |= self.epoch_bytes;
        base
    }
}

/// Record timestamp as written by the extractors: a string in one of the
/// forms `time::parse_timestamp` accepts, or a bare epoch number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimestampInput {
    Epoch(i64),
    Text(String),
}

impl TimestampInput {
    pub fn resolve(&self, zone: Tz) -> Result<chrono::DateTime<chrono::Utc>> {
        match self {
            TimestampInput::Epoch(value) if value.unsigned_abs() >= 1_000_000_000_000 => {
                time::from_unix_millis(*value)
            }
            TimestampInput::Epoch(value) => time::from_unix_seconds(*value),
            TimestampInput::Text(text) => time::parse_timestamp(text, zone),
        }
    }
}

/// One entry of the records file
#[derive(Debug, Clone, Deserialize)]
pub struct RecordInput {
    pub artifact_id: u16,
    pub source_path: PathBuf,
    #[serde(default)]
    pub timestamp: Option<TimestampInput>,
    /// Hex
    #[serde(default)]
    pub byte_fragment: String,
    #[serde(default)]
    pub text_fragment: String,
}

impl RecordInput {
    /// An unusable timestamp leaves the record content-only.
    pub fn into_record(self, zone: Tz) -> Result<ArtifactRecord> {
        let id = ArtifactId(self.artifact_id);
        let mut record = match self.timestamp.as_ref().map(|ts| ts.resolve(zone)) {
            Some(Ok(ts)) => ArtifactRecord::new(id, self.source_path, ts),
            Some(Err(e)) => {
                warn!("{}: {}", self.source_path.display(), e);
                ArtifactRecord::without_timestamp(id, self.source_path)
            }
            None => ArtifactRecord::without_timestamp(id, self.source_path),
        };
        if !self.byte_fragment.is_empty() {
            record = record.with_bytes(parse_hex(&self.byte_fragment)?);
        }
        if !self.text_fragment.is_empty() {
            record = record.with_text(self.text_fragment);
        }
        Ok(record)
    }
}

/// Load the records file (a JSON array)
pub fn load_records(path: &Path, zone: Tz) -> Result<Vec<ArtifactRecord>> {
    let data = std::fs::read_to_string(path)?;
    let inputs: Vec<RecordInput> = serde_json::from_str(&data)
        .map_err(|e| DeepScanError::Parse(format!("{}: {}", path.display(), e)))?;
    inputs.into_iter().map(|input| input.into_record(zone)).collect()
}

/// Load a JSON search configuration; missing fields take defaults
pub fn load_config(path: &Path) -> Result<SearchConfig> {
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| DeepScanError::Parse(format!("{}: {}", path.display(), e)))
}
