//! One-shot import of the legacy `history.json` flat file
//!
//! The file is a JSON array, newest entry first, in the layout the previous
//! app version wrote (enum payloads as `{"text":{"_0":..,"sourceURL":..}}`,
//! dates as seconds since 2001-01-01). Entries land in the database oldest
//! first so the table keeps the file's order, then the file is renamed to
//! `history.json.bak`.

use crate::blob_store::{is_valid_key, BlobStore};
use crate::database::{Database, DatabaseError};
use crate::interface::{ClipboardPayload, EntryId, HistoryEntry};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z
const REFERENCE_DATE_OFFSET_SECS: f64 = 978_307_200.0;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed legacy history: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

pub type MigrationResult<T> = Result<T, MigrationError>;

/// What a legacy import did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub imported: usize,
    /// Undecodable records, images with a missing file and duplicates
    pub skipped: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum LegacyData {
    Text {
        #[serde(rename = "_0")]
        body: String,
        #[serde(rename = "sourceURL", default)]
        source_url: Option<String>,
    },
    Color {
        #[serde(rename = "_0")]
        hex: String,
    },
    Image {
        #[serde(rename = "_0")]
        path: String,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyDate {
    ReferenceSeconds(f64),
    Rfc3339(String),
}

impl LegacyDate {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            LegacyDate::ReferenceSeconds(secs) => {
                let unix = secs + REFERENCE_DATE_OFFSET_SECS;
                if !unix.is_finite() {
                    return None;
                }
                let millis = (unix * 1000.0).round() as i64;
                Utc.timestamp_millis_opt(millis).single()
            }
            LegacyDate::Rfc3339(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

fn default_copy_count() -> i64 {
    1
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyItem {
    id: String,
    data: LegacyData,
    created_at: LegacyDate,
    #[serde(default)]
    source_app: Option<String>,
    #[serde(default)]
    is_pinned: bool,
    #[serde(default = "default_copy_count")]
    copy_count: i64,
    #[serde(default)]
    custom_metadata: Option<String>,
}

/// Path the legacy file is moved to after a successful import
pub fn backup_path(legacy_path: &Path) -> PathBuf {
    let mut name = legacy_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    legacy_path.with_file_name(name)
}

/// Resolve a legacy image reference (`images/<name>.png`) to a blob key.
/// Files not named by their hash are re-stored under their content key.
fn resolve_legacy_image(blobs: &BlobStore, path: &str) -> Option<String> {
    let file_name = Path::new(path).file_name()?.to_str()?;
    let stem = file_name.strip_suffix(".png")?;

    if is_valid_key(stem) {
        return blobs.contains(stem).then(|| stem.to_string());
    }

    let bytes = fs::read(blobs.dir().join(file_name)).ok()?;
    blobs.put(&bytes).ok()
}

fn convert(item: LegacyItem, blobs: &BlobStore) -> Result<HistoryEntry, String> {
    let id: EntryId = item.id.parse().map_err(|_| format!("bad id {:?}", item.id))?;
    let created_at = item.created_at.to_utc().ok_or("bad createdAt")?;
    let payload = match item.data {
        LegacyData::Text { body, source_url } => ClipboardPayload::Text { body, source_url },
        LegacyData::Color { hex } => ClipboardPayload::Color { hex_code: hex },
        LegacyData::Image { path } => {
            let blob_key = resolve_legacy_image(blobs, &path).ok_or_else(|| format!("missing image {:?}", path))?;
            ClipboardPayload::Image { blob_key }
        }
    };
    Ok(HistoryEntry {
        id,
        payload,
        created_at,
        source_app: item.source_app,
        is_pinned: item.is_pinned,
        copy_count: item.copy_count.clamp(1, u32::MAX as i64) as u32,
        custom_metadata: item.custom_metadata,
    })
}

/// Decode the legacy array (newest first). Duplicate payloads and ids keep
/// their newest occurrence.
fn decode_legacy(raw: &[u8], blobs: &BlobStore) -> MigrationResult<(Vec<HistoryEntry>, usize)> {
    let records: Vec<serde_json::Value> = serde_json::from_slice(raw)?;
    let mut entries = Vec::with_capacity(records.len());
    let mut seen_hashes = HashSet::new();
    let mut seen_ids = HashSet::new();
    let mut skipped = 0;

    for (index, record) in records.into_iter().enumerate() {
        let decoded = serde_json::from_value::<LegacyItem>(record)
            .map_err(|e| e.to_string())
            .and_then(|item| convert(item, blobs));

        match decoded {
            Ok(entry) => {
                if seen_ids.insert(entry.id) && seen_hashes.insert(entry.content_hash()) {
                    entries.push(entry);
                } else {
                    skipped += 1;
                }
            }
            Err(reason) => {
                warn!(index, reason = %reason, "Skipping legacy history record");
                skipped += 1;
            }
        }
    }

    Ok((entries, skipped))
}

/// Import `legacy_path` into an empty database.
///
/// Does nothing when the file is absent or the database already has rows.
/// On any error the legacy file stays where it is.
pub fn import_legacy_history(db: &Database, blobs: &BlobStore, legacy_path: &Path) -> MigrationResult<MigrationReport> {
    if !legacy_path.is_file() {
        return Ok(MigrationReport::default());
    }
    if db.count_entries()? > 0 {
        info!(path = %legacy_path.display(), "Store already populated, leaving legacy history alone");
        return Ok(MigrationReport::default());
    }

    let raw = fs::read(legacy_path)?;
    let (mut entries, skipped) = decode_legacy(&raw, blobs)?;

    entries.reverse();
    db.insert_entries(&entries)?;
    fs::rename(legacy_path, backup_path(legacy_path))?;

    let report = MigrationReport { imported: entries.len(), skipped };
    info!(imported = report.imported, skipped = report.skipped, "Imported legacy clipboard history");
    Ok(report)
}
