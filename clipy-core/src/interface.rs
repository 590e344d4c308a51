//! Clipy public interface
//!
//! Shared types consumed by the presentation layer and the OS glue:
//! payloads, history entries, the clipboard collaborator trait and the
//! crate-wide error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Semantic classification tag of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmartType {
    Text,
    Url,
    Email,
    Code,
    Color,
    Image,
}

impl SmartType {
    /// Display title, also part of the searchable text
    pub fn title(&self) -> &'static str {
        match self {
            SmartType::Text => "Text",
            SmartType::Url => "URL",
            SmartType::Email => "Email",
            SmartType::Code => "Code",
            SmartType::Color => "Color",
            SmartType::Image => "Image",
        }
    }

    /// SF Symbol name for the category
    pub fn icon(&self) -> &'static str {
        match self {
            SmartType::Text => "doc.text",
            SmartType::Url => "link",
            SmartType::Email => "envelope",
            SmartType::Code => "chevron.left.forwardslash.chevron.right",
            SmartType::Color => "paintpalette",
            SmartType::Image => "photo",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SmartType::Text => "text",
            SmartType::Url => "url",
            SmartType::Email => "email",
            SmartType::Code => "code",
            SmartType::Color => "color",
            SmartType::Image => "image",
        }
    }
}

/// Type-safe clipboard payload. Images reference the blob store by key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClipboardPayload {
    Text {
        body: String,
        source_url: Option<String>,
    },
    Color {
        hex_code: String,
    },
    Image {
        blob_key: String,
    },
}

impl ClipboardPayload {
    /// Storage tag for the `kind` column
    pub fn kind(&self) -> &'static str {
        match self {
            ClipboardPayload::Text { .. } => "text",
            ClipboardPayload::Color { .. } => "color",
            ClipboardPayload::Image { .. } => "image",
        }
    }

    /// Literal content as the user sees it (images render as "Image")
    pub fn text_representation(&self) -> &str {
        match self {
            ClipboardPayload::Text { body, .. } => body,
            ClipboardPayload::Color { hex_code } => hex_code,
            ClipboardPayload::Image { .. } => "Image",
        }
    }

    /// The value stored in the `content` column
    pub fn stored_content(&self) -> &str {
        match self {
            ClipboardPayload::Text { body, .. } => body,
            ClipboardPayload::Color { hex_code } => hex_code,
            ClipboardPayload::Image { blob_key } => blob_key,
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        match self {
            ClipboardPayload::Text { source_url, .. } => source_url.as_deref(),
            ClipboardPayload::Color { .. } | ClipboardPayload::Image { .. } => None,
        }
    }

    pub fn blob_key(&self) -> Option<&str> {
        match self {
            ClipboardPayload::Image { blob_key } => Some(blob_key),
            ClipboardPayload::Text { .. } | ClipboardPayload::Color { .. } => None,
        }
    }
}

/// Clipboard representation types the monitor understands
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClipboardFlavor {
    PlainText,
    Png,
    Tiff,
    Jpeg,
    /// Generic "some raster image" flavor
    Image,
    /// Chromium's `org.chromium.source-url`
    SourceUrl,
    /// Safari's web archive (plist with the page's main resource URL)
    WebArchive,
    Other(String),
}

impl ClipboardFlavor {
    pub fn is_image(&self) -> bool {
        matches!(
            self,
            ClipboardFlavor::Png | ClipboardFlavor::Tiff | ClipboardFlavor::Jpeg | ClipboardFlavor::Image
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS (Structs)
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque, stable entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One persisted clipboard history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub payload: ClipboardPayload,
    pub created_at: DateTime<Utc>,
    pub source_app: Option<String>,
    pub is_pinned: bool,
    pub copy_count: u32,
    pub custom_metadata: Option<String>,
}

/// Emitted by the monitor after a capture has been committed
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEvent {
    pub entry: HistoryEntry,
    /// Id of the entry this capture replaced (dedup), if any
    pub replaced: Option<EntryId>,
    /// Ordering slot the replaced row held, for putting it back in place
    pub replaced_slot: Option<i64>,
    /// Store generation at commit time; bumped by every delete-all
    pub generation: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLIPBOARD COLLABORATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// The system clipboard, as seen by the monitor.
///
/// Implementations wrap the OS pasteboard. All reads are best-effort:
/// `None` means "not available", never an error.
pub trait ClipboardSource: Send + Sync {
    /// Generation counter that changes whenever the clipboard content changes
    fn change_count(&self) -> i64;

    /// Flavors currently on the clipboard
    fn available_flavors(&self) -> Vec<ClipboardFlavor>;

    fn read_string(&self, flavor: &ClipboardFlavor) -> Option<String>;

    fn read_data(&self, flavor: &ClipboardFlavor) -> Option<Vec<u8>>;

    /// Localized name of the frontmost application, excluding ourselves
    fn frontmost_app(&self) -> Option<String>;

    fn write_string(&self, text: &str);

    fn write_image(&self, png_bytes: &[u8]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for Clipy operations
#[derive(Debug, Error)]
pub enum ClipyError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Blob store error: {0}")]
    Blob(String),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Entry not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Operation cancelled")]
    Cancelled,
}

pub type ClipyResult<T> = Result<T, ClipyError>;

impl From<crate::database::DatabaseError> for ClipyError {
    fn from(e: crate::database::DatabaseError) -> Self {
        ClipyError::Database(e.to_string())
    }
}

impl From<crate::blob_store::BlobError> for ClipyError {
    fn from(e: crate::blob_store::BlobError) -> Self {
        match e {
            crate::blob_store::BlobError::NotFound(key) => ClipyError::NotFound(key),
            other => ClipyError::Blob(other.to_string()),
        }
    }
}

impl From<crate::migration::MigrationError> for ClipyError {
    fn from(e: crate::migration::MigrationError) -> Self {
        ClipyError::Migration(e.to_string())
    }
}

impl From<crate::config::ConfigError> for ClipyError {
    fn from(e: crate::config::ConfigError) -> Self {
        ClipyError::Config(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// Store operations the history projection depends on.
/// Implemented by `ClipboardStore`.
#[async_trait::async_trait]
pub trait ClipboardStoreApi: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────────
    // Read Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Index-backed search, newest first. Empty query returns recent entries.
    async fn search(&self, query: String) -> ClipyResult<Vec<HistoryEntry>>;

    /// Most recent entries, newest first
    fn load_recent(&self, limit: usize) -> ClipyResult<Vec<HistoryEntry>>;

    fn get_entry(&self, id: EntryId) -> ClipyResult<Option<HistoryEntry>>;

    /// Raw bytes of an image blob
    fn blob_bytes(&self, blob_key: &str) -> ClipyResult<Vec<u8>>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Write Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Insert or replace (by id)
    fn insert_entry(&self, entry: &HistoryEntry) -> ClipyResult<()>;

    /// Update an existing row; returns false if the row is gone
    fn update_entry(&self, entry: &HistoryEntry) -> ClipyResult<bool>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Delete Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Delete one entry, releasing its blob if nothing else references it
    fn delete_entry(&self, id: EntryId) -> ClipyResult<Option<HistoryEntry>>;

    /// Delete every entry and every blob they owned
    fn delete_all(&self) -> ClipyResult<usize>;
}
