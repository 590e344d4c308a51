//! ClipboardStore - coordinating handle over the record store and the blob store
//!
//! Read-modify-write sequences (dedup lookup → replace, row delete → blob
//! release, blob write → row insert) run under one write lock so the monitor
//! task and flush tasks never interleave them.
//!
//! Async Cancellation Architecture:
//! Dropping a search future drops a DropGuard that triggers a CancellationToken.
//! The blocking search thread checks the token before and after the query.

use crate::blob_store::BlobStore;
use crate::config::{DATABASE_FILE, IMAGES_DIR, LEGACY_HISTORY_FILE};
use crate::database::Database;
use crate::interface::{
    CaptureEvent, ClipboardPayload, ClipboardStoreApi, ClipyError, ClipyResult, EntryId, HistoryEntry,
};
use crate::migration::{self, MigrationReport};
use crate::models::payload_hash;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maximum number of rows returned by an index-backed search
pub const SEARCH_RESULT_LIMIT: usize = 5000;

/// Fallback Tokio runtime for async calls made outside any runtime context.
/// `None` if it could not be built, in which case searches run inline.
static FALLBACK_RUNTIME: Lazy<Option<tokio::runtime::Runtime>> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .ok()
});

static RAYON_INIT: Once = Once::new();

/// Initialize global Rayon thread pool with core reservation and lower priority
pub(crate) fn init_rayon() {
    RAYON_INIT.call_once(|| {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        // Reserve 2 cores for Tokio to ensure responsiveness, but use at least 1 thread.
        let rayon_threads = num_threads.saturating_sub(2).max(1);

        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(rayon_threads)
            .thread_name(|i| format!("clipy-rayon-{}", i))
            .start_handler(|_| {
                // Lower Rayon thread priority so Tokio worker threads preempt them easily.
                use thread_priority::*;
                let _ = set_current_thread_priority(ThreadPriority::Min);
            })
            .build_global();
    });
}

/// RAII guard that cancels a token when dropped.
struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Thread-safe clipboard store with SQLite + content-addressed blobs
///
/// Concurrency Model:
/// - Database uses r2d2 connection pool (concurrent reads, no mutex blocking)
/// - Writes that span table and blob directory hold `write_lock`
/// - Search is async with cancellation support via CancellationToken
/// - Blocking work runs on tokio::spawn_blocking threads
pub struct ClipboardStore {
    db: Arc<Database>,
    blobs: BlobStore,
    write_lock: Mutex<()>,
    generation: AtomicU64,
    data_dir: PathBuf,
    migration: MigrationReport,
}

impl ClipboardStore {
    /// Open the store under `data_dir`: database, blob directory, legacy import, blob GC
    pub fn open<P: AsRef<Path>>(data_dir: P) -> ClipyResult<Self> {
        init_rayon();
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).map_err(|e| ClipyError::Database(e.to_string()))?;

        let db = Database::open(data_dir.join(DATABASE_FILE))?;
        let blobs = BlobStore::new(data_dir.join(IMAGES_DIR))?;

        let (migration, import_failed) =
            match migration::import_legacy_history(&db, &blobs, &data_dir.join(LEGACY_HISTORY_FILE)) {
                Ok(report) => (report, false),
                Err(e) => {
                    warn!(error = %e, "Legacy history import failed, leaving file in place");
                    (MigrationReport::default(), true)
                }
            };

        let store = Self {
            db: Arc::new(db),
            blobs,
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            data_dir,
            migration,
        };

        // Legacy images stay on disk until a later import succeeds
        let collected = if import_failed { Ok(0) } else { store.collect_orphaned_blobs() };
        match collected {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed orphaned image blobs"),
            Err(e) => warn!(error = %e, "Blob garbage collection failed"),
        }

        info!(
            path = %store.data_dir.display(),
            entries = store.db.count_entries().unwrap_or(0),
            "Clipboard store opened"
        );
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Outcome of the legacy import performed at open
    pub fn migration_report(&self) -> MigrationReport {
        self.migration
    }

    /// Incremented by every delete-all. Captures committed earlier carry a lower value.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn count_entries(&self) -> ClipyResult<u64> {
        Ok(self.db.count_entries()?)
    }

    /// Number of documents held by the full-text index
    pub fn fts_row_count(&self) -> ClipyResult<u64> {
        Ok(self.db.fts_row_count()?)
    }

    pub fn database_size(&self) -> ClipyResult<i64> {
        Ok(self.db.database_size()?)
    }

    /// Get a tokio runtime handle - uses current runtime if available, otherwise global fallback
    fn runtime_handle(&self) -> Option<tokio::runtime::Handle> {
        tokio::runtime::Handle::try_current()
            .ok()
            .or_else(|| FALLBACK_RUNTIME.as_ref().map(|rt| rt.handle().clone()))
    }

    fn collect_orphaned_blobs(&self) -> ClipyResult<usize> {
        let _guard = self.write_lock.lock();
        let valid = self.db.blob_keys()?;
        Ok(self.blobs.retain(&valid)?)
    }

    /// Delete a blob if no row references it any more. Caller holds the write lock.
    fn release_blob_locked(&self, blob_key: &str) {
        match self.db.count_blob_references(blob_key) {
            Ok(0) => {
                if let Err(e) = self.blobs.delete(blob_key) {
                    warn!(key = %blob_key, error = %e, "Failed to delete image blob");
                }
            }
            Ok(_) => debug!(key = %blob_key, "Blob still referenced, keeping"),
            Err(e) => warn!(key = %blob_key, error = %e, "Blob reference check failed"),
        }
    }

    /// Dedup-or-insert. Caller holds the write lock.
    fn commit_locked(
        &self,
        payload: ClipboardPayload,
        source_app: Option<String>,
        now: DateTime<Utc>,
    ) -> ClipyResult<CaptureEvent> {
        let generation = self.generation.load(Ordering::SeqCst);
        let existing = self
            .db
            .find_by_hash(&payload_hash(&payload))?
            .filter(|entry| entry.payload == payload);

        match existing {
            Some(existing) => {
                let replacement = existing.recaptured(source_app, now);
                let replaced_slot = self.db.replace_entry(Some(existing.id), &replacement)?;
                debug!(
                    old = %existing.id,
                    new = %replacement.id,
                    copy_count = replacement.copy_count,
                    "Deduplicated capture"
                );
                Ok(CaptureEvent { entry: replacement, replaced: Some(existing.id), replaced_slot, generation })
            }
            None => {
                let entry = HistoryEntry::new_at(payload, source_app, now);
                self.db.insert_entry(&entry)?;
                debug!(id = %entry.id, kind = entry.payload.kind(), "Captured new entry");
                Ok(CaptureEvent { entry, replaced: None, replaced_slot: None, generation })
            }
        }
    }

    /// Commit a captured payload: bump and move an equal entry to the front,
    /// or insert a new one.
    pub fn commit_capture(&self, payload: ClipboardPayload, source_app: Option<String>) -> ClipyResult<CaptureEvent> {
        let _guard = self.write_lock.lock();
        self.commit_locked(payload, source_app, Utc::now())
    }

    /// Store PNG bytes and commit the resulting image payload.
    /// The blob write and the row insert happen under the same lock so a
    /// concurrent delete cannot release the blob in between.
    pub fn commit_image(&self, png_bytes: &[u8], source_app: Option<String>) -> ClipyResult<CaptureEvent> {
        let _guard = self.write_lock.lock();
        let blob_key = self.blobs.put(png_bytes)?;
        self.commit_locked(ClipboardPayload::Image { blob_key }, source_app, Utc::now())
    }

    /// Stored entry whose payload equals `payload`, if any
    pub fn find_by_payload(&self, payload: &ClipboardPayload) -> ClipyResult<Option<HistoryEntry>> {
        Ok(self
            .db
            .find_by_hash(&payload_hash(payload))?
            .filter(|entry| &entry.payload == payload))
    }

    /// Recreate an entry a capture replaced, in the slot it held
    pub fn restore_entry(&self, entry: &HistoryEntry, slot: Option<i64>) -> ClipyResult<()> {
        let _guard = self.write_lock.lock();
        Ok(self.db.restore_entry(entry, slot)?)
    }

    /// Insert entries oldest-first in one transaction (bulk import)
    pub fn insert_entries(&self, entries: &[HistoryEntry]) -> ClipyResult<()> {
        let _guard = self.write_lock.lock();
        Ok(self.db.insert_entries(entries)?)
    }

    /// Blob keys referenced by the given entries, deduplicated
    fn blob_keys_of(entries: &[HistoryEntry]) -> HashSet<&str> {
        entries.iter().filter_map(|e| e.payload.blob_key()).collect()
    }
}

#[async_trait::async_trait]
impl ClipboardStoreApi for ClipboardStore {
    /// Index-backed search, newest first.
    ///
    /// This is an async function that supports cancellation. When the caller
    /// drops the future, the DropGuard triggers the CancellationToken.
    async fn search(&self, query: String) -> ClipyResult<Vec<HistoryEntry>> {
        let trimmed = query.trim().to_string();
        if trimmed.is_empty() {
            return Ok(self.db.load_recent(SEARCH_RESULT_LIMIT)?);
        }

        let token = CancellationToken::new();
        let _guard = DropGuard::new(token.clone());

        let db = Arc::clone(&self.db);
        let token_clone = token.clone();
        let run = move || -> ClipyResult<Vec<HistoryEntry>> {
            if token_clone.is_cancelled() {
                return Err(ClipyError::Cancelled);
            }
            let results = db.search(&trimmed, SEARCH_RESULT_LIMIT)?;
            if token_clone.is_cancelled() {
                return Err(ClipyError::Cancelled);
            }
            Ok(results)
        };

        let Some(runtime) = self.runtime_handle() else {
            return run();
        };

        match runtime.spawn_blocking(run).await {
            Ok(result) => result,
            // JoinError means the task panicked or was aborted
            Err(_join_error) => Err(ClipyError::Cancelled),
        }
    }

    fn load_recent(&self, limit: usize) -> ClipyResult<Vec<HistoryEntry>> {
        Ok(self.db.load_recent(limit)?)
    }

    fn get_entry(&self, id: EntryId) -> ClipyResult<Option<HistoryEntry>> {
        Ok(self.db.get_entry(id)?)
    }

    fn blob_bytes(&self, blob_key: &str) -> ClipyResult<Vec<u8>> {
        Ok(self.blobs.get(blob_key)?)
    }

    fn insert_entry(&self, entry: &HistoryEntry) -> ClipyResult<()> {
        let _guard = self.write_lock.lock();
        Ok(self.db.insert_entry(entry)?)
    }

    fn update_entry(&self, entry: &HistoryEntry) -> ClipyResult<bool> {
        let _guard = self.write_lock.lock();
        Ok(self.db.update_entry(entry)?)
    }

    fn delete_entry(&self, id: EntryId) -> ClipyResult<Option<HistoryEntry>> {
        let _guard = self.write_lock.lock();
        let removed = self.db.delete_entry(id)?;
        if let Some(blob_key) = removed.as_ref().and_then(|e| e.payload.blob_key()) {
            self.release_blob_locked(blob_key);
        }
        Ok(removed)
    }

    fn delete_all(&self) -> ClipyResult<usize> {
        let _guard = self.write_lock.lock();
        let removed = self.db.delete_all()?;
        for blob_key in Self::blob_keys_of(&removed) {
            self.release_blob_locked(blob_key);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(count = removed.len(), "Cleared clipboard history");
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, ClipboardStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipboardStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn text(body: &str) -> ClipboardPayload {
        ClipboardPayload::Text { body: body.to_string(), source_url: None }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_store_creation() {
        let (dir, store) = open_store();
        assert!(dir.path().join(DATABASE_FILE).exists());
        assert!(dir.path().join(IMAGES_DIR).is_dir());
        assert_eq!(store.count_entries().unwrap(), 0);
        assert!(store.database_size().unwrap() > 0);
    }

    #[test]
    fn test_duplicate_capture_bumps_count() {
        let (_dir, store) = open_store();
        let first = store.commit_capture(text("Hello"), Some("Safari".into())).unwrap();
        assert_eq!(first.replaced, None);

        let second = store.commit_capture(text("Hello"), Some("Terminal".into())).unwrap();
        assert_eq!(second.replaced, Some(first.entry.id));
        assert_eq!(second.entry.copy_count, 2);
        assert_eq!(second.entry.source_app.as_deref(), Some("Terminal"));

        let all = store.load_recent(10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], second.entry);
        assert_eq!(store.fts_row_count().unwrap(), 1);
    }

    #[test]
    fn test_dedup_preserves_pin_and_metadata_and_moves_to_front() {
        let (_dir, store) = open_store();
        let dup = store.commit_capture(text("dup"), None).unwrap().entry;
        store.commit_capture(text("newer"), None).unwrap();

        let mut pinned = dup.clone();
        pinned.is_pinned = true;
        pinned.custom_metadata = Some("important".to_string());
        pinned.created_at = Utc::now() - chrono::Duration::days(30);
        assert!(store.update_entry(&pinned).unwrap());

        let event = store.commit_capture(text("dup"), None).unwrap();
        assert!(event.entry.is_pinned);
        assert_eq!(event.entry.custom_metadata.as_deref(), Some("important"));
        assert!(event.entry.created_at > pinned.created_at);

        let all = store.load_recent(10).unwrap();
        assert_eq!(all[0].id, event.entry.id);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_text_and_color_with_same_content_are_distinct() {
        let (_dir, store) = open_store();
        store.commit_capture(text("#FFF"), None).unwrap();
        store.commit_capture(ClipboardPayload::Color { hex_code: "#FFF".into() }, None).unwrap();
        assert_eq!(store.count_entries().unwrap(), 2);
    }

    #[test]
    fn test_body_and_source_url_split_do_not_collide() {
        let (_dir, store) = open_store();
        let joined = text("a\0b");
        let split = ClipboardPayload::Text { body: "a".into(), source_url: Some("b".into()) };

        let first = store.commit_capture(joined.clone(), None).unwrap();
        store.commit_capture(split, None).unwrap();
        let again = store.commit_capture(joined.clone(), None).unwrap();

        assert_eq!(again.replaced, Some(first.entry.id));
        let all = store.load_recent(10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|e| e.payload == joined).count(), 1);
    }

    #[test]
    fn test_identical_images_share_one_blob() {
        let (_dir, store) = open_store();
        let a = store.commit_image(b"png-a", None).unwrap();
        let b = store.commit_image(b"png-a", None).unwrap();
        let c = store.commit_image(b"png-b", None).unwrap();

        assert_eq!(b.replaced, Some(a.entry.id));
        assert_eq!(a.entry.payload, b.entry.payload);
        assert_ne!(a.entry.payload, c.entry.payload);

        let files = std::fs::read_dir(store.blob_store().dir()).unwrap().count();
        assert_eq!(files, 2);
    }

    #[test]
    fn test_delete_releases_blob_only_without_references() {
        let (_dir, store) = open_store();
        let key = store.blob_store().put(b"shared pixels").unwrap();
        let first = HistoryEntry::new(ClipboardPayload::Image { blob_key: key.clone() }, None);
        let second = HistoryEntry::new(ClipboardPayload::Image { blob_key: key.clone() }, None);
        store.insert_entry(&first).unwrap();
        store.insert_entry(&second).unwrap();

        store.delete_entry(first.id).unwrap();
        assert_eq!(store.blob_bytes(&key).unwrap(), b"shared pixels");

        store.delete_entry(second.id).unwrap();
        assert!(!store.blob_store().contains(&key));
        assert!(matches!(store.blob_bytes(&key), Err(ClipyError::NotFound(_))));
    }

    #[test]
    fn test_delete_all_removes_blobs() {
        let (_dir, store) = open_store();
        let image = store.commit_image(b"pixels", None).unwrap().entry;
        store.commit_capture(text("words"), None).unwrap();

        assert_eq!(store.generation(), 0);
        assert_eq!(store.delete_all().unwrap(), 2);
        assert_eq!(store.generation(), 1);
        assert_eq!(store.count_entries().unwrap(), 0);
        assert_eq!(store.fts_row_count().unwrap(), 0);
        let key = image.payload.blob_key().unwrap();
        assert!(!store.blob_store().contains(key));
    }

    #[test]
    fn test_open_collects_orphaned_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let (kept, orphan) = {
            let store = ClipboardStore::open(dir.path()).unwrap();
            let kept = store.commit_image(b"kept", None).unwrap().entry;
            let orphan = store.blob_store().put(b"crashed before insert").unwrap();
            (kept, orphan)
        };

        let store = ClipboardStore::open(dir.path()).unwrap();
        assert!(store.blob_store().contains(kept.payload.blob_key().unwrap()));
        assert!(!store.blob_store().contains(&orphan));
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        let guard = DropGuard::new(token.clone());
        assert!(!token.is_cancelled());

        drop(guard);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_async_search_cancellation_via_drop() {
        let (_dir, store) = open_store();
        for i in 0..100 {
            store.commit_capture(text(&format!("Item number {} with some text content", i)), None).unwrap();
        }

        let search_future = store.search("item".to_string());
        drop(search_future);

        // Store is still usable afterwards
        let results = store.search("item".to_string()).await.unwrap();
        assert_eq!(results.len(), 100);
    }

    #[tokio::test]
    async fn test_search_newest_first() {
        let (_dir, store) = open_store();
        let a = store.commit_capture(text("rust ownership"), None).unwrap().entry;
        store.commit_capture(text("swift optionals"), None).unwrap();
        let c = store.commit_capture(text("rust lifetimes"), None).unwrap().entry;

        let ids: Vec<EntryId> = store.search("rust".into()).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![c.id, a.id]);

        let all = store.search("  ".into()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_search_on_current_thread_runtime() {
        let (_dir, store) = open_store();
        store.commit_capture(text("Hello World"), None).unwrap();

        let rt = runtime();
        let results = rt.block_on(store.search("hello".to_string())).unwrap();
        assert_eq!(results.len(), 1);
    }
}
