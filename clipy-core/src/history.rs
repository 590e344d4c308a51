//! History service - the in-memory projection the UI renders
//!
//! Holds the working set of entries, applies capture events from the monitor,
//! filters by query, groups by date and tracks the selection. User mutations
//! are applied in memory immediately and written through a debounced saver.
//!
//! Capture/mutation races:
//! The monitor commits captures straight to the store while user mutations
//! may still be pending in the saver. Capture events are reconciled against
//! the working set here so neither side's change is lost, and events carry
//! the store generation so a delete-all can never be undone by a capture
//! committed before it.

use crate::config::HistoryConfig;
use crate::interface::{
    CaptureEvent, ClipboardPayload, ClipboardSource, ClipboardStoreApi, ClipyError, ClipyResult, EntryId,
    HistoryEntry,
};
use crate::models::QueryMatcher;
use crate::monitor::{ClipboardMonitor, TickOutcome};
use crate::privacy::{PrivacyFilter, PrivacySettings};
use crate::store::{init_rayon, ClipboardStore};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, TimeZone};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// DATE GROUPING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DateBucket {
    Today,
    Yesterday,
    ThisWeek,
    ThisMonth,
    Older,
}

impl DateBucket {
    /// Display order
    pub const ALL: [DateBucket; 5] = [
        DateBucket::Today,
        DateBucket::Yesterday,
        DateBucket::ThisWeek,
        DateBucket::ThisMonth,
        DateBucket::Older,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            DateBucket::Today => "Today",
            DateBucket::Yesterday => "Yesterday",
            DateBucket::ThisWeek => "This Week",
            DateBucket::ThisMonth => "This Month",
            DateBucket::Older => "Older",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            DateBucket::Today => "sun.max",
            DateBucket::Yesterday => "clock.arrow.circlepath",
            DateBucket::ThisWeek => "calendar",
            DateBucket::ThisMonth => "calendar.circle",
            DateBucket::Older => "archivebox",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Bucket for `created` relative to `now`, by calendar date in `now`'s zone.
///
/// Weeks start on Monday. Future timestamps (clock skew) count as today.
pub fn classify_date<Tz: TimeZone>(created: &DateTime<Tz>, now: &DateTime<Tz>) -> DateBucket {
    let today = now.date_naive();
    let date = created.with_timezone(&now.timezone()).date_naive();

    if date >= today {
        return DateBucket::Today;
    }
    if today.pred_opt() == Some(date) {
        return DateBucket::Yesterday;
    }

    let week_start = today - ChronoDuration::days(i64::from(today.weekday().num_days_from_monday()));
    if date >= week_start {
        return DateBucket::ThisWeek;
    }

    if date.year() == today.year() && date.month() == today.month() {
        return DateBucket::ThisMonth;
    }
    DateBucket::Older
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateSection {
    pub bucket: DateBucket,
    pub entries: Vec<EntryId>,
}

/// Pinned partition, date sections of the rest, and the flattened order
/// keyboard navigation walks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryProjection {
    pub pinned: Vec<EntryId>,
    /// Non-empty sections only, in display order
    pub sections: Vec<DateSection>,
    /// `pinned` followed by every section's entries
    pub visual_order: Vec<EntryId>,
}

impl HistoryProjection {
    /// Build from visible entries (newest first). Pinned entries appear only
    /// in the pinned partition, whatever their date.
    pub fn build<'a, I, Tz>(visible: I, now: &DateTime<Tz>) -> Self
    where
        I: IntoIterator<Item = &'a HistoryEntry>,
        Tz: TimeZone,
    {
        let mut pinned = Vec::new();
        let mut buckets: [Vec<EntryId>; 5] = Default::default();

        for entry in visible {
            if entry.is_pinned {
                pinned.push(entry.id);
            } else {
                let created = entry.created_at.with_timezone(&now.timezone());
                buckets[classify_date(&created, now).index()].push(entry.id);
            }
        }

        let sections: Vec<DateSection> = DateBucket::ALL
            .into_iter()
            .zip(buckets)
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(bucket, entries)| DateSection { bucket, entries })
            .collect();

        let mut visual_order = pinned.clone();
        visual_order.extend(sections.iter().flat_map(|s| s.entries.iter().copied()));

        Self { pinned, sections, visual_order }
    }

    pub fn is_empty(&self) -> bool {
        self.visual_order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.visual_order.len()
    }
}

/// Ids of entries matching `matcher`, preserving order
fn filter_ids(entries: &[HistoryEntry], matcher: &QueryMatcher, parallel: bool) -> Vec<EntryId> {
    if parallel {
        init_rayon();
        entries.par_iter().filter(|e| matcher.matches(e)).map(|e| e.id).collect()
    } else {
        entries.iter().filter(|e| matcher.matches(e)).map(|e| e.id).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEBOUNCED SAVER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    /// Update the row if it still exists
    Upsert(HistoryEntry),
    /// Insert the row, recreating it in `slot` if a capture replaced it
    Restore { entry: HistoryEntry, slot: Option<i64> },
    Delete,
}

/// Later writes to the same id replace earlier ones, except that an update
/// to a row being restored is still a restore.
fn merge_write(pending: &mut Vec<(EntryId, PendingWrite)>, id: EntryId, write: PendingWrite) {
    match pending.iter_mut().find(|(pending_id, _)| *pending_id == id) {
        Some(slot) => {
            slot.1 = match (&slot.1, write) {
                (PendingWrite::Restore { slot, .. }, PendingWrite::Upsert(entry)) => {
                    PendingWrite::Restore { entry, slot: *slot }
                }
                (_, write) => write,
            };
        }
        None => pending.push((id, write)),
    }
}

#[derive(Debug, Default)]
struct FlushReport {
    failed: usize,
    /// Ids whose row a delete actually removed
    deleted: Vec<EntryId>,
}

fn apply_writes(store: &ClipboardStore, writes: Vec<(EntryId, PendingWrite)>) -> FlushReport {
    let mut report = FlushReport::default();
    for (id, write) in writes {
        let result = match write {
            PendingWrite::Upsert(entry) => store.update_entry(&entry).map(|updated| {
                if !updated {
                    debug!(id = %id, "Row gone before pending update landed");
                }
            }),
            PendingWrite::Restore { entry, slot } => store.restore_entry(&entry, slot),
            PendingWrite::Delete => store.delete_entry(id).map(|removed| {
                if removed.is_some() {
                    report.deleted.push(id);
                }
            }),
        };
        if let Err(e) = result {
            warn!(id = %id, error = %e, "Pending history write failed");
            report.failed += 1;
        }
    }
    report
}

struct SaverShared {
    store: Arc<ClipboardStore>,
    pending: Mutex<Vec<(EntryId, PendingWrite)>>,
    /// Serializes flushes and delete-all
    gate: tokio::sync::Mutex<()>,
    flushes: AtomicUsize,
    /// Rows removed by flushed deletes, not yet collected by the service
    deleted: Mutex<Vec<EntryId>>,
}

impl SaverShared {
    async fn flush(&self) {
        let _gate = self.gate.lock().await;
        let writes = std::mem::take(&mut *self.pending.lock());
        if writes.is_empty() {
            return;
        }

        let count = writes.len();
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || apply_writes(&store, writes)).await {
            Ok(report) => {
                if report.failed == 0 {
                    debug!(count, "Flushed pending history writes");
                } else {
                    warn!(count, failed = report.failed, "Flushed pending history writes with failures");
                }
                self.deleted.lock().extend(report.deleted);
            }
            Err(e) => warn!(error = %e, "History flush task failed"),
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Coalesces user mutations and writes them after a quiet period
pub struct DebouncedSaver {
    shared: Arc<SaverShared>,
    delay: Duration,
    timer: Mutex<Option<CancellationToken>>,
}

impl DebouncedSaver {
    pub fn new(store: Arc<ClipboardStore>, delay: Duration) -> Self {
        let shared = Arc::new(SaverShared {
            store,
            pending: Mutex::new(Vec::new()),
            gate: tokio::sync::Mutex::new(()),
            flushes: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        });
        Self { shared, delay, timer: Mutex::new(None) }
    }

    /// Queue a write and restart the quiet-period timer
    pub fn schedule(&self, id: EntryId, write: PendingWrite) {
        merge_write(&mut self.shared.pending.lock(), id, write);
        self.restart_timer();
    }

    fn restart_timer(&self) {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.cancel();
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, pending writes wait for an explicit flush");
            return;
        };

        let token = CancellationToken::new();
        let timer_token = token.clone();
        let shared = Arc::clone(&self.shared);
        let delay = self.delay;
        runtime.spawn(async move {
            tokio::select! {
                _ = timer_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => shared.flush().await,
            }
        });
        *timer = Some(token);
    }

    fn cancel_timer(&self) {
        if let Some(token) = self.timer.lock().take() {
            token.cancel();
        }
    }

    /// Write everything pending now
    pub async fn flush(&self) {
        self.cancel_timer();
        self.shared.flush().await;
    }

    /// Drop pending writes and delete every entry, after any in-flight flush.
    /// Returns the number of rows removed.
    pub async fn clear_all(&self) -> ClipyResult<usize> {
        self.cancel_timer();
        let _gate = self.shared.gate.lock().await;
        let dropped = std::mem::take(&mut *self.shared.pending.lock()).len();
        self.shared.deleted.lock().clear();
        if dropped > 0 {
            debug!(dropped, "Dropped pending writes before delete-all");
        }

        let store = Arc::clone(&self.shared.store);
        tokio::task::spawn_blocking(move || store.delete_all())
            .await
            .map_err(|_| ClipyError::Cancelled)?
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Ids whose rows flushed deletes have removed since the last call
    pub fn take_deleted(&self) -> Vec<EntryId> {
        std::mem::take(&mut *self.shared.deleted.lock())
    }

    /// Number of flushes that wrote at least one change
    pub fn flush_count(&self) -> usize {
        self.shared.flushes.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HISTORY SERVICE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct HistoryService {
    config: HistoryConfig,
    store: Arc<ClipboardStore>,
    source: Arc<dyn ClipboardSource>,
    privacy: Arc<PrivacyFilter>,
    monitor: ClipboardMonitor,
    captures: mpsc::UnboundedReceiver<CaptureEvent>,
    saver: DebouncedSaver,

    /// Working set, newest first
    entries: Arc<Vec<HistoryEntry>>,
    /// Deleted by the user; a capture replacing one of these starts fresh
    user_deleted: HashSet<EntryId>,
    /// Store generation as of the last delete-all
    generation: u64,

    query: String,
    visible: HashSet<EntryId>,
    projection: HistoryProjection,
    selection: Option<EntryId>,
}

impl HistoryService {
    /// Open the store in `config.data_dir` (migrating legacy history) and
    /// load the most recent `config.history_limit` entries.
    pub async fn open(config: HistoryConfig, source: Arc<dyn ClipboardSource>) -> ClipyResult<Self> {
        let data_dir = config.data_dir.clone();
        let limit = config.history_limit;
        let (store, entries) = tokio::task::spawn_blocking(move || -> ClipyResult<_> {
            let store = ClipboardStore::open(&data_dir)?;
            let entries = store.load_recent(limit)?;
            Ok((store, entries))
        })
        .await
        .map_err(|_| ClipyError::Cancelled)??;

        let store = Arc::new(store);
        let privacy = Arc::new(PrivacyFilter::new(config.privacy.clone()));
        let (monitor, captures) = ClipboardMonitor::new(
            Arc::clone(&source),
            Arc::clone(&store),
            Arc::clone(&privacy),
            config.poll_interval(),
        );
        let saver = DebouncedSaver::new(Arc::clone(&store), config.save_debounce());
        let generation = store.generation();

        info!(entries = entries.len(), data_dir = %config.data_dir.display(), "History loaded");

        let mut service = Self {
            config,
            store,
            source,
            privacy,
            monitor,
            captures,
            saver,
            entries: Arc::new(entries),
            user_deleted: HashSet::new(),
            generation,
            query: String::new(),
            visible: HashSet::new(),
            projection: HistoryProjection::default(),
            selection: None,
        };
        service.refresh().await;
        Ok(service)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Monitoring
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn start_monitoring(&self) -> ClipyResult<()> {
        self.monitor.start()
    }

    pub fn stop_monitoring(&self) {
        self.monitor.stop()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    /// Poll the clipboard once outside the monitoring loop. The resulting
    /// event is applied by the next `apply_pending_captures`.
    pub fn poll_clipboard(&self) -> TickOutcome {
        self.monitor.poll_once()
    }

    /// Apply every capture event already received. Returns how many changed
    /// the working set.
    pub async fn apply_pending_captures(&mut self) -> usize {
        let applied = self.drain_captures();
        if applied > 0 {
            self.refresh().await;
        }
        applied
    }

    /// Wait for the next capture that changes the working set, apply it and
    /// anything queued behind it. Returns the entry as shown.
    pub async fn next_capture(&mut self) -> Option<HistoryEntry> {
        loop {
            let event = self.captures.recv().await?;
            if let Some(id) = self.apply_capture(event) {
                self.drain_captures();
                self.refresh().await;
                return self.entry(id).cloned();
            }
        }
    }

    fn drain_captures(&mut self) -> usize {
        self.forget_settled_deletes();
        let mut applied = 0;
        while let Ok(event) = self.captures.try_recv() {
            if self.apply_capture(event).is_some() {
                applied += 1;
            }
        }
        applied
    }

    /// Stop tracking deleted ids whose rows are gone from the store
    fn forget_settled_deletes(&mut self) {
        for id in self.saver.take_deleted() {
            self.user_deleted.remove(&id);
        }
    }

    /// Reconcile one committed capture with the working set
    fn apply_capture(&mut self, event: CaptureEvent) -> Option<EntryId> {
        if event.generation < self.generation {
            debug!(id = %event.entry.id, "Discarding capture committed before delete-all");
            return None;
        }

        let mut entry = event.entry;
        let mut needs_write = false;
        let entries = Arc::make_mut(&mut self.entries);

        if let Some(replaced) = event.replaced {
            if self.user_deleted.remove(&replaced) {
                // The store merged into a row the user already deleted
                reset_to_fresh(&mut entry);
                needs_write = true;
            } else if let Some(index) = entries.iter().position(|e| e.id == replaced) {
                let previous = entries.remove(index);
                if previous.payload == entry.payload {
                    if previous.is_pinned != entry.is_pinned || previous.custom_metadata != entry.custom_metadata {
                        entry.is_pinned = previous.is_pinned;
                        entry.custom_metadata = previous.custom_metadata;
                        needs_write = true;
                    }
                } else {
                    // Edited in memory before the capture merged into its old row
                    let restore = PendingWrite::Restore { entry: previous.clone(), slot: event.replaced_slot };
                    self.saver.schedule(previous.id, restore);
                    entries.insert(index, previous);
                    reset_to_fresh(&mut entry);
                    needs_write = true;
                }
            }
        }

        // Edited in memory to this same content before the edit was written
        if let Some(index) = entries.iter().position(|e| e.id != entry.id && e.payload == entry.payload) {
            let duplicate = entries.remove(index);
            entry.is_pinned |= duplicate.is_pinned;
            if entry.custom_metadata.is_none() {
                entry.custom_metadata = duplicate.custom_metadata.clone();
            }
            entry.copy_count = entry.copy_count.max(duplicate.copy_count.saturating_add(1));
            self.saver.schedule(duplicate.id, PendingWrite::Delete);
            needs_write = true;
        }

        entries.retain(|e| e.id != entry.id);
        if needs_write {
            self.saver.schedule(entry.id, PendingWrite::Upsert(entry.clone()));
        }
        let id = entry.id;
        entries.insert(0, entry);
        Some(id)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────────

    fn position(&self, id: EntryId) -> ClipyResult<usize> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| ClipyError::NotFound(id.to_string()))
    }

    /// Flip the pin flag. Returns the new state.
    pub async fn toggle_pin(&mut self, id: EntryId) -> ClipyResult<bool> {
        let index = self.position(id)?;
        let entries = Arc::make_mut(&mut self.entries);
        let entry = &mut entries[index];
        entry.is_pinned = !entry.is_pinned;
        let pinned = entry.is_pinned;
        self.saver.schedule(id, PendingWrite::Upsert(entry.clone()));
        self.refresh().await;
        Ok(pinned)
    }

    /// Replace the body of a text entry, keeping its source URL.
    ///
    /// Rejects empty text, non-text entries, and text that another entry
    /// already holds.
    pub async fn edit_text(&mut self, id: EntryId, text: &str) -> ClipyResult<()> {
        if text.trim().is_empty() {
            return Err(ClipyError::InvalidInput("text must not be empty".into()));
        }
        let index = self.position(id)?;
        let ClipboardPayload::Text { source_url, .. } = &self.entries[index].payload else {
            return Err(ClipyError::InvalidInput("only text entries can be edited".into()));
        };

        let payload = ClipboardPayload::Text { body: text.to_string(), source_url: source_url.clone() };
        if payload == self.entries[index].payload {
            return Ok(());
        }
        if self.payload_taken(&payload, id).await? {
            return Err(ClipyError::InvalidInput("another entry already holds this text".into()));
        }

        let entries = Arc::make_mut(&mut self.entries);
        let entry = &mut entries[index];
        entry.payload = payload;
        self.saver.schedule(id, PendingWrite::Upsert(entry.clone()));
        self.refresh().await;
        Ok(())
    }

    async fn payload_taken(&self, payload: &ClipboardPayload, except: EntryId) -> ClipyResult<bool> {
        if self.entries.iter().any(|e| e.id != except && &e.payload == payload) {
            return Ok(true);
        }
        // Rows outside the working set. Rows we hold in memory (or deleted)
        // are about to be overwritten by pending writes.
        let store = Arc::clone(&self.store);
        let lookup = payload.clone();
        let row = tokio::task::spawn_blocking(move || store.find_by_payload(&lookup))
            .await
            .map_err(|_| ClipyError::Cancelled)??;
        Ok(row.is_some_and(|row| {
            row.id != except && !self.user_deleted.contains(&row.id) && !self.entries.iter().any(|e| e.id == row.id)
        }))
    }

    /// Set the user note on an entry. Blank text clears it.
    pub async fn set_metadata(&mut self, id: EntryId, metadata: Option<&str>) -> ClipyResult<()> {
        let index = self.position(id)?;
        let metadata = metadata.map(str::trim).filter(|m| !m.is_empty()).map(str::to_string);
        if self.entries[index].custom_metadata == metadata {
            return Ok(());
        }

        let entries = Arc::make_mut(&mut self.entries);
        let entry = &mut entries[index];
        entry.custom_metadata = metadata;
        self.saver.schedule(id, PendingWrite::Upsert(entry.clone()));
        self.refresh().await;
        Ok(())
    }

    pub async fn delete(&mut self, id: EntryId) -> ClipyResult<HistoryEntry> {
        let index = self.position(id)?;
        let removed = Arc::make_mut(&mut self.entries).remove(index);
        self.forget_settled_deletes();
        self.user_deleted.insert(id);
        self.saver.schedule(id, PendingWrite::Delete);
        if self.selection == Some(id) {
            self.selection = None;
        }
        self.refresh().await;
        Ok(removed)
    }

    /// Delete every entry and image now. Captures committed before this call
    /// are discarded when they arrive. Returns the number of rows removed.
    pub async fn delete_all(&mut self) -> ClipyResult<usize> {
        let removed = self.saver.clear_all().await?;
        self.generation = self.store.generation();
        self.entries = Arc::new(Vec::new());
        self.user_deleted.clear();
        self.selection = None;
        self.refresh().await;
        info!(removed, "History cleared");
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Filtering & Selection
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn set_query(&mut self, query: &str) {
        if self.query == query {
            return;
        }
        self.query = query.to_string();
        self.refresh().await;
    }

    /// Recompute the visible set and projection, then fix up the selection
    async fn refresh(&mut self) {
        let matcher = QueryMatcher::new(&self.query);
        let parallel = !matcher.is_all() && self.entries.len() > self.config.parallel_filter_threshold;

        let ids = if parallel {
            let entries = Arc::clone(&self.entries);
            let task_matcher = matcher.clone();
            match tokio::task::spawn_blocking(move || filter_ids(&entries, &task_matcher, true)).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(error = %e, "Parallel filter failed, filtering inline");
                    filter_ids(&self.entries, &matcher, false)
                }
            }
        } else {
            filter_ids(&self.entries, &matcher, false)
        };

        self.visible = ids.into_iter().collect();
        self.projection =
            HistoryProjection::build(self.entries.iter().filter(|e| self.visible.contains(&e.id)), &Local::now());
        self.ensure_selection();
    }

    /// Keep the selection if still visible, else select the first visible entry
    pub fn ensure_selection(&mut self) {
        if let Some(selected) = self.selection {
            if self.visible.contains(&selected) {
                return;
            }
        }
        self.selection = self.projection.visual_order.first().copied();
    }

    /// Move the selection by `offset` rows in visual order, clamped to the ends
    pub fn move_selection(&mut self, offset: isize) -> Option<EntryId> {
        let order = &self.projection.visual_order;
        if order.is_empty() {
            self.selection = None;
            return None;
        }

        let current = self
            .selection
            .and_then(|id| order.iter().position(|o| *o == id))
            .map_or(-1, |i| i as isize);
        let target = current.saturating_add(offset).clamp(0, order.len() as isize - 1) as usize;
        self.selection = Some(order[target]);
        self.selection
    }

    /// Select a visible entry. Returns false if it is not visible.
    pub fn select(&mut self, id: EntryId) -> bool {
        if self.visible.contains(&id) {
            self.selection = Some(id);
            true
        } else {
            false
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Passthroughs
    // ─────────────────────────────────────────────────────────────────────────────

    /// Index-backed search over the whole store, not just the working set
    pub async fn search(&self, query: &str) -> ClipyResult<Vec<HistoryEntry>> {
        self.store.search(query.to_string()).await
    }

    pub fn blob_bytes(&self, blob_key: &str) -> ClipyResult<Vec<u8>> {
        self.store.blob_bytes(blob_key)
    }

    /// Put an entry's content back on the system clipboard
    pub fn copy_to_clipboard(&self, id: EntryId) -> ClipyResult<()> {
        let entry = self.entry(id).ok_or_else(|| ClipyError::NotFound(id.to_string()))?;
        match &entry.payload {
            ClipboardPayload::Text { body, .. } => self.source.write_string(body),
            ClipboardPayload::Color { hex_code } => self.source.write_string(hex_code),
            ClipboardPayload::Image { blob_key } => {
                let bytes = self.store.blob_bytes(blob_key)?;
                self.source.write_image(&bytes);
            }
        }
        debug!(id = %id, "Copied entry to clipboard");
        Ok(())
    }

    pub async fn flush(&self) {
        self.saver.flush().await
    }

    /// Stop monitoring, apply outstanding captures and write pending changes
    pub async fn shutdown(&mut self) {
        self.monitor.stop();
        self.apply_pending_captures().await;
        self.saver.flush().await;
        info!("History service shut down");
    }

    /// Replace the privacy settings used by the monitor
    pub fn update_privacy(&mut self, settings: PrivacySettings) {
        self.privacy.update(settings);
        self.config.privacy = self.privacy.snapshot();
    }

    /// Persist the current configuration (including privacy lists) to
    /// `settings.json` in the data directory
    pub fn save_settings(&mut self) -> ClipyResult<()> {
        self.config.privacy = self.privacy.snapshot();
        self.config.save(self.config.settings_path())?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────────

    /// Working set, newest first
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries matching the current query, newest first
    pub fn filtered(&self) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| self.visible.contains(&e.id)).collect()
    }

    pub fn is_visible(&self, id: EntryId) -> bool {
        self.visible.contains(&id)
    }

    pub fn projection(&self) -> &HistoryProjection {
        &self.projection
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn selection(&self) -> Option<EntryId> {
        self.selection
    }

    pub fn selected_entry(&self) -> Option<&HistoryEntry> {
        self.selection.and_then(|id| self.entry(id))
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ClipboardStore> {
        &self.store
    }

    pub fn privacy(&self) -> &Arc<PrivacyFilter> {
        &self.privacy
    }

    pub fn saver(&self) -> &DebouncedSaver {
        &self.saver
    }
}

fn reset_to_fresh(entry: &mut HistoryEntry) {
    entry.is_pinned = false;
    entry.custom_metadata = None;
    entry.copy_count = 1;
}
