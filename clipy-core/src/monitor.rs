//! Clipboard monitor
//!
//! Polls the clipboard's change counter on a tokio task. When the counter
//! moves, the current content is read, classified, checked against the
//! privacy lists and committed to the store; the result is published as a
//! `CaptureEvent`.

use crate::content_detection::{is_hex_color, url_host};
use crate::interface::{
    CaptureEvent, ClipboardFlavor, ClipboardPayload, ClipboardSource, ClipyError, ClipyResult,
};
use crate::privacy::PrivacyFilter;
use crate::store::ClipboardStore;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// `WebResourceURL` of the main resource in an XML web archive plist
static WEB_ARCHIVE_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<key>WebMainResource</key>\s*<dict>.*?<key>WebResourceURL</key>\s*<string>([^<]*)</string>")
        .unwrap()
});

/// What a single poll did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Change counter did not move
    Unchanged,
    /// Content changed but was not captured (empty, blocked, unreadable)
    Dropped,
    Captured(CaptureEvent),
    /// Store or blob failure; the change is not retried
    Failed,
}

/// Decode any supported raster format and re-encode it as PNG
fn encode_png(bytes: &[u8]) -> Option<Vec<u8>> {
    let img = image::load_from_memory(bytes).ok()?;
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    img.write_to(&mut cursor, image::ImageFormat::Png).ok()?;
    Some(buf)
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Page URL from a web archive in XML plist form. Binary plists yield `None`.
pub fn web_archive_url(data: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(data).ok()?;
    let captures = WEB_ARCHIVE_URL_REGEX.captures(text)?;
    let url = unescape_xml(captures.get(1)?.as_str().trim());
    (!url.is_empty()).then_some(url)
}

/// State shared between the polling task and synchronous callers
struct MonitorCore {
    source: Arc<dyn ClipboardSource>,
    store: Arc<ClipboardStore>,
    privacy: Arc<PrivacyFilter>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    last_change_count: Mutex<i64>,
}

impl MonitorCore {
    fn reset_baseline(&self) {
        *self.last_change_count.lock() = self.source.change_count();
    }

    fn tick(&self) -> TickOutcome {
        let current = self.source.change_count();
        {
            let mut last = self.last_change_count.lock();
            if *last == current {
                return TickOutcome::Unchanged;
            }
            *last = current;
        }

        match self.capture() {
            Ok(Some(event)) => {
                let _ = self.events.send(event.clone());
                TickOutcome::Captured(event)
            }
            Ok(None) => TickOutcome::Dropped,
            Err(e) => {
                warn!(error = %e, change_count = current, "Clipboard capture failed");
                TickOutcome::Failed
            }
        }
    }

    fn capture(&self) -> ClipyResult<Option<CaptureEvent>> {
        let flavors = self.source.available_flavors();
        let source_app = self.source.frontmost_app();

        // An image flavor only wins when it decodes, otherwise the text flavor is used
        if let Some(png) = flavors
            .iter()
            .filter(|flavor| flavor.is_image())
            .filter_map(|flavor| self.source.read_data(flavor))
            .find_map(|bytes| {
                let png = encode_png(&bytes);
                if png.is_none() {
                    debug!(size = bytes.len(), "Undecodable clipboard image");
                }
                png
            })
        {
            return self.capture_image(&png, source_app);
        }

        let Some(text) = self.source.read_string(&ClipboardFlavor::PlainText) else {
            debug!("Clipboard change without readable content");
            return Ok(None);
        };
        self.capture_text(&text, source_app)
    }

    fn capture_image(&self, png: &[u8], source_app: Option<String>) -> ClipyResult<Option<CaptureEvent>> {
        // Images are checked by app only, before anything touches disk
        if self.privacy.is_blocked(source_app.as_deref(), None) {
            debug!(app = ?source_app, "Image capture blocked by privacy settings");
            return Ok(None);
        }
        self.store.commit_image(png, source_app).map(Some)
    }

    fn capture_text(&self, text: &str, source_app: Option<String>) -> ClipyResult<Option<CaptureEvent>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let payload = if is_hex_color(trimmed) {
            ClipboardPayload::Color { hex_code: trimmed.to_string() }
        } else {
            ClipboardPayload::Text { body: trimmed.to_string(), source_url: self.source_url() }
        };

        let host = payload.source_url().and_then(url_host);
        if self.privacy.is_blocked(source_app.as_deref(), host.as_deref()) {
            debug!(app = ?source_app, host = ?host, "Capture blocked by privacy settings");
            return Ok(None);
        }

        self.store.commit_capture(payload, source_app).map(Some)
    }

    /// Best-effort page URL: Chromium's source-url flavor, then Safari's web archive
    fn source_url(&self) -> Option<String> {
        if let Some(url) = self.source.read_string(&ClipboardFlavor::SourceUrl) {
            let url = url.trim();
            if !url.is_empty() {
                return Some(url.to_string());
            }
        }
        self.source
            .read_data(&ClipboardFlavor::WebArchive)
            .and_then(|data| web_archive_url(&data))
    }
}

/// Polls a `ClipboardSource` and commits new content to the store
pub struct ClipboardMonitor {
    core: Arc<MonitorCore>,
    poll_interval: Duration,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ClipboardMonitor {
    /// Create a monitor and the receiving end of its capture events
    pub fn new(
        source: Arc<dyn ClipboardSource>,
        store: Arc<ClipboardStore>,
        privacy: Arc<PrivacyFilter>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let last_change_count = Mutex::new(source.change_count());
        let core = Arc::new(MonitorCore { source, store, privacy, events, last_change_count });
        let monitor = Self { core, poll_interval, task: Mutex::new(None) };
        (monitor, receiver)
    }

    /// Start polling on the current tokio runtime. Restarts a running monitor.
    /// Content already on the clipboard is not captured.
    pub fn start(&self) -> ClipyResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ClipyError::InvalidInput("monitor must be started inside a tokio runtime".into()))?;

        self.stop();
        self.core.reset_baseline();

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let core = Arc::clone(&self.core);
        let interval = self.poll_interval;

        let handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let core = Arc::clone(&core);
                if let Err(e) = tokio::task::spawn_blocking(move || core.tick()).await {
                    warn!(error = %e, "Clipboard poll task failed");
                }
            }
            debug!("Clipboard monitor loop exited");
        });

        *self.task.lock() = Some((token, handle));
        info!(interval_ms = interval.as_millis() as u64, "Clipboard monitoring started");
        Ok(())
    }

    /// Stop polling. A tick already in progress completes.
    pub fn stop(&self) {
        if let Some((token, _handle)) = self.task.lock().take() {
            token.cancel();
            info!("Clipboard monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }

    /// Run one poll synchronously, with the same logic as the loop
    pub fn poll_once(&self) -> TickOutcome {
        self.core.tick()
    }
}

impl Drop for ClipboardMonitor {
    fn drop(&mut self) {
        if let Some((token, _)) = self.task.get_mut().take() {
            token.cancel();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY CLIPBOARD
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum ClipboardValue {
    Text(String),
    Data(Vec<u8>),
}

#[derive(Debug, Default)]
struct MemoryState {
    change_count: i64,
    items: Vec<(ClipboardFlavor, ClipboardValue)>,
    frontmost_app: Option<String>,
}

/// Thread-safe in-memory clipboard. Every write bumps the change count.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    state: Mutex<MemoryState>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn replace(&self, items: Vec<(ClipboardFlavor, ClipboardValue)>) {
        let mut state = self.state.lock();
        state.items = items;
        state.change_count += 1;
    }

    pub fn set_text(&self, text: &str) {
        self.replace(vec![(ClipboardFlavor::PlainText, ClipboardValue::Text(text.to_string()))]);
    }

    /// Text copied from a browser page, with Chromium's source-url flavor
    pub fn set_text_from_page(&self, text: &str, page_url: &str) {
        self.replace(vec![
            (ClipboardFlavor::PlainText, ClipboardValue::Text(text.to_string())),
            (ClipboardFlavor::SourceUrl, ClipboardValue::Text(page_url.to_string())),
        ]);
    }

    /// Text with a Safari web archive attached
    pub fn set_text_with_web_archive(&self, text: &str, archive: &[u8]) {
        self.replace(vec![
            (ClipboardFlavor::PlainText, ClipboardValue::Text(text.to_string())),
            (ClipboardFlavor::WebArchive, ClipboardValue::Data(archive.to_vec())),
        ]);
    }

    pub fn set_image(&self, flavor: ClipboardFlavor, bytes: &[u8]) {
        self.replace(vec![(flavor, ClipboardValue::Data(bytes.to_vec()))]);
    }

    /// Image plus a plain-text representation (as some apps put on the clipboard)
    pub fn set_image_with_text(&self, flavor: ClipboardFlavor, bytes: &[u8], text: &str) {
        self.replace(vec![
            (ClipboardFlavor::PlainText, ClipboardValue::Text(text.to_string())),
            (flavor, ClipboardValue::Data(bytes.to_vec())),
        ]);
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    pub fn set_frontmost_app(&self, app: Option<&str>) {
        self.state.lock().frontmost_app = app.map(str::to_string);
    }

    /// Current plain-text content, if any
    pub fn text(&self) -> Option<String> {
        self.read_string(&ClipboardFlavor::PlainText)
    }
}

impl ClipboardSource for MemoryClipboard {
    fn change_count(&self) -> i64 {
        self.state.lock().change_count
    }

    fn available_flavors(&self) -> Vec<ClipboardFlavor> {
        self.state.lock().items.iter().map(|(flavor, _)| flavor.clone()).collect()
    }

    fn read_string(&self, flavor: &ClipboardFlavor) -> Option<String> {
        let state = self.state.lock();
        state.items.iter().find(|(f, _)| f == flavor).and_then(|(_, value)| match value {
            ClipboardValue::Text(text) => Some(text.clone()),
            ClipboardValue::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
        })
    }

    fn read_data(&self, flavor: &ClipboardFlavor) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state.items.iter().find(|(f, _)| f == flavor).map(|(_, value)| match value {
            ClipboardValue::Text(text) => text.as_bytes().to_vec(),
            ClipboardValue::Data(bytes) => bytes.clone(),
        })
    }

    fn frontmost_app(&self) -> Option<String> {
        self.state.lock().frontmost_app.clone()
    }

    fn write_string(&self, text: &str) {
        self.set_text(text);
    }

    fn write_image(&self, png_bytes: &[u8]) {
        self.set_image(ClipboardFlavor::Png, png_bytes);
    }
}
