//! Importing a legacy `history.json` on first launch

use clipy_core::migration::backup_path;
use clipy_core::{ClipboardPayload, HistoryConfig, HistoryService, MemoryClipboard};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const ID_NEW: &str = "1B4E28BA-2FA1-11D2-883F-0016D3CCA427";
const ID_OLD: &str = "1B4E28BA-2FA1-11D2-883F-0016D3CCA428";
const ID_IMG: &str = "1B4E28BA-2FA1-11D2-883F-0016D3CCA429";
const ID_DUP: &str = "1B4E28BA-2FA1-11D2-883F-0016D3CCA42A";

#[tokio::test]
async fn first_launch_imports_legacy_history() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("images")).unwrap();
    fs::write(temp.path().join("images").join("legacy-shot.png"), b"not really a png").unwrap();

    let legacy_path = temp.path().join("history.json");
    let legacy = json!([
        {
            "id": ID_NEW,
            "data": {"text": {"_0": "newest clip", "sourceURL": "https://example.com/a"}},
            "createdAt": 700_000_300.0,
            "sourceApp": "Safari",
            "isPinned": true,
            "copyCount": 3,
            "customMetadata": "from the web"
        },
        {
            "id": ID_IMG,
            "data": {"image": {"_0": "images/legacy-shot.png"}},
            "createdAt": 700_000_200.0,
            "isPinned": false,
            "copyCount": 1
        },
        {
            "id": ID_OLD,
            "data": {"color": {"_0": "#00FF00"}},
            "createdAt": 700_000_100.0,
            "isPinned": false,
            "copyCount": 1
        },
        {
            "id": ID_DUP,
            "data": {"color": {"_0": "#00FF00"}},
            "createdAt": 700_000_000.0,
            "isPinned": false,
            "copyCount": 1
        },
        {"id": "not-a-uuid", "data": {"text": {"_0": "broken"}}, "createdAt": 1.0}
    ]);
    fs::write(&legacy_path, serde_json::to_vec(&legacy).unwrap()).unwrap();

    let service = HistoryService::open(HistoryConfig::with_data_dir(temp.path()), Arc::new(MemoryClipboard::new()))
        .await
        .unwrap();

    let report = service.store().migration_report();
    assert_eq!(report.imported, 3);
    assert_eq!(report.skipped, 2);

    let ids: Vec<String> = service.entries().iter().map(|e| e.id.to_string().to_uppercase()).collect();
    assert_eq!(ids, vec![ID_NEW, ID_IMG, ID_OLD]);

    let newest = &service.entries()[0];
    assert!(newest.is_pinned);
    assert_eq!(newest.copy_count, 3);
    assert_eq!(newest.custom_metadata.as_deref(), Some("from the web"));
    assert_eq!(newest.payload.source_url(), Some("https://example.com/a"));

    let ClipboardPayload::Image { blob_key } = &service.entries()[1].payload else {
        panic!("expected image payload");
    };
    assert_eq!(service.blob_bytes(blob_key).unwrap(), b"not really a png");

    assert!(!legacy_path.exists());
    assert!(backup_path(&legacy_path).exists());
}

#[tokio::test]
async fn corrupt_legacy_file_does_not_block_startup() {
    let temp = TempDir::new().unwrap();
    let legacy_path = temp.path().join("history.json");
    fs::write(&legacy_path, b"{ this is not json").unwrap();
    let legacy_image = temp.path().join("images").join("legacy-shot.png");
    fs::create_dir_all(legacy_image.parent().unwrap()).unwrap();
    fs::write(&legacy_image, b"png").unwrap();

    let service = HistoryService::open(HistoryConfig::with_data_dir(temp.path()), Arc::new(MemoryClipboard::new()))
        .await
        .unwrap();

    assert!(service.entries().is_empty());
    assert!(legacy_path.exists());
    assert!(legacy_image.exists());
}
