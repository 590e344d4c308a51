//! Generate a synthetic clipboard history, or import a legacy history file.
//!
//! Writes through the real `ClipboardStore`, so the output directory can be
//! used directly as a data directory.
//!
//! Usage:
//!     cargo run --release --bin generate-history -- --data-dir /tmp/clipy --count 5000
//!     cargo run --release --bin generate-history -- --data-dir /tmp/clipy --import history.json

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use clipy_core::config::LEGACY_HISTORY_FILE;
use clipy_core::{ClipboardPayload, ClipboardStore, HistoryEntry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory to populate
    #[arg(short, long)]
    data_dir: PathBuf,

    /// Number of entries to generate
    #[arg(short, long, default_value_t = 1000)]
    count: usize,

    /// Spread creation times over this many days
    #[arg(long, default_value_t = 60)]
    days: i64,

    /// Fraction of entries that are pinned
    #[arg(long, default_value_t = 0.02)]
    pinned_ratio: f64,

    /// RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Import this legacy history.json instead of generating
    #[arg(long)]
    import: Option<PathBuf>,
}

const SNIPPETS: &[&str] = &[
    "fn main() {\n    println!(\"hello\");\n}",
    "SELECT id, content FROM entries WHERE kind = 'text' ORDER BY seq DESC;",
    "git rebase --onto main feature~3 feature",
    "let result = items.iter().filter(|i| i.is_pinned).count();",
    "docker run --rm -it -v $(pwd):/work ubuntu:22.04 bash",
];

const WORDS: &[&str] = &[
    "meeting", "invoice", "draft", "release", "notes", "address", "password", "reset", "order",
    "tracking", "number", "review", "deadline", "budget", "agenda", "summary", "followup", "quote",
];

const URLS: &[&str] = &[
    "https://github.com/rust-lang/rust/issues",
    "https://docs.rs/tokio/latest/tokio/",
    "https://en.wikipedia.org/wiki/Clipboard_(computing)",
    "https://news.ycombinator.com/item?id=1",
];

const COLORS: &[&str] = &["#FF5733", "#1e90ff", "#000", "#c0ffee", "#7f7f7f"];

const SOURCE_APPS: &[&str] = &["Xcode", "Safari", "Terminal", "Notes", "Slack", "Mail"];

fn generate_payload(rng: &mut StdRng, index: usize) -> ClipboardPayload {
    match rng.gen_range(0..10) {
        0 => ClipboardPayload::Color { hex_code: COLORS[rng.gen_range(0..COLORS.len())].to_string() },
        1 | 2 => ClipboardPayload::Text {
            body: format!("{}?ref={}", URLS[rng.gen_range(0..URLS.len())], index),
            source_url: None,
        },
        3 | 4 => ClipboardPayload::Text {
            body: format!("{}\n// {}", SNIPPETS[rng.gen_range(0..SNIPPETS.len())], index),
            source_url: None,
        },
        _ => {
            let len = rng.gen_range(3..40);
            let mut words: Vec<&str> = (0..len).map(|_| WORDS[rng.gen_range(0..WORDS.len())]).collect();
            words.push("#");
            let source_url = rng.gen_bool(0.2).then(|| URLS[rng.gen_range(0..URLS.len())].to_string());
            ClipboardPayload::Text { body: format!("{}{}", words.join(" "), index), source_url }
        }
    }
}

fn generate(args: &Args) -> Result<()> {
    let store = ClipboardStore::open(&args.data_dir).context("Failed to open store")?;
    if store.count_entries()? > 0 {
        bail!("{} already holds a history", args.data_dir.display());
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let now = Utc::now();
    let span_secs = args.days.max(1) * 86_400;

    // Oldest first, so the newest entry gets the highest insertion order
    let mut offsets: Vec<i64> = (0..args.count).map(|_| rng.gen_range(0..span_secs)).collect();
    offsets.sort_unstable_by(|a, b| b.cmp(a));

    // One row per distinct payload, as capture dedup would leave it
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(offsets.len());
    for (i, offset) in offsets.into_iter().enumerate() {
        let payload = generate_payload(&mut rng, i);
        if !seen.insert(payload.clone()) {
            continue;
        }
        let app = SOURCE_APPS[rng.gen_range(0..SOURCE_APPS.len())].to_string();
        let mut entry = HistoryEntry::new_at(payload, Some(app), now - Duration::seconds(offset));
        entry.is_pinned = rng.gen_bool(args.pinned_ratio.clamp(0.0, 1.0));
        entry.copy_count = rng.gen_range(1..5);
        entries.push(entry);
    }

    for chunk in entries.chunks(500) {
        store.insert_entries(chunk).context("Failed to insert entries")?;
    }

    println!("Generated history: {}", args.data_dir.display());
    println!("  Entries: {}", store.count_entries()?);
    println!("  Database size: {:.2} MB", store.database_size()? as f64 / 1024.0 / 1024.0);
    Ok(())
}

fn import(args: &Args, legacy: &Path) -> Result<()> {
    fs::create_dir_all(&args.data_dir)?;
    let target = args.data_dir.join(LEGACY_HISTORY_FILE);
    if target.exists() {
        bail!("{} already exists", target.display());
    }
    fs::copy(legacy, &target).with_context(|| format!("Failed to copy {}", legacy.display()))?;

    let store = ClipboardStore::open(&args.data_dir).context("Failed to open store")?;
    let report = store.migration_report();
    println!("Imported legacy history into {}", args.data_dir.display());
    println!("  Imported: {}", report.imported);
    println!("  Skipped: {}", report.skipped);
    Ok(())
}

fn main() -> Result<()> {
    clipy_core::logging::init("info");
    let args = Args::parse();

    match &args.import {
        Some(legacy) => import(&args, legacy),
        None => generate(&args),
    }
}
