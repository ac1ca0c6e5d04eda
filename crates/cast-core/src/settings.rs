//! Preferences and last-session persistence.
//!
//! The store is a flat JSON document.  Reads happen once at startup; writes
//! are queued to a single writer task so they land in submission order and
//! never hold up the core loop.  Store failures are logged and dropped.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cast_proto::protocol::{AppPreferences, AppTheme, BufferSize, HistoryEntry, SessionSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::SettingsError;

/// The persisted document.  Every key is optional; absent keys read as defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_station_id: Option<String>,
    /// JSON array of `{track, playedAt}` encoded as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recently_played_json: Option<String>,
}

/// One key update.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsEdit {
    Theme(AppTheme),
    BufferSize(BufferSize),
    DefaultVolume(f32),
    ActiveStationId(Option<String>),
    RecentlyPlayed(Vec<HistoryEntry>),
}

impl SettingsEdit {
    pub fn apply_to(self, doc: &mut SettingsDocument) {
        match self {
            Self::Theme(theme) => doc.theme = Some(theme_key(theme).to_string()),
            Self::BufferSize(size) => doc.buffer_size = Some(buffer_key(size).to_string()),
            Self::DefaultVolume(v) => doc.default_volume = Some(v.clamp(0.0, 1.0)),
            Self::ActiveStationId(id) => doc.active_station_id = id,
            Self::RecentlyPlayed(history) => {
                doc.recently_played_json = if history.is_empty() {
                    None
                } else {
                    Some(encode_history(&history))
                }
            }
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync + 'static {
    async fn load(&self) -> Result<SettingsDocument, SettingsError>;
    async fn apply(&self, edit: SettingsEdit) -> Result<(), SettingsError>;
}

// ── enum keys ─────────────────────────────────────────────────────────────────

fn theme_key(theme: AppTheme) -> &'static str {
    match theme {
        AppTheme::System => "SYSTEM",
        AppTheme::Light => "LIGHT",
        AppTheme::Dark => "DARK",
    }
}

fn buffer_key(size: BufferSize) -> &'static str {
    match size {
        BufferSize::Normal => "NORMAL",
        BufferSize::Large => "LARGE",
    }
}

fn parse_theme(raw: Option<&str>) -> AppTheme {
    match raw.map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("LIGHT") => AppTheme::Light,
        Some(s) if s.eq_ignore_ascii_case("DARK") => AppTheme::Dark,
        _ => AppTheme::System,
    }
}

fn parse_buffer_size(raw: Option<&str>) -> BufferSize {
    match raw.map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("LARGE") => BufferSize::Large,
        _ => BufferSize::Normal,
    }
}

// ── document → model ──────────────────────────────────────────────────────────

pub fn preferences_from(doc: &SettingsDocument) -> AppPreferences {
    let defaults = AppPreferences::default();
    AppPreferences {
        theme: parse_theme(doc.theme.as_deref()),
        buffer_size: parse_buffer_size(doc.buffer_size.as_deref()),
        default_volume: doc
            .default_volume
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(defaults.default_volume),
    }
}

pub fn snapshot_from(doc: &SettingsDocument) -> SessionSnapshot {
    SessionSnapshot {
        active_station_id: doc
            .active_station_id
            .clone()
            .filter(|id| !id.trim().is_empty()),
        recently_played: decode_history(doc.recently_played_json.as_deref()),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry<'a> {
    track: &'a str,
    played_at: i64,
}

pub fn encode_history(history: &[HistoryEntry]) -> String {
    let stored: Vec<StoredEntry<'_>> = history
        .iter()
        .map(|e| StoredEntry {
            track: &e.track,
            played_at: e.played_at,
        })
        .collect();
    // Serializing plain strings and integers cannot fail.
    serde_json::to_string(&stored).unwrap_or_else(|_| "[]".to_string())
}

/// Decode the stored history.  Anything unparsable reads as an empty list;
/// individual entries without a track or a positive timestamp are skipped.
pub fn decode_history(raw: Option<&str>) -> Vec<HistoryEntry> {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r,
        _ => return Vec::new(),
    };
    let items: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(items) => items,
        Err(e) => {
            debug!("settings: ignoring unparsable history: {}", e);
            return Vec::new();
        }
    };
    items
        .iter()
        .filter_map(|item| {
            let track = item.get("track")?.as_str()?;
            let played_at = item.get("playedAt")?.as_i64()?;
            if track.trim().is_empty() || played_at <= 0 {
                return None;
            }
            Some(HistoryEntry::new(track, played_at))
        })
        .collect()
}

// ── stores ────────────────────────────────────────────────────────────────────

/// Keeps the document in memory only.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    doc: Mutex<SettingsDocument>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: SettingsDocument) -> Self {
        Self {
            doc: Mutex::new(doc),
        }
    }

    pub async fn document(&self) -> SettingsDocument {
        self.doc.lock().await.clone()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<SettingsDocument, SettingsError> {
        Ok(self.doc.lock().await.clone())
    }

    async fn apply(&self, edit: SettingsEdit) -> Result<(), SettingsError> {
        edit.apply_to(&mut *self.doc.lock().await);
        Ok(())
    }
}

/// JSON file on disk, rewritten whole on every edit via a temp file + rename.
pub struct JsonFileSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read(&self) -> Result<SettingsDocument, SettingsError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(SettingsDocument::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsDocument::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn load(&self) -> Result<SettingsDocument, SettingsError> {
        self.read().await
    }

    async fn apply(&self, edit: SettingsEdit) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().await;

        let mut doc = match self.read().await {
            Ok(doc) => doc,
            Err(SettingsError::Json(e)) => {
                warn!(
                    "settings: {} is corrupt ({}), starting a fresh document",
                    self.path.display(),
                    e
                );
                SettingsDocument::default()
            }
            Err(e) => return Err(e),
        };
        edit.apply_to(&mut doc);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

/// Cheaply cloneable queue in front of a [`SettingsStore`].  `submit` never
/// waits; the writer task applies edits in order and logs failures.
#[derive(Clone)]
pub struct SettingsWriter {
    tx: mpsc::UnboundedSender<SettingsEdit>,
}

impl SettingsWriter {
    pub fn spawn(store: Arc<dyn SettingsStore>) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(writer_task(store, rx));
        (Self { tx }, handle)
    }

    pub fn submit(&self, edit: SettingsEdit) {
        if self.tx.send(edit).is_err() {
            warn!("settings: writer gone, dropping edit");
        }
    }
}

async fn writer_task(store: Arc<dyn SettingsStore>, mut rx: mpsc::UnboundedReceiver<SettingsEdit>) {
    while let Some(edit) = rx.recv().await {
        debug!("settings: applying {:?}", edit);
        if let Err(e) = store.apply(edit).await {
            warn!("settings: write failed: {}", e);
        }
    }
    debug!("settings: writer task exiting");
}
