//! mpv as the playback engine behind `cast_core`'s engine traits.
//!
//! `PlayerModel` is the pure half: it folds mpv property changes and events
//! into [`EngineEvent`]s and keeps the session extras.  `MpvEngine` wires it
//! to an IPC connection and mirrors media identity and extras into mpv's
//! `user-data/neuralcast/*` properties, so a host that reattaches to a
//! running mpv can recover what is playing.

use std::sync::Arc;

use async_trait::async_trait;
use cast_core::metadata::{notification_text, resolve, resolve_fields, with_now_playing};
use cast_core::{EngineConnector, EngineControl, EngineHandle};
use cast_proto::config::MpvConfig;
use cast_proto::engine::{
    EngineEvent, EngineSnapshot, EngineState, MediaMetadata, MediaRequest, MediaTag,
    MetadataFields, SessionExtras, EXTRA_MEDIA_ID, EXTRA_NOTIFICATION_TEXT,
    EXTRA_NOTIFICATION_TITLE, EXTRA_NOW_PLAYING,
};
use cast_proto::protocol::BufferSize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mpv::{
    MpvDriver, MpvEvent, MpvHandle, OBS_CORE_IDLE, OBS_ICY_TITLE, OBS_IDLE_ACTIVE, OBS_METADATA,
    OBS_PAUSE, OBS_PAUSED_FOR_CACHE,
};

const UD_MEDIA_ID: &str = "neuralcast/media-id";
const UD_GENERATION: &str = "neuralcast/generation";
const UD_STATION_NAME: &str = "neuralcast/station-name";
const UD_EXTRAS: &str = "neuralcast/extras";

/// Seconds of stream mpv reads ahead for each buffer preference.
pub fn readahead_secs(size: BufferSize) -> u32 {
    match size {
        BufferSize::Normal => 10,
        BufferSize::Large => 30,
    }
}

// ── PlayerModel ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlayerFlags {
    core_idle: bool,
    paused: bool,
    idle_active: bool,
    paused_for_cache: bool,
}

impl Default for PlayerFlags {
    fn default() -> Self {
        Self {
            core_idle: true,
            paused: false,
            idle_active: true,
            paused_for_cache: false,
        }
    }
}

impl PlayerFlags {
    fn status(&self) -> (EngineState, bool) {
        if self.idle_active {
            (EngineState::Idle, false)
        } else if self.paused_for_cache {
            (EngineState::Buffering, false)
        } else if self.paused {
            (EngineState::Ready, false)
        } else if self.core_idle {
            (EngineState::Buffering, false)
        } else {
            (EngineState::Ready, true)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LoadedMedia {
    tag: MediaTag,
    uri: String,
    metadata: MediaMetadata,
    buffer: BufferSize,
}

/// A load that was requested but has not started playing yet.
#[derive(Debug, Clone, PartialEq)]
struct PendingLoad {
    media: LoadedMedia,
    /// Playlist entry mpv assigned to our `loadfile`, once the reply is in.
    entry_id: Option<u64>,
    /// Newest entry issued before this load.  Anything up to it is old media.
    after: Option<u64>,
}

impl PendingLoad {
    fn owns(&self, entry: u64) -> bool {
        match (self.entry_id, self.after) {
            (Some(ours), _) => entry == ours,
            (None, Some(after)) => entry > after,
            (None, None) => true,
        }
    }
}

fn playlist_entry(raw: &Value) -> Option<u64> {
    raw.get("playlist_entry_id").and_then(Value::as_u64)
}

/// What is loaded, what mpv last reported, and the extras derived from it.
///
/// A new load stays pending until mpv reports `start-file` for its entry.
/// Until then nothing is attributed to it: metadata carries no tag, extras
/// are not published and status changes are held back, because whatever mpv
/// reports still comes from the previous stream.
#[derive(Debug, Default)]
pub struct PlayerModel {
    flags: PlayerFlags,
    ended: bool,
    /// Media mpv is playing; events are attributed to it.
    media: Option<LoadedMedia>,
    pending: Option<PendingLoad>,
    /// Newest playlist entry id returned by `loadfile`.
    last_entry: Option<u64>,
    extras: SessionExtras,
    last_status: Option<(EngineState, bool)>,
}

impl PlayerModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn emitting(&self) -> Option<&LoadedMedia> {
        match self.pending {
            Some(_) => None,
            None => self.media.as_ref(),
        }
    }

    /// Tag for events produced now; `None` while a switch is in flight.
    pub fn tag(&self) -> Option<&MediaTag> {
        self.emitting().map(|m| &m.tag)
    }

    fn station_name(&self) -> Option<&str> {
        self.emitting()?.metadata.station.as_deref()
    }

    fn status(&self) -> (EngineState, bool) {
        if self.ended {
            (EngineState::Ended, false)
        } else {
            self.flags.status()
        }
    }

    fn status_event(&mut self) -> Option<EngineEvent> {
        if self.pending.is_some() {
            return None;
        }
        let status = self.status();
        if self.last_status == Some(status) {
            return None;
        }
        self.last_status = Some(status);
        Some(EngineEvent::StatusChanged {
            state: status.0,
            is_playing: status.1,
        })
    }

    /// Record a requested load.  Extras describe the old media and are dropped.
    pub fn set_media(&mut self, request: MediaRequest) {
        self.pending = Some(PendingLoad {
            media: LoadedMedia {
                tag: request.tag,
                uri: request.uri,
                metadata: request.metadata,
                buffer: request.buffer,
            },
            entry_id: None,
            after: self.last_entry,
        });
        self.extras.clear();
        self.ended = false;
        self.last_status = None;
    }

    /// The `loadfile` for the pending media was accepted as `entry_id`.
    pub fn loading(&mut self, entry_id: Option<u64>) {
        let Some(id) = entry_id else {
            return;
        };
        self.last_entry = Some(self.last_entry.map_or(id, |last| last.max(id)));
        if let Some(pending) = self.pending.as_mut() {
            pending.entry_id = Some(id);
        }
    }

    /// The `loadfile` failed; mpv keeps whatever it had.
    pub fn abandon_pending(&mut self) {
        self.pending = None;
    }

    pub fn clear_media(&mut self) -> Vec<EngineEvent> {
        self.media = None;
        self.pending = None;
        self.extras.clear();
        vec![EngineEvent::MediaTransition { media_id: None }]
    }

    /// Rebuild identity after reattaching to an mpv that was already playing.
    pub fn restore(&mut self, tag: MediaTag, station_name: Option<String>, extras: SessionExtras) {
        self.media = Some(LoadedMedia {
            uri: String::new(),
            metadata: MediaMetadata {
                station: station_name,
                ..MediaMetadata::default()
            },
            buffer: BufferSize::default(),
            tag,
        });
        self.pending = None;
        self.extras = extras;
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let (state, is_playing) = self.status();
        EngineSnapshot {
            media_id: self.tag().map(|t| t.station_id.clone()),
            state,
            is_playing,
            extras: self.extras.clone(),
        }
    }

    /// Whether mpv traffic about `entry` belongs to media we already replaced.
    fn is_superseded(&self, entry: Option<u64>) -> bool {
        match (&self.pending, entry) {
            (Some(pending), Some(entry)) => !pending.owns(entry),
            _ => false,
        }
    }

    pub fn on_property(&mut self, id: u64, data: &Value) -> Vec<EngineEvent> {
        let flag = data.as_bool();
        match id {
            OBS_CORE_IDLE => self.flags.core_idle = flag.unwrap_or(true),
            OBS_PAUSE => self.flags.paused = flag.unwrap_or(false),
            OBS_IDLE_ACTIVE => self.flags.idle_active = flag.unwrap_or(false),
            OBS_PAUSED_FOR_CACHE => self.flags.paused_for_cache = flag.unwrap_or(false),
            OBS_METADATA => return self.on_container_metadata(data),
            OBS_ICY_TITLE => return self.on_icy_title(data),
            _ => return Vec::new(),
        }
        if !self.flags.idle_active && !self.flags.core_idle {
            self.ended = false;
        }
        self.status_event().into_iter().collect()
    }

    pub fn on_event(&mut self, name: &str, raw: &Value) -> Vec<EngineEvent> {
        let entry = playlist_entry(raw);
        match name {
            "start-file" => self.on_start_file(entry),
            "end-file" if self.is_superseded(entry) => {
                debug!("mpv engine: end-file for replaced entry {:?}", entry);
                Vec::new()
            }
            "end-file" => match raw.get("reason").and_then(Value::as_str) {
                Some("error") => {
                    let message = raw
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    vec![EngineEvent::Error { message }]
                }
                Some("eof") => {
                    self.ended = true;
                    self.status_event().into_iter().collect()
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn on_start_file(&mut self, entry: Option<u64>) -> Vec<EngineEvent> {
        if self.is_superseded(entry) {
            debug!("mpv engine: start-file for replaced entry {:?}", entry);
            return Vec::new();
        }
        let promoted = match self.pending.take() {
            Some(pending) => {
                self.media = Some(pending.media);
                true
            }
            None => false,
        };
        self.ended = false;
        let media_id = self.tag().map(|t| t.station_id.clone());
        let mut events = vec![EngineEvent::MediaTransition { media_id }];
        if promoted {
            // Status held back during the switch now describes this media.
            events.extend(self.status_event());
        }
        events
    }

    fn on_container_metadata(&mut self, data: &Value) -> Vec<EngineEvent> {
        let Some(map) = data.as_object() else {
            return Vec::new();
        };
        let lookup = |key: &str| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .and_then(|(_, v)| v.as_str())
                .map(str::to_string)
        };
        let fields = MetadataFields {
            title: lookup("title"),
            display_title: lookup("display_title"),
            artist: lookup("artist"),
        };
        if fields == MetadataFields::default() {
            return Vec::new();
        }
        let mut events = vec![EngineEvent::MetadataChanged {
            tag: self.tag().cloned(),
            fields: fields.clone(),
        }];
        if let Some(now_playing) = resolve_fields(&fields, self.station_name()) {
            events.extend(self.publish_now_playing(now_playing));
        }
        events
    }

    fn on_icy_title(&mut self, data: &Value) -> Vec<EngineEvent> {
        let Some(raw) = data.as_str() else {
            return Vec::new();
        };
        let mut events = vec![EngineEvent::RawStreamMetadata {
            tag: self.tag().cloned(),
            fields: MetadataFields::title(raw),
        }];
        if let Some(now_playing) = resolve(Some(raw), None, None, self.station_name()) {
            events.extend(self.publish_now_playing(now_playing));
        }
        events
    }

    /// Refresh the extras for a newly resolved track.
    fn publish_now_playing(&mut self, now_playing: String) -> Option<EngineEvent> {
        let media = self.emitting()?;
        if self.extras.get(EXTRA_NOW_PLAYING) == Some(&now_playing) {
            return None;
        }
        let session_meta = with_now_playing(
            &media.metadata,
            &now_playing,
            media.metadata.station.as_deref(),
        );
        let labels = notification_text(&session_meta);

        let mut extras = SessionExtras::new();
        extras.insert(EXTRA_MEDIA_ID.into(), media.tag.station_id.clone());
        extras.insert(EXTRA_NOW_PLAYING.into(), now_playing);
        if let Some(title) = labels.title {
            extras.insert(EXTRA_NOTIFICATION_TITLE.into(), title);
        }
        if let Some(text) = labels.text {
            extras.insert(EXTRA_NOTIFICATION_TEXT.into(), text);
        }
        self.extras = extras.clone();
        Some(EngineEvent::ExtrasChanged { extras })
    }

    /// Media the next `loadfile` should open.
    fn load_target(&self) -> Option<&LoadedMedia> {
        match &self.pending {
            Some(pending) => Some(&pending.media),
            None => self.media.as_ref(),
        }
    }
}

// ── MpvEngine ─────────────────────────────────────────────────────────────────

pub struct MpvEngine {
    mpv: MpvHandle,
    driver: Mutex<MpvDriver>,
    model: Arc<Mutex<PlayerModel>>,
    events: mpsc::Sender<EngineEvent>,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Leave mpv running on release so a later host can reattach.
    keep_alive: bool,
}

impl MpvEngine {
    async fn emit(&self, events: Vec<EngineEvent>) {
        for evt in events {
            let _ = self.events.send(evt).await;
        }
    }

    /// Recover media identity and extras left in mpv's user-data.
    async fn restore_from_user_data(&self) {
        let Some(media_id) = self.mpv.get_user_data(UD_MEDIA_ID).await else {
            return;
        };
        let generation = self
            .mpv
            .get_user_data(UD_GENERATION)
            .await
            .and_then(|g| g.parse().ok())
            .unwrap_or(0);
        let station_name = self.mpv.get_user_data(UD_STATION_NAME).await;
        let extras: SessionExtras = self
            .mpv
            .get_user_data(UD_EXTRAS)
            .await
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        let idle = matches!(
            self.mpv.get_property("idle-active").await,
            Ok(Value::Bool(true))
        );
        if idle {
            debug!("mpv engine: stale user-data for '{}', mpv is idle", media_id);
            return;
        }

        info!("mpv engine: reattached while '{}' is loaded", media_id);
        let mut model = self.model.lock().await;
        model.restore(MediaTag::new(media_id, generation), station_name, extras);
        for (id, name) in [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_IDLE_ACTIVE, "idle-active"),
            (OBS_PAUSED_FOR_CACHE, "paused-for-cache"),
        ] {
            if let Ok(value) = self.mpv.get_property(name).await {
                model.on_property(id, &value);
            }
        }
    }

    async fn store_extras(mpv: &MpvHandle, extras: &SessionExtras) {
        let result = match serde_json::to_string(extras) {
            Ok(raw) => mpv.set_user_data(UD_EXTRAS, &raw).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("mpv engine: could not store extras: {}", e);
        }
    }
}

#[async_trait]
impl EngineControl for MpvEngine {
    async fn set_media(&self, request: MediaRequest) -> anyhow::Result<()> {
        let tag = request.tag.clone();
        let station_name = request.metadata.station.clone();
        self.model.lock().await.set_media(request);

        self.mpv.set_user_data(UD_MEDIA_ID, &tag.station_id).await?;
        self.mpv
            .set_user_data(UD_GENERATION, &tag.generation.to_string())
            .await?;
        self.mpv
            .set_user_data(UD_STATION_NAME, station_name.as_deref().unwrap_or_default())
            .await?;
        self.mpv.delete_user_data(UD_EXTRAS).await;
        Ok(())
    }

    async fn prepare(&self) -> anyhow::Result<()> {
        let loaded = self.model.lock().await.load_target().cloned();
        let media = loaded.ok_or_else(|| anyhow::anyhow!("no media set"))?;
        self.mpv
            .set_property(
                "demuxer-readahead-secs",
                json!(readahead_secs(media.buffer)),
            )
            .await?;
        if let Some(title) = media.metadata.station.as_deref() {
            let _ = self
                .mpv
                .set_property("force-media-title", json!(title))
                .await;
        }
        info!("mpv engine: loading {}", media.uri);
        match self.mpv.load(&media.uri).await {
            Ok(entry_id) => {
                self.model.lock().await.loading(entry_id);
                Ok(())
            }
            Err(e) => {
                self.model.lock().await.abandon_pending();
                Err(e)
            }
        }
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.mpv.set_pause(false).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.mpv.stop().await
    }

    async fn clear_media(&self) -> anyhow::Result<()> {
        let events = self.model.lock().await.clear_media();
        for key in [UD_MEDIA_ID, UD_GENERATION, UD_STATION_NAME, UD_EXTRAS] {
            self.mpv.delete_user_data(key).await;
        }
        self.emit(events).await;
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        self.mpv.set_volume(volume).await
    }

    async fn snapshot(&self) -> anyhow::Result<EngineSnapshot> {
        Ok(self.model.lock().await.snapshot())
    }

    async fn release(&self) {
        let pump = self.pump.lock().ok().and_then(|mut p| p.take());
        if let Some(task) = pump {
            task.abort();
        }
        let mut driver = self.driver.lock().await;
        if self.keep_alive {
            debug!("mpv engine: detaching, mpv keeps running");
        } else if driver.owns_process() {
            info!("mpv engine: stopping mpv");
            driver.kill().await;
        }
    }
}

/// Translate raw mpv traffic until the IPC connection closes.
async fn pump_events(
    mut mpv_rx: mpsc::Receiver<MpvEvent>,
    mpv: MpvHandle,
    model: Arc<Mutex<PlayerModel>>,
    events: mpsc::Sender<EngineEvent>,
) {
    while let Some(evt) = mpv_rx.recv().await {
        let translated = {
            let mut model = model.lock().await;
            match (evt.as_property_change(), evt.event_name()) {
                (Some((id, data)), _) => model.on_property(id, data),
                (None, Some(name)) => model.on_event(name, &evt.raw),
                (None, None) => Vec::new(),
            }
        };
        for out in translated {
            if let EngineEvent::ExtrasChanged { extras } = &out {
                MpvEngine::store_extras(&mpv, extras).await;
            }
            if events.send(out).await.is_err() {
                return;
            }
        }
    }
    warn!("mpv engine: IPC connection lost");
    let _ = events.send(EngineEvent::Disconnected).await;
}

// ── connector ─────────────────────────────────────────────────────────────────

pub struct MpvConnector {
    config: MpvConfig,
}

impl MpvConnector {
    pub fn new(config: MpvConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineConnector for MpvConnector {
    async fn connect(&self, events: mpsc::Sender<EngineEvent>) -> anyhow::Result<EngineHandle> {
        let mut driver = MpvDriver::new(self.config.binary.clone());
        let (mpv_tx, mpv_rx) = mpsc::channel::<MpvEvent>(256);

        let reattached = if self.config.reattach {
            driver.try_reconnect(mpv_tx.clone()).await
        } else {
            None
        };
        let mpv = match reattached {
            Some(handle) => handle,
            None => driver.spawn_and_connect(mpv_tx).await?,
        };

        let engine = Arc::new(MpvEngine {
            mpv: mpv.clone(),
            driver: Mutex::new(driver),
            model: Arc::new(Mutex::new(PlayerModel::new())),
            events: events.clone(),
            pump: std::sync::Mutex::new(None),
            keep_alive: self.config.reattach,
        });
        engine.restore_from_user_data().await;
        mpv.observe_properties().await;

        let pump = tokio::spawn(pump_events(mpv_rx, mpv, engine.model.clone(), events));
        if let Ok(mut slot) = engine.pump.lock() {
            *slot = Some(pump);
        }
        let handle: EngineHandle = engine;
        Ok(handle)
    }
}
