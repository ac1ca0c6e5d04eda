/// CastCore — single-owner event loop for all playback state.
///
/// Every input (UI intents, engine events, connection results, sleep-timer
/// signals, the startup settings load) arrives as a `CoreEvent` on one mpsc
/// channel and is handled to completion before the next one is looked at.
/// CastCore owns the `UiState`, the history log, the sleep timer and the
/// session connector; nothing else mutates them.
///
/// After each event the state is compared with the last published snapshot
/// and, if anything changed, a new snapshot with a bumped `rev` replaces it
/// on the watch channel.  Persistence is handed to the settings writer and
/// never awaited here.
use std::sync::Arc;
use std::time::Duration;

use cast_proto::engine::{
    EngineEvent, EngineState, MediaMetadata, MediaRequest, MediaTag, MetadataFields,
    SessionExtras, EXTRA_MEDIA_ID, EXTRA_NOW_PLAYING,
};
use cast_proto::protocol::{
    AppPreferences, AppTheme, BufferSize, Intent, PlaybackStatus, SessionSnapshot, Station,
    UiState,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::history::HistoryLog;
use crate::metadata;
use crate::session::{replay_snapshot, Attached, EngineConnector, SessionConnector};
use crate::settings::{preferences_from, snapshot_from, SettingsEdit, SettingsStore, SettingsWriter};
use crate::sleep_timer::{SleepTimer, TimerSignal, WallClock};

/// Capacity of the core event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the CastCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// An intent from a UI client.
    Intent(Intent),
    /// An engine event forwarded by the session link.
    Engine(EngineEvent),
    /// The engine connection resolved.
    EngineAttached(Attached),
    /// The engine connection attempt failed.
    EngineConnectFailed(String),
    SleepTimer { generation: u64, signal: TimerSignal },
    /// Startup read of the settings store.
    SettingsLoaded {
        preferences: AppPreferences,
        snapshot: SessionSnapshot,
    },
    Shutdown,
}

fn sleep_timer_event(generation: u64, signal: TimerSignal) -> CoreEvent {
    CoreEvent::SleepTimer { generation, signal }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── CoreHandle ────────────────────────────────────────────────────────────────

/// What the outside world holds: an intent sender and the state stream.
#[derive(Clone)]
pub struct CoreHandle {
    events: mpsc::Sender<CoreEvent>,
    state: watch::Receiver<UiState>,
}

impl CoreHandle {
    pub fn new(events: mpsc::Sender<CoreEvent>, state: watch::Receiver<UiState>) -> Self {
        Self { events, state }
    }

    pub async fn intent(&self, intent: Intent) -> anyhow::Result<()> {
        self.events
            .send(CoreEvent::Intent(intent))
            .await
            .map_err(|_| anyhow::anyhow!("core event loop gone"))
    }

    /// Latest published snapshot.
    pub fn state(&self) -> UiState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.events.send(CoreEvent::Shutdown).await;
    }
}

// ── CastCore ──────────────────────────────────────────────────────────────────

pub struct CastCore {
    state: UiState,
    state_tx: watch::Sender<UiState>,
    event_tx: mpsc::Sender<CoreEvent>,
    session: SessionConnector,
    history: HistoryLog,
    sleep_timer: SleepTimer,
    store: Arc<dyn SettingsStore>,
    settings: SettingsWriter,
    settings_task: tokio::task::JoinHandle<()>,
    /// Bumped on every local start so each load gets a distinct tag.
    generation: u64,
    /// Tag of the media we started.  `None` while the active station, if
    /// any, came from the engine or the restored session.
    active_tag: Option<MediaTag>,
    /// Set once the user picks a volume; stops the stored default from
    /// overriding it when settings load late.
    volume_touched: bool,
}

impl CastCore {
    pub fn new(
        stations: Vec<Station>,
        connector: Arc<dyn EngineConnector>,
        store: Arc<dyn SettingsStore>,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> Self {
        let state = UiState::new(stations);
        let (state_tx, _) = watch::channel(state.clone());
        let (settings, settings_task) = SettingsWriter::spawn(Arc::clone(&store));

        Self {
            state,
            state_tx,
            event_tx,
            session: SessionConnector::new(connector),
            history: HistoryLog::new(),
            sleep_timer: SleepTimer::new(),
            store,
            settings,
            settings_task,
            generation: 0,
            active_tag: None,
            volume_touched: false,
        }
    }

    /// Measure the sleep timer against `clock` instead of the system clock.
    pub fn with_sleep_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.sleep_timer = SleepTimer::with_clock(clock);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state_tx.subscribe()
    }

    pub fn handle(&self) -> CoreHandle {
        CoreHandle::new(self.event_tx.clone(), self.subscribe())
    }

    /// Run the event loop until `Shutdown`.  Pending settings writes are
    /// flushed and the engine released before returning.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("CastCore: starting event loop");

        self.spawn_settings_load();
        self.session.connect(self.event_tx.clone());

        loop {
            let evt = match event_rx.recv().await {
                Some(evt) => evt,
                None => {
                    info!("CastCore: event channel closed, shutting down");
                    break;
                }
            };

            match evt {
                CoreEvent::Shutdown => {
                    info!("CastCore: shutdown requested");
                    break;
                }
                CoreEvent::Intent(intent) => {
                    debug!("CastCore: intent {:?}", intent);
                    self.handle_intent(intent).await;
                }
                CoreEvent::Engine(evt) => self.handle_engine_event(evt).await,
                CoreEvent::EngineAttached(attached) => self.on_attached(attached).await,
                CoreEvent::EngineConnectFailed(reason) => self.on_connect_failed(&reason),
                CoreEvent::SleepTimer { generation, signal } => {
                    self.on_sleep_timer(generation, signal).await
                }
                CoreEvent::SettingsLoaded {
                    preferences,
                    snapshot,
                } => self.on_settings_loaded(preferences, snapshot).await,
            }

            self.publish_if_changed();
        }

        self.cleanup().await;
        Ok(())
    }

    fn spawn_settings_load(&self) {
        let store = Arc::clone(&self.store);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            match store.load().await {
                Ok(doc) => {
                    let _ = tx
                        .send(CoreEvent::SettingsLoaded {
                            preferences: preferences_from(&doc),
                            snapshot: snapshot_from(&doc),
                        })
                        .await;
                }
                Err(e) => warn!("CastCore: settings unavailable, using defaults: {}", e),
            }
        });
    }

    fn publish_if_changed(&mut self) {
        if *self.state_tx.borrow() == self.state {
            return;
        }
        self.state.rev += 1;
        self.state_tx.send_replace(self.state.clone());
    }

    async fn cleanup(mut self) {
        self.sleep_timer.cancel();
        self.session.shutdown().await;
        let Self {
            settings,
            settings_task,
            ..
        } = self;
        drop(settings);
        if let Err(e) = settings_task.await {
            warn!("CastCore: settings writer ended abnormally: {}", e);
        }
    }

    // ── intents ───────────────────────────────────────────────────────────────

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::PlayToggle { station_id } => match self.state.station(&station_id).cloned() {
                Some(station) => self.on_play_toggle(&station).await,
                None => warn!("CastCore: toggle for unknown station '{}'", station_id),
            },
            Intent::SetVolume { value } => self.set_volume(value).await,
            Intent::SetSleepTimer { minutes } => self.set_sleep_timer(minutes),
            Intent::DismissError => self.on_error_shown(),
            Intent::SaveTheme { theme } => self.save_theme(theme),
            Intent::SaveBufferSize { size } => self.save_buffer_size(size),
            Intent::SaveDefaultVolume { value } => self.save_default_volume(value),
        }
    }

    async fn on_play_toggle(&mut self, station: &Station) {
        if !self.session.is_ready() {
            info!("CastCore: toggle '{}' before engine is ready", station.id);
            self.state.error_message = Some(CoreError::NotReady.user_message());
            return;
        }

        if self.state.active_station_id.as_deref() == Some(station.id.as_str()) {
            self.stop_playback().await;
        } else {
            self.start_playback(station).await;
        }
    }

    async fn start_playback(&mut self, station: &Station) {
        self.generation += 1;
        let tag = MediaTag::new(station.id.clone(), self.generation);
        info!(
            "CastCore: starting '{}' ({}) gen={}",
            station.name, station.stream_url, tag.generation
        );

        let request = MediaRequest {
            tag: tag.clone(),
            uri: station.stream_url.clone(),
            metadata: MediaMetadata::for_station(station),
            buffer: self.state.preferences.buffer_size,
        };

        self.active_tag = Some(tag);
        self.state.active_station_id = Some(station.id.clone());
        self.state.now_playing = None;
        self.state.error_message = None;
        self.state.playback_status = PlaybackStatus::Buffering;
        self.persist(SettingsEdit::ActiveStationId(Some(station.id.clone())));

        if let Err(e) = self.session.start(request).await {
            warn!("CastCore: failed to start '{}': {:#}", station.name, e);
            self.fail_playback(e.to_string());
        }
    }

    async fn stop_playback(&mut self) {
        info!("CastCore: stopping playback");
        if let Err(e) = self.session.stop().await {
            warn!("CastCore: engine stop failed: {:#}", e);
        }
        self.sleep_timer.cancel();
        self.state.sleep_timer_remaining_ms = None;
        self.active_tag = None;
        self.state.active_station_id = None;
        self.state.playback_status = PlaybackStatus::Idle;
        self.state.now_playing = None;
        self.persist(SettingsEdit::ActiveStationId(None));
    }

    async fn set_volume(&mut self, value: f32) {
        if !value.is_finite() {
            warn!("CastCore: ignoring non-finite volume");
            return;
        }
        let volume = value.clamp(0.0, 1.0);
        self.volume_touched = true;
        self.apply_volume(volume).await;
    }

    async fn apply_volume(&mut self, volume: f32) {
        self.state.volume = volume;
        if self.session.is_ready() {
            if let Err(e) = self.session.set_volume(volume).await {
                warn!("CastCore: engine volume failed: {:#}", e);
            }
        }
    }

    fn set_sleep_timer(&mut self, minutes: Option<u32>) {
        match minutes.filter(|m| *m > 0) {
            Some(m) => {
                let duration = Duration::from_secs(u64::from(m) * 60);
                info!("CastCore: sleep timer {} min", m);
                self.sleep_timer
                    .start(duration, self.event_tx.clone(), sleep_timer_event);
                self.state.sleep_timer_remaining_ms = self.sleep_timer.remaining_ms();
            }
            None => {
                self.sleep_timer.cancel();
                self.state.sleep_timer_remaining_ms = None;
            }
        }
    }

    fn on_error_shown(&mut self) {
        self.state.error_message = None;
    }

    fn save_theme(&mut self, theme: AppTheme) {
        self.state.preferences.theme = theme;
        self.persist(SettingsEdit::Theme(theme));
    }

    fn save_buffer_size(&mut self, size: BufferSize) {
        self.state.preferences.buffer_size = size;
        self.persist(SettingsEdit::BufferSize(size));
    }

    fn save_default_volume(&mut self, value: f32) {
        if !value.is_finite() {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        self.state.preferences.default_volume = value;
        self.persist(SettingsEdit::DefaultVolume(value));
    }

    // ── engine ────────────────────────────────────────────────────────────────

    async fn handle_engine_event(&mut self, evt: EngineEvent) {
        match evt {
            EngineEvent::StatusChanged { state, is_playing } => {
                self.on_status_changed(state, is_playing)
            }
            EngineEvent::MediaTransition { media_id } => self.on_track_changed(media_id),
            EngineEvent::MetadataChanged { tag, fields }
            | EngineEvent::RawStreamMetadata { tag, fields } => {
                self.on_metadata_changed(tag.as_ref(), &fields)
            }
            EngineEvent::Error { message } => self.on_engine_error(message),
            EngineEvent::ExtrasChanged { extras } => self.on_extras_changed(&extras),
            EngineEvent::Disconnected => {
                self.session.on_disconnected().await;
                self.state.playback_status = PlaybackStatus::Idle;
                self.state.now_playing = None;
            }
        }
    }

    async fn on_attached(&mut self, attached: Attached) {
        let Attached { handle, snapshot } = attached;
        self.session.on_attached(handle);

        let volume = self.state.volume;
        if let Err(e) = self.session.set_volume(volume).await {
            warn!("CastCore: initial volume sync failed: {:#}", e);
        }

        for evt in replay_snapshot(&snapshot) {
            self.handle_engine_event(evt).await;
        }
    }

    fn on_connect_failed(&mut self, reason: &str) {
        warn!("CastCore: engine connection failed: {}", reason);
        self.session.on_connect_failed();
        self.state.error_message = Some(CoreError::Connection.user_message());
    }

    fn on_status_changed(&mut self, engine_state: EngineState, is_playing: bool) {
        let status = match engine_state {
            EngineState::Buffering => PlaybackStatus::Buffering,
            EngineState::Ready if is_playing => PlaybackStatus::Playing,
            EngineState::Ready | EngineState::Ended | EngineState::Idle => PlaybackStatus::Idle,
        };
        // Engines drop to idle right after reporting a failure; keep the
        // error visible until the user switches or stops.
        if self.state.playback_status == PlaybackStatus::Error {
            if status == PlaybackStatus::Idle {
                return;
            }
            // The engine recovered on its own; the old message no longer applies.
            self.state.error_message = None;
        }
        if status != self.state.playback_status {
            info!(
                "CastCore: status {:?} → {:?}",
                self.state.playback_status, status
            );
            self.state.playback_status = status;
        }
    }

    fn on_track_changed(&mut self, media_id: Option<String>) {
        let media_id = media_id.filter(|id| !id.trim().is_empty());
        debug!("CastCore: media transition → {:?}", media_id);

        let keeps_tag = matches!(
            (&self.active_tag, &media_id),
            (Some(tag), Some(id)) if tag.station_id == *id
        );
        if !keeps_tag {
            self.active_tag = None;
        }
        self.state.active_station_id = media_id.clone();
        self.state.now_playing = None;
        self.persist(SettingsEdit::ActiveStationId(media_id));
    }

    /// Whether metadata from media tagged `tag` describes what is active now.
    fn accepts(&self, tag: Option<&MediaTag>) -> bool {
        let Some(active_id) = self.state.active_station_id.as_deref() else {
            return false;
        };
        match (tag, &self.active_tag) {
            (Some(tag), Some(active)) => tag == active,
            (Some(tag), None) => tag.station_id == active_id,
            (None, Some(_)) => false,
            (None, None) => true,
        }
    }

    fn on_metadata_changed(&mut self, tag: Option<&MediaTag>, fields: &MetadataFields) {
        if !self.accepts(tag) {
            debug!(
                "CastCore: dropping stale metadata tag={:?} active={:?}",
                tag, self.active_tag
            );
            return;
        }
        let station_name = self.state.active_station().map(|s| s.name.clone());
        if let Some(now_playing) = metadata::resolve_fields(fields, station_name.as_deref()) {
            self.update_now_playing(now_playing);
        }
    }

    fn on_extras_changed(&mut self, extras: &SessionExtras) {
        let Some(raw) = extras.get(EXTRA_NOW_PLAYING) else {
            return;
        };
        let Some(active_id) = self.state.active_station_id.as_deref() else {
            debug!("CastCore: extras while idle, ignoring");
            return;
        };
        if let Some(media_id) = extras.get(EXTRA_MEDIA_ID) {
            if media_id != active_id {
                debug!(
                    "CastCore: extras for '{}' while '{}' is active, ignoring",
                    media_id, active_id
                );
                return;
            }
        }
        let station_name = self.state.active_station().map(|s| s.name.clone());
        if let Some(now_playing) =
            metadata::resolve(Some(raw), None, None, station_name.as_deref())
        {
            self.update_now_playing(now_playing);
        }
    }

    fn on_engine_error(&mut self, message: String) {
        let err = CoreError::playback(message);
        warn!("CastCore: engine error: {}", err);
        self.fail_playback(err.user_message());
    }

    fn fail_playback(&mut self, message: String) {
        self.state.playback_status = PlaybackStatus::Error;
        self.state.error_message = Some(CoreError::playback(message).user_message());
    }

    fn update_now_playing(&mut self, now_playing: String) {
        if self.state.now_playing.as_deref() == Some(now_playing.as_str()) {
            return;
        }
        info!("CastCore: now playing {:?}", now_playing);
        self.history.push(now_playing.clone(), now_millis());
        self.state.now_playing = Some(now_playing);
        self.state.recently_played = self.history.entries().to_vec();
        self.persist(SettingsEdit::RecentlyPlayed(self.state.recently_played.clone()));
    }

    // ── timer / settings ──────────────────────────────────────────────────────

    async fn on_sleep_timer(&mut self, generation: u64, signal: TimerSignal) {
        if !self.sleep_timer.is_current(generation) {
            debug!("CastCore: stale sleep timer signal #{}", generation);
            return;
        }
        match signal {
            TimerSignal::Tick { remaining_ms } => {
                self.state.sleep_timer_remaining_ms = Some(remaining_ms);
            }
            TimerSignal::Elapsed => {
                info!("CastCore: sleep timer elapsed");
                self.sleep_timer.finish();
                if self.session.is_ready() {
                    self.stop_playback().await;
                }
                self.state.sleep_timer_remaining_ms = None;
            }
        }
    }

    async fn on_settings_loaded(&mut self, preferences: AppPreferences, snapshot: SessionSnapshot) {
        debug!("CastCore: settings loaded {:?}", preferences);
        let default_volume = preferences.default_volume;
        self.state.preferences = preferences;
        if !self.volume_touched {
            self.apply_volume(default_volume).await;
        }

        if self.state.active_station_id.is_none() {
            if let Some(id) = snapshot.active_station_id {
                if self.state.station(&id).is_some() {
                    info!("CastCore: restored last station '{}'", id);
                    self.state.active_station_id = Some(id);
                } else {
                    debug!("CastCore: stored station '{}' no longer exists", id);
                }
            }
        }

        if self.history.is_empty() {
            self.history = HistoryLog::from_entries(snapshot.recently_played);
            self.state.recently_played = self.history.entries().to_vec();
        }
    }

    fn persist(&self, edit: SettingsEdit) {
        self.settings.submit(edit);
    }
}
