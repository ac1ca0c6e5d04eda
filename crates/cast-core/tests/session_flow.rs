//! End-to-end flows through CastCore with a scripted in-process engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cast_core::settings::{encode_history, SettingsDocument};
use cast_core::{
    CastCore, CoreHandle, EngineConnector, EngineControl, EngineHandle, MemorySettingsStore,
    WallClock, EVENT_CHANNEL_CAPACITY,
};
use cast_proto::engine::{
    EngineEvent, EngineSnapshot, EngineState, MediaRequest, MediaTag, MetadataFields,
    SessionExtras, EXTRA_MEDIA_ID, EXTRA_NOW_PLAYING,
};
use cast_proto::protocol::{AppTheme, HistoryEntry, Intent, PlaybackStatus, UiState};
use cast_proto::stations::builtin_stations;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Command {
    SetMedia(MediaTag),
    Prepare,
    Play,
    Stop,
    ClearMedia,
    Volume(f32),
    Release,
}

#[derive(Default)]
struct FakeEngine {
    events: Mutex<Option<mpsc::Sender<EngineEvent>>>,
    commands: Mutex<Vec<Command>>,
    snapshot: Mutex<EngineSnapshot>,
}

impl FakeEngine {
    fn with_snapshot(snapshot: EngineSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    fn record(&self, cmd: Command) {
        self.commands.lock().unwrap().push(cmd);
    }

    fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    async fn emit(&self, evt: EngineEvent) {
        let tx = self.events.lock().unwrap().clone().expect("engine not attached");
        tx.send(evt).await.unwrap();
    }

    async fn wait_command(&self, pred: impl Fn(&Command) -> bool) {
        tokio::time::timeout(WAIT, async {
            while !self.commands().iter().any(&pred) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine command not seen");
    }

    async fn wait_attached(&self) {
        self.wait_command(|c| matches!(c, Command::Volume(_))).await;
    }
}

#[async_trait]
impl EngineControl for FakeEngine {
    async fn set_media(&self, request: MediaRequest) -> anyhow::Result<()> {
        self.record(Command::SetMedia(request.tag));
        Ok(())
    }
    async fn prepare(&self) -> anyhow::Result<()> {
        self.record(Command::Prepare);
        Ok(())
    }
    async fn play(&self) -> anyhow::Result<()> {
        self.record(Command::Play);
        Ok(())
    }
    async fn stop(&self) -> anyhow::Result<()> {
        self.record(Command::Stop);
        Ok(())
    }
    async fn clear_media(&self) -> anyhow::Result<()> {
        self.record(Command::ClearMedia);
        Ok(())
    }
    async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        self.record(Command::Volume(volume));
        Ok(())
    }
    async fn snapshot(&self) -> anyhow::Result<EngineSnapshot> {
        Ok(self.snapshot.lock().unwrap().clone())
    }
    async fn release(&self) {
        self.record(Command::Release);
    }
}

struct FakeConnector {
    engine: Option<Arc<FakeEngine>>,
}

#[async_trait]
impl EngineConnector for FakeConnector {
    async fn connect(&self, events: mpsc::Sender<EngineEvent>) -> anyhow::Result<EngineHandle> {
        match &self.engine {
            Some(engine) => {
                *engine.events.lock().unwrap() = Some(events);
                let handle: EngineHandle = engine.clone();
                Ok(handle)
            }
            None => anyhow::bail!("service refused the session"),
        }
    }
}

/// Wall clock driven by the runtime clock, so paused tests can fast-forward
/// the sleep timer.
#[derive(Debug)]
struct RuntimeClock {
    origin: Instant,
}

impl WallClock for RuntimeClock {
    fn now_ms(&self) -> i64 {
        1_700_000_000_000 + self.origin.elapsed().as_millis() as i64
    }
}

struct Harness {
    core: CoreHandle,
    engine: Arc<FakeEngine>,
    store: Arc<MemorySettingsStore>,
    task: JoinHandle<anyhow::Result<()>>,
}

fn spawn_core(engine: Option<Arc<FakeEngine>>, store: Arc<MemorySettingsStore>) -> Harness {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let connector = Arc::new(FakeConnector {
        engine: engine.clone(),
    });
    let clock = Arc::new(RuntimeClock {
        origin: Instant::now(),
    });
    let core =
        CastCore::new(builtin_stations(), connector, store.clone(), tx).with_sleep_clock(clock);
    let handle = core.handle();
    let task = tokio::spawn(core.run(rx));
    Harness {
        core: handle,
        engine: engine.unwrap_or_default(),
        store,
        task,
    }
}

async fn attached() -> Harness {
    let h = spawn_core(
        Some(Arc::new(FakeEngine::default())),
        Arc::new(MemorySettingsStore::new()),
    );
    h.engine.wait_attached().await;
    h
}

async fn wait_state(core: &CoreHandle, pred: impl Fn(&UiState) -> bool) -> UiState {
    wait_state_within(core, WAIT, pred).await
}

async fn wait_state_within(
    core: &CoreHandle,
    limit: Duration,
    pred: impl Fn(&UiState) -> bool,
) -> UiState {
    let mut rx = core.subscribe();
    tokio::time::timeout(limit, async {
        loop {
            {
                let state = rx.borrow_and_update();
                if pred(&*state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("core stopped");
        }
    })
    .await
    .expect("state condition not reached")
}

async fn wait_doc(
    store: &MemorySettingsStore,
    pred: impl Fn(&SettingsDocument) -> bool,
) -> SettingsDocument {
    tokio::time::timeout(WAIT, async {
        loop {
            let doc = store.document().await;
            if pred(&doc) {
                return doc;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("settings condition not reached")
}

async fn toggle(core: &CoreHandle, station_id: &str) {
    core.intent(Intent::PlayToggle {
        station_id: station_id.into(),
    })
    .await
    .unwrap();
}

fn tracks(state: &UiState) -> Vec<&str> {
    state
        .recently_played
        .iter()
        .map(|e| e.track.as_str())
        .collect()
}

#[tokio::test]
async fn toggle_starts_then_stops_and_clears_saved_station() {
    let h = attached().await;

    toggle(&h.core, "neuralcast").await;
    let state = wait_state(&h.core, |s| {
        s.active_station_id.as_deref() == Some("neuralcast")
    })
    .await;
    assert_eq!(state.playback_status, PlaybackStatus::Buffering);
    assert_eq!(state.now_playing, None);
    h.engine.wait_command(|c| *c == Command::Play).await;
    let cmds = h.engine.commands();
    let set_at = cmds
        .iter()
        .position(|c| matches!(c, Command::SetMedia(tag) if tag.station_id == "neuralcast"))
        .unwrap();
    assert_eq!(cmds[set_at + 1], Command::Prepare);
    assert_eq!(cmds[set_at + 2], Command::Play);
    wait_doc(&h.store, |d| d.active_station_id.as_deref() == Some("neuralcast")).await;

    h.engine
        .emit(EngineEvent::StatusChanged {
            state: EngineState::Ready,
            is_playing: true,
        })
        .await;
    wait_state(&h.core, |s| s.playback_status == PlaybackStatus::Playing).await;

    toggle(&h.core, "neuralcast").await;
    let state = wait_state(&h.core, |s| s.active_station_id.is_none()).await;
    assert_eq!(state.playback_status, PlaybackStatus::Idle);
    assert_eq!(state.now_playing, None);
    h.engine.wait_command(|c| *c == Command::ClearMedia).await;
    assert!(h.engine.commands().contains(&Command::Stop));
    wait_doc(&h.store, |d| d.active_station_id.is_none()).await;

    h.core.shutdown().await;
    h.task.await.unwrap().unwrap();
    assert_eq!(h.engine.commands().last(), Some(&Command::Release));
}

#[tokio::test]
async fn switching_station_gets_a_new_tag() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    toggle(&h.core, "neuralforge").await;
    wait_state(&h.core, |s| {
        s.active_station_id.as_deref() == Some("neuralforge")
    })
    .await;
    h.engine
        .wait_command(|c| matches!(c, Command::SetMedia(t) if t.station_id == "neuralforge"))
        .await;
    let tags: Vec<MediaTag> = h
        .engine
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            Command::SetMedia(tag) => Some(tag),
            _ => None,
        })
        .collect();
    assert_eq!(tags.len(), 2);
    assert!(tags[1].generation > tags[0].generation);
    assert!(!h.engine.commands().contains(&Command::Stop));
}

#[tokio::test]
async fn connect_failure_then_toggle_reports_not_ready() {
    let h = spawn_core(None, Arc::new(MemorySettingsStore::new()));

    wait_state(&h.core, |s| {
        s.error_message.as_deref() == Some("Unable to connect to player.")
    })
    .await;
    h.core.intent(Intent::DismissError).await.unwrap();
    wait_state(&h.core, |s| s.error_message.is_none()).await;

    toggle(&h.core, "neuralcast").await;
    let state = wait_state(&h.core, |s| {
        s.error_message.as_deref() == Some("Player is not ready yet.")
    })
    .await;
    assert_eq!(state.active_station_id, None);
    assert_eq!(state.playback_status, PlaybackStatus::Idle);
}

#[tokio::test]
async fn unknown_station_is_ignored() {
    let h = attached().await;
    toggle(&h.core, "nope").await;
    h.core
        .intent(Intent::SetVolume { value: 0.5 })
        .await
        .unwrap();
    let state = wait_state(&h.core, |s| s.volume == 0.5).await;
    assert_eq!(state.active_station_id, None);
    assert_eq!(state.error_message, None);
}

#[tokio::test]
async fn metadata_from_previous_station_is_dropped() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    toggle(&h.core, "neuralforge").await;
    wait_state(&h.core, |s| {
        s.active_station_id.as_deref() == Some("neuralforge")
    })
    .await;

    h.engine
        .emit(EngineEvent::RawStreamMetadata {
            tag: Some(MediaTag::new("neuralcast", 1)),
            fields: MetadataFields::title("Old - Song"),
        })
        .await;
    h.engine
        .emit(EngineEvent::MetadataChanged {
            tag: Some(MediaTag::new("neuralforge", 2)),
            fields: MetadataFields {
                title: Some("Fresh".into()),
                display_title: None,
                artist: Some("Band".into()),
            },
        })
        .await;

    let state = wait_state(&h.core, |s| s.now_playing.is_some()).await;
    assert_eq!(state.now_playing.as_deref(), Some("Band - Fresh"));
    assert_eq!(tracks(&state), vec!["Band - Fresh"]);
}

#[tokio::test]
async fn metadata_from_earlier_run_of_same_station_is_dropped() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    toggle(&h.core, "neuralcast").await;
    toggle(&h.core, "neuralcast").await;
    h.engine
        .wait_command(|c| *c == Command::SetMedia(MediaTag::new("neuralcast", 2)))
        .await;

    h.engine
        .emit(EngineEvent::RawStreamMetadata {
            tag: Some(MediaTag::new("neuralcast", 1)),
            fields: MetadataFields::title("Old - Song"),
        })
        .await;
    h.engine
        .emit(EngineEvent::RawStreamMetadata {
            tag: Some(MediaTag::new("neuralcast", 2)),
            fields: MetadataFields::title("New - Song"),
        })
        .await;

    let state = wait_state(&h.core, |s| s.now_playing.is_some()).await;
    assert_eq!(state.now_playing.as_deref(), Some("New - Song"));
    assert_eq!(tracks(&state), vec!["New - Song"]);
}

#[tokio::test]
async fn untagged_metadata_during_local_start_is_dropped() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    h.engine
        .wait_command(|c| matches!(c, Command::SetMedia(_)))
        .await;

    h.engine
        .emit(EngineEvent::RawStreamMetadata {
            tag: None,
            fields: MetadataFields::title("Unknown - Origin"),
        })
        .await;
    h.engine
        .emit(EngineEvent::RawStreamMetadata {
            tag: Some(MediaTag::new("neuralcast", 1)),
            fields: MetadataFields::title("Band - Track1"),
        })
        .await;

    let state = wait_state(&h.core, |s| s.now_playing.is_some()).await;
    assert_eq!(state.now_playing.as_deref(), Some("Band - Track1"));
    assert_eq!(tracks(&state), vec!["Band - Track1"]);
}

#[tokio::test]
async fn extras_for_another_station_are_ignored() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    h.engine
        .wait_command(|c| matches!(c, Command::SetMedia(_)))
        .await;

    let mut extras = SessionExtras::new();
    extras.insert(EXTRA_MEDIA_ID.into(), "neuralforge".into());
    extras.insert(EXTRA_NOW_PLAYING.into(), "Elsewhere - Track".into());
    h.engine.emit(EngineEvent::ExtrasChanged { extras }).await;
    h.engine
        .emit(EngineEvent::RawStreamMetadata {
            tag: Some(MediaTag::new("neuralcast", 1)),
            fields: MetadataFields::title("Marker"),
        })
        .await;

    let state = wait_state(&h.core, |s| s.now_playing.is_some()).await;
    assert_eq!(state.now_playing.as_deref(), Some("Marker"));
    assert_eq!(tracks(&state), vec!["Marker"]);
}

#[tokio::test]
async fn switching_after_error_clears_it_and_buffers() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    wait_state(&h.core, |s| s.active_station_id.is_some()).await;

    h.engine
        .emit(EngineEvent::Error {
            message: "Source error".into(),
        })
        .await;
    wait_state(&h.core, |s| s.playback_status == PlaybackStatus::Error).await;

    toggle(&h.core, "neuralforge").await;
    let state = wait_state(&h.core, |s| {
        s.active_station_id.as_deref() == Some("neuralforge")
    })
    .await;
    assert_eq!(state.playback_status, PlaybackStatus::Buffering);
    assert_eq!(state.error_message, None);
}

#[tokio::test]
async fn engine_recovery_after_error_drops_the_message() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    wait_state(&h.core, |s| s.active_station_id.is_some()).await;

    h.engine
        .emit(EngineEvent::Error {
            message: "Source error".into(),
        })
        .await;
    wait_state(&h.core, |s| s.playback_status == PlaybackStatus::Error).await;

    h.engine
        .emit(EngineEvent::StatusChanged {
            state: EngineState::Buffering,
            is_playing: false,
        })
        .await;
    let state = wait_state(&h.core, |s| s.playback_status == PlaybackStatus::Buffering).await;
    assert_eq!(state.error_message, None);
}

#[tokio::test]
async fn station_announcement_is_not_a_track() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    wait_state(&h.core, |s| s.active_station_id.is_some()).await;

    h.engine
        .emit(EngineEvent::MetadataChanged {
            tag: Some(MediaTag::new("neuralcast", 1)),
            fields: MetadataFields::title("NeuralCast"),
        })
        .await;
    h.engine
        .emit(EngineEvent::RawStreamMetadata {
            tag: Some(MediaTag::new("neuralcast", 1)),
            fields: MetadataFields::title("Band - Track1"),
        })
        .await;

    let state = wait_state(&h.core, |s| s.now_playing.is_some()).await;
    assert_eq!(state.now_playing.as_deref(), Some("Band - Track1"));
    assert_eq!(state.recently_played.len(), 1);
}

#[tokio::test]
async fn repeated_titles_do_not_duplicate_history() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    wait_state(&h.core, |s| s.active_station_id.is_some()).await;

    let tag = MediaTag::new("neuralcast", 1);
    for title in ["Song A", "Song A", "Song B", "Song A"] {
        h.engine
            .emit(EngineEvent::RawStreamMetadata {
                tag: Some(tag.clone()),
                fields: MetadataFields::title(title),
            })
            .await;
    }

    let state = wait_state(&h.core, |s| {
        s.recently_played.len() == 2 && s.recently_played[0].track == "Song A"
    })
    .await;
    assert_eq!(tracks(&state), vec!["Song A", "Song B"]);
    assert!(state.recently_played[0].played_at >= state.recently_played[1].played_at);

    let doc = wait_doc(&h.store, |d| d.recently_played_json.is_some()).await;
    assert!(doc.recently_played_json.unwrap().contains("Song A"));
}

#[tokio::test]
async fn reattach_restores_now_playing_from_extras() {
    let mut extras = SessionExtras::new();
    extras.insert(EXTRA_NOW_PLAYING.into(), "Band - Song".into());
    extras.insert(EXTRA_MEDIA_ID.into(), "neuralforge".into());
    let engine = Arc::new(FakeEngine::with_snapshot(EngineSnapshot {
        media_id: Some("neuralforge".into()),
        state: EngineState::Ready,
        is_playing: true,
        extras,
    }));
    let h = spawn_core(Some(engine), Arc::new(MemorySettingsStore::new()));

    let state = wait_state(&h.core, |s| s.now_playing.is_some()).await;
    assert_eq!(state.active_station_id.as_deref(), Some("neuralforge"));
    assert_eq!(state.playback_status, PlaybackStatus::Playing);
    assert_eq!(state.now_playing.as_deref(), Some("Band - Song"));
    assert_eq!(tracks(&state), vec!["Band - Song"]);
}

#[tokio::test]
async fn extras_while_idle_are_ignored() {
    let h = attached().await;
    let mut extras = SessionExtras::new();
    extras.insert(EXTRA_NOW_PLAYING.into(), "Ghost - Track".into());
    h.engine.emit(EngineEvent::ExtrasChanged { extras }).await;
    h.core
        .intent(Intent::SetVolume { value: 0.3 })
        .await
        .unwrap();
    let state = wait_state(&h.core, |s| s.volume == 0.3).await;
    assert_eq!(state.now_playing, None);
    assert!(state.recently_played.is_empty());
}

#[tokio::test]
async fn playback_error_survives_idle_and_dismiss_is_idempotent() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    wait_state(&h.core, |s| s.active_station_id.is_some()).await;

    h.engine
        .emit(EngineEvent::Error {
            message: String::new(),
        })
        .await;
    h.engine
        .emit(EngineEvent::StatusChanged {
            state: EngineState::Idle,
            is_playing: false,
        })
        .await;
    h.engine
        .emit(EngineEvent::RawStreamMetadata {
            tag: Some(MediaTag::new("neuralcast", 1)),
            fields: MetadataFields::title("Marker"),
        })
        .await;

    let state = wait_state(&h.core, |s| s.now_playing.as_deref() == Some("Marker")).await;
    assert_eq!(state.playback_status, PlaybackStatus::Error);
    assert_eq!(state.error_message.as_deref(), Some("Playback error"));

    h.core.intent(Intent::DismissError).await.unwrap();
    h.core.intent(Intent::DismissError).await.unwrap();
    let state = wait_state(&h.core, |s| s.error_message.is_none()).await;
    assert_eq!(state.playback_status, PlaybackStatus::Error);
    assert_eq!(state.active_station_id.as_deref(), Some("neuralcast"));
}

#[tokio::test]
async fn disconnect_goes_idle_and_refuses_controls() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    wait_state(&h.core, |s| s.active_station_id.is_some()).await;

    h.engine.emit(EngineEvent::Disconnected).await;
    wait_state(&h.core, |s| s.playback_status == PlaybackStatus::Idle).await;
    h.engine.wait_command(|c| *c == Command::Release).await;

    toggle(&h.core, "neuralforge").await;
    wait_state(&h.core, |s| {
        s.error_message.as_deref() == Some("Player is not ready yet.")
    })
    .await;
}

#[tokio::test]
async fn stored_session_is_restored() {
    let doc = SettingsDocument {
        theme: Some("DARK".into()),
        default_volume: Some(0.4),
        active_station_id: Some("neuralforge".into()),
        recently_played_json: Some(encode_history(&[
            HistoryEntry::new("B", 20),
            HistoryEntry::new("A", 10),
        ])),
        ..SettingsDocument::default()
    };
    let engine = Arc::new(FakeEngine::default());
    let h = spawn_core(
        Some(engine),
        Arc::new(MemorySettingsStore::with_document(doc)),
    );

    let state = wait_state(&h.core, |s| s.recently_played.len() == 2).await;
    assert_eq!(state.active_station_id.as_deref(), Some("neuralforge"));
    assert_eq!(state.volume, 0.4);
    assert_eq!(tracks(&state), vec!["B", "A"]);
    assert_eq!(state.playback_status, PlaybackStatus::Idle);
}

#[tokio::test]
async fn stored_station_that_no_longer_exists_is_not_restored() {
    let doc = SettingsDocument {
        active_station_id: Some("retired".into()),
        default_volume: Some(0.7),
        ..SettingsDocument::default()
    };
    let h = spawn_core(
        Some(Arc::new(FakeEngine::default())),
        Arc::new(MemorySettingsStore::with_document(doc)),
    );
    let state = wait_state(&h.core, |s| s.volume == 0.7).await;
    assert_eq!(state.active_station_id, None);
}

#[tokio::test]
async fn volume_is_clamped_and_forwarded() {
    let h = attached().await;
    h.core
        .intent(Intent::SetVolume { value: 1.7 })
        .await
        .unwrap();
    h.core
        .intent(Intent::SetVolume { value: f32::NAN })
        .await
        .unwrap();
    h.core
        .intent(Intent::SetVolume { value: -0.2 })
        .await
        .unwrap();
    wait_state(&h.core, |s| s.volume == 0.0).await;
    h.engine.wait_command(|c| *c == Command::Volume(0.0)).await;
    assert!(h.engine.commands().contains(&Command::Volume(1.0)));
}

#[tokio::test(start_paused = true)]
async fn cancelled_sleep_timer_never_stops_playback() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    wait_state(&h.core, |s| s.active_station_id.is_some()).await;

    h.core
        .intent(Intent::SetSleepTimer { minutes: Some(1) })
        .await
        .unwrap();
    let state = wait_state(&h.core, |s| s.sleep_timer_remaining_ms.is_some()).await;
    assert!(state.sleep_timer_remaining_ms.unwrap() <= 60_000);

    h.core
        .intent(Intent::SetSleepTimer { minutes: None })
        .await
        .unwrap();
    wait_state(&h.core, |s| s.sleep_timer_remaining_ms.is_none()).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    let state = h.core.state();
    assert_eq!(state.active_station_id.as_deref(), Some("neuralcast"));
    assert_eq!(state.sleep_timer_remaining_ms, None);
    assert!(!h.engine.commands().contains(&Command::Stop));
}

#[tokio::test(start_paused = true)]
async fn elapsed_sleep_timer_stops_playback() {
    let h = attached().await;
    toggle(&h.core, "neuralcast").await;
    wait_state(&h.core, |s| s.active_station_id.is_some()).await;

    h.core
        .intent(Intent::SetSleepTimer { minutes: Some(1) })
        .await
        .unwrap();
    let state = wait_state_within(&h.core, Duration::from_secs(300), |s| {
        s.active_station_id.is_none() && s.sleep_timer_remaining_ms.is_none()
    })
    .await;
    assert_eq!(state.playback_status, PlaybackStatus::Idle);
    assert!(h.engine.commands().contains(&Command::Stop));
}

#[tokio::test]
async fn preferences_are_saved() {
    let h = attached().await;
    h.core
        .intent(Intent::SaveTheme {
            theme: AppTheme::Light,
        })
        .await
        .unwrap();
    h.core
        .intent(Intent::SaveDefaultVolume { value: 0.25 })
        .await
        .unwrap();
    let state = wait_state(&h.core, |s| s.preferences.default_volume == 0.25).await;
    assert_eq!(state.preferences.theme, AppTheme::Light);
    // The default applies to the next launch, not the running session.
    assert_eq!(state.volume, 1.0);
    let doc = wait_doc(&h.store, |d| d.default_volume.is_some()).await;
    assert_eq!(doc.theme.as_deref(), Some("LIGHT"));
    assert_eq!(doc.default_volume, Some(0.25));
}
