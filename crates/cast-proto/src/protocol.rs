use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  UI clients check this on connect and can refuse to talk to
/// an incompatible host.
pub const PROTOCOL_VERSION: u32 = 1;

/// User intents sent from a UI client to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Intent {
    PlayToggle { station_id: String },
    SetVolume { value: f32 },
    SetSleepTimer { minutes: Option<u32> },
    DismissError,
    SaveTheme { theme: AppTheme },
    SaveBufferSize { size: BufferSize },
    SaveDefaultVolume { value: f32 },
}

/// Messages sent from the host to UI clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        state: UiState,
    },
    State {
        data: UiState,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Buffering,
    Playing,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub track: String,
    /// Epoch milliseconds.
    pub played_at: i64,
}

impl HistoryEntry {
    pub fn new(track: impl Into<String>, played_at: i64) -> Self {
        Self {
            track: track.into(),
            played_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AppTheme {
    #[default]
    System,
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BufferSize {
    #[default]
    Normal,
    Large,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppPreferences {
    pub theme: AppTheme,
    pub buffer_size: BufferSize,
    pub default_volume: f32,
}

impl Default for AppPreferences {
    fn default() -> Self {
        Self {
            theme: AppTheme::System,
            buffer_size: BufferSize::Normal,
            default_volume: 1.0,
        }
    }
}

/// Last session, persisted separately from preferences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub active_station_id: Option<String>,
    pub recently_played: Vec<HistoryEntry>,
}

/// Everything a UI needs to render.  Replaced wholesale on every transition;
/// `rev` increases by one each time a new snapshot is published so clients
/// can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiState {
    #[serde(default)]
    pub rev: u64,
    pub stations: Vec<Station>,
    pub active_station_id: Option<String>,
    pub playback_status: PlaybackStatus,
    pub now_playing: Option<String>,
    pub error_message: Option<String>,
    pub volume: f32,
    pub sleep_timer_remaining_ms: Option<u64>,
    pub recently_played: Vec<HistoryEntry>,
    #[serde(default)]
    pub preferences: AppPreferences,
}

impl UiState {
    pub fn new(stations: Vec<Station>) -> Self {
        Self {
            rev: 0,
            stations,
            active_station_id: None,
            playback_status: PlaybackStatus::Idle,
            now_playing: None,
            error_message: None,
            volume: 1.0,
            sleep_timer_remaining_ms: None,
            recently_played: Vec::new(),
            preferences: AppPreferences::default(),
        }
    }

    pub fn station(&self, id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn active_station(&self) -> Option<&Station> {
        self.active_station_id
            .as_deref()
            .and_then(|id| self.station(id))
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    /// Short description / blurb
    #[serde(default)]
    pub description: Option<String>,
    /// Artwork shown on the session / notification
    #[serde(default)]
    pub artwork: Option<String>,
    /// Card background image
    #[serde(default)]
    pub background: Option<String>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Intent(Intent),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
