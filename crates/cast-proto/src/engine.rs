//! Types crossing the boundary between the core and the playback engine.
//!
//! The engine lives in another process.  It receives [`MediaRequest`]s and
//! control commands, and pushes [`EngineEvent`]s back on one ordered channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{BufferSize, Station};

/// Session extras key holding the engine-side resolved now-playing string.
pub const EXTRA_NOW_PLAYING: &str = "now_playing";
/// Session extras key holding the media id the extras belong to.
pub const EXTRA_MEDIA_ID: &str = "media_id";
/// Session extras keys for the notification labels derived from metadata.
pub const EXTRA_NOTIFICATION_TITLE: &str = "notification_title";
pub const EXTRA_NOTIFICATION_TEXT: &str = "notification_text";

/// Low-level engine playback state, before the core maps it onto
/// [`crate::protocol::PlaybackStatus`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Buffering,
    Ready,
    Ended,
}

/// Identity of one piece of media loaded into the engine.  `generation` is
/// bumped by the core on every start, so replaying the same station yields a
/// new tag and metadata from the previous load can be told apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MediaTag {
    pub station_id: String,
    pub generation: u64,
}

impl MediaTag {
    pub fn new(station_id: impl Into<String>, generation: u64) -> Self {
        Self {
            station_id: station_id.into(),
            generation,
        }
    }
}

/// Raw title-ish fields as the engine reports them.  Container metadata may
/// fill all three; an ICY tag only fills `title`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataFields {
    pub title: Option<String>,
    pub display_title: Option<String>,
    pub artist: Option<String>,
}

impl MetadataFields {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// Descriptive metadata attached to media when it is handed to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub artist: Option<String>,
    pub station: Option<String>,
    pub artwork: Option<String>,
}

impl MediaMetadata {
    /// Metadata identifying a station before any track information arrives.
    pub fn for_station(station: &Station) -> Self {
        Self {
            title: None,
            subtitle: Some(station.name.clone()),
            artist: None,
            station: Some(station.name.clone()),
            artwork: station.artwork.clone(),
        }
    }
}

/// Everything `set_media` needs to load a station.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaRequest {
    pub tag: MediaTag,
    pub uri: String,
    pub metadata: MediaMetadata,
    pub buffer: BufferSize,
}

/// Out-of-band key/value payload attached to the engine session.
pub type SessionExtras = BTreeMap<String, String>;

/// Every unsolicited engine notification, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StatusChanged {
        state: EngineState,
        is_playing: bool,
    },
    MediaTransition {
        media_id: Option<String>,
    },
    /// Structured container metadata.
    MetadataChanged {
        tag: Option<MediaTag>,
        fields: MetadataFields,
    },
    /// Title embedded in the stream itself (ICY).
    RawStreamMetadata {
        tag: Option<MediaTag>,
        fields: MetadataFields,
    },
    Error {
        message: String,
    },
    ExtrasChanged {
        extras: SessionExtras,
    },
    /// The engine went away; its handle is no longer usable.
    Disconnected,
}

/// What the engine reports when a controller (re)attaches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSnapshot {
    pub media_id: Option<String>,
    pub state: EngineState,
    pub is_playing: bool,
    pub extras: SessionExtras,
}
