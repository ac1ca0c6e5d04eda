//! Playback core for the NeuralCast player: now-playing resolution, the
//! recently-played log, the sleep timer, settings persistence and the
//! single-owner state machine tying them to the playback engine.

pub mod error;
pub mod history;
pub mod machine;
pub mod metadata;
pub mod session;
pub mod settings;
pub mod sleep_timer;

pub use error::{CoreError, SettingsError};
pub use machine::{CastCore, CoreEvent, CoreHandle, EVENT_CHANNEL_CAPACITY};
pub use session::{EngineConnector, EngineControl, EngineHandle};
pub use settings::{JsonFileSettingsStore, MemorySettingsStore, SettingsStore};
pub use sleep_timer::{SystemClock, WallClock};
