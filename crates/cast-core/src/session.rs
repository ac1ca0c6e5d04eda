//! Connection to the out-of-process playback engine.
//!
//! ```text
//!   SessionConnector::connect()
//!         │
//!         └── link task
//!               ├── EngineConnector::connect(engine_tx)     (may fail → ConnectFailed)
//!               ├── handle.snapshot()                       (state at attach time)
//!               ├── CoreEvent::EngineAttached               (handle + snapshot)
//!               └── forward engine_rx → CoreEvent::Engine   (until the engine drops its sender)
//! ```
//!
//! The snapshot is delivered before any forwarded event, so a reattaching
//! controller sees the engine's current state first and live updates after.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cast_proto::engine::{EngineEvent, EngineSnapshot, MediaRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::machine::CoreEvent;

/// Commands the core may issue.  Implemented by each engine adapter.
#[async_trait]
pub trait EngineControl: Send + Sync {
    async fn set_media(&self, request: MediaRequest) -> anyhow::Result<()>;
    async fn prepare(&self) -> anyhow::Result<()>;
    async fn play(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn clear_media(&self) -> anyhow::Result<()>;
    async fn set_volume(&self, volume: f32) -> anyhow::Result<()>;
    /// Current media, status and session extras.
    async fn snapshot(&self) -> anyhow::Result<EngineSnapshot>;
    /// Detach.  The handle is not used again afterwards.
    async fn release(&self);
}

pub type EngineHandle = Arc<dyn EngineControl>;

/// Opens a session with the engine.
#[async_trait]
pub trait EngineConnector: Send + Sync + 'static {
    /// Attach and start pushing events on `events`.  The engine drops its
    /// sender when the session ends.
    async fn connect(&self, events: mpsc::Sender<EngineEvent>) -> anyhow::Result<EngineHandle>;
}

/// A freshly attached engine, as delivered to the core loop.
pub struct Attached {
    pub handle: EngineHandle,
    pub snapshot: EngineSnapshot,
}

impl fmt::Debug for Attached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attached")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

pub struct SessionConnector {
    connector: Arc<dyn EngineConnector>,
    handle: Option<EngineHandle>,
    link_task: Option<JoinHandle<()>>,
    state: LinkState,
}

impl SessionConnector {
    pub fn new(connector: Arc<dyn EngineConnector>) -> Self {
        Self {
            connector,
            handle: None,
            link_task: None,
            state: LinkState::Disconnected,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready && self.handle.is_some()
    }

    /// Start the connection attempt.  The outcome arrives later on `core_tx`
    /// as `EngineAttached` or `EngineConnectFailed`.
    pub fn connect(&mut self, core_tx: mpsc::Sender<CoreEvent>) {
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        self.state = LinkState::Connecting;
        let connector = Arc::clone(&self.connector);
        self.link_task = Some(tokio::spawn(link_task(connector, core_tx)));
    }

    pub fn on_attached(&mut self, handle: EngineHandle) {
        info!("session: engine attached");
        self.handle = Some(handle);
        self.state = LinkState::Ready;
    }

    pub fn on_connect_failed(&mut self) {
        self.state = LinkState::Failed;
        self.link_task = None;
    }

    /// The engine went away.  Drop the handle; controls report not-ready
    /// until the host reconnects.
    pub async fn on_disconnected(&mut self) {
        warn!("session: engine disconnected");
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        if let Some(handle) = self.handle.take() {
            handle.release().await;
        }
        self.state = LinkState::Disconnected;
    }

    fn ready_handle(&self) -> Result<&EngineHandle, CoreError> {
        match (&self.handle, self.state) {
            (Some(handle), LinkState::Ready) => Ok(handle),
            _ => Err(CoreError::NotReady),
        }
    }

    /// Load and start `request`.
    pub async fn start(&self, request: MediaRequest) -> anyhow::Result<()> {
        let handle = self.ready_handle()?;
        handle.set_media(request).await?;
        handle.prepare().await?;
        handle.play().await?;
        Ok(())
    }

    /// Stop and unload.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let handle = self.ready_handle()?;
        handle.stop().await?;
        handle.clear_media().await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        let handle = self.ready_handle()?;
        handle.set_volume(volume).await
    }

    /// Cancel any in-flight attempt, stop forwarding and release the handle.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        if let Some(handle) = self.handle.take() {
            debug!("session: releasing engine handle");
            handle.release().await;
        }
        self.state = LinkState::Disconnected;
    }
}

impl Drop for SessionConnector {
    fn drop(&mut self) {
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        if let Some(handle) = self.handle.take() {
            // Dropped without an orderly shutdown; release on the runtime if
            // one is still around.
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move { handle.release().await });
            }
        }
    }
}

/// Events the core should apply right after attaching, reconstructed from
/// the engine's snapshot.
pub fn replay_snapshot(snapshot: &EngineSnapshot) -> Vec<EngineEvent> {
    let mut events = Vec::with_capacity(3);
    if let Some(media_id) = snapshot.media_id.as_ref().filter(|id| !id.trim().is_empty()) {
        events.push(EngineEvent::MediaTransition {
            media_id: Some(media_id.clone()),
        });
    }
    events.push(EngineEvent::StatusChanged {
        state: snapshot.state,
        is_playing: snapshot.is_playing,
    });
    if !snapshot.extras.is_empty() {
        events.push(EngineEvent::ExtrasChanged {
            extras: snapshot.extras.clone(),
        });
    }
    events
}

async fn link_task(connector: Arc<dyn EngineConnector>, core_tx: mpsc::Sender<CoreEvent>) {
    let (engine_tx, mut engine_rx) = mpsc::channel::<EngineEvent>(64);

    let handle = match connector.connect(engine_tx).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("session: connect failed: {:#}", e);
            let _ = core_tx
                .send(CoreEvent::EngineConnectFailed(e.to_string()))
                .await;
            return;
        }
    };

    let snapshot = match handle.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("session: snapshot unavailable: {}", e);
            EngineSnapshot::default()
        }
    };
    debug!("session: attach snapshot {:?}", snapshot);

    if core_tx
        .send(CoreEvent::EngineAttached(Attached { handle, snapshot }))
        .await
        .is_err()
    {
        return;
    }

    while let Some(evt) = engine_rx.recv().await {
        if core_tx.send(CoreEvent::Engine(evt)).await.is_err() {
            break;
        }
    }
    debug!("session: engine event stream ended");
}
