use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// How often the remaining time is reported.
pub const TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Wall-clock source in epoch milliseconds.  Keeps counting while the host
/// is suspended, unlike the runtime's monotonic clock.
pub trait WallClock: fmt::Debug + Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    Tick { remaining_ms: u64 },
    Elapsed,
}

/// Cancellable countdown.  Each run gets a generation number that travels
/// with its signals, so signals already queued by a cancelled run can be
/// recognised and dropped by the receiver.
///
/// The deadline is a wall-clock timestamp; the runtime's timer only sets
/// the wake-up cadence.
#[derive(Debug)]
pub struct SleepTimer {
    clock: Arc<dyn WallClock>,
    generation: u64,
    deadline_ms: Option<i64>,
    task: Option<JoinHandle<()>>,
}

impl Default for SleepTimer {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl SleepTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn WallClock>) -> Self {
        Self {
            clock,
            generation: 0,
            deadline_ms: None,
            task: None,
        }
    }

    /// Replace any running countdown with a new one of `duration`.  Signals
    /// are delivered on `tx`, built with `wrap(generation, signal)`.
    pub fn start<T>(
        &mut self,
        duration: Duration,
        tx: mpsc::Sender<T>,
        wrap: fn(u64, TimerSignal) -> T,
    ) -> u64
    where
        T: Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        let length_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        let deadline_ms = self.clock.now_ms().saturating_add(length_ms);
        self.deadline_ms = Some(deadline_ms);
        self.task = Some(tokio::spawn(countdown(
            deadline_ms,
            Arc::clone(&self.clock),
            generation,
            tx,
            wrap,
        )));
        debug!("sleep timer #{} armed for {}ms", generation, length_ms);
        generation
    }

    /// Stop without firing.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.deadline_ms.take().is_some() {
            debug!("sleep timer #{} cancelled", self.generation);
        }
        self.generation += 1;
    }

    /// Mark the current run as done after its `Elapsed` signal was handled.
    pub fn finish(&mut self) {
        self.task = None;
        self.deadline_ms = None;
        self.generation += 1;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.deadline_ms.is_some() && generation == self.generation
    }

    /// Time left, computed from the deadline rather than counted down.
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_ms().map(Duration::from_millis)
    }

    pub fn remaining_ms(&self) -> Option<u64> {
        self.deadline_ms
            .map(|deadline| millis_left(deadline, self.clock.as_ref()))
    }
}

impl Drop for SleepTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn millis_left(deadline_ms: i64, clock: &dyn WallClock) -> u64 {
    u64::try_from(deadline_ms.saturating_sub(clock.now_ms())).unwrap_or(0)
}

async fn countdown<T>(
    deadline_ms: i64,
    clock: Arc<dyn WallClock>,
    generation: u64,
    tx: mpsc::Sender<T>,
    wrap: fn(u64, TimerSignal) -> T,
) where
    T: Send + 'static,
{
    loop {
        let left = millis_left(deadline_ms, clock.as_ref());
        if left > 0 {
            tokio::time::sleep(Duration::from_millis(left).min(TICK_INTERVAL)).await;
        }

        let signal = match millis_left(deadline_ms, clock.as_ref()) {
            0 => TimerSignal::Elapsed,
            remaining_ms => TimerSignal::Tick { remaining_ms },
        };
        if tx.send(wrap(generation, signal)).await.is_err() {
            return;
        }
        if signal == TimerSignal::Elapsed {
            return;
        }
    }
}
