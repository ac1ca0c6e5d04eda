use cast_proto::protocol::HistoryEntry;

/// Maximum number of tracks remembered.
pub const MAX_HISTORY: usize = 5;

/// Recently played tracks, most recent first, no duplicate tracks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries.  Input order is taken as
    /// most-recent-first; the invariants are re-established in case the
    /// stored list was edited or written by an older version.
    pub fn from_entries(entries: impl IntoIterator<Item = HistoryEntry>) -> Self {
        let mut log = Self::new();
        let collected: Vec<_> = entries.into_iter().collect();
        for entry in collected.into_iter().rev() {
            log.push(entry.track, entry.played_at);
        }
        log
    }

    /// Move `track` to the front with timestamp `at`.  Blank tracks are ignored.
    pub fn push(&mut self, track: impl Into<String>, at: i64) {
        let track = track.into();
        if track.trim().is_empty() {
            return;
        }
        self.entries.retain(|e| e.track != track);
        self.entries.insert(0, HistoryEntry::new(track, at));
        self.entries.truncate(MAX_HISTORY);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
