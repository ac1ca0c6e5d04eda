//! Now-playing resolution.
//!
//! Streams report titles in several places: structured container metadata
//! (title / display title / artist) and the ICY tag embedded in the stream.
//! Both go through [`resolve`] so there is exactly one definition of what
//! counts as now-playing text.

use cast_proto::engine::{MediaMetadata, MetadataFields};

/// Trimmed value, or `None` when nothing but whitespace and dashes remains.
/// ICY servers send `" - "` between tracks when artist and title are empty.
fn non_blank(value: Option<&str>) -> Option<&str> {
    let trimmed = value?.trim();
    if trimmed.trim_matches('-').trim().is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Turn raw metadata fields into a display string.
///
/// Returns `None` when there is no usable title, or when the title is just
/// the station announcing itself (compared case-insensitively).
pub fn resolve(
    title: Option<&str>,
    display_title: Option<&str>,
    artist: Option<&str>,
    station_name: Option<&str>,
) -> Option<String> {
    let resolved = non_blank(title).or_else(|| non_blank(display_title))?;

    if let Some(station) = station_name {
        if resolved.to_lowercase() == station.trim().to_lowercase() {
            return None;
        }
    }

    match non_blank(artist) {
        Some(artist) => Some(format!("{} - {}", artist, resolved)),
        None => Some(resolved.to_string()),
    }
}

pub fn resolve_fields(fields: &MetadataFields, station_name: Option<&str>) -> Option<String> {
    resolve(
        fields.title.as_deref(),
        fields.display_title.as_deref(),
        fields.artist.as_deref(),
        station_name,
    )
}

// ── notification labels ───────────────────────────────────────────────────────

/// Something that can label a media notification.
pub trait NotificationContent {
    fn content_title(&self) -> Option<&str>;
    fn content_text(&self) -> Option<&str>;
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Station first, track second: the title names what is tuned in, the text
/// names what is playing on it.
impl NotificationContent for MediaMetadata {
    fn content_title(&self) -> Option<&str> {
        present(&self.subtitle)
            .or_else(|| present(&self.station))
            .or_else(|| present(&self.title))
    }

    fn content_text(&self) -> Option<&str> {
        present(&self.title).or_else(|| present(&self.artist))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationText {
    pub title: Option<String>,
    pub text: Option<String>,
}

pub fn notification_text(content: &impl NotificationContent) -> NotificationText {
    NotificationText {
        title: content.content_title().map(str::to_string),
        text: content.content_text().map(str::to_string),
    }
}

/// Session metadata once a track has been resolved: the track becomes the
/// title and the station name fills the secondary slots.
pub fn with_now_playing(
    base: &MediaMetadata,
    now_playing: &str,
    station_name: Option<&str>,
) -> MediaMetadata {
    let station = station_name
        .map(str::to_string)
        .or_else(|| base.station.clone());
    MediaMetadata {
        title: Some(now_playing.to_string()),
        subtitle: station.clone(),
        artist: station.clone(),
        station,
        artwork: base.artwork.clone(),
    }
}
