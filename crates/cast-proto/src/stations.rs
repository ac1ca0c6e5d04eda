//! Station catalog: the built-in list plus the `stations.toml` override.

use std::path::Path;

use tracing::{info, warn};

use crate::config::Config;
use crate::protocol::Station;

/// The stations shipped with the player.
pub fn builtin_stations() -> Vec<Station> {
    vec![
        Station {
            id: "neuralcast".into(),
            name: "NeuralCast".into(),
            stream_url: "https://neuralcast.duckdns.org/listen/neuralcast/radio.mp3".into(),
            description: Some("The future of broadcasting.".into()),
            artwork: Some("neuralcast_art".into()),
            background: Some("neuralcast_bg".into()),
        },
        Station {
            id: "neuralforge".into(),
            name: "NeuralForge".into(),
            stream_url: "https://neuralcast.duckdns.org/listen/neuralforge/radio.mp3".into(),
            description: Some("Forging new sounds.".into()),
            artwork: Some("neuralforge_art".into()),
            background: Some("neuralforge_bg".into()),
        },
    ]
}

// ── TOML station loader ───────────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[station]]` table.
/// Kept separate from `Station` so the file schema can diverge from the wire
/// struct without breaking either.
#[derive(Debug, serde::Deserialize)]
struct TomlStationFile {
    station: Vec<TomlStation>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlStation {
    #[serde(default)]
    id: String,
    name: String,
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    artwork: String,
    #[serde(default)]
    background: String,
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Derive a stable id from a display name: lowercase ascii alphanumerics,
/// everything else collapsed to single dashes.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    let mut stations: Vec<Station> = Vec::with_capacity(file.station.len());
    for s in file.station {
        let id = non_empty(s.id).unwrap_or_else(|| slug(&s.name));
        if id.is_empty() {
            warn!("Skipping station without usable id: {:?}", s.name);
            continue;
        }
        if stations.iter().any(|existing| existing.id == id) {
            warn!("Skipping duplicate station id '{}'", id);
            continue;
        }
        stations.push(Station {
            id,
            name: s.name,
            stream_url: s.url,
            description: non_empty(s.description),
            artwork: non_empty(s.artwork),
            background: non_empty(s.background),
        });
    }
    Ok(stations)
}

pub fn load_stations_from_toml(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

async fn fetch_stations_url(url: &str) -> anyhow::Result<Vec<Station>> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let text = response.text().await?;
    parse_stations_from_toml_str(&text)
}

/// Resolve the catalog: local TOML, then the configured URL, then built-ins.
/// An empty source counts as missing.
pub async fn load_stations(config: &Config) -> Vec<Station> {
    let toml_path = &config.stations.stations_toml;
    if toml_path.exists() {
        match load_stations_from_toml(toml_path) {
            Ok(s) if !s.is_empty() => {
                info!(
                    "Loaded {} stations from TOML: {}",
                    s.len(),
                    toml_path.display()
                );
                return s;
            }
            Ok(_) => warn!("{} lists no stations", toml_path.display()),
            Err(e) => warn!("Failed to parse TOML stations: {}", e),
        }
    }

    if let Some(url) = config.stations.catalog_url.as_deref() {
        match fetch_stations_url(url).await {
            Ok(s) if !s.is_empty() => {
                info!("Loaded {} stations from {}", s.len(), url);
                return s;
            }
            Ok(_) => warn!("Catalog at {} lists no stations", url),
            Err(e) => warn!("Failed to fetch stations from {}: {}", url, e),
        }
    }

    let stations = builtin_stations();
    info!("Using {} built-in stations", stations.len());
    stations
}
