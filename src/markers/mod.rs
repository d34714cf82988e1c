// markers/mod.rs — Location markers: room ids, QR payloads, scan events.
//
// A scanned marker carries a room id. The registry maps normalized ids to
// geodetic positions, and the floor comes from the id itself ("F-NN").

pub mod marker_tree;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::types::MarkerScan;

pub use marker_tree::{MarkerPoint, MarkerTree};

/// Floor assumed for bare two-digit room ids.
pub const DEFAULT_ROOM_FLOOR: u32 = 2;

// ─── Room ids ────────────────────────────────────────────────────────────────

/// Normalize a room id to "F-NN".
///
/// `"2-1"` → `"2-01"`, `"201"` → `"2-01"`, `"15"` → `"2-15"`. Anything else
/// is rejected.
pub fn normalize_room_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.is_empty() {
        return None;
    }
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    if let Some((floor, number)) = id.split_once('-') {
        if !all_digits(floor) || !all_digits(number) {
            log::warn!("Invalid room id: {}", raw);
            return None;
        }
        let floor: u32 = floor.parse().ok()?;
        let number: u32 = number.parse().ok()?;
        return Some(format!("{}-{:02}", floor, number));
    }

    if !all_digits(id) {
        log::warn!("Invalid room id: {}", raw);
        return None;
    }
    if id.len() == 3 {
        let floor: u32 = id[..1].parse().ok()?;
        let number: u32 = id[1..].parse().ok()?;
        return Some(format!("{}-{:02}", floor, number));
    }
    let number: u32 = id.parse().ok()?;
    Some(format!("{}-{:02}", DEFAULT_ROOM_FLOOR, number))
}

/// Floor encoded in a room id, after normalization.
pub fn floor_from_room(room: &str) -> Option<i32> {
    let normalized = normalize_room_id(room)?;
    let (floor, _) = normalized.split_once('-')?;
    floor.parse().ok()
}

/// Extract a room id from what a QR code decodes to: a `...?room=201` link,
/// an image name such as `room_201.png`, or a bare id.
pub fn room_from_qr_payload(payload: &str) -> Option<String> {
    let payload = payload.trim();
    if let Some(pos) = payload.find("room=") {
        let value = &payload[pos + "room=".len()..];
        let value = value.split(['&', '#']).next().unwrap_or(value);
        return normalize_room_id(value);
    }

    let name = payload.rsplit(['/', '\\']).next().unwrap_or(payload);
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    let stem = stem
        .strip_prefix("room_")
        .or_else(|| stem.strip_prefix("qr_"))
        .unwrap_or(stem);
    normalize_room_id(stem)
}

// ─── Registry ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerEntry {
    pub room: String,
    #[serde(alias = "position_x")]
    pub longitude: f64,
    #[serde(alias = "position_y")]
    pub latitude: f64,
}

/// Known marker positions, keyed by normalized room id.
#[derive(Clone, Debug, Default)]
pub struct MarkerRegistry {
    rooms: HashMap<String, (f64, f64)>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries with an invalid id or a non-finite position are skipped.
    pub fn from_entries(entries: Vec<MarkerEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            if let Err(e) = registry.insert(&entry.room, entry.longitude, entry.latitude) {
                log::warn!("Skipping marker entry: {}", e);
            }
        }
        registry
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let entries: Vec<MarkerEntry> =
            serde_json::from_str(json).context("Failed to parse marker registry")?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read marker registry {}", path.display()))?;
        let registry = Self::from_json_str(&text)?;
        log::info!("Loaded {} markers from {}", registry.len(), path.display());
        Ok(registry)
    }

    pub fn insert(&mut self, room: &str, longitude: f64, latitude: f64) -> TrackerResult<()> {
        let id = normalize_room_id(room)
            .ok_or_else(|| TrackerError::InvalidScan(format!("invalid room id '{}'", room)))?;
        if !longitude.is_finite() || !latitude.is_finite() {
            return Err(TrackerError::InvalidScan(format!(
                "non-finite position for room {}",
                id
            )));
        }
        self.rooms.insert(id, (longitude, latitude));
        Ok(())
    }

    /// (lon, lat) of a room, any id spelling accepted.
    pub fn position(&self, room: &str) -> Option<(f64, f64)> {
        let id = normalize_room_id(room)?;
        self.rooms.get(&id).copied()
    }

    /// Build the scan a user produces by scanning the marker of `room`.
    pub fn scan_for_room(&self, room: &str, timestamp: f64) -> TrackerResult<MarkerScan> {
        let id = normalize_room_id(room).ok_or_else(|| TrackerError::UnknownRoom(room.to_string()))?;
        let (longitude, latitude) =
            self.rooms.get(&id).copied().ok_or_else(|| TrackerError::UnknownRoom(id.clone()))?;
        Ok(MarkerScan {
            timestamp,
            longitude,
            latitude,
            floor: floor_from_room(&id),
            room: Some(id),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, (f64, f64))> {
        self.rooms.iter().map(|(room, pos)| (room.as_str(), *pos))
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

// ─── QR event log ────────────────────────────────────────────────────────────

/// One entry of the scan log written by the web front end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QrEvent {
    #[serde(default)]
    pub room: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub position: Option<Vec<f64>>,
    /// Absent on entries written by older front ends; treated as "qr".
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl QrEvent {
    pub fn is_qr(&self) -> bool {
        self.kind.as_deref().map_or(true, |k| k == "qr")
    }

    /// (lon, lat) when the position is a finite pair.
    pub fn geo_position(&self) -> Option<(f64, f64)> {
        match self.position.as_deref() {
            Some(&[lon, lat]) if lon.is_finite() && lat.is_finite() => Some((lon, lat)),
            _ => None,
        }
    }

    /// Convert into a scan, using the room id for the floor.
    pub fn to_scan(&self) -> Option<MarkerScan> {
        let (longitude, latitude) = self.geo_position()?;
        let timestamp = parse_event_timestamp(&self.timestamp)?;
        let room = self.room.as_deref().and_then(normalize_room_id);
        Some(MarkerScan {
            timestamp,
            longitude,
            latitude,
            floor: room.as_deref().and_then(floor_from_room),
            room,
        })
    }
}

/// RFC 3339 to Unix seconds. A stray `Z` after an explicit offset
/// (`+00:00Z`) is tolerated.
pub fn parse_event_timestamp(text: &str) -> Option<f64> {
    let parsed = DateTime::parse_from_rfc3339(text).ok().or_else(|| {
        let trimmed = text.strip_suffix('Z')?;
        DateTime::parse_from_rfc3339(trimmed).ok()
    })?;
    Some(parsed.timestamp() as f64 + parsed.timestamp_subsec_nanos() as f64 * 1e-9)
}

/// Most recent valid QR scan in a log. Ties on timestamp go to the later
/// entry in the log.
pub fn latest_scan(events: &[QrEvent]) -> Option<MarkerScan> {
    let mut best: Option<MarkerScan> = None;
    for event in events.iter().filter(|e| e.is_qr()) {
        let Some(scan) = event.to_scan() else {
            log::debug!("Ignoring malformed QR event at {}", event.timestamp);
            continue;
        };
        if best.as_ref().map_or(true, |b| scan.timestamp >= b.timestamp) {
            best = Some(scan);
        }
    }
    if best.is_none() {
        log::warn!("No valid QR events found");
    }
    best
}

pub fn load_qr_events(path: &Path) -> anyhow::Result<Vec<QrEvent>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read QR events {}", path.display()))?;
    serde_json::from_str(&text).context("Failed to parse QR events")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_normalize_room_id() {
        assert_eq!(normalize_room_id("201").as_deref(), Some("2-01"));
        assert_eq!(normalize_room_id("2-01").as_deref(), Some("2-01"));
        assert_eq!(normalize_room_id("2-1").as_deref(), Some("2-01"));
        assert_eq!(normalize_room_id("15").as_deref(), Some("2-15"));
        assert_eq!(normalize_room_id(" 314 ").as_deref(), Some("3-14"));
        assert_eq!(normalize_room_id(""), None);
        assert_eq!(normalize_room_id("2-a1"), None);
        assert_eq!(normalize_room_id("lobby"), None);
        assert_eq!(normalize_room_id("2-01-3"), None);
    }

    #[test]
    fn test_floor_from_room() {
        assert_eq!(floor_from_room("3-12"), Some(3));
        assert_eq!(floor_from_room("105"), Some(1));
        assert_eq!(floor_from_room("7"), Some(2));
        assert_eq!(floor_from_room("x"), None);
    }

    #[test]
    fn test_room_from_qr_payload() {
        assert_eq!(
            room_from_qr_payload("https://example.org/location?room=212").as_deref(),
            Some("2-12")
        );
        assert_eq!(room_from_qr_payload("/location?room=3-4&src=qr").as_deref(), Some("3-04"));
        assert_eq!(room_from_qr_payload("qr_codes/room_205.png").as_deref(), Some("2-05"));
        assert_eq!(room_from_qr_payload("qr_2-01.png").as_deref(), Some("2-01"));
        assert_eq!(room_from_qr_payload("2-07").as_deref(), Some("2-07"));
        assert_eq!(room_from_qr_payload("https://example.org/"), None);
    }

    #[test]
    fn test_registry_lookup_and_scan() {
        let registry = MarkerRegistry::from_json_str(
            r#"[{"room": "201", "longitude": 2.1735, "latitude": 41.3852},
                {"room": "3-05", "position_x": 2.1740, "position_y": 41.3855},
                {"room": "bogus", "longitude": 0.0, "latitude": 0.0}]"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.position("2-1"), Some((2.1735, 41.3852)));

        let scan = registry.scan_for_room("305", 12.0).unwrap();
        assert_eq!(scan.floor, Some(3));
        assert_eq!(scan.room.as_deref(), Some("3-05"));
        assert_abs_diff_eq!(scan.longitude, 2.1740);

        assert_eq!(
            registry.scan_for_room("2-99", 0.0).unwrap_err(),
            TrackerError::UnknownRoom("2-99".into())
        );
    }

    #[test]
    fn test_parse_event_timestamp() {
        let t = parse_event_timestamp("1970-01-01T00:00:03.997600+00:00").unwrap();
        assert_abs_diff_eq!(t, 3.9976, epsilon = 1e-9);
        let t = parse_event_timestamp("1970-01-01T00:00:03.997600+00:00Z").unwrap();
        assert_abs_diff_eq!(t, 3.9976, epsilon = 1e-9);
        let t = parse_event_timestamp("2024-05-01T10:00:00Z").unwrap();
        assert_abs_diff_eq!(t, 1_714_557_600.0);
        assert!(parse_event_timestamp("yesterday").is_none());
    }

    fn event(room: &str, ts: &str, position: Option<Vec<f64>>, kind: Option<&str>) -> QrEvent {
        QrEvent {
            room: Some(room.into()),
            timestamp: ts.into(),
            position,
            kind: kind.map(String::from),
        }
    }

    #[test]
    fn test_latest_scan_picks_newest_valid_qr() {
        let events = vec![
            event("201", "2024-05-01T10:00:05+00:00Z", Some(vec![2.0, 41.0]), Some("qr")),
            event("202", "2024-05-01T10:00:09+00:00", Some(vec![2.1, 41.1]), Some("wifi")),
            event("203", "2024-05-01T10:00:07+00:00", Some(vec![2.2]), Some("qr")),
            event("304", "2024-05-01T10:00:06+00:00", Some(vec![2.3, 41.3]), None),
        ];
        let scan = latest_scan(&events).unwrap();
        assert_eq!(scan.room.as_deref(), Some("3-04"));
        assert_eq!(scan.floor, Some(3));
        assert_eq!((scan.longitude, scan.latitude), (2.3, 41.3));
    }

    #[test]
    fn test_latest_scan_ties_go_to_later_entry() {
        let ts = "2024-05-01T10:00:00+00:00";
        let events = vec![
            event("201", ts, Some(vec![2.0, 41.0]), Some("qr")),
            event("202", ts, Some(vec![2.5, 41.5]), Some("qr")),
        ];
        assert_eq!(latest_scan(&events).unwrap().room.as_deref(), Some("2-02"));
        assert!(latest_scan(&[]).is_none());
    }

    #[test]
    fn test_qr_event_json_shape() {
        let events: Vec<QrEvent> = serde_json::from_str(
            r#"[{"room": "201", "timestamp": "2024-05-01T10:00:00+00:00Z", "position": [2.17, 41.38], "type": "qr"}]"#,
        )
        .unwrap();
        assert!(events[0].is_qr());
        assert_eq!(events[0].geo_position(), Some((2.17, 41.38)));
    }
}
