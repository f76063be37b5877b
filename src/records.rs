//! Loader-boundary records.
//!
//! Raw JSON from a loader is deserialized into typed records here and turned
//! into domain values. A malformed record never aborts its batch: it is
//! skipped and reported as a [`Diagnostic`] carrying a `Validation` error.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OptionExt, Result, TrackViewError};
use crate::track::{check_ordering, track_id_for, Activity, Track, TrackMetadata, TrackPoint};
use crate::GeoPoint;

/// Layout of a single point inside `track_points`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointSchema {
    /// `[time, latitude, longitude, altitude]`
    #[default]
    Positional,
    /// `{ "time": .., "latitude": .., "longitude": .., "altitude": .. }`
    Named,
}

/// A record that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Position of the record within its batch
    pub index: usize,
    pub error: TrackViewError,
}

/// Tracks parsed from a batch plus everything that was skipped.
#[derive(Debug, Clone)]
pub struct ParsedBatch<T> {
    pub items: Vec<T>,
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Default for ParsedBatch<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            diagnostics: Vec::new(),
        }
    }
}

// ============================================================================
// Wire records
// ============================================================================

/// Distance as either a number of km or a `"12.3 km"` label.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DistanceField {
    Km(f64),
    Label(String),
}

impl DistanceField {
    pub fn km(&self) -> Option<f64> {
        match self {
            DistanceField::Km(km) => Some(*km),
            DistanceField::Label(label) => label.trim().trim_end_matches("km").trim().parse().ok(),
        }
    }
}

/// Position as a named object or a `[longitude, latitude, altitude?]` array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PositionField {
    Named {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        altitude: f64,
    },
    Array(Vec<f64>),
}

impl PositionField {
    pub fn to_point(&self) -> Option<GeoPoint> {
        let point = match self {
            PositionField::Named {
                latitude,
                longitude,
                altitude,
            } => GeoPoint::new(*latitude, *longitude, *altitude),
            PositionField::Array(values) => match values.as_slice() {
                [lng, lat] => GeoPoint::new(*lat, *lng, 0.0),
                [lng, lat, alt] => GeoPoint::new(*lat, *lng, *alt),
                _ => return None,
            },
        };
        point.is_valid().then_some(point)
    }
}

/// A complete track file.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackRecord {
    #[serde(rename = "pilotname", alias = "pilotName")]
    pub pilot_name: String,
    pub distance: DistanceField,
    pub activity: String,
    #[serde(default)]
    pub area: Option<String>,
    pub track_points: Vec<Value>,
}

/// A per-track summary entry from the metadata listing of a date.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    #[serde(rename = "pilotname", alias = "pilotName")]
    pub pilot_name: String,
    pub distance: DistanceField,
    #[serde(default)]
    pub max_altitude: Option<f64>,
    pub start_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
    pub start_position: PositionField,
    #[serde(default)]
    pub last_position: Option<PositionField>,
    pub activity: String,
    #[serde(default)]
    pub model: String,
}

/// A precomputed group from the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackGroupSummary {
    #[serde(alias = "groupid")]
    pub group_id: u32,
    pub track_ids: Vec<String>,
    #[serde(default)]
    pub position: Option<GeoPoint>,
}

impl MetadataRecord {
    pub fn into_metadata(self) -> Result<TrackMetadata> {
        let record = self.pilot_name.clone();
        let distance_km = self
            .distance
            .km()
            .ok_or_validation(&record, "distance is not a number of km")?;
        let start_position = self
            .start_position
            .to_point()
            .ok_or_validation(&record, "invalid start position")?;
        if self.last_time < self.start_time {
            return Err(TrackViewError::validation(record, "last time precedes start time"));
        }
        Ok(TrackMetadata {
            pilot_name: self.pilot_name,
            activity: Activity::normalize(&self.activity),
            distance_km,
            start_time: self.start_time,
            end_time: self.last_time,
            start_position,
            end_position: self.last_position.as_ref().and_then(PositionField::to_point),
            max_altitude: self.max_altitude,
            model: self.model,
        })
    }
}

// ============================================================================
// Points
// ============================================================================

/// Parse a timestamp given as RFC 3339 text, naive `YYYY-MM-DD HH:MM:SS` (UTC),
/// or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Parse one point according to `schema`.
pub fn parse_point(value: &Value, schema: PointSchema) -> Result<TrackPoint> {
    let record = value.to_string();
    let (time, lat, lng, alt) = match schema {
        PointSchema::Positional => {
            let fields = value
                .as_array()
                .filter(|a| a.len() == 4)
                .ok_or_validation(&record, "expected [time, latitude, longitude, altitude]")?;
            (&fields[0], &fields[1], &fields[2], &fields[3])
        }
        PointSchema::Named => {
            let object = value
                .as_object()
                .ok_or_validation(&record, "expected a point object")?;
            let time = object
                .get("time")
                .or_else(|| object.get("timestamp"))
                .ok_or_validation(&record, "missing time")?;
            let field = |name: &str| object.get(name).ok_or_validation(&record, &format!("missing {}", name));
            (time, field("latitude")?, field("longitude")?, field("altitude")?)
        }
    };
    let timestamp = parse_timestamp(time).ok_or_validation(&record, "unreadable time")?;
    let number = |v: &Value, name: &str| v.as_f64().ok_or_validation(&record, &format!("{} is not a number", name));
    let point = TrackPoint::new(
        timestamp,
        number(lat, "latitude")?,
        number(lng, "longitude")?,
        number(alt, "altitude")?,
    );
    if !point.position().is_valid() {
        return Err(TrackViewError::validation(record, "coordinates out of range"));
    }
    Ok(point)
}

/// Parse a point array, skipping invalid entries.
pub fn parse_points(values: &[Value], schema: PointSchema) -> ParsedBatch<TrackPoint> {
    let mut batch = ParsedBatch::default();
    for (index, value) in values.iter().enumerate() {
        match parse_point(value, schema) {
            Ok(point) => batch.items.push(point),
            Err(error) => batch.diagnostics.push(Diagnostic { index, error }),
        }
    }
    batch
}

/// Parse the body of a detail file: a full track record or a bare point array.
///
/// Invalid points are skipped; out-of-order timestamps reject the whole detail.
pub fn parse_detail(value: &Value, track_id: &str, schema: PointSchema) -> Result<ParsedBatch<TrackPoint>> {
    let raw = match value {
        Value::Array(points) => points,
        Value::Object(object) => object
            .get("track_points")
            .and_then(Value::as_array)
            .ok_or_validation(track_id, "missing track_points")?,
        _ => return Err(TrackViewError::validation(track_id, "expected an object or array")),
    };
    let batch = parse_points(raw, schema);
    check_ordering(track_id, &batch.items)?;
    Ok(batch)
}

// ============================================================================
// Batches
// ============================================================================

/// Parse one complete track record. `index` is used for the fallback id.
pub fn parse_track_record(value: &Value, index: usize, schema: PointSchema) -> Result<(Track, Vec<Diagnostic>)> {
    let record: TrackRecord = serde_json::from_value(value.clone())
        .map_err(|e| TrackViewError::validation(format!("track #{}", index), e.to_string()))?;
    let distance_km = record
        .distance
        .km()
        .ok_or_validation(&record.pilot_name, "distance is not a number of km")?;
    let points = parse_points(&record.track_points, schema);
    let id = points
        .items
        .last()
        .map(|p| track_id_for(&record.pilot_name, &p.timestamp))
        .unwrap_or_else(|| format!("track-{}", index));
    let track = Track::new(
        id,
        record.pilot_name,
        Activity::normalize(&record.activity),
        distance_km,
        points.items,
    )?;
    Ok((track, points.diagnostics))
}

/// Parse a batch of complete track records.
pub fn parse_track_batch(values: &[Value], schema: PointSchema) -> ParsedBatch<Track> {
    let mut batch = ParsedBatch::default();
    for (index, value) in values.iter().enumerate() {
        match parse_track_record(value, index, schema) {
            Ok((track, point_diagnostics)) => {
                if !point_diagnostics.is_empty() {
                    warn!(
                        "[Records] Track '{}': skipped {} invalid points",
                        track.id(),
                        point_diagnostics.len()
                    );
                }
                batch.items.push(track);
            }
            Err(error) => {
                warn!("[Records] Skipping track #{}: {}", index, error);
                batch.diagnostics.push(Diagnostic { index, error });
            }
        }
    }
    batch
}

/// Parse a JSON array of complete track records.
pub fn parse_track_batch_json(json: &str, schema: PointSchema) -> Result<ParsedBatch<Track>> {
    let values: Vec<Value> =
        serde_json::from_str(json).map_err(|e| TrackViewError::validation("track batch", e.to_string()))?;
    Ok(parse_track_batch(&values, schema))
}

/// Parse a batch of metadata records.
pub fn parse_metadata_batch(values: &[Value]) -> ParsedBatch<TrackMetadata> {
    let mut batch = ParsedBatch::default();
    for (index, value) in values.iter().enumerate() {
        let parsed = serde_json::from_value::<MetadataRecord>(value.clone())
            .map_err(|e| TrackViewError::validation(format!("metadata #{}", index), e.to_string()))
            .and_then(MetadataRecord::into_metadata);
        match parsed {
            Ok(metadata) => batch.items.push(metadata),
            Err(error) => {
                warn!("[Records] Skipping metadata #{}: {}", index, error);
                batch.diagnostics.push(Diagnostic { index, error });
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_batch_of_tracks() {
        let batch: ParsedBatch<Track> = ParsedBatch::default();
        assert!(batch.items.is_empty());
        assert!(batch.diagnostics.is_empty());
        assert!(parse_points(&[], PointSchema::Positional).items.is_empty());
        assert!(parse_metadata_batch(&[]).items.is_empty());
    }

    #[test]
    fn test_distance_field() {
        assert_eq!(DistanceField::Label("12.5 km".into()).km(), Some(12.5));
        assert_eq!(DistanceField::Km(3.0).km(), Some(3.0));
        assert_eq!(DistanceField::Label("far".into()).km(), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2024-05-01T10:00:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01T19:00:00+09:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01 10:00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(parse_timestamp(&json!(true)), None);
    }

    #[test]
    fn test_parse_point_schemas() {
        let positional = json!(["2024-05-01T10:00:00Z", 35.0, 139.0, 1200.0]);
        let point = parse_point(&positional, PointSchema::Positional).unwrap();
        assert_eq!(point.latitude, 35.0);
        assert_eq!(point.longitude, 139.0);

        let named = json!({"time": "2024-05-01T10:00:00Z", "latitude": 35.0, "longitude": 139.0, "altitude": 1200.0});
        assert_eq!(parse_point(&named, PointSchema::Named).unwrap(), point);

        assert!(parse_point(&positional, PointSchema::Named).is_err());
        assert!(parse_point(&json!([1, 2, 3]), PointSchema::Positional).is_err());
        assert!(parse_point(&json!(["2024-05-01T10:00:00Z", 95.0, 139.0, 0.0]), PointSchema::Positional).is_err());
    }

    #[test]
    fn test_metadata_record() {
        let value = json!({
            "pilotname": "Hanako",
            "distance": 21.4,
            "duration": 95,
            "maxAltitude": 2100.0,
            "startTime": "2024-05-01T01:00:00.000Z",
            "lastTime": "2024-05-01T02:35:00.000Z",
            "startPosition": [138.1, 36.4, 1600.0],
            "activity": "Flex wing FAI1"
        });
        let batch = parse_metadata_batch(&[value, json!({"pilotname": "broken"})]);
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.diagnostics.len(), 1);
        assert_eq!(batch.diagnostics[0].index, 1);
        let metadata = &batch.items[0];
        assert_eq!(metadata.activity, Activity::Hangglider);
        assert_eq!(metadata.start_position, GeoPoint::new(36.4, 138.1, 1600.0));
        assert_eq!(metadata.track_id(), "Hanako_20240501023500");
    }

    #[test]
    fn test_parse_detail_rejects_disorder() {
        let value = json!([
            ["2024-05-01T10:01:00Z", 35.0, 139.0, 1000.0],
            ["2024-05-01T10:00:00Z", 35.0, 139.0, 1000.0]
        ]);
        let err = parse_detail(&value, "t", PointSchema::Positional).unwrap_err();
        assert!(matches!(err, TrackViewError::InvalidOrdering { index: 1, .. }));
    }
}
