//! Loader collaborator interface and a file-backed implementation.
//!
//! The core never fetches anything itself. A [`TrackLoader`] supplies parsed
//! metadata, detail point sequences, optional precomputed groups and place
//! names. Any error it returns fails only the operation that asked for the
//! data.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::{debug, warn};
use serde_json::Value;

use crate::error::{Result, TrackViewError};
use crate::geo_utils::haversine_distance;
use crate::placenames::PlaceName;
use crate::records::{parse_detail, parse_metadata_batch, PointSchema, TrackGroupSummary};
use crate::track::{TrackMetadata, TrackPoint};
use crate::GeoPoint;

/// Source of track data for a date.
#[allow(async_fn_in_trait)]
pub trait TrackLoader {
    /// Per-track summaries for `date`. Invalid records are skipped, not fatal.
    async fn load_track_metadata(&self, date: NaiveDate) -> Result<Vec<TrackMetadata>>;

    /// Full, time-ordered point sequence of one track.
    async fn load_track_detail(&self, track_id: &str) -> Result<Vec<TrackPoint>>;

    /// Precomputed groups for `date`. Empty when the source has none.
    async fn load_track_groups(&self, date: NaiveDate) -> Result<Vec<TrackGroupSummary>>;

    /// Named places within `radius_km` of a position. Sources without
    /// place names return none.
    async fn load_place_names(&self, longitude: f64, latitude: f64, radius_km: f64) -> Result<Vec<PlaceName>> {
        let _ = (longitude, latitude, radius_km);
        Ok(vec![])
    }
}

/// Reads JSON files laid out as:
///
/// ```text
/// {root}/metadata/{YYYY-MM-DD}.json   array of metadata records
/// {root}/groups/{YYYY-MM-DD}.json     array of group summaries (optional)
/// {root}/paths/{track_id}.json        track record or bare point array
/// {root}/placenames.json              array of place names (optional)
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileLoader {
    root: PathBuf,
    schema: PointSchema,
}

impl JsonFileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            schema: PointSchema::default(),
        }
    }

    pub fn with_schema(mut self, schema: PointSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join("metadata").join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    fn groups_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join("groups").join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    fn detail_path(&self, track_id: &str) -> PathBuf {
        self.root.join("paths").join(format!("{}.json", track_id))
    }

    fn place_names_path(&self) -> PathBuf {
        self.root.join("placenames.json")
    }
}

async fn read_json(path: &Path) -> Result<Value> {
    let target = path.display().to_string();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TrackViewError::load(&target, e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| TrackViewError::validation(target, e.to_string()))
}

impl TrackLoader for JsonFileLoader {
    async fn load_track_metadata(&self, date: NaiveDate) -> Result<Vec<TrackMetadata>> {
        let path = self.metadata_path(date);
        let value = read_json(&path).await?;
        let Value::Array(records) = value else {
            return Err(TrackViewError::validation(
                path.display().to_string(),
                "expected an array of metadata records",
            ));
        };
        let batch = parse_metadata_batch(&records);
        if !batch.diagnostics.is_empty() {
            warn!(
                "[Loader] {}: skipped {} of {} metadata records",
                date,
                batch.diagnostics.len(),
                records.len()
            );
        }
        debug!("[Loader] {}: {} metadata records", date, batch.items.len());
        Ok(batch.items)
    }

    async fn load_track_detail(&self, track_id: &str) -> Result<Vec<TrackPoint>> {
        let value = read_json(&self.detail_path(track_id)).await?;
        let batch = parse_detail(&value, track_id, self.schema)?;
        if !batch.diagnostics.is_empty() {
            warn!(
                "[Loader] Track '{}': skipped {} invalid points",
                track_id,
                batch.diagnostics.len()
            );
        }
        Ok(batch.items)
    }

    async fn load_track_groups(&self, date: NaiveDate) -> Result<Vec<TrackGroupSummary>> {
        let path = self.groups_path(date);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("[Loader] {}: no precomputed groups", date);
            return Ok(vec![]);
        }
        let value = read_json(&path).await?;
        serde_json::from_value(value).map_err(|e| TrackViewError::validation(path.display().to_string(), e.to_string()))
    }

    async fn load_place_names(&self, longitude: f64, latitude: f64, radius_km: f64) -> Result<Vec<PlaceName>> {
        let path = self.place_names_path();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(vec![]);
        }
        let value = read_json(&path).await?;
        let places: Vec<PlaceName> = serde_json::from_value(value)
            .map_err(|e| TrackViewError::validation(path.display().to_string(), e.to_string()))?;
        let center = GeoPoint::new(latitude, longitude, 0.0);
        let radius_meters = radius_km * 1000.0;
        let nearby: Vec<PlaceName> = places
            .into_iter()
            .filter(|p| haversine_distance(&center, &p.position()) <= radius_meters)
            .collect();
        debug!(
            "[Loader] {} place names within {} km of ({}, {})",
            nearby.len(),
            radius_km,
            latitude,
            longitude
        );
        Ok(nearby)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let loader = JsonFileLoader::new("/data");
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(loader.metadata_path(date), PathBuf::from("/data/metadata/2024-05-01.json"));
        assert_eq!(loader.groups_path(date), PathBuf::from("/data/groups/2024-05-01.json"));
        assert_eq!(loader.detail_path("a_1"), PathBuf::from("/data/paths/a_1.json"));
        assert_eq!(loader.place_names_path(), PathBuf::from("/data/placenames.json"));
    }

    #[tokio::test]
    async fn test_missing_metadata_is_load_error() {
        let loader = JsonFileLoader::new("/nonexistent-trackview-root");
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let err = loader.load_track_metadata(date).await.unwrap_err();
        assert!(matches!(err, TrackViewError::Load { .. }));
        assert_eq!(loader.load_track_groups(date).await, Ok(vec![]));
        assert_eq!(loader.load_place_names(7.5, 46.0, 5.0).await, Ok(vec![]));
    }
}
