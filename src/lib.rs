//! # Trackview
//!
//! Flight track browsing and replay core for globe viewers.
//!
//! This library provides:
//! - Launch-point clustering of flight tracks (DBSCAN)
//! - A level-of-detail controller that switches between group pins and
//!   individual tracks from camera telemetry
//! - Selection state with lazy, session-checked detail loading
//! - A playback engine that merges tracks onto one synchronized timeline
//!   with camera follow
//! - Place-name labels fetched around a low camera
//!
//! Rendering is abstract: everything visual goes through [`RenderAdapter`].
//! Loading is abstract: everything remote goes through [`TrackLoader`].
//!
//! ## Features
//!
//! - **`parallel`** - Compute clustering neighborhoods with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use trackview::{cluster_tracks, Activity, ClusterConfig, Track, TrackPoint};
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
//! let launch = |id: &str, lat: f64, lng: f64| {
//!     Track::new(id, id, Activity::Paraglider, 10.0, vec![TrackPoint::new(t0, lat, lng, 1200.0)]).unwrap()
//! };
//! let tracks = vec![
//!     launch("a", 35.0, 139.0),
//!     launch("b", 35.001, 139.001),
//!     launch("c", 36.0, 140.0),
//! ];
//!
//! let groups = cluster_tracks(&tracks, &ClusterConfig::default());
//! assert_eq!(groups.len(), 2);
//! assert_eq!(groups[0].track_ids, vec!["a", "b"]);
//! ```

use rstar::{RTreeObject, AABB};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackViewError};

// Geographic utilities (distance, bounds, interpolation)
pub mod geo_utils;

// Track data model
pub mod track;
pub use track::{Activity, Color, ColorAssignment, Palette, Track, TrackMetadata, TrackPoint, PALETTE};

// Schema-validated records at the loader boundary
pub mod records;
pub use records::{
    parse_metadata_batch, parse_track_batch, parse_track_batch_json, Diagnostic, ParsedBatch,
    PointSchema, TrackGroupSummary,
};

// Launch-point clustering
pub mod clustering;
pub use clustering::{assemble_groups, cluster_tracks, ClusterConfig, TrackGroup};

// Per-date track ownership
pub mod repository;
pub use repository::{SessionId, TrackRepository};

// Renderer collaborator interface
pub mod render;
pub use render::{
    CameraPose, ClockBounds, EntityRef, MarkerStyle, PolylineStyle, RecordingRenderer,
    RenderAdapter, ScreenPoint,
};

// Subscription registry for camera and clock notifications
pub mod events;
pub use events::{EventHub, Subscription, SubscriptionToken};

// Level-of-detail state machine
pub mod lod;
pub use lod::{
    ActivityFilter, AltitudeBand, CameraState, LevelOfDetailController, LodConfig, LodUpdate,
    NoFilter, TrackFilter,
};

// Selection of tracks, groups and a single point
pub mod selection;
pub use selection::{GroupLoadTicket, GroupSelection, SelectionModel, TrackPointRef};

// Synchronized multi-track playback
pub mod playback;
pub use playback::{
    CameraTarget, FollowStart, PlaybackConfig, PlaybackEngine, PlaybackState, SampledPath,
    TickUpdate, TimeWindow, TrackPosition,
};

// Place-name labels near a low camera
pub mod placenames;
pub use placenames::{PlaceName, PlaceNameConfig, PlaceNameLayer, PlaceNameQuery};

// Loader collaborator interface
pub mod loader;
pub use loader::{JsonFileLoader, TrackLoader};

// Controller object wiring everything together
pub mod viewer;
pub use viewer::{ClickAction, DateLoadTicket, LoadSummary, TrackViewer, ViewMode, ViewerConfig};

// ============================================================================
// Core Types
// ============================================================================

/// A geodetic position: degrees and meters above the ellipsoid.
///
/// # Example
/// ```
/// use trackview::GeoPoint;
/// let launch = GeoPoint::new(36.4, 138.1, 1600.0);
/// assert!(launch.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.altitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Latitude/longitude bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from points.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self::from_point(first);
        for p in &points[1..] {
            bounds.extend(p);
        }
        Some(bounds)
    }

    /// Degenerate bounds around a single point.
    pub fn from_point(p: &GeoPoint) -> Self {
        Self {
            min_lat: p.latitude,
            max_lat: p.latitude,
            min_lng: p.longitude,
            max_lng: p.longitude,
        }
    }

    pub fn extend(&mut self, p: &GeoPoint) {
        self.min_lat = self.min_lat.min(p.latitude);
        self.max_lat = self.max_lat.max(p.latitude);
        self.min_lng = self.min_lng.min(p.longitude);
        self.max_lng = self.max_lng.max(p.longitude);
    }

    /// Union of two bounding boxes.
    pub fn merge(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lng: self.min_lng.min(other.min_lng),
            max_lng: self.max_lng.max(other.max_lng),
        }
    }

    /// Get the center point of the bounds (altitude 0).
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
            0.0,
        )
    }

    pub fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }

    /// True for a viewport that wraps across longitude 180 (`min_lng > max_lng`).
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lng > self.max_lng
    }

    /// Envelopes covering the bounds: one, or one per side of the antimeridian.
    pub fn envelopes(&self) -> Vec<AABB<[f64; 2]>> {
        if !self.crosses_antimeridian() {
            return vec![self.envelope()];
        }
        vec![
            AABB::from_corners([self.min_lng, self.min_lat], [180.0, self.max_lat]),
            AABB::from_corners([-180.0, self.min_lat], [self.max_lng, self.max_lat]),
        ]
    }
}

// ============================================================================
// Spatial Indexing Types
// ============================================================================

/// Bounding box of a track (used for viewport queries).
#[derive(Debug, Clone)]
pub struct TrackBounds {
    pub track_id: String,
    pub bounds: Bounds,
}

impl RTreeObject for TrackBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bounds.envelope()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(35.0, 139.0, 1200.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0, 0.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0, 0.0).is_valid());
    }

    #[test]
    fn test_bounds() {
        assert!(Bounds::from_points(&[]).is_none());
        let bounds = Bounds::from_points(&[
            GeoPoint::new(35.0, 139.0, 0.0),
            GeoPoint::new(36.0, 138.0, 0.0),
            GeoPoint::new(35.5, 140.0, 0.0),
        ])
        .unwrap();
        assert_eq!(bounds.min_lat, 35.0);
        assert_eq!(bounds.max_lat, 36.0);
        assert_eq!(bounds.min_lng, 138.0);
        assert_eq!(bounds.max_lng, 140.0);
        assert_eq!(bounds.center(), GeoPoint::new(35.5, 139.0, 0.0));
    }

    #[test]
    fn test_envelopes_split_at_antimeridian() {
        let wrapped = Bounds {
            min_lat: -20.0,
            max_lat: -15.0,
            min_lng: 170.0,
            max_lng: -170.0,
        };
        assert!(wrapped.crosses_antimeridian());
        let envelopes = wrapped.envelopes();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].lower(), [170.0, -20.0]);
        assert_eq!(envelopes[0].upper(), [180.0, -15.0]);
        assert_eq!(envelopes[1].lower(), [-180.0, -20.0]);
        assert_eq!(envelopes[1].upper(), [-170.0, -15.0]);

        let plain = Bounds::from_point(&GeoPoint::new(35.0, 139.0, 0.0));
        assert!(!plain.crosses_antimeridian());
        assert_eq!(plain.envelopes().len(), 1);
    }
}
