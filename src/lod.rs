//! # Level of Detail
//!
//! Two-state controller driven by camera telemetry. Above the altitude
//! threshold the scene shows one pin per [`TrackGroup`]; below it shows
//! individual track lines and decimated point markers.
//!
//! Camera notifications arrive at frame rate, so two gates keep the work
//! bounded:
//! - a movement gate drops notifications closer than
//!   `min_camera_movement_meters` to the last accepted camera position
//! - the band check re-renders only when the altitude crosses the threshold

use std::collections::HashSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::geo_utils::movement_distance;
use crate::render::{track_group_id, track_line_id, track_point_id, MarkerStyle, PolylineStyle, RenderAdapter};
use crate::repository::TrackRepository;
use crate::track::{Activity, TrackPoint};
use crate::{Bounds, GeoPoint, Track, TrackGroup};

/// Level-of-detail tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Camera heights strictly above this show group pins.
    /// Default: 70000.0 (10000.0 is the other value seen in practice)
    pub altitude_threshold_meters: f64,

    /// Camera moves shorter than this are ignored.
    /// Default: 50.0
    pub min_camera_movement_meters: f64,

    /// Minimum time between kept point markers along a track.
    /// Default: 60
    pub point_spacing_seconds: i64,

    /// Pixel size of a point marker.
    /// Default: 6.0
    pub point_pixel_size: f64,

    /// Pin height for a group of zero tracks.
    /// Default: 30.0
    pub pin_min_size: f64,

    /// Pin height cap.
    /// Default: 250.0
    pub pin_max_size: f64,

    /// Pin height added per member track.
    /// Default: 1.1
    pub pin_growth_per_track: f64,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            altitude_threshold_meters: 70_000.0,
            min_camera_movement_meters: 50.0,
            point_spacing_seconds: 60,
            point_pixel_size: 6.0,
            pin_min_size: 30.0,
            pin_max_size: 250.0,
            pin_growth_per_track: 220.0 / 200.0,
        }
    }
}

/// Which representation is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AltitudeBand {
    /// Group pins
    High,
    /// Individual tracks
    Low,
}

/// Camera telemetry as reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    /// Camera position; altitude is the height above the ellipsoid.
    pub position: GeoPoint,
    /// Radians
    pub heading: f64,
    /// Radians
    pub pitch: f64,
    /// Visible area, when the renderer can compute it
    pub viewport: Option<Bounds>,
}

impl CameraState {
    /// Camera looking straight down from `position`.
    pub fn looking_down(position: GeoPoint) -> Self {
        Self {
            position,
            heading: 0.0,
            pitch: -std::f64::consts::FRAC_PI_2,
            viewport: None,
        }
    }

    pub fn with_viewport(mut self, viewport: Bounds) -> Self {
        self.viewport = Some(viewport);
        self
    }
}

/// Outcome of a camera notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodUpdate {
    /// Camera barely moved; nothing was recomputed.
    Suppressed,
    /// Still on the same side of the threshold.
    Unchanged,
    /// Crossed the threshold and re-rendered.
    Transitioned(AltitudeBand),
}

// ============================================================================
// Filters
// ============================================================================

/// Excludes tracks from the low-altitude display.
pub trait TrackFilter {
    /// True if the track must be hidden.
    fn filters_track(&self, track: &Track) -> bool;
}

impl<F> TrackFilter for F
where
    F: Fn(&Track) -> bool,
{
    fn filters_track(&self, track: &Track) -> bool {
        self(track)
    }
}

/// Shows every track.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilter;

impl TrackFilter for NoFilter {
    fn filters_track(&self, _track: &Track) -> bool {
        false
    }
}

/// Hides tracks of the listed activities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityFilter {
    pub hidden: HashSet<Activity>,
}

impl ActivityFilter {
    pub fn hiding(activities: impl IntoIterator<Item = Activity>) -> Self {
        Self {
            hidden: activities.into_iter().collect(),
        }
    }
}

impl TrackFilter for ActivityFilter {
    fn filters_track(&self, track: &Track) -> bool {
        self.hidden.contains(&track.activity())
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Decides what is visible from the camera height.
#[derive(Debug, Clone)]
pub struct LevelOfDetailController {
    config: LodConfig,
    band: AltitudeBand,
    last_camera: Option<CameraState>,
    in_perspective: Vec<String>,
    renders: usize,
}

impl Default for LevelOfDetailController {
    fn default() -> Self {
        Self::new(LodConfig::default())
    }
}

impl LevelOfDetailController {
    pub fn new(config: LodConfig) -> Self {
        Self {
            config,
            band: AltitudeBand::High,
            last_camera: None,
            in_perspective: Vec::new(),
            renders: 0,
        }
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    pub fn band(&self) -> AltitudeBand {
        self.band
    }

    pub fn is_high_altitude(&self) -> bool {
        self.band == AltitudeBand::High
    }

    /// Number of visibility passes issued so far.
    pub fn render_count(&self) -> usize {
        self.renders
    }

    /// Ids of tracks intersecting the last accepted viewport, in install order.
    pub fn tracks_in_perspective(&self) -> &[String] {
        &self.in_perspective
    }

    /// Forget the last camera position and band (new date).
    pub fn reset(&mut self) {
        self.band = AltitudeBand::High;
        self.last_camera = None;
        self.in_perspective.clear();
    }

    /// Create the entities of every track and group, hidden.
    pub fn initialize_entities<R: RenderAdapter + ?Sized>(&self, repo: &TrackRepository, renderer: &mut R) {
        for track in repo.tracks() {
            self.draw_track(track, renderer);
        }
        for group in repo.groups() {
            self.draw_group(group, renderer);
        }
        debug!(
            "[Lod] Created entities for {} tracks and {} groups",
            repo.track_count(),
            repo.groups().len()
        );
    }

    /// Create the line and sparse point markers of one track.
    ///
    /// Metadata-only tracks have no geometry yet and get nothing.
    pub fn draw_track<R: RenderAdapter + ?Sized>(&self, track: &Track, renderer: &mut R) {
        if !track.has_points() {
            return;
        }
        let positions: Vec<GeoPoint> = track.points().iter().map(TrackPoint::position).collect();
        renderer.draw_polyline(
            &track_line_id(track.id()),
            &positions,
            &PolylineStyle::track_line(track.color()),
        );
        let style = MarkerStyle::TrackPoint {
            color: track.color(),
            pixel_size: self.config.point_pixel_size,
        };
        for index in sparse_point_indices(track.points(), self.config.point_spacing_seconds) {
            renderer.draw_point_marker(&track_point_id(track.id(), index), positions[index], &style);
        }
    }

    fn draw_group<R: RenderAdapter + ?Sized>(&self, group: &TrackGroup, renderer: &mut R) {
        let (height, width) = pin_size(group.size(), &self.config);
        renderer.draw_point_marker(
            &track_group_id(group.group_id),
            group.centroid,
            &MarkerStyle::GroupPin { height, width },
        );
    }

    /// Handle a camera notification.
    pub fn on_camera_change<R: RenderAdapter + ?Sized>(
        &mut self,
        camera: &CameraState,
        repo: &TrackRepository,
        filter: &dyn TrackFilter,
        renderer: &mut R,
    ) -> LodUpdate {
        if let Some(last) = &self.last_camera {
            if movement_distance(&last.position, &camera.position) < self.config.min_camera_movement_meters {
                return LodUpdate::Suppressed;
            }
        }
        self.last_camera = Some(*camera);
        self.refresh_perspective(repo);

        let band = if camera.position.altitude > self.config.altitude_threshold_meters {
            AltitudeBand::High
        } else {
            AltitudeBand::Low
        };
        if band == self.band {
            return LodUpdate::Unchanged;
        }

        info!(
            "[Lod] {:?} -> {:?} at {:.0}m",
            self.band, band, camera.position.altitude
        );
        self.band = band;
        self.render(repo, filter, renderer);
        LodUpdate::Transitioned(band)
    }

    /// Apply the visibility policy of the current band.
    pub fn render<R: RenderAdapter + ?Sized>(&mut self, repo: &TrackRepository, filter: &dyn TrackFilter, renderer: &mut R) {
        self.renders += 1;
        match self.band {
            AltitudeBand::High => {
                set_groups_visible(repo.groups(), true, renderer);
                for track in repo.tracks() {
                    self.set_track_visible(track, false, false, renderer);
                }
            }
            AltitudeBand::Low => {
                set_groups_visible(repo.groups(), false, renderer);
                for track in repo.tracks() {
                    if filter.filters_track(track) {
                        self.set_track_visible(track, false, false, renderer);
                    } else {
                        self.set_track_visible(track, track.is_selected(), true, renderer);
                    }
                }
            }
        }
    }

    fn set_track_visible<R: RenderAdapter + ?Sized>(&self, track: &Track, line: bool, points: bool, renderer: &mut R) {
        renderer.set_entity_visible(&track_line_id(track.id()), line);
        for index in sparse_point_indices(track.points(), self.config.point_spacing_seconds) {
            renderer.set_entity_visible(&track_point_id(track.id(), index), points);
        }
    }

    /// Recompute the tracks in perspective against the last accepted camera.
    ///
    /// Needed whenever track geometry changes without the camera moving.
    pub fn refresh_perspective(&mut self, repo: &TrackRepository) {
        let Some(camera) = &self.last_camera else {
            return;
        };
        self.in_perspective = match camera.viewport {
            Some(viewport) => repo
                .tracks_in_bounds(&viewport)
                .into_iter()
                .map(|t| t.id().to_string())
                .collect(),
            None => repo.tracks().iter().map(|t| t.id().to_string()).collect(),
        };
    }
}

fn set_groups_visible<R: RenderAdapter + ?Sized>(groups: &[TrackGroup], visible: bool, renderer: &mut R) {
    for group in groups {
        renderer.set_entity_visible(&track_group_id(group.group_id), visible);
    }
}

/// Indices of point markers worth drawing.
///
/// A point is kept when it is at least `spacing_seconds` after the previously
/// kept point. The reference starts at the first point, which is not kept
/// itself (the line already marks the launch).
pub fn sparse_point_indices(points: &[TrackPoint], spacing_seconds: i64) -> Vec<usize> {
    let Some(first) = points.first() else {
        return vec![];
    };
    let mut reference = first.timestamp;
    let mut kept = Vec::new();
    for (index, point) in points.iter().enumerate().skip(1) {
        if (point.timestamp - reference).num_seconds() >= spacing_seconds {
            kept.push(index);
            reference = point.timestamp;
        }
    }
    kept
}

/// Pin (height, width) for a group of `members` tracks.
pub fn pin_size(members: usize, config: &LodConfig) -> (f64, f64) {
    let height = (config.pin_min_size + members as f64 * config.pin_growth_per_track).min(config.pin_max_size);
    (height, height * 5.0 / 6.0)
}
