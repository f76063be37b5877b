//! Renderer collaborator interface.
//!
//! The core never draws anything itself. It issues abstract commands through
//! [`RenderAdapter`] and names entities with the ids built here, so a click
//! on an entity can be mapped back to a track, point or group with
//! [`EntityRef::parse`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::track::Color;
use crate::GeoPoint;

// ============================================================================
// Commands
// ============================================================================

/// Screen coordinates in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

/// Line appearance. `trail_seconds` is set for time-dynamic playback paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylineStyle {
    pub color: Color,
    pub outline_color: Color,
    pub width: f64,
    pub outline_width: f64,
    pub trail_seconds: Option<f64>,
}

impl PolylineStyle {
    /// Static track line: brightened track color with a track-colored outline.
    pub fn track_line(color: Color) -> Self {
        Self {
            color: color.brighten(0.5),
            outline_color: color,
            width: 4.0,
            outline_width: 2.0,
            trail_seconds: None,
        }
    }

    /// Playback path showing only the trailing `trail_seconds`.
    pub fn trail(color: Color, trail_seconds: f64) -> Self {
        Self {
            trail_seconds: Some(trail_seconds),
            ..Self::track_line(color)
        }
    }
}

/// Marker appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarkerStyle {
    /// Decimated fix along a track
    TrackPoint { color: Color, pixel_size: f64 },
    /// Group pin, sized by member count
    GroupPin { height: f64, width: f64 },
    /// Moving playback marker
    PlaybackPoint { color: Color, outline_color: Color, pixel_size: f64 },
    /// Pilot name label following the playback marker
    Label { text: String, background: Color },
    /// Ground label, hidden beyond `show_distance` meters from the camera
    PlaceName { text: String, show_distance: f64 },
}

/// Camera looking at `target` from `range` meters away.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub target: GeoPoint,
    /// Radians
    pub heading: f64,
    /// Radians
    pub pitch: f64,
    /// Meters
    pub range: f64,
}

/// Playback clock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockBounds {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub current: DateTime<Utc>,
    pub multiplier: f64,
    /// Restart at `start` after reaching `stop`
    pub looping: bool,
}

/// Abstract renderer.
///
/// Commands that reference an entity id that does not exist are no-ops.
pub trait RenderAdapter {
    fn draw_polyline(&mut self, id: &str, points: &[GeoPoint], style: &PolylineStyle);

    /// Time-tagged path whose visible part follows the playback clock.
    fn draw_timed_path(&mut self, id: &str, samples: &[(DateTime<Utc>, GeoPoint)], style: &PolylineStyle);

    fn draw_point_marker(&mut self, id: &str, position: GeoPoint, style: &MarkerStyle);

    /// Returns false when no entity has this id.
    fn set_entity_visible(&mut self, id: &str, visible: bool) -> bool;

    /// Move an existing marker. Returns false when no entity has this id.
    fn move_entity(&mut self, id: &str, position: GeoPoint) -> bool;

    fn remove_all_entities(&mut self);

    fn set_camera_pose(&mut self, pose: &CameraPose);

    /// Release any look-at lock on the camera.
    fn reset_camera_transform(&mut self);

    fn set_clock_bounds(&mut self, bounds: &ClockBounds);

    fn set_clock_animating(&mut self, animating: bool);

    /// Entity id under the screen position, if any.
    fn pick(&self, screen: ScreenPoint) -> Option<String>;
}

// ============================================================================
// Entity ids
// ============================================================================

pub fn track_line_id(track_id: &str) -> String {
    format!("trackline-{}", track_id)
}

pub fn track_point_id(track_id: &str, index: usize) -> String {
    format!("trackpoint-{}-{}", track_id, index)
}

pub fn track_group_id(group_id: u32) -> String {
    format!("trackgroup-{}", group_id)
}

pub fn playback_point_id(track_id: &str) -> String {
    format!("playback-point-{}", track_id)
}

pub fn playback_path_id(track_id: &str) -> String {
    format!("playback-path-{}", track_id)
}

pub fn label_id(track_id: &str) -> String {
    format!("label-{}", track_id)
}

pub fn place_name_id(name: &str, longitude: f64, latitude: f64) -> String {
    format!("placename-{}_{}_{}", name, longitude, latitude)
}

/// What an entity id refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    TrackLine(String),
    TrackPoint { track_id: String, index: usize },
    TrackGroup(u32),
    PlaybackPoint(String),
    PlaybackPath(String),
    Label(String),
}

impl EntityRef {
    pub fn parse(id: &str) -> Option<Self> {
        if let Some(rest) = id.strip_prefix("trackpoint-") {
            let (track_id, index) = rest.rsplit_once('-')?;
            return Some(EntityRef::TrackPoint {
                track_id: track_id.to_string(),
                index: index.parse().ok()?,
            });
        }
        if let Some(rest) = id.strip_prefix("trackgroup-") {
            return rest.parse().ok().map(EntityRef::TrackGroup);
        }
        let (prefix, track_id) = [
            "trackline-",
            "playback-point-",
            "playback-path-",
            "label-",
        ]
        .iter()
        .find_map(|prefix| id.strip_prefix(prefix).map(|rest| (*prefix, rest)))?;
        let track_id = track_id.to_string();
        Some(match prefix {
            "trackline-" => EntityRef::TrackLine(track_id),
            "playback-point-" => EntityRef::PlaybackPoint(track_id),
            "playback-path-" => EntityRef::PlaybackPath(track_id),
            _ => EntityRef::Label(track_id),
        })
    }

    /// The track this entity belongs to, if any.
    pub fn track_id(&self) -> Option<&str> {
        match self {
            EntityRef::TrackLine(id)
            | EntityRef::PlaybackPoint(id)
            | EntityRef::PlaybackPath(id)
            | EntityRef::Label(id) => Some(id),
            EntityRef::TrackPoint { track_id, .. } => Some(track_id),
            EntityRef::TrackGroup(_) => None,
        }
    }
}

// ============================================================================
// Recording renderer
// ============================================================================

/// Stored state of one entity in a [`RecordingRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEntity {
    pub visible: bool,
    pub position: Option<GeoPoint>,
    pub point_count: usize,
}

/// Headless renderer that records the resulting scene state.
///
/// Useful for hosts without a display and for tests.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub entities: HashMap<String, RecordedEntity>,
    pub camera: Option<CameraPose>,
    pub camera_transform_resets: usize,
    pub clock: Option<ClockBounds>,
    pub animating: bool,
    /// Calls to `set_entity_visible` that hit an existing entity
    pub visibility_commands: usize,
    /// Entity returned by the next `pick`
    pub pick_result: Option<String>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self, id: &str) -> bool {
        self.entities.get(id).is_some_and(|e| e.visible)
    }

    pub fn has_entity(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    fn insert(&mut self, id: &str, entity: RecordedEntity) {
        self.entities.insert(id.to_string(), entity);
    }
}

impl RenderAdapter for RecordingRenderer {
    fn draw_polyline(&mut self, id: &str, points: &[GeoPoint], _style: &PolylineStyle) {
        self.insert(
            id,
            RecordedEntity {
                visible: false,
                position: points.first().copied(),
                point_count: points.len(),
            },
        );
    }

    fn draw_timed_path(&mut self, id: &str, samples: &[(DateTime<Utc>, GeoPoint)], _style: &PolylineStyle) {
        self.insert(
            id,
            RecordedEntity {
                visible: true,
                position: samples.first().map(|(_, p)| *p),
                point_count: samples.len(),
            },
        );
    }

    fn draw_point_marker(&mut self, id: &str, position: GeoPoint, _style: &MarkerStyle) {
        self.insert(
            id,
            RecordedEntity {
                visible: false,
                position: Some(position),
                point_count: 1,
            },
        );
    }

    fn set_entity_visible(&mut self, id: &str, visible: bool) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.visible = visible;
                self.visibility_commands += 1;
                true
            }
            None => false,
        }
    }

    fn move_entity(&mut self, id: &str, position: GeoPoint) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.position = Some(position);
                true
            }
            None => false,
        }
    }

    fn remove_all_entities(&mut self) {
        self.entities.clear();
    }

    fn set_camera_pose(&mut self, pose: &CameraPose) {
        self.camera = Some(*pose);
    }

    fn reset_camera_transform(&mut self) {
        self.camera_transform_resets += 1;
    }

    fn set_clock_bounds(&mut self, bounds: &ClockBounds) {
        self.clock = Some(*bounds);
    }

    fn set_clock_animating(&mut self, animating: bool) {
        self.animating = animating;
    }

    fn pick(&self, _screen: ScreenPoint) -> Option<String> {
        self.pick_result.clone()
    }
}
