//! Track data model: points, activities, colors and the `Track` entity.
//!
//! A `Track` may exist in two shapes. Loaded from metadata it carries only
//! pilot, distance, time bounds and launch position with an empty point
//! sequence. Once detail is attached it carries the full, time-ordered
//! point sequence. Derived values prefer the point sequence and fall back to
//! the metadata.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackViewError};
use crate::{Bounds, GeoPoint};

// ============================================================================
// Points
// ============================================================================

/// A single GPS fix. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
}

impl TrackPoint {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            altitude,
        }
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude, self.altitude)
    }
}

/// Check that timestamps never decrease along the sequence.
pub fn check_ordering(track_id: &str, points: &[TrackPoint]) -> Result<()> {
    match points
        .windows(2)
        .position(|w| w[1].timestamp < w[0].timestamp)
    {
        Some(i) => Err(TrackViewError::InvalidOrdering {
            track_id: track_id.to_string(),
            index: i + 1,
        }),
        None => Ok(()),
    }
}

// ============================================================================
// Activity
// ============================================================================

/// Normalized aircraft category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Activity {
    Paraglider,
    Hangglider,
    Glider,
    Other,
}

impl Activity {
    /// Map a raw category label from a track record onto the closed set.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim() {
            "Paraglider" => Activity::Paraglider,
            "Hangglider" | "Flex wing FAI1" | "Rigid wing FAI5" => Activity::Hangglider,
            "Glider" => Activity::Glider,
            _ => Activity::Other,
        }
    }
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Activity::Paraglider => "Paraglider",
            Activity::Hangglider => "Hangglider",
            Activity::Glider => "Glider",
            Activity::Other => "Other",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Colors
// ============================================================================

/// RGBA color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: 1.0,
        }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    /// Move each channel towards white by `magnitude`.
    pub fn brighten(self, magnitude: f32) -> Self {
        let m = 1.0 - magnitude.clamp(0.0, 1.0);
        Self {
            r: 1.0 - (1.0 - self.r) * m,
            g: 1.0 - (1.0 - self.g) * m,
            b: 1.0 - (1.0 - self.b) * m,
            a: self.a,
        }
    }

    /// Move each channel towards black by `magnitude`.
    pub fn darken(self, magnitude: f32) -> Self {
        let m = 1.0 - magnitude.clamp(0.0, 1.0);
        Self {
            r: self.r * m,
            g: self.g * m,
            b: self.b * m,
            a: self.a,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        PALETTE[0]
    }
}

/// Track colors, cycled in order.
pub const PALETTE: [Color; 25] = [
    Color::rgb(0, 255, 255),     // aqua
    Color::rgb(127, 255, 212),   // aquamarine
    Color::rgb(138, 43, 226),    // blueviolet
    Color::rgb(127, 255, 0),     // chartreuse
    Color::rgb(255, 127, 80),    // coral
    Color::rgb(220, 20, 60),     // crimson
    Color::rgb(0, 255, 255),     // cyan
    Color::rgb(255, 140, 0),     // darkorange
    Color::rgb(153, 50, 204),    // darkorchid
    Color::rgb(255, 20, 147),    // deeppink
    Color::rgb(0, 191, 255),     // deepskyblue
    Color::rgb(255, 0, 255),     // fuchsia
    Color::rgb(255, 215, 0),     // gold
    Color::rgb(173, 255, 47),    // greenyellow
    Color::rgb(255, 105, 180),   // hotpink
    Color::rgb(173, 216, 230),   // lightblue
    Color::rgb(144, 238, 144),   // lightgreen
    Color::rgb(255, 182, 193),   // lightpink
    Color::rgb(0, 255, 0),       // lime
    Color::rgb(255, 0, 255),     // magenta
    Color::rgb(255, 165, 0),     // orange
    Color::rgb(255, 0, 0),       // red
    Color::rgb(255, 99, 71),     // tomato
    Color::rgb(255, 255, 0),     // yellow
    Color::rgb(154, 205, 50),    // yellowgreen
];

/// How tracks are given colors when a date is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorAssignment {
    /// Next palette entry in install order
    #[default]
    Cyclic,
    /// Palette entry chosen from a stable hash of the track id
    ById,
}

/// Palette cursor owned by a repository (never shared between sessions).
#[derive(Debug, Clone, Default)]
pub struct Palette {
    mode: ColorAssignment,
    next: usize,
}

impl Palette {
    pub fn new(mode: ColorAssignment) -> Self {
        Self { mode, next: 0 }
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }

    pub fn color_for(&mut self, track_id: &str) -> Color {
        match self.mode {
            ColorAssignment::Cyclic => {
                let color = PALETTE[self.next];
                self.next = (self.next + 1) % PALETTE.len();
                color
            }
            ColorAssignment::ById => PALETTE[(fnv1a(track_id.as_bytes()) % PALETTE.len() as u64) as usize],
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

// ============================================================================
// Metadata
// ============================================================================

/// Per-track summary delivered before detail is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub pilot_name: String,
    pub activity: Activity,
    /// Distance in km
    pub distance_km: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Launch position
    pub start_position: GeoPoint,
    pub end_position: Option<GeoPoint>,
    pub max_altitude: Option<f64>,
    /// Glider model, empty when unknown
    pub model: String,
}

impl TrackMetadata {
    /// Session-unique id: pilot name and landing time.
    pub fn track_id(&self) -> String {
        track_id_for(&self.pilot_name, &self.end_time)
    }
}

/// `"{pilot}_{YYYYMMDDHHmmss}"` with whitespace removed.
pub fn track_id_for(pilot_name: &str, end_time: &DateTime<Utc>) -> String {
    format!("{}_{}", pilot_name, end_time.format("%Y%m%d%H%M%S"))
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

// ============================================================================
// Track
// ============================================================================

/// One pilot's single flight.
#[derive(Debug, Clone)]
pub struct Track {
    id: String,
    pilot_name: String,
    activity: Activity,
    distance_km: f64,
    color: Color,
    selected: bool,
    points: Vec<TrackPoint>,
    metadata: Option<TrackMetadata>,
    max_altitude: OnceCell<Option<f64>>,
}

impl Track {
    /// Create a track from a complete point sequence.
    ///
    /// Fails with `InvalidOrdering` if timestamps decrease anywhere.
    pub fn new(
        id: impl Into<String>,
        pilot_name: impl Into<String>,
        activity: Activity,
        distance_km: f64,
        points: Vec<TrackPoint>,
    ) -> Result<Self> {
        let id = id.into();
        check_ordering(&id, &points)?;
        Ok(Self {
            id,
            pilot_name: pilot_name.into(),
            activity,
            distance_km,
            color: Color::default(),
            selected: false,
            points,
            metadata: None,
            max_altitude: OnceCell::new(),
        })
    }

    /// Create a metadata-only track with an empty point sequence.
    pub fn from_metadata(metadata: TrackMetadata) -> Self {
        Self {
            id: metadata.track_id(),
            pilot_name: metadata.pilot_name.clone(),
            activity: metadata.activity,
            distance_km: metadata.distance_km,
            color: Color::default(),
            selected: false,
            points: Vec::new(),
            metadata: Some(metadata),
            max_altitude: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pilot_name(&self) -> &str {
        &self.pilot_name
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    /// Distance in km
    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn select(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub fn metadata(&self) -> Option<&TrackMetadata> {
        self.metadata.as_ref()
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// True once the full point sequence is present.
    pub fn has_points(&self) -> bool {
        !self.points.is_empty()
    }

    /// Replace the point sequence (progressive detail loading).
    ///
    /// This is the only way points change, so it is also the only place the
    /// memoized maximum altitude is invalidated.
    pub fn set_points(&mut self, points: Vec<TrackPoint>) -> Result<()> {
        check_ordering(&self.id, &points)?;
        self.points = points;
        self.max_altitude = OnceCell::new();
        Ok(())
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.points
            .first()
            .map(|p| p.timestamp)
            .or_else(|| self.metadata.as_ref().map(|m| m.start_time))
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.points
            .last()
            .map(|p| p.timestamp)
            .or_else(|| self.metadata.as_ref().map(|m| m.end_time))
    }

    /// Whole minutes between first and last fix, 0 when unknown.
    pub fn duration_minutes(&self) -> i64 {
        match (self.start_time(), self.end_time()) {
            (Some(start), Some(end)) => (end - start).num_minutes(),
            _ => 0,
        }
    }

    /// Duration formatted as `"{h} h {m} m"`.
    pub fn duration_label(&self) -> String {
        let minutes = self.duration_minutes();
        format!("{} h {} m", minutes / 60, minutes % 60)
    }

    pub fn point_time(&self, index: usize) -> Option<DateTime<Utc>> {
        self.points.get(index).map(|p| p.timestamp)
    }

    pub fn position(&self, index: usize) -> Option<GeoPoint> {
        self.points.get(index).map(TrackPoint::position)
    }

    /// Highest altitude reached, computed once and cached.
    pub fn max_altitude(&self) -> Option<f64> {
        *self.max_altitude.get_or_init(|| {
            if self.points.is_empty() {
                return self.metadata.as_ref().and_then(|m| m.max_altitude);
            }
            self.points
                .iter()
                .map(|p| p.altitude)
                .fold(None, |max: Option<f64>, a| Some(max.map_or(a, |m| m.max(a))))
        })
    }

    /// Mean altitude of samples with `start <= timestamp < end`.
    ///
    /// `None` if `start > end` or no sample falls inside the range.
    pub fn average_altitude(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<f64> {
        if start > end {
            return None;
        }
        let from = self.points.partition_point(|p| p.timestamp < start);
        let to = self.points.partition_point(|p| p.timestamp < end);
        if from >= to {
            return None;
        }
        let samples = &self.points[from..to];
        Some(samples.iter().map(|p| p.altitude).sum::<f64>() / samples.len() as f64)
    }

    /// Launch position used for clustering.
    pub fn origin(&self) -> Option<GeoPoint> {
        self.points
            .first()
            .map(TrackPoint::position)
            .or_else(|| self.metadata.as_ref().map(|m| m.start_position))
    }

    /// Bounding box of the flight, or of the launch point when only metadata is loaded.
    pub fn bounds(&self) -> Option<Bounds> {
        if self.points.is_empty() {
            return self.origin().map(|p| Bounds::from_point(&p));
        }
        let positions: Vec<GeoPoint> = self.points.iter().map(TrackPoint::position).collect();
        Bounds::from_points(&positions)
    }
}
