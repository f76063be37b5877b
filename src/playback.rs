//! # Playback Engine
//!
//! Replays several tracks on one shared timeline.
//!
//! ## Timeline
//!
//! - `start` is the earliest first fix of all played tracks
//! - `stop` is the latest last fix plus the trail margin, so trails drain
//!   before the clock restarts
//! - ticks past `stop` restart at `start`; ticks before `start` clamp to it
//!
//! ## Positions
//!
//! Each track is a [`SampledPath`]. Between samples the position is
//! interpolated linearly; outside the sampled range it holds at the nearest
//! end.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{OptionExt, Result, TrackViewError};
use crate::geo_utils::{interpolate, slant_distance};
use crate::lod::CameraState;
use crate::render::{
    label_id, playback_path_id, playback_point_id, CameraPose, ClockBounds, MarkerStyle, PolylineStyle,
    RenderAdapter,
};
use crate::track::{Color, TrackPoint};
use crate::{GeoPoint, Track};

/// Playback tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Clock speed relative to real time.
    /// Default: 30.0
    pub speed_multiplier: f64,

    /// Length of the trailing path behind each marker.
    /// Default: 900
    pub trail_seconds: i64,

    /// Extra time after the trail has drained, before restarting.
    /// Default: 60
    pub trail_buffer_seconds: i64,

    /// Camera range when following a track picked directly.
    /// Default: 3000.0
    pub follow_range_meters: f64,

    /// Default: 8.0
    pub marker_pixel_size: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed_multiplier: 30.0,
            trail_seconds: 900,
            trail_buffer_seconds: 60,
            follow_range_meters: 3000.0,
            marker_pixel_size: 8.0,
        }
    }
}

impl PlaybackConfig {
    /// Time added after the last fix: trail plus buffer.
    pub fn trail_margin(&self) -> Duration {
        Duration::seconds(self.trail_seconds + self.trail_buffer_seconds)
    }
}

/// Closed time range `[start, stop]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.stop
    }

    pub fn duration(&self) -> Duration {
        self.stop - self.start
    }
}

/// Snapshot of the playback clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub window: TimeWindow,
    /// Always inside `window`
    pub current_time: DateTime<Utc>,
    pub speed_multiplier: f64,
    pub playing: bool,
    pub followed_track_id: Option<String>,
}

// ============================================================================
// Sampled Paths
// ============================================================================

/// Time-tagged positions of one track.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledPath {
    track_id: String,
    times: Vec<DateTime<Utc>>,
    positions: Vec<GeoPoint>,
}

impl SampledPath {
    /// Build from samples in ascending time order.
    pub fn new(track_id: impl Into<String>, samples: &[TrackPoint]) -> Result<Self> {
        let track_id = track_id.into();
        crate::track::check_ordering(&track_id, samples)?;
        Ok(Self {
            track_id,
            times: samples.iter().map(|p| p.timestamp).collect(),
            positions: samples.iter().map(TrackPoint::position).collect(),
        })
    }

    pub fn from_track(track: &Track) -> Result<Self> {
        Self::new(track.id(), track.points())
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.times.first().copied()
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.times.last().copied()
    }

    pub fn samples(&self) -> Vec<(DateTime<Utc>, GeoPoint)> {
        self.times.iter().copied().zip(self.positions.iter().copied()).collect()
    }

    /// Position at `t`, held at the end samples outside the sampled range.
    pub fn position_at(&self, t: DateTime<Utc>) -> Option<GeoPoint> {
        let after = self.times.partition_point(|time| *time <= t);
        if after == 0 {
            return self.positions.first().copied();
        }
        if after == self.times.len() {
            return self.positions.last().copied();
        }
        let (t0, t1) = (self.times[after - 1], self.times[after]);
        let span = (t1 - t0).num_milliseconds() as f64;
        let fraction = (t - t0).num_milliseconds() as f64 / span;
        Some(interpolate(&self.positions[after - 1], &self.positions[after], fraction))
    }
}

// ============================================================================
// Tick Results
// ============================================================================

/// Interpolated position of one played track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPosition {
    pub track_id: String,
    pub position: GeoPoint,
}

/// Where the camera should look while following a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraTarget {
    pub track_id: String,
    pub pose: CameraPose,
}

/// How a follow was started; decides the camera range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowStart {
    /// Marker picked directly: fixed range.
    Selected,
    /// Follow switched on during playback: keep the current camera distance.
    MidPlayback,
}

/// Result of one accepted tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickUpdate {
    pub current_time: DateTime<Utc>,
    pub positions: Vec<TrackPosition>,
    pub camera: Option<CameraTarget>,
    /// The tick passed the window end and the clock went back to start.
    pub restarted: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Follow {
    track_id: String,
    heading: f64,
    pitch: f64,
    range: f64,
}

impl Follow {
    fn target(&self, position: GeoPoint) -> CameraTarget {
        CameraTarget {
            track_id: self.track_id.clone(),
            pose: CameraPose {
                target: position,
                heading: self.heading,
                pitch: self.pitch,
                range: self.range,
            },
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Synchronized multi-track playback.
#[derive(Debug, Clone, Default)]
pub struct PlaybackEngine {
    config: PlaybackConfig,
    paths: Vec<SampledPath>,
    state: Option<PlaybackState>,
    last_tick: Option<DateTime<Utc>>,
    follow: Option<Follow>,
}

impl PlaybackEngine {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn state(&self) -> Option<&PlaybackState> {
        self.state.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn active_track_ids(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(SampledPath::track_id)
    }

    /// Start playing `tracks`, replacing any running playback.
    ///
    /// Tracks without points are skipped. Returns `Ok(None)` when nothing is
    /// left to play; that is not an error.
    pub fn start<R: RenderAdapter + ?Sized>(
        &mut self,
        tracks: &[&Track],
        renderer: &mut R,
    ) -> Result<Option<PlaybackState>> {
        let mut playable: Vec<(&Track, SampledPath)> = Vec::with_capacity(tracks.len());
        for &track in tracks {
            if !track.has_points() {
                debug!("[Playback] Track '{}' has no points, skipped", track.id());
                continue;
            }
            playable.push((track, SampledPath::from_track(track)?));
        }

        let start = playable.iter().filter_map(|(_, p)| p.first_time()).min();
        let last = playable.iter().filter_map(|(_, p)| p.last_time()).max();
        let (Some(start), Some(last)) = (start, last) else {
            debug!("[Playback] Nothing to play");
            return Ok(None);
        };

        if self.is_active() {
            self.stop(renderer);
        }

        // Earliest launch draws first
        playable.sort_by_key(|(_, p)| p.first_time());

        let window = TimeWindow {
            start,
            stop: last + self.config.trail_margin(),
        };
        for (track, path) in &playable {
            self.draw_track(track, path, renderer);
        }

        renderer.set_clock_bounds(&self.clock_bounds(window, start));
        renderer.set_clock_animating(true);

        let state = PlaybackState {
            window,
            current_time: start,
            speed_multiplier: self.config.speed_multiplier,
            playing: true,
            followed_track_id: None,
        };
        info!(
            "[Playback] {} tracks, {} -> {} at {}x",
            playable.len(),
            window.start,
            window.stop,
            state.speed_multiplier
        );

        self.paths = playable.into_iter().map(|(_, path)| path).collect();
        self.state = Some(state.clone());
        self.last_tick = None;
        Ok(Some(state))
    }

    fn draw_track<R: RenderAdapter + ?Sized>(&self, track: &Track, path: &SampledPath, renderer: &mut R) {
        let color: Color = track.color();
        let Some(origin) = path.positions.first().copied() else {
            return;
        };

        renderer.draw_timed_path(
            &playback_path_id(track.id()),
            &path.samples(),
            &PolylineStyle::trail(color, self.config.trail_seconds as f64),
        );

        let marker = playback_point_id(track.id());
        renderer.draw_point_marker(
            &marker,
            origin,
            &MarkerStyle::PlaybackPoint {
                color: color.brighten(0.5),
                outline_color: color.darken(0.2),
                pixel_size: self.config.marker_pixel_size,
            },
        );
        renderer.set_entity_visible(&marker, true);

        let label = label_id(track.id());
        renderer.draw_point_marker(
            &label,
            origin,
            &MarkerStyle::Label {
                text: track.pilot_name().to_string(),
                background: color.with_alpha(0.5),
            },
        );
        renderer.set_entity_visible(&label, true);
    }

    fn clock_bounds(&self, window: TimeWindow, current: DateTime<Utc>) -> ClockBounds {
        ClockBounds {
            start: window.start,
            stop: window.stop,
            current,
            multiplier: self
                .state
                .as_ref()
                .map_or(self.config.speed_multiplier, |s| s.speed_multiplier),
            looping: true,
        }
    }

    /// Handle a clock notification.
    ///
    /// Returns `None` when nothing is playing or when `now` repeats the
    /// previous tick.
    pub fn tick<R: RenderAdapter + ?Sized>(&mut self, now: DateTime<Utc>, renderer: &mut R) -> Option<TickUpdate> {
        let window = self.state.as_ref()?.window;
        if self.last_tick == Some(now) {
            return None;
        }
        self.last_tick = Some(now);

        let restarted = now > window.stop;
        let current = if restarted {
            window.start
        } else {
            now.max(window.start)
        };
        if restarted {
            debug!("[Playback] Reached {}, restarting", window.stop);
            renderer.set_clock_bounds(&self.clock_bounds(window, current));
        }

        let positions: Vec<TrackPosition> = self
            .paths
            .iter()
            .filter_map(|path| {
                path.position_at(current).map(|position| TrackPosition {
                    track_id: path.track_id.clone(),
                    position,
                })
            })
            .collect();
        for p in &positions {
            renderer.move_entity(&playback_point_id(&p.track_id), p.position);
            renderer.move_entity(&label_id(&p.track_id), p.position);
        }

        let camera = self.follow.as_ref().and_then(|follow| {
            positions
                .iter()
                .find(|p| p.track_id == follow.track_id)
                .map(|p| follow.target(p.position))
        });
        if let Some(target) = &camera {
            renderer.set_camera_pose(&target.pose);
        }

        if let Some(state) = self.state.as_mut() {
            state.current_time = current;
        }

        Some(TickUpdate {
            current_time: current,
            positions,
            camera,
            restarted,
        })
    }

    /// Move the clock forward by `elapsed` real time, scaled by the speed.
    ///
    /// For hosts without their own clock. Does nothing while paused.
    pub fn advance<R: RenderAdapter + ?Sized>(&mut self, elapsed: Duration, renderer: &mut R) -> Option<TickUpdate> {
        let state = self.state.as_ref()?;
        if !state.playing {
            return None;
        }
        let scaled = Duration::milliseconds((elapsed.num_milliseconds() as f64 * state.speed_multiplier) as i64);
        let now = state.current_time + scaled;
        self.tick(now, renderer)
    }

    pub fn set_playing<R: RenderAdapter + ?Sized>(&mut self, playing: bool, renderer: &mut R) {
        if let Some(state) = self.state.as_mut() {
            state.playing = playing;
            renderer.set_clock_animating(playing);
        }
    }

    pub fn set_speed<R: RenderAdapter + ?Sized>(&mut self, multiplier: f64, renderer: &mut R) -> Result<()> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(TrackViewError::Config {
                message: format!("speed multiplier must be positive, got {}", multiplier),
            });
        }
        self.config.speed_multiplier = multiplier;
        if let Some(state) = self.state.as_mut() {
            state.speed_multiplier = multiplier;
            let bounds = ClockBounds {
                start: state.window.start,
                stop: state.window.stop,
                current: state.current_time,
                multiplier,
                looping: true,
            };
            renderer.set_clock_bounds(&bounds);
        }
        Ok(())
    }

    /// Interpolated position of a played track at the current time.
    pub fn position_of(&self, track_id: &str) -> Option<GeoPoint> {
        let current = self.state.as_ref()?.current_time;
        self.paths
            .iter()
            .find(|p| p.track_id == track_id)
            .and_then(|p| p.position_at(current))
    }

    // ========================================================================
    // Camera Follow
    // ========================================================================

    /// Follow a played track, replacing any previous follow.
    ///
    /// Heading and pitch are taken from `camera` and kept for every tick.
    pub fn follow<R: RenderAdapter + ?Sized>(
        &mut self,
        track_id: &str,
        camera: &CameraState,
        start: FollowStart,
        renderer: &mut R,
    ) -> Result<CameraTarget> {
        let position = self.position_of(track_id).ok_or_unknown_track(track_id)?;
        let range = match start {
            FollowStart::Selected => self.config.follow_range_meters,
            FollowStart::MidPlayback => slant_distance(&camera.position, &position),
        };
        let follow = Follow {
            track_id: track_id.to_string(),
            heading: camera.heading,
            pitch: camera.pitch,
            range,
        };
        let target = follow.target(position);
        renderer.set_camera_pose(&target.pose);

        if let Some(previous) = self.follow.replace(follow) {
            debug!("[Playback] Follow moved from '{}' to '{}'", previous.track_id, track_id);
        }
        if let Some(state) = self.state.as_mut() {
            state.followed_track_id = Some(track_id.to_string());
        }
        Ok(target)
    }

    pub fn followed_track_id(&self) -> Option<&str> {
        self.follow.as_ref().map(|f| f.track_id.as_str())
    }

    /// Stop following and release the camera.
    pub fn unfollow<R: RenderAdapter + ?Sized>(&mut self, renderer: &mut R) {
        if self.follow.take().is_some() {
            renderer.reset_camera_transform();
        }
        if let Some(state) = self.state.as_mut() {
            state.followed_track_id = None;
        }
    }

    /// Stop playback: clear follow, release the camera, drop all paths.
    pub fn stop<R: RenderAdapter + ?Sized>(&mut self, renderer: &mut R) {
        renderer.set_clock_animating(false);
        renderer.reset_camera_transform();
        renderer.remove_all_entities();
        self.follow = None;
        self.paths.clear();
        self.state = None;
        self.last_tick = None;
        debug!("[Playback] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RecordingRenderer;
    use crate::track::Activity;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    fn flight(id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Track {
        Track::new(
            id,
            id,
            Activity::Paraglider,
            10.0,
            vec![
                TrackPoint::new(from, 35.0, 139.0, 1000.0),
                TrackPoint::new(to, 35.1, 139.1, 2000.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_position_at_interpolates_and_holds() {
        let track = flight("a", at(10, 0), at(10, 10));
        let path = SampledPath::from_track(&track).unwrap();
        let mid = path.position_at(at(10, 5)).unwrap();
        assert!((mid.altitude - 1500.0).abs() < 1e-6);
        assert_eq!(path.position_at(at(9, 0)), Some(GeoPoint::new(35.0, 139.0, 1000.0)));
        assert_eq!(path.position_at(at(11, 0)), Some(GeoPoint::new(35.1, 139.1, 2000.0)));
    }

    #[test]
    fn test_sampled_path_rejects_disorder() {
        let points = vec![
            TrackPoint::new(at(10, 5), 35.0, 139.0, 0.0),
            TrackPoint::new(at(10, 0), 35.0, 139.0, 0.0),
        ];
        assert!(matches!(
            SampledPath::new("x", &points),
            Err(TrackViewError::InvalidOrdering { index: 1, .. })
        ));
    }

    #[test]
    fn test_empty_start_is_noop() {
        let mut engine = PlaybackEngine::default();
        let mut renderer = RecordingRenderer::new();
        assert_eq!(engine.start(&[], &mut renderer), Ok(None));
        assert!(!engine.is_active());
        assert!(renderer.clock.is_none());
    }

    #[test]
    fn test_restart_past_stop() {
        let track = flight("a", at(10, 0), at(10, 10));
        let mut engine = PlaybackEngine::default();
        let mut renderer = RecordingRenderer::new();
        let state = engine.start(&[&track], &mut renderer).unwrap().unwrap();
        assert_eq!(state.window.stop, at(10, 26));

        let update = engine.tick(at(10, 30), &mut renderer).unwrap();
        assert!(update.restarted);
        assert_eq!(update.current_time, at(10, 0));

        let update = engine.tick(at(9, 0), &mut renderer).unwrap();
        assert_eq!(update.current_time, at(10, 0));
        assert!(!update.restarted);
    }

    #[test]
    fn test_follow_replaces_and_stop_clears() {
        let a = flight("a", at(10, 0), at(10, 10));
        let b = flight("b", at(10, 0), at(10, 10));
        let mut engine = PlaybackEngine::default();
        let mut renderer = RecordingRenderer::new();
        engine.start(&[&a, &b], &mut renderer).unwrap();

        let camera = CameraState::looking_down(GeoPoint::new(35.0, 139.0, 6000.0));
        let target = engine.follow("a", &camera, FollowStart::Selected, &mut renderer).unwrap();
        assert_eq!(target.pose.range, 3000.0);
        let target = engine.follow("b", &camera, FollowStart::MidPlayback, &mut renderer).unwrap();
        assert!((target.pose.range - 5000.0).abs() < 1.0);

        let update = engine.tick(at(10, 5), &mut renderer).unwrap();
        assert_eq!(update.camera.map(|c| c.track_id), Some("b".to_string()));

        engine.stop(&mut renderer);
        assert!(engine.followed_track_id().is_none());
        assert!(renderer.entities.is_empty());
        assert_eq!(renderer.camera_transform_resets, 1);
        assert!(engine.tick(at(10, 6), &mut renderer).is_none());
    }

    #[test]
    fn test_advance_scales_by_speed() {
        let track = flight("a", at(10, 0), at(11, 0));
        let mut engine = PlaybackEngine::default();
        let mut renderer = RecordingRenderer::new();
        engine.start(&[&track], &mut renderer).unwrap();

        let update = engine.advance(Duration::seconds(2), &mut renderer).unwrap();
        assert_eq!(update.current_time, at(10, 1));

        engine.set_playing(false, &mut renderer);
        assert!(engine.advance(Duration::seconds(2), &mut renderer).is_none());
        assert!(engine.set_speed(0.0, &mut renderer).is_err());
    }
}
