//! # Track Viewer
//!
//! Controller object that owns one viewer session: the repository, the
//! selection, the level-of-detail controller, the playback engine, the
//! renderer handle and the camera/clock subscriptions. Nothing here is
//! global; a host creates one `TrackViewer` per globe and forwards renderer
//! notifications to it.
//!
//! Async flows come in two shapes:
//! - `load_date`, `select_track_group`, `handle_track_click` drive a
//!   [`TrackLoader`] directly
//! - `begin_*` / `complete_*` pairs hand out tickets so a host can run the
//!   loads itself; late completions from a replaced date are rejected

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clustering::{assemble_groups, cluster_tracks, ClusterConfig};
use crate::error::{OptionExt, Result, TrackViewError};
use crate::events::{EventHub, Subscription, SubscriptionToken};
use crate::geo_utils::bounds_diagonal;
use crate::loader::{JsonFileLoader, TrackLoader};
use crate::lod::{CameraState, LevelOfDetailController, LodConfig, LodUpdate, NoFilter, TrackFilter};
use crate::placenames::{PlaceName, PlaceNameConfig, PlaceNameLayer, PlaceNameQuery};
use crate::playback::{CameraTarget, FollowStart, PlaybackConfig, PlaybackEngine, PlaybackState, TickUpdate};
use crate::records::{parse_track_batch_json, PointSchema, TrackGroupSummary};
use crate::render::{CameraPose, EntityRef, RenderAdapter, ScreenPoint};
use crate::repository::{SessionId, TrackRepository};
use crate::selection::{GroupLoadTicket, GroupSelection, SelectionModel, TrackPointRef};
use crate::track::{ColorAssignment, TrackMetadata, TrackPoint};
use crate::{Bounds, Track, TrackGroup};

/// Closest framing range, in meters.
const MIN_FRAMING_RANGE: f64 = 1000.0;

/// Viewer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub cluster: ClusterConfig,
    pub lod: LodConfig,
    pub playback: PlaybackConfig,
    pub place_names: PlaceNameConfig,

    /// Layout of points in detail files.
    /// Default: Positional
    pub point_schema: PointSchema,

    /// Flights this short or shorter are dropped on load.
    /// Default: 5
    pub min_flight_minutes: i64,

    /// Default: Cyclic
    pub color_assignment: ColorAssignment,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            lod: LodConfig::default(),
            playback: PlaybackConfig::default(),
            place_names: PlaceNameConfig::default(),
            point_schema: PointSchema::default(),
            min_flight_minutes: 5,
            color_assignment: ColorAssignment::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ViewerConfig = serde_json::from_str(json).map_err(|e| TrackViewError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// File loader reading points in the configured layout.
    pub fn file_loader(&self, root: impl Into<PathBuf>) -> JsonFileLoader {
        JsonFileLoader::new(root).with_schema(self.point_schema)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (
                self.cluster.epsilon_meters.is_finite() && self.cluster.epsilon_meters >= 0.0,
                "cluster.epsilon_meters must be a non-negative number",
            ),
            (
                self.lod.altitude_threshold_meters.is_finite() && self.lod.altitude_threshold_meters > 0.0,
                "lod.altitude_threshold_meters must be positive",
            ),
            (
                self.lod.min_camera_movement_meters >= 0.0,
                "lod.min_camera_movement_meters must not be negative",
            ),
            (
                self.lod.point_spacing_seconds >= 0,
                "lod.point_spacing_seconds must not be negative",
            ),
            (
                self.playback.speed_multiplier.is_finite() && self.playback.speed_multiplier > 0.0,
                "playback.speed_multiplier must be positive",
            ),
            (
                self.playback.trail_seconds >= 0 && self.playback.trail_buffer_seconds >= 0,
                "playback trail durations must not be negative",
            ),
            (
                self.playback.follow_range_meters > 0.0,
                "playback.follow_range_meters must be positive",
            ),
            (
                self.place_names.reload_distance_meters >= 0.0 && self.place_names.search_radius_km > 0.0,
                "place_names distances must be positive",
            ),
            (self.min_flight_minutes >= 0, "min_flight_minutes must not be negative"),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(TrackViewError::Config {
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Which map is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewMode {
    /// Browse tracks and groups
    Scatter,
    /// Replay on a shared timeline
    Playback,
}

/// Ticket for an in-flight date load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateLoadTicket {
    pub date: NaiveDate,
    pub session: SessionId,
}

/// What a date load installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub date: NaiveDate,
    pub tracks: usize,
    pub groups: usize,
    /// Flights dropped for being too short
    pub skipped_short: usize,
    /// Groups were computed here rather than supplied by the loader
    pub clustered_locally: bool,
}

/// What a click on the globe did.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickAction {
    /// Nothing actionable under the cursor
    None,
    TrackPointSelected(TrackPointRef),
    /// A group pin was clicked; the host should run `select_track_group`.
    GroupRequested(u32),
    Following(String),
    Unfollowed,
}

/// One globe viewer session.
pub struct TrackViewer<R: RenderAdapter> {
    config: ViewerConfig,
    renderer: R,
    repository: TrackRepository,
    selection: SelectionModel,
    lod: LevelOfDetailController,
    playback: PlaybackEngine,
    place_names: PlaceNameLayer,
    pending_place_names: Option<PlaceNameQuery>,
    filter: Box<dyn TrackFilter>,
    mode: ViewMode,
    camera: Option<CameraState>,
    date_loading: bool,
    camera_events: EventHub<CameraState>,
    clock_events: EventHub<TickUpdate>,
    tick_observer: Subscription,
}

impl<R: RenderAdapter> TrackViewer<R> {
    pub fn new(config: ViewerConfig, renderer: R) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repository: TrackRepository::new(config.color_assignment),
            selection: SelectionModel::default(),
            lod: LevelOfDetailController::new(config.lod.clone()),
            playback: PlaybackEngine::new(config.playback.clone()),
            place_names: PlaceNameLayer::new(config.place_names.clone()),
            pending_place_names: None,
            filter: Box::new(NoFilter),
            mode: ViewMode::Scatter,
            camera: None,
            date_loading: false,
            camera_events: EventHub::new(),
            clock_events: EventHub::new(),
            tick_observer: Subscription::new(),
            config,
            renderer,
        })
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn repository(&self) -> &TrackRepository {
        &self.repository
    }

    pub fn selection(&self) -> &SelectionModel {
        &self.selection
    }

    pub fn lod(&self) -> &LevelOfDetailController {
        &self.lod
    }

    pub fn playback(&self) -> &PlaybackEngine {
        &self.playback
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// True while a date or group load is in flight.
    pub fn is_loading(&self) -> bool {
        self.date_loading || self.selection.is_loading()
    }

    // ========================================================================
    // Date Loading
    // ========================================================================

    /// Drop the current date and open a session for `date`.
    ///
    /// Selection and playback reset here; results of loads started for the
    /// previous date will be rejected.
    pub fn begin_date_load(&mut self, date: NaiveDate) -> DateLoadTicket {
        if self.playback.is_active() {
            self.playback.stop(&mut self.renderer);
            self.mode = ViewMode::Scatter;
        }
        let session = self.repository.begin_session(date);
        self.selection.reset(session);
        self.lod.reset();
        self.renderer.remove_all_entities();
        self.place_names.redraw(&mut self.renderer);
        self.date_loading = true;
        info!("[Viewer] Loading {} (session {})", date, session.0);
        DateLoadTicket { date, session }
    }

    /// Install the results of a date load.
    ///
    /// A metadata failure fails the load and installs nothing. A group
    /// failure falls back to local clustering.
    pub fn complete_date_load(
        &mut self,
        ticket: DateLoadTicket,
        metadata: Result<Vec<TrackMetadata>>,
        groups: Result<Vec<TrackGroupSummary>>,
    ) -> Result<LoadSummary> {
        if let Err(e) = self.repository.ensure_current(ticket.session) {
            warn!("[Viewer] Dropping late load for {}: {}", ticket.date, e);
            return Err(e);
        }
        self.date_loading = false;

        let metadata = metadata.inspect_err(|e| warn!("[Viewer] Loading {} failed: {}", ticket.date, e))?;
        let summaries = groups.unwrap_or_else(|e| {
            warn!("[Viewer] Group summaries for {} unavailable ({}), clustering locally", ticket.date, e);
            Vec::new()
        });
        let tracks = metadata.into_iter().map(Track::from_metadata).collect();
        self.install(ticket, tracks, &summaries)
    }

    /// Load a date through `loader`.
    pub async fn load_date<L: TrackLoader>(&mut self, loader: &L, date: NaiveDate) -> Result<LoadSummary> {
        let ticket = self.begin_date_load(date);
        let (metadata, groups) = futures::join!(loader.load_track_metadata(date), loader.load_track_groups(date));
        self.complete_date_load(ticket, metadata, groups)
    }

    /// Install already-parsed tracks for `date` and cluster them locally.
    pub fn load_tracks(&mut self, date: NaiveDate, tracks: Vec<Track>) -> Result<LoadSummary> {
        let ticket = self.begin_date_load(date);
        self.date_loading = false;
        self.install(ticket, tracks, &[])
    }

    /// Install a JSON array of complete track records for `date`.
    ///
    /// Invalid records are skipped; the count is logged.
    pub fn load_track_json(&mut self, date: NaiveDate, json: &str) -> Result<LoadSummary> {
        let batch = parse_track_batch_json(json, self.config.point_schema)?;
        if !batch.diagnostics.is_empty() {
            warn!("[Viewer] {}: skipped {} invalid track records", date, batch.diagnostics.len());
        }
        self.load_tracks(date, batch.items)
    }

    fn install(&mut self, ticket: DateLoadTicket, tracks: Vec<Track>, summaries: &[TrackGroupSummary]) -> Result<LoadSummary> {
        let before = tracks.len();
        let min_minutes = self.config.min_flight_minutes;
        let tracks: Vec<Track> = tracks
            .into_iter()
            .filter(|t| t.duration_minutes() > min_minutes)
            .collect();
        let skipped_short = before - tracks.len();
        if skipped_short > 0 {
            debug!("[Viewer] Dropped {} flights of {} minutes or less", skipped_short, min_minutes);
        }

        let (groups, clustered_locally) = self.build_groups(&tracks, summaries);
        let summary = LoadSummary {
            date: ticket.date,
            tracks: tracks.len(),
            groups: groups.len(),
            skipped_short,
            clustered_locally,
        };
        self.repository.install(ticket.session, tracks, groups)?;

        self.lod.initialize_entities(&self.repository, &mut self.renderer);
        self.lod.render(&self.repository, self.filter.as_ref(), &mut self.renderer);
        let centroids: Vec<_> = self.repository.groups().iter().map(|g| g.centroid).collect();
        if let Some(bounds) = Bounds::from_points(&centroids) {
            self.frame(&bounds);
        }

        info!(
            "[Viewer] {}: {} tracks in {} groups",
            summary.date, summary.tracks, summary.groups
        );
        Ok(summary)
    }

    /// Groups from the loader when it has them, completed by local
    /// clustering so every track ends up in exactly one group.
    fn build_groups(&self, tracks: &[Track], summaries: &[TrackGroupSummary]) -> (Vec<TrackGroup>, bool) {
        if summaries.is_empty() {
            return (cluster_tracks(tracks, &self.config.cluster), true);
        }
        let mut groups = assemble_groups(summaries, tracks);
        let leftovers: Vec<Track> = {
            let grouped: HashSet<&str> = groups
                .iter()
                .flat_map(|g| g.track_ids.iter().map(String::as_str))
                .collect();
            tracks.iter().filter(|t| !grouped.contains(t.id())).cloned().collect()
        };
        if !leftovers.is_empty() {
            warn!("[Viewer] {} tracks missing from loader groups, clustering them locally", leftovers.len());
            let offset = groups.iter().map(|g| g.group_id + 1).max().unwrap_or(0);
            for mut group in cluster_tracks(&leftovers, &self.config.cluster) {
                group.group_id += offset;
                groups.push(group);
            }
        }
        (groups, false)
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Flip a track's selection. Returns the new state.
    pub fn toggle_track(&mut self, track_id: &str) -> Result<bool> {
        let track = self.repository.get_mut(track_id).ok_or_unknown_track(track_id)?;
        let selected = self.selection.toggle_track(track_id);
        track.select(selected);
        debug!("[Selection] Track '{}' selected: {}", track_id, selected);
        self.lod.render(&self.repository, self.filter.as_ref(), &mut self.renderer);
        Ok(selected)
    }

    /// Toggle a track picked from the track list. Returns the new state.
    ///
    /// Selecting a track whose detail is missing loads its group first; a
    /// failed load leaves the track unselected. A newly selected track is
    /// framed.
    pub async fn handle_track_click<L: TrackLoader>(&mut self, loader: &L, track_id: &str) -> Result<bool> {
        let has_points = self.repository.get(track_id).ok_or_unknown_track(track_id)?.has_points();
        if self.selection.is_track_selected(track_id) {
            return self.toggle_track(track_id);
        }
        if !has_points {
            let group_id = self
                .repository
                .group_of_track(track_id)
                .ok_or_unknown_track(track_id)?
                .group_id;
            self.select_track_group(loader, group_id).await?;
        }
        let selected = self.toggle_track(track_id)?;
        self.frame_tracks([track_id]);
        Ok(selected)
    }

    pub fn select_track_point(&mut self, track_id: &str, index: usize) -> Result<()> {
        let track = self.repository.get_mut(track_id).ok_or_unknown_track(track_id)?;
        if index >= track.points().len() {
            return Err(TrackViewError::validation(
                track_id,
                format!("point {} out of range ({} points)", index, track.points().len()),
            ));
        }
        track.select(true);
        self.selection.select_track_point(track_id, index);
        self.lod.render(&self.repository, self.filter.as_ref(), &mut self.renderer);
        Ok(())
    }

    /// Start selecting a group. An already selected group is only refocused.
    pub fn begin_group_selection(&mut self, group_id: u32) -> Result<GroupSelection> {
        let group = self.repository.group(group_id).ok_or_unknown_group(group_id)?;
        let selection = self.selection.begin_group_selection(group, &self.repository);
        if selection == GroupSelection::AlreadySelected {
            let ids = group.track_ids.clone();
            self.frame_tracks(ids.iter().map(String::as_str));
        }
        Ok(selection)
    }

    /// Apply loaded details and finish the group selection.
    ///
    /// Returns `Ok(false)` for a ticket from a replaced date; nothing is
    /// applied in that case. If any detail failed to load or is out of order,
    /// no detail is applied, the group stays unselected and the first error is
    /// returned.
    pub fn complete_group_selection(
        &mut self,
        ticket: &GroupLoadTicket,
        details: Vec<(String, Result<Vec<TrackPoint>>)>,
    ) -> Result<bool> {
        if self.repository.ensure_current(ticket.session).is_err() {
            return self.selection.complete_group_selection(ticket, Ok(()));
        }
        let outcome = self.apply_details(ticket.session, details);
        let selected = self.selection.complete_group_selection(ticket, outcome)?;
        if selected {
            self.lod.render(&self.repository, self.filter.as_ref(), &mut self.renderer);
            if let Some(group) = self.repository.group(ticket.group_id) {
                let ids = group.track_ids.clone();
                self.frame_tracks(ids.iter().map(String::as_str));
            }
        }
        Ok(selected)
    }

    fn apply_details(&mut self, session: SessionId, details: Vec<(String, Result<Vec<TrackPoint>>)>) -> Result<()> {
        let loaded = details
            .into_iter()
            .map(|(track_id, result)| result.map(|points| (track_id, points)))
            .collect::<Result<Vec<_>>>()?;
        let track_ids: Vec<String> = loaded.iter().map(|(id, _)| id.clone()).collect();
        self.repository.attach_details(session, loaded)?;
        for track_id in &track_ids {
            if let Some(track) = self.repository.get(track_id) {
                self.lod.draw_track(track, &mut self.renderer);
            }
        }
        self.lod.refresh_perspective(&self.repository);
        Ok(())
    }

    /// Select a group, loading missing detail through `loader`.
    ///
    /// Returns whether the group is selected afterwards; `false` means a load
    /// for it was already in flight.
    pub async fn select_track_group<L: TrackLoader>(&mut self, loader: &L, group_id: u32) -> Result<bool> {
        let ticket = match self.begin_group_selection(group_id)? {
            GroupSelection::AlreadySelected => return Ok(true),
            GroupSelection::AlreadyLoading => return Ok(false),
            GroupSelection::Load(ticket) => ticket,
        };
        let loads = ticket.pending.iter().map(|track_id| async move {
            (track_id.clone(), loader.load_track_detail(track_id).await)
        });
        let details = join_all(loads).await;
        self.complete_group_selection(&ticket, details)
    }

    /// Tracks shown in the list: all of them, or only those of selected groups.
    pub fn visible_track_count(&self) -> usize {
        if self.selection.selected_group_count() == 0 {
            return self.repository.track_count();
        }
        self.selection
            .selected_groups()
            .filter_map(|id| self.repository.group(id))
            .map(TrackGroup::size)
            .sum()
    }

    // ========================================================================
    // Camera, Clock and Input
    // ========================================================================

    /// Replace the track filter and re-apply visibility.
    pub fn set_filter(&mut self, filter: impl TrackFilter + 'static) {
        self.filter = Box::new(filter);
        self.lod.render(&self.repository, self.filter.as_ref(), &mut self.renderer);
    }

    /// Forward a camera notification from the renderer.
    ///
    /// A low camera that moved far enough also queues a place-name request,
    /// picked up by [`Self::refresh_place_names`] or
    /// [`Self::take_place_name_query`].
    pub fn handle_camera_change(&mut self, camera: CameraState) -> LodUpdate {
        self.camera = Some(camera);
        self.camera_events.emit(&camera);
        if self.mode == ViewMode::Playback {
            return LodUpdate::Suppressed;
        }
        if let Some(query) = self.place_names.on_camera_change(&camera) {
            self.pending_place_names = Some(query);
        }
        self.lod
            .on_camera_change(&camera, &self.repository, self.filter.as_ref(), &mut self.renderer)
    }

    // ========================================================================
    // Place Names
    // ========================================================================

    /// The queued place-name request, if any. Taking it clears the queue.
    pub fn take_place_name_query(&mut self) -> Option<PlaceNameQuery> {
        self.pending_place_names.take()
    }

    /// Draw place names fetched for a query. Returns how many labels are new.
    pub fn show_place_names(&mut self, names: &[PlaceName]) -> usize {
        self.place_names.display(names, &mut self.renderer)
    }

    /// Fetch and draw place names for the queued request.
    ///
    /// A failed fetch is returned and the next qualifying camera change
    /// requests again.
    pub async fn refresh_place_names<L: TrackLoader>(&mut self, loader: &L) -> Result<usize> {
        let Some(query) = self.take_place_name_query() else {
            return Ok(0);
        };
        match loader
            .load_place_names(query.longitude, query.latitude, query.radius_km)
            .await
        {
            Ok(names) => Ok(self.show_place_names(&names)),
            Err(e) => {
                warn!("[PlaceNames] Request failed: {}", e);
                self.place_names.forget_request();
                Err(e)
            }
        }
    }

    pub fn place_name_count(&self) -> usize {
        self.place_names.label_count()
    }

    /// Forward a clock notification from the renderer.
    pub fn handle_clock_tick(&mut self, now: DateTime<Utc>) -> Option<TickUpdate> {
        let update = self.playback.tick(now, &mut self.renderer)?;
        self.clock_events.emit(&update);
        Some(update)
    }

    /// Drive the playback clock without a renderer clock.
    pub fn advance(&mut self, elapsed: Duration) -> Option<TickUpdate> {
        let update = self.playback.advance(elapsed, &mut self.renderer)?;
        self.clock_events.emit(&update);
        Some(update)
    }

    /// Resolve a click through the renderer's picking.
    pub fn handle_click(&mut self, screen: ScreenPoint) -> Result<ClickAction> {
        let picked = self.renderer.pick(screen);
        let entity = picked.as_deref().and_then(EntityRef::parse);

        match self.mode {
            ViewMode::Scatter => match entity {
                Some(EntityRef::TrackPoint { track_id, index }) => {
                    self.select_track_point(&track_id, index)?;
                    Ok(ClickAction::TrackPointSelected(TrackPointRef { track_id, index }))
                }
                Some(EntityRef::TrackGroup(group_id)) => Ok(ClickAction::GroupRequested(group_id)),
                _ => Ok(ClickAction::None),
            },
            ViewMode::Playback => match (picked, entity) {
                (None, _) => {
                    self.unfollow();
                    Ok(ClickAction::Unfollowed)
                }
                (
                    Some(_),
                    Some(EntityRef::PlaybackPoint(track_id) | EntityRef::PlaybackPath(track_id) | EntityRef::Label(track_id)),
                ) => {
                    self.follow_track(&track_id, FollowStart::Selected)?;
                    Ok(ClickAction::Following(track_id))
                }
                _ => Ok(ClickAction::None),
            },
        }
    }

    /// Tracks intersecting the last accepted viewport.
    pub fn tracks_in_perspective(&self) -> Vec<&Track> {
        self.lod
            .tracks_in_perspective()
            .iter()
            .filter_map(|id| self.repository.get(id))
            .collect()
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Replay the selected tracks.
    pub fn play_selection(&mut self) -> Result<Option<PlaybackState>> {
        let ids: Vec<String> = self.selection.selected_tracks().map(str::to_string).collect();
        self.play(ids)
    }

    /// Replay the visible, unfiltered tracks in the current viewport.
    pub fn play_in_perspective(&mut self) -> Result<Option<PlaybackState>> {
        let ids: Vec<String> = self
            .tracks_in_perspective()
            .into_iter()
            .filter(|t| !self.filter.filters_track(t))
            .map(|t| t.id().to_string())
            .collect();
        self.play(ids)
    }

    fn play(&mut self, track_ids: Vec<String>) -> Result<Option<PlaybackState>> {
        let tracks: Vec<&Track> = track_ids
            .iter()
            .filter_map(|id| self.repository.get(id))
            .filter(|t| t.has_points())
            .collect();
        if tracks.is_empty() {
            debug!("[Viewer] No loaded tracks to play");
            return Ok(None);
        }
        if !self.playback.is_active() {
            self.renderer.remove_all_entities();
        }
        let state = self.playback.start(&tracks, &mut self.renderer)?;
        if state.is_some() {
            self.mode = ViewMode::Playback;
        }
        Ok(state)
    }

    /// Follow a played track with the camera.
    ///
    /// Without any camera telemetry yet the fixed follow range is used.
    pub fn follow_track(&mut self, track_id: &str, start: FollowStart) -> Result<CameraTarget> {
        let (camera, start) = match self.camera {
            Some(camera) => (camera, start),
            None => {
                let position = self.playback.position_of(track_id).ok_or_unknown_track(track_id)?;
                (CameraState::looking_down(position), FollowStart::Selected)
            }
        };
        self.playback.follow(track_id, &camera, start, &mut self.renderer)
    }

    pub fn unfollow(&mut self) {
        self.playback.unfollow(&mut self.renderer);
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playback.set_playing(playing, &mut self.renderer);
    }

    pub fn set_speed(&mut self, multiplier: f64) -> Result<()> {
        self.playback.set_speed(multiplier, &mut self.renderer)
    }

    /// Leave playback and rebuild the browsing scene.
    pub fn stop_playback(&mut self) {
        if !self.playback.is_active() {
            return;
        }
        self.playback.stop(&mut self.renderer);
        self.mode = ViewMode::Scatter;
        self.lod.initialize_entities(&self.repository, &mut self.renderer);
        self.lod.render(&self.repository, self.filter.as_ref(), &mut self.renderer);
        self.place_names.redraw(&mut self.renderer);
    }

    // ========================================================================
    // Framing
    // ========================================================================

    /// Point the camera at a set of tracks.
    pub fn frame_tracks<'a, I>(&mut self, track_ids: I) -> Option<CameraPose>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let bounds = self.repository.bounds_of(track_ids)?;
        Some(self.frame(&bounds))
    }

    fn frame(&mut self, bounds: &Bounds) -> CameraPose {
        let pose = framing_pose(bounds);
        self.renderer.set_camera_pose(&pose);
        pose
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub fn subscribe_camera(&mut self, handler: impl FnMut(&CameraState) + 'static) -> SubscriptionToken {
        self.camera_events.subscribe(handler)
    }

    pub fn unsubscribe_camera(&mut self, token: SubscriptionToken) -> bool {
        self.camera_events.unsubscribe(token)
    }

    pub fn subscribe_clock(&mut self, handler: impl FnMut(&TickUpdate) + 'static) -> SubscriptionToken {
        self.clock_events.subscribe(handler)
    }

    pub fn unsubscribe_clock(&mut self, token: SubscriptionToken) -> bool {
        self.clock_events.unsubscribe(token)
    }

    /// Install the single tick observer, replacing the previous one.
    pub fn set_tick_observer(&mut self, handler: impl FnMut(&TickUpdate) + 'static) -> SubscriptionToken {
        self.tick_observer.replace(&mut self.clock_events, handler)
    }

    pub fn clear_tick_observer(&mut self) {
        self.tick_observer.release(&mut self.clock_events);
    }

    /// Release every subscription and stop playback.
    pub fn teardown(&mut self) {
        self.stop_playback();
        self.tick_observer.release(&mut self.clock_events);
        self.camera_events.clear();
        self.clock_events.clear();
    }
}

/// Top-down camera that fits `bounds`.
pub fn framing_pose(bounds: &Bounds) -> CameraPose {
    CameraPose {
        target: bounds.center(),
        heading: 0.0,
        pitch: -std::f64::consts::FRAC_PI_2,
        range: (bounds_diagonal(bounds) * 1.5).max(MIN_FRAMING_RANGE),
    }
}
