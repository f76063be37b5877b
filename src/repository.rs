//! # Track Repository
//!
//! Owns the tracks and groups of the active date. Sets are replaced
//! wholesale when the date changes; nothing from a previous date is ever
//! mutated. Every replacement opens a new [`SessionId`] and all late results
//! (detail loads, date loads) must present the session they were started in.

use std::collections::HashMap;

use chrono::NaiveDate;
use log::{debug, info, warn};
use rstar::RTree;

use crate::error::{OptionExt, Result, TrackViewError};
use crate::track::{check_ordering, ColorAssignment, Palette, TrackPoint};
use crate::{Bounds, Track, TrackBounds, TrackGroup};

/// Epoch of a loaded date. Increases on every date change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionId(pub u64);

/// In-memory tracks and groups for one date.
#[derive(Debug)]
pub struct TrackRepository {
    session: SessionId,
    date: Option<NaiveDate>,
    tracks: Vec<Track>,
    index: HashMap<String, usize>,
    groups: Vec<TrackGroup>,
    spatial_index: RTree<TrackBounds>,
    palette: Palette,
}

impl Default for TrackRepository {
    fn default() -> Self {
        Self::new(ColorAssignment::default())
    }
}

impl TrackRepository {
    pub fn new(color_assignment: ColorAssignment) -> Self {
        Self {
            session: SessionId::default(),
            date: None,
            tracks: Vec::new(),
            index: HashMap::new(),
            groups: Vec::new(),
            spatial_index: RTree::new(),
            palette: Palette::new(color_assignment),
        }
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Discard everything and open a new session for `date`.
    pub fn begin_session(&mut self, date: NaiveDate) -> SessionId {
        self.session = SessionId(self.session.0 + 1);
        self.date = Some(date);
        self.tracks.clear();
        self.index.clear();
        self.groups.clear();
        self.spatial_index = RTree::new();
        self.palette.reset();
        debug!("[Repository] Session {} opened for {}", self.session.0, date);
        self.session
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    /// Fail with `StaleSession` unless `session` is current.
    pub fn ensure_current(&self, session: SessionId) -> Result<()> {
        if session == self.session {
            Ok(())
        } else {
            Err(TrackViewError::StaleSession {
                ticket: session.0,
                current: self.session.0,
            })
        }
    }

    /// Install the track and group sets of `session`.
    ///
    /// Tracks get their colors here. Duplicate ids keep the first occurrence.
    pub fn install(&mut self, session: SessionId, tracks: Vec<Track>, groups: Vec<TrackGroup>) -> Result<()> {
        self.ensure_current(session)?;

        self.tracks.clear();
        self.index.clear();
        for mut track in tracks {
            if self.index.contains_key(track.id()) {
                warn!("[Repository] Duplicate track id '{}' skipped", track.id());
                continue;
            }
            track.set_color(self.palette.color_for(track.id()));
            self.index.insert(track.id().to_string(), self.tracks.len());
            self.tracks.push(track);
        }
        self.groups = groups;
        self.rebuild_spatial_index();

        info!(
            "[Repository] Session {}: {} tracks, {} groups",
            self.session.0,
            self.tracks.len(),
            self.groups.len()
        );
        Ok(())
    }

    /// Attach a loaded point sequence to a metadata-only track.
    pub fn attach_detail(&mut self, session: SessionId, track_id: &str, points: Vec<TrackPoint>) -> Result<()> {
        self.ensure_current(session)?;
        let slot = *self.index.get(track_id).ok_or_unknown_track(track_id)?;
        self.tracks[slot].set_points(points)?;
        self.rebuild_spatial_index();
        Ok(())
    }

    /// Attach several point sequences at once. Either every sequence is
    /// attached or, on the first unknown id or out-of-order sequence, none is.
    pub fn attach_details(&mut self, session: SessionId, details: Vec<(String, Vec<TrackPoint>)>) -> Result<()> {
        self.ensure_current(session)?;
        let mut staged = Vec::with_capacity(details.len());
        for (track_id, points) in details {
            let slot = *self.index.get(&track_id).ok_or_unknown_track(&track_id)?;
            check_ordering(&track_id, &points)?;
            staged.push((slot, points));
        }
        for (slot, points) in staged {
            self.tracks[slot].set_points(points)?;
        }
        self.rebuild_spatial_index();
        Ok(())
    }

    fn rebuild_spatial_index(&mut self) {
        let bounds: Vec<TrackBounds> = self
            .tracks
            .iter()
            .filter_map(|t| {
                t.bounds().map(|bounds| TrackBounds {
                    track_id: t.id().to_string(),
                    bounds,
                })
            })
            .collect();
        self.spatial_index = RTree::bulk_load(bounds);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn groups(&self) -> &[TrackGroup] {
        &self.groups
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn get(&self, track_id: &str) -> Option<&Track> {
        self.index.get(track_id).map(|&slot| &self.tracks[slot])
    }

    pub fn get_mut(&mut self, track_id: &str) -> Option<&mut Track> {
        match self.index.get(track_id) {
            Some(&slot) => Some(&mut self.tracks[slot]),
            None => None,
        }
    }

    pub fn group(&self, group_id: u32) -> Option<&TrackGroup> {
        self.groups.iter().find(|g| g.group_id == group_id)
    }

    /// The group containing `track_id`.
    pub fn group_of_track(&self, track_id: &str) -> Option<&TrackGroup> {
        self.groups.iter().find(|g| g.contains(track_id))
    }

    /// Member tracks of a group, in group order.
    pub fn tracks_in_group(&self, group: &TrackGroup) -> Vec<&Track> {
        group.track_ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Tracks whose bounds intersect `viewport`, in install order.
    ///
    /// A viewport with `min_lng > max_lng` wraps across the antimeridian.
    pub fn tracks_in_bounds(&self, viewport: &Bounds) -> Vec<&Track> {
        let envelopes = viewport.envelopes();
        let mut slots: Vec<usize> = envelopes
            .iter()
            .flat_map(|envelope| self.spatial_index.locate_in_envelope_intersecting(envelope))
            .filter_map(|b| self.index.get(&b.track_id).copied())
            .collect();
        slots.sort_unstable();
        slots.dedup();
        slots.into_iter().map(|slot| &self.tracks[slot]).collect()
    }

    /// Combined bounds of a set of tracks.
    pub fn bounds_of<'a, I>(&self, track_ids: I) -> Option<Bounds>
    where
        I: IntoIterator<Item = &'a str>,
    {
        track_ids
            .into_iter()
            .filter_map(|id| self.get(id).and_then(Track::bounds))
            .reduce(|a, b| a.merge(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Activity, GeoPoint};
    use chrono::{TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn track(id: &str, lat: f64, lng: f64) -> Track {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Track::new(id, id, Activity::Paraglider, 10.0, vec![TrackPoint::new(t0, lat, lng, 1000.0)]).unwrap()
    }

    #[test]
    fn test_install_and_query() {
        let mut repo = TrackRepository::default();
        let session = repo.begin_session(date());
        repo.install(session, vec![track("a", 35.0, 139.0), track("b", 45.0, 7.0)], vec![])
            .unwrap();
        assert_eq!(repo.track_count(), 2);
        assert_ne!(repo.get("a").unwrap().color(), repo.get("b").unwrap().color());

        let viewport = Bounds {
            min_lat: 34.0,
            max_lat: 36.0,
            min_lng: 138.0,
            max_lng: 140.0,
        };
        let visible: Vec<&str> = repo.tracks_in_bounds(&viewport).iter().map(|t| t.id()).collect();
        assert_eq!(visible, vec!["a"]);
    }

    #[test]
    fn test_duplicate_ids_skipped() {
        let mut repo = TrackRepository::default();
        let session = repo.begin_session(date());
        repo.install(session, vec![track("a", 35.0, 139.0), track("a", 45.0, 7.0)], vec![])
            .unwrap();
        assert_eq!(repo.track_count(), 1);
        assert_eq!(repo.get("a").unwrap().origin(), Some(GeoPoint::new(35.0, 139.0, 1000.0)));
    }

    #[test]
    fn test_stale_session_rejected() {
        let mut repo = TrackRepository::default();
        let old = repo.begin_session(date());
        repo.install(old, vec![track("a", 35.0, 139.0)], vec![]).unwrap();
        let current = repo.begin_session(date().succ_opt().unwrap());

        let err = repo.attach_detail(old, "a", vec![]).unwrap_err();
        assert_eq!(
            err,
            TrackViewError::StaleSession {
                ticket: old.0,
                current: current.0
            }
        );
        assert!(repo.install(old, vec![track("x", 0.0, 0.0)], vec![]).is_err());
        assert_eq!(repo.track_count(), 0);
    }

    #[test]
    fn test_attach_detail_unknown_track() {
        let mut repo = TrackRepository::default();
        let session = repo.begin_session(date());
        assert_eq!(
            repo.attach_detail(session, "nobody", vec![]),
            Err(TrackViewError::UnknownTrack("nobody".to_string()))
        );
    }

    #[test]
    fn test_attach_details_is_all_or_nothing() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let fix = |minute: i64| TrackPoint::new(t0 + chrono::Duration::minutes(minute), 35.0, 139.0, 1000.0);
        let mut repo = TrackRepository::default();
        let session = repo.begin_session(date());
        let metadata_only = |id: &str| Track::new(id, id, Activity::Paraglider, 10.0, vec![]).unwrap();
        repo.install(session, vec![metadata_only("a"), metadata_only("b")], vec![])
            .unwrap();

        let result = repo.attach_details(
            session,
            vec![
                ("a".to_string(), vec![fix(0), fix(1)]),
                ("b".to_string(), vec![fix(1), fix(0)]),
            ],
        );
        assert!(matches!(result, Err(TrackViewError::InvalidOrdering { index: 1, .. })));
        assert!(!repo.get("a").unwrap().has_points());

        let result = repo.attach_details(
            session,
            vec![("a".to_string(), vec![fix(0)]), ("ghost".to_string(), vec![fix(0)])],
        );
        assert_eq!(result, Err(TrackViewError::UnknownTrack("ghost".to_string())));
        assert!(!repo.get("a").unwrap().has_points());

        repo.attach_details(
            session,
            vec![("a".to_string(), vec![fix(0)]), ("b".to_string(), vec![fix(0), fix(2)])],
        )
        .unwrap();
        assert!(repo.get("a").unwrap().has_points());
        assert_eq!(repo.get("b").unwrap().points().len(), 2);
    }

    #[test]
    fn test_viewport_across_antimeridian() {
        let mut repo = TrackRepository::default();
        let session = repo.begin_session(date());
        repo.install(
            session,
            vec![
                track("fiji", -17.5, 179.5),
                track("africa", -17.5, 20.0),
                track("samoa", -16.0, -172.0),
            ],
            vec![],
        )
        .unwrap();

        let viewport = Bounds {
            min_lat: -20.0,
            max_lat: -15.0,
            min_lng: 170.0,
            max_lng: -170.0,
        };
        let visible: Vec<&str> = repo.tracks_in_bounds(&viewport).iter().map(|t| t.id()).collect();
        assert_eq!(visible, vec!["fiji", "samoa"]);
    }
}
