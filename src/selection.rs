//! Selection of tracks, groups and a single track point.
//!
//! Group selection is two-phase because it may need detail loads:
//! [`SelectionModel::begin_group_selection`] claims the group's loading gate
//! and hands out a [`GroupLoadTicket`]; the caller runs the loads and passes
//! the ticket and the outcome to [`SelectionModel::complete_group_selection`].
//! Tickets from an earlier session are ignored on completion.

use std::collections::{BTreeSet, HashSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::repository::{SessionId, TrackRepository};
use crate::TrackGroup;

/// A point selection: track id and index into its point sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackPointRef {
    pub track_id: String,
    pub index: usize,
}

/// Permission to load a group's missing detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLoadTicket {
    pub group_id: u32,
    pub session: SessionId,
    /// Member tracks still without a point sequence
    pub pending: Vec<String>,
}

/// Result of asking to select a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSelection {
    /// Nothing to load; only refocus the camera.
    AlreadySelected,
    /// A load for this group is in flight; do not start another.
    AlreadyLoading,
    /// Load `pending` then complete the selection with this ticket.
    Load(GroupLoadTicket),
}

/// Current selection of one session.
#[derive(Debug, Clone, Default)]
pub struct SelectionModel {
    session: SessionId,
    selected_tracks: BTreeSet<String>,
    selected_groups: BTreeSet<u32>,
    selected_point: Option<TrackPointRef>,
    loading_groups: HashSet<u32>,
}

impl SelectionModel {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            ..Self::default()
        }
    }

    /// Clear everything and bind to a new session.
    pub fn reset(&mut self, session: SessionId) {
        if !self.loading_groups.is_empty() {
            debug!(
                "[Selection] Abandoning {} in-flight group loads",
                self.loading_groups.len()
            );
        }
        *self = Self::new(session);
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    // ========================================================================
    // Tracks and points
    // ========================================================================

    /// Flip the selection of a track. Returns the new state.
    ///
    /// Deselecting a track also drops a point selection inside it.
    pub fn toggle_track(&mut self, track_id: &str) -> bool {
        if self.selected_tracks.remove(track_id) {
            if self
                .selected_point
                .as_ref()
                .is_some_and(|p| p.track_id == track_id)
            {
                self.selected_point = None;
            }
            false
        } else {
            self.selected_tracks.insert(track_id.to_string());
            true
        }
    }

    /// Select a track if it is not selected yet. Returns true if it was newly selected.
    pub fn select_track(&mut self, track_id: &str) -> bool {
        self.selected_tracks.insert(track_id.to_string())
    }

    /// Select one point, selecting its track as needed.
    pub fn select_track_point(&mut self, track_id: &str, index: usize) {
        self.select_track(track_id);
        self.selected_point = Some(TrackPointRef {
            track_id: track_id.to_string(),
            index,
        });
    }

    pub fn clear_track_point(&mut self) {
        self.selected_point = None;
    }

    pub fn is_track_selected(&self, track_id: &str) -> bool {
        self.selected_tracks.contains(track_id)
    }

    pub fn selected_tracks(&self) -> impl Iterator<Item = &str> {
        self.selected_tracks.iter().map(String::as_str)
    }

    pub fn selected_track_count(&self) -> usize {
        self.selected_tracks.len()
    }

    pub fn selected_point(&self) -> Option<&TrackPointRef> {
        self.selected_point.as_ref()
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Start selecting a group.
    pub fn begin_group_selection(&mut self, group: &TrackGroup, repo: &TrackRepository) -> GroupSelection {
        if self.selected_groups.contains(&group.group_id) {
            return GroupSelection::AlreadySelected;
        }
        if !self.loading_groups.insert(group.group_id) {
            debug!("[Selection] Group {} is already loading", group.group_id);
            return GroupSelection::AlreadyLoading;
        }
        let pending: Vec<String> = repo
            .tracks_in_group(group)
            .into_iter()
            .filter(|t| !t.has_points())
            .map(|t| t.id().to_string())
            .collect();
        debug!(
            "[Selection] Group {}: {} of {} tracks need detail",
            group.group_id,
            pending.len(),
            group.size()
        );
        GroupSelection::Load(GroupLoadTicket {
            group_id: group.group_id,
            session: self.session,
            pending,
        })
    }

    /// Finish a group selection started with `begin_group_selection`.
    ///
    /// Returns `Ok(true)` when the group became selected and `Ok(false)` when
    /// the ticket is stale and was ignored. A failed load clears the loading
    /// gate, leaves the group unselected, and returns the load error.
    pub fn complete_group_selection(&mut self, ticket: &GroupLoadTicket, outcome: Result<()>) -> Result<bool> {
        if ticket.session != self.session {
            warn!(
                "[Selection] Ignoring group {} load from session {} (current {})",
                ticket.group_id, ticket.session.0, self.session.0
            );
            return Ok(false);
        }
        self.loading_groups.remove(&ticket.group_id);
        match outcome {
            Ok(()) => {
                self.selected_groups.insert(ticket.group_id);
                info!("[Selection] Group {} selected", ticket.group_id);
                Ok(true)
            }
            Err(e) => {
                warn!("[Selection] Group {} load failed: {}", ticket.group_id, e);
                Err(e)
            }
        }
    }

    pub fn is_group_selected(&self, group_id: u32) -> bool {
        self.selected_groups.contains(&group_id)
    }

    pub fn is_group_loading(&self, group_id: u32) -> bool {
        self.loading_groups.contains(&group_id)
    }

    /// True while any group load is in flight.
    pub fn is_loading(&self) -> bool {
        !self.loading_groups.is_empty()
    }

    pub fn selected_groups(&self) -> impl Iterator<Item = u32> + '_ {
        self.selected_groups.iter().copied()
    }

    pub fn selected_group_count(&self) -> usize {
        self.selected_groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackViewError;
    use crate::GeoPoint;

    fn group(id: u32, members: &[&str]) -> TrackGroup {
        TrackGroup {
            group_id: id,
            track_ids: members.iter().map(|s| s.to_string()).collect(),
            centroid: GeoPoint::new(35.0, 139.0, 0.0),
        }
    }

    #[test]
    fn test_toggle_clears_point_of_same_track_only() {
        let mut model = SelectionModel::default();
        model.select_track_point("a", 3);
        assert!(model.is_track_selected("a"));

        assert!(model.toggle_track("b"));
        assert!(!model.toggle_track("b"));
        assert_eq!(model.selected_point().map(|p| p.index), Some(3));

        assert!(!model.toggle_track("a"));
        assert!(model.selected_point().is_none());
    }

    #[test]
    fn test_loading_gate() {
        let repo = TrackRepository::default();
        let mut model = SelectionModel::default();
        let g = group(1, &["a"]);

        let ticket = match model.begin_group_selection(&g, &repo) {
            GroupSelection::Load(ticket) => ticket,
            other => panic!("expected load, got {:?}", other),
        };
        assert_eq!(model.begin_group_selection(&g, &repo), GroupSelection::AlreadyLoading);
        assert_eq!(model.complete_group_selection(&ticket, Ok(())), Ok(true));
        assert_eq!(model.begin_group_selection(&g, &repo), GroupSelection::AlreadySelected);
    }

    #[test]
    fn test_failed_load_clears_gate() {
        let repo = TrackRepository::default();
        let mut model = SelectionModel::default();
        let g = group(2, &["a"]);

        let GroupSelection::Load(ticket) = model.begin_group_selection(&g, &repo) else {
            panic!("expected load");
        };
        let err = TrackViewError::load("a", "connection reset");
        assert_eq!(model.complete_group_selection(&ticket, Err(err.clone())), Err(err));
        assert!(!model.is_group_loading(2));
        assert!(!model.is_group_selected(2));
    }

    #[test]
    fn test_stale_ticket_ignored() {
        let repo = TrackRepository::default();
        let mut model = SelectionModel::new(SessionId(1));
        let GroupSelection::Load(ticket) = model.begin_group_selection(&group(3, &[]), &repo) else {
            panic!("expected load");
        };
        model.reset(SessionId(2));
        assert_eq!(model.complete_group_selection(&ticket, Ok(())), Ok(false));
        assert!(!model.is_group_selected(3));
    }
}
