//! Peer roster
//!
//! Every other participant known to the session, keyed by client id.
//! Entries are written by the sync client and LOS listener and read by
//! the decode worker, so the map locks per entry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

use crate::radio::{LatLng, PlayerRadioSet, Position};

/// One remote participant
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerRecord {
    #[serde(rename = "ClientGuid")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Coalition")]
    pub coalition: i32,

    #[serde(rename = "Position")]
    pub position: Position,

    #[serde(rename = "LatLngPosition")]
    pub lat_lng: LatLng,

    #[serde(rename = "RadioInfo")]
    pub radio_info: Option<PlayerRadioSet>,

    /// 0 is a clear path, 1 or more is total loss
    #[serde(skip)]
    pub line_of_sight_loss: f32,

    #[serde(skip)]
    pub last_update: Option<Instant>,
}

impl PeerRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Has a current radio set with a real unit
    pub fn is_in_game(&self, now: Instant) -> bool {
        self.radio_info
            .as_ref()
            .map(|r| r.unit_id > 0 && r.is_current(now))
            .unwrap_or(false)
    }
}

/// A LOS check target sent to the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LosRequest {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A LOS result from the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LosResult {
    pub id: String,
    pub los: f32,
}

/// Concurrent map of peers
#[derive(Debug, Default)]
pub struct PeerRoster {
    peers: DashMap<String, PeerRecord>,
}

impl PeerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a server snapshot of the session.
    ///
    /// Known peers are updated in place and keep their LOS result; new ones
    /// start with a clear path. With `prune`, peers the snapshot omits are
    /// dropped.
    pub fn seed(&self, records: Vec<PeerRecord>, prune: bool, now: Instant) {
        if prune {
            let listed: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
            self.peers.retain(|id, _| listed.contains(id.as_str()));
        }
        for record in records {
            self.upsert(record, false, now);
        }
    }

    /// Insert a new peer or update an existing one in place.
    ///
    /// A record without radio info leaves the stored radio set untouched;
    /// with `refresh_radio` the stored set is still marked as current.
    /// Returns true when the peer was not known before.
    pub fn upsert(&self, mut record: PeerRecord, refresh_radio: bool, now: Instant) -> bool {
        if let Some(radio) = record.radio_info.as_mut() {
            radio.last_update = Some(now);
        }

        match self.peers.get_mut(&record.id) {
            Some(mut existing) => {
                existing.name = record.name;
                existing.coalition = record.coalition;
                existing.position = record.position;
                existing.lat_lng = record.lat_lng;
                match record.radio_info {
                    Some(radio) => existing.radio_info = Some(radio),
                    None if refresh_radio => {
                        if let Some(radio) = existing.radio_info.as_mut() {
                            radio.last_update = Some(now);
                        }
                    }
                    None => {}
                }
                existing.last_update = Some(now);
                false
            }
            None => {
                record.line_of_sight_loss = 0.0;
                record.last_update = Some(now);
                self.peers.insert(record.id.clone(), record);
                true
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<PeerRecord> {
        self.peers.remove(id).map(|(_, record)| record)
    }

    pub fn get(&self, id: &str) -> Option<PeerRecord> {
        self.peers.get(id).map(|r| r.clone())
    }

    /// Position and LOS loss of a peer, without cloning its radios
    pub fn position_and_los(&self, id: &str) -> Option<(Position, f32)> {
        self.peers
            .get(id)
            .map(|r| (r.position, r.line_of_sight_loss))
    }

    pub fn set_line_of_sight(&self, id: &str, loss: f32) {
        if let Some(mut record) = self.peers.get_mut(id) {
            record.line_of_sight_loss = loss;
        }
    }

    pub fn clear(&self) {
        self.peers.clear();
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn in_game_count(&self, now: Instant) -> usize {
        self.peers.iter().filter(|r| r.is_in_game(now)).count()
    }

    /// LOS targets: every positioned peer except `own_id`
    pub fn los_requests(&self, own_id: &str) -> Vec<LosRequest> {
        self.peers
            .iter()
            .filter(|r| r.id != own_id && !r.position.is_unknown())
            .map(|r| LosRequest {
                id: r.id.clone(),
                x: r.position.x,
                y: r.position.y,
                z: r.position.z,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, unit_id: u32) -> PeerRecord {
        let mut radio = PlayerRadioSet::new();
        radio.unit_id = unit_id;
        PeerRecord {
            id: id.to_string(),
            name: format!("pilot {}", id),
            coalition: 2,
            position: Position::new(10.0, 100.0, 10.0),
            radio_info: Some(radio),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_insert_then_update() {
        let roster = PeerRoster::new();
        let now = Instant::now();
        assert!(roster.upsert(peer("a", 5), false, now));
        assert!(!roster.upsert(peer("a", 6), false, now));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get("a").unwrap().radio_info.unwrap().unit_id, 6);
    }

    #[test]
    fn test_null_radio_keeps_previous() {
        let roster = PeerRoster::new();
        let now = Instant::now();
        roster.upsert(peer("a", 5), false, now);

        let mut update = peer("a", 0);
        update.radio_info = None;
        update.name = "renamed".into();
        roster.upsert(update, false, now);

        let stored = roster.get("a").unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.radio_info.unwrap().unit_id, 5);
    }

    #[test]
    fn test_update_keeps_line_of_sight() {
        let roster = PeerRoster::new();
        let now = Instant::now();
        roster.upsert(peer("a", 5), false, now);
        roster.set_line_of_sight("a", 0.7);
        roster.upsert(peer("a", 5), false, now);
        assert_eq!(roster.position_and_los("a").map(|(_, l)| l), Some(0.7));
    }

    #[test]
    fn test_seed_prunes_when_asked() {
        let roster = PeerRoster::new();
        let now = Instant::now();
        roster.upsert(peer("old", 1), false, now);
        let mut fresh = peer("new", 2);
        fresh.line_of_sight_loss = 1.0;
        roster.seed(vec![fresh, peer("other", 0)], true, now);

        assert!(roster.get("old").is_none());
        assert_eq!(roster.position_and_los("new").map(|(_, l)| l), Some(0.0));
        assert_eq!(roster.in_game_count(now), 1);
    }

    #[test]
    fn test_reseed_keeps_los_and_omitted_peers() {
        let roster = PeerRoster::new();
        let now = Instant::now();
        roster.seed(vec![peer("a", 1), peer("b", 2)], true, now);
        roster.set_line_of_sight("a", 0.7);

        let mut renamed = peer("a", 1);
        renamed.name = "Renamed".into();
        roster.seed(vec![renamed], false, now);

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.get("a").map(|p| p.name), Some("Renamed".to_string()));
        assert_eq!(roster.position_and_los("a").map(|(_, l)| l), Some(0.7));
        assert!(roster.get("b").is_some());
    }

    #[test]
    fn test_los_requests_skip_self_and_unpositioned() {
        let roster = PeerRoster::new();
        let now = Instant::now();
        roster.upsert(peer("me", 1), false, now);
        roster.upsert(peer("them", 2), false, now);
        let mut nowhere = peer("nowhere", 3);
        nowhere.position = Position::default();
        roster.upsert(nowhere, false, now);

        let requests = roster.los_requests("me");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "them");
    }

    #[test]
    fn test_remove() {
        let roster = PeerRoster::new();
        roster.upsert(peer("a", 1), false, Instant::now());
        assert!(roster.remove("a").is_some());
        assert!(roster.remove("a").is_none());
        assert!(roster.is_empty());
    }
}
