//! Store and region metadata
//!
//! All types here are value snapshots fetched from the metadata service.
//! They are never updated in place: learning something new about a region
//! (a new leader, a fresher epoch) produces a new `RegionInfo`.

use serde::{Deserialize, Serialize};

use crate::keys::hex_bytes;

/// Region ID type
pub type RegionId = u64;
/// Store ID type
pub type StoreId = u64;
/// Peer ID type
pub type PeerId = u64;

/// Store label used by placement constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLabel {
    pub key: String,
    pub value: String,
}

/// A physical cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    /// Store identifier
    pub id: StoreId,
    /// gRPC address (host:port)
    pub address: String,
    /// Store labels
    #[serde(default)]
    pub labels: Vec<StoreLabel>,
}

impl Store {
    pub fn new(id: StoreId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            labels: Vec::new(),
        }
    }

    /// Get label value by key
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.key == key)
            .map(|l| l.value.as_str())
    }
}

/// Region epoch
///
/// `conf_ver` advances on membership changes, `version` on split or merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionEpoch {
    pub conf_ver: u64,
    pub version: u64,
}

impl RegionEpoch {
    pub fn new(conf_ver: u64, version: u64) -> Self {
        Self { conf_ver, version }
    }

    /// Whether this epoch is at least as new as `other` in both components
    pub fn dominates(&self, other: &RegionEpoch) -> bool {
        self.conf_ver >= other.conf_ver && self.version >= other.version
    }
}

impl std::fmt::Display for RegionEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conf_ver:{} version:{}", self.conf_ver, self.version)
    }
}

/// Peer role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    #[default]
    Voter,
    Learner,
    IncomingVoter,
    DemotingVoter,
}

/// One replica of a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Peer ID (0 means "unknown", see `RegionInfo::confirmed_leader`)
    pub id: PeerId,
    /// Store hosting this replica
    pub store_id: StoreId,
    #[serde(default)]
    pub role: PeerRole,
}

impl Peer {
    pub fn new(id: PeerId, store_id: StoreId) -> Self {
        Self {
            id,
            store_id,
            role: PeerRole::Voter,
        }
    }
}

/// Region metadata
///
/// Owns the right-open raw key range `[start_key, end_key)`. An empty
/// `end_key` means the region extends to the end of the key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    #[serde(with = "hex_bytes")]
    pub start_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub end_key: Vec<u8>,
    pub epoch: RegionEpoch,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

impl Region {
    pub fn new(
        id: RegionId,
        start_key: impl Into<Vec<u8>>,
        end_key: impl Into<Vec<u8>>,
        epoch: RegionEpoch,
        peers: Vec<Peer>,
    ) -> Self {
        Self {
            id,
            start_key: start_key.into(),
            end_key: end_key.into(),
            epoch,
            peers,
        }
    }

    /// Check if key is within `[start_key, end_key)`
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && (self.end_key.is_empty() || key < self.end_key.as_slice())
    }

    /// Check if key lies strictly inside the region, i.e. splitting at it
    /// yields two non-empty halves
    pub fn contains_interior(&self, key: &[u8]) -> bool {
        key > self.start_key.as_slice() && (self.end_key.is_empty() || key < self.end_key.as_slice())
    }

    /// Find the replica hosted on `store_id`
    pub fn peer_on_store(&self, store_id: StoreId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.store_id == store_id)
    }
}

/// Client-side region handle: region metadata plus the believed leader
///
/// The leader is a snapshot. It is only trusted for a single RPC attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub region: Region,
    pub leader: Option<Peer>,
}

impl RegionInfo {
    pub fn new(region: Region, leader: Option<Peer>) -> Self {
        Self { region, leader }
    }

    pub fn id(&self) -> RegionId {
        self.region.id
    }

    pub fn epoch(&self) -> RegionEpoch {
        self.region.epoch
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.region.contains(key)
    }

    /// Leader with a non-zero peer id
    ///
    /// Scan responses may carry a leader whose id is 0 when the metadata
    /// service has no confirmed leader yet; such a leader is treated as absent.
    pub fn confirmed_leader(&self) -> Option<&Peer> {
        self.leader.as_ref().filter(|p| p.id != 0)
    }

    /// Peer a request should be sent to: the confirmed leader, otherwise the
    /// first known peer
    pub fn target_peer(&self) -> Option<&Peer> {
        self.confirmed_leader().or_else(|| self.region.peers.first())
    }

    /// Same region with a different believed leader
    pub fn with_leader(&self, leader: Peer) -> RegionInfo {
        RegionInfo {
            region: self.region.clone(),
            leader: Some(leader),
        }
    }
}
