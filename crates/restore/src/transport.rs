//! Storage-node transport
//!
//! The split executor talks to storage nodes through [`StoreTransport`].
//! [`GrpcTransport`] opens one channel per call and drops it when the call
//! returns, whatever the outcome.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

use br_core::{format_key, Peer, PeerRole, Region, RegionEpoch, RegionId, Store};
use proto::{errorpb, kvrpcpb, metapb, TikvClient};

use crate::error::Result;

/// Structured region error carried by a split response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("not leader of region {region_id}, leader hint: {leader:?}")]
    NotLeader {
        region_id: RegionId,
        leader: Option<Peer>,
    },
    #[error("server is busy: {reason}")]
    ServerIsBusy { reason: String },
    #[error("stale command")]
    StaleCommand,
    #[error("region {region_id} not found on store")]
    RegionNotFound { region_id: RegionId },
    #[error("epoch not match, {} current region(s)", .current_regions.len())]
    EpochNotMatch { current_regions: Vec<Region> },
    #[error("key {} not in region {region_id} [{}, {})", format_key(.key), format_key(.start_key), format_key(.end_key))]
    KeyNotInRegion {
        key: Vec<u8>,
        region_id: RegionId,
        start_key: Vec<u8>,
        end_key: Vec<u8>,
    },
    #[error("{0}")]
    Other(String),
}

impl RegionError {
    /// Server-side overload that a plain retry may clear
    pub fn is_transient(&self) -> bool {
        matches!(self, RegionError::ServerIsBusy { .. } | RegionError::StaleCommand)
    }
}

/// One split attempt against a specific peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRegionRequest {
    pub region_id: RegionId,
    pub epoch: RegionEpoch,
    pub peer: Peer,
    pub split_keys: Vec<Vec<u8>>,
}

/// Split outcome: either a region error or the resulting regions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitRegionResponse {
    pub region_error: Option<RegionError>,
    /// Legacy positional result, never used to identify the origin region
    pub left: Option<Region>,
    pub regions: Vec<Region>,
}

/// Storage-node split RPC capability
#[async_trait]
pub trait StoreTransport: Send + Sync {
    async fn split_region(
        &self,
        store: &Store,
        request: SplitRegionRequest,
    ) -> Result<SplitRegionResponse>;
}

/// gRPC transport, one short-lived channel per call
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    connect_timeout: Duration,
    tls: Option<ClientTlsConfig>,
}

impl GrpcTransport {
    pub fn new(connect_timeout: Duration, tls: Option<ClientTlsConfig>) -> Self {
        Self {
            connect_timeout,
            tls,
        }
    }

    async fn connect(&self, store: &Store) -> Result<TikvClient<Channel>> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let mut endpoint = Endpoint::from_shared(format!("{}://{}", scheme, store.address))?
            .connect_timeout(self.connect_timeout);
        if let Some(tls) = &self.tls {
            endpoint = endpoint.tls_config(tls.clone())?;
        }
        let channel = endpoint.connect().await?;
        Ok(TikvClient::new(channel))
    }
}

#[async_trait]
impl StoreTransport for GrpcTransport {
    async fn split_region(
        &self,
        store: &Store,
        request: SplitRegionRequest,
    ) -> Result<SplitRegionResponse> {
        debug!(
            "Sending split of region {} to store {} ({}) with {} key(s)",
            request.region_id,
            store.id,
            store.address,
            request.split_keys.len()
        );
        let mut client = self.connect(store).await?;
        let resp = client.split_region(request_to_pb(request)).await?;
        Ok(response_from_pb(resp.into_inner()))
    }
}

fn role_to_pb(role: PeerRole) -> metapb::PeerRole {
    match role {
        PeerRole::Voter => metapb::PeerRole::Voter,
        PeerRole::Learner => metapb::PeerRole::Learner,
        PeerRole::IncomingVoter => metapb::PeerRole::IncomingVoter,
        PeerRole::DemotingVoter => metapb::PeerRole::DemotingVoter,
    }
}

fn role_from_pb(role: i32) -> PeerRole {
    match metapb::PeerRole::try_from(role) {
        Ok(metapb::PeerRole::Learner) => PeerRole::Learner,
        Ok(metapb::PeerRole::IncomingVoter) => PeerRole::IncomingVoter,
        Ok(metapb::PeerRole::DemotingVoter) => PeerRole::DemotingVoter,
        _ => PeerRole::Voter,
    }
}

pub fn peer_to_pb(peer: &Peer) -> metapb::Peer {
    metapb::Peer {
        id: peer.id,
        store_id: peer.store_id,
        role: role_to_pb(peer.role) as i32,
    }
}

pub fn peer_from_pb(peer: metapb::Peer) -> Peer {
    Peer {
        id: peer.id,
        store_id: peer.store_id,
        role: role_from_pb(peer.role),
    }
}

pub fn region_from_pb(region: metapb::Region) -> Region {
    let epoch = region
        .region_epoch
        .map(|e| RegionEpoch::new(e.conf_ver, e.version))
        .unwrap_or_default();
    Region::new(
        region.id,
        region.start_key,
        region.end_key,
        epoch,
        region.peers.into_iter().map(peer_from_pb).collect(),
    )
}

pub fn region_to_pb(region: &Region) -> metapb::Region {
    metapb::Region {
        id: region.id,
        start_key: region.start_key.clone(),
        end_key: region.end_key.clone(),
        region_epoch: Some(metapb::RegionEpoch {
            conf_ver: region.epoch.conf_ver,
            version: region.epoch.version,
        }),
        peers: region.peers.iter().map(peer_to_pb).collect(),
    }
}

pub fn request_to_pb(request: SplitRegionRequest) -> kvrpcpb::SplitRegionRequest {
    kvrpcpb::SplitRegionRequest {
        context: Some(kvrpcpb::Context {
            region_id: request.region_id,
            region_epoch: Some(metapb::RegionEpoch {
                conf_ver: request.epoch.conf_ver,
                version: request.epoch.version,
            }),
            peer: Some(peer_to_pb(&request.peer)),
        }),
        split_key: Vec::new(),
        split_keys: request.split_keys,
        is_raw_kv: false,
    }
}

pub fn region_error_from_pb(err: errorpb::Error) -> RegionError {
    if let Some(not_leader) = err.not_leader {
        return RegionError::NotLeader {
            region_id: not_leader.region_id,
            leader: not_leader.leader.map(peer_from_pb),
        };
    }
    if let Some(busy) = err.server_is_busy {
        return RegionError::ServerIsBusy {
            reason: busy.reason,
        };
    }
    if err.stale_command.is_some() {
        return RegionError::StaleCommand;
    }
    if let Some(not_found) = err.region_not_found {
        return RegionError::RegionNotFound {
            region_id: not_found.region_id,
        };
    }
    if let Some(epoch) = err.epoch_not_match {
        return RegionError::EpochNotMatch {
            current_regions: epoch
                .current_regions
                .into_iter()
                .map(region_from_pb)
                .collect(),
        };
    }
    if let Some(key) = err.key_not_in_region {
        return RegionError::KeyNotInRegion {
            key: key.key,
            region_id: key.region_id,
            start_key: key.start_key,
            end_key: key.end_key,
        };
    }
    RegionError::Other(err.message)
}

pub fn response_from_pb(resp: kvrpcpb::SplitRegionResponse) -> SplitRegionResponse {
    SplitRegionResponse {
        region_error: resp.region_error.map(region_error_from_pb),
        left: resp.left.map(region_from_pb),
        regions: resp.regions.into_iter().map(region_from_pb).collect(),
    }
}
