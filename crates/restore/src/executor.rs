//! Split executor
//!
//! Performs one split RPC per attempt against the region's believed leader
//! and decides, from the structured region error, whether the next attempt
//! can be better informed than the last one.
//!
//! Only two kinds of outcome are retried:
//! - leadership moved or is unknown (`NotLeader`), repaired either from the
//!   hint in the response or by re-resolving the region by id
//! - transient overload (`ServerIsBusy`, `StaleCommand`), retried unchanged
//!
//! Everything else ends the call. Attempts for one region are strictly
//! sequential; each one may replace the working `RegionInfo`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use br_core::{format_key, Region, RegionId, RegionInfo, StoreId};

use crate::error::{Error, ErrorHistory, Result};
use crate::pd_client::PdClient;
use crate::store_cache::StoreCache;
use crate::transport::{RegionError, SplitRegionRequest, StoreTransport};

/// Attempts per split call
pub const SPLIT_REGION_MAX_RETRY_TIMES: usize = 4;

/// Regions produced by a successful split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitResult {
    /// The resulting region that kept the pre-split id
    pub origin: RegionInfo,
    /// Every other resulting region, in key order
    pub new_regions: Vec<RegionInfo>,
}

impl SplitResult {
    /// All resulting regions in key order
    pub fn regions(&self) -> Vec<RegionInfo> {
        let mut all = Vec::with_capacity(self.new_regions.len() + 1);
        all.push(self.origin.clone());
        all.extend(self.new_regions.iter().cloned());
        all.sort_by(|a, b| a.region.start_key.cmp(&b.region.start_key));
        all
    }
}

/// Outcome of one failed attempt
#[derive(Debug)]
enum Transition {
    /// Try again with this region handle
    Retry(RegionInfo),
    /// Give up, optionally recording one more error
    Abort(Option<Error>),
}

pub struct SplitExecutor {
    pd: Arc<dyn PdClient>,
    transport: Arc<dyn StoreTransport>,
    stores: Arc<StoreCache>,
    max_attempts: usize,
}

impl SplitExecutor {
    pub fn new(
        pd: Arc<dyn PdClient>,
        transport: Arc<dyn StoreTransport>,
        stores: Arc<StoreCache>,
    ) -> Self {
        Self {
            pd,
            transport,
            stores,
            max_attempts: SPLIT_REGION_MAX_RETRY_TIMES,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Split `region` at `split_keys`
    ///
    /// Keys must be strictly ascending and strictly inside the region. Any
    /// failure is returned as `Error::Split` carrying every error observed
    /// during the call.
    pub async fn split(&self, region: &RegionInfo, split_keys: &[Vec<u8>]) -> Result<SplitResult> {
        let mut history = ErrorHistory::default();
        if let Err(e) = validate_split_keys(&region.region, split_keys) {
            history.push(e);
            return Err(history.into());
        }

        let mut working = region.clone();
        for attempt in 1..=self.max_attempts {
            let Some(peer) = working.target_peer().cloned() else {
                history.push(Error::NoPeer(working.id()));
                return Err(history.into());
            };

            let store = match self.stores.get_or_fetch(peer.store_id, self.pd.as_ref()).await {
                Ok(store) => store,
                Err(e) => {
                    history.push(e);
                    return Err(history.into());
                }
            };

            debug!(
                "Split attempt {}/{} of region {} ({}) via peer {} on store {}",
                attempt,
                self.max_attempts,
                working.id(),
                working.epoch(),
                peer.id,
                store.id
            );

            let request = SplitRegionRequest {
                region_id: working.id(),
                epoch: working.epoch(),
                peer: peer.clone(),
                split_keys: split_keys.to_vec(),
            };
            let response = match self.transport.split_region(&store, request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Split RPC of region {} to store {} failed: {}", working.id(), store.id, e);
                    history.push(e);
                    return Err(history.into());
                }
            };

            let Some(region_error) = response.region_error else {
                return match partition(region.id(), peer.store_id, response.regions) {
                    Ok(result) => {
                        info!(
                            "Split region {} at [{}] into {} region(s)",
                            region.id(),
                            split_keys
                                .iter()
                                .map(|k| format_key(k))
                                .collect::<Vec<_>>()
                                .join(", "),
                            result.new_regions.len() + 1
                        );
                        Ok(result)
                    }
                    Err(e) => {
                        history.push(e);
                        Err(history.into())
                    }
                };
            };

            warn!(
                "Split region {} attempt {} got region error: {}",
                working.id(),
                attempt,
                region_error
            );
            let transition = self.next_state(&working, &region_error).await;
            history.push(Error::Region {
                region_id: working.id(),
                error: region_error,
            });

            match transition {
                Transition::Retry(next) => working = next,
                Transition::Abort(err) => {
                    if let Some(err) = err {
                        history.push(err);
                    }
                    return Err(history.into());
                }
            }
        }

        warn!(
            "Split region {} gave up after {} attempts",
            region.id(),
            self.max_attempts
        );
        Err(history.into())
    }

    async fn next_state(&self, working: &RegionInfo, error: &RegionError) -> Transition {
        match error {
            RegionError::NotLeader {
                leader: Some(leader),
                ..
            } if leader.id != 0 => {
                info!(
                    "Region {} leader moved to peer {} on store {}",
                    working.id(),
                    leader.id,
                    leader.store_id
                );
                Transition::Retry(working.with_leader(leader.clone()))
            }
            RegionError::NotLeader { .. } => self.reresolve(working).await,
            e if e.is_transient() => Transition::Retry(working.clone()),
            _ => Transition::Abort(None),
        }
    }

    /// Look the region up again after a not-leader error without a hint
    async fn reresolve(&self, working: &RegionInfo) -> Transition {
        match self.pd.get_region_by_id(working.id()).await {
            Ok(Some(fresh)) if fresh.epoch().dominates(&working.epoch()) => {
                debug!(
                    "Re-resolved region {}: epoch {}, leader {:?}",
                    fresh.id(),
                    fresh.epoch(),
                    fresh.confirmed_leader().map(|p| p.id)
                );
                Transition::Retry(fresh)
            }
            Ok(Some(fresh)) => Transition::Abort(Some(Error::EpochNotMatch {
                region_id: working.id(),
                current: fresh.epoch(),
                expected: working.epoch(),
            })),
            Ok(None) => Transition::Abort(Some(Error::RegionNotFound(working.id()))),
            Err(e) => Transition::Abort(Some(e)),
        }
    }
}

/// Check split keys against the region before sending anything
pub fn validate_split_keys(region: &Region, split_keys: &[Vec<u8>]) -> Result<()> {
    let invalid = |reason: String| Error::InvalidSplitKeys {
        region_id: region.id,
        reason,
    };

    if split_keys.is_empty() {
        return Err(invalid("no split keys".to_string()));
    }
    for pair in split_keys.windows(2) {
        if pair[0] >= pair[1] {
            return Err(invalid(format!(
                "keys not strictly ascending: {} then {}",
                format_key(&pair[0]),
                format_key(&pair[1])
            )));
        }
    }
    for key in split_keys {
        if !region.contains_interior(key) {
            return Err(invalid(format!(
                "key {} not inside [{}, {})",
                format_key(key),
                format_key(&region.start_key),
                format_key(&region.end_key)
            )));
        }
    }
    Ok(())
}

/// Split the resulting regions into origin and new ones by id
///
/// The putative leader of each region is its peer on `leader_store`, the
/// store whose peer served the split.
fn partition(origin_id: RegionId, leader_store: StoreId, regions: Vec<Region>) -> Result<SplitResult> {
    let mut origin = None;
    let mut new_regions = Vec::with_capacity(regions.len());
    for region in regions {
        let leader = region.peer_on_store(leader_store).cloned();
        let info = RegionInfo::new(region, leader);
        if info.id() == origin_id {
            origin = Some(info);
        } else {
            new_regions.push(info);
        }
    }
    new_regions.sort_by(|a, b| a.region.start_key.cmp(&b.region.start_key));

    let origin = origin.ok_or(Error::OriginRegionMissing(origin_id))?;
    Ok(SplitResult {
        origin,
        new_regions,
    })
}
