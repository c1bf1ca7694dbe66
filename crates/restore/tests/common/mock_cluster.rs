// mock_cluster.rs
//
// In-memory cluster playing both the metadata service and the storage
// nodes. Splits follow the real convention: the region keeping the original
// start key keeps the original id, every resulting region gets a version
// bump, and the leader stays on the same store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use br_core::{Peer, Region, RegionEpoch, RegionId, RegionInfo, Store, StoreId};
use restore::{
    Error, OperatorInfo, OperatorStatus, PdClient, RegionError, Result, SplitRegionRequest,
    SplitRegionResponse, StoreTransport,
};

pub struct MockCluster {
    state: Mutex<ClusterState>,
    /// Region errors returned, in order, before any real processing
    injected: Mutex<VecDeque<RegionError>>,
    /// `get_region_by_id` answers that replace the real region
    lookup_overrides: Mutex<HashMap<RegionId, Option<RegionInfo>>>,
    /// Every split RPC: serving store and request
    split_calls: Mutex<Vec<(StoreId, SplitRegionRequest)>>,
    scattered: Mutex<Vec<RegionId>>,
    failing_scatters: Mutex<Vec<RegionId>>,
    /// Operator polls reporting RUNNING before a scatter reports SUCCESS
    scatter_running_polls: AtomicUsize,
    operator_polls: Mutex<HashMap<RegionId, usize>>,
    /// Reverse the regions of split responses and fill the legacy `left`
    /// with the wrong region
    misleading_responses: Mutex<bool>,
    leader_addr: Mutex<String>,
    store_fetches: AtomicUsize,
    region_by_id_calls: AtomicUsize,
    scan_calls: AtomicUsize,
}

struct ClusterState {
    stores: HashMap<StoreId, Store>,
    /// Regions keyed by start key
    regions: BTreeMap<Vec<u8>, Region>,
    /// Leader store of each region
    leaders: HashMap<RegionId, StoreId>,
    next_id: u64,
}

impl ClusterState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_by_id(&self, region_id: RegionId) -> Option<&Region> {
        self.regions.values().find(|r| r.id == region_id)
    }

    fn info(&self, region: &Region) -> RegionInfo {
        let leader = self
            .leaders
            .get(&region.id)
            .and_then(|store_id| region.peer_on_store(*store_id))
            .cloned();
        RegionInfo::new(region.clone(), leader)
    }
}

impl MockCluster {
    /// `store_count` stores and regions split at `boundaries`; every region
    /// has one peer per store and its leader on store 1
    pub fn new(store_count: u64, boundaries: &[&[u8]]) -> Self {
        let mut state = ClusterState {
            stores: HashMap::new(),
            regions: BTreeMap::new(),
            leaders: HashMap::new(),
            next_id: 0,
        };
        for id in 1..=store_count {
            state
                .stores
                .insert(id, Store::new(id, format!("store-{}:20160", id)));
        }

        let mut keys: Vec<Vec<u8>> = vec![Vec::new()];
        keys.extend(boundaries.iter().map(|k| k.to_vec()));
        keys.push(Vec::new());
        for pair in keys.windows(2) {
            let id = state.alloc_id();
            let peers = (1..=store_count)
                .map(|store_id| Peer::new(id * 100 + store_id, store_id))
                .collect();
            let region = Region::new(
                id,
                pair[0].clone(),
                pair[1].clone(),
                RegionEpoch::new(1, 1),
                peers,
            );
            state.leaders.insert(id, 1);
            state.regions.insert(pair[0].clone(), region);
        }

        Self {
            state: Mutex::new(state),
            injected: Mutex::new(VecDeque::new()),
            lookup_overrides: Mutex::new(HashMap::new()),
            split_calls: Mutex::new(Vec::new()),
            scattered: Mutex::new(Vec::new()),
            failing_scatters: Mutex::new(Vec::new()),
            scatter_running_polls: AtomicUsize::new(0),
            operator_polls: Mutex::new(HashMap::new()),
            misleading_responses: Mutex::new(false),
            leader_addr: Mutex::new(String::new()),
            store_fetches: AtomicUsize::new(0),
            region_by_id_calls: AtomicUsize::new(0),
            scan_calls: AtomicUsize::new(0),
        }
    }

    /// Current region holding `key`, with its leader
    pub fn region_info(&self, key: &[u8]) -> RegionInfo {
        let state = self.state.lock();
        let region = state
            .regions
            .values()
            .find(|r| r.contains(key))
            .expect("key space is fully covered");
        state.info(region)
    }

    /// All regions in key order
    pub fn regions(&self) -> Vec<Region> {
        self.state.lock().regions.values().cloned().collect()
    }

    pub fn boundaries(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .regions
            .keys()
            .filter(|k| !k.is_empty())
            .cloned()
            .collect()
    }

    pub fn set_leader(&self, region_id: RegionId, store_id: StoreId) {
        self.state.lock().leaders.insert(region_id, store_id);
    }

    /// Move a region to `epoch`, as a conf change elsewhere would
    pub fn set_epoch(&self, region_id: RegionId, epoch: RegionEpoch) {
        let mut state = self.state.lock();
        if let Some(region) = state.regions.values_mut().find(|r| r.id == region_id) {
            region.epoch = epoch;
        }
    }

    pub fn inject(&self, error: RegionError) {
        self.injected.lock().push_back(error);
    }

    pub fn inject_many(&self, error: RegionError, times: usize) {
        for _ in 0..times {
            self.inject(error.clone());
        }
    }

    pub fn override_lookup(&self, region_id: RegionId, answer: Option<RegionInfo>) {
        self.lookup_overrides.lock().insert(region_id, answer);
    }

    pub fn fail_scatter(&self, region_id: RegionId) {
        self.failing_scatters.lock().push(region_id);
    }

    pub fn set_scatter_running_polls(&self, polls: usize) {
        self.scatter_running_polls.store(polls, Ordering::SeqCst);
    }

    pub fn set_misleading_responses(&self, misleading: bool) {
        *self.misleading_responses.lock() = misleading;
    }

    pub fn set_leader_addr(&self, addr: impl Into<String>) {
        *self.leader_addr.lock() = addr.into();
    }

    pub fn split_calls(&self) -> Vec<(StoreId, SplitRegionRequest)> {
        self.split_calls.lock().clone()
    }

    pub fn scattered(&self) -> Vec<RegionId> {
        self.scattered.lock().clone()
    }

    pub fn operator_polls(&self, region_id: RegionId) -> usize {
        self.operator_polls.lock().get(&region_id).copied().unwrap_or(0)
    }

    pub fn store_fetches(&self) -> usize {
        self.store_fetches.load(Ordering::SeqCst)
    }

    pub fn region_by_id_calls(&self) -> usize {
        self.region_by_id_calls.load(Ordering::SeqCst)
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    fn region_error(error: RegionError) -> SplitRegionResponse {
        SplitRegionResponse {
            region_error: Some(error),
            ..Default::default()
        }
    }

    fn apply_split(&self, store: &Store, request: &SplitRegionRequest) -> SplitRegionResponse {
        let mut state = self.state.lock();
        let Some(region) = state.find_by_id(request.region_id).cloned() else {
            return Self::region_error(RegionError::RegionNotFound {
                region_id: request.region_id,
            });
        };
        if region.epoch != request.epoch {
            return Self::region_error(RegionError::EpochNotMatch {
                current_regions: vec![region],
            });
        }

        let leader_store = state.leaders.get(&region.id).copied().unwrap_or(1);
        if store.id != leader_store || request.peer.store_id != leader_store {
            return Self::region_error(RegionError::NotLeader {
                region_id: region.id,
                leader: region.peer_on_store(leader_store).cloned(),
            });
        }
        if let Some(key) = request
            .split_keys
            .iter()
            .find(|k| !region.contains_interior(k))
        {
            return Self::region_error(RegionError::KeyNotInRegion {
                key: key.clone(),
                region_id: region.id,
                start_key: region.start_key.clone(),
                end_key: region.end_key.clone(),
            });
        }

        let epoch = RegionEpoch::new(
            region.epoch.conf_ver,
            region.epoch.version + request.split_keys.len() as u64,
        );
        let mut bounds = vec![region.start_key.clone()];
        bounds.extend(request.split_keys.iter().cloned());
        bounds.push(region.end_key.clone());

        let mut produced = Vec::with_capacity(bounds.len() - 1);
        for (i, pair) in bounds.windows(2).enumerate() {
            let id = if i == 0 { region.id } else { state.alloc_id() };
            let peers = if i == 0 {
                region.peers.clone()
            } else {
                region
                    .peers
                    .iter()
                    .map(|p| Peer::new(id * 100 + p.store_id, p.store_id))
                    .collect()
            };
            let child = Region::new(id, pair[0].clone(), pair[1].clone(), epoch, peers);
            state.leaders.insert(id, leader_store);
            state.regions.insert(pair[0].clone(), child.clone());
            produced.push(child);
        }

        if *self.misleading_responses.lock() {
            produced.reverse();
            SplitRegionResponse {
                region_error: None,
                left: produced.first().cloned(),
                regions: produced,
            }
        } else {
            SplitRegionResponse {
                region_error: None,
                left: None,
                regions: produced,
            }
        }
    }
}

#[async_trait]
impl PdClient for MockCluster {
    async fn get_store(&self, store_id: StoreId) -> Result<Store> {
        self.store_fetches.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .stores
            .get(&store_id)
            .cloned()
            .ok_or(Error::StoreNotFound(store_id))
    }

    async fn get_region(&self, key: &[u8]) -> Result<Option<RegionInfo>> {
        let state = self.state.lock();
        Ok(state
            .regions
            .values()
            .find(|r| r.contains(key))
            .map(|r| state.info(r)))
    }

    async fn get_region_by_id(&self, region_id: RegionId) -> Result<Option<RegionInfo>> {
        self.region_by_id_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(answer) = self.lookup_overrides.lock().get(&region_id) {
            return Ok(answer.clone());
        }
        let state = self.state.lock();
        Ok(state.find_by_id(region_id).map(|r| state.info(r)))
    }

    async fn scan_regions(
        &self,
        key: &[u8],
        end_key: &[u8],
        limit: usize,
    ) -> Result<Vec<RegionInfo>> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        Ok(state
            .regions
            .values()
            .filter(|r| r.end_key.is_empty() || r.end_key.as_slice() > key)
            .filter(|r| end_key.is_empty() || r.start_key.as_slice() < end_key)
            .take(limit)
            .map(|r| state.info(r))
            .collect())
    }

    async fn scatter_region(&self, region_id: RegionId) -> Result<()> {
        if self.failing_scatters.lock().contains(&region_id) {
            return Err(Error::Pd(format!("scatter region {} rejected", region_id)));
        }
        self.scattered.lock().push(region_id);
        Ok(())
    }

    async fn get_operator(&self, region_id: RegionId) -> Result<Option<OperatorInfo>> {
        if !self.scattered.lock().contains(&region_id) {
            return Ok(None);
        }
        let mut polls = self.operator_polls.lock();
        let count = polls.entry(region_id).or_insert(0);
        *count += 1;
        let status = if *count <= self.scatter_running_polls.load(Ordering::SeqCst) {
            OperatorStatus::Running
        } else {
            OperatorStatus::Success
        };
        Ok(Some(OperatorInfo {
            region_id,
            desc: "scatter-region".to_string(),
            status,
            kind: "admin,region".to_string(),
        }))
    }

    fn leader_addr(&self) -> String {
        self.leader_addr.lock().clone()
    }
}

#[async_trait]
impl StoreTransport for MockCluster {
    async fn split_region(
        &self,
        store: &Store,
        request: SplitRegionRequest,
    ) -> Result<SplitRegionResponse> {
        self.split_calls.lock().push((store.id, request.clone()));
        if let Some(error) = self.injected.lock().pop_front() {
            return Ok(Self::region_error(error));
        }
        Ok(self.apply_split(store, &request))
    }
}
