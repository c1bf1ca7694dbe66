//! Split client
//!
//! The whole surface the planner and the restore orchestration depend on:
//! region lookup, split, scatter, operator status and the placement side
//! channel.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use br_core::{RegionId, RegionInfo, Store, StoreId};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::SplitExecutor;
use crate::pd_client::{HttpPdClient, OperatorInfo, PdClient};
use crate::placement::{PlacementApi, PlacementRule};
use crate::security::{build_http_client, TlsMaterial};
use crate::store_cache::StoreCache;
use crate::transport::{GrpcTransport, StoreTransport};

#[async_trait]
pub trait SplitClient: Send + Sync {
    async fn get_store(&self, store_id: StoreId) -> Result<Store>;

    async fn get_region(&self, key: &[u8]) -> Result<Option<RegionInfo>>;

    async fn get_region_by_id(&self, region_id: RegionId) -> Result<Option<RegionInfo>>;

    async fn scan_regions(
        &self,
        key: &[u8],
        end_key: &[u8],
        limit: usize,
    ) -> Result<Vec<RegionInfo>>;

    /// Split at a single key, returning the region that keeps the original
    /// start key
    async fn split_region(&self, region: &RegionInfo, key: &[u8]) -> Result<RegionInfo>;

    /// Split at many keys in one RPC, returning `(origin, new regions)`
    async fn batch_split_regions_with_origin(
        &self,
        region: &RegionInfo,
        keys: &[Vec<u8>],
    ) -> Result<(RegionInfo, Vec<RegionInfo>)>;

    /// Split at many keys in one RPC, returning only the new regions
    async fn batch_split_regions(
        &self,
        region: &RegionInfo,
        keys: &[Vec<u8>],
    ) -> Result<Vec<RegionInfo>> {
        let (_, new_regions) = self.batch_split_regions_with_origin(region, keys).await?;
        Ok(new_regions)
    }

    async fn scatter_region(&self, region: &RegionInfo) -> Result<()>;

    async fn get_operator_status(&self, region_id: RegionId) -> Result<Option<OperatorInfo>>;

    async fn get_placement_rule(&self, group_id: &str, rule_id: &str) -> Result<PlacementRule>;

    async fn set_placement_rule(&self, rule: &PlacementRule) -> Result<()>;

    async fn delete_placement_rule(&self, group_id: &str, rule_id: &str) -> Result<()>;

    /// Label stores sequentially; a failure leaves earlier stores labeled
    async fn set_stores_label(&self, store_ids: &[StoreId], key: &str, value: &str) -> Result<()>;
}

/// Split client backed by the metadata service and storage-node RPCs
pub struct RegionClient {
    pd: Arc<dyn PdClient>,
    stores: Arc<StoreCache>,
    executor: SplitExecutor,
    placement: PlacementApi,
}

impl RegionClient {
    pub fn new(
        pd: Arc<dyn PdClient>,
        transport: Arc<dyn StoreTransport>,
        placement: PlacementApi,
    ) -> Self {
        let stores = Arc::new(StoreCache::new());
        let executor = SplitExecutor::new(pd.clone(), transport, stores.clone());
        Self {
            pd,
            stores,
            executor,
            placement,
        }
    }

    /// Build the client from configuration: discover the metadata service
    /// leader and prepare TLS for both channels
    pub async fn connect(config: &Config) -> Result<Self> {
        let tls = TlsMaterial::load(&config.security)?;
        let http = build_http_client(tls.as_ref(), config.pd.request_timeout())?;
        let tls_enabled = tls.is_some();

        let pd = HttpPdClient::connect(config.pd.endpoints.clone(), http.clone(), tls_enabled).await?;
        let transport = GrpcTransport::new(
            config.pd.connect_timeout(),
            tls.as_ref().map(TlsMaterial::grpc_config),
        );
        info!(
            "Split client connected to {} (tls: {})",
            pd.leader_addr(),
            tls_enabled
        );

        Ok(Self::new(
            Arc::new(pd),
            Arc::new(transport),
            PlacementApi::new(http, tls_enabled),
        ))
    }

    pub fn store_cache(&self) -> &StoreCache {
        &self.stores
    }
}

#[async_trait]
impl SplitClient for RegionClient {
    async fn get_store(&self, store_id: StoreId) -> Result<Store> {
        self.stores.get_or_fetch(store_id, self.pd.as_ref()).await
    }

    async fn get_region(&self, key: &[u8]) -> Result<Option<RegionInfo>> {
        self.pd.get_region(key).await
    }

    async fn get_region_by_id(&self, region_id: RegionId) -> Result<Option<RegionInfo>> {
        self.pd.get_region_by_id(region_id).await
    }

    async fn scan_regions(
        &self,
        key: &[u8],
        end_key: &[u8],
        limit: usize,
    ) -> Result<Vec<RegionInfo>> {
        self.pd.scan_regions(key, end_key, limit).await
    }

    async fn split_region(&self, region: &RegionInfo, key: &[u8]) -> Result<RegionInfo> {
        let result = self.executor.split(region, &[key.to_vec()]).await?;
        result
            .regions()
            .into_iter()
            .find(|r| r.region.start_key == region.region.start_key)
            .ok_or(Error::OriginRegionMissing(region.id()))
    }

    async fn batch_split_regions_with_origin(
        &self,
        region: &RegionInfo,
        keys: &[Vec<u8>],
    ) -> Result<(RegionInfo, Vec<RegionInfo>)> {
        let result = self.executor.split(region, keys).await?;
        Ok((result.origin, result.new_regions))
    }

    async fn scatter_region(&self, region: &RegionInfo) -> Result<()> {
        self.pd.scatter_region(region.id()).await?;
        info!("Scatter region {} requested", region.id());
        Ok(())
    }

    async fn get_operator_status(&self, region_id: RegionId) -> Result<Option<OperatorInfo>> {
        self.pd.get_operator(region_id).await
    }

    async fn get_placement_rule(&self, group_id: &str, rule_id: &str) -> Result<PlacementRule> {
        self.placement
            .get_rule(&self.pd.leader_addr(), group_id, rule_id)
            .await
    }

    async fn set_placement_rule(&self, rule: &PlacementRule) -> Result<()> {
        self.placement.set_rule(&self.pd.leader_addr(), rule).await
    }

    async fn delete_placement_rule(&self, group_id: &str, rule_id: &str) -> Result<()> {
        self.placement
            .delete_rule(&self.pd.leader_addr(), group_id, rule_id)
            .await
    }

    async fn set_stores_label(&self, store_ids: &[StoreId], key: &str, value: &str) -> Result<()> {
        self.placement
            .set_stores_label(&self.pd.leader_addr(), store_ids, key, value)
            .await
    }
}
