//! Metadata service client
//!
//! Region lookup, store lookup, scatter and operator status over the
//! metadata service's JSON HTTP API. No retries live here; callers decide.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use br_core::{format_key, Peer, Region, RegionEpoch, RegionId, RegionInfo, Store, StoreId};

use crate::error::{Error, Result};
use crate::placement::normalize_api_addr;

/// Metadata service capability consumed by the locator and scatter paths
#[async_trait]
pub trait PdClient: Send + Sync {
    /// Fetch store metadata
    async fn get_store(&self, store_id: StoreId) -> Result<Store>;

    /// Region whose `[start, end)` contains `key`
    async fn get_region(&self, key: &[u8]) -> Result<Option<RegionInfo>>;

    async fn get_region_by_id(&self, region_id: RegionId) -> Result<Option<RegionInfo>>;

    /// Up to `limit` regions in key order, starting from the region that
    /// contains `key`. An empty `end_key` scans to the end of the key space.
    async fn scan_regions(
        &self,
        key: &[u8],
        end_key: &[u8],
        limit: usize,
    ) -> Result<Vec<RegionInfo>>;

    /// Ask the scheduler to redistribute the region's replicas
    async fn scatter_region(&self, region_id: RegionId) -> Result<()>;

    /// Current scheduling operator of a region, if any
    async fn get_operator(&self, region_id: RegionId) -> Result<Option<OperatorInfo>>;

    /// HTTP address of the current metadata service leader
    fn leader_addr(&self) -> String;
}

/// Scheduling operator status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorStatus {
    Success,
    Timeout,
    Cancel,
    Replace,
    Running,
}

/// Operator document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorInfo {
    pub region_id: RegionId,
    /// Operator description, `scatter-region` for scatters
    pub desc: String,
    pub status: OperatorStatus,
    #[serde(default)]
    pub kind: String,
}

pub const SCATTER_REGION_OPERATOR: &str = "scatter-region";

impl OperatorInfo {
    /// Whether a scatter is still moving this region's replicas
    pub fn is_running_scatter(&self) -> bool {
        self.desc == SCATTER_REGION_OPERATOR && self.status == OperatorStatus::Running
    }
}

/// Region document of the metadata service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionDoc {
    pub id: RegionId,
    #[serde(default, with = "br_core::keys::hex_bytes")]
    pub start_key: Vec<u8>,
    #[serde(default, with = "br_core::keys::hex_bytes")]
    pub end_key: Vec<u8>,
    #[serde(default)]
    pub epoch: RegionEpoch,
    #[serde(default)]
    pub peers: Vec<Peer>,
    #[serde(default)]
    pub leader: Option<Peer>,
}

impl From<RegionDoc> for RegionInfo {
    fn from(doc: RegionDoc) -> Self {
        RegionInfo::new(
            Region::new(doc.id, doc.start_key, doc.end_key, doc.epoch, doc.peers),
            doc.leader,
        )
    }
}

impl From<&RegionInfo> for RegionDoc {
    fn from(info: &RegionInfo) -> Self {
        RegionDoc {
            id: info.region.id,
            start_key: info.region.start_key.clone(),
            end_key: info.region.end_key.clone(),
            epoch: info.region.epoch,
            peers: info.region.peers.clone(),
            leader: info.leader.clone(),
        }
    }
}

/// Store lookup response
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreDoc {
    pub store: Store,
}

/// Region scan response
#[derive(Debug, Serialize, Deserialize)]
pub struct RegionsDoc {
    pub count: usize,
    #[serde(default)]
    pub regions: Vec<RegionDoc>,
}

/// Leader lookup response
#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderDoc {
    #[serde(default)]
    pub client_urls: Vec<String>,
}

/// Scatter request body
#[derive(Debug, Serialize, Deserialize)]
pub struct OperatorRequest {
    pub name: String,
    pub region_id: RegionId,
}

/// Metadata service client over HTTP
pub struct HttpPdClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    tls: bool,
    leader: RwLock<String>,
}

impl HttpPdClient {
    /// Discover the leader among `endpoints` and build the client
    pub async fn connect(endpoints: Vec<String>, http: reqwest::Client, tls: bool) -> Result<Self> {
        let client = Self {
            http,
            endpoints,
            tls,
            leader: RwLock::new(String::new()),
        };
        client.refresh_leader().await?;
        Ok(client)
    }

    /// Re-run leader discovery against the configured endpoints
    pub async fn refresh_leader(&self) -> Result<String> {
        for endpoint in &self.endpoints {
            let Some(base) = normalize_api_addr(endpoint, self.tls) else {
                continue;
            };
            match self.fetch_leader(&base).await {
                Ok(Some(leader)) => {
                    info!("Metadata service leader: {} (via {})", leader, base);
                    *self.leader.write() = leader.clone();
                    return Ok(leader);
                }
                Ok(None) => warn!("Endpoint {} reported no leader", base),
                Err(e) => warn!("Failed to query leader from {}: {}", base, e),
            }
        }
        Err(Error::PdLeaderNotFound)
    }

    async fn fetch_leader(&self, base: &str) -> Result<Option<String>> {
        let url = format!("{}/pd/api/v1/leader", base);
        let resp = self.http.get(&url).send().await?;
        let doc: LeaderDoc = check_status(resp, &url).await?.json().await?;
        Ok(doc
            .client_urls
            .first()
            .and_then(|addr| normalize_api_addr(addr, self.tls)))
    }

    fn url(&self, path: &str) -> Result<String> {
        let leader = self.leader.read();
        if leader.is_empty() {
            return Err(Error::PdLeaderNotFound);
        }
        Ok(format!("{}{}", leader, path))
    }

    /// GET a JSON document; 404 maps to `None`
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.url(path)?;
        let resp = self.http.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc = check_status(resp, &url).await?.json().await?;
        Ok(Some(doc))
    }
}

/// Map non-2xx responses to `Error::Pd`
pub(crate) async fn check_status(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Pd(format!("{} returned {}: {}", url, status, body)))
}

#[async_trait]
impl PdClient for HttpPdClient {
    async fn get_store(&self, store_id: StoreId) -> Result<Store> {
        let doc: Option<StoreDoc> = self
            .get_optional(&format!("/pd/api/v1/store/{}", store_id))
            .await?;
        doc.map(|d| d.store).ok_or(Error::StoreNotFound(store_id))
    }

    async fn get_region(&self, key: &[u8]) -> Result<Option<RegionInfo>> {
        let doc: Option<RegionDoc> = self
            .get_optional(&format!("/pd/api/v1/region/key/{}", hex::encode_upper(key)))
            .await?;
        Ok(doc.map(RegionInfo::from))
    }

    async fn get_region_by_id(&self, region_id: RegionId) -> Result<Option<RegionInfo>> {
        let doc: Option<RegionDoc> = self
            .get_optional(&format!("/pd/api/v1/region/id/{}", region_id))
            .await?;
        Ok(doc.map(RegionInfo::from))
    }

    async fn scan_regions(
        &self,
        key: &[u8],
        end_key: &[u8],
        limit: usize,
    ) -> Result<Vec<RegionInfo>> {
        let path = format!(
            "/pd/api/v1/regions/key?key={}&end_key={}&limit={}",
            hex::encode_upper(key),
            hex::encode_upper(end_key),
            limit
        );
        let url = self.url(&path)?;
        let resp = self.http.get(&url).send().await?;
        let doc: RegionsDoc = check_status(resp, &url).await?.json().await?;
        debug!(
            "Scanned {} regions from {} to {}",
            doc.count,
            format_key(key),
            format_key(end_key)
        );
        Ok(doc.regions.into_iter().map(RegionInfo::from).collect())
    }

    async fn scatter_region(&self, region_id: RegionId) -> Result<()> {
        let url = self.url("/pd/api/v1/operators")?;
        let body = OperatorRequest {
            name: SCATTER_REGION_OPERATOR.to_string(),
            region_id,
        };
        let resp = self.http.post(&url).json(&body).send().await?;
        check_status(resp, &url).await?;
        Ok(())
    }

    async fn get_operator(&self, region_id: RegionId) -> Result<Option<OperatorInfo>> {
        self.get_optional(&format!("/pd/api/v1/operators/{}", region_id))
            .await
    }

    fn leader_addr(&self) -> String {
        self.leader.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        http::StatusCode as AxumStatus,
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };
    use std::collections::HashMap;

    fn region_doc(id: RegionId, start: &str, end: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "start_key": hex::encode_upper(start),
            "end_key": hex::encode_upper(end),
            "epoch": {"conf_ver": 1, "version": 3},
            "peers": [{"id": id * 10 + 1, "store_id": 1}, {"id": id * 10 + 2, "store_id": 2}],
            "leader": {"id": id * 10 + 2, "store_id": 2}
        })
    }

    async fn get_store(Path(id): Path<u64>) -> impl IntoResponse {
        if id == 1 {
            (
                AxumStatus::OK,
                Json(serde_json::json!({"store": {"id": 1, "address": "127.0.0.1:20160"}})),
            )
        } else {
            (AxumStatus::NOT_FOUND, Json(serde_json::json!({})))
        }
    }

    async fn get_region_by_id(Path(id): Path<u64>) -> impl IntoResponse {
        if id == 2 {
            (AxumStatus::OK, Json(region_doc(2, "a", "m")))
        } else {
            (AxumStatus::NOT_FOUND, Json(serde_json::json!({})))
        }
    }

    async fn get_region_by_key(Path(key): Path<String>) -> impl IntoResponse {
        let key = hex::decode(&key).unwrap_or_default();
        if key.as_slice() >= b"a".as_slice() && key.as_slice() < b"m".as_slice() {
            (AxumStatus::OK, Json(region_doc(2, "a", "m")))
        } else if key.as_slice() >= b"m".as_slice() {
            (AxumStatus::OK, Json(region_doc(3, "m", "")))
        } else {
            (AxumStatus::NOT_FOUND, Json(serde_json::json!({})))
        }
    }

    async fn scan(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
        assert_eq!(params.get("key").map(String::as_str), Some("61"));
        assert_eq!(params.get("limit").map(String::as_str), Some("2"));
        Json(serde_json::json!({
            "count": 2,
            "regions": [region_doc(2, "a", "m"), region_doc(3, "m", "")]
        }))
    }

    async fn scatter(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
        if body["name"] == SCATTER_REGION_OPERATOR {
            AxumStatus::OK
        } else {
            AxumStatus::BAD_REQUEST
        }
    }

    async fn get_operator(Path(id): Path<u64>) -> impl IntoResponse {
        if id == 2 {
            (
                AxumStatus::OK,
                Json(serde_json::json!({
                    "region_id": 2,
                    "desc": "scatter-region",
                    "status": "RUNNING",
                    "kind": "admin,region"
                })),
            )
        } else {
            (AxumStatus::NOT_FOUND, Json(serde_json::json!({})))
        }
    }

    async fn serve() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let leader = format!("http://{}", addr);
        let app = Router::new()
            .route(
                "/pd/api/v1/leader",
                get(move || {
                    let leader = leader.clone();
                    async move { Json(serde_json::json!({ "client_urls": [leader] })) }
                }),
            )
            .route("/pd/api/v1/store/:id", get(get_store))
            .route("/pd/api/v1/region/id/:id", get(get_region_by_id))
            .route("/pd/api/v1/region/key/:key", get(get_region_by_key))
            .route("/pd/api/v1/regions/key", get(scan))
            .route("/pd/api/v1/operators", post(scatter))
            .route("/pd/api/v1/operators/:id", get(get_operator));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_leader_discovery_skips_dead_endpoint() {
        let addr = serve().await;
        let client = HttpPdClient::connect(
            vec!["127.0.0.1:1".to_string(), addr.clone()],
            reqwest::Client::new(),
            false,
        )
        .await
        .unwrap();
        assert_eq!(client.leader_addr(), format!("http://{}", addr));
    }

    #[tokio::test]
    async fn test_no_reachable_endpoint() {
        let err = HttpPdClient::connect(vec!["127.0.0.1:1".to_string()], reqwest::Client::new(), false)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::PdLeaderNotFound));
    }

    #[tokio::test]
    async fn test_store_and_region_lookup() {
        let addr = serve().await;
        let client = HttpPdClient::connect(vec![addr], reqwest::Client::new(), false)
            .await
            .unwrap();

        let store = client.get_store(1).await.unwrap();
        assert_eq!(store.address, "127.0.0.1:20160");
        assert!(matches!(
            client.get_store(9).await.unwrap_err(),
            Error::StoreNotFound(9)
        ));

        let region = client.get_region_by_id(2).await.unwrap().unwrap();
        assert_eq!(region.region.start_key, b"a".to_vec());
        assert_eq!(region.epoch(), RegionEpoch::new(1, 3));
        assert_eq!(region.confirmed_leader().unwrap().store_id, 2);
        assert!(client.get_region_by_id(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_region_lookup_by_key() {
        let addr = serve().await;
        let client = HttpPdClient::connect(vec![addr], reqwest::Client::new(), false)
            .await
            .unwrap();

        let region = client.get_region(b"c").await.unwrap().unwrap();
        assert_eq!(region.id(), 2);
        assert_eq!(region.region.end_key, b"m".to_vec());
        assert_eq!(region.confirmed_leader().unwrap().id, 22);

        let last = client.get_region(b"q").await.unwrap().unwrap();
        assert_eq!(last.id(), 3);
        assert!(last.region.end_key.is_empty());

        assert!(client.get_region(b"0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_scatter_and_operator() {
        let addr = serve().await;
        let client = HttpPdClient::connect(vec![addr], reqwest::Client::new(), false)
            .await
            .unwrap();

        let regions = client.scan_regions(b"a", b"", 2).await.unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].region.start_key, b"m".to_vec());
        assert!(regions[1].region.end_key.is_empty());

        client.scatter_region(2).await.unwrap();

        let op = client.get_operator(2).await.unwrap().unwrap();
        assert!(op.is_running_scatter());
        assert!(client.get_operator(3).await.unwrap().is_none());
    }

    #[test]
    fn test_operator_status_wire_names() {
        let op: OperatorInfo = serde_json::from_str(
            r#"{"region_id": 5, "desc": "scatter-region", "status": "SUCCESS"}"#,
        )
        .unwrap();
        assert_eq!(op.status, OperatorStatus::Success);
        assert!(!op.is_running_scatter());

        let op = OperatorInfo {
            desc: "transfer-leader".to_string(),
            status: OperatorStatus::Running,
            ..op
        };
        assert!(!op.is_running_scatter());
    }
}
