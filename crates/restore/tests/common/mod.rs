#![allow(dead_code)]

pub mod fake_pd;
pub mod mock_cluster;

use std::sync::Arc;

use restore::{PlacementApi, RegionClient};

use mock_cluster::MockCluster;

/// Split client wired to an in-memory cluster
pub fn region_client(cluster: &Arc<MockCluster>) -> RegionClient {
    RegionClient::new(
        cluster.clone(),
        cluster.clone(),
        PlacementApi::new(reqwest::Client::new(), false),
    )
}
