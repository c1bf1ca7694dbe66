//! Region split and scatter client for restore
//!
//! Re-materializes backed-up key ranges as cluster regions: splits regions
//! at range boundaries (repairing stale leadership along the way), scatters
//! the new regions, and brackets online restores with placement rules.

pub mod config;
pub mod error;
pub mod executor;
pub mod online;
pub mod pd_client;
pub mod placement;
pub mod security;
pub mod split_client;
pub mod splitter;
pub mod store_cache;
pub mod transport;

pub use config::{Config, ConfigError};
pub use error::{Error, ErrorHistory, Result};
pub use executor::{SplitExecutor, SplitResult, SPLIT_REGION_MAX_RETRY_TIMES};
pub use online::OnlineRestore;
pub use pd_client::{HttpPdClient, OperatorInfo, OperatorStatus, PdClient};
pub use placement::{LabelConstraint, LabelConstraintOp, PlacementApi, PlacementRule, RuleRole};
pub use split_client::{RegionClient, SplitClient};
pub use splitter::{RegionSplitter, SplitSummary};
pub use store_cache::StoreCache;
pub use transport::{GrpcTransport, RegionError, SplitRegionRequest, SplitRegionResponse, StoreTransport};
