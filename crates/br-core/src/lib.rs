//! Core region model for restore
//!
//! Provides the value types shared by the split/scatter client:
//! - Store and peer metadata
//! - Regions, epochs and the client-side `RegionInfo` handle
//! - Key ranges recovered from a backup archive

pub mod keys;
pub mod range;
pub mod region;

// Re-export commonly used types
pub use keys::format_key;
pub use range::{sort_ranges, span, KeyRange, RangeError};
pub use region::{
    Peer, PeerId, PeerRole, Region, RegionEpoch, RegionId, RegionInfo, Store, StoreId, StoreLabel,
};
