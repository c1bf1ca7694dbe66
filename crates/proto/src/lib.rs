//! Wire protocol for the storage-node split RPC
//!
//! Generated from the cluster's protobuf definitions under `proto/`,
//! restricted to what the split client sends and reads.

// The include_proto! macro generates a module matching the proto package name
pub mod metapb {
    tonic::include_proto!("metapb");
}

pub mod errorpb {
    tonic::include_proto!("errorpb");
}

pub mod kvrpcpb {
    tonic::include_proto!("kvrpcpb");
}

pub mod tikvpb {
    tonic::include_proto!("tikvpb");
}

// Re-export commonly used types for convenience
pub use tikvpb::tikv_client::TikvClient;
