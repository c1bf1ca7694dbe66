// build.rs
use tonic_prost_build::configure;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only the client side of the storage-node service is needed
    configure().build_server(false).compile_protos(
        &[
            "proto/metapb.proto",
            "proto/errorpb.proto",
            "proto/kvrpcpb.proto",
            "proto/tikvpb.proto",
        ],
        &["proto/"],
    )?;

    Ok(())
}
