//! Generated gRPC types.

/// Machine control-plane API (served by keel-init).
pub mod machine {
    tonic::include_proto!("machine");
}

/// Container-runtime daemon API (client side only).
pub mod crt {
    tonic::include_proto!("crt");
}
