pub mod config;
pub mod error;
pub mod filter;
pub mod locks;
pub mod path;
pub mod types;

pub use error::{RdriveError, RdriveResult};

/// Generated gRPC types and service traits (from rdrive.proto)
pub mod proto {
    tonic::include_proto!("rdrive");
}
