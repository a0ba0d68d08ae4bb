pub mod client;
pub mod protocol;
pub mod server;

// Re-export generated protobuf types
pub mod pb {
    tonic::include_proto!("kv_udf");
}

pub use client::{Client, ClientConfig, ClientError};
pub use protocol::{Record, RecordKey, UdfArg, UdfCall};
pub use server::{KvUdfServer, ServerConfig};
