//! Client for record-UDF execution.
//!
//! The client opens one gRPC channel, performs a handshake (which carries
//! any configured credentials), and then issues execute requests serially.
//! Retries and backoff are deliberately absent at this layer.

use crate::pb::record_service_client::RecordServiceClient;
use crate::pb::{ErrorCode, ExecuteRequest, HandshakeRequest};
use crate::protocol::{RecordKey, UdfCall};
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};

/// Client configuration. Built once from parsed flags, immutable thereafter.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connect and per-request timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Username for a secured node.
    pub user: Option<String>,
    /// Password for a secured node.
    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            timeout_ms: 10,
            user: None,
            password: None,
        }
    }
}

impl ClientConfig {
    fn endpoint_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Errors surfaced by [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("connection failed: {0}")]
    Connect(#[from] tonic::transport::Error),
    #[error("handshake rejected: {0}")]
    Handshake(String),
    #[error("record not found")]
    NotFound,
    #[error("{0}")]
    Udf(String),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::Status),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Record-UDF execution client.
pub struct Client {
    config: ClientConfig,
    grpc: Mutex<Option<RecordServiceClient<Channel>>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            grpc: Mutex::new(None),
        }
    }

    /// Connect to the server and perform the handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let url = self.config.endpoint_url();
        tracing::info!("Connecting to {}", url);

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let channel = Endpoint::from_shared(url)?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect()
            .await?;

        let mut client = RecordServiceClient::new(channel);

        let response = client
            .handshake(HandshakeRequest {
                user: self.config.user.clone().unwrap_or_default(),
                password: self.config.password.clone().unwrap_or_default(),
            })
            .await?
            .into_inner();

        if !response.ok {
            return Err(ClientError::Handshake(response.message));
        }

        tracing::info!("Connected to node {}", response.node_id);

        *self.grpc.lock() = Some(client);

        Ok(())
    }

    /// Apply a UDF to a single record and return its result value.
    pub async fn execute(&self, key: &RecordKey, call: &UdfCall) -> Result<Value, ClientError> {
        let mut grpc = self.grpc.lock().clone().ok_or(ClientError::NotConnected)?;

        let response = grpc
            .execute(ExecuteRequest {
                key: Some(key.into()),
                module: call.module.clone(),
                function: call.function.clone(),
                args: call.encode_args()?,
            })
            .await?
            .into_inner();

        match response.code() {
            ErrorCode::Ok => {
                if response.result.is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(serde_json::from_slice(&response.result)?)
                }
            }
            ErrorCode::NotFound => Err(ClientError::NotFound),
            ErrorCode::UdfError | ErrorCode::BadRequest => Err(ClientError::Udf(response.message)),
        }
    }

    /// Check if connected to server
    pub fn is_connected(&self) -> bool {
        self.grpc.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_starts_disconnected() {
        let client = Client::new(ClientConfig::default());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn execute_before_connect_is_an_error() {
        let client = Client::new(ClientConfig::default());
        let key = RecordKey::new("test", "demo", "k1");
        let call = UdfCall::new("m", "f");
        match client.execute(&key, &call).await {
            Err(ClientError::NotConnected) => {}
            other => panic!("expected NotConnected, got {:?}", other.map(|_| ())),
        }
    }
}
