//! In-memory single-node server.
//!
//! Stands in for a full cluster node: records live in a concurrent map and
//! "UDFs" are host-side closures registered per (module, function). That is
//! enough to serve the execute control plane for demos and tests without a
//! server-side UDF language runtime.

use crate::pb::record_service_server::{RecordService, RecordServiceServer};
use crate::pb::{
    ErrorCode, ExecuteRequest, ExecuteResponse, HandshakeRequest, HandshakeResponse,
};
use crate::protocol::{Record, RecordKey};
use anyhow::Result;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// A registered UDF: runs against one record with the decoded arguments.
pub type UdfHandler = Arc<dyn Fn(&Record, &[Value]) -> Result<Value, String> + Send + Sync>;

/// Server configuration
#[derive(Clone, Debug, Default)]
pub struct ServerConfig {
    /// Server node ID
    pub node_id: u32,
    /// Required username; `None` accepts anonymous clients.
    pub user: Option<String>,
    /// Required password.
    pub password: Option<String>,
}

/// Why an execute request failed.
enum ExecError {
    NotFound,
    Udf(String),
}

/// Record store plus UDF registry.
pub struct KvUdfServer {
    config: ServerConfig,
    /// Records: key -> bins
    records: DashMap<RecordKey, Record>,
    /// Registered UDFs: (module, function) -> handler
    udfs: RwLock<HashMap<(String, String), UdfHandler>>,
}

impl KvUdfServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
            udfs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a UDF under (module, function).
    pub fn register_udf<F>(&self, module: &str, function: &str, handler: F)
    where
        F: Fn(&Record, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.udfs
            .write()
            .insert((module.to_string(), function.to_string()), Arc::new(handler));
    }

    /// Insert or replace a record.
    pub fn insert_record(&self, key: RecordKey, record: Record) {
        self.records.insert(key, record);
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Load records from a JSON seed file.
    pub fn seed_from_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let data = std::fs::read(path)?;
        let seeds: Vec<SeedRecord> = serde_json::from_slice(&data)?;
        let count = seeds.len();
        for seed in seeds {
            self.insert_record(
                RecordKey::new(seed.namespace, seed.set, seed.key),
                Record { bins: seed.bins },
            );
        }
        Ok(count)
    }

    /// Get the gRPC service for this server
    pub fn into_service(self) -> RecordServiceServer<RecordServiceImpl> {
        RecordServiceServer::new(RecordServiceImpl {
            inner: Arc::new(self),
        })
    }

    /// Resolve the record and the handler, then run the UDF.
    fn apply(
        &self,
        key: &RecordKey,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value, ExecError> {
        let record = self
            .records
            .get(key)
            .map(|entry| entry.clone())
            .ok_or(ExecError::NotFound)?;

        let handler = self
            .udfs
            .read()
            .get(&(module.to_string(), function.to_string()))
            .cloned()
            .ok_or_else(|| {
                ExecError::Udf(format!("unknown UDF {}.{}", module, function))
            })?;

        handler(&record, args).map_err(ExecError::Udf)
    }
}

/// One record in a seed file.
#[derive(Debug, Deserialize)]
struct SeedRecord {
    namespace: String,
    set: String,
    key: String,
    #[serde(default)]
    bins: serde_json::Map<String, Value>,
}

/// gRPC service implementation wrapper
pub struct RecordServiceImpl {
    inner: Arc<KvUdfServer>,
}

impl RecordServiceImpl {
    fn credentials_ok(&self, user: &str, password: &str) -> bool {
        match (&self.inner.config.user, &self.inner.config.password) {
            (None, None) => true,
            (expected_user, expected_password) => {
                expected_user.as_deref().unwrap_or_default() == user
                    && expected_password.as_deref().unwrap_or_default() == password
            }
        }
    }
}

#[tonic::async_trait]
impl RecordService for RecordServiceImpl {
    async fn handshake(
        &self,
        request: Request<HandshakeRequest>,
    ) -> Result<Response<HandshakeResponse>, Status> {
        let req = request.into_inner();

        if !self.credentials_ok(&req.user, &req.password) {
            tracing::warn!("Handshake rejected for user {:?}", req.user);
            return Ok(Response::new(HandshakeResponse {
                ok: false,
                node_id: self.inner.config.node_id,
                message: "invalid credentials".to_string(),
            }));
        }

        tracing::info!("Handshake accepted");
        Ok(Response::new(HandshakeResponse {
            ok: true,
            node_id: self.inner.config.node_id,
            message: String::new(),
        }))
    }

    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        let req = request.into_inner();

        let key: RecordKey = match req.key.as_ref() {
            Some(pb_key) => pb_key.into(),
            None => return Ok(error_response(ErrorCode::BadRequest, "missing record key")),
        };

        tracing::debug!("EXECUTE {}.{} on {}", req.module, req.function, key);

        let mut args = Vec::with_capacity(req.args.len());
        for raw in &req.args {
            match serde_json::from_slice(raw) {
                Ok(v) => args.push(v),
                Err(e) => {
                    return Ok(error_response(
                        ErrorCode::BadRequest,
                        &format!("malformed argument: {}", e),
                    ))
                }
            }
        }

        match self.inner.apply(&key, &req.module, &req.function, &args) {
            Ok(value) => {
                let result = serde_json::to_vec(&value)
                    .map_err(|e| Status::internal(format!("encode result: {}", e)))?;
                Ok(Response::new(ExecuteResponse {
                    code: ErrorCode::Ok as i32,
                    message: String::new(),
                    result,
                }))
            }
            Err(ExecError::NotFound) => {
                tracing::debug!("EXECUTE miss on {}", key);
                Ok(error_response(ErrorCode::NotFound, "record not found"))
            }
            Err(ExecError::Udf(message)) => {
                tracing::warn!("EXECUTE failed on {}: {}", key, message);
                Ok(error_response(ErrorCode::UdfError, &message))
            }
        }
    }
}

fn error_response(code: ErrorCode, message: &str) -> Response<ExecuteResponse> {
    Response::new(ExecuteResponse {
        code: code as i32,
        message: message.to_string(),
        result: Vec::new(),
    })
}

/// Serve on the given address until shutdown.
pub async fn run_server(server: KvUdfServer, listen_addr: &str) -> Result<()> {
    let addr = listen_addr.parse()?;

    tracing::info!("Starting kv-udf server on {}", addr);

    tonic::transport::Server::builder()
        .add_service(server.into_service())
        .serve(addr)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn demo_key() -> RecordKey {
        RecordKey::new("test", "demo", "k1")
    }

    fn server_with_record() -> KvUdfServer {
        let server = KvUdfServer::new(ServerConfig::default());
        let mut record = Record::new();
        record.set_bin("a", json!(1));
        server.insert_record(demo_key(), record);
        server
    }

    #[test]
    fn apply_runs_registered_udf() {
        let server = server_with_record();
        server.register_udf("records", "bin", |record, args| {
            let name = args
                .first()
                .and_then(Value::as_str)
                .ok_or("bin name required")?;
            record.bin(name).cloned().ok_or_else(|| format!("no bin {}", name))
        });

        let value = server
            .apply(&demo_key(), "records", "bin", &[json!("a")])
            .map_err(|_| "apply failed")
            .unwrap();
        assert_eq!(value, json!(1));
    }

    #[test]
    fn apply_misses_absent_record() {
        let server = server_with_record();
        server.register_udf("m", "f", |_, _| Ok(Value::Null));

        let missing = RecordKey::new("test", "demo", "absent");
        assert!(matches!(
            server.apply(&missing, "m", "f", &[]),
            Err(ExecError::NotFound)
        ));
    }

    #[test]
    fn apply_reports_unknown_udf() {
        let server = server_with_record();
        match server.apply(&demo_key(), "nope", "nothing", &[]) {
            Err(ExecError::Udf(message)) => assert!(message.contains("unknown UDF")),
            _ => panic!("expected a UDF error"),
        }
    }

    #[test]
    fn apply_surfaces_handler_error() {
        let server = server_with_record();
        server.register_udf("m", "boom", |_, _| Err("it broke".to_string()));
        match server.apply(&demo_key(), "m", "boom", &[]) {
            Err(ExecError::Udf(message)) => assert_eq!(message, "it broke"),
            _ => panic!("expected a UDF error"),
        }
    }

    #[test]
    fn seed_file_loads_records() {
        let dir = std::env::temp_dir().join("kv_udf_seed_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seed.json");
        std::fs::write(
            &path,
            r#"[{"namespace":"test","set":"demo","key":"s1","bins":{"a":1}}]"#,
        )
        .unwrap();

        let server = KvUdfServer::new(ServerConfig::default());
        let count = server.seed_from_file(&path).unwrap();
        assert_eq!(count, 1);
        assert_eq!(server.record_count(), 1);
    }
}
