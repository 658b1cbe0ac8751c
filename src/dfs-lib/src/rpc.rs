//! Minimal JSON-RPC plumbing shared by both services: a request
//! envelope posted over HTTP, a method-dispatch handler trait, an
//! accept loop for the server side and a reqwest client for callers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::{DfsError, DfsResult};

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResult {
    Success(Value),
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub result: RpcResult,
    pub seq: u64,
}

#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle_rpc_call(&self, req: RpcRequest) -> DfsResult<Value>;
}

pub fn decode_params<T: DeserializeOwned>(params: Value) -> DfsResult<T> {
    serde_json::from_value(params)
        .map_err(|e| DfsError::InvalidParam(format!("failed to parse request: {}", e)))
}

pub fn encode_result<T: Serialize>(value: &T) -> DfsResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| DfsError::Internal(format!("failed to encode response: {}", e)))
}

pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<dyn RpcHandler>,
}

impl RpcServer {
    pub async fn bind(addr: &str, handler: Arc<dyn RpcHandler>) -> DfsResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DfsError::IoError(format!("bind {} failed: {}", addr, e)))?;
        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> DfsResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| DfsError::IoError(e.to_string()))
    }

    /// Accept loop. One connection carries one request/response pair.
    pub async fn run(self) -> DfsResult<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| DfsError::IoError(format!("accept failed: {}", e)))?;
            let handler = self.handler.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, handler).await {
                    warn!("rpc: connection from {} failed: {}", peer, e);
                }
            });
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                warn!("rpc: server stopped: {}", e);
            }
        })
    }
}

async fn serve_connection(mut stream: TcpStream, handler: Arc<dyn RpcHandler>) -> DfsResult<()> {
    let body = read_http_body(&mut stream).await?;
    let req: RpcRequest = serde_json::from_slice(&body)
        .map_err(|e| DfsError::InvalidParam(format!("bad rpc request: {}", e)))?;
    let seq = req.seq;
    debug!("rpc: dispatch method={} seq={}", req.method, seq);

    let result = match handler.handle_rpc_call(req).await {
        Ok(value) => RpcResult::Success(value),
        Err(e) => RpcResult::Failed(e.to_string()),
    };
    let resp = RpcResponse { result, seq };
    let resp_body =
        serde_json::to_vec(&resp).map_err(|e| DfsError::Internal(e.to_string()))?;

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        resp_body.len()
    );
    stream
        .write_all(header.as_bytes())
        .await
        .map_err(|e| DfsError::IoError(e.to_string()))?;
    stream
        .write_all(&resp_body)
        .await
        .map_err(|e| DfsError::IoError(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| DfsError::IoError(e.to_string()))?;
    Ok(())
}

async fn read_http_body(stream: &mut TcpStream) -> DfsResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| DfsError::IoError(e.to_string()))?;
        if n == 0 {
            return Err(DfsError::IoError(
                "connection closed before headers".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_BODY_BYTES {
            return Err(DfsError::InvalidParam("headers too large".to_string()));
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]);
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .ok_or_else(|| DfsError::InvalidParam("missing content-length".to_string()))?;
    if content_length > MAX_BODY_BYTES {
        return Err(DfsError::InvalidParam("request body too large".to_string()));
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| DfsError::IoError(e.to_string()))?;
        if n == 0 {
            return Err(DfsError::IoError(
                "connection closed before body".to_string(),
            ));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    Ok(body)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

pub struct RpcClient {
    url: String,
    client: reqwest::Client,
    token: Option<String>,
    seq: AtomicU64,
}

impl RpcClient {
    /// `host` is a `host:port` pair; the request URL is derived from it.
    pub fn new(host: &str, timeout: Duration) -> Self {
        let url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}/", host)
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            url,
            client,
            token: None,
            seq: AtomicU64::new(1),
        }
    }

    /// Attach the session token sent with every subsequent call.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub async fn call(&self, method: &str, params: Value) -> DfsResult<Value> {
        let req = RpcRequest {
            method: method.to_string(),
            params,
            token: self.token.clone(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| DfsError::RemoteError(format!("call {} failed: {}", method, e)))?;
        let resp: RpcResponse = resp
            .json()
            .await
            .map_err(|e| DfsError::RemoteError(format!("bad response for {}: {}", method, e)))?;

        match resp.result {
            RpcResult::Success(value) => Ok(value),
            RpcResult::Failed(msg) => Err(DfsError::RemoteError(msg)),
        }
    }

    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> DfsResult<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| DfsError::RemoteError(format!("bad response for {}: {}", method, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle_rpc_call(&self, req: RpcRequest) -> DfsResult<Value> {
            match req.method.as_str() {
                "echo" => Ok(req.params),
                "fail" => Err(DfsError::NotFound("nothing here".to_string())),
                other => Err(DfsError::InvalidParam(format!("unknown method {}", other))),
            }
        }
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let server = RpcServer::bind("127.0.0.1:0", Arc::new(EchoHandler))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        server.spawn();

        let client = RpcClient::new(&addr.to_string(), Duration::from_secs(5));
        let value = client.call("echo", json!({"k": "v"})).await.unwrap();
        assert_eq!(value, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn test_failed_call_surfaces_remote_error() {
        let server = RpcServer::bind("127.0.0.1:0", Arc::new(EchoHandler))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        server.spawn();

        let client = RpcClient::new(&addr.to_string(), Duration::from_secs(5));
        let err = client.call("fail", Value::Null).await.unwrap_err();
        match err {
            DfsError::RemoteError(msg) => assert!(msg.contains("nothing here")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
