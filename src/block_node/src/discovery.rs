use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dfs_lib::wire::{NodeAnnouncement, NODE_KEY_PREFIX};
use dfs_lib::{DfsError, DfsResult};
use log::debug;
use serde_json::{json, Value};

/// Leased self-registration against etcd's HTTP gateway. The key
/// auto-expires with the lease, so a node that stops renewing drops out
/// of discovery on its own.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    /// Base URL of the etcd gateway, e.g. `http://localhost:2379`.
    pub endpoint: String,
    pub announcement: NodeAnnouncement,
    pub lease: Duration,
}

pub struct EtcdAnnouncer {
    config: EtcdConfig,
    client: reqwest::Client,
}

impl EtcdAnnouncer {
    pub fn new(config: EtcdConfig) -> DfsResult<Self> {
        if config.endpoint.is_empty() {
            return Err(DfsError::InvalidParam("etcd endpoint is empty".to_string()));
        }
        if config.announcement.id.is_empty() {
            return Err(DfsError::InvalidParam("node id is empty".to_string()));
        }
        if config.lease.is_zero() {
            return Err(DfsError::InvalidParam(
                "lease duration must be greater than 0".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Ok(Self { config, client })
    }

    /// Grant a fresh lease and put the announcement under it.
    pub async fn announce(&self) -> DfsResult<()> {
        let ttl = self.config.lease.as_secs().max(1);
        let grant: Value = self
            .post("/v3/lease/grant", json!({ "TTL": ttl }))
            .await?;
        let lease_id = grant
            .get("ID")
            .and_then(|v| v.as_str().map(|s| s.to_string()).or_else(|| v.as_i64().map(|n| n.to_string())))
            .ok_or_else(|| DfsError::RemoteError("lease grant returned no ID".to_string()))?;

        let key = format!("{}{}", NODE_KEY_PREFIX, self.config.announcement.id);
        let value = serde_json::to_string(&self.config.announcement)
            .map_err(|e| DfsError::Internal(e.to_string()))?;
        debug!("etcd: announce {} (lease {})", key, lease_id);

        self.post(
            "/v3/kv/put",
            json!({
                "key": BASE64.encode(key),
                "value": BASE64.encode(value),
                "lease": lease_id,
            }),
        )
        .await?;
        Ok(())
    }

    async fn post(&self, path: &str, body: Value) -> DfsResult<Value> {
        let url = format!(
            "{}{}",
            self.config.endpoint.trim_end_matches('/'),
            path
        );
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DfsError::RemoteError(format!("etcd {} failed: {}", path, e)))?;
        if !resp.status().is_success() {
            return Err(DfsError::RemoteError(format!(
                "etcd {} returned {}",
                path,
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| DfsError::RemoteError(format!("etcd {} bad response: {}", path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement() -> NodeAnnouncement {
        NodeAnnouncement {
            id: "node-1".to_string(),
            host: "localhost".to_string(),
            port: 50051,
            location: "/rack-a".to_string(),
        }
    }

    #[test]
    fn test_config_validation() {
        let ok = EtcdConfig {
            endpoint: "http://localhost:2379".to_string(),
            announcement: announcement(),
            lease: Duration::from_secs(120),
        };
        assert!(EtcdAnnouncer::new(ok.clone()).is_ok());

        let mut bad = ok.clone();
        bad.endpoint = String::new();
        assert!(EtcdAnnouncer::new(bad).is_err());

        let mut bad = ok.clone();
        bad.announcement.id = String::new();
        assert!(EtcdAnnouncer::new(bad).is_err());

        let mut bad = ok;
        bad.lease = Duration::ZERO;
        assert!(EtcdAnnouncer::new(bad).is_err());
    }

    #[test]
    fn test_announcement_json_shape() {
        let value = serde_json::to_value(announcement()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "node-1",
                "host": "localhost",
                "port": 50051,
                "location": "/rack-a"
            })
        );
    }
}
