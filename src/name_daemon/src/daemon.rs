use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use block_node::NodeClient;
use dfs_lib::{unix_timestamp_millis, DfsResult, RpcServer};
use log::{info, warn};
use name_meta::{
    BlockCopier, HealingConfig, HealingService, NameRpcHandler, NamespaceService,
    NotificationHandler, SecurityService,
};
use tokio::time::MissedTickBehavior;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct NameDaemonConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub token_expiration: Duration,
    pub num_replicas: u32,
    pub node_expiration: Duration,
    pub healing_interval: Duration,
}

impl Default for NameDaemonConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 53035,
            db_path: PathBuf::from("nameserver.db"),
            token_expiration: Duration::from_secs(24 * 3600),
            num_replicas: 1,
            node_expiration: Duration::from_secs(15 * 60),
            healing_interval: Duration::from_secs(60),
        }
    }
}

/// Asks the source node to push a block to the destination node.
struct RpcBlockCopier;

#[async_trait]
impl BlockCopier for RpcBlockCopier {
    async fn copy_block(&self, block_id: &str, source: &str, destination: &str) -> DfsResult<()> {
        let client = NodeClient::new(source, RPC_TIMEOUT);
        client.copy_block(block_id, destination).await
    }
}

pub async fn run_name_daemon(config: NameDaemonConfig) -> DfsResult<()> {
    let db_path = config.db_path.to_string_lossy().to_string();
    info!("nameserver: opening database {}", db_path);

    let security = Arc::new(SecurityService::open(&db_path, config.token_expiration)?);
    let namespace = Arc::new(NamespaceService::open(&db_path)?);
    let healing = Arc::new(HealingService::new(
        HealingConfig {
            num_replicas: config.num_replicas,
            node_expiration: config.node_expiration,
        },
        namespace.clone(),
        Arc::new(RpcBlockCopier),
    )?);
    let notifications = Arc::new(NotificationHandler::new(namespace.clone(), healing.clone()));

    {
        let healing = healing.clone();
        let interval = config.healing_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = healing.heal(unix_timestamp_millis()).await {
                    warn!("nameserver: healing pass failed: {}", e);
                }
            }
        });
    }

    let handler = Arc::new(NameRpcHandler::new(security, namespace, notifications));
    let listen = format!("{}:{}", config.host, config.port);
    let server = RpcServer::bind(&listen, handler).await?;
    info!("nameserver: listening on {}", listen);
    server.run().await
}
