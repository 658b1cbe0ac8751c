use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use block_node::{
    BlockStore, BlockStoreConfig, EtcdAnnouncer, EtcdConfig, NameClient, NodeRpcHandler,
};
use dfs_lib::wire::NodeAnnouncement;
use dfs_lib::{DfsResult, RpcServer};
use log::{info, warn};
use tokio::time::MissedTickBehavior;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct NodeDaemonConfig {
    pub host: String,
    pub port: u16,
    pub name_node: String,
    pub data_dir: PathBuf,
    pub db_path: Option<PathBuf>,
    pub report_interval: Duration,
    pub health_check_interval: Duration,
    pub crc_check_interval: Duration,
    pub node_id: Option<String>,
    pub location: String,
    pub etcd_endpoint: Option<String>,
    pub etcd_lease: Duration,
    pub etcd_interval: Duration,
}

impl Default for NodeDaemonConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 50051,
            name_node: String::new(),
            data_dir: PathBuf::from("./data"),
            db_path: None,
            report_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(60),
            crc_check_interval: Duration::from_secs(24 * 3600),
            node_id: None,
            location: "/".to_string(),
            etcd_endpoint: None,
            etcd_lease: Duration::from_secs(120),
            etcd_interval: Duration::from_secs(60),
        }
    }
}

pub async fn run_node_daemon(config: NodeDaemonConfig) -> DfsResult<()> {
    let advertised = format!("{}:{}", config.host, config.port);
    info!(
        "nodeserver: starting as {} against name node {}",
        advertised, config.name_node
    );

    let notifier = Arc::new(NameClient::new(&config.name_node, RPC_TIMEOUT));
    let store = Arc::new(
        BlockStore::open(
            BlockStoreConfig {
                host: advertised.clone(),
                data_dir: config.data_dir.clone(),
                db_path: config.db_path.clone(),
            },
            notifier,
        )
        .await?,
    );

    // Startup reconciliation. The name service may not be up yet, so a
    // failed report is only logged; the report tick retries.
    if let Err(e) = store.report().await {
        warn!("nodeserver: initial report failed: {}", e);
    }
    if let Err(e) = store.health_check().await {
        warn!("nodeserver: initial health check failed: {}", e);
    }
    if let Err(e) = store.validate_crc().await {
        warn!("nodeserver: initial crc validation failed: {}", e);
    }

    spawn_tick(store.clone(), config.report_interval, "report", |store| async move {
        store.report().await
    });
    spawn_tick(
        store.clone(),
        config.health_check_interval,
        "health check",
        |store| async move { store.health_check().await },
    );
    spawn_tick(
        store.clone(),
        config.crc_check_interval,
        "crc validation",
        |store| async move { store.validate_crc().await },
    );

    if let Some(endpoint) = &config.etcd_endpoint {
        let announcer = EtcdAnnouncer::new(EtcdConfig {
            endpoint: endpoint.clone(),
            announcement: NodeAnnouncement {
                id: config.node_id.clone().unwrap_or_else(|| advertised.clone()),
                host: config.host.clone(),
                port: config.port,
                location: config.location.clone(),
            },
            lease: config.etcd_lease,
        })?;
        let interval = config.etcd_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match announcer.announce().await {
                    Ok(()) => info!("nodeserver: announced to etcd"),
                    Err(e) => warn!("nodeserver: etcd announce failed: {}", e),
                }
            }
        });
    }

    let handler = Arc::new(NodeRpcHandler::new(store, RPC_TIMEOUT));
    let listen = format!("0.0.0.0:{}", config.port);
    let server = RpcServer::bind(&listen, handler).await?;
    info!("nodeserver: listening on {}", listen);
    server.run().await
}

fn spawn_tick<F, Fut>(store: Arc<BlockStore>, interval: Duration, name: &'static str, task: F)
where
    F: Fn(Arc<BlockStore>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = DfsResult<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = task(store.clone()).await {
                warn!("nodeserver: {} failed: {}", name, e);
            }
        }
    });
}
