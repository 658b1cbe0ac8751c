use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dfs_lib::{join_errors, DfsError, DfsResult};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::namespace::NamespaceService;

/// Dispatch seam for block copies: ask `source` to push `block_id` to
/// `destination`. Implemented over the node RPC by the daemon.
#[async_trait]
pub trait BlockCopier: Send + Sync {
    async fn copy_block(&self, block_id: &str, source: &str, destination: &str) -> DfsResult<()>;
}

#[derive(Debug, Clone)]
pub struct HealingConfig {
    pub num_replicas: u32,
    pub node_expiration: Duration,
}

impl HealingConfig {
    fn validate(&self) -> DfsResult<()> {
        if self.num_replicas == 0 {
            return Err(DfsError::InvalidParam(
                "num replicas must be greater than 0".to_string(),
            ));
        }
        if self.num_replicas >= 255 {
            return Err(DfsError::InvalidParam(
                "num replicas must be less than 255".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tracks storage-node liveness and restores the replication factor:
/// expired nodes lose their registered replicas, under-replicated
/// blocks get copy operations dispatched to live nodes.
pub struct HealingService {
    config: HealingConfig,
    namespace: Arc<NamespaceService>,
    copier: Arc<dyn BlockCopier>,
    /// host -> last-seen unix millis
    nodes: RwLock<HashMap<String, u64>>,
}

impl HealingService {
    pub fn new(
        config: HealingConfig,
        namespace: Arc<NamespaceService>,
        copier: Arc<dyn BlockCopier>,
    ) -> DfsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            namespace,
            copier,
            nodes: RwLock::new(HashMap::new()),
        })
    }

    pub fn notify_node_alive(&self, host: &str, at_millis: u64) {
        let mut nodes = self.nodes.write().unwrap();
        nodes.insert(host.to_string(), at_millis);
    }

    pub fn live_nodes(&self) -> Vec<String> {
        let nodes = self.nodes.read().unwrap();
        let mut hosts: Vec<String> = nodes.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// One healing pass. Holds the write lock only while expiring
    /// nodes; the placement phase runs under the read lock so liveness
    /// notifications stay unblocked. Copies are detached tasks.
    pub async fn heal(&self, now_millis: u64) -> DfsResult<()> {
        let expired = self.remove_expired_nodes(now_millis);
        let mut errors = Vec::new();
        for host in &expired {
            info!("healing: removing expired node {}", host);
            if let Err(e) = self.namespace.node_removed(host) {
                errors.push(e);
            }
        }

        let blocks = self.namespace.get_all_block_infos()?;

        let mut current: HashMap<&str, Vec<String>> = HashMap::new();
        for block in &blocks {
            let mut hosts = block.locations.clone();
            hosts.sort();
            current.insert(block.block_id.as_str(), hosts);
        }

        {
            let nodes = self.nodes.read().unwrap();
            for block in &blocks {
                let locations = &current[block.block_id.as_str()];
                let needed = self.config.num_replicas as usize;
                if locations.len() >= needed {
                    continue;
                }
                let missing = needed - locations.len();
                info!(
                    "healing: block {} has {} of {} replicas",
                    block.block_id,
                    locations.len(),
                    needed
                );

                let destinations = match find_destinations(&nodes, locations, missing) {
                    Some(hosts) => hosts,
                    None => {
                        warn!(
                            "healing: not enough live nodes to restore block {}",
                            block.block_id
                        );
                        continue;
                    }
                };

                for destination in destinations {
                    if locations.is_empty() {
                        warn!(
                            "healing: no source replica available for block {}",
                            block.block_id
                        );
                        continue;
                    }
                    let source =
                        locations[rand::thread_rng().gen_range(0..locations.len())].clone();
                    self.dispatch_copy(block.block_id.clone(), source, destination);
                }
            }
        }

        match join_errors(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn remove_expired_nodes(&self, now_millis: u64) -> Vec<String> {
        let mut nodes = self.nodes.write().unwrap();
        let expiration = self.config.node_expiration.as_millis() as u64;

        let expired: Vec<String> = nodes
            .iter()
            .filter(|(_, last_seen)| **last_seen + expiration < now_millis)
            .map(|(host, _)| host.clone())
            .collect();

        for host in &expired {
            info!("healing: node {} is dead", host);
            nodes.remove(host);
        }

        expired
    }

    fn dispatch_copy(&self, block_id: String, source: String, destination: String) {
        let copier = self.copier.clone();
        tokio::spawn(async move {
            info!(
                "healing: copying block {} from {} to {}",
                block_id, source, destination
            );
            match copier.copy_block(&block_id, &source, &destination).await {
                Ok(()) => info!(
                    "healing: block {} copied from {} to {}",
                    block_id, source, destination
                ),
                Err(e) => warn!(
                    "healing: unable to copy block {} from {} to {}: {}",
                    block_id, source, destination, e
                ),
            }
        });
    }
}

/// Live nodes not already holding the block, shuffled, `count` taken.
/// `None` when there are not enough candidates.
fn find_destinations(
    nodes: &HashMap<String, u64>,
    current: &[String],
    count: usize,
) -> Option<Vec<String>> {
    let mut candidates: Vec<String> = nodes
        .keys()
        .filter(|host| current.binary_search(*host).is_err())
        .cloned()
        .collect();

    if candidates.len() < count {
        return None;
    }

    candidates.shuffle(&mut rand::thread_rng());
    candidates.truncate(count);
    Some(candidates)
}
