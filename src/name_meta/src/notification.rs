use std::sync::Arc;

use dfs_lib::wire::{BlockNotification, BlockRemovalNotification};
use dfs_lib::{unix_timestamp_millis, DfsResult};

use crate::healing::HealingService;
use crate::namespace::NamespaceService;

/// Applies storage-node notifications to the namespace and feeds the
/// sender's liveness to the healing controller. Stateless beyond the
/// two delegations.
pub struct NotificationHandler {
    namespace: Arc<NamespaceService>,
    healing: Arc<HealingService>,
}

impl NotificationHandler {
    pub fn new(namespace: Arc<NamespaceService>, healing: Arc<HealingService>) -> Self {
        Self { namespace, healing }
    }

    pub fn handle_block_present(&self, n: &BlockNotification) -> DfsResult<()> {
        self.healing.notify_node_alive(&n.host, unix_timestamp_millis());
        self.namespace.notify_block_present(n)
    }

    pub fn handle_block_added(&self, n: &BlockNotification) -> DfsResult<()> {
        self.healing.notify_node_alive(&n.host, unix_timestamp_millis());
        self.namespace.notify_block_added(n)
    }

    pub fn handle_block_removed(&self, n: &BlockRemovalNotification) -> DfsResult<()> {
        self.healing.notify_node_alive(&n.host, unix_timestamp_millis());
        self.namespace.notify_block_removed(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::{BlockCopier, HealingConfig, HealingService};
    use crate::security::Principal;
    use async_trait::async_trait;
    use dfs_lib::wire::Permissions;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NullCopier;

    #[async_trait]
    impl BlockCopier for NullCopier {
        async fn copy_block(&self, _: &str, _: &str, _: &str) -> DfsResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notification_stamps_liveness_and_updates_namespace() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("name.db");
        let namespace = Arc::new(NamespaceService::open(db.to_str().unwrap()).unwrap());
        let healing = Arc::new(
            HealingService::new(
                HealingConfig {
                    num_replicas: 1,
                    node_expiration: Duration::from_secs(60),
                },
                namespace.clone(),
                Arc::new(NullCopier),
            )
            .unwrap(),
        );
        let handler = NotificationHandler::new(namespace.clone(), healing.clone());

        namespace
            .create_file(&Principal::Root, "/f", Permissions::open("root", "root"))
            .unwrap();

        handler
            .handle_block_present(&BlockNotification {
                host: "h1:50051".to_string(),
                path: "/f".to_string(),
                block_id: "b1".to_string(),
                sequence: 0,
                length: 3,
                crc: 7,
            })
            .unwrap();

        assert_eq!(healing.live_nodes(), vec!["h1:50051".to_string()]);
        let blocks = namespace.get_all_block_infos().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].locations, vec!["h1:50051".to_string()]);
    }
}
