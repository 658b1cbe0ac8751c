use std::time::Duration;

use async_trait::async_trait;
use dfs_lib::rpc::{encode_result, RpcClient};
use dfs_lib::wire::{BlockNotification, BlockRemovalNotification};
use dfs_lib::DfsResult;

use crate::block_store::NameNotifier;
use crate::store_db::BlockRecord;

/// Client for the name service's notification endpoints.
pub struct NameClient {
    rpc: RpcClient,
}

impl NameClient {
    pub fn new(name_node: &str, timeout: Duration) -> Self {
        Self {
            rpc: RpcClient::new(name_node, timeout),
        }
    }

    fn notification(host: &str, record: &BlockRecord) -> BlockNotification {
        BlockNotification {
            host: host.to_string(),
            path: record.path.clone(),
            block_id: record.block_id.clone(),
            sequence: record.sequence,
            length: record.length,
            crc: record.crc,
        }
    }
}

#[async_trait]
impl NameNotifier for NameClient {
    async fn notify_block_added(&self, host: &str, record: &BlockRecord) -> DfsResult<()> {
        let req = Self::notification(host, record);
        self.rpc
            .call("notify_block_added", encode_result(&req)?)
            .await?;
        Ok(())
    }

    async fn notify_block_present(&self, host: &str, record: &BlockRecord) -> DfsResult<()> {
        let req = Self::notification(host, record);
        self.rpc
            .call("notify_block_present", encode_result(&req)?)
            .await?;
        Ok(())
    }

    async fn notify_block_removed(
        &self,
        host: &str,
        block_id: &str,
        path: &str,
    ) -> DfsResult<()> {
        let req = BlockRemovalNotification {
            host: host.to_string(),
            path: path.to_string(),
            block_id: block_id.to_string(),
        };
        self.rpc
            .call("notify_block_removed", encode_result(&req)?)
            .await?;
        Ok(())
    }
}
