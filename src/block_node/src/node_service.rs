use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dfs_lib::rpc::{decode_params, encode_result, RpcHandler, RpcRequest};
use dfs_lib::wire::{
    encode_payload, BlockIdReq, CopyBlockReq, GetBlockInfosResp, GetBlockResp, NodeBlockInfo,
    WriteBlockReq,
};
use dfs_lib::{DfsError, DfsResult};
use log::info;
use serde_json::Value;

use crate::block_store::BlockStore;
use crate::node_client::NodeClient;
use crate::store_db::BlockRecord;

/// RPC surface of a storage node. One-shot request/response per
/// operation; `copy_block` fans out to the destination peer.
pub struct NodeRpcHandler {
    store: Arc<BlockStore>,
    peer_timeout: Duration,
}

impl NodeRpcHandler {
    pub fn new(store: Arc<BlockStore>, peer_timeout: Duration) -> Self {
        Self {
            store,
            peer_timeout,
        }
    }

    fn to_wire(record: &BlockRecord) -> NodeBlockInfo {
        NodeBlockInfo {
            block_id: record.block_id.clone(),
            path: record.path.clone(),
            sequence: record.sequence,
            length: record.length,
            crc: record.crc,
        }
    }

    async fn handle_copy_block(&self, req: CopyBlockReq) -> DfsResult<()> {
        let (data, record) = self.store.read_block(&req.id).await?;
        info!(
            "copy_block: {} -> {} ({} bytes)",
            req.id,
            req.destination,
            data.len()
        );
        let peer = NodeClient::new(&req.destination, self.peer_timeout);
        peer.write_block(&record.block_id, &record.path, record.sequence, &data)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RpcHandler for NodeRpcHandler {
    async fn handle_rpc_call(&self, req: RpcRequest) -> DfsResult<Value> {
        match req.method.as_str() {
            "get_block_infos" => {
                let records = self.store.get_blocks()?;
                let resp = GetBlockInfosResp {
                    block_infos: records.iter().map(Self::to_wire).collect(),
                };
                encode_result(&resp)
            }
            "get_block_info" => {
                let req: BlockIdReq = decode_params(req.params)?;
                let record = self.store.get_block_record(&req.id)?;
                encode_result(&Self::to_wire(&record))
            }
            "get_block" => {
                let req: BlockIdReq = decode_params(req.params)?;
                let (data, record) = self.store.read_block(&req.id).await?;
                let resp = GetBlockResp {
                    block_info: Self::to_wire(&record),
                    data: encode_payload(&data),
                };
                encode_result(&resp)
            }
            "write_block" => {
                let req: WriteBlockReq = decode_params(req.params)?;
                let data = req.decode_data()?;
                let record = self
                    .store
                    .write_block(&req.block_id, &req.path, req.sequence, &data)
                    .await?;
                encode_result(&Self::to_wire(&record))
            }
            "delete_block" => {
                let req: BlockIdReq = decode_params(req.params)?;
                self.store.delete_block(&req.id).await?;
                Ok(Value::Null)
            }
            "copy_block" => {
                let req: CopyBlockReq = decode_params(req.params)?;
                self.handle_copy_block(req).await?;
                Ok(Value::Null)
            }
            other => Err(DfsError::InvalidParam(format!(
                "unknown node method '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::{BlockStoreConfig, NameNotifier};
    use dfs_lib::rpc::RpcServer;
    use tempfile::TempDir;

    struct NullNotifier;

    #[async_trait]
    impl NameNotifier for NullNotifier {
        async fn notify_block_added(&self, _: &str, _: &BlockRecord) -> DfsResult<()> {
            Ok(())
        }
        async fn notify_block_present(&self, _: &str, _: &BlockRecord) -> DfsResult<()> {
            Ok(())
        }
        async fn notify_block_removed(&self, _: &str, _: &str, _: &str) -> DfsResult<()> {
            Ok(())
        }
    }

    async fn spawn_node(dir: &TempDir) -> (Arc<BlockStore>, String) {
        let store = Arc::new(
            BlockStore::open(
                BlockStoreConfig::new("test-node:0", dir.path()),
                Arc::new(NullNotifier),
            )
            .await
            .unwrap(),
        );
        let handler = Arc::new(NodeRpcHandler::new(store.clone(), Duration::from_secs(5)));
        let server = RpcServer::bind("127.0.0.1:0", handler).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        server.spawn();
        (store, addr)
    }

    #[tokio::test]
    async fn test_write_read_delete_over_rpc() {
        let dir = TempDir::new().unwrap();
        let (_store, addr) = spawn_node(&dir).await;
        let client = NodeClient::new(&addr, Duration::from_secs(5));

        let info = client.write_block("b1", "/x", 0, b"hello").await.unwrap();
        assert_eq!(info.length, 5);

        let infos = client.get_block_infos().await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].block_id, "b1");

        let info = client.get_block_info("b1").await.unwrap();
        assert_eq!(info.path, "/x");
        assert!(client.get_block_info("missing").await.is_err());

        let (data, info) = client.get_block("b1").await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(info.sequence, 0);

        client.delete_block("b1").await.unwrap();
        assert!(client.get_block_infos().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_block_between_nodes() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let (store_a, addr_a) = spawn_node(&dir_a).await;
        let (store_b, addr_b) = spawn_node(&dir_b).await;

        store_a.write_block("b1", "/x", 0, b"payload").await.unwrap();

        let client = NodeClient::new(&addr_a, Duration::from_secs(5));
        client.copy_block("b1", &addr_b).await.unwrap();

        let (data, record) = store_b.read_block("b1").await.unwrap();
        assert_eq!(data, b"payload");
        assert_eq!(record.path, "/x");
        assert_eq!(record.sequence, 0);
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let dir = TempDir::new().unwrap();
        let (store, _) = spawn_node(&dir).await;
        let handler = NodeRpcHandler::new(store, Duration::from_secs(1));
        let err = handler
            .handle_rpc_call(RpcRequest {
                method: "bogus".to_string(),
                params: Value::Null,
                token: None,
                seq: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DfsError::InvalidParam(_)));
    }
}
