use std::time::Duration;

use dfs_lib::rpc::RpcClient;
use dfs_lib::wire::{
    BlockIdReq, CopyBlockReq, GetBlockInfosResp, GetBlockResp, NodeBlockInfo, WriteBlockReq,
};
use dfs_lib::DfsResult;
use serde_json::Value;

/// Typed client for the storage-node RPC surface.
pub struct NodeClient {
    rpc: RpcClient,
}

impl NodeClient {
    pub fn new(host: &str, timeout: Duration) -> Self {
        Self {
            rpc: RpcClient::new(host, timeout),
        }
    }

    pub async fn get_block_infos(&self) -> DfsResult<Vec<NodeBlockInfo>> {
        let resp: GetBlockInfosResp = self
            .rpc
            .call_typed("get_block_infos", Value::Null)
            .await?;
        Ok(resp.block_infos)
    }

    pub async fn get_block_info(&self, id: &str) -> DfsResult<NodeBlockInfo> {
        self.rpc
            .call_typed(
                "get_block_info",
                params(&BlockIdReq { id: id.to_string() })?,
            )
            .await
    }

    pub async fn get_block(&self, id: &str) -> DfsResult<(Vec<u8>, NodeBlockInfo)> {
        let resp: GetBlockResp = self
            .rpc
            .call_typed("get_block", params(&BlockIdReq { id: id.to_string() })?)
            .await?;
        let data = resp.decode_data()?;
        Ok((data, resp.block_info))
    }

    pub async fn write_block(
        &self,
        id: &str,
        path: &str,
        sequence: u64,
        data: &[u8],
    ) -> DfsResult<NodeBlockInfo> {
        self.rpc
            .call_typed(
                "write_block",
                params(&WriteBlockReq::new(id, path, sequence, data))?,
            )
            .await
    }

    pub async fn delete_block(&self, id: &str) -> DfsResult<()> {
        self.rpc
            .call("delete_block", params(&BlockIdReq { id: id.to_string() })?)
            .await?;
        Ok(())
    }

    pub async fn copy_block(&self, id: &str, destination: &str) -> DfsResult<()> {
        self.rpc
            .call(
                "copy_block",
                params(&CopyBlockReq {
                    id: id.to_string(),
                    destination: destination.to_string(),
                })?,
            )
            .await?;
        Ok(())
    }
}

fn params<T: serde::Serialize>(req: &T) -> DfsResult<Value> {
    dfs_lib::rpc::encode_result(req)
}
