//! Message contracts shared by the name and node RPC surfaces. Block
//! payloads cross the wire base64-encoded inside JSON.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::{DfsError, DfsResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub read: bool,
    pub write: bool,
    #[serde(default)]
    pub delete: bool,
}

impl Permission {
    pub fn all() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub owner: String,
    pub group: String,
    pub owner_permission: Permission,
    pub group_permission: Permission,
    pub other_permission: Permission,
}

impl Permissions {
    /// Everyone gets everything. Handy default for administrative
    /// callers; real deployments pass explicit triples.
    pub fn open(owner: &str, group: &str) -> Self {
        Self {
            owner: owner.to_string(),
            group: group.to_string(),
            owner_permission: Permission::all(),
            group_permission: Permission::all(),
            other_permission: Permission::all(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub path: String,
    pub is_dir: bool,
    pub permissions: Permissions,
    pub created_at: u64,
    pub modified_at: u64,
    pub accessed_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSummary {
    pub block_id: String,
    pub crc: u32,
    pub sequence: u64,
    pub length: u32,
}

// ---- name-service requests ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginReq {
    pub user: String,
    pub hashed_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResp {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutReq {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathReq {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReq {
    pub path: String,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResp {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatResp {
    pub path: String,
    pub entry: DirEntry,
    pub block_infos: Vec<BlockSummary>,
}

// ---- node -> name notifications ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockNotification {
    pub host: String,
    pub path: String,
    pub block_id: String,
    pub sequence: u64,
    pub length: u32,
    pub crc: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRemovalNotification {
    pub host: String,
    pub path: String,
    pub block_id: String,
}

// ---- node RPC ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBlockInfo {
    pub block_id: String,
    pub path: String,
    pub sequence: u64,
    pub length: u32,
    pub crc: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockIdReq {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlockInfosResp {
    pub block_infos: Vec<NodeBlockInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlockResp {
    pub block_info: NodeBlockInfo,
    pub data: String,
}

impl GetBlockResp {
    pub fn decode_data(&self) -> DfsResult<Vec<u8>> {
        decode_payload(&self.data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBlockReq {
    pub block_id: String,
    pub path: String,
    pub sequence: u64,
    pub data: String,
}

impl WriteBlockReq {
    pub fn new(block_id: &str, path: &str, sequence: u64, data: &[u8]) -> Self {
        Self {
            block_id: block_id.to_string(),
            path: path.to_string(),
            sequence,
            data: encode_payload(data),
        }
    }

    pub fn decode_data(&self) -> DfsResult<Vec<u8>> {
        decode_payload(&self.data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyBlockReq {
    pub id: String,
    pub destination: String,
}

// ---- service discovery ----

pub const NODE_KEY_PREFIX: &str = "dfs/datanode/nodes/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub location: String,
}

pub fn encode_payload(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn decode_payload(data: &str) -> DfsResult<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|e| DfsError::InvalidParam(format!("bad block payload encoding: {}", e)))
}
