use std::sync::Arc;

use async_trait::async_trait;
use dfs_lib::rpc::{decode_params, encode_result, RpcHandler, RpcRequest};
use dfs_lib::wire::{
    BlockNotification, BlockRemovalNotification, BlockSummary, CreateReq, DirEntry, ListResp,
    LoginReq, LoginResp, LogoutReq, PathReq, StatResp,
};
use dfs_lib::{path, DfsError, DfsResult};
use serde_json::Value;

use crate::meta_db::{BlockEntry, FileEntry};
use crate::notification::NotificationHandler;
use crate::namespace::NamespaceService;
use crate::security::{Principal, SecurityService};

/// Name-service RPC surface. Requests carry an opaque token; it is
/// resolved to a principal before any namespace handler runs. The
/// notification endpoints are node-internal and skip authentication.
pub struct NameRpcHandler {
    security: Arc<SecurityService>,
    namespace: Arc<NamespaceService>,
    notifications: Arc<NotificationHandler>,
}

impl NameRpcHandler {
    pub fn new(
        security: Arc<SecurityService>,
        namespace: Arc<NamespaceService>,
        notifications: Arc<NotificationHandler>,
    ) -> Self {
        Self {
            security,
            namespace,
            notifications,
        }
    }

    fn principal_for(&self, req: &RpcRequest) -> DfsResult<Principal> {
        let token = req
            .token
            .as_deref()
            .ok_or_else(|| DfsError::Unauthenticated("missing authorization token".to_string()))?;
        self.security.lookup_principal(token)
    }
}

fn to_dir_entry(entry: &FileEntry, full_path: &str) -> DirEntry {
    DirEntry {
        path: full_path.to_string(),
        is_dir: entry.is_dir,
        permissions: entry.permissions.clone(),
        created_at: entry.created_at,
        modified_at: entry.updated_at,
        accessed_at: entry.updated_at,
    }
}

fn to_block_summary(block: &BlockEntry) -> BlockSummary {
    BlockSummary {
        block_id: block.block_id.clone(),
        crc: block.crc,
        sequence: block.sequence,
        length: block.length,
    }
}

#[async_trait]
impl RpcHandler for NameRpcHandler {
    async fn handle_rpc_call(&self, req: RpcRequest) -> DfsResult<Value> {
        match req.method.as_str() {
            "login" => {
                let login: LoginReq = decode_params(req.params)?;
                let token = self
                    .security
                    .authenticate(&login.user, &login.hashed_password)?;
                encode_result(&LoginResp { token })
            }
            "logout" => {
                let logout: LogoutReq = decode_params(req.params)?;
                self.security.logout(&logout.token)?;
                Ok(Value::Null)
            }
            "create_file" => {
                let principal = self.principal_for(&req)?;
                let create: CreateReq = decode_params(req.params)?;
                let full = path::clean_path(&create.path)?;
                let entry = self
                    .namespace
                    .create_file(&principal, &full, create.permissions)?;
                encode_result(&to_dir_entry(&entry, &full))
            }
            "create_dir" => {
                let principal = self.principal_for(&req)?;
                let create: CreateReq = decode_params(req.params)?;
                let full = path::clean_path(&create.path)?;
                let entry = self
                    .namespace
                    .create_dir(&principal, &full, create.permissions)?;
                encode_result(&to_dir_entry(&entry, &full))
            }
            "delete_file" => {
                let principal = self.principal_for(&req)?;
                let target: PathReq = decode_params(req.params)?;
                self.namespace.delete_file(&principal, &target.path)?;
                Ok(Value::Null)
            }
            "delete_dir" => {
                let principal = self.principal_for(&req)?;
                let target: PathReq = decode_params(req.params)?;
                self.namespace.delete_dir(&principal, &target.path)?;
                Ok(Value::Null)
            }
            "list" => {
                let principal = self.principal_for(&req)?;
                let target: PathReq = decode_params(req.params)?;
                let full = path::clean_path(&target.path)?;
                let children = self.namespace.list(&principal, &full)?;
                let entries = children
                    .iter()
                    .map(|child| to_dir_entry(child, &path::join(&full, &child.name)))
                    .collect();
                encode_result(&ListResp {
                    path: full,
                    entries,
                })
            }
            "stat" => {
                let principal = self.principal_for(&req)?;
                let target: PathReq = decode_params(req.params)?;
                let full = path::clean_path(&target.path)?;
                let entry = self.namespace.stat(&principal, &full)?;
                let blocks = self.namespace.get_block_infos(&principal, &full)?;
                encode_result(&StatResp {
                    path: full.clone(),
                    entry: to_dir_entry(&entry, &full),
                    block_infos: blocks.iter().map(to_block_summary).collect(),
                })
            }
            "notify_block_present" => {
                let n: BlockNotification = decode_params(req.params)?;
                self.notifications.handle_block_present(&n)?;
                Ok(Value::Null)
            }
            "notify_block_added" => {
                let n: BlockNotification = decode_params(req.params)?;
                self.notifications.handle_block_added(&n)?;
                Ok(Value::Null)
            }
            "notify_block_removed" => {
                let n: BlockRemovalNotification = decode_params(req.params)?;
                self.notifications.handle_block_removed(&n)?;
                Ok(Value::Null)
            }
            other => Err(DfsError::InvalidParam(format!(
                "unknown name method '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::{BlockCopier, HealingConfig, HealingService};
    use dfs_lib::wire::Permissions;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NullCopier;

    #[async_trait]
    impl BlockCopier for NullCopier {
        async fn copy_block(&self, _: &str, _: &str, _: &str) -> DfsResult<()> {
            Ok(())
        }
    }

    fn handler(dir: &TempDir) -> NameRpcHandler {
        let db = dir.path().join("name.db");
        let db = db.to_str().unwrap();
        let security =
            Arc::new(SecurityService::open(db, Duration::from_secs(3600)).unwrap());
        let namespace = Arc::new(NamespaceService::open(db).unwrap());
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
        let notifications = Arc::new(NotificationHandler::new(namespace.clone(), healing));
        NameRpcHandler::new(security, namespace, notifications)
    }

    fn request(method: &str, params: Value, token: Option<String>) -> RpcRequest {
        RpcRequest {
            method: method.to_string(),
            params,
            token,
            seq: 1,
        }
    }

    async fn login(handler: &NameRpcHandler) -> String {
        let value = handler
            .handle_rpc_call(request(
                "login",
                json!({"user": "root", "hashed_password": "toor"}),
                None,
            ))
            .await
            .unwrap();
        let resp: LoginResp = serde_json::from_value(value).unwrap();
        resp.token
    }

    #[tokio::test]
    async fn test_authenticated_round_trip() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        handler.security.create_user("root", "toor").unwrap();
        let token = login(&handler).await;

        let perms = serde_json::to_value(Permissions::open("root", "root")).unwrap();
        handler
            .handle_rpc_call(request(
                "create_file",
                json!({"path": "/hello.txt", "permissions": perms}),
                Some(token.clone()),
            ))
            .await
            .unwrap();

        let value = handler
            .handle_rpc_call(request("list", json!({"path": "/"}), Some(token.clone())))
            .await
            .unwrap();
        let list: ListResp = serde_json::from_value(value).unwrap();
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].path, "/hello.txt");
        assert!(!list.entries[0].is_dir);

        let value = handler
            .handle_rpc_call(request(
                "stat",
                json!({"path": "/hello.txt"}),
                Some(token.clone()),
            ))
            .await
            .unwrap();
        let stat: StatResp = serde_json::from_value(value).unwrap();
        assert_eq!(stat.entry.path, "/hello.txt");
        assert!(stat.block_infos.is_empty());

        handler
            .handle_rpc_call(request(
                "delete_file",
                json!({"path": "/hello.txt"}),
                Some(token),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_wire_round_trip() {
        use dfs_lib::rpc::{RpcClient, RpcServer};

        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        handler.security.create_user("root", "toor").unwrap();

        let server = RpcServer::bind("127.0.0.1:0", Arc::new(handler)).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        server.spawn();

        let anon = RpcClient::new(&addr, Duration::from_secs(5));
        let resp: LoginResp = anon
            .call_typed(
                "login",
                json!({"user": "root", "hashed_password": "toor"}),
            )
            .await
            .unwrap();

        let session =
            RpcClient::new(&addr, Duration::from_secs(5)).with_token(Some(resp.token));
        let perms = serde_json::to_value(Permissions::open("root", "root")).unwrap();
        session
            .call(
                "create_dir",
                json!({"path": "/wire", "permissions": perms}),
            )
            .await
            .unwrap();
        let listing: ListResp = session
            .call_typed("list", json!({"path": "/"}))
            .await
            .unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].path, "/wire");
        assert!(listing.entries[0].is_dir);

        // A client without the token is turned away at the interceptor.
        let err = anon.call("list", json!({"path": "/"})).await.unwrap_err();
        assert!(matches!(err, DfsError::RemoteError(_)));
    }

    #[tokio::test]
    async fn test_unauthenticated_requests_rejected() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);

        let err = handler
            .handle_rpc_call(request("list", json!({"path": "/"}), None))
            .await
            .unwrap_err();
        assert!(matches!(err, DfsError::Unauthenticated(_)));

        let err = handler
            .handle_rpc_call(request(
                "list",
                json!({"path": "/"}),
                Some("bogus-token".to_string()),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DfsError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_notifications_skip_authentication() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        handler.security.create_user("root", "toor").unwrap();
        let token = login(&handler).await;

        let perms = serde_json::to_value(Permissions::open("root", "root")).unwrap();
        handler
            .handle_rpc_call(request(
                "create_file",
                json!({"path": "/f", "permissions": perms}),
                Some(token.clone()),
            ))
            .await
            .unwrap();

        handler
            .handle_rpc_call(request(
                "notify_block_added",
                json!({
                    "host": "h1:50051",
                    "path": "/f",
                    "block_id": "b1",
                    "sequence": 0,
                    "length": 5,
                    "crc": 42
                }),
                None,
            ))
            .await
            .unwrap();

        let value = handler
            .handle_rpc_call(request("stat", json!({"path": "/f"}), Some(token)))
            .await
            .unwrap();
        let stat: StatResp = serde_json::from_value(value).unwrap();
        assert_eq!(stat.block_infos.len(), 1);
        assert_eq!(stat.block_infos[0].block_id, "b1");
    }
}
