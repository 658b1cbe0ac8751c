use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dfs_lib::checksum::{crc32, verify_block};
use dfs_lib::{join_errors, DfsError, DfsResult};
use log::{debug, info, warn};
use tokio::fs;

use crate::store_db::{BlockRecord, NodeStoreDb};

const DEFAULT_DB_FILE: &str = "catalog.db";

/// Outbound notification seam towards the name service. Implemented
/// over RPC by `NameClient`; tests substitute a recording mock.
#[async_trait]
pub trait NameNotifier: Send + Sync {
    async fn notify_block_added(&self, host: &str, record: &BlockRecord) -> DfsResult<()>;
    async fn notify_block_present(&self, host: &str, record: &BlockRecord) -> DfsResult<()>;
    async fn notify_block_removed(&self, host: &str, block_id: &str, path: &str)
        -> DfsResult<()>;
}

#[derive(Debug, Clone)]
pub struct BlockStoreConfig {
    /// Advertised `host:port` of this node, used in every notification.
    pub host: String,
    /// Directory holding block bodies, one file per block id.
    pub data_dir: PathBuf,
    /// Catalog database path. Defaults to `<data-dir>/catalog.db`.
    pub db_path: Option<PathBuf>,
}

impl BlockStoreConfig {
    pub fn new(host: &str, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: host.to_string(),
            data_dir: data_dir.into(),
            db_path: None,
        }
    }
}

/// Authoritative source of truth for the blocks this node holds:
/// a transactional catalog plus block bodies on the local filesystem.
pub struct BlockStore {
    host: String,
    data_dir: PathBuf,
    db_file_name: String,
    db: Arc<NodeStoreDb>,
    notifier: Arc<dyn NameNotifier>,
}

impl BlockStore {
    pub async fn open(
        config: BlockStoreConfig,
        notifier: Arc<dyn NameNotifier>,
    ) -> DfsResult<Self> {
        if config.host.is_empty() {
            return Err(DfsError::InvalidParam("host is required".to_string()));
        }
        if !config.data_dir.exists() {
            debug!(
                "BlockStore: create data dir: {}",
                config.data_dir.to_string_lossy()
            );
            fs::create_dir_all(&config.data_dir)
                .await
                .map_err(|e| DfsError::IoError(format!("create data dir failed: {}", e)))?;
        }

        let db_path = config
            .db_path
            .clone()
            .unwrap_or_else(|| config.data_dir.join(DEFAULT_DB_FILE));
        let db_file_name = db_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DEFAULT_DB_FILE)
            .to_string();
        let db = Arc::new(NodeStoreDb::open(&db_path.to_string_lossy())?);

        Ok(Self {
            host: config.host,
            data_dir: config.data_dir,
            db_file_name,
            db,
            notifier,
        })
    }

    pub fn list_block_ids(&self) -> DfsResult<Vec<String>> {
        self.db.list_block_ids()
    }

    pub fn get_blocks(&self) -> DfsResult<Vec<BlockRecord>> {
        self.db.list_blocks()
    }

    pub fn get_block_record(&self, id: &str) -> DfsResult<BlockRecord> {
        self.db.get_block(id)
    }

    /// Write a block body, insert the catalog row, then notify the name
    /// service. The body and row are kept on notification failure; the
    /// next `report()` reconciles.
    pub async fn write_block(
        &self,
        id: &str,
        path: &str,
        sequence: u64,
        data: &[u8],
    ) -> DfsResult<BlockRecord> {
        let id = id.trim();
        if id.is_empty() {
            return Err(DfsError::InvalidParam("block id is empty".to_string()));
        }
        if path.trim().is_empty() {
            return Err(DfsError::InvalidParam("path is empty".to_string()));
        }
        if data.is_empty() {
            return Err(DfsError::InvalidParam("data is empty".to_string()));
        }
        if self.db.get_block(id).is_ok() {
            return Err(DfsError::AlreadyExists(format!(
                "block {} already exists",
                id
            )));
        }

        let data_file_path = self.data_dir.join(id);
        fs::write(&data_file_path, data).await.map_err(|e| {
            warn!("write_block: write data file failed! {}", e);
            DfsError::IoError(format!(
                "failed to write data file {}: {}",
                data_file_path.to_string_lossy(),
                e
            ))
        })?;

        let record = BlockRecord::new(
            id,
            sequence,
            data.len() as u32,
            crc32(data),
            path,
            &data_file_path.to_string_lossy(),
        );
        self.db.insert_block(&record)?;

        self.notifier
            .notify_block_added(&self.host, &record)
            .await
            .map_err(|e| {
                warn!("write_block: notify added failed for {}: {}", id, e);
                DfsError::RemoteError(format!("failed to notify block {} added: {}", id, e))
            })?;

        Ok(record)
    }

    /// Remove the catalog row, notify the name service, then unlink the
    /// body. A missing body on unlink is logged, not fatal.
    pub async fn delete_block(&self, id: &str) -> DfsResult<()> {
        let record = self.db.get_block(id)?;
        self.db.remove_block(id)?;

        self.notifier
            .notify_block_removed(&self.host, &record.block_id, &record.path)
            .await
            .map_err(|e| {
                warn!("delete_block: notify removed failed for {}: {}", id, e);
                DfsError::RemoteError(format!("failed to notify block {} removed: {}", id, e))
            })?;

        if let Err(e) = fs::remove_file(&record.data_file_path).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                warn!(
                    "delete_block: data file already gone: {}",
                    record.data_file_path
                );
            } else {
                return Err(DfsError::IoError(format!(
                    "failed to remove data file {}: {}",
                    record.data_file_path, e
                )));
            }
        }

        Ok(())
    }

    /// Read a block body and verify it against the stored metadata.
    /// A mismatch surfaces as an integrity error; the replica stays on
    /// disk until the next `validate_crc` sweep reclaims it.
    pub async fn read_block(&self, id: &str) -> DfsResult<(Vec<u8>, BlockRecord)> {
        let record = self.db.get_block(id)?;
        let data = fs::read(&record.data_file_path).await.map_err(|e| {
            DfsError::IoError(format!(
                "failed to read data file {}: {}",
                record.data_file_path, e
            ))
        })?;

        verify_block(&data, record.crc, record.length)
            .map_err(|e| DfsError::IntegrityError(format!("block {}: {}", id, e)))?;

        Ok((data, record))
    }

    /// Resend every catalog entry to the name service. Per-entry errors
    /// are joined so one bad send does not stop the pass.
    pub async fn report(&self) -> DfsResult<()> {
        let records = self.db.list_blocks()?;
        let mut errors = Vec::new();

        for record in &records {
            if let Err(e) = self.notifier.notify_block_present(&self.host, record).await {
                warn!(
                    "report: notify present failed for {}: {}",
                    record.block_id, e
                );
                errors.push(e);
            }
        }

        match join_errors(errors) {
            Some(e) => Err(DfsError::RemoteError(format!(
                "failed to report blocks: {}",
                e
            ))),
            None => Ok(()),
        }
    }

    /// Drop catalog entries whose body is missing from disk.
    pub async fn health_check(&self) -> DfsResult<()> {
        let records = self.db.list_blocks()?;
        let mut errors = Vec::new();

        for record in &records {
            if Path::new(&record.data_file_path).exists() {
                continue;
            }
            info!(
                "health_check: data file missing, dropping block {}",
                record.block_id
            );
            if let Err(e) = self.delete_block(&record.block_id).await {
                errors.push(e);
            }
        }

        match join_errors(errors) {
            Some(e) => Err(DfsError::Internal(format!("health check failed: {}", e))),
            None => Ok(()),
        }
    }

    /// Full integrity sweep: re-checksum every body on disk, drop
    /// catalog entries whose body is missing or disagrees on
    /// `(crc, length)`, then unlink bodies no catalog entry references.
    pub async fn validate_crc(&self) -> DfsResult<()> {
        let mut scanned: HashMap<String, (u32, u32)> = HashMap::new();

        let mut entries = fs::read_dir(&self.data_dir).await.map_err(|e| {
            DfsError::IoError(format!(
                "cannot read dir {}: {}",
                self.data_dir.to_string_lossy(),
                e
            ))
        })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DfsError::IoError(e.to_string()))?
        {
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    warn!("validate_crc: cannot stat entry: {}", e);
                    continue;
                }
            };
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&self.db_file_name) {
                continue;
            }

            let path = entry.path();
            match fs::read(&path).await {
                Ok(data) => {
                    scanned.insert(
                        path.to_string_lossy().to_string(),
                        (crc32(&data), data.len() as u32),
                    );
                }
                Err(e) => {
                    warn!(
                        "validate_crc: cannot read file {}: {}",
                        path.to_string_lossy(),
                        e
                    );
                }
            }
        }

        let records = self.db.list_blocks()?;
        let mut errors = Vec::new();

        for record in &records {
            let keep = match scanned.remove(&record.data_file_path) {
                Some((crc, length)) => crc == record.crc && length == record.length,
                None => false,
            };
            if keep {
                continue;
            }
            info!(
                "validate_crc: dropping block {} (missing or corrupt body)",
                record.block_id
            );
            if let Err(e) = self.delete_block(&record.block_id).await {
                errors.push(e);
            }
        }

        // Whatever survived the removal above has no catalog entry.
        for orphan in scanned.keys() {
            info!("validate_crc: removing orphan data file {}", orphan);
            if let Err(e) = fs::remove_file(orphan).await {
                errors.push(DfsError::IoError(format!(
                    "failed to remove orphan {}: {}",
                    orphan, e
                )));
            }
        }

        match join_errors(errors) {
            Some(e) => Err(DfsError::Internal(format!("validate crc failed: {}", e))),
            None => Ok(()),
        }
    }
}
