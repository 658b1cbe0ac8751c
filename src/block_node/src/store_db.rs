use std::sync::Mutex;

use dfs_lib::{unix_timestamp, DfsError, DfsResult};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};

/// One catalog row: a block this node currently holds, with the
/// metadata needed to verify it and to report it to the name service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub block_id: String,
    pub sequence: u64,
    pub length: u32,
    pub crc: u32,
    /// Logical file path in the namespace this block belongs to.
    pub path: String,
    /// Local path of the block body.
    pub data_file_path: String,
    pub created_at: u64,
}

impl BlockRecord {
    pub fn new(
        block_id: &str,
        sequence: u64,
        length: u32,
        crc: u32,
        path: &str,
        data_file_path: &str,
    ) -> Self {
        Self {
            block_id: block_id.trim().to_string(),
            sequence,
            length,
            crc,
            path: path.trim().to_string(),
            data_file_path: data_file_path.trim().to_string(),
            created_at: unix_timestamp(),
        }
    }

    pub fn validate(&self) -> DfsResult<()> {
        if self.block_id.is_empty() {
            return Err(DfsError::InvalidParam("block id is empty".to_string()));
        }
        if self.path.is_empty() {
            return Err(DfsError::InvalidParam("path is empty".to_string()));
        }
        if self.data_file_path.is_empty() {
            return Err(DfsError::InvalidParam(
                "data file path is empty".to_string(),
            ));
        }
        if self.length == 0 {
            return Err(DfsError::InvalidParam("length is zero".to_string()));
        }
        Ok(())
    }
}

/// Local block catalog behind a single sqlite connection.
pub struct NodeStoreDb {
    pub db_path: String,
    conn: Mutex<Connection>,
}

impl NodeStoreDb {
    pub fn open(db_path: &str) -> DfsResult<Self> {
        debug!("NodeStoreDb: open db path: {}", db_path);
        let conn = Connection::open(db_path).map_err(|e| {
            warn!("NodeStoreDb: open db failed! {}", e);
            DfsError::DbError(e.to_string())
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| DfsError::DbError(format!("pragma failed: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                block_id TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL,
                length INTEGER NOT NULL,
                crc INTEGER NOT NULL,
                path TEXT NOT NULL,
                data_file_path TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            warn!("NodeStoreDb: create table blocks failed! {}", e);
            DfsError::DbError(e.to_string())
        })?;

        Ok(Self {
            db_path: db_path.to_string(),
            conn: Mutex::new(conn),
        })
    }

    pub fn insert_block(&self, record: &BlockRecord) -> DfsResult<()> {
        record.validate()?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| DfsError::DbError(e.to_string()))?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT block_id FROM blocks WHERE block_id = ?1",
                params![record.block_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        if existing.is_some() {
            return Err(DfsError::AlreadyExists(format!(
                "block {} already exists",
                record.block_id
            )));
        }

        tx.execute(
            "INSERT INTO blocks
             (block_id, sequence, length, crc, path, data_file_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.block_id,
                record.sequence as i64,
                record.length as i64,
                record.crc as i64,
                record.path,
                record.data_file_path,
                record.created_at as i64,
            ],
        )
        .map_err(|e| {
            warn!("NodeStoreDb: insert block failed! {}", e);
            DfsError::DbError(e.to_string())
        })?;

        tx.commit().map_err(|e| DfsError::DbError(e.to_string()))?;
        Ok(())
    }

    pub fn get_block(&self, block_id: &str) -> DfsResult<BlockRecord> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT block_id, sequence, length, crc, path, data_file_path, created_at
                 FROM blocks WHERE block_id = ?1",
            )
            .map_err(|e| DfsError::DbError(e.to_string()))?;

        stmt.query_row(params![block_id], row_to_record)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DfsError::NotFound(format!("block not found: {}", block_id))
                }
                _ => {
                    warn!("NodeStoreDb: get block failed! {}", e);
                    DfsError::DbError(e.to_string())
                }
            })
    }

    pub fn remove_block(&self, block_id: &str) -> DfsResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        let removed = tx
            .execute("DELETE FROM blocks WHERE block_id = ?1", params![block_id])
            .map_err(|e| {
                warn!("NodeStoreDb: delete block failed! {}", e);
                DfsError::DbError(e.to_string())
            })?;
        if removed == 0 {
            return Err(DfsError::NotFound(format!(
                "block not found: {}",
                block_id
            )));
        }
        tx.commit().map_err(|e| DfsError::DbError(e.to_string()))?;
        Ok(())
    }

    pub fn list_blocks(&self) -> DfsResult<Vec<BlockRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT block_id, sequence, length, crc, path, data_file_path, created_at
                 FROM blocks ORDER BY block_id",
            )
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| DfsError::DbError(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| DfsError::DbError(e.to_string()))?);
        }
        Ok(records)
    }

    pub fn list_block_ids(&self) -> DfsResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT block_id FROM blocks ORDER BY block_id")
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| DfsError::DbError(e.to_string()))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(|e| DfsError::DbError(e.to_string()))?);
        }
        Ok(ids)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockRecord> {
    Ok(BlockRecord {
        block_id: row.get(0)?,
        sequence: row.get::<_, i64>(1)? as u64,
        length: row.get::<_, i64>(2)? as u32,
        crc: row.get::<_, i64>(3)? as u32,
        path: row.get(4)?,
        data_file_path: row.get(5)?,
        created_at: row.get::<_, i64>(6)? as u64,
    })
}
