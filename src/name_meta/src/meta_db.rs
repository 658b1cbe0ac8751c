//! Namespace schema and row-level helpers. Everything here runs inside
//! a caller-owned transaction; `NamespaceService` owns the transaction
//! boundaries.

use dfs_lib::wire::{Permission, Permissions};
use dfs_lib::{DfsError, DfsResult};
use rusqlite::{params, Connection, OptionalExtension};

/// One namespace row: a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub is_dir: bool,
    pub created_at: u64,
    pub updated_at: u64,
    pub permissions: Permissions,
}

impl FileEntry {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A file-owned block with its replica locations, sorted by host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub block_id: String,
    pub file_id: i64,
    pub sequence: u64,
    pub length: u32,
    pub crc: u32,
    pub locations: Vec<String>,
}

/// A file is healthy iff its sequences are dense from 0 and every block
/// has at least one replica. Expects blocks sorted by sequence.
pub fn file_is_healthy(blocks: &[BlockEntry]) -> bool {
    blocks
        .iter()
        .enumerate()
        .all(|(i, b)| b.sequence == i as u64 && !b.locations.is_empty())
}

pub(crate) fn map_db_err(e: rusqlite::Error) -> DfsError {
    DfsError::DbError(e.to_string())
}

pub(crate) fn init_connection(conn: &Connection) -> DfsResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA foreign_keys = ON;",
    )
    .map_err(|e| DfsError::DbError(format!("pragma failed: {}", e)))
}

pub(crate) fn create_schema(conn: &Connection) -> DfsResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER REFERENCES files(id),
            name TEXT NOT NULL,
            is_dir INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            owner TEXT NOT NULL,
            grp TEXT NOT NULL,
            owner_read INTEGER NOT NULL, owner_write INTEGER NOT NULL, owner_delete INTEGER NOT NULL,
            group_read INTEGER NOT NULL, group_write INTEGER NOT NULL, group_delete INTEGER NOT NULL,
            other_read INTEGER NOT NULL, other_write INTEGER NOT NULL, other_delete INTEGER NOT NULL,
            UNIQUE (parent_id, name)
        );

        CREATE TABLE IF NOT EXISTS blocks (
            block_id TEXT PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            sequence INTEGER NOT NULL,
            length INTEGER NOT NULL,
            crc INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (file_id, sequence)
        );

        CREATE TABLE IF NOT EXISTS locations (
            block_id TEXT NOT NULL REFERENCES blocks(block_id) ON DELETE CASCADE,
            host TEXT NOT NULL,
            PRIMARY KEY (block_id, host)
        );

        CREATE INDEX IF NOT EXISTS idx_files_parent ON files(parent_id);
        CREATE INDEX IF NOT EXISTS idx_locations_host ON locations(host);",
    )
    .map_err(|e| DfsError::DbError(format!("create schema failed: {}", e)))
}

const FILE_COLUMNS: &str = "id, parent_id, name, is_dir, created_at, updated_at, owner, grp, \
     owner_read, owner_write, owner_delete, \
     group_read, group_write, group_delete, \
     other_read, other_write, other_delete";

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileEntry> {
    Ok(FileEntry {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        name: row.get(2)?,
        is_dir: row.get(3)?,
        created_at: row.get::<_, i64>(4)? as u64,
        updated_at: row.get::<_, i64>(5)? as u64,
        permissions: Permissions {
            owner: row.get(6)?,
            group: row.get(7)?,
            owner_permission: Permission {
                read: row.get(8)?,
                write: row.get(9)?,
                delete: row.get(10)?,
            },
            group_permission: Permission {
                read: row.get(11)?,
                write: row.get(12)?,
                delete: row.get(13)?,
            },
            other_permission: Permission {
                read: row.get(14)?,
                write: row.get(15)?,
                delete: row.get(16)?,
            },
        },
    })
}

pub(crate) fn get_root(conn: &Connection) -> DfsResult<Option<FileEntry>> {
    let sql = format!("SELECT {} FROM files WHERE parent_id IS NULL", FILE_COLUMNS);
    conn.query_row(&sql, [], row_to_file)
        .optional()
        .map_err(map_db_err)
}

pub(crate) fn get_child(
    conn: &Connection,
    parent_id: i64,
    name: &str,
) -> DfsResult<Option<FileEntry>> {
    let sql = format!(
        "SELECT {} FROM files WHERE parent_id = ?1 AND name = ?2",
        FILE_COLUMNS
    );
    conn.query_row(&sql, params![parent_id, name], row_to_file)
        .optional()
        .map_err(map_db_err)
}

pub(crate) fn list_children(conn: &Connection, parent_id: i64) -> DfsResult<Vec<FileEntry>> {
    let sql = format!(
        "SELECT {} FROM files WHERE parent_id = ?1 ORDER BY name",
        FILE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(map_db_err)?;
    let rows = stmt
        .query_map(params![parent_id], row_to_file)
        .map_err(map_db_err)?;

    let mut children = Vec::new();
    for row in rows {
        children.push(row.map_err(map_db_err)?);
    }
    Ok(children)
}

pub(crate) fn count_children(conn: &Connection, parent_id: i64) -> DfsResult<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM files WHERE parent_id = ?1",
        params![parent_id],
        |row| row.get(0),
    )
    .map_err(map_db_err)
}

pub(crate) fn insert_file(
    conn: &Connection,
    parent_id: Option<i64>,
    name: &str,
    is_dir: bool,
    permissions: &Permissions,
    now: u64,
) -> DfsResult<FileEntry> {
    conn.execute(
        "INSERT INTO files
         (parent_id, name, is_dir, created_at, updated_at, owner, grp,
          owner_read, owner_write, owner_delete,
          group_read, group_write, group_delete,
          other_read, other_write, other_delete)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            parent_id,
            name,
            is_dir,
            now as i64,
            now as i64,
            permissions.owner,
            permissions.group,
            permissions.owner_permission.read,
            permissions.owner_permission.write,
            permissions.owner_permission.delete,
            permissions.group_permission.read,
            permissions.group_permission.write,
            permissions.group_permission.delete,
            permissions.other_permission.read,
            permissions.other_permission.write,
            permissions.other_permission.delete,
        ],
    )
    .map_err(map_db_err)?;

    Ok(FileEntry {
        id: conn.last_insert_rowid(),
        parent_id,
        name: name.to_string(),
        is_dir,
        created_at: now,
        updated_at: now,
        permissions: permissions.clone(),
    })
}

pub(crate) fn delete_file_row(conn: &Connection, id: i64) -> DfsResult<()> {
    let removed = conn
        .execute("DELETE FROM files WHERE id = ?1", params![id])
        .map_err(map_db_err)?;
    if removed == 0 {
        return Err(DfsError::NotFound(format!("file row {} not found", id)));
    }
    Ok(())
}

pub(crate) fn get_block(conn: &Connection, block_id: &str) -> DfsResult<Option<BlockEntry>> {
    let row = conn
        .query_row(
            "SELECT block_id, file_id, sequence, length, crc FROM blocks WHERE block_id = ?1",
            params![block_id],
            |row| {
                Ok(BlockEntry {
                    block_id: row.get(0)?,
                    file_id: row.get(1)?,
                    sequence: row.get::<_, i64>(2)? as u64,
                    length: row.get::<_, i64>(3)? as u32,
                    crc: row.get::<_, i64>(4)? as u32,
                    locations: Vec::new(),
                })
            },
        )
        .optional()
        .map_err(map_db_err)?;

    match row {
        Some(mut block) => {
            block.locations = get_locations(conn, block_id)?;
            Ok(Some(block))
        }
        None => Ok(None),
    }
}

pub(crate) fn insert_block(
    conn: &Connection,
    block_id: &str,
    file_id: i64,
    sequence: u64,
    length: u32,
    crc: u32,
    now: u64,
) -> DfsResult<()> {
    if block_id.trim().is_empty() {
        return Err(DfsError::InvalidParam("block id is empty".to_string()));
    }
    conn.execute(
        "INSERT INTO blocks (block_id, file_id, sequence, length, crc, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            block_id,
            file_id,
            sequence as i64,
            length as i64,
            crc as i64,
            now as i64
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DfsError::Conflict(format!(
                "block {} conflicts with an existing block of file {}",
                block_id, file_id
            ))
        }
        other => map_db_err(other),
    })?;
    Ok(())
}

pub(crate) fn get_locations(conn: &Connection, block_id: &str) -> DfsResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT host FROM locations WHERE block_id = ?1 ORDER BY host")
        .map_err(map_db_err)?;
    let rows = stmt
        .query_map(params![block_id], |row| row.get::<_, String>(0))
        .map_err(map_db_err)?;

    let mut hosts = Vec::new();
    for row in rows {
        hosts.push(row.map_err(map_db_err)?);
    }
    Ok(hosts)
}

pub(crate) fn insert_location(conn: &Connection, block_id: &str, host: &str) -> DfsResult<()> {
    if host.trim().is_empty() {
        return Err(DfsError::InvalidParam("location host is empty".to_string()));
    }
    conn.execute(
        "INSERT INTO locations (block_id, host) VALUES (?1, ?2)",
        params![block_id, host],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DfsError::AlreadyExists(format!(
                "location ({}, {}) already exists",
                block_id, host
            ))
        }
        other => map_db_err(other),
    })?;
    Ok(())
}

pub(crate) fn delete_location(conn: &Connection, block_id: &str, host: &str) -> DfsResult<()> {
    conn.execute(
        "DELETE FROM locations WHERE block_id = ?1 AND host = ?2",
        params![block_id, host],
    )
    .map_err(map_db_err)?;
    Ok(())
}

pub(crate) fn delete_locations_for_host(conn: &Connection, host: &str) -> DfsResult<usize> {
    conn.execute("DELETE FROM locations WHERE host = ?1", params![host])
        .map_err(map_db_err)
}

pub(crate) fn blocks_for_file(conn: &Connection, file_id: i64) -> DfsResult<Vec<BlockEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT block_id, file_id, sequence, length, crc FROM blocks
             WHERE file_id = ?1 ORDER BY sequence",
        )
        .map_err(map_db_err)?;
    let rows = stmt
        .query_map(params![file_id], |row| {
            Ok(BlockEntry {
                block_id: row.get(0)?,
                file_id: row.get(1)?,
                sequence: row.get::<_, i64>(2)? as u64,
                length: row.get::<_, i64>(3)? as u32,
                crc: row.get::<_, i64>(4)? as u32,
                locations: Vec::new(),
            })
        })
        .map_err(map_db_err)?;

    let mut blocks = Vec::new();
    for row in rows {
        blocks.push(row.map_err(map_db_err)?);
    }
    for block in &mut blocks {
        block.locations = get_locations(conn, &block.block_id)?;
    }
    Ok(blocks)
}

pub(crate) fn all_blocks(conn: &Connection) -> DfsResult<Vec<BlockEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT block_id, file_id, sequence, length, crc FROM blocks ORDER BY block_id",
        )
        .map_err(map_db_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(BlockEntry {
                block_id: row.get(0)?,
                file_id: row.get(1)?,
                sequence: row.get::<_, i64>(2)? as u64,
                length: row.get::<_, i64>(3)? as u32,
                crc: row.get::<_, i64>(4)? as u32,
                locations: Vec::new(),
            })
        })
        .map_err(map_db_err)?;

    let mut blocks = Vec::new();
    for row in rows {
        blocks.push(row.map_err(map_db_err)?);
    }
    for block in &mut blocks {
        block.locations = get_locations(conn, &block.block_id)?;
    }
    Ok(blocks)
}
