use std::sync::Mutex;

use dfs_lib::wire::{BlockNotification, BlockRemovalNotification, Permission, Permissions};
use dfs_lib::{path, unix_timestamp, DfsError, DfsResult};
use log::{debug, info, warn};
use rusqlite::Connection;

use crate::meta_db::{self, BlockEntry, FileEntry};
use crate::security::{Principal, Privileges};

/// The namespace and block-location registry. Every operation resolves
/// its path, checks privileges and mutates inside one transaction, so a
/// concurrent create cannot slip a duplicate past the check.
pub struct NamespaceService {
    conn: Mutex<Connection>,
}

impl NamespaceService {
    pub fn open(db_path: &str) -> DfsResult<Self> {
        debug!("NamespaceService: open db path: {}", db_path);
        let mut conn = Connection::open(db_path).map_err(|e| {
            warn!("NamespaceService: open db failed! {}", e);
            DfsError::DbError(e.to_string())
        })?;
        meta_db::init_connection(&conn)?;
        meta_db::create_schema(&conn)?;

        let tx = conn.transaction().map_err(meta_db::map_db_err)?;
        if meta_db::get_root(&tx)?.is_none() {
            info!("NamespaceService: no root directory, creating one");
            // Owner and group hold full rights; everyone else can only
            // read, so grants do not leak down from the root.
            let root_permissions = Permissions {
                owner: "root".to_string(),
                group: "root".to_string(),
                owner_permission: Permission::all(),
                group_permission: Permission::all(),
                other_permission: Permission {
                    read: true,
                    write: false,
                    delete: false,
                },
            };
            meta_db::insert_file(&tx, None, "", true, &root_permissions, unix_timestamp())?;
        }
        tx.commit().map_err(meta_db::map_db_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn stat(&self, principal: &Principal, target: &str) -> DfsResult<FileEntry> {
        let conn = self.conn.lock().unwrap();
        let chain = lookup(&conn, target)?;
        require(principal, &chain, Gate::Read, target)?;
        Ok(chain.into_iter().last().unwrap())
    }

    pub fn list(&self, principal: &Principal, target: &str) -> DfsResult<Vec<FileEntry>> {
        let conn = self.conn.lock().unwrap();
        let chain = lookup(&conn, target)?;
        require(principal, &chain, Gate::Read, target)?;
        meta_db::list_children(&conn, chain.last().unwrap().id)
    }

    pub fn create_file(
        &self,
        principal: &Principal,
        target: &str,
        permissions: Permissions,
    ) -> DfsResult<FileEntry> {
        self.create_entry(principal, target, permissions, false)
    }

    pub fn create_dir(
        &self,
        principal: &Principal,
        target: &str,
        permissions: Permissions,
    ) -> DfsResult<FileEntry> {
        self.create_entry(principal, target, permissions, true)
    }

    fn create_entry(
        &self,
        principal: &Principal,
        target: &str,
        permissions: Permissions,
        is_dir: bool,
    ) -> DfsResult<FileEntry> {
        let (full, parent_path, name) = path::split_path(target)?;
        if name.is_empty() {
            return Err(DfsError::InvalidParam(
                "cannot create the root directory".to_string(),
            ));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(meta_db::map_db_err)?;

        let parents = lookup(&tx, &parent_path)?;
        let parent = parents.last().unwrap();
        if !parent.is_dir {
            return Err(DfsError::InvalidParam(format!(
                "parent of '{}' is not a directory",
                full
            )));
        }
        require(principal, &parents, Gate::Write, &full)?;

        if meta_db::get_child(&tx, parent.id, &name)?.is_some() {
            return Err(DfsError::AlreadyExists(format!("'{}' already exists", full)));
        }

        let entry = meta_db::insert_file(
            &tx,
            Some(parent.id),
            &name,
            is_dir,
            &permissions,
            unix_timestamp(),
        )?;
        tx.commit().map_err(meta_db::map_db_err)?;

        info!(
            "namespace: created {} '{}'",
            if is_dir { "dir" } else { "file" },
            full
        );
        Ok(entry)
    }

    pub fn delete_file(&self, principal: &Principal, target: &str) -> DfsResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(meta_db::map_db_err)?;

        let chain = lookup(&tx, target)?;
        require(principal, &chain, Gate::Delete, target)?;
        let entry = chain.last().unwrap();
        if entry.is_dir {
            return Err(DfsError::InvalidParam(format!(
                "'{}' is a directory, not a file",
                target
            )));
        }

        meta_db::delete_file_row(&tx, entry.id)?;
        tx.commit().map_err(meta_db::map_db_err)?;
        info!("namespace: deleted file '{}'", target);
        Ok(())
    }

    pub fn delete_dir(&self, principal: &Principal, target: &str) -> DfsResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(meta_db::map_db_err)?;

        let chain = lookup(&tx, target)?;
        require(principal, &chain, Gate::Delete, target)?;
        let entry = chain.last().unwrap();
        if !entry.is_dir {
            return Err(DfsError::InvalidParam(format!(
                "'{}' is a file, not a directory",
                target
            )));
        }
        if entry.is_root() {
            return Err(DfsError::InvalidParam(
                "cannot delete the root directory".to_string(),
            ));
        }
        if meta_db::count_children(&tx, entry.id)? > 0 {
            return Err(DfsError::NotEmpty(format!(
                "directory '{}' is not empty",
                target
            )));
        }

        meta_db::delete_file_row(&tx, entry.id)?;
        tx.commit().map_err(meta_db::map_db_err)?;
        info!("namespace: deleted dir '{}'", target);
        Ok(())
    }

    pub fn get_block_infos(
        &self,
        principal: &Principal,
        target: &str,
    ) -> DfsResult<Vec<BlockEntry>> {
        let conn = self.conn.lock().unwrap();
        let chain = lookup(&conn, target)?;
        require(principal, &chain, Gate::Read, target)?;
        meta_db::blocks_for_file(&conn, chain.last().unwrap().id)
    }

    /// Idempotent upsert from a node report: create the block on first
    /// sight, verify immutable fields afterwards, register the location
    /// if it is new.
    pub fn notify_block_present(&self, n: &BlockNotification) -> DfsResult<()> {
        self.apply_block_notification(n, true)
    }

    /// Like `notify_block_present`, except the location must be new.
    pub fn notify_block_added(&self, n: &BlockNotification) -> DfsResult<()> {
        self.apply_block_notification(n, false)
    }

    fn apply_block_notification(
        &self,
        n: &BlockNotification,
        ignore_existing_location: bool,
    ) -> DfsResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(meta_db::map_db_err)?;

        let chain = lookup(&tx, &n.path)?;
        let file = chain.last().unwrap();
        if file.is_dir {
            return Err(DfsError::InvalidParam(format!(
                "'{}' is a directory, blocks can only belong to files",
                n.path
            )));
        }

        let block = match meta_db::get_block(&tx, &n.block_id)? {
            Some(block) => block,
            None => {
                meta_db::insert_block(
                    &tx,
                    &n.block_id,
                    file.id,
                    n.sequence,
                    n.length,
                    n.crc,
                    unix_timestamp(),
                )?;
                meta_db::get_block(&tx, &n.block_id)?.ok_or_else(|| {
                    DfsError::Internal(format!("block {} vanished after insert", n.block_id))
                })?
            }
        };

        if block.sequence != n.sequence {
            return Err(DfsError::Conflict(format!(
                "block {}: sequence {} does not match stored {}",
                n.block_id, n.sequence, block.sequence
            )));
        }
        if block.length != n.length {
            return Err(DfsError::Conflict(format!(
                "block {}: length {} does not match stored {}",
                n.block_id, n.length, block.length
            )));
        }
        if block.crc != n.crc {
            return Err(DfsError::Conflict(format!(
                "block {}: crc {} does not match stored {}",
                n.block_id, n.crc, block.crc
            )));
        }

        let already_there = block.locations.iter().any(|h| *h == n.host);
        if already_there && ignore_existing_location {
            tx.commit().map_err(meta_db::map_db_err)?;
            return Ok(());
        }
        meta_db::insert_location(&tx, &n.block_id, &n.host)?;

        tx.commit().map_err(meta_db::map_db_err)?;
        Ok(())
    }

    pub fn notify_block_removed(&self, n: &BlockRemovalNotification) -> DfsResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(meta_db::map_db_err)?;

        let chain = lookup(&tx, &n.path)?;
        if chain.last().unwrap().is_dir {
            return Err(DfsError::InvalidParam(format!(
                "'{}' is a directory, blocks can only belong to files",
                n.path
            )));
        }
        if meta_db::get_block(&tx, &n.block_id)?.is_none() {
            return Err(DfsError::NotFound(format!(
                "block not found: {}",
                n.block_id
            )));
        }

        meta_db::delete_location(&tx, &n.block_id, &n.host)?;
        tx.commit().map_err(meta_db::map_db_err)?;
        Ok(())
    }

    /// Drop every replica location held by a dead host.
    pub fn node_removed(&self, host: &str) -> DfsResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(meta_db::map_db_err)?;
        let removed = meta_db::delete_locations_for_host(&tx, host)?;
        tx.commit().map_err(meta_db::map_db_err)?;
        info!("namespace: removed {} locations of host {}", removed, host);
        Ok(())
    }

    /// Full block enumeration for the healing pass.
    pub fn get_all_block_infos(&self) -> DfsResult<Vec<BlockEntry>> {
        let conn = self.conn.lock().unwrap();
        meta_db::all_blocks(&conn)
    }
}

enum Gate {
    Read,
    Write,
    Delete,
}

fn require(
    principal: &Principal,
    chain: &[FileEntry],
    gate: Gate,
    target: &str,
) -> DfsResult<()> {
    let privileges: Privileges =
        principal.compute_privileges(chain.iter().map(|entry| &entry.permissions));
    let granted = match gate {
        Gate::Read => privileges.read,
        Gate::Write => privileges.write,
        Gate::Delete => privileges.delete,
    };
    if granted {
        Ok(())
    } else {
        Err(DfsError::PermissionDenied(format!(
            "permission denied for '{}'",
            target
        )))
    }
}

/// Resolve a path to its chain of entries, root first. Walks children
/// under the caller's transaction, stops at the first non-directory or
/// the last component; a missing child fails the resolution.
fn lookup(conn: &Connection, target: &str) -> DfsResult<Vec<FileEntry>> {
    let root = meta_db::get_root(conn)?
        .ok_or_else(|| DfsError::Internal("root directory is missing".to_string()))?;

    let mut chain = vec![root];
    for segment in path::segments(target)? {
        let current = chain.last().unwrap();
        let child = meta_db::get_child(conn, current.id, &segment)?.ok_or_else(|| {
            DfsError::NotFound(format!("'{}' not found in '{}'", segment, target))
        })?;
        let is_dir = child.is_dir;
        chain.push(child);
        if !is_dir {
            break;
        }
    }

    Ok(chain)
}
