use std::sync::Mutex;
use std::time::Duration;

use dfs_lib::wire::Permissions;
use dfs_lib::{unix_timestamp, DfsError, DfsResult};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const ROOT_USER: &str = "root";

/// Effective rights of a principal over a resolved path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Privileges {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl Privileges {
    pub fn all() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
        }
    }

    /// Intersection of two independent checks. Not used for per-path
    /// authorization, which accumulates grants instead.
    pub fn union(self, other: Privileges) -> Privileges {
        Privileges {
            read: self.read && other.read,
            write: self.write && other.write,
            delete: self.delete && other.delete,
        }
    }
}

/// Authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Root,
    User { user: String, groups: Vec<String> },
}

impl Principal {
    pub fn user(user: &str, groups: &[&str]) -> Self {
        Principal::User {
            user: user.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    /// Accumulate grants over a permission chain: any entry granting a
    /// privilege grants it. Root bypasses the walk entirely.
    pub fn compute_privileges<'a, I>(&self, chain: I) -> Privileges
    where
        I: IntoIterator<Item = &'a Permissions>,
    {
        let (user, groups) = match self {
            Principal::Root => return Privileges::all(),
            Principal::User { user, groups } => (user, groups),
        };

        let mut privileges = Privileges::default();
        for permissions in chain {
            let other = &permissions.other_permission;
            privileges.read |= other.read;
            privileges.write |= other.write;
            privileges.delete |= other.delete;

            if permissions.owner == *user {
                let owner = &permissions.owner_permission;
                privileges.read |= owner.read;
                privileges.write |= owner.write;
                privileges.delete |= owner.delete;
            }

            if groups.iter().any(|g| *g == permissions.group) {
                let group = &permissions.group_permission;
                privileges.read |= group.read;
                privileges.write |= group.write;
                privileges.delete |= group.delete;
            }

            if privileges == Privileges::all() {
                return privileges;
            }
        }

        privileges
    }
}

/// Accounts, groups and opaque session tokens, backed by the name
/// service database.
pub struct SecurityService {
    conn: Mutex<Connection>,
    token_expiration: Duration,
}

impl SecurityService {
    pub fn open(db_path: &str, token_expiration: Duration) -> DfsResult<Self> {
        debug!("SecurityService: open db path: {}", db_path);
        let conn = Connection::open(db_path).map_err(|e| {
            warn!("SecurityService: open db failed! {}", e);
            DfsError::DbError(e.to_string())
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;

             CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                password_digest TEXT NOT NULL,
                created_at INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
             );

             CREATE TABLE IF NOT EXISTS user_groups (
                user_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                PRIMARY KEY (user_id, group_id)
             );

             CREATE TABLE IF NOT EXISTS tokens (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
             );",
        )
        .map_err(|e| DfsError::DbError(format!("create security schema failed: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            token_expiration,
        })
    }

    pub fn create_user(&self, name: &str, password: &str) -> DfsResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DfsError::InvalidParam("user name is empty".to_string()));
        }

        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO users (name, password_digest, created_at)
                 VALUES (?1, ?2, ?3)",
                params![name, digest(password), unix_timestamp() as i64],
            )
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        if inserted == 0 {
            return Err(DfsError::AlreadyExists(format!(
                "user {} already exists",
                name
            )));
        }
        info!("SecurityService: created user {}", name);
        Ok(())
    }

    pub fn create_group(&self, name: &str) -> DfsResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DfsError::InvalidParam("group name is empty".to_string()));
        }

        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO groups (name) VALUES (?1)",
                params![name],
            )
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        if inserted == 0 {
            return Err(DfsError::AlreadyExists(format!(
                "group {} already exists",
                name
            )));
        }
        Ok(())
    }

    pub fn add_user_to_group(&self, user: &str, group: &str) -> DfsResult<()> {
        let conn = self.conn.lock().unwrap();
        let user_id = lookup_id(&conn, "users", user)?;
        let group_id = lookup_id(&conn, "groups", group)?;
        conn.execute(
            "INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?1, ?2)",
            params![user_id, group_id],
        )
        .map_err(|e| DfsError::DbError(e.to_string()))?;
        Ok(())
    }

    /// Verify a credential and issue a fresh token.
    pub fn authenticate(&self, user: &str, password: &str) -> DfsResult<String> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, password_digest FROM users WHERE name = ?1",
                params![user],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        let (user_id, stored) = row.ok_or_else(|| {
            DfsError::Unauthenticated(format!("unknown user '{}'", user))
        })?;

        if stored != digest(password) {
            return Err(DfsError::Unauthenticated(format!(
                "bad credentials for '{}'",
                user
            )));
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = unix_timestamp() + self.token_expiration.as_secs();
        conn.execute(
            "INSERT INTO tokens (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, expires_at as i64],
        )
        .map_err(|e| DfsError::DbError(e.to_string()))?;

        info!("SecurityService: issued token for user {}", user);
        Ok(token)
    }

    pub fn logout(&self, token: &str) -> DfsResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM tokens WHERE token = ?1", params![token])
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        Ok(())
    }

    /// Resolve a token to the principal it authenticates. Expired
    /// tokens fail and are purged in passing.
    pub fn lookup_principal(&self, token: &str) -> DfsResult<Principal> {
        let conn = self.conn.lock().unwrap();
        let now = unix_timestamp() as i64;

        conn.execute("DELETE FROM tokens WHERE expires_at <= ?1", params![now])
            .map_err(|e| DfsError::DbError(e.to_string()))?;

        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT u.id, u.name FROM tokens t JOIN users u ON u.id = t.user_id
                 WHERE t.token = ?1 AND t.expires_at > ?2",
                params![token, now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        let (user_id, name) = row.ok_or_else(|| {
            DfsError::Unauthenticated("missing or expired token".to_string())
        })?;

        if name == ROOT_USER {
            return Ok(Principal::Root);
        }

        let mut stmt = conn
            .prepare(
                "SELECT g.name FROM user_groups ug JOIN groups g ON g.id = ug.group_id
                 WHERE ug.user_id = ?1 ORDER BY g.name",
            )
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))
            .map_err(|e| DfsError::DbError(e.to_string()))?;
        let mut groups = Vec::new();
        for row in rows {
            groups.push(row.map_err(|e| DfsError::DbError(e.to_string()))?);
        }

        Ok(Principal::User { user: name, groups })
    }
}

fn lookup_id(conn: &Connection, table: &str, name: &str) -> DfsResult<i64> {
    let sql = format!("SELECT id FROM {} WHERE name = ?1", table);
    conn.query_row(&sql, params![name], |row| row.get(0))
        .optional()
        .map_err(|e| DfsError::DbError(e.to_string()))?
        .ok_or_else(|| DfsError::NotFound(format!("{} '{}' not found", table, name)))
}

fn digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
