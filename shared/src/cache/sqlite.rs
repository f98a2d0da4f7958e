//! Durable cache storage on SQLite. Not available on wasm32.

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::capabilities::{
    CacheError, CacheName, CacheStorage, Method, RequestKey, Response, ResponseType,
};
use crate::model::UnixTimeMs;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS cache_names (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (cache, method, url)
);
";

pub struct SqliteCacheStorage {
    conn: Mutex<Connection>,
}

fn storage_err(e: rusqlite::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

fn now_ms() -> i64 {
    i64::try_from(UnixTimeMs::now().0).unwrap_or(i64::MAX)
}

fn insert_entry(
    conn: &Connection,
    name: &CacheName,
    key: &RequestKey,
    response: &Response,
) -> Result<(), CacheError> {
    let headers = serde_json::to_string(&response.headers)
        .map_err(|e| CacheError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT OR IGNORE INTO cache_names (name, created_at) VALUES (?1, ?2)",
        params![name.as_str(), now_ms()],
    )
    .map_err(storage_err)?;
    conn.execute(
        "INSERT OR REPLACE INTO cache_entries
            (cache, method, url, status, response_type, headers, body, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            name.as_str(),
            key.method().as_str(),
            key.url(),
            response.status,
            response.response_type.as_str(),
            headers,
            response.body.as_ref(),
            now_ms(),
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

impl SqliteCacheStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(|e| {
            CacheError::Storage(format!("failed to open {}: {e}", path.display()))
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory().map_err(storage_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockFailed)
    }
}

#[async_trait::async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, name: &CacheName) -> Result<bool, CacheError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO cache_names (name, created_at) VALUES (?1, ?2)",
                params![name.as_str(), now_ms()],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    async fn lookup(
        &self,
        name: &CacheName,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT status, response_type, headers, body FROM cache_entries
                 WHERE cache = ?1 AND method = ?2 AND url = ?3",
                params![name.as_str(), key.method().as_str(), key.url()],
                |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(storage_err)?;

        let Some((status, response_type, headers, body)) = row else {
            return Ok(None);
        };

        let response_type = ResponseType::parse(&response_type).ok_or_else(|| {
            CacheError::Serialization(format!("unknown response type '{response_type}'"))
        })?;
        let headers = serde_json::from_str(&headers)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        Ok(Some(Response {
            status,
            response_type,
            headers,
            body: Bytes::from(body),
        }))
    }

    async fn put(
        &self,
        name: &CacheName,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        let conn = self.lock()?;
        insert_entry(&conn, name, &key, &response)
    }

    async fn put_all(
        &self,
        name: &CacheName,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        for (key, response) in &entries {
            insert_entry(&tx, name, key, response)?;
        }
        tx.commit().map_err(storage_err)
    }

    async fn keys(&self, name: &CacheName) -> Result<Vec<RequestKey>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT method, url FROM cache_entries WHERE cache = ?1")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![name.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage_err)?;

        let mut keys = Vec::new();
        for row in rows {
            let (method, url) = row.map_err(storage_err)?;
            let method = Method::parse(&method).ok_or_else(|| {
                CacheError::Serialization(format!("unknown method '{method}'"))
            })?;
            keys.push(RequestKey::from_parts(method, url));
        }
        keys.sort();
        Ok(keys)
    }

    async fn names(&self) -> Result<BTreeSet<String>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name FROM cache_names")
            .map_err(storage_err)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(storage_err)?;
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        tx.execute("DELETE FROM cache_entries WHERE cache = ?1", params![name])
            .map_err(storage_err)?;
        let removed = tx
            .execute("DELETE FROM cache_names WHERE name = ?1", params![name])
            .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
        Ok(removed > 0)
    }
}
