//! Shared database cache for redb connections.
//!
//! redb refuses to open the same file twice within a process, so every store
//! that points at a path goes through this cache and shares one `Database`.

use crate::Result;
use parking_lot::RwLock;
use redb::Database;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Open databases keyed by path.
fn db_cache() -> &'static RwLock<HashMap<String, Arc<Database>>> {
    static CACHE: OnceLock<RwLock<HashMap<String, Arc<Database>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn cache_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Get or open a database, caching the connection for reuse.
///
/// Existing files are opened, missing files are created. Parent directories
/// are not created here.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use twinreg_storage::singleton::get_or_open_db;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db1 = get_or_open_db("./data/registry.redb")?;
/// let db2 = get_or_open_db("./data/registry.redb")?;
/// assert!(Arc::ptr_eq(&db1, &db2));
/// # Ok(())
/// # }
/// ```
pub fn get_or_open_db<P: AsRef<Path>>(path: P) -> Result<Arc<Database>> {
    let path = path.as_ref();
    let key = cache_key(path);

    if let Some(db) = db_cache().read().get(&key) {
        return Ok(db.clone());
    }

    let mut cache = db_cache().write();
    // Another thread may have opened it while we waited for the write lock.
    if let Some(db) = cache.get(&key) {
        return Ok(db.clone());
    }

    let db = if path.exists() {
        Database::open(path)?
    } else {
        Database::create(path)?
    };
    tracing::debug!(path = %key, "Opened redb database");

    let db = Arc::new(db);
    cache.insert(key, db.clone());
    Ok(db)
}

/// Remove a database from the cache.
///
/// The file stays open until every other `Arc<Database>` is dropped.
pub fn close_db<P: AsRef<Path>>(path: P) -> Option<Arc<Database>> {
    db_cache().write().remove(&cache_key(path.as_ref()))
}

/// Check if a specific database is currently cached.
pub fn is_cached<P: AsRef<Path>>(path: P) -> bool {
    db_cache().read().contains_key(&cache_key(path.as_ref()))
}
