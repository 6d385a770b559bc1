use std::env;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

/// SQLite PRAGMA and open toggles for the build database (read-write, several workers).
#[derive(Clone, Debug)]
pub struct DbOpenConfig {
    /// Use WAL so readers do not block the single writer.
    pub wal: bool,
    /// If Some(kb) and kb > 0, set PRAGMA cache_size = -kb (KB units).
    pub cache_size_kb: Option<i64>,
    /// If Some(bytes) and bytes > 0, set PRAGMA mmap_size = bytes.
    pub mmap_size_bytes: Option<i64>,
    pub temp_store: Option<TempStore>,
    pub busy_timeout: Duration,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TempStore { Memory, File }

impl Display for TempStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self { TempStore::Memory => write!(f, "MEMORY"), TempStore::File => write!(f, "FILE"), }
    }
}

impl Default for DbOpenConfig {
    fn default() -> Self {
        Self {
            wal: true,
            cache_size_kb: Some(200_000), // ~200MB
            mmap_size_bytes: Some(268_435_456), // 256MB
            temp_store: Some(TempStore::Memory),
            busy_timeout: Duration::from_millis(crate::config::DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl DbOpenConfig {
    /// Load toggles from environment variables. Missing/invalid values fall back to defaults.
    ///
    /// Variables:
    /// - BLOCKCONN_SQLITE_WAL: "1"/"0" (default 1)
    /// - BLOCKCONN_SQLITE_CACHE_SIZE_KB: integer KB; 0 disables
    /// - BLOCKCONN_SQLITE_MMAP_SIZE: integer bytes; 0 disables
    /// - BLOCKCONN_SQLITE_TEMP_STORE: "MEMORY" or "FILE"; empty disables
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("BLOCKCONN_SQLITE_WAL") { cfg.wal = v != "0"; }
        if let Ok(v) = env::var("BLOCKCONN_SQLITE_CACHE_SIZE_KB") {
            match v.parse::<i64>() { Ok(n) if n > 0 => cfg.cache_size_kb = Some(n), _ => cfg.cache_size_kb = None }
        }
        if let Ok(v) = env::var("BLOCKCONN_SQLITE_MMAP_SIZE") {
            match v.parse::<i64>() { Ok(n) if n > 0 => cfg.mmap_size_bytes = Some(n), _ => cfg.mmap_size_bytes = None }
        }
        if let Ok(v) = env::var("BLOCKCONN_SQLITE_TEMP_STORE") {
            cfg.temp_store = match v.trim().to_ascii_uppercase().as_str() {
                "MEMORY" => Some(TempStore::Memory),
                "FILE" => Some(TempStore::File),
                _ => None,
            };
        }
        cfg
    }

    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout = Duration::from_millis(ms);
        self
    }
}

/// Open (creating if needed) a SQLite database for building and apply PRAGMAs.
pub fn open_read_write_with_config<P: AsRef<Path>>(path: P, cfg: &DbOpenConfig) -> rusqlite::Result<Connection> {
    open_read_write(path.as_ref(), cfg, OpenFlags::SQLITE_OPEN_CREATE)
}

/// Like [`open_read_write_with_config`], but fails instead of creating a missing file.
pub fn open_existing_with_config<P: AsRef<Path>>(path: P, cfg: &DbOpenConfig) -> rusqlite::Result<Connection> {
    open_read_write(path.as_ref(), cfg, OpenFlags::empty())
}

fn open_read_write(path: &Path, cfg: &DbOpenConfig, extra: OpenFlags) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX | extra,
    )?;
    conn.busy_timeout(cfg.busy_timeout)?;
    apply_pragmas(&conn, cfg);
    Ok(conn)
}

/// Read-only handle for reporting.
pub fn open_read_only<P: AsRef<Path>>(path: P) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI)?;
    let _ = conn.execute_batch("PRAGMA query_only = ON;");
    Ok(conn)
}

fn apply_pragmas(conn: &Connection, cfg: &DbOpenConfig) {
    // Best-effort; in-memory databases reject WAL and keep their journal mode
    if cfg.wal { let _ = conn.execute_batch("PRAGMA journal_mode = WAL;"); }
    let _ = conn.execute_batch("PRAGMA synchronous = NORMAL;");
    if let Some(kb) = cfg.cache_size_kb { if kb > 0 { let _ = conn.execute_batch(&format!("PRAGMA cache_size = -{}", kb)); } }
    if let Some(bytes) = cfg.mmap_size_bytes { if bytes > 0 { let _ = conn.execute_batch(&format!("PRAGMA mmap_size = {}", bytes)); } }
    if let Some(ts) = cfg.temp_store { let _ = conn.execute_batch(&format!("PRAGMA temp_store = {}", ts)); }
}
