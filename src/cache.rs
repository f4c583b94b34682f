use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rusqlite::ffi::ErrorCode;
use rusqlite::{Connection, Error as SqliteError, OpenFlags, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, trace, warn};

use crate::coordinates::Coordinate;
use crate::errors::{AppError, AppResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    BEGIN;
    CREATE TABLE IF NOT EXISTS regions (
        lat_min REAL NOT NULL,
        lat_max REAL NOT NULL,
        lon_min REAL NOT NULL,
        lon_max REAL NOT NULL,
        description TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (DATETIME('now')),
        PRIMARY KEY (lat_min, lat_max, lon_min, lon_max)
    );

    CREATE TABLE IF NOT EXISTS item_keys (
        item_key TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (DATETIME('now'))
    );

    CREATE INDEX IF NOT EXISTS idx_regions_lat ON regions(lat_min, lat_max);
    COMMIT;
"#;

const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "regions",
        &["lat_min", "lat_max", "lon_min", "lon_max", "description"],
    ),
    ("item_keys", &["item_key", "description"]),
];

/// Opaque per-photo identifier used for exact-match memoization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Content hash of the source photo bytes.
    pub fn from_content(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(STANDARD_NO_PAD.encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Builds a box from two latitude and two longitude bounds in any order.
    pub fn new(lat_a: f64, lat_b: f64, lon_a: f64, lon_b: f64) -> Option<Self> {
        if ![lat_a, lat_b, lon_a, lon_b].iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self {
            lat_min: lat_a.min(lat_b),
            lat_max: lat_a.max(lat_b),
            lon_min: lon_a.min(lon_b),
            lon_max: lon_a.max(lon_b),
        })
    }

    /// Parses the GeoJSON `[lonMin, latMin, lonMax, latMax]` ordering.
    pub fn from_lon_lat_bounds(bounds: &[f64]) -> Option<Self> {
        match bounds {
            [lon_a, lat_a, lon_b, lat_b, ..] => Self::new(*lat_a, *lat_b, *lon_a, *lon_b),
            _ => None,
        }
    }

    pub fn contains(&self, coordinate: Coordinate) -> bool {
        self.lat_min <= coordinate.latitude
            && coordinate.latitude <= self.lat_max
            && self.lon_min <= coordinate.longitude
            && coordinate.longitude <= self.lon_max
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub path: String,
    pub exists: bool,
    pub regions: u64,
    pub item_keys: u64,
}

/// Result of opening the store: either a freshly created empty schema or an
/// existing, schema-checked database.
enum StoreHandle {
    Initialized(Connection),
    Existing(Connection),
}

impl StoreHandle {
    fn connection(&self) -> &Connection {
        match self {
            StoreHandle::Initialized(conn) | StoreHandle::Existing(conn) => conn,
        }
    }

    fn has_data(&self) -> bool {
        matches!(self, StoreHandle::Existing(_))
    }
}

/// Persistent geocode cache. A connection is opened per operation.
#[derive(Debug, Clone)]
pub struct GeocodeCache {
    path: PathBuf,
}

impl GeocodeCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup_by_key(&self, key: &ItemKey) -> AppResult<Option<String>> {
        let handle = self.open()?;
        if !handle.has_data() {
            return Ok(None);
        }
        let description: Option<String> = handle
            .connection()
            .query_row(
                "SELECT description FROM item_keys WHERE item_key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| self.store_error(err))?;
        Ok(description.filter(|d| !d.trim().is_empty()))
    }

    /// Finds a region containing the point (bounds inclusive). On a hit the
    /// optional item key is promoted to an exact-key row; failures doing so are
    /// logged and ignored.
    pub fn lookup_by_region(
        &self,
        coordinate: Coordinate,
        promote: Option<&ItemKey>,
    ) -> AppResult<Option<String>> {
        let handle = self.open()?;
        if !handle.has_data() {
            return Ok(None);
        }
        let conn = handle.connection();
        let description: Option<String> = conn
            .query_row(
                "SELECT description FROM regions
                WHERE lat_min <= ?1 AND ?1 <= lat_max
                  AND lon_min <= ?2 AND ?2 <= lon_max
                ORDER BY (lat_max - lat_min) * (lon_max - lon_min) ASC, lat_min ASC, lon_min ASC
                LIMIT 1",
                (coordinate.latitude, coordinate.longitude),
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| self.store_error(err))?;

        let Some(description) = description.filter(|d| !d.trim().is_empty()) else {
            return Ok(None);
        };

        if let Some(key) = promote {
            match insert_item_key(conn, key, &description) {
                Ok(_) => trace!(
                    target: "geocode_cache",
                    item_key = key.as_str(),
                    "promoted region hit to exact key"
                ),
                Err(err) => warn!(
                    target: "geocode_cache",
                    error = %err,
                    item_key = key.as_str(),
                    "failed to promote region hit"
                ),
            }
        }
        Ok(Some(description))
    }

    /// Stores a region given as `[lonMin, latMin, lonMax, latMax]`. Returns
    /// `false` without touching the store when the box or description is unusable,
    /// or when the identical region already exists.
    pub fn record_region(&self, bounds: &[f64], description: Option<&str>) -> AppResult<bool> {
        let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) else {
            debug!(target: "geocode_cache", "skipping region without description");
            return Ok(false);
        };
        let Some(bbox) = BoundingBox::from_lon_lat_bounds(bounds) else {
            debug!(target: "geocode_cache", ?bounds, "skipping malformed region bounds");
            return Ok(false);
        };

        let handle = self.open()?;
        let inserted = handle
            .connection()
            .execute(
                "INSERT INTO regions (lat_min, lat_max, lon_min, lon_max, description, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, DATETIME('now'))
                ON CONFLICT(lat_min, lat_max, lon_min, lon_max) DO NOTHING",
                (
                    bbox.lat_min,
                    bbox.lat_max,
                    bbox.lon_min,
                    bbox.lon_max,
                    description,
                ),
            )
            .map_err(|err| self.store_error(err))?;
        Ok(inserted > 0)
    }

    pub fn record_key(&self, key: &ItemKey, description: &str) -> AppResult<bool> {
        let description = description.trim();
        if description.is_empty() {
            return Ok(false);
        }
        let handle = self.open()?;
        insert_item_key(handle.connection(), key, description).map_err(|err| self.store_error(err))
    }

    pub fn stats(&self) -> AppResult<CacheStats> {
        let path = self.path.to_string_lossy().to_string();
        if !self.has_data_file()? {
            return Ok(CacheStats {
                path,
                exists: false,
                regions: 0,
                item_keys: 0,
            });
        }
        let handle = self.open()?;
        let conn = handle.connection();
        let count = |table: &str| -> AppResult<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n.max(0) as u64)
            .map_err(|err| self.store_error(err))
        };
        Ok(CacheStats {
            path,
            exists: true,
            regions: count("regions")?,
            item_keys: count("item_keys")?,
        })
    }

    fn open(&self) -> AppResult<StoreHandle> {
        if !self.has_data_file()? {
            return self.initialize().map(StoreHandle::Initialized);
        }

        let connection = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(|err| self.store_error(err))?;
        connection.busy_timeout(BUSY_TIMEOUT)?;

        if table_count(&connection).map_err(|err| self.store_error(err))? == 0 {
            // Empty database left behind by an interrupted first run.
            create_schema(&connection).map_err(|err| self.store_error(err))?;
            return Ok(StoreHandle::Initialized(connection));
        }

        self.verify_schema(&connection)?;
        Ok(StoreHandle::Existing(connection))
    }

    fn has_data_file(&self) -> AppResult<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => Ok(meta.len() > 0),
            Ok(_) => Err(AppError::StoreUnavailable {
                path: self.path.clone(),
                reason: "path is not a regular file".into(),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(AppError::StoreUnavailable {
                path: self.path.clone(),
                reason: err.to_string(),
            }),
        }
    }

    fn initialize(&self) -> AppResult<Connection> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let connection = Connection::open_with_flags(&self.path, flags)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        create_schema(&connection).map_err(|err| self.store_error(err))?;
        info!(
            target: "geocode_cache",
            path = %self.path.display(),
            "initialized empty geocode cache"
        );
        Ok(connection)
    }

    fn verify_schema(&self, connection: &Connection) -> AppResult<()> {
        for (table, columns) in REQUIRED_COLUMNS {
            let present = table_columns(connection, table).map_err(|err| self.store_error(err))?;
            if let Some(missing) = columns.iter().find(|c| !present.iter().any(|p| p == *c)) {
                return Err(AppError::StoreUnavailable {
                    path: self.path.clone(),
                    reason: format!("incompatible schema: {table}.{missing} is missing"),
                });
            }
        }
        Ok(())
    }

    fn store_error(&self, err: SqliteError) -> AppError {
        if is_unusable_store(&err) {
            warn!(
                target: "geocode_cache",
                path = %self.path.display(),
                error = %err,
                "geocode cache file is unreadable"
            );
            AppError::StoreUnavailable {
                path: self.path.clone(),
                reason: err.to_string(),
            }
        } else {
            AppError::Database(err)
        }
    }
}

fn create_schema(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(SCHEMA)?;
    connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
    })?;
    Ok(())
}

fn insert_item_key(
    connection: &Connection,
    key: &ItemKey,
    description: &str,
) -> rusqlite::Result<bool> {
    let inserted = connection.execute(
        "INSERT INTO item_keys (item_key, description, created_at)
        VALUES (?1, ?2, DATETIME('now'))
        ON CONFLICT(item_key) DO NOTHING",
        (key.as_str(), description),
    )?;
    Ok(inserted > 0)
}

fn table_count(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )
}

fn table_columns(connection: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let pragma = format!("PRAGMA table_info({table})");
    let mut stmt = connection.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    let mut names = Vec::new();
    while let Some(row) = rows.next()? {
        names.push(row.get::<_, String>(1)?);
    }
    Ok(names)
}

fn is_unusable_store(err: &SqliteError) -> bool {
    match err {
        SqliteError::SqliteFailure(code, message) => {
            matches!(
                code.code,
                ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt | ErrorCode::CannotOpen
            ) || message
                .as_deref()
                .map(|msg| msg.contains("database disk image is malformed"))
                .unwrap_or(false)
        }
        _ => false,
    }
}
