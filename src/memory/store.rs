//! Durable fingerprint → element map, backed by SQLite.
//!
//! Offsets are stored relative to the window origin so a recalled map stays
//! valid after the window is dragged elsewhere; absolute coordinates are only
//! ever derived at read time from the current [`Rect`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::errors::{AnchorError, AnchorResult};
use crate::memory::fingerprint::Fingerprint;
use crate::memory::migrations::run_migrations;
use crate::perception::types::{Offset, Provenance, Rect, SemanticElement, SemanticMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedElement {
    pub id: String,
    pub label: String,
    pub offset: Offset,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub elements: Vec<CachedElement>,
    /// Most recent write time of the entry's rows; unset before persisting.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn from_map(map: &SemanticMap) -> Self {
        Self {
            elements: map
                .iter()
                .map(|e| CachedElement {
                    id: e.id.clone(),
                    label: e.label.clone(),
                    offset: e.offset,
                })
                .collect(),
            last_seen: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn get(&self, id: &str) -> Option<&CachedElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Places every cached offset inside `rect`. Recalled elements are fully trusted.
    pub fn to_semantic_map(&self, rect: &Rect) -> SemanticMap {
        let mut map = SemanticMap::new();
        for e in &self.elements {
            map.insert(SemanticElement {
                id: e.id.clone(),
                label: e.label.clone(),
                offset: e.offset,
                position: rect.to_absolute(e.offset),
                confidence: 1.0,
                provenance: Provenance::Memory,
            });
        }
        map
    }
}

pub struct FingerprintStore {
    conn: Connection,
    path: Option<PathBuf>,
    max_age: Option<chrono::Duration>,
}

impl FingerprintStore {
    pub fn open(path: impl AsRef<Path>) -> AnchorResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!(error = %err, "failed to enable WAL mode");
        }
        run_migrations(&mut conn)?;
        tracing::info!(path = %path.display(), "fingerprint store opened");

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            max_age: None,
        })
    }

    pub fn open_in_memory() -> AnchorResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn,
            path: None,
            max_age: None,
        })
    }

    /// Entries last written longer ago than `max_age` recall as absent.
    pub fn with_max_age(mut self, max_age: Option<chrono::Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Stored element map for `fp`, or `None` if never seen (or stale).
    pub fn recall(&self, fp: &Fingerprint) -> AnchorResult<Option<CacheEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT element_id, label, rel_x, rel_y, last_seen
             FROM ui_map
             WHERE fingerprint = ?1
             ORDER BY rowid",
        )?;

        let mut rows = stmt.query(params![fp.as_str()])?;
        let mut entry = CacheEntry::default();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let label: Option<String> = row.get(1)?;
            let seen = parse_datetime(&row.get::<_, String>(4)?)?;
            entry.last_seen = Some(entry.last_seen.map_or(seen, |prev| prev.max(seen)));
            entry.elements.push(CachedElement {
                label: label.unwrap_or_else(|| id.clone()),
                id,
                offset: Offset {
                    dx: row.get(2)?,
                    dy: row.get(3)?,
                },
            });
        }

        if entry.is_empty() {
            return Ok(None);
        }

        if let (Some(max_age), Some(last_seen)) = (self.max_age, entry.last_seen) {
            if Utc::now() - last_seen > max_age {
                tracing::info!(fingerprint = %fp, %last_seen, "cache entry stale; ignoring");
                return Ok(None);
            }
        }

        tracing::debug!(fingerprint = %fp, elements = entry.len(), "cache entry recalled");
        Ok(Some(entry))
    }

    /// Replaces the whole entry for `fp` with `entry`; durable on return.
    pub fn persist(&mut self, fp: &Fingerprint, entry: &CacheEntry) -> AnchorResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM ui_map WHERE fingerprint = ?1", params![fp.as_str()])?;
        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO ui_map (fingerprint, element_id, label, rel_x, rel_y, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for e in &entry.elements {
                insert.execute(params![fp.as_str(), e.id, e.label, e.offset.dx, e.offset.dy, now])?;
            }
        }
        tx.commit()?;

        tracing::debug!(fingerprint = %fp, elements = entry.len(), "cache entry persisted");
        Ok(())
    }

    /// Forgets `fp`. Returns the number of element rows removed.
    pub fn invalidate(&mut self, fp: &Fingerprint) -> AnchorResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM ui_map WHERE fingerprint = ?1", params![fp.as_str()])?;
        tracing::info!(fingerprint = %fp, removed, "cache entry invalidated");
        Ok(removed)
    }
}

fn parse_datetime(value: &str) -> AnchorResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AnchorError::StoreData(format!("invalid last_seen '{value}': {err}")))
}
