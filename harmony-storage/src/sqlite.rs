//! SQLite-backed commit log and snapshot store.
//!
//! Commits and snapshots are stored as JSON next to their type
//! discriminators; the registry turns them back into typed values on load.
//! Commit keys are spread over four columns so SQLite row values compare
//! them in the same total order as [`CommitKey`].

use crate::error::{StorageError, StorageResult};
use crate::store::{ClientHeads, CommitLog, CrdtStore, SnapshotStore};
use harmony_model::{ChangeRecord, Commit, CommitKey, CommitRecord, DynEntity, ObjectSnapshot, TypeRegistry};
use harmony_types::{ClientId, CommitId, EntityId, HybridTimestamp};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::debug;

const COMMIT_ORDER: &str = "c.wall_time, c.logical, c.client_id, c.id";
const SNAPSHOT_COLUMNS: &str =
    "s.entity_id, s.commit_id, s.wall_time, s.logical, s.client_id, s.type_name, s.is_root, s.entity";
const SNAPSHOT_KEY: &str = "(s.wall_time, s.logical, s.client_id, s.commit_id)";

/// Persistent store backed by SQLite.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    registry: Arc<TypeRegistry>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>, registry: Arc<TypeRegistry>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, registry)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(registry: Arc<TypeRegistry>) -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, registry)
    }

    fn with_connection(conn: Connection, registry: Arc<TypeRegistry>) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            registry,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS commits (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                wall_time INTEGER NOT NULL,
                logical INTEGER NOT NULL,
                parent_hash TEXT,
                hash TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_commits_order
                ON commits (wall_time, logical, client_id, id);

            CREATE TABLE IF NOT EXISTS change_entities (
                id TEXT PRIMARY KEY,
                commit_id TEXT NOT NULL REFERENCES commits(id),
                idx INTEGER NOT NULL,
                entity_id TEXT NOT NULL,
                change_type TEXT NOT NULL,
                change TEXT NOT NULL,
                UNIQUE(commit_id, idx)
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                entity_id TEXT NOT NULL,
                commit_id TEXT NOT NULL,
                wall_time INTEGER NOT NULL,
                logical INTEGER NOT NULL,
                client_id TEXT NOT NULL,
                type_name TEXT NOT NULL,
                is_root INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL,
                entity TEXT NOT NULL,
                PRIMARY KEY (entity_id, commit_id)
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_order
                ON snapshots (entity_id, wall_time, logical, client_id, commit_id);

            CREATE INDEX IF NOT EXISTS idx_snapshots_key
                ON snapshots (wall_time, logical, client_id, commit_id);

            CREATE TABLE IF NOT EXISTS snapshot_refs (
                entity_id TEXT NOT NULL,
                referenced_id TEXT NOT NULL,
                PRIMARY KEY (entity_id, referenced_id)
            );
            ",
        )?;
        Ok(())
    }

    // ── Commits ──────────────────────────────────────────────────

    fn load_commits(&self, filter: &str, args: &[&dyn ToSql]) -> StorageResult<Vec<Commit>> {
        let conn = self.conn.lock().unwrap();
        self.query_commits(&conn, filter, args)
    }

    fn query_commits(
        &self,
        conn: &Connection,
        filter: &str,
        args: &[&dyn ToSql],
    ) -> StorageResult<Vec<Commit>> {
        let sql = format!(
            "SELECT c.id, c.client_id, c.wall_time, c.logical, c.parent_hash, c.hash,
                    ce.id, ce.entity_id, ce.change_type, ce.change
             FROM commits c
             LEFT JOIN change_entities ce ON ce.commit_id = c.id
             WHERE {filter}
             ORDER BY {COMMIT_ORDER}, ce.idx"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(RawCommitRow {
                    id: row.get(0)?,
                    client_id: row.get(1)?,
                    wall_time: row.get(2)?,
                    logical: row.get(3)?,
                    parent_hash: row.get(4)?,
                    hash: row.get(5)?,
                    change_id: row.get(6)?,
                    entity_id: row.get(7)?,
                    change_type: row.get(8)?,
                    change: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut records: Vec<CommitRecord> = Vec::new();
        for row in rows {
            let id: CommitId = parse_id(&row.id)?;
            if records.last().is_none_or(|record| record.id != id) {
                records.push(CommitRecord {
                    id,
                    client_id: parse_id(&row.client_id)?,
                    hybrid_date_time: HybridTimestamp::new(row.wall_time as u64, row.logical as u32),
                    change_entities: Vec::new(),
                    parent_hash: row.parent_hash,
                    hash: Some(row.hash),
                });
            }
            let (Some(change_id), Some(entity_id), Some(change_type), Some(change)) =
                (row.change_id, row.entity_id, row.change_type, row.change)
            else {
                continue;
            };
            if let Some(record) = records.last_mut() {
                record.change_entities.push(ChangeRecord {
                    id: parse_id(&change_id)?,
                    entity_id: parse_id(&entity_id)?,
                    change_type,
                    change: serde_json::from_str(&change)?,
                });
            }
        }

        records
            .into_iter()
            .map(|record| Ok(self.registry.decode_commit(record)?))
            .collect()
    }

    fn insert_commit(&self, conn: &Connection, commit: &Commit) -> StorageResult<bool> {
        let record = self.registry.encode_commit(commit)?;
        let wall_time = i64::try_from(record.hybrid_date_time.wall_time()).map_err(|_| {
            StorageError::InvalidData(format!(
                "commit {} has wall time {} past the storable range",
                record.id,
                record.hybrid_date_time.wall_time()
            ))
        })?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO commits (id, client_id, wall_time, logical, parent_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                record.client_id.to_string(),
                wall_time,
                i64::from(record.hybrid_date_time.logical()),
                record.parent_hash,
                record.hash,
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        for (index, change) in record.change_entities.iter().enumerate() {
            conn.execute(
                "INSERT INTO change_entities (id, commit_id, idx, entity_id, change_type, change)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    change.id.to_string(),
                    record.id.to_string(),
                    index as i64,
                    change.entity_id.to_string(),
                    change.change_type,
                    serde_json::to_string(&change.change)?,
                ],
            )?;
        }
        Ok(true)
    }

    /// Re-links every commit at or after `from` to its predecessor.
    fn rechain_from(&self, conn: &Connection, from: &CommitKey) -> StorageResult<usize> {
        let (wall_time, logical, client_id, commit_id) = key_args(from);
        let mut parent: Option<String> = conn
            .query_row(
                "SELECT c.hash FROM commits c
                 WHERE (c.wall_time, c.logical, c.client_id, c.id) < (?1, ?2, ?3, ?4)
                 ORDER BY c.wall_time DESC, c.logical DESC, c.client_id DESC, c.id DESC LIMIT 1",
                params![wall_time, logical, client_id, commit_id],
                |row| row.get(0),
            )
            .optional()?;
        let commits = self.query_commits(
            conn,
            "(c.wall_time, c.logical, c.client_id, c.id) >= (?1, ?2, ?3, ?4)",
            &[&wall_time, &logical, &client_id, &commit_id],
        )?;
        let relinked = commits.len();
        for mut commit in commits {
            commit.set_parent_hash(parent.as_deref());
            conn.execute(
                "UPDATE commits SET parent_hash = ?1, hash = ?2 WHERE id = ?3",
                params![commit.parent_hash(), commit.hash(), commit.id().to_string()],
            )?;
            parent = Some(commit.hash().to_owned());
        }
        Ok(relinked)
    }

    // ── Snapshots ────────────────────────────────────────────────

    fn load_snapshots(&self, sql: &str, args: &[&dyn ToSql]) -> StorageResult<Vec<ObjectSnapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(RawSnapshot {
                    commit_id: row.get(1)?,
                    wall_time: row.get(2)?,
                    logical: row.get(3)?,
                    client_id: row.get(4)?,
                    type_name: row.get(5)?,
                    is_root: row.get(6)?,
                    entity: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(|raw| raw.decode(&self.registry)).collect()
    }

    fn load_snapshot(&self, sql: &str, args: &[&dyn ToSql]) -> StorageResult<Option<ObjectSnapshot>> {
        Ok(self.load_snapshots(sql, args)?.into_iter().next())
    }
}

struct RawCommitRow {
    id: String,
    client_id: String,
    wall_time: i64,
    logical: i64,
    parent_hash: Option<String>,
    hash: String,
    change_id: Option<String>,
    entity_id: Option<String>,
    change_type: Option<String>,
    change: Option<String>,
}

struct RawSnapshot {
    commit_id: String,
    wall_time: i64,
    logical: i64,
    client_id: String,
    type_name: String,
    is_root: bool,
    entity: String,
}

impl RawSnapshot {
    fn decode(self, registry: &TypeRegistry) -> StorageResult<ObjectSnapshot> {
        let key = CommitKey::new(
            HybridTimestamp::new(self.wall_time as u64, self.logical as u32),
            parse_id::<ClientId>(&self.client_id)?,
            parse_id::<CommitId>(&self.commit_id)?,
        );
        let entity = registry.deserialize_entity(&self.type_name, serde_json::from_str(&self.entity)?)?;
        let entity: Arc<dyn DynEntity> = Arc::from(entity);
        Ok(ObjectSnapshot::new(entity, key, self.is_root))
    }
}

fn parse_id<T>(s: &str) -> StorageResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.parse()
        .map_err(|e| StorageError::InvalidData(format!("bad id {s:?}: {e}")))
}

fn key_args(key: &CommitKey) -> (i64, i64, String, String) {
    (
        key.timestamp.wall_time() as i64,
        i64::from(key.timestamp.logical()),
        key.client_id.to_string(),
        key.commit_id.to_string(),
    )
}

fn insert_snapshot(conn: &Connection, snapshot: &ObjectSnapshot) -> StorageResult<()> {
    let (wall_time, logical, client_id, commit_id) = key_args(&snapshot.commit_key());
    let entity_id = snapshot.entity_id().to_string();
    conn.execute(
        "INSERT OR REPLACE INTO snapshots
            (entity_id, commit_id, wall_time, logical, client_id, type_name, is_root, is_deleted, entity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entity_id,
            commit_id,
            wall_time,
            logical,
            client_id,
            snapshot.type_name(),
            snapshot.is_root(),
            snapshot.entity_is_deleted(),
            serde_json::to_string(&snapshot.entity().to_json()?)?,
        ],
    )?;
    for referenced in snapshot.references() {
        conn.execute(
            "INSERT OR IGNORE INTO snapshot_refs (entity_id, referenced_id) VALUES (?1, ?2)",
            params![entity_id, referenced.to_string()],
        )?;
    }
    Ok(())
}

fn delete_snapshots_from(conn: &Connection, from: &CommitKey) -> StorageResult<usize> {
    let (wall_time, logical, client_id, commit_id) = key_args(from);
    let removed = conn.execute(
        "DELETE FROM snapshots WHERE (wall_time, logical, client_id, commit_id) >= (?1, ?2, ?3, ?4)",
        params![wall_time, logical, client_id, commit_id],
    )?;
    Ok(removed)
}

impl CommitLog for SqliteStore {
    fn has_commit(&self, id: CommitId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT 1 FROM commits WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_commit(&self, id: CommitId) -> StorageResult<Option<Commit>> {
        let id = id.to_string();
        Ok(self.load_commits("c.id = ?1", &[&id])?.into_iter().next())
    }

    fn commits(&self) -> StorageResult<Vec<Commit>> {
        self.load_commits("1 = 1", &[])
    }

    fn commits_from(&self, from: CommitKey) -> StorageResult<Vec<Commit>> {
        let (wall_time, logical, client_id, commit_id) = key_args(&from);
        self.load_commits(
            "(c.wall_time, c.logical, c.client_id, c.id) >= (?1, ?2, ?3, ?4)",
            &[&wall_time, &logical, &client_id, &commit_id],
        )
    }

    fn latest_timestamp(&self) -> StorageResult<Option<HybridTimestamp>> {
        let conn = self.conn.lock().unwrap();
        let latest = conn
            .query_row(
                "SELECT wall_time, logical FROM commits ORDER BY wall_time DESC, logical DESC LIMIT 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(latest.map(|(wall_time, logical)| HybridTimestamp::new(wall_time as u64, logical as u32)))
    }

    fn client_heads(&self) -> StorageResult<ClientHeads> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT client_id, wall_time, logical FROM commits c
             WHERE NOT EXISTS (
                SELECT 1 FROM commits n
                WHERE n.client_id = c.client_id
                  AND (n.wall_time, n.logical) > (c.wall_time, c.logical)
             )",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut heads = ClientHeads::new();
        for (client_id, wall_time, logical) in rows {
            heads.insert(
                parse_id(&client_id)?,
                HybridTimestamp::new(wall_time as u64, logical as u32),
            );
        }
        Ok(heads)
    }

    fn add_commits(&self, commits: &[Commit]) -> StorageResult<usize> {
        self.integrate(commits, None, &[])
    }
}

impl SnapshotStore for SqliteStore {
    fn get_snapshot(&self, entity_id: EntityId) -> StorageResult<Option<ObjectSnapshot>> {
        let id = entity_id.to_string();
        self.load_snapshot(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots s WHERE s.entity_id = ?1
                 ORDER BY s.wall_time DESC, s.logical DESC, s.client_id DESC, s.commit_id DESC LIMIT 1"
            ),
            &[&id],
        )
    }

    fn snapshot_before(
        &self,
        entity_id: EntityId,
        key: CommitKey,
    ) -> StorageResult<Option<ObjectSnapshot>> {
        let id = entity_id.to_string();
        let (wall_time, logical, client_id, commit_id) = key_args(&key);
        self.load_snapshot(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots s
                 WHERE s.entity_id = ?1 AND {SNAPSHOT_KEY} < (?2, ?3, ?4, ?5)
                 ORDER BY s.wall_time DESC, s.logical DESC, s.client_id DESC, s.commit_id DESC LIMIT 1"
            ),
            &[&id, &wall_time, &logical, &client_id, &commit_id],
        )
    }

    fn snapshot_as_of(
        &self,
        entity_id: EntityId,
        key: CommitKey,
    ) -> StorageResult<Option<ObjectSnapshot>> {
        let id = entity_id.to_string();
        let (wall_time, logical, client_id, commit_id) = key_args(&key);
        self.load_snapshot(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots s
                 WHERE s.entity_id = ?1 AND {SNAPSHOT_KEY} <= (?2, ?3, ?4, ?5)
                 ORDER BY s.wall_time DESC, s.logical DESC, s.client_id DESC, s.commit_id DESC LIMIT 1"
            ),
            &[&id, &wall_time, &logical, &client_id, &commit_id],
        )
    }

    fn snapshot_history(&self, entity_id: EntityId) -> StorageResult<Vec<ObjectSnapshot>> {
        let id = entity_id.to_string();
        self.load_snapshots(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots s WHERE s.entity_id = ?1
                 ORDER BY s.wall_time, s.logical, s.client_id, s.commit_id"
            ),
            &[&id],
        )
    }

    fn current_snapshots(&self) -> StorageResult<Vec<ObjectSnapshot>> {
        self.load_snapshots(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots s
                 WHERE NOT EXISTS (
                    SELECT 1 FROM snapshots n
                    WHERE n.entity_id = s.entity_id
                      AND (n.wall_time, n.logical, n.client_id, n.commit_id) > {SNAPSHOT_KEY}
                 )
                 ORDER BY s.entity_id"
            ),
            &[],
        )
    }

    fn snapshots_as_of(&self, key: CommitKey) -> StorageResult<Vec<ObjectSnapshot>> {
        let (wall_time, logical, client_id, commit_id) = key_args(&key);
        self.load_snapshots(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots s
                 WHERE {SNAPSHOT_KEY} <= (?1, ?2, ?3, ?4)
                   AND NOT EXISTS (
                    SELECT 1 FROM snapshots n
                    WHERE n.entity_id = s.entity_id
                      AND (n.wall_time, n.logical, n.client_id, n.commit_id) > {SNAPSHOT_KEY}
                      AND (n.wall_time, n.logical, n.client_id, n.commit_id) <= (?1, ?2, ?3, ?4)
                 )
                 ORDER BY s.entity_id"
            ),
            &[&wall_time, &logical, &client_id, &commit_id],
        )
    }

    fn entities_with_snapshots_from(&self, from: CommitKey) -> StorageResult<Vec<EntityId>> {
        let (wall_time, logical, client_id, commit_id) = key_args(&from);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT entity_id FROM snapshots
             WHERE (wall_time, logical, client_id, commit_id) >= (?1, ?2, ?3, ?4)
             ORDER BY entity_id",
        )?;
        let ids = stmt
            .query_map(params![wall_time, logical, client_id, commit_id], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        ids.iter().map(|id| parse_id(id)).collect()
    }

    fn reference_candidates(&self, target: EntityId) -> StorageResult<Vec<EntityId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT entity_id FROM snapshot_refs WHERE referenced_id = ?1 ORDER BY entity_id",
        )?;
        let ids = stmt
            .query_map(params![target.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids.iter().map(|id| parse_id(id)).collect()
    }

    fn save_snapshot(&self, snapshot: &ObjectSnapshot) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        insert_snapshot(&tx, snapshot)?;
        tx.commit()?;
        Ok(())
    }
}

impl CrdtStore for SqliteStore {
    fn integrate(
        &self,
        commits: &[Commit],
        drop_from: Option<CommitKey>,
        snapshots: &[ObjectSnapshot],
    ) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut added = 0;
        let mut first: Option<CommitKey> = None;
        for commit in commits {
            if self.insert_commit(&tx, commit)? {
                first = Some(first.map_or(commit.key(), |first| first.min(commit.key())));
                added += 1;
            }
        }
        let relinked = match first {
            Some(from) => self.rechain_from(&tx, &from)?,
            None => 0,
        };
        if let Some(from) = drop_from {
            delete_snapshots_from(&tx, &from)?;
        }
        for snapshot in snapshots {
            insert_snapshot(&tx, snapshot)?;
        }
        tx.commit()?;
        debug!(
            "Integrated {} new commits and {} snapshots, relinked {} commits",
            added,
            snapshots.len(),
            relinked
        );
        Ok(added)
    }
}
