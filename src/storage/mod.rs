//! Local SQLite directory backend.
//!
//! Implements [`ResourceApi`] over a single `records` table holding every
//! resource tier, with server-side paging, search, sort and child counts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::config::DbConfig;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::api::{
    ApiError, ListPayload, ListQuery, RawRecord, RecordDraft, RecordId, ResourceApi, ResourceKind,
    Scope, SortDirection,
};
use crate::config::{ConfigPaths, StorageOptions};
use crate::timestamp::RawTimestamp;

mod schema;

/// `created_at` as epoch milliseconds, following the same digit-count rules
/// as the display normalizer so sorting agrees with what is shown.
const CREATED_AT_MILLIS: &str = "CASE
        WHEN length(abs(CAST(r.created_at AS INTEGER))) = 13 THEN CAST(r.created_at AS INTEGER)
        WHEN length(abs(CAST(r.created_at AS INTEGER))) = 10 THEN CAST(r.created_at AS INTEGER) * 1000
        WHEN CAST(r.created_at AS INTEGER) > 946684800000 THEN CAST(r.created_at AS INTEGER)
        ELSE CAST(r.created_at AS INTEGER) * 1000
    END";

const CHILD_COUNT: &str = "(SELECT COUNT(*) FROM records c WHERE c.parent_id = r.id)";

const LIST_FILTER: &str = "r.kind = ?1
    AND (?2 IS NULL OR r.parent_id = ?2)
    AND (?3 IS NULL OR r.name LIKE ?3 ESCAPE '\\')";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedSummary {
    pub parents: usize,
    pub children: usize,
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn list_records(&self, scope: &Scope, query: &ListQuery) -> Result<ListPayload> {
        let page = query.page.max(1);
        let limit = query.limit.max(1);
        let order = order_clause(query)?;
        let pattern = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|needle| !needle.is_empty())
            .map(like_pattern);
        let with_counts = scope.kind.child_kind().is_some();
        let kind = scope.kind.to_string();

        self.with_connection(|conn| {
            let total: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM records r WHERE {LIST_FILTER}"),
                    params![kind, scope.parent_id, pattern],
                    |row| row.get(0),
                )
                .context("counting records")?;

            let sql = format!(
                "SELECT r.id, r.name, r.parent_id, r.created_at, {CHILD_COUNT}
                 FROM records r
                 WHERE {LIST_FILTER}
                 ORDER BY {order}
                 LIMIT ?4 OFFSET ?5"
            );
            let mut stmt = conn.prepare(&sql).context("preparing list query")?;
            let offset = i64::from(page - 1) * i64::from(limit);
            let items = stmt
                .query_map(
                    params![kind, scope.parent_id, pattern, i64::from(limit), offset],
                    |row| read_record(row, with_counts),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("reading records")?;

            Ok(ListPayload {
                items,
                total: u64::try_from(total).unwrap_or_default(),
                page,
                limit,
            })
        })
    }

    pub fn create_record(&self, scope: &Scope, draft: &RecordDraft) -> Result<RawRecord> {
        let name = validated_name(draft)?;
        let (scope, extra) = owning_scope(scope, draft)?;
        let extra = serde_json::to_string(&extra).context("encoding extra fields")?;
        let created_at = now_millis();
        self.with_connection(|conn| {
            check_parent(conn, &scope)?;
            check_unique(conn, &scope, name, None)?;
            conn.execute(
                "INSERT INTO records (kind, parent_id, name, created_at, extra)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![scope.kind.to_string(), scope.parent_id, name, created_at, extra],
            )
            .context("inserting record")?;
            let id = conn.last_insert_rowid();
            tracing::debug!(kind = %scope.kind, id, "inserted record");
            fetch_record(conn, scope.kind, id)
        })
    }

    pub fn update_record(
        &self,
        scope: &Scope,
        id: RecordId,
        draft: &RecordDraft,
    ) -> Result<RawRecord> {
        let name = validated_name(draft)?;
        let extra = serde_json::to_string(&draft.extra).context("encoding extra fields")?;
        self.with_connection(|conn| {
            let current_parent: Option<Option<RecordId>> = conn
                .query_row(
                    "SELECT parent_id FROM records
                     WHERE id = ?1 AND kind = ?2 AND (?3 IS NULL OR parent_id = ?3)",
                    params![id, scope.kind.to_string(), scope.parent_id],
                    |row| row.get(0),
                )
                .optional()
                .context("looking up record")?;
            let Some(parent_id) = current_parent else {
                return Err(ApiError::not_found(format!("{} {id} not found", scope.kind)).into());
            };
            let owner = Scope {
                kind: scope.kind,
                parent_id,
            };
            check_unique(conn, &owner, name, Some(id))?;
            conn.execute(
                "UPDATE records SET name = ?1, extra = ?2 WHERE id = ?3",
                params![name, extra, id],
            )
            .context("updating record")?;
            fetch_record(conn, scope.kind, id)
        })
    }

    pub fn delete_record(&self, scope: &Scope, id: RecordId) -> Result<()> {
        self.with_connection(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM records
                     WHERE id = ?1 AND kind = ?2 AND (?3 IS NULL OR parent_id = ?3)",
                    params![id, scope.kind.to_string(), scope.parent_id],
                )
                .context("deleting record")?;
            if removed == 0 {
                return Err(ApiError::not_found(format!("{} {id} not found", scope.kind)).into());
            }
            Ok(())
        })
    }

    /// Inserts the demo directory regardless of what is already stored.
    pub fn seed_demo(&self) -> Result<SeedSummary> {
        self.with_connection(insert_demo_data)
    }
}

impl ResourceApi for StorageHandle {
    async fn list(&self, scope: &Scope, query: &ListQuery) -> Result<ListPayload, ApiError> {
        self.list_records(scope, query).map_err(into_api_error)
    }

    async fn create(&self, scope: &Scope, draft: &RecordDraft) -> Result<RawRecord, ApiError> {
        self.create_record(scope, draft).map_err(into_api_error)
    }

    async fn update(
        &self,
        scope: &Scope,
        id: RecordId,
        draft: &RecordDraft,
    ) -> Result<RawRecord, ApiError> {
        self.update_record(scope, id, draft).map_err(into_api_error)
    }

    async fn delete(&self, scope: &Scope, id: RecordId) -> Result<(), ApiError> {
        self.delete_record(scope, id).map_err(into_api_error)
    }
}

/// Rejections raised on purpose travel inside `anyhow` as `ApiError`;
/// anything else is a backend fault.
fn into_api_error(err: anyhow::Error) -> ApiError {
    match err.downcast::<ApiError>() {
        Ok(api) => api,
        Err(err) => {
            tracing::error!(error = ?err, "directory backend failure");
            ApiError::Server {
                status: 500,
                message: Some(format!("{err:#}")),
            }
        }
    }
}

fn order_clause(query: &ListQuery) -> Result<String> {
    let direction = match query.order.unwrap_or(SortDirection::Asc) {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let column = match query.sort_by.as_deref() {
        None => return Ok("r.id ASC".to_string()),
        Some("id") => "r.id",
        Some("name" | "displayName" | "title") => "r.name COLLATE NOCASE",
        Some("createdAt" | "created_at") => CREATED_AT_MILLIS,
        Some("childCount" | "child_count") => CHILD_COUNT,
        Some(other) => {
            return Err(ApiError::Validation {
                status: 400,
                message: Some(format!("cannot sort by `{other}`")),
            }
            .into())
        }
    };
    Ok(format!("{column} {direction}, r.id ASC"))
}

fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn validated_name(draft: &RecordDraft) -> Result<&str> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Name is required").into());
    }
    Ok(name)
}

/// A nested kind created without a parent scope (the flat jobs screen) names
/// its owner in the draft under [`ResourceKind::owner_field`]. The field is
/// consumed and not stored with the extra fields.
fn owning_scope(scope: &Scope, draft: &RecordDraft) -> Result<(Scope, Map<String, Value>)> {
    let mut extra = draft.extra.clone();
    let (Some(field), None) = (scope.kind.owner_field(), scope.parent_id) else {
        return Ok((*scope, extra));
    };
    let Some(raw) = extra.remove(&field) else {
        return Ok((*scope, extra));
    };
    let parent_id = match &raw {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ApiError::validation(format!("`{field}` must be a record id")))?;
    Ok((Scope::children(scope.kind, parent_id), extra))
}

fn check_parent(conn: &Connection, scope: &Scope) -> Result<()> {
    let expected = scope.kind.parent_kind();
    match (expected, scope.parent_id) {
        (None, None) => Ok(()),
        (None, Some(_)) => {
            Err(ApiError::validation(format!("a {} cannot have a parent", scope.kind)).into())
        }
        (Some(parent_kind), None) => Err(ApiError::validation(format!(
            "a {} must belong to a {parent_kind}; set `{}`",
            scope.kind,
            scope.kind.owner_field().unwrap_or_default()
        ))
        .into()),
        (Some(parent_kind), Some(parent_id)) => {
            let kind: Option<String> = conn
                .query_row(
                    "SELECT kind FROM records WHERE id = ?1",
                    [parent_id],
                    |row| row.get(0),
                )
                .optional()
                .context("looking up parent")?;
            match kind {
                Some(kind) if kind == parent_kind.to_string() => Ok(()),
                _ => Err(ApiError::not_found(format!("{parent_kind} {parent_id} not found")).into()),
            }
        }
    }
}

fn check_unique(conn: &Connection, scope: &Scope, name: &str, except: Option<RecordId>) -> Result<()> {
    let clash: Option<RecordId> = conn
        .query_row(
            "SELECT id FROM records
             WHERE kind = ?1 AND parent_id IS ?2 AND name = ?3 COLLATE NOCASE
               AND (?4 IS NULL OR id != ?4)
             LIMIT 1",
            params![scope.kind.to_string(), scope.parent_id, name, except],
            |row| row.get(0),
        )
        .optional()
        .context("checking for duplicate names")?;
    if clash.is_some() {
        return Err(ApiError::validation(format!(
            "A {} named \"{name}\" already exists",
            scope.kind
        ))
        .into());
    }
    Ok(())
}

fn fetch_record(conn: &Connection, kind: ResourceKind, id: RecordId) -> Result<RawRecord> {
    let sql = format!(
        "SELECT r.id, r.name, r.parent_id, r.created_at, {CHILD_COUNT}
         FROM records r WHERE r.id = ?1"
    );
    conn.query_row(&sql, [id], |row| read_record(row, kind.child_kind().is_some()))
        .with_context(|| format!("reading back {kind} {id}"))
}

fn read_record(row: &Row<'_>, with_counts: bool) -> rusqlite::Result<RawRecord> {
    let created_at = match row.get::<_, SqlValue>(3)? {
        SqlValue::Integer(value) => RawTimestamp::Integer(value),
        SqlValue::Real(value) => RawTimestamp::Float(value),
        SqlValue::Text(text) => RawTimestamp::Text(text),
        SqlValue::Null | SqlValue::Blob(_) => RawTimestamp::Missing,
    };
    let child_count: i64 = row.get(4)?;
    Ok(RawRecord {
        id: row.get(0)?,
        display_name: row.get(1)?,
        parent_id: row.get(2)?,
        child_count: with_counts.then(|| u64::try_from(child_count).unwrap_or_default()),
        created_at,
    })
}

fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = if storage.database_path.as_os_str().is_empty() {
        &paths.database_path
    } else {
        &storage.database_path
    };
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    if !existed && storage.seed_demo_data {
        seed_if_empty(&conn)?;
    }
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)
        .context("enabling foreign keys")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

fn seed_if_empty(conn: &Connection) -> Result<()> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM records LIMIT 1", [], |row| row.get(0))
        .optional()
        .context("checking for existing records")?;
    if existing.is_some() {
        return Ok(());
    }
    tracing::info!("seeding first-run directory");
    insert_demo_data(conn)?;
    Ok(())
}

const DEMO_CATEGORIES: &[(&str, &[&str])] = &[
    ("Home Services", &["Plumbing", "Electrical", "Roofing", "Locksmiths", "Gardening", "Painting"]),
    ("Automotive", &["Tyres", "Body Repair", "Car Wash"]),
    ("Health", &["Dentists", "Physiotherapy", "Opticians", "Pharmacies"]),
    ("Education", &["Tutoring", "Driving Schools"]),
    ("Hospitality", &[]),
    ("Legal", &["Notaries", "Family Law"]),
    ("Finance", &["Accountants", "Insurance Brokers"]),
    ("Pets", &["Veterinarians", "Grooming", "Boarding"]),
    ("Events", &["Catering", "Photography"]),
    ("Technology", &["Computer Repair", "Web Design", "IT Support"]),
    ("Beauty", &["Hairdressers", "Nail Salons"]),
    ("Construction", &["Builders", "Architects", "Surveyors"]),
];

const DEMO_COMPANIES: &[(&str, &[&str])] = &[
    ("Northwind Plumbing", &["Apprentice Plumber", "Site Supervisor"]),
    ("Acme Logistics", &["Driver", "Dispatcher", "Warehouse Lead", "Fleet Mechanic"]),
    ("Blue Harbor Dental", &["Dental Nurse", "Receptionist"]),
    ("Greenleaf Tutors", &[]),
    ("Brightside Events", &["Event Coordinator"]),
    ("Keystone Builders", &["Carpenter", "Bricklayer", "Project Manager"]),
];

/// The mix of `created_at` encodings real exports contain.
fn demo_timestamp(index: usize) -> SqlValue {
    match index % 7 {
        0 => SqlValue::Integer(1_733_275_564),
        1 => SqlValue::Text("1733275564".into()),
        2 => SqlValue::Integer(1_767_800_669_310),
        3 => SqlValue::Text("1767800669310".into()),
        4 => SqlValue::Real(1_700_000_000.0),
        5 => SqlValue::Null,
        _ => SqlValue::Text("not-a-number".into()),
    }
}

fn insert_demo_data(conn: &Connection) -> Result<SeedSummary> {
    let tx = conn.unchecked_transaction().context("starting seed transaction")?;
    let mut summary = SeedSummary::default();
    let mut stamp = 0;
    let tiers = [
        (ResourceKind::Category, DEMO_CATEGORIES),
        (ResourceKind::Company, DEMO_COMPANIES),
    ];
    for (kind, entries) in tiers {
        let Some(child_kind) = kind.child_kind() else {
            continue;
        };
        for (name, children) in entries.iter() {
            tx.execute(
                "INSERT INTO records (kind, parent_id, name, created_at) VALUES (?1, NULL, ?2, ?3)",
                params![kind.to_string(), name, demo_timestamp(stamp)],
            )
            .context("inserting seed record")?;
            stamp += 1;
            summary.parents += 1;
            let parent_id = tx.last_insert_rowid();
            for child in children.iter() {
                tx.execute(
                    "INSERT INTO records (kind, parent_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![child_kind.to_string(), parent_id, child, demo_timestamp(stamp)],
                )
                .context("inserting seed record")?;
                stamp += 1;
                summary.children += 1;
            }
        }
    }
    tx.commit().context("committing seed data")?;
    Ok(summary)
}
