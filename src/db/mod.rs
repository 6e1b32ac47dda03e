use crate::config::Config;
use crate::filter::{FieldSchema, FieldType};
use crate::model::{FieldInfo, FileMetadata, ImportRecord};
use crate::util;
use anyhow::{Context, Result, bail};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ToSqlOutput;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod migrations;

/// Cooperative cancellation for the metadata fetch. Checked before the
/// batched query runs; a canceled fetch returns no partial results.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// System filter on analysis status, pushed down into the fetch query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzedFilter {
    All,
    Analyzed,
    Unanalyzed,
}

pub fn parse_analyzed(raw: &str) -> Result<AnalyzedFilter> {
    let value = raw.trim().to_ascii_lowercase();
    let filter = match value.as_str() {
        "" | "all" => AnalyzedFilter::All,
        "true" | "yes" => AnalyzedFilter::Analyzed,
        "false" | "no" => AnalyzedFilter::Unanalyzed,
        _ => bail!("unknown analyzed filter: {raw} (expected true|false|all)"),
    };
    Ok(filter)
}

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

pub struct Db {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
}

impl Db {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db directory {}", parent.display()))?;
        }

        let config = Config::get();

        // Open write connection first and run migrations
        let write_conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db at {}", db_path.display()))?;
        write_conn.busy_timeout(Duration::from_secs(30))?;
        write_conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        migrations::migrate(&write_conn)?;

        let write_conn = Arc::new(Mutex::new(write_conn));

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.pool_min_idle))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)
            .with_context(|| "create connection pool")?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            write_conn,
            read_pool,
        })
    }

    /// Get the database file path
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.read_pool
            .get()
            .with_context(|| "get read connection from pool")
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.write_conn.lock().unwrap()
    }

    /// Field registry as a validation schema for the filter parser.
    pub fn field_schema(&self) -> Result<FieldSchema> {
        let mut types = BTreeMap::new();
        for info in self.list_fields()? {
            types.insert(info.field, FieldType::parse(&info.kind));
        }
        Ok(FieldSchema::new(types))
    }

    pub fn list_fields(&self) -> Result<Vec<FieldInfo>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT field, kind FROM fields ORDER BY field")?;
        let rows = stmt.query_map([], |row| {
            Ok(FieldInfo {
                field: row.get(0)?,
                kind: row.get(1)?,
            })
        })?;
        let mut fields = Vec::new();
        for row in rows {
            fields.push(row?);
        }
        Ok(fields)
    }

    pub fn available_fields(&self) -> Result<Vec<String>> {
        Ok(self
            .list_fields()?
            .into_iter()
            .map(|info| info.field)
            .collect())
    }

    /// Fetch metadata for a set of file paths in one batched query.
    ///
    /// System filters (analyzed status, path globs) are pushed into the SQL;
    /// paths they exclude are simply absent from the returned map. The field
    /// projection limits the payload, but callers must union in every
    /// filter-referenced field so evaluation always has what it needs. The
    /// second return value lists all field names known to the store.
    pub fn fetch_metadata(
        &self,
        paths: &[String],
        analyzed: AnalyzedFilter,
        path_globs: &[String],
        projected_fields: &[String],
        cancel: &CancelFlag,
    ) -> Result<(BTreeMap<String, FileMetadata>, Vec<String>)> {
        if cancel.is_cancelled() {
            bail!("metadata fetch canceled");
        }
        let available = self.available_fields()?;
        if paths.is_empty() {
            return Ok((BTreeMap::new(), available));
        }

        let mut sql = String::from(
            "SELECT f.path, f.chat_id, m.field, m.value
             FROM files f
             JOIN file_metadata m ON m.file_id = f.id
             WHERE f.path IN (",
        );
        sql.push_str(&placeholders(paths.len()));
        sql.push(')');
        let mut values: Vec<String> = paths.to_vec();

        match analyzed {
            AnalyzedFilter::Analyzed => sql.push_str(" AND f.chat_id IS NOT NULL"),
            AnalyzedFilter::Unanalyzed => sql.push_str(" AND f.chat_id IS NULL"),
            AnalyzedFilter::All => {}
        }

        if !path_globs.is_empty() {
            let clauses = vec!["f.path LIKE ?"; path_globs.len()];
            sql.push_str(" AND (");
            sql.push_str(&clauses.join(" OR "));
            sql.push(')');
            values.extend(path_globs.iter().map(|glob| util::glob_to_like(glob)));
        }

        if !projected_fields.is_empty() {
            sql.push_str(" AND m.field IN (");
            sql.push_str(&placeholders(projected_fields.len()));
            sql.push(')');
            values.extend(projected_fields.iter().cloned());
        }

        sql.push_str(" ORDER BY f.path, m.field");

        let conn = self.read_conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| "prepare metadata query")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .with_context(|| "query metadata")?;

        let mut out: BTreeMap<String, FileMetadata> = BTreeMap::new();
        for row in rows {
            let (path, chat_id, field, value) = match row {
                Ok(value) => value,
                Err(err) => {
                    eprintln!("metagrep: skipping metadata row: {err}");
                    continue;
                }
            };
            let entry = out.entry(path).or_default();
            entry.chat_id = chat_id;
            entry.fields.insert(field, value);
        }

        Ok((out, available))
    }

    /// Upsert metadata records; re-importing a path replaces its fields.
    /// Field types are inferred per value and recorded in the registry.
    pub fn import_records(&self, records: &[ImportRecord]) -> Result<usize> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let mut conn = self.conn();
        let tx = conn.transaction().with_context(|| "begin import")?;
        let mut imported = 0usize;
        for record in records {
            tx.execute(
                "INSERT INTO files(path, chat_id, analyzed_at) VALUES(?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE
                 SET chat_id = excluded.chat_id, analyzed_at = excluded.analyzed_at",
                params![record.path, record.chat_id, now],
            )
            .with_context(|| format!("upsert file {}", record.path))?;
            let file_id: i64 = tx.query_row(
                "SELECT id FROM files WHERE path = ?1",
                params![record.path],
                |row| row.get(0),
            )?;
            tx.execute(
                "DELETE FROM file_metadata WHERE file_id = ?1",
                params![file_id],
            )?;
            for (field, value) in &record.fields {
                tx.execute(
                    "INSERT INTO file_metadata(file_id, field, value) VALUES(?1, ?2, ?3)",
                    params![file_id, field, stored_value(value)],
                )?;
                record_field_kind(&tx, field, infer_field_type(value))?;
            }
            imported += 1;
        }
        tx.commit().with_context(|| "commit import")?;
        Ok(imported)
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

/// Scalars are stored verbatim; arrays keep their JSON-literal encoding.
fn stored_value(value: &Value) -> ToSqlOutput<'_> {
    match value {
        Value::String(s) => ToSqlOutput::from(s.as_str()),
        other => ToSqlOutput::from(other.to_string()),
    }
}

fn infer_field_type(value: &Value) -> FieldType {
    match value {
        Value::Array(_) => FieldType::List,
        Value::Number(_) => FieldType::Number,
        Value::String(s) if s.trim().parse::<f64>().is_ok() => FieldType::Number,
        _ => FieldType::Str,
    }
}

// A field seen with conflicting kinds widens to string.
fn record_field_kind(tx: &Transaction, field: &str, kind: FieldType) -> Result<()> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT kind FROM fields WHERE field = ?1",
            params![field],
            |row| row.get(0),
        )
        .optional()?;
    match existing {
        None => {
            tx.execute(
                "INSERT INTO fields(field, kind) VALUES(?1, ?2)",
                params![field, kind.as_str()],
            )?;
        }
        Some(current) if current == kind.as_str() => {}
        Some(_) => {
            tx.execute(
                "UPDATE fields SET kind = 'string' WHERE field = ?1",
                params![field],
            )?;
        }
    }
    Ok(())
}
