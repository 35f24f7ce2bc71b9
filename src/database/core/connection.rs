//! Database connection management
//!
//! This module owns the single SQLite connection of a process and hands it out
//! one unit-of-work at a time.
//!
//! A unit-of-work runs inside a transaction. When it succeeds with
//! `autocommit` set, the transaction is committed and the connection closed;
//! without `autocommit` the transaction stays open and the next unit-of-work
//! continues it. When it fails (or panics) the transaction is rolled back and
//! the connection closed before the error reaches the caller.
//!
//! All acquisitions are serialized behind one mutex, so statements from
//! concurrent callers never interleave.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info, warn};

use crate::database::core::query::Statement;
use crate::database::core::value::{Record, Value};
use crate::error::{DbError, Result};

/// Where the database file lives
///
/// Implemented by the configuration; the connection manager only reads it.
pub trait DbLocation: Send + Sync {
    fn db_folder(&self) -> PathBuf;

    fn db_current(&self) -> String;

    fn archives_folder(&self) -> PathBuf;

    fn full_path(&self) -> PathBuf {
        self.db_folder().join(self.db_current())
    }
}

/// A fixed database file path
impl DbLocation for PathBuf {
    fn db_folder(&self) -> PathBuf {
        self.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    fn db_current(&self) -> String {
        self.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn archives_folder(&self) -> PathBuf {
        self.db_folder().join("archives")
    }

    fn full_path(&self) -> PathBuf {
        self.clone()
    }
}

/// When the schema-creation script runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemaPolicy {
    /// Run the script only when the database file does not exist yet
    #[default]
    CreateIfMissing,
    /// Delete the database file and run the script on every open.
    /// Destroys all existing data.
    Recreate,
}

impl fmt::Display for SchemaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaPolicy::CreateIfMissing => write!(f, "create-if-missing"),
            SchemaPolicy::Recreate => write!(f, "recreate"),
        }
    }
}

impl FromStr for SchemaPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create-if-missing" | "create_if_missing" => Ok(SchemaPolicy::CreateIfMissing),
            "recreate" => Ok(SchemaPolicy::Recreate),
            other => Err(format!(
                "Unknown schema policy '{}'. Valid policies: create-if-missing, recreate",
                other
            )),
        }
    }
}

/// How a successful unit-of-work ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    /// commit and close
    Commit,
    /// leave the transaction open
    Defer,
    /// join a pending transaction if there is one, otherwise commit and close
    Inherit,
}

/// Owner of the process-wide SQLite connection
pub struct ConnectionManager {
    location: Box<dyn DbLocation>,
    conn: Mutex<Option<Connection>>,
}

impl ConnectionManager {
    /// Create a manager for the database at `location`
    ///
    /// Nothing is opened until the first unit-of-work.
    pub fn new(location: impl DbLocation + 'static) -> Self {
        Self {
            location: Box::new(location),
            conn: Mutex::new(None),
        }
    }

    /// The resolved database file path
    pub fn path(&self) -> PathBuf {
        self.location.full_path()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Whether an uncommitted transaction is pending on the connection
    pub fn in_transaction(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|conn| !conn.is_autocommit())
            .unwrap_or(false)
    }

    /// Run `f` inside a unit-of-work
    ///
    /// On success, `autocommit` commits and closes the connection; otherwise the
    /// transaction is left open for the next unit-of-work. On failure the
    /// transaction is rolled back and the connection closed regardless of
    /// `autocommit`, and the error is returned unchanged.
    pub fn with_unit_of_work<T, F>(&self, autocommit: bool, f: F) -> Result<T>
    where
        F: FnOnce(&UnitOfWork<'_>) -> Result<T>,
    {
        let finish = if autocommit {
            Finish::Commit
        } else {
            Finish::Defer
        };
        self.run(finish, f)
    }

    /// Run a read-only `f` inside a unit-of-work
    ///
    /// Joins a transaction left open by a deferred write instead of committing
    /// it; otherwise behaves like an autocommitted unit-of-work.
    pub fn with_read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&UnitOfWork<'_>) -> Result<T>,
    {
        self.run(Finish::Inherit, f)
    }

    fn run<T, F>(&self, finish: Finish, f: F) -> Result<T>
    where
        F: FnOnce(&UnitOfWork<'_>) -> Result<T>,
    {
        let mut slot = self.lock();
        let path = self.location.full_path();
        info!("database: {}", path.display());

        let mut scope = Scope {
            slot: &mut *slot,
            armed: true,
        };
        let result = {
            let conn = scope.connection(&path)?;
            let joined = !conn.is_autocommit();
            if !joined {
                conn.execute_batch("BEGIN")?;
            }
            f(&UnitOfWork { conn }).map(|value| (value, joined))
        };

        match result {
            Ok((value, joined)) => {
                scope.armed = false;
                let commit = match finish {
                    Finish::Commit => true,
                    Finish::Defer => false,
                    Finish::Inherit => !joined,
                };
                if commit {
                    commit_and_close(&mut *scope.slot)?;
                }
                Ok(value)
            }
            // dropping the armed scope rolls back and closes
            Err(e) => Err(e),
        }
    }

    /// Commit a pending transaction and close the connection
    pub fn commit(&self) -> Result<()> {
        commit_and_close(&mut self.lock())
    }

    /// Roll back a pending transaction and close the connection
    pub fn rollback(&self) -> Result<()> {
        rollback_and_close(&mut self.lock())
    }

    /// Close the connection; closing a closed connection is a no-op
    ///
    /// A pending transaction is discarded.
    pub fn close(&self) -> Result<()> {
        close_slot(&mut self.lock())
    }

    /// Create the database from `script` according to `policy`
    ///
    /// Returns whether the script ran. The script is executed verbatim in a
    /// single batch; if it fails, the half-created file is removed.
    pub fn ensure_schema(&self, script: &Path, policy: SchemaPolicy) -> Result<bool> {
        let path = self.location.full_path();
        let exists = path.exists();
        if exists && policy == SchemaPolicy::CreateIfMissing {
            debug!("database {} exists, schema script skipped", path.display());
            return Ok(false);
        }

        let sql = fs::read_to_string(script).map_err(|source| DbError::SchemaScript {
            path: script.to_path_buf(),
            source,
        })?;

        let mut slot = self.lock();
        close_slot(&mut slot)?;
        if exists {
            warn!("recreating database {}, existing data is dropped", path.display());
            fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        info!(
            "creating database {} from {}",
            path.display(),
            script.display()
        );
        let conn = open_connection(&path)?;
        match conn.execute_batch(&sql) {
            Ok(()) => {
                conn.close().map_err(|(_, e)| DbError::from(e))?;
                Ok(true)
            }
            Err(e) => {
                drop(conn);
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!("failed to remove {}: {}", path.display(), remove_err);
                }
                Err(e.into())
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // a panicking unit-of-work has already rolled back and closed
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close database: {}", e);
        }
    }
}

/// Release guard: unless disarmed, rolls back and closes on drop
struct Scope<'a> {
    slot: &'a mut Option<Connection>,
    armed: bool,
}

impl Scope<'_> {
    fn connection(&mut self, path: &Path) -> Result<&Connection> {
        let conn = match self.slot.take() {
            Some(conn) => conn,
            None => open_connection(path)?,
        };
        Ok(self.slot.insert(conn))
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = rollback_and_close(&mut *self.slot) {
                warn!("failed to roll back: {}", e);
            }
        }
    }
}

/// A single connection session, valid for one scoped acquisition
pub struct UnitOfWork<'c> {
    conn: &'c Connection,
}

impl UnitOfWork<'_> {
    /// Execute a statement, returning the number of changed rows
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    pub fn execute_statement(&self, stmt: &Statement) -> Result<usize> {
        self.execute(&stmt.sql, &stmt.params)
    }

    /// Run a query and collect every row as a record
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                record.push((name.clone(), Value::from(row.get_ref(i)?)));
            }
            records.push(record);
        }
        Ok(records)
    }

    pub fn query_statement(&self, stmt: &Statement) -> Result<Vec<Record>> {
        self.query(&stmt.sql, &stmt.params)
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// The underlying connection, for introspection
    pub fn connection(&self) -> &Connection {
        self.conn
    }
}

/// Open a connection and apply the session pragmas
fn open_connection(path: &Path) -> Result<Connection> {
    debug!("opening database {}", path.display());
    let conn = Connection::open(path)?;

    // Enable WAL mode for better concurrent read/write performance
    let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

    // Use NORMAL synchronous mode (good balance of safety and performance)
    conn.execute_batch("PRAGMA synchronous=NORMAL")?;

    // Store temp tables in memory
    conn.execute_batch("PRAGMA temp_store=MEMORY")?;

    // Enable foreign keys
    conn.execute_batch("PRAGMA foreign_keys=ON")?;

    Ok(conn)
}

fn commit_and_close(slot: &mut Option<Connection>) -> Result<()> {
    let committed = match slot.as_ref() {
        Some(conn) if !conn.is_autocommit() => conn.execute_batch("COMMIT"),
        _ => Ok(()),
    };
    if let Err(e) = committed {
        if let Err(rollback_err) = rollback_and_close(slot) {
            warn!("failed to roll back after commit error: {}", rollback_err);
        }
        return Err(e.into());
    }
    if slot.is_some() {
        debug!("committed");
    }
    close_slot(slot)
}

fn rollback_and_close(slot: &mut Option<Connection>) -> Result<()> {
    let rolled_back = match slot.as_ref() {
        Some(conn) if !conn.is_autocommit() => {
            debug!("rolling back");
            conn.execute_batch("ROLLBACK")
        }
        _ => Ok(()),
    };
    let closed = close_slot(slot);
    rolled_back?;
    closed
}

fn close_slot(slot: &mut Option<Connection>) -> Result<()> {
    match slot.take() {
        Some(conn) => {
            debug!("closing database connection");
            conn.close().map_err(|(_, e)| DbError::from(e))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    const SCRIPT: &str = "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);";

    fn setup() -> (TempDir, ConnectionManager) {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("create.sql");
        fs::write(&script, SCRIPT).unwrap();

        let manager = ConnectionManager::new(dir.path().join("test.db3"));
        assert!(manager
            .ensure_schema(&script, SchemaPolicy::CreateIfMissing)
            .unwrap());
        (dir, manager)
    }

    fn count(manager: &ConnectionManager) -> i64 {
        manager
            .with_read(|uow| {
                let rows = uow.query("SELECT COUNT(*) AS n FROM items", &[])?;
                Ok(rows[0][0].1.as_i64().unwrap_or(-1))
            })
            .unwrap()
    }

    fn insert(uow: &UnitOfWork<'_>, name: &str) -> Result<usize> {
        uow.execute("INSERT INTO items (name) VALUES (?)", &[name.into()])
    }

    #[test]
    fn test_lazy_open_and_autocommit_close() {
        let (_dir, manager) = setup();
        assert!(!manager.is_open());

        manager
            .with_unit_of_work(true, |uow| insert(uow, "bolt"))
            .unwrap();
        assert!(!manager.is_open());
        assert_eq!(count(&manager), 1);
    }

    #[test]
    fn test_error_rolls_back_and_closes() {
        let (_dir, manager) = setup();

        let result: Result<()> = manager.with_unit_of_work(false, |uow| {
            insert(uow, "bolt")?;
            Err(DbError::EmptyPredicate("items".to_string()))
        });
        assert!(matches!(result, Err(DbError::EmptyPredicate(_))));
        assert!(!manager.is_open());
        assert_eq!(count(&manager), 0);
    }

    #[test]
    fn test_store_error_is_wrapped() {
        let (_dir, manager) = setup();
        let result =
            manager.with_unit_of_work(true, |uow| uow.execute("SELECT * FROM nope", &[]));
        assert!(matches!(result, Err(DbError::Store(_))));
        assert!(!manager.is_open());
    }

    #[test]
    fn test_deferred_session_continues() {
        let (_dir, manager) = setup();

        manager
            .with_unit_of_work(false, |uow| insert(uow, "bolt"))
            .unwrap();
        assert!(manager.is_open());
        assert!(manager.in_transaction());

        // a read joins the pending session and sees the uncommitted row
        assert_eq!(count(&manager), 1);
        assert!(manager.in_transaction());

        manager
            .with_unit_of_work(false, |uow| insert(uow, "nut"))
            .unwrap();
        manager.rollback().unwrap();
        assert!(!manager.is_open());
        assert_eq!(count(&manager), 0);

        manager
            .with_unit_of_work(false, |uow| insert(uow, "washer"))
            .unwrap();
        manager.commit().unwrap();
        assert_eq!(count(&manager), 1);
    }

    #[test]
    fn test_failure_discards_deferred_work() {
        let (_dir, manager) = setup();

        manager
            .with_unit_of_work(false, |uow| insert(uow, "bolt"))
            .unwrap();
        let result = manager.with_unit_of_work(true, |uow| uow.execute("BROKEN SQL", &[]));
        assert!(result.is_err());
        assert_eq!(count(&manager), 0);
    }

    #[test]
    fn test_panic_rolls_back() {
        let (_dir, manager) = setup();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            manager.with_unit_of_work(true, |uow| -> Result<()> {
                insert(uow, "bolt")?;
                panic!("boom");
            })
        }));
        assert!(outcome.is_err());
        assert!(!manager.is_open());
        assert_eq!(count(&manager), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_dir, manager) = setup();

        // never opened
        manager.close().unwrap();
        manager.commit().unwrap();
        manager.rollback().unwrap();

        manager
            .with_unit_of_work(false, |uow| insert(uow, "bolt"))
            .unwrap();
        manager.close().unwrap();
        manager.close().unwrap();
        assert!(!manager.is_open());
        // closing discards the pending transaction
        assert_eq!(count(&manager), 0);
    }

    #[test]
    fn test_schema_created_only_when_missing() {
        let (dir, manager) = setup();
        let script = dir.path().join("create.sql");

        manager
            .with_unit_of_work(true, |uow| insert(uow, "bolt"))
            .unwrap();
        assert!(!manager
            .ensure_schema(&script, SchemaPolicy::CreateIfMissing)
            .unwrap());
        assert_eq!(count(&manager), 1);
    }

    #[test]
    fn test_schema_recreate_drops_data() {
        let (dir, manager) = setup();
        let script = dir.path().join("create.sql");

        manager
            .with_unit_of_work(true, |uow| insert(uow, "bolt"))
            .unwrap();
        assert!(manager
            .ensure_schema(&script, SchemaPolicy::Recreate)
            .unwrap());
        assert_eq!(count(&manager), 0);
    }

    #[test]
    fn test_schema_script_errors() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db3");
        let manager = ConnectionManager::new(db_path.clone());

        let missing = dir.path().join("missing.sql");
        assert!(matches!(
            manager.ensure_schema(&missing, SchemaPolicy::CreateIfMissing),
            Err(DbError::SchemaScript { .. })
        ));

        let broken = dir.path().join("broken.sql");
        fs::write(&broken, "CREATE TABLE a (id INTEGER); CREATE TABLEX b;").unwrap();
        assert!(matches!(
            manager.ensure_schema(&broken, SchemaPolicy::CreateIfMissing),
            Err(DbError::Store(_))
        ));
        assert!(!db_path.exists());
    }

    #[test]
    fn test_schema_policy_from_str() {
        assert_eq!(
            "create-if-missing".parse::<SchemaPolicy>().unwrap(),
            SchemaPolicy::CreateIfMissing
        );
        assert_eq!(
            "Recreate".parse::<SchemaPolicy>().unwrap(),
            SchemaPolicy::Recreate
        );
        assert!("always".parse::<SchemaPolicy>().is_err());
        assert_eq!(SchemaPolicy::default().to_string(), "create-if-missing");
    }

    #[test]
    fn test_path_location() {
        let path = PathBuf::from("/data/db/main.db3");
        assert_eq!(path.db_folder(), PathBuf::from("/data/db"));
        assert_eq!(path.db_current(), "main.db3");
        assert_eq!(path.archives_folder(), PathBuf::from("/data/db/archives"));
        assert_eq!(DbLocation::full_path(&path), path);
    }

    #[test]
    fn test_concurrent_units_are_serialized() {
        let (_dir, manager) = setup();
        let manager = Arc::new(manager);
        let inside = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let manager = Arc::clone(&manager);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for i in 0..5 {
                        manager
                            .with_unit_of_work(true, |uow| {
                                assert!(!inside.swap(true, Ordering::SeqCst));
                                insert(uow, &format!("w{}-{}", worker, i))?;
                                thread::sleep(Duration::from_millis(2));
                                inside.store(false, Ordering::SeqCst);
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(count(&manager), 20);
    }
}
