//! Transaction executor.
//!
//! `Database::run_in_transaction` is the only way the sharing layer touches
//! the store. It owns a small pool of SQLite connections, begins a
//! transaction at the requested isolation level, runs the caller's unit of
//! work on a blocking thread and commits or rolls back. Serialization
//! failures re-run the whole unit of work with jittered backoff; every
//! other error is returned after rollback.
//!
//! ## Isolation on SQLite
//!
//! | Level            | BEGIN       | Behaviour                                        |
//! |------------------|-------------|--------------------------------------------------|
//! | `ReadCommitted`  | `DEFERRED`  | WAL snapshot, never blocks writers               |
//! | `RepeatableRead` | `DEFERRED`  | Snapshot kept for the whole transaction          |
//! | `Serializable`   | `IMMEDIATE` | Write lock at BEGIN, writers ordered by commit   |
//!
//! A deferred transaction that later writes on a stale snapshot fails with
//! `SQLITE_BUSY`, which is retried like any other serialization failure.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use rusqlite::{Connection, InterruptHandle, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{Context, DbError, Result, TransactionError};

/// Default bound on how long one attempt may wait for locks or run.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Requested transaction isolation, ordered from weakest to strongest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn behavior(self) -> TransactionBehavior {
        match self {
            IsolationLevel::ReadCommitted | IsolationLevel::RepeatableRead => {
                TransactionBehavior::Deferred
            }
            IsolationLevel::Serializable => TransactionBehavior::Immediate,
        }
    }
}

/// Bounded retry with exponential, jittered backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// Half of the exponential step is fixed, the other half is random.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let step = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        let half = u64::try_from(step.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=half);
        Duration::from_millis(half.saturating_add(jitter))
    }
}

/// Per-call transaction options.
///
/// Passed explicitly into every operation. Defaults: `ReadCommitted`,
/// 30 s statement timeout, no overall timeout, [`RetryPolicy::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    /// Bounds lock waits and the run time of a single attempt.
    pub statement_timeout: Duration,
    /// Overall budget across all attempts, on top of the caller's deadline.
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl TxOptions {
    /// Options for read paths that must not block writers.
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Options for read-modify-write operations.
    pub fn serializable() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            ..Self::default()
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbConfig {
    pub pool_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Handle to an on-disk database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Arc<Pool>,
}

#[derive(Debug)]
struct Pool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    slots: Arc<Semaphore>,
}

impl Pool {
    fn checkout(&self) -> Result<Connection> {
        let idle = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match idle {
            Some(conn) => Ok(conn),
            None => crate::connect(&self.path),
        }
    }

    fn checkin(&self, conn: Connection) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }
}

enum Outcome<T, E> {
    Finished(std::result::Result<T, E>),
    Panicked(Box<dyn Any + Send>),
}

impl Database {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = crate::open(&path)?;
        let slots = config.pool_size.max(1);
        Ok(Self {
            pool: Arc::new(Pool {
                path,
                idle: Mutex::new(vec![conn]),
                slots: Arc::new(Semaphore::new(slots)),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.pool.path
    }

    /// Run `work` inside a transaction.
    ///
    /// `work` may run more than once: serialization failures roll back and
    /// re-run it from a fresh transaction, so it must not have side effects
    /// outside the transaction. A panic inside `work` rolls back and is
    /// resumed on the caller.
    ///
    /// Dropping the returned future interrupts the running attempt and
    /// rolls it back; its connection slot is freed once it has unwound.
    pub async fn run_in_transaction<T, E, F>(
        &self,
        ctx: &Context,
        opts: &TxOptions,
        work: F,
    ) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: TransactionError,
        F: Fn(&Transaction<'_>) -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        let ctx = match opts.timeout {
            Some(timeout) => ctx.child_until(Instant::now() + timeout),
            None => ctx.child(),
        };
        let work = Arc::new(work);
        let max_attempts = opts.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, isolation = ?opts.isolation, "transaction attempt");
            let err = match self.attempt(&ctx, opts, Arc::clone(&work)).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "serialization failures exhausted retries");
                return Err(DbError::Transient {
                    attempts: attempt,
                    message: err.to_string(),
                }
                .into());
            }

            let delay = opts.retry.backoff(attempt);
            debug!(attempt, ?delay, error = %err, "serialization failure, retrying");
            tokio::select! {
                reason = ctx.done() => return Err(reason.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt<T, E, F>(
        &self,
        ctx: &Context,
        opts: &TxOptions,
        work: Arc<F>,
    ) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: TransactionError,
        F: Fn(&Transaction<'_>) -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        let permit = tokio::select! {
            biased;
            reason = ctx.done() => return Err(reason.into()),
            permit = Arc::clone(&self.pool.slots).acquire_owned() => {
                permit.map_err(|_| DbError::Closed)?
            }
        };

        let conn = self.pool.checkout()?;
        // Opening a connection can outlast a short deadline.
        if let Err(reason) = ctx.check() {
            self.pool.checkin(conn);
            return Err(reason.into());
        }
        let mut guard = AttemptGuard::new(conn.get_interrupt_handle());
        let abandoned = guard.abandoned();
        let pool = Arc::clone(&self.pool);
        let isolation = opts.isolation;
        let statement_timeout = opts.statement_timeout;
        // The slot and the connection stay with the blocking attempt, so
        // they are only released once its transaction has ended, even when
        // the caller stops waiting.
        let mut task = tokio::task::spawn_blocking(move || {
            let _slot = permit;
            let mut conn = conn;
            let outcome = execute(
                &mut conn,
                isolation,
                statement_timeout,
                &abandoned,
                work.as_ref(),
            );
            // An interrupted connection may still carry the interrupt flag.
            if !abandoned.load(Ordering::SeqCst) {
                pool.checkin(conn);
            }
            outcome
        });

        // On cancellation or timeout, interrupt the running statement and
        // still wait for the attempt so its transaction is rolled back.
        let (interrupted, joined) = tokio::select! {
            joined = &mut task => (None, joined),
            reason = ctx.done() => {
                guard.abandon();
                (Some(reason), task.await)
            }
            _ = tokio::time::sleep(statement_timeout) => {
                guard.abandon();
                (Some(DbError::Timeout(statement_timeout)), task.await)
            }
        };
        guard.disarm();

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_err) => {
                if join_err.is_panic() {
                    panic::resume_unwind(join_err.into_panic());
                }
                return Err(DbError::Worker(join_err.to_string()).into());
            }
        };

        match outcome {
            Outcome::Finished(Ok(value)) => Ok(value),
            Outcome::Finished(Err(err)) => match interrupted {
                Some(reason) => {
                    debug!(error = %err, "attempt interrupted");
                    Err(reason.into())
                }
                None => Err(err),
            },
            Outcome::Panicked(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Stops a blocking attempt that nobody waits for any more.
///
/// Abandoning interrupts the running statement and makes the attempt roll
/// back instead of committing. Dropping an armed guard abandons, which
/// covers the caller dropping the `run_in_transaction` future.
struct AttemptGuard {
    interrupt: InterruptHandle,
    abandoned: Arc<AtomicBool>,
    armed: bool,
}

impl AttemptGuard {
    fn new(interrupt: InterruptHandle) -> Self {
        Self {
            interrupt,
            abandoned: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    fn abandoned(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abandoned)
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
        self.interrupt.interrupt();
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if self.armed {
            self.abandon();
        }
    }
}

fn execute<T, E, F>(
    conn: &mut Connection,
    isolation: IsolationLevel,
    statement_timeout: Duration,
    abandoned: &AtomicBool,
    work: &F,
) -> Outcome<T, E>
where
    E: TransactionError,
    F: Fn(&Transaction<'_>) -> std::result::Result<T, E>,
{
    if abandoned.load(Ordering::SeqCst) {
        return Outcome::Finished(Err(DbError::Cancelled.into()));
    }
    if let Err(e) = conn.busy_timeout(statement_timeout) {
        return Outcome::Finished(Err(DbError::from(e).into()));
    }
    let tx = match conn.transaction_with_behavior(isolation.behavior()) {
        Ok(tx) => tx,
        Err(e) => return Outcome::Finished(Err(DbError::from(e).into())),
    };

    match panic::catch_unwind(AssertUnwindSafe(|| work(&tx))) {
        Ok(Ok(_)) if abandoned.load(Ordering::SeqCst) => {
            if let Err(e) = tx.rollback() {
                debug!(error = %e, "rollback of abandoned attempt failed");
            }
            Outcome::Finished(Err(DbError::Cancelled.into()))
        }
        // A failed commit leaves the transaction open; dropping it rolls back.
        Ok(Ok(value)) => Outcome::Finished(
            tx.commit()
                .map(|()| value)
                .map_err(|e| DbError::from(e).into()),
        ),
        Ok(Err(err)) => {
            if let Err(e) = tx.rollback() {
                debug!(error = %e, "rollback failed");
            }
            Outcome::Finished(Err(err))
        }
        Err(payload) => {
            if let Err(e) = tx.rollback() {
                debug!(error = %e, "rollback after panic failed");
            }
            Outcome::Panicked(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use tempfile::TempDir;

    use super::*;

    fn temp_db(pool_size: usize) -> (TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(dir.path().join("tribe.db"), DbConfig { pool_size })
            .expect("open database");
        (dir, db)
    }

    fn busy() -> DbError {
        DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn count_users(db: &Database) -> i64 {
        let conn = crate::connect(db.path()).expect("connect");
        conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .expect("count")
    }

    fn insert_user(tx: &Transaction<'_>) -> Result<()> {
        tx.execute(
            "INSERT INTO users (id, display_name, created_at) VALUES (randomblob(16), 'u', 1)",
            [],
        )?;
        Ok(())
    }

    const ENDLESS_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                                 SELECT COUNT(*) FROM c";

    #[tokio::test]
    async fn test_commit_on_success() {
        let (_dir, db) = temp_db(2);
        db.run_in_transaction(&Context::background(), &TxOptions::serializable(), insert_user)
            .await
            .expect("commit");
        assert_eq!(count_users(&db), 1);
    }

    #[tokio::test]
    async fn test_rollback_on_error() {
        let (_dir, db) = temp_db(2);
        let result: Result<()> = db
            .run_in_transaction(&Context::background(), &TxOptions::serializable(), |tx| {
                insert_user(tx)?;
                Err(DbError::NotFound("tribe".into()))
            })
            .await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
        assert_eq!(count_users(&db), 0);
    }

    #[tokio::test]
    async fn test_serialization_failure_is_retried() {
        let (_dir, db) = temp_db(2);
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        db.run_in_transaction(&Context::background(), &TxOptions::serializable(), move |tx| {
            insert_user(tx)?;
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(busy());
            }
            Ok(())
        })
        .await
        .expect("third attempt commits");

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Failed attempts were rolled back.
        assert_eq!(count_users(&db), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_transient() {
        let (_dir, db) = temp_db(1);
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let opts = TxOptions::serializable().with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        });
        let result: Result<()> = db
            .run_in_transaction(&Context::background(), &opts, move |_tx| {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(busy())
            })
            .await;

        assert!(matches!(result, Err(DbError::Transient { attempts: 3, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let (_dir, db) = temp_db(1);
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let result: Result<()> = db
            .run_in_transaction(&Context::background(), &TxOptions::default(), move |_tx| {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(DbError::Constraint("fk".into()))
            })
            .await;
        assert!(matches!(result, Err(DbError::Constraint(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_rolls_back_and_resumes() {
        let (_dir, db) = temp_db(1);
        let handle = {
            let db = db.clone();
            tokio::spawn(async move {
                let _: Result<()> = db
                    .run_in_transaction(
                        &Context::background(),
                        &TxOptions::serializable(),
                        |tx| -> Result<()> {
                            insert_user(tx)?;
                            std::panic::panic_any("boom");
                        },
                    )
                    .await;
            })
        };
        let join = handle.await.expect_err("panic reaches the caller");
        assert!(join.is_panic());
        assert_eq!(count_users(&db), 0);

        // The slot was released and the store is still usable.
        db.run_in_transaction(&Context::background(), &TxOptions::serializable(), insert_user)
            .await
            .expect("store usable after panic");
        assert_eq!(count_users(&db), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_never_runs_work() {
        let (_dir, db) = temp_db(1);
        let ctx = Context::background();
        ctx.cancel();
        let ran = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&ran);
        let result: Result<()> = db
            .run_in_transaction(&ctx, &TxOptions::serializable(), move |_tx| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(DbError::Cancelled)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_statement_timeout_interrupts() {
        let (_dir, db) = temp_db(1);
        let opts = TxOptions::default().with_statement_timeout(Duration::from_millis(100));
        let result: Result<i64> = db
            .run_in_transaction(&Context::background(), &opts, |tx| -> Result<i64> {
                Ok(tx.query_row(ENDLESS_QUERY, [], |row| row.get(0))?)
            })
            .await;
        assert!(matches!(result, Err(DbError::Timeout(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_interrupts_in_flight_statement() {
        let (_dir, db) = temp_db(1);
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let result: Result<i64> = db
            .run_in_transaction(&ctx, &TxOptions::default(), |tx| -> Result<i64> {
                Ok(tx.query_row(ENDLESS_QUERY, [], |row| row.get(0))?)
            })
            .await;
        assert!(matches!(result, Err(DbError::Cancelled)));

        // The slot is free again.
        db.run_in_transaction(&Context::background(), &TxOptions::serializable(), insert_user)
            .await
            .expect("slot released");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_while_waiting_for_a_slot() {
        let (_dir, db) = temp_db(1);
        let holding = Arc::new(AtomicBool::new(false));
        let holder = {
            let db = db.clone();
            let holding = Arc::clone(&holding);
            tokio::spawn(async move {
                db.run_in_transaction(
                    &Context::background(),
                    &TxOptions::serializable(),
                    move |tx| -> Result<()> {
                        insert_user(tx)?;
                        holding.store(true, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(500));
                        Ok(())
                    },
                )
                .await
            })
        };
        while !holding.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let ran = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&ran);
        let started = Instant::now();
        let result: Result<()> = db
            .run_in_transaction(&ctx, &TxOptions::serializable(), move |_tx| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(DbError::Cancelled)));
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        holder.await.expect("join").expect("holder commits");
        assert_eq!(count_users(&db), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_caller_rolls_back_and_keeps_slot_until_done() {
        let (_dir, db) = temp_db(1);
        let started = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&started);
        let ctx = Context::background();
        let opts = TxOptions::serializable();
        let slow = db.run_in_transaction(
            &ctx,
            &opts,
            move |tx| -> Result<()> {
                insert_user(tx)?;
                seen.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            },
        );
        let timed_out = tokio::time::timeout(Duration::from_millis(100), slow).await;
        assert!(timed_out.is_err());
        assert!(started.load(Ordering::SeqCst));

        // The abandoned attempt still holds the only slot.
        assert_eq!(db.pool.slots.available_permits(), 0);

        db.run_in_transaction(&Context::background(), &TxOptions::serializable(), insert_user)
            .await
            .expect("next caller gets the slot");
        // Only the second insert was committed.
        assert_eq!(count_users(&db), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_is_a_work_failure() {
        let (_dir, db) = temp_db(1);
        db.run_in_transaction(&Context::background(), &TxOptions::serializable(), |tx| {
            tx.execute_batch(
                "CREATE TABLE parent (id INTEGER PRIMARY KEY);
                 CREATE TABLE child (
                     id INTEGER PRIMARY KEY,
                     parent_id INTEGER NOT NULL
                         REFERENCES parent (id) DEFERRABLE INITIALLY DEFERRED
                 );",
            )?;
            Ok::<_, DbError>(())
        })
        .await
        .expect("setup");

        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let result: Result<()> = db
            .run_in_transaction(&Context::background(), &TxOptions::serializable(), move |tx| {
                seen.fetch_add(1, Ordering::SeqCst);
                // Only checked at COMMIT.
                tx.execute("INSERT INTO child (id, parent_id) VALUES (1, 42)", [])?;
                Ok(())
            })
            .await;

        let err = result.expect_err("commit fails");
        assert!(matches!(err, DbError::Sqlite(_)));
        assert!(!err.is_retryable());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let conn = crate::connect(db.path()).expect("connect");
        let children: i64 = conn
            .query_row("SELECT COUNT(*) FROM child", [], |row| row.get(0))
            .expect("count");
        assert_eq!(children, 0);

        // The connection went back clean.
        db.run_in_transaction(&Context::background(), &TxOptions::serializable(), insert_user)
            .await
            .expect("store usable after failed commit");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overall_timeout_is_deadline() {
        let (_dir, db) = temp_db(1);
        let opts = TxOptions::default().with_timeout(Duration::from_millis(100));
        let result: Result<i64> = db
            .run_in_transaction(&Context::background(), &opts, |tx| -> Result<i64> {
                Ok(tx.query_row(ENDLESS_QUERY, [], |row| row.get(0))?)
            })
            .await;
        assert!(matches!(result, Err(DbError::DeadlineExceeded)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serializable_writers_do_not_lose_updates() {
        let (_dir, db) = temp_db(4);
        db.run_in_transaction(&Context::background(), &TxOptions::serializable(), |tx| {
            tx.execute_batch(
                "CREATE TABLE counter (id INTEGER PRIMARY KEY, n INTEGER NOT NULL);
                 INSERT INTO counter (id, n) VALUES (1, 0);",
            )?;
            Ok::<_, DbError>(())
        })
        .await
        .expect("setup");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.run_in_transaction(&Context::background(), &TxOptions::serializable(), |tx| {
                    let n: i64 = tx.query_row("SELECT n FROM counter WHERE id = 1", [], |row| {
                        row.get(0)
                    })?;
                    tx.execute("UPDATE counter SET n = ?1 WHERE id = 1", [n + 1])?;
                    Ok::<_, DbError>(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("increment");
        }

        let conn = crate::connect(db.path()).expect("connect");
        let n: i64 = conn
            .query_row("SELECT n FROM counter WHERE id = 1", [], |row| row.get(0))
            .expect("read counter");
        assert_eq!(n, 16);
    }

    #[test]
    fn test_backoff_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        };
        for attempt in 1..10 {
            let delay = policy.backoff(attempt);
            assert!(delay <= Duration::from_millis(40), "attempt {attempt}: {delay:?}");
        }
        assert!(policy.backoff(1) >= Duration::from_millis(5));
    }

    #[test]
    fn test_isolation_order() {
        assert!(IsolationLevel::ReadCommitted < IsolationLevel::RepeatableRead);
        assert!(IsolationLevel::RepeatableRead < IsolationLevel::Serializable);
        assert_eq!(TxOptions::default().isolation, IsolationLevel::ReadCommitted);
        assert_eq!(
            TxOptions::serializable().isolation,
            IsolationLevel::Serializable
        );
    }
}
