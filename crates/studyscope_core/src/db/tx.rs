//! Transaction scoping for composite writes.
//!
//! # Responsibility
//! - Run a closure so that all of its writes commit or roll back together.
//! - Allow composite operations to call other atomic operations.
//!
//! # Invariants
//! - Outermost sections take the write lock up front (`BEGIN IMMEDIATE`), so
//!   validation and writes for one scope are serialized across connections.
//! - Inner sections use uniquely named savepoints and never commit the
//!   enclosing transaction.

use super::DbError;
use log::warn;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::atomic::{AtomicU64, Ordering};

static SAVEPOINT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Runs `op` atomically on `conn`.
///
/// Returns the closure result after commit. When the closure fails, every
/// write it performed is rolled back and its error is returned unchanged.
///
/// # Errors
/// - Returns the closure error on failure.
/// - Returns a `DbError` converted into `E` when begin/commit fails.
pub fn run_atomic<T, E>(conn: &Connection, op: impl FnOnce() -> Result<T, E>) -> Result<T, E>
where
    E: From<DbError>,
{
    if conn.is_autocommit() {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
            .map_err(|err| E::from(DbError::Sqlite(err)))?;
        return match op() {
            Ok(value) => {
                tx.commit().map_err(|err| E::from(DbError::Sqlite(err)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=tx_rollback module=db status=error scope=transaction error={rollback_err}"
                    );
                }
                Err(err)
            }
        };
    }

    let name = format!("sp_{}", SAVEPOINT_SEQ.fetch_add(1, Ordering::Relaxed));
    conn.execute_batch(&format!("SAVEPOINT {name};"))
        .map_err(|err| E::from(DbError::Sqlite(err)))?;
    match op() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {name};"))
                .map_err(|err| E::from(DbError::Sqlite(err)))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) =
                conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};"))
            {
                warn!(
                    "event=tx_rollback module=db status=error scope=savepoint error={rollback_err}"
                );
            }
            Err(err)
        }
    }
}
