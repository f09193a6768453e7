//! Exclusive (`BEGIN IMMEDIATE`) transactions with timing logs
//!
//! A deferred SQLite transaction only takes the write lock at its first
//! write, so two claimers can both pass the "not present" check before
//! either inserts. `BEGIN IMMEDIATE` takes the reserved lock up front, making
//! check-then-insert atomic across tasks and processes.

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::time::Instant;
use themebank_common::Result;

/// Connection holding an open `BEGIN IMMEDIATE` transaction
///
/// Must be finished with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). Dropping it unfinished closes the
/// connection instead of returning it to the pool, which discards the
/// transaction.
pub struct ImmediateTransaction {
    conn: PoolConnection<Sqlite>,
    caller: &'static str,
    acquired_at: Instant,
    finished: bool,
}

impl ImmediateTransaction {
    /// Connection to run statements inside the transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Commit and log how long the write lock was held
    pub async fn commit(mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.finished = true;

        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > 1000 {
            tracing::warn!(
                caller = self.caller,
                held_ms,
                "Ledger write lock held longer than expected (>1s)"
            );
        } else {
            tracing::trace!(caller = self.caller, held_ms, "Ledger transaction committed");
        }

        Ok(())
    }

    /// Roll back and release the write lock
    pub async fn rollback(mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.finished = true;

        tracing::trace!(
            caller = self.caller,
            held_ms = self.acquired_at.elapsed().as_millis(),
            "Ledger transaction rolled back"
        );

        Ok(())
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                caller = self.caller,
                held_ms = self.acquired_at.elapsed().as_millis(),
                "Unfinished ledger transaction dropped, closing connection"
            );
            self.conn.close_on_drop();
        }
    }
}

/// Acquire a pooled connection and open a `BEGIN IMMEDIATE` transaction on it
///
/// Lock contention surfaces as `Error::Database` ("database is locked"),
/// which [`retry_on_lock`](super::retry_on_lock) recognizes.
pub async fn begin_immediate(
    pool: &SqlitePool,
    caller: &'static str,
) -> Result<ImmediateTransaction> {
    let start = Instant::now();

    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(
            caller,
            wait_ms,
            "SLOW LEDGER LOCK ACQUISITION - another writer held the ledger"
        );
    } else {
        tracing::trace!(caller, wait_ms, "Ledger write lock acquired");
    }

    Ok(ImmediateTransaction {
        conn,
        caller,
        acquired_at: Instant::now(),
        finished: false,
    })
}
