//! Bounded connection pool
//!
//! A fixed set of handles gated by a semaphore. `try_acquire` reports `Busy`
//! when every handle is out; `acquire` waits for one with a per-attempt
//! timeout and backs off between attempts until the retry budget is spent.
//! Dropping a [`PooledConnection`] hands the handle to the next acquirer.

use parking_lot::Mutex;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool is busy")]
    Busy,
    #[error("connection pool exhausted after {attempts} attempts (capacity {capacity})")]
    Exhausted { attempts: u32, capacity: usize },
    #[error("connection pool is closed")]
    Closed,
    #[error("failed to open database connection: {0}")]
    Connect(#[source] DbErr),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub capacity: usize,
    /// How long a single acquire attempt waits for a free handle
    pub acquire_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            acquire_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

struct PoolInner<C> {
    idle: Mutex<Vec<C>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
    retry: RetryPolicy,
}

pub struct ConnectionPool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Send + 'static> ConnectionPool<C> {
    /// Build a pool over an explicit set of handles; capacity is their count
    pub fn new(handles: Vec<C>, config: &PoolConfig) -> Self {
        let capacity = handles.len();
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(handles),
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                acquire_timeout: config.acquire_timeout,
                retry: config.retry,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Handles currently free
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Take a handle if one is free right now
    pub fn try_acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        match self.inner.permits.clone().try_acquire_owned() {
            Ok(permit) => self.checkout(permit),
            Err(TryAcquireError::NoPermits) => Err(PoolError::Busy),
            Err(TryAcquireError::Closed) => Err(PoolError::Closed),
        }
    }

    /// Wait for a handle, retrying with backoff while the pool stays busy
    pub async fn acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        let retry = self.inner.retry;

        for attempt in 1..=retry.max_attempts {
            let waiting = self.inner.permits.clone().acquire_owned();
            match tokio::time::timeout(self.inner.acquire_timeout, waiting).await {
                Ok(Ok(permit)) => return self.checkout(permit),
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => {
                    if retry.is_exhausted(attempt) {
                        break;
                    }
                    let delay = retry.delay_for(attempt);
                    warn!(
                        attempt,
                        capacity = self.inner.capacity,
                        ?delay,
                        "Connection pool busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(PoolError::Exhausted {
            attempts: retry.max_attempts,
            capacity: self.inner.capacity,
        })
    }

    /// Return a handle explicitly; dropping the guard does the same
    pub fn release(&self, connection: PooledConnection<C>) {
        drop(connection);
    }

    /// Fail every later acquire; handles already out stay usable
    pub fn close(&self) {
        self.inner.permits.close();
        info!(capacity = self.inner.capacity, "Connection pool closed");
    }

    fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledConnection<C>, PoolError> {
        // A permit always has a matching idle handle
        let connection = self.inner.idle.lock().pop().ok_or(PoolError::Busy)?;
        Ok(PooledConnection {
            connection: Some(connection),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }
}

impl ConnectionPool<DatabaseConnection> {
    /// Open the database and size its underlying pool to `capacity`
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, PoolError> {
        let mut options = ConnectOptions::new(database_url.to_owned());
        options
            .max_connections(config.capacity as u32)
            .acquire_timeout(config.acquire_timeout)
            .sqlx_logging(false);

        info!(capacity = config.capacity, "Connecting to database...");
        let db = Database::connect(options)
            .await
            .map_err(PoolError::Connect)?;

        // Handles share the sized sqlx pool; the semaphore bounds checkouts
        let handles = vec![db; config.capacity.max(1)];
        debug!(handles = handles.len(), "Database pool ready");
        Ok(Self::new(handles, config))
    }
}

/// A checked-out handle; returned to the pool on drop
pub struct PooledConnection<C> {
    connection: Option<C>,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only taken in Drop
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.idle.lock().push(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> PoolConfig {
        PoolConfig {
            capacity: 2,
            acquire_timeout: Duration::from_millis(20),
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(5)),
        }
    }

    #[test]
    fn test_try_acquire_reports_busy_at_capacity() {
        let pool = ConnectionPool::new(vec![1u32, 2], &config(3));

        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert_ne!(*a, *b);
        assert_eq!(pool.available(), 0);
        assert!(matches!(pool.try_acquire(), Err(PoolError::Busy)));

        pool.release(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_ok());
    }

    #[test]
    fn test_handles_are_reused() {
        let pool = ConnectionPool::new(vec![7u32], &config(1));
        let first = *pool.try_acquire().unwrap();
        let second = *pool.try_acquire().unwrap();
        assert_eq!(first, 7);
        assert_eq!(second, 7);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let pool = ConnectionPool::new(vec![1u32], &config(3));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|c| *c) })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_acquire_gives_up_after_budget() {
        let pool = ConnectionPool::new(vec![1u32, 2], &config(3));
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();

        match pool.acquire().await {
            Err(PoolError::Exhausted { attempts, capacity }) => {
                assert_eq!(attempts, 3);
                assert_eq!(capacity, 2);
            }
            _ => panic!("expected exhausted pool"),
        }
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let pool = ConnectionPool::new(vec![1u32], &config(3));
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.try_acquire(), Err(PoolError::Closed)));
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
