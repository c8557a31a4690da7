//! Asynchronous connection pool.

use std::ops::Deref;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{Error, Result};
use crate::native::Driver;
use crate::offload::{Offload, default_offload};
use crate::opts::Opts;

use super::Connection;

pub struct Pool {
    opts: Opts,
    driver: Arc<dyn Driver>,
    offload: Arc<dyn Offload>,
    conns: ArrayQueue<Connection>,
    semaphore: Option<Arc<Semaphore>>,
}

impl Pool {
    pub fn new(opts: Opts, driver: Arc<dyn Driver>) -> Self {
        Self::with_offload(opts, driver, default_offload())
    }

    pub fn with_offload(opts: Opts, driver: Arc<dyn Driver>, offload: Arc<dyn Offload>) -> Self {
        let semaphore = opts
            .pool_max_concurrency
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            conns: ArrayQueue::new(opts.pool_max_idle_conn.max(1)),
            opts,
            driver,
            offload,
            semaphore,
        }
    }

    /// Check out a connection, reusing an idle one when it still answers a ping.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConn> {
        let permit = if let Some(sem) = &self.semaphore {
            Some(
                Arc::clone(sem)
                    .acquire_owned()
                    .await
                    .map_err(|_closed| Error::InvalidUsage("pool is closed".into()))?,
            )
        } else {
            None
        };
        let conn = loop {
            match self.conns.pop() {
                Some(c) => {
                    if c.ping().await.is_ok() {
                        break c;
                    }
                    debug!(thread_id = c.thread_id(), "dropping dead pooled connection");
                }
                None => {
                    break Connection::open_with_offload(
                        self.opts.clone(),
                        Arc::clone(&self.driver),
                        Arc::clone(&self.offload),
                    )
                    .await?;
                }
            }
        };
        Ok(PooledConn {
            conn,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Idle connections ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.conns.len()
    }

    fn check_in(&self, conn: Connection) {
        if conn.is_closed() || conn.is_broken() || conn.is_busy() {
            return;
        }
        if self.conns.push(conn).is_err() {
            debug!("pool is full; dropping connection");
        }
    }
}

pub struct PooledConn {
    pool: Arc<Pool>,
    conn: Connection,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Deref for PooledConn {
    type Target = Connection;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.pool.check_in(self.conn.retain());
    }
}
