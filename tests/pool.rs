//! Tests for the connection pool

use std::sync::Arc;
use std::time::Duration;

use zero_dbcore::error::code;
use zero_dbcore::memory::MemoryDriver;
use zero_dbcore::tokio::Pool;
use zero_dbcore::{InlineOffload, NativeError, Opts};

fn opts() -> Opts {
    Opts {
        host: "localhost".into(),
        ..Opts::default()
    }
}

fn pool(driver: &MemoryDriver, opts: Opts) -> Arc<Pool> {
    Arc::new(Pool::with_offload(
        opts,
        Arc::new(driver.clone()),
        Arc::new(InlineOffload),
    ))
}

#[tokio::test]
async fn test_connections_are_reused() {
    let driver = MemoryDriver::new();
    let pool = pool(&driver, opts());

    let thread_id = {
        let conn = pool.get().await.unwrap();
        assert_eq!(conn.query_drop("SELECT 1").await.unwrap(), 0);
        conn.thread_id()
    };
    assert_eq!(pool.idle_count(), 1);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.thread_id(), thread_id);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(driver.stats().connects(), 1);
}

#[tokio::test]
async fn test_closed_and_broken_connections_are_not_reused() {
    let driver = MemoryDriver::new();
    driver.fail(
        "KILL",
        NativeError::new(code::CR_SERVER_LOST, "Lost connection to MySQL server"),
    );
    let pool = pool(&driver, opts());

    {
        let conn = pool.get().await.unwrap();
        conn.retain().close();
    }
    assert_eq!(pool.idle_count(), 0);

    {
        let conn = pool.get().await.unwrap();
        assert!(conn.query("KILL").await.is_err());
    }
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(driver.stats().connects(), 2);
    assert_eq!(driver.stats().released(), 2);
}

#[tokio::test]
async fn test_busy_connection_is_not_reused() {
    let driver = MemoryDriver::new();
    let pool = pool(&driver, opts());

    let cursor = {
        let conn = pool.get().await.unwrap();
        conn.query_stream("SELECT 1").await.unwrap()
    };
    assert_eq!(pool.idle_count(), 0);
    drop(cursor);
}

#[tokio::test]
async fn test_max_concurrency() {
    let driver = MemoryDriver::new();
    let opts = Opts {
        pool_max_concurrency: Some(1),
        ..opts()
    };
    let pool = pool(&driver, opts);

    let first = pool.get().await.unwrap();
    let waiting = tokio::time::timeout(Duration::from_millis(50), pool.get()).await;
    assert!(waiting.is_err());

    drop(first);
    let second = tokio::time::timeout(Duration::from_millis(50), pool.get())
        .await
        .unwrap()
        .unwrap();
    assert!(second.ping().await.is_ok());
}
