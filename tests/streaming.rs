//! Tests for streaming result cursors

use std::sync::Arc;
use std::time::Duration;

use zero_dbcore::handler::CollectHandler;
use zero_dbcore::memory::{Canned, MemoryDriver};
use zero_dbcore::tokio::Connection;
use zero_dbcore::{ColumnType, Error, Field, HandleKind, InlineOffload, NativeError, Opts, Value};

fn opts() -> Opts {
    Opts {
        host: "localhost".into(),
        ..Opts::default()
    }
}

const NUMBERS: &str = "SELECT n FROM numbers";

fn numbers(driver: &MemoryDriver, count: i64) {
    driver.on(
        NUMBERS,
        Canned::rows(
            vec![Field::new("n", ColumnType::Long).with_table("numbers")],
            (1..=count).map(|n| vec![Value::Int(n)]).collect(),
        ),
    );
}

async fn open_with_read_timeout(driver: &MemoryDriver, limit: Duration) -> Connection {
    let opts = Opts {
        read_timeout: Some(limit),
        ..opts()
    };
    Connection::open(opts, Arc::new(driver.clone()))
        .await
        .expect("Failed to connect")
}

async fn open(driver: &MemoryDriver) -> Connection {
    Connection::open(opts(), Arc::new(driver.clone()))
        .await
        .expect("Failed to connect")
}

#[tokio::test]
async fn test_rows_in_order_then_end_repeatedly() {
    let driver = MemoryDriver::new();
    numbers(&driver, 5);
    let conn = open(&driver).await;

    let mut cursor = conn.query_stream(NUMBERS).await.unwrap();
    assert!(cursor.is_streaming());
    assert_eq!(cursor.row_count(), None);
    assert_eq!(cursor.fields().unwrap()[0].table.as_deref(), Some("numbers"));

    let mut seen = Vec::new();
    while let Some(row) = cursor.next_row().await.unwrap() {
        seen.push(row.try_get::<i32>(0).unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    assert_eq!(cursor.rows_processed(), 5);
    assert!(cursor.is_complete());

    assert!(cursor.next_row().await.unwrap().is_none());
    assert!(cursor.next_row().await.unwrap().is_none());
    assert!(!conn.is_busy());

    cursor.free().await.unwrap();
    cursor.free().await.unwrap();
    assert!(cursor.is_freed());
}

#[tokio::test]
async fn test_query_while_streaming_is_busy() {
    let driver = MemoryDriver::new();
    numbers(&driver, 5);
    let conn = open(&driver).await;

    let mut cursor = conn.query_stream(NUMBERS).await.unwrap();
    cursor.next_row().await.unwrap();

    match conn.query("SELECT 1").await {
        Err(Error::Busy(msg)) => assert!(msg.contains("streaming result"), "{}", msg),
        other => panic!("expected busy, got {:?}", other),
    }
    assert!(conn.prepare("SELECT 1").await.is_err());
    assert!(conn.flags().active);

    cursor.free().await.unwrap();
    assert!(!conn.is_busy());
    assert_eq!(driver.stats().rows_discarded(), 4);

    let n: Option<(i64,)> = conn.query_first("SELECT 1").await.unwrap();
    assert_eq!(n, Some((1,)));
}

#[tokio::test]
async fn test_dropped_cursor_is_drained() {
    let driver = MemoryDriver::new();
    numbers(&driver, 3);
    let conn = Connection::open_with_offload(
        opts(),
        Arc::new(driver.clone()),
        Arc::new(InlineOffload),
    )
    .await
    .unwrap();

    let mut cursor = conn.query_stream(NUMBERS).await.unwrap();
    cursor.next_row().await.unwrap();
    drop(cursor);

    assert!(!conn.is_busy());
    assert_eq!(driver.stats().rows_discarded(), 2);
    assert_eq!(conn.query_drop("SELECT 1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_dropped_cursor_is_drained_in_background() {
    let driver = MemoryDriver::new();
    numbers(&driver, 3);
    let conn = open(&driver).await;

    let cursor = conn.query_stream(NUMBERS).await.unwrap();
    drop(cursor);

    for _ in 0..100 {
        if !conn.is_busy() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!conn.is_busy());
    assert_eq!(driver.stats().rows_discarded(), 3);
}

#[tokio::test]
async fn test_stream_failure_is_terminal() {
    let driver = MemoryDriver::new();
    driver.on(
        NUMBERS,
        Canned::rows(
            vec![Field::new("n", ColumnType::Long)],
            vec![vec![Value::Int(1)]],
        )
        .with_stream_error(NativeError::new(1317, "Query execution was interrupted")),
    );
    let conn = open(&driver).await;

    let mut cursor = conn.query_stream(NUMBERS).await.unwrap();
    assert!(cursor.next_row().await.unwrap().is_some());
    for _ in 0..2 {
        match cursor.next_row().await {
            Err(Error::Stream(native)) => assert_eq!(native.code, 1317),
            other => panic!("expected stream error, got {:?}", other),
        }
    }
    assert!(!conn.is_busy());
    assert_eq!(conn.query_collect::<(i64,)>("SELECT 2").await.unwrap(), vec![(2,)]);

    cursor.free().await.unwrap();
}

#[tokio::test]
async fn test_freed_cursor_rejects_access() {
    let driver = MemoryDriver::new();
    numbers(&driver, 2);
    let conn = open(&driver).await;

    let mut buffered = conn.query(NUMBERS).await.unwrap();
    assert_eq!(buffered.row_count(), Some(2));
    buffered.next_row().await.unwrap();
    assert!(!buffered.is_complete());
    buffered.free().await.unwrap();
    assert!(buffered.is_complete());
    assert!(matches!(
        buffered.fields(),
        Err(Error::UseAfterFree(HandleKind::Result))
    ));
    assert!(matches!(
        buffered.next_row().await,
        Err(Error::UseAfterFree(HandleKind::Result))
    ));

    let mut streaming = conn.query_stream(NUMBERS).await.unwrap();
    streaming.free().await.unwrap();
    assert!(matches!(
        streaming.next_row().await,
        Err(Error::UseAfterFree(HandleKind::Result))
    ));
}

#[tokio::test]
async fn test_drive_streaming_handler() {
    let driver = MemoryDriver::new();
    numbers(&driver, 4);
    let conn = open(&driver).await;

    let mut cursor = conn.query_stream(NUMBERS).await.unwrap();
    let mut handler = CollectHandler::<(i64,)>::new();
    cursor.drive(&mut handler).await.unwrap();
    assert_eq!(handler.into_rows(), vec![(1,), (2,), (3,), (4,)]);
    assert!(cursor.is_freed());
    assert!(!conn.is_busy());
}

#[tokio::test]
async fn test_empty_streaming_result() {
    let driver = MemoryDriver::new();
    numbers(&driver, 0);
    let conn = open(&driver).await;

    let mut cursor = conn.query_stream(NUMBERS).await.unwrap();
    assert!(cursor.next_row().await.unwrap().is_none());
    assert!(!conn.is_busy());
}

#[tokio::test]
async fn test_row_fetched_after_timeout_is_returned_next() {
    let driver = MemoryDriver::new();
    driver.on(
        NUMBERS,
        Canned::rows(
            vec![Field::new("n", ColumnType::Long)],
            (1..=3).map(|n| vec![Value::Int(n)]).collect(),
        )
        .with_fetch_stall(1, Duration::from_millis(150)),
    );
    let conn = open_with_read_timeout(&driver, Duration::from_millis(30)).await;

    let mut cursor = conn.query_stream(NUMBERS).await.unwrap();
    let first = cursor.next_row().await.unwrap().unwrap();
    assert_eq!(first.try_get::<i64>(0).unwrap(), 1);
    match cursor.next_row().await {
        Err(Error::Timeout { op, .. }) => assert_eq!(op, "fetch"),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(!cursor.is_complete());
    assert!(conn.is_busy());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut rest = Vec::new();
    while let Some(row) = cursor.next_row().await.unwrap() {
        rest.push(row.try_get::<i64>(0).unwrap());
    }
    assert_eq!(rest, vec![2, 3]);
    assert_eq!(cursor.rows_processed(), 3);
    assert!(!conn.is_busy());
}

#[tokio::test]
async fn test_fetch_error_after_timeout_is_reported() {
    let driver = MemoryDriver::new();
    driver.on(
        NUMBERS,
        Canned::rows(
            vec![Field::new("n", ColumnType::Long)],
            vec![vec![Value::Int(1)]],
        )
        .with_stream_error(NativeError::new(1317, "Query execution was interrupted"))
        .with_fetch_stall(1, Duration::from_millis(150)),
    );
    let conn = open_with_read_timeout(&driver, Duration::from_millis(30)).await;

    let mut cursor = conn.query_stream(NUMBERS).await.unwrap();
    assert!(cursor.next_row().await.unwrap().is_some());
    assert!(matches!(
        cursor.next_row().await,
        Err(Error::Timeout { .. })
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    for _ in 0..2 {
        match cursor.next_row().await {
            Err(Error::Stream(native)) => assert_eq!(native.code, 1317),
            other => panic!("expected stream error, got {:?}", other),
        }
    }
    assert!(!cursor.is_complete());
    assert!(!conn.is_busy());
    assert_eq!(conn.query_collect::<(i64,)>("SELECT 2").await.unwrap(), vec![(2,)]);
}
