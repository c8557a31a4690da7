//! Tests for prepared statements

use std::sync::Arc;

use zero_dbcore::memory::{Canned, MemoryDriver};
use zero_dbcore::tokio::Connection;
use zero_dbcore::{ColumnType, Error, Field, HandleKind, InlineOffload, Opts, Value};

fn opts() -> Opts {
    Opts {
        host: "localhost".into(),
        ..Opts::default()
    }
}

async fn open(driver: &MemoryDriver) -> Connection {
    Connection::open_with_offload(
        opts(),
        Arc::new(driver.clone()),
        Arc::new(InlineOffload),
    )
    .await
    .expect("Failed to connect")
}

fn add_one(driver: &MemoryDriver) {
    driver.on_fn("SELECT ? + 1 AS n", |params| {
        let n = match params.first() {
            Some(Value::Int(n)) => *n,
            _ => 0,
        };
        Ok(Canned::rows(
            vec![Field::new("n", ColumnType::LongLong).not_null()],
            vec![vec![Value::Int(n + 1)]],
        ))
    });
}

#[tokio::test]
async fn test_prepare_and_execute() {
    let driver = MemoryDriver::new();
    add_one(&driver);
    let conn = open(&driver).await;

    let stmt = conn.prepare("SELECT ? + 1 AS n").await.unwrap();
    assert_eq!(stmt.param_count(), 1);
    assert_eq!(stmt.fields()[0].name, "n");

    let rows: Vec<(i64,)> = stmt.execute_collect((4,)).await.unwrap();
    assert_eq!(rows, vec![(5,)]);

    let first: Option<(i64,)> = stmt.execute_first((41,)).await.unwrap();
    assert_eq!(first, Some((42,)));
    assert!(!conn.is_busy());
}

#[tokio::test]
async fn test_prepare_execute_free_close_then_query() {
    let driver = MemoryDriver::new();
    driver.on_fn("SELECT id FROM t WHERE id = ?", |params| {
        let rows = match params.first() {
            Some(Value::Int(1)) => vec![vec![Value::Int(1)]],
            _ => Vec::new(),
        };
        Ok(Canned::rows(
            vec![Field::new("id", ColumnType::Long).with_table("t")],
            rows,
        ))
    });
    let conn = open(&driver).await;

    let stmt = conn.prepare("SELECT id FROM t WHERE id = ?").await.unwrap();
    let mut cursor = stmt.execute((1,)).await.unwrap();
    assert_eq!(cursor.row_count(), Some(1));
    let row = cursor.next_row().await.unwrap().unwrap();
    assert_eq!(row.try_get_by_name::<i32>("id").unwrap(), 1);
    assert!(cursor.next_row().await.unwrap().is_none());
    cursor.free().await.unwrap();
    stmt.close();

    let rows: Vec<(i64,)> = conn.query_collect("SELECT 2").await.unwrap();
    assert_eq!(rows, vec![(2,)]);
    assert_eq!(driver.stats().statements_closed(), 1);
}

#[tokio::test]
async fn test_param_count_mismatch() {
    let driver = MemoryDriver::new();
    add_one(&driver);
    let conn = open(&driver).await;
    let stmt = conn.prepare("SELECT ? + 1 AS n").await.unwrap();

    assert!(matches!(
        stmt.execute(()).await,
        Err(Error::InvalidUsage(_))
    ));
    assert!(matches!(
        stmt.execute((1, 2)).await,
        Err(Error::InvalidUsage(_))
    ));
    assert!(!conn.is_busy());
    assert_eq!(driver.stats().commands(), 0);
}

#[tokio::test]
async fn test_close_statement_keeps_connection() {
    let driver = MemoryDriver::new();
    add_one(&driver);
    let conn = open(&driver).await;
    let stmt = conn.prepare("SELECT ? + 1 AS n").await.unwrap();
    let other = stmt.retain();
    assert_eq!(stmt.ref_count(), 2);

    stmt.close();
    assert!(other.is_closed());
    assert!(matches!(
        other.execute((1,)).await,
        Err(Error::UseAfterFree(HandleKind::Statement))
    ));

    assert!(!conn.is_closed());
    let n: Option<(i64,)> = conn.query_first("SELECT 3").await.unwrap();
    assert_eq!(n, Some((3,)));
}

#[tokio::test]
async fn test_released_statement_closed_at_next_command() {
    let driver = MemoryDriver::new();
    let stats = driver.stats();
    add_one(&driver);
    let conn = open(&driver).await;

    let stmt = conn.prepare("SELECT ? + 1 AS n").await.unwrap();
    drop(stmt);
    assert_eq!(stats.statements_closed(), 0);

    conn.query_drop("SELECT 1").await.unwrap();
    assert_eq!(stats.statements_prepared(), 1);
    assert_eq!(stats.statements_closed(), 1);
}

#[tokio::test]
async fn test_cursor_keeps_statement_alive() {
    let driver = MemoryDriver::new();
    let stats = driver.stats();
    add_one(&driver);
    let conn = open(&driver).await;

    let stmt = conn.prepare("SELECT ? + 1 AS n").await.unwrap();
    let mut cursor = stmt.execute((9,)).await.unwrap();
    assert_eq!(stmt.ref_count(), 2);
    drop(stmt);

    let row = cursor.next_row().await.unwrap().unwrap();
    assert_eq!(row.try_get_by_name::<i64>("n").unwrap(), 10);
    conn.query_drop("SELECT 1").await.unwrap();
    assert_eq!(stats.statements_closed(), 0);

    cursor.free().await.unwrap();
    conn.query_drop("SELECT 1").await.unwrap();
    assert_eq!(stats.statements_closed(), 1);
}

#[tokio::test]
async fn test_execute_summary() {
    let driver = MemoryDriver::new();
    driver.on(
        "INSERT INTO t (name) VALUES (?)",
        Canned::affected(1).with_insert_id(7).with_warnings(2),
    );
    let conn = open(&driver).await;

    let stmt = conn.prepare("INSERT INTO t (name) VALUES (?)").await.unwrap();
    assert_eq!(stmt.execute_drop(("alice",)).await.unwrap(), 1);
    assert_eq!(conn.affected_rows(), 1);
    assert_eq!(conn.last_insert_id(), 7);
    assert_eq!(conn.warning_count(), 2);
}

#[tokio::test]
async fn test_streaming_execute() {
    let driver = MemoryDriver::new();
    add_one(&driver);
    let conn = open(&driver).await;
    let stmt = conn.prepare("SELECT ? + 1 AS n").await.unwrap();

    let mut cursor = stmt.execute_stream((1,)).await.unwrap();
    assert!(cursor.is_streaming());
    assert!(conn.is_busy());
    let rows: Vec<(i64,)> = cursor.collect().await.unwrap();
    assert_eq!(rows, vec![(2,)]);
    assert!(!conn.is_busy());
}

#[tokio::test]
async fn test_prepare_error() {
    let driver = MemoryDriver::new();
    let conn = open(&driver).await;
    let err = conn.prepare("SELEKT ?").await.unwrap_err();
    assert_eq!(err.native_code(), Some(1064));
    assert!(!conn.is_busy());
}
