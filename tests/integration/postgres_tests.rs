//! Integration tests for the tokio-postgres link
//!
//! These tests require a running PostgreSQL server; see `tests/integration.rs`.

use pgsession::db::types::CellValue;
use pgsession::{Session, SessionError, SessionOptions};
use std::time::Duration;
use tokio::sync::mpsc;

/// Get test database connection options
fn test_options() -> SessionOptions {
    SessionOptions {
        user: Some(std::env::var("TEST_DB_USER").unwrap_or_else(|_| "test_user".to_string())),
        password: Some(
            std::env::var("TEST_DB_PASSWORD").unwrap_or_else(|_| "test_password".to_string()),
        ),
        host: Some(std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string())),
        port: Some(
            std::env::var("TEST_DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5433),
        ),
        database: Some(std::env::var("TEST_DB_NAME").unwrap_or_else(|_| "test_db".to_string())),
        query: Some("sslmode=disable&application_name=pgsession-tests".to_string()),
    }
}

/// Connected session, or `None` when the server is unavailable
async fn connect() -> Option<Session> {
    let options = test_options();
    let session = Session::postgres();
    match session.connect(options.clone()).await {
        Ok(()) => Some(session),
        Err(e) => {
            eprintln!("Skipping test: Database not available at {} - {}", options, e);
            None
        }
    }
}

#[tokio::test]
async fn test_execute_simple_query() {
    let Some(session) = connect().await else {
        return;
    };

    let results = session
        .execute("SELECT 1 as num, 'hello' as msg")
        .await
        .expect("query should succeed");
    assert_eq!(results.columns.len(), 2);
    assert_eq!(results.columns[0].name, "num");
    assert_eq!(results.columns[1].name, "msg");
    assert_eq!(results.row_count, 1);

    let row = &results.rows[0];
    match &row.values[0] {
        CellValue::Integer(n) => assert_eq!(*n, 1),
        other => panic!("Expected Integer, got {:?}", other),
    }
    match &row.values[1] {
        CellValue::Text(s) => assert_eq!(s, "hello"),
        other => panic!("Expected Text, got {:?}", other),
    }
    session.close().await;
}

#[tokio::test]
async fn test_value_types() {
    let Some(session) = connect().await else {
        return;
    };

    let results = session
        .execute(
            "SELECT 12.50::numeric AS amount, now() AS ts, NULL::text AS nothing, \
             '{\"role\": \"admin\"}'::jsonb AS meta, ARRAY[1, 2, 3] AS nums",
        )
        .await
        .expect("query should succeed");
    let row = &results.rows[0];

    // NUMERIC is extracted via rust_decimal as a Text string
    match &row.values[0] {
        CellValue::Text(s) => assert_eq!(s, "12.50"),
        other => panic!("Expected Text for NUMERIC, got {:?}", other),
    }
    assert!(matches!(&row.values[1], CellValue::DateTime(s) if !s.is_empty()));
    assert!(row.values[2].is_null());
    match &row.values[3] {
        CellValue::Json(v) => assert_eq!(v["role"], "admin"),
        other => panic!("Expected Json, got {:?}", other),
    }
    assert_eq!(row.values[4].display_string(), "{1,2,3}");
    session.close().await;
}

#[tokio::test]
async fn test_multi_statement_script_returns_last_result() {
    let Some(session) = connect().await else {
        return;
    };

    let results = session
        .execute("SELECT 1 AS first; SELECT 'two' AS second")
        .await
        .expect("script should succeed");
    assert_eq!(results.columns[0].name, "second");
    assert_eq!(results.first_text(), Some("two"));
    session.close().await;
}

#[tokio::test]
async fn test_invalid_query_carries_sql() {
    let Some(session) = connect().await else {
        return;
    };

    let err = session
        .execute("SELECT * FROM nonexistent_table")
        .await
        .expect_err("invalid query should fail");
    assert!(matches!(err, SessionError::QueryFailed { .. }));
    assert_eq!(err.sql(), Some("SELECT * FROM nonexistent_table"));
    assert!(err.to_string().contains("nonexistent_table"));

    // The session stays usable
    assert!(session.execute("SELECT 1").await.is_ok());
    session.close().await;
}

#[tokio::test]
async fn test_connection_failure() {
    let mut options = test_options();
    options.host = Some("invalid-host-that-does-not-exist.local".to_string());
    options.port = Some(59999);
    options.query = Some("sslmode=disable&connect_timeout=2".to_string());

    let session = Session::postgres();
    let result = session.connect(options).await;
    assert!(matches!(result, Err(SessionError::ConnectFailed(_))));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_native_version_probe() {
    let Some(session) = connect().await else {
        return;
    };

    let version = session
        .cached_server_version()
        .expect("version should be probed during connect");
    assert!(version.major >= 9);
    assert_eq!(
        session.supports_materialized_views(),
        version.at_least(9, 3)
    );
    // Native probe: nothing in history
    assert!(session.history().is_empty());
    session.close().await;
}

#[tokio::test]
async fn test_run_all_in_order() {
    let Some(session) = connect().await else {
        return;
    };

    let last = session
        .run_all([
            "CREATE TEMP TABLE pgsession_batch (n int)",
            "INSERT INTO pgsession_batch VALUES (1), (2), (3)",
            "SELECT count(*)::text AS total FROM pgsession_batch",
        ])
        .await
        .expect("batch should succeed")
        .expect("batch returns the last result");
    assert_eq!(last.first_text(), Some("3"));

    let err = session
        .run_all([
            "INSERT INTO pgsession_batch VALUES (4)",
            "INSERT INTO pgsession_missing VALUES (5)",
            "INSERT INTO pgsession_batch VALUES (6)",
        ])
        .await
        .expect_err("second statement should fail");
    assert!(matches!(err, SessionError::BatchAborted { index: 1, .. }));

    let count = session
        .execute("SELECT count(*)::text FROM pgsession_batch")
        .await
        .unwrap();
    assert_eq!(count.first_text(), Some("4"));
    session.close().await;
}

#[tokio::test]
async fn test_listen_notify_reaches_listener() {
    let Some(session) = connect().await else {
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    session.on_notification(move |n| {
        let _ = tx.send((n.channel.clone(), n.payload.clone()));
    });
    session.execute("LISTEN pgsession_test").await.unwrap();
    session
        .execute("NOTIFY pgsession_test, 'hello'")
        .await
        .unwrap();

    let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notification should arrive");
    assert_eq!(
        got,
        Some(("pgsession_test".to_string(), "hello".to_string()))
    );
    session.close().await;
}

#[tokio::test]
async fn test_switch_database_and_back() {
    let Some(session) = connect().await else {
        return;
    };
    let original = session.options().unwrap().database().to_string();

    if session.switch_database("postgres").await.is_err() {
        eprintln!("Skipping test: cannot connect to the postgres database");
        return;
    }
    let current = session.execute("SELECT current_database()").await.unwrap();
    assert_eq!(current.first_text(), Some("postgres"));

    session.switch_database(&original).await.unwrap();
    let current = session.execute("SELECT current_database()").await.unwrap();
    assert_eq!(current.first_text(), Some(original.as_str()));
    session.close().await;
}

#[tokio::test]
async fn test_reconnect_keeps_session_usable() {
    let Some(session) = connect().await else {
        return;
    };
    session.reconnect().await.unwrap();
    assert!(session.execute("SELECT 1").await.is_ok());
    session.close().await;
}

#[tokio::test]
async fn test_catalog_queries() {
    let Some(session) = connect().await else {
        return;
    };
    let database = session.options().unwrap().database().to_string();

    let databases = session.list_databases().await.unwrap();
    assert!(databases.contains(&database));
    let templates = session.database_templates().await.unwrap();
    assert!(templates.iter().any(|t| t == "template1"));
    let encodings = session.available_encodings().await.unwrap();
    assert!(encodings.iter().any(|e| e == "UTF8"));
    assert!(!session.get_variable("server_encoding").await.unwrap().is_empty());
    assert!(session.materialized_views().await.is_ok());
    assert!(session.tables_and_schemas().await.is_ok());
    assert!(session.extensions().await.unwrap().iter().any(|e| e.name == "plpgsql"));
    session.close().await;
}
