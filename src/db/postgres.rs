//! PostgreSQL link
//!
//! Concrete [`Connector`]/[`Link`] implementation using tokio-postgres.

use crate::config::{SessionOptions, SslMode};
use crate::db::link::{Connector, Link, LinkError, LinkEvent, LinkParts, Notification};
use crate::db::types::{CellValue, ColumnDef, DataType, QueryResults, Row};
use crate::db::version::ServerVersion;
use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{AsyncMessage, Client, SimpleQueryMessage};

/// Opens tokio-postgres links
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

impl PostgresConnector {
    pub fn new() -> Self {
        Self
    }
}

/// A live tokio-postgres client plus the task driving its socket
pub struct PostgresLink {
    client: Client,
    driver: JoinHandle<()>,
    version: Option<ServerVersion>,
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self, options: &SessionOptions) -> Result<LinkParts, LinkError> {
        let config = pg_config(options)?;
        let (events_tx, events) = mpsc::unbounded_channel();

        let (client, version, driver) = match options.ssl_mode() {
            SslMode::Disable => {
                let (client, connection) = config
                    .connect(tokio_postgres::NoTls)
                    .await
                    .map_err(|e| link_error(&e))?;
                let (version, driver) = spawn_driver(connection, events_tx);
                (client, version, driver)
            }
            SslMode::Prefer | SslMode::Require => {
                let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_tls_config());
                let (client, connection) = config.connect(tls).await.map_err(|e| link_error(&e))?;
                let (version, driver) = spawn_driver(connection, events_tx);
                (client, version, driver)
            }
        };

        Ok(LinkParts {
            link: Box::new(PostgresLink {
                client,
                driver,
                version,
            }),
            events,
        })
    }

    fn supports_native_version(&self) -> bool {
        true
    }
}

#[async_trait]
impl Link for PostgresLink {
    async fn query(&self, sql: &str) -> Result<QueryResults, LinkError> {
        let start = Instant::now();

        let stmt = match self.client.prepare(sql).await {
            Ok(stmt) => stmt,
            // Scripts with several statements only work over the simple protocol
            Err(e) if is_multi_statement_error(&e) => return self.simple_query(sql, start).await,
            Err(e) => return Err(link_error(&e)),
        };

        let columns: Vec<ColumnDef> = stmt
            .columns()
            .iter()
            .map(|col| ColumnDef {
                name: col.name().to_string(),
                data_type: pg_type_to_datatype(col.type_()),
            })
            .collect();

        let pg_rows = self
            .client
            .query(&stmt, &[])
            .await
            .map_err(|e| link_error(&e))?;

        let rows = pg_rows
            .iter()
            .map(|pg_row| Row {
                values: columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| extract_cell_value(pg_row, i, &col.data_type))
                    .collect(),
            })
            .collect();

        Ok(QueryResults::new(columns, rows, start.elapsed()))
    }

    async fn end(self: Box<Self>) {
        let PostgresLink { client, driver, .. } = *self;
        // Dropping the last client handle sends Terminate and lets the driver finish
        drop(client);
        if let Err(e) = driver.await {
            tracing::warn!(error = %e, "Connection driver task did not finish cleanly");
        }
    }

    fn native_version(&self) -> Option<ServerVersion> {
        self.version.clone()
    }
}

impl PostgresLink {
    async fn simple_query(&self, sql: &str, start: Instant) -> Result<QueryResults, LinkError> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| link_error(&e))?;

        // The last statement that produced rows wins
        let mut columns = Vec::new();
        let mut rows = Vec::new();
        let mut statement_done = false;
        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if statement_done || columns.is_empty() {
                        columns = row
                            .columns()
                            .iter()
                            .map(|c| ColumnDef {
                                name: c.name().to_string(),
                                data_type: DataType::Text,
                            })
                            .collect();
                        rows.clear();
                        statement_done = false;
                    }
                    let values = (0..row.len())
                        .map(|i| row.get(i).map_or(CellValue::Null, |v| CellValue::Text(v.to_string())))
                        .collect();
                    rows.push(Row { values });
                }
                SimpleQueryMessage::CommandComplete(_) => statement_done = true,
                _ => {}
            }
        }

        Ok(QueryResults::new(columns, rows, start.elapsed()))
    }
}

/// Build a tokio-postgres config from resolved options
fn pg_config(options: &SessionOptions) -> Result<tokio_postgres::Config, LinkError> {
    let mut config = tokio_postgres::Config::new();
    config.host(options.host());
    config.port(options.port());
    config.dbname(options.database());
    if let Some(user) = &options.user {
        config.user(user.as_str());
    }
    if let Some(password) = &options.password {
        config.password(password.as_str());
    }
    config.ssl_mode(match options.ssl_mode() {
        SslMode::Disable => tokio_postgres::config::SslMode::Disable,
        SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
        SslMode::Require => tokio_postgres::config::SslMode::Require,
    });

    for (key, value) in options.query_params() {
        match key {
            "sslmode" => {}
            "application_name" => {
                config.application_name(value);
            }
            "connect_timeout" => {
                let secs = value
                    .parse::<u64>()
                    .map_err(|_| LinkError::new(format!("Invalid connect_timeout: {}", value)))?;
                config.connect_timeout(Duration::from_secs(secs));
            }
            "options" => {
                config.options(value);
            }
            other => tracing::warn!(param = other, "Ignoring unsupported connection parameter"),
        }
    }
    Ok(config)
}

/// Drive the connection on its own task, forwarding notifications and
/// reporting why the connection stopped.
fn spawn_driver<S, T>(
    mut connection: tokio_postgres::Connection<S, T>,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> (Option<ServerVersion>, JoinHandle<()>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let version = connection
        .parameter("server_version")
        .and_then(ServerVersion::parse);

    let driver = tokio::spawn(async move {
        let mut messages =
            std::pin::pin!(futures::stream::poll_fn(move |cx| connection.poll_message(cx)));
        let failure = loop {
            match messages.next().await {
                Some(Ok(AsyncMessage::Notification(n))) => {
                    let _ = events.send(LinkEvent::Notification(Notification {
                        process_id: n.process_id(),
                        channel: n.channel().to_string(),
                        payload: n.payload().to_string(),
                    }));
                }
                Some(Ok(AsyncMessage::Notice(notice))) => {
                    tracing::debug!(message = notice.message(), "Server notice");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        };
        let _ = events.send(LinkEvent::Closed(failure));
    });

    (version, driver)
}

/// Prefer the server's own message over the driver's wrapper text
fn link_error(e: &tokio_postgres::Error) -> LinkError {
    match e.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => LinkError::new(format!("{}\n{}", db.message(), detail)),
            None => LinkError::new(db.message()),
        },
        None => LinkError::new(e.to_string()),
    }
}

fn is_multi_statement_error(e: &tokio_postgres::Error) -> bool {
    e.as_db_error().is_some_and(|db| {
        db.code() == &SqlState::SYNTAX_ERROR && db.message().contains("multiple commands")
    })
}

/// Build a rustls ClientConfig that trusts OS certificates (with Mozilla roots as fallback)
fn make_tls_config() -> rustls::ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    let mut loaded = 0;
    for cert in native_certs.certs {
        if root_store.add(cert).is_ok() {
            loaded += 1;
        }
    }
    if loaded == 0 {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// Map tokio_postgres Type to our DataType enum
fn pg_type_to_datatype(pg_type: &Type) -> DataType {
    match *pg_type {
        Type::INT2 => DataType::SmallInt,
        Type::INT4 => DataType::Integer,
        Type::INT8 => DataType::BigInt,
        Type::FLOAT4 => DataType::Real,
        Type::FLOAT8 => DataType::Double,
        Type::NUMERIC => DataType::Numeric,
        Type::TEXT | Type::NAME => DataType::Text,
        Type::VARCHAR => DataType::Varchar,
        Type::CHAR | Type::BPCHAR => DataType::Char,
        Type::BOOL => DataType::Boolean,
        Type::DATE => DataType::Date,
        Type::TIME => DataType::Time,
        Type::TIMESTAMP => DataType::Timestamp,
        Type::TIMESTAMPTZ => DataType::TimestampTz,
        Type::INTERVAL => DataType::Interval,
        Type::JSON => DataType::Json,
        Type::JSONB => DataType::Jsonb,
        Type::BYTEA => DataType::Bytea,
        Type::UUID => DataType::Uuid,
        Type::BOOL_ARRAY => DataType::Array(Box::new(DataType::Boolean)),
        Type::INT2_ARRAY => DataType::Array(Box::new(DataType::SmallInt)),
        Type::INT4_ARRAY => DataType::Array(Box::new(DataType::Integer)),
        Type::INT8_ARRAY => DataType::Array(Box::new(DataType::BigInt)),
        Type::FLOAT8_ARRAY => DataType::Array(Box::new(DataType::Double)),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            DataType::Array(Box::new(DataType::Text))
        }
        Type::UUID_ARRAY => DataType::Array(Box::new(DataType::Uuid)),
        Type::JSONB_ARRAY => DataType::Array(Box::new(DataType::Jsonb)),
        _ => DataType::Unknown(pg_type.name().to_string()),
    }
}

/// Typed extraction with NULL handling; type mismatches fall back to text
fn typed<'a, T>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    wrap: impl FnOnce(T) -> CellValue,
) -> CellValue
where
    T: FromSql<'a>,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => CellValue::Null,
        Err(_) => try_as_string(row, idx),
    }
}

fn typed_array<'a, T>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    wrap: impl Fn(T) -> CellValue,
) -> CellValue
where
    T: FromSql<'a>,
{
    typed::<Vec<T>>(row, idx, |items| {
        CellValue::Array(items.into_iter().map(wrap).collect())
    })
}

/// Extract a cell value from a tokio_postgres Row based on the column's DataType.
fn extract_cell_value(row: &tokio_postgres::Row, idx: usize, data_type: &DataType) -> CellValue {
    match data_type {
        DataType::SmallInt => typed::<i16>(row, idx, |v| CellValue::Integer(v.into())),
        DataType::Integer => typed::<i32>(row, idx, |v| CellValue::Integer(v.into())),
        DataType::BigInt => typed::<i64>(row, idx, CellValue::Integer),
        DataType::Real => typed::<f32>(row, idx, |v| CellValue::Float(v.into())),
        DataType::Double => typed::<f64>(row, idx, CellValue::Float),
        DataType::Numeric => typed::<Decimal>(row, idx, |v| CellValue::Text(v.to_string())),
        DataType::Boolean => typed::<bool>(row, idx, CellValue::Boolean),
        DataType::Json | DataType::Jsonb => typed::<serde_json::Value>(row, idx, CellValue::Json),
        DataType::Bytea => typed::<Vec<u8>>(row, idx, CellValue::Binary),
        DataType::Uuid => typed::<uuid::Uuid>(row, idx, |v| CellValue::Uuid(v.to_string())),
        DataType::Timestamp => {
            typed::<chrono::NaiveDateTime>(row, idx, |v| CellValue::DateTime(v.to_string()))
        }
        DataType::TimestampTz => typed::<chrono::DateTime<chrono::Utc>>(row, idx, |v| {
            CellValue::DateTime(v.to_string())
        }),
        DataType::Date => typed::<chrono::NaiveDate>(row, idx, |v| CellValue::DateTime(v.to_string())),
        DataType::Time => typed::<chrono::NaiveTime>(row, idx, |v| CellValue::DateTime(v.to_string())),
        DataType::Array(inner) => match inner.as_ref() {
            DataType::Text => typed_array::<String>(row, idx, CellValue::Text),
            DataType::SmallInt => typed_array::<i16>(row, idx, |n| CellValue::Integer(n.into())),
            DataType::Integer => typed_array::<i32>(row, idx, |n| CellValue::Integer(n.into())),
            DataType::BigInt => typed_array::<i64>(row, idx, CellValue::Integer),
            DataType::Double => typed_array::<f64>(row, idx, CellValue::Float),
            DataType::Boolean => typed_array::<bool>(row, idx, CellValue::Boolean),
            DataType::Uuid => {
                typed_array::<uuid::Uuid>(row, idx, |u| CellValue::Uuid(u.to_string()))
            }
            DataType::Jsonb => typed_array::<serde_json::Value>(row, idx, CellValue::Json),
            _ => try_as_string(row, idx),
        },
        _ => try_as_string(row, idx),
    }
}

/// Try to extract a value as a string (fallback for type mismatches).
fn try_as_string(row: &tokio_postgres::Row, idx: usize) -> CellValue {
    match row.try_get::<_, Option<String>>(idx) {
        Ok(Some(v)) => CellValue::Text(v),
        Ok(None) => CellValue::Null,
        Err(_) => {
            let type_name = row
                .columns()
                .get(idx)
                .map_or("unknown", |c| c.type_().name());
            CellValue::Text(format!("<unable to display: {}>", type_name))
        }
    }
}
